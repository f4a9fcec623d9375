//! A case whose data sources are local directories.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::content::{
    Content, ContentProvider, ContentTag, CorrelationRecord, DataSource, HashSetHit, ObjectId,
    StorageError,
};
use super::memory::InMemoryCase;

/// Exposes local directories as data sources.
///
/// Each directory is walked once when added; the resulting file list is
/// served from memory afterwards.
pub struct FilesystemCase {
    inner: InMemoryCase,
    next_id: AtomicI64,
}

impl Default for FilesystemCase {
    fn default() -> Self {
        Self {
            inner: InMemoryCase::new(),
            next_id: AtomicI64::new(1),
        }
    }
}

impl FilesystemCase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `root` as a data source and enumerate its regular files.
    pub fn add_directory(&self, root: impl AsRef<Path>) -> Result<DataSource, StorageError> {
        let root = root.as_ref();
        let root = fs::canonicalize(root)
            .map_err(|e| StorageError::core(format!("{}: {e}", root.display())))?;
        if !root.is_dir() {
            return Err(StorageError::core(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());
        let data_source = DataSource::new(self.allocate_id(), name);
        self.inner.add_data_source(&data_source);

        let mut pending = vec![root.clone()];
        let mut count = 0usize;
        while let Some(dir) = pending.pop() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                    continue;
                }
            };
            let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
            paths.sort();

            for path in paths {
                let Ok(metadata) = fs::symlink_metadata(&path) else {
                    continue;
                };
                if metadata.is_dir() {
                    pending.push(path);
                } else if metadata.is_file() {
                    let content = self.describe(&data_source, &root, &path, &metadata);
                    self.inner.add_file(content);
                    count += 1;
                }
            }
        }

        debug!(data_source = %data_source.name, files = count, "Enumerated data source");
        Ok(data_source)
    }

    fn allocate_id(&self) -> ObjectId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn describe(
        &self,
        data_source: &DataSource,
        root: &Path,
        path: &Path,
        metadata: &fs::Metadata,
    ) -> Content {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut content = Content::new(self.allocate_id(), data_source.id, name);

        let relative_parent = path
            .parent()
            .and_then(|p| p.strip_prefix(root).ok())
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();
        content.parent_path = format!("/{relative_parent}");
        content.size = metadata.len();
        content.modified = metadata.modified().ok().map(DateTime::<Utc>::from);
        content.accessed = metadata.accessed().ok().map(DateTime::<Utc>::from);
        content.created = metadata.created().ok().map(DateTime::<Utc>::from);
        content.flags_dir = "Allocated".to_string();
        content.flags_meta = "Allocated".to_string();
        content.type_dir = "r".to_string();
        content.type_meta = "r".to_string();
        content.local_path = Some(path.to_path_buf());

        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            content.uid = metadata.uid();
            content.gid = metadata.gid();
            content.meta_addr = metadata.ino();
            content.mode = format!("{:o}", metadata.mode() & 0o7777);
            content.changed = DateTime::<Utc>::from_timestamp(metadata.ctime(), 0);
        }

        content
    }
}

impl ContentProvider for FilesystemCase {
    fn content(&self, id: ObjectId) -> Result<Arc<Content>, StorageError> {
        self.inner.content(id)
    }

    fn data_source_files(&self, data_source: &DataSource) -> Result<Vec<Arc<Content>>, StorageError> {
        self.inner.data_source_files(data_source)
    }

    fn content_tags(&self, id: ObjectId) -> Result<Vec<ContentTag>, StorageError> {
        self.inner.content_tags(id)
    }

    fn hash_set_hits(&self, id: ObjectId) -> Result<Vec<HashSetHit>, StorageError> {
        self.inner.hash_set_hits(id)
    }

    fn correlation(&self, content: &Content) -> Result<Option<CorrelationRecord>, StorageError> {
        self.inner.correlation(content)
    }
}
