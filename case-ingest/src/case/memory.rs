//! In-memory [`ContentProvider`] used by tests and embedders.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use parking_lot::RwLock;

use super::content::{
    Content, ContentProvider, ContentTag, CorrelationRecord, DataSource, HashSetHit, ObjectId,
    StorageError,
};

#[derive(Default)]
struct CaseTables {
    files: HashMap<ObjectId, Arc<Content>>,
    /// Insertion order of files per data source.
    by_data_source: HashMap<ObjectId, Vec<ObjectId>>,
    tags: HashMap<ObjectId, Vec<ContentTag>>,
    hash_hits: HashMap<ObjectId, Vec<HashSetHit>>,
    correlation: HashMap<String, CorrelationRecord>,
    translations: HashMap<ObjectId, String>,
}

/// A case held entirely in memory.
///
/// Lookups can be made to fail with [`InMemoryCase::set_unavailable`], or
/// only the hash set lookup with [`InMemoryCase::set_hash_sets_unavailable`],
/// to exercise storage error paths.
pub struct InMemoryCase {
    tables: RwLock<CaseTables>,
    next_tag_id: AtomicI64,
    unavailable: AtomicBool,
    hash_sets_unavailable: AtomicBool,
}

impl Default for InMemoryCase {
    fn default() -> Self {
        Self {
            tables: RwLock::new(CaseTables::default()),
            next_tag_id: AtomicI64::new(1),
            unavailable: AtomicBool::new(false),
            hash_sets_unavailable: AtomicBool::new(false),
        }
    }
}

impl InMemoryCase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_data_source(&self, data_source: &DataSource) {
        self.tables
            .write()
            .by_data_source
            .entry(data_source.id)
            .or_default();
    }

    /// Add a file; returns the shared handle stored in the case.
    pub fn add_file(&self, content: Content) -> Arc<Content> {
        let content = Arc::new(content);
        let mut tables = self.tables.write();
        tables
            .by_data_source
            .entry(content.data_source_id)
            .or_default()
            .push(content.id);
        tables.files.insert(content.id, Arc::clone(&content));
        content
    }

    pub fn add_tag(
        &self,
        content_id: ObjectId,
        tag_name: impl Into<String>,
        comment: impl Into<String>,
    ) -> ContentTag {
        let tag = ContentTag {
            id: self.next_tag_id.fetch_add(1, Ordering::Relaxed),
            content_id,
            tag_name: tag_name.into(),
            comment: comment.into(),
        };
        self.tables
            .write()
            .tags
            .entry(content_id)
            .or_default()
            .push(tag.clone());
        tag
    }

    /// Remove a tag; returns `false` if no such tag existed.
    pub fn remove_tag(&self, content_id: ObjectId, tag_id: i64) -> bool {
        let mut tables = self.tables.write();
        let Some(tags) = tables.tags.get_mut(&content_id) else {
            return false;
        };
        let before = tags.len();
        tags.retain(|t| t.id != tag_id);
        before != tags.len()
    }

    pub fn add_hash_hit(&self, content_id: ObjectId, set_name: impl Into<String>, notable: bool) {
        self.tables
            .write()
            .hash_hits
            .entry(content_id)
            .or_default()
            .push(HashSetHit {
                set_name: set_name.into(),
                notable,
            });
    }

    /// Set the correlation record for an MD5 value.
    pub fn set_correlation(&self, md5: impl Into<String>, record: CorrelationRecord) {
        self.tables.write().correlation.insert(md5.into(), record);
    }

    pub fn set_translation(&self, content_id: ObjectId, translated: impl Into<String>) {
        self.tables
            .write()
            .translations
            .insert(content_id, translated.into());
    }

    /// Make every lookup fail with [`StorageError::NoCurrentCase`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make only [`ContentProvider::hash_set_hits`] fail.
    pub fn set_hash_sets_unavailable(&self, unavailable: bool) {
        self.hash_sets_unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_open(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::NoCurrentCase)
        } else {
            Ok(())
        }
    }
}

impl ContentProvider for InMemoryCase {
    fn content(&self, id: ObjectId) -> Result<Arc<Content>, StorageError> {
        self.check_open()?;
        self.tables
            .read()
            .files
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound(id))
    }

    fn data_source_files(&self, data_source: &DataSource) -> Result<Vec<Arc<Content>>, StorageError> {
        self.check_open()?;
        let tables = self.tables.read();
        let ids = tables
            .by_data_source
            .get(&data_source.id)
            .ok_or(StorageError::NotFound(data_source.id))?;
        Ok(ids
            .iter()
            .filter_map(|id| tables.files.get(id).cloned())
            .collect())
    }

    fn content_tags(&self, id: ObjectId) -> Result<Vec<ContentTag>, StorageError> {
        self.check_open()?;
        Ok(self.tables.read().tags.get(&id).cloned().unwrap_or_default())
    }

    fn hash_set_hits(&self, id: ObjectId) -> Result<Vec<HashSetHit>, StorageError> {
        self.check_open()?;
        if self.hash_sets_unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::core("hash set database unavailable"));
        }
        Ok(self
            .tables
            .read()
            .hash_hits
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    fn correlation(&self, content: &Content) -> Result<Option<CorrelationRecord>, StorageError> {
        self.check_open()?;
        let Some(md5) = content.md5_hash.as_deref() else {
            return Ok(None);
        };
        Ok(self.tables.read().correlation.get(md5).cloned())
    }

    fn translated_name(&self, content: &Content) -> Result<Option<String>, StorageError> {
        self.check_open()?;
        Ok(self.tables.read().translations.get(&content.id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_files_keep_insertion_order() {
        let case = InMemoryCase::new();
        let ds = DataSource::new(1, "image.e01");
        case.add_data_source(&ds);
        case.add_file(Content::new(20, 1, "b.txt"));
        case.add_file(Content::new(10, 1, "a.txt"));

        let ids: Vec<_> = case
            .data_source_files(&ds)
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![20, 10]);
    }

    #[test]
    fn test_unknown_data_source() {
        let case = InMemoryCase::new();
        let err = case
            .data_source_files(&DataSource::new(9, "missing"))
            .unwrap_err();
        assert_eq!(err, StorageError::NotFound(9));
    }

    #[test]
    fn test_tags_add_and_remove() {
        let case = InMemoryCase::new();
        let tag = case.add_tag(5, "Notable Item", "look here");
        assert_eq!(case.content_tags(5).unwrap().len(), 1);

        assert!(case.remove_tag(5, tag.id));
        assert!(!case.remove_tag(5, tag.id));
        assert!(case.content_tags(5).unwrap().is_empty());
    }

    #[test]
    fn test_correlation_requires_md5() {
        let case = InMemoryCase::new();
        case.set_correlation(
            "abc",
            CorrelationRecord {
                comment: None,
                occurrences: Some(3),
            },
        );

        let mut content = Content::new(1, 1, "x.bin");
        assert_eq!(case.correlation(&content).unwrap(), None);

        content.md5_hash = Some("abc".to_string());
        assert_eq!(
            case.correlation(&content).unwrap().and_then(|r| r.occurrences),
            Some(3)
        );
    }

    #[test]
    fn test_unavailable_case_fails_lookups() {
        let case = InMemoryCase::new();
        case.set_unavailable(true);
        assert_eq!(case.content_tags(1).unwrap_err(), StorageError::NoCurrentCase);
    }

    #[test]
    fn test_hash_sets_unavailable_fails_only_hash_lookup() {
        let case = InMemoryCase::new();
        case.add_file(Content::new(1, 1, "a"));
        case.set_hash_sets_unavailable(true);

        assert!(matches!(case.hash_set_hits(1), Err(StorageError::Core(_))));
        assert!(case.content_tags(1).is_ok());
        assert!(case.content(1).is_ok());
    }
}
