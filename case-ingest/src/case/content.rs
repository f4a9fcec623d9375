//! Content model and the query interface consumed from the case layer.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable identity of a content object in the case database.
pub type ObjectId = i64;

/// Errors raised by the case storage layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("No case is currently open")]
    NoCurrentCase,

    #[error("Content {0} not found")]
    NotFound(ObjectId),

    #[error("Core storage error: {0}")]
    Core(String),
}

impl StorageError {
    pub fn core(msg: impl Into<String>) -> Self {
        Self::Core(msg.into())
    }
}

/// A data source (disk image, logical file set, local directory).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    pub id: ObjectId,
    pub name: String,
    pub device_id: String,
}

impl DataSource {
    pub fn new(id: ObjectId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            device_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Hash set membership status of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnownStatus {
    #[default]
    Unknown,
    Known,
    KnownBad,
}

impl KnownStatus {
    pub fn name(self) -> &'static str {
        match self {
            KnownStatus::Unknown => "unknown",
            KnownStatus::Known => "known",
            KnownStatus::KnownBad => "notable",
        }
    }
}

/// A file-like content object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    pub id: ObjectId,
    pub data_source_id: ObjectId,
    pub name: String,
    /// Parent path inside the data source, always starting with `/`.
    pub parent_path: String,
    pub size: u64,
    pub extension: String,
    pub mime_type: Option<String>,
    pub md5_hash: Option<String>,
    pub known: KnownStatus,
    pub modified: Option<DateTime<Utc>>,
    pub changed: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    pub flags_dir: String,
    pub flags_meta: String,
    pub mode: String,
    pub uid: u32,
    pub gid: u32,
    pub meta_addr: u64,
    pub attr_addr: String,
    pub type_dir: String,
    pub type_meta: String,
    /// Whether this content lives in unallocated space.
    pub unallocated: bool,
    /// Backing file on the local filesystem, when one exists.
    pub local_path: Option<PathBuf>,
}

impl Content {
    pub fn new(id: ObjectId, data_source_id: ObjectId, name: impl Into<String>) -> Self {
        let name = name.into();
        let extension = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        Self {
            id,
            data_source_id,
            name,
            parent_path: "/".to_string(),
            extension,
            ..Default::default()
        }
    }

    /// Name shown to users; `.` and `..` entries get their parent's name.
    pub fn display_name(&self) -> &str {
        match self.name.as_str() {
            "." | ".." => self
                .parent_path
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .unwrap_or("/"),
            name => name,
        }
    }

    /// Full path inside the data source.
    pub fn path(&self) -> String {
        if self.parent_path.ends_with('/') {
            format!("{}{}", self.parent_path, self.name)
        } else {
            format!("{}/{}", self.parent_path, self.name)
        }
    }
}

/// A user tag applied to a content object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentTag {
    pub id: i64,
    pub content_id: ObjectId,
    pub tag_name: String,
    pub comment: String,
}

/// Membership of a file in a hash set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashSetHit {
    pub set_name: String,
    pub notable: bool,
}

/// Cross-case correlation record for a file's MD5.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CorrelationRecord {
    pub comment: Option<String>,
    /// Number of data sources the value was seen in, if known.
    pub occurrences: Option<u64>,
}

/// Synchronous query interface into the case database.
///
/// Every call may fail with a [`StorageError`]; callers in this crate treat
/// failures as local to the lookup that raised them.
pub trait ContentProvider: Send + Sync {
    /// Resolve a content object by id.
    fn content(&self, id: ObjectId) -> Result<Arc<Content>, StorageError>;

    /// Enumerate the files of a data source, in dispatch order.
    fn data_source_files(&self, data_source: &DataSource) -> Result<Vec<Arc<Content>>, StorageError>;

    fn content_tags(&self, id: ObjectId) -> Result<Vec<ContentTag>, StorageError>;

    fn hash_set_hits(&self, id: ObjectId) -> Result<Vec<HashSetHit>, StorageError>;

    /// Correlation record for the content, `None` if it has no correlatable value.
    fn correlation(&self, content: &Content) -> Result<Option<CorrelationRecord>, StorageError>;

    /// Translated file name, `None` when no translator is configured.
    fn translated_name(&self, _content: &Content) -> Result<Option<String>, StorageError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_extension_and_path() {
        let mut content = Content::new(7, 1, "Report.DOCX");
        content.parent_path = "/home/user".to_string();

        assert_eq!(content.extension, "docx");
        assert_eq!(content.path(), "/home/user/Report.DOCX");
        assert_eq!(content.display_name(), "Report.DOCX");
    }

    #[test]
    fn test_dot_entries_use_parent_name() {
        let mut content = Content::new(8, 1, ".");
        content.parent_path = "/home/user/".to_string();
        assert_eq!(content.display_name(), "user");
    }

    #[test]
    fn test_known_status_name() {
        assert_eq!(KnownStatus::KnownBad.name(), "notable");
        assert_eq!(KnownStatus::default(), KnownStatus::Unknown);
    }
}
