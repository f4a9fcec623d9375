//! Collaborator interfaces of the case layer.
//!
//! The ingest core only consumes these: content lookups through
//! [`ContentProvider`] and change notifications through [`CaseEventBus`].

mod content;
mod events;
mod fs;
mod memory;

pub use content::{
    Content, ContentProvider, ContentTag, CorrelationRecord, DataSource, HashSetHit, KnownStatus,
    ObjectId, StorageError,
};
pub use events::{CaseEvent, CaseEventBus, CaseEventKind, CaseEventListener, SubscriptionId};
pub use fs::FilesystemCase;
pub use memory::InMemoryCase;
