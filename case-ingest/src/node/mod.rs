//! Display-side entities fed by background enrichment.

mod file_node;
mod preferences;

pub use file_node::{FileNode, FilePropertyType, NodeServices};
pub use preferences::{DisplayPreferences, DisplayPreferencesConfig};
