use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// User display preferences consulted by enabled predicates.
///
/// Changes take effect the next time a predicate is evaluated.
#[derive(Debug, Default)]
pub struct DisplayPreferences {
    display_translated_names: AtomicBool,
    hide_case_repository_comments_and_occurrences: AtomicBool,
}

/// Serializable form of [`DisplayPreferences`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayPreferencesConfig {
    pub display_translated_names: bool,
    pub hide_case_repository_comments_and_occurrences: bool,
}

impl DisplayPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: DisplayPreferencesConfig) -> Self {
        Self {
            display_translated_names: AtomicBool::new(config.display_translated_names),
            hide_case_repository_comments_and_occurrences: AtomicBool::new(
                config.hide_case_repository_comments_and_occurrences,
            ),
        }
    }

    pub fn display_translated_names(&self) -> bool {
        self.display_translated_names.load(Ordering::Relaxed)
    }

    pub fn set_display_translated_names(&self, value: bool) {
        self.display_translated_names.store(value, Ordering::Relaxed);
    }

    pub fn hide_case_repository_comments_and_occurrences(&self) -> bool {
        self.hide_case_repository_comments_and_occurrences
            .load(Ordering::Relaxed)
    }

    pub fn set_hide_case_repository_comments_and_occurrences(&self, value: bool) {
        self.hide_case_repository_comments_and_occurrences
            .store(value, Ordering::Relaxed);
    }
}
