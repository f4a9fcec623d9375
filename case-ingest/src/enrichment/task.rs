use std::sync::{Arc, Weak};

use tracing::{debug, warn};

use super::results::{
    EnrichmentListener, NodeEvent, ScoResults, comment_state, occurrences, score_for,
};
use crate::case::{Content, ContentProvider, ObjectId};
use crate::node::DisplayPreferences;

/// What happened when an [`EnrichmentTask`] ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Events were posted to the listener.
    Delivered { events: usize },
    /// The entity or its listener was gone; nothing was computed or posted.
    Stale,
}

/// Computes the derived properties of one content object.
///
/// Holds only weak references so a queued task never keeps a discarded
/// entity or listener alive.
pub struct EnrichmentTask {
    content_id: ObjectId,
    content: Weak<Content>,
    listener: Weak<dyn EnrichmentListener>,
}

impl EnrichmentTask {
    pub fn new(content: &Arc<Content>, listener: Weak<dyn EnrichmentListener>) -> Self {
        Self {
            content_id: content.id,
            content: Arc::downgrade(content),
            listener,
        }
    }

    pub fn content_id(&self) -> ObjectId {
        self.content_id
    }

    /// Whether both the entity and the listener can still be resolved.
    pub fn is_live(&self) -> bool {
        self.content.strong_count() > 0 && self.listener.strong_count() > 0
    }

    /// Run the lookups and post their results.
    ///
    /// A failed lookup drops only the values that depend on it.
    pub fn run(&self, provider: &dyn ContentProvider, prefs: &DisplayPreferences) -> TaskOutcome {
        let Some(content) = self.content.upgrade() else {
            return TaskOutcome::Stale;
        };
        if self.listener.strong_count() == 0 {
            return TaskOutcome::Stale;
        }

        let id = content.id;
        let tags = provider
            .content_tags(id)
            .inspect_err(|e| warn!(content_id = id, error = %e, "Tag lookup failed"))
            .ok();
        let hits = provider
            .hash_set_hits(id)
            .inspect_err(|e| warn!(content_id = id, error = %e, "Hash set lookup failed"))
            .ok();
        let correlation = provider
            .correlation(&content)
            .inspect_err(|e| warn!(content_id = id, error = %e, "Correlation lookup failed"))
            .ok();

        let results = ScoResults {
            score: match (&hits, &tags) {
                (Some(hits), Some(tags)) => Some(score_for(&content, hits, tags)),
                _ => None,
            },
            comment: match (&tags, &correlation) {
                (Some(tags), Some(record)) => Some(comment_state(tags, record.as_ref())),
                _ => None,
            },
            occurrences: correlation.as_ref().map(|record| occurrences(record.as_ref())),
        };

        let mut events = Vec::with_capacity(2);
        if !results.is_empty() {
            events.push(NodeEvent::DatabaseContentAvailable(results));
        }

        if prefs.display_translated_names() {
            match provider.translated_name(&content) {
                Ok(Some(name)) if !name.is_empty() => events.push(NodeEvent::TranslationAvailable(name)),
                Ok(_) => {}
                Err(e) => warn!(content_id = id, error = %e, "Translation lookup failed"),
            }
        }
        drop(content);

        let Some(listener) = self.listener.upgrade() else {
            debug!(content_id = id, "Listener dropped before results were posted");
            return TaskOutcome::Stale;
        };
        let delivered = events.len();
        for event in events {
            listener.on_node_event(id, event);
        }
        TaskOutcome::Delivered { events: delivered }
    }
}
