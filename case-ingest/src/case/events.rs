//! Case event bus with weakly held subscribers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::content::{ContentTag, ObjectId};

/// Events published by the case layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseEvent {
    CaseOpened { case_name: String },
    CaseClosed,
    ContentTagAdded { tag: ContentTag },
    ContentTagDeleted { content_id: ObjectId, tag_id: i64 },
    CommentChanged { content_id: ObjectId },
}

/// Discriminant of a [`CaseEvent`], used for subscription filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaseEventKind {
    CaseOpened,
    CaseClosed,
    ContentTagAdded,
    ContentTagDeleted,
    CommentChanged,
}

impl CaseEvent {
    pub fn kind(&self) -> CaseEventKind {
        match self {
            CaseEvent::CaseOpened { .. } => CaseEventKind::CaseOpened,
            CaseEvent::CaseClosed => CaseEventKind::CaseClosed,
            CaseEvent::ContentTagAdded { .. } => CaseEventKind::ContentTagAdded,
            CaseEvent::ContentTagDeleted { .. } => CaseEventKind::ContentTagDeleted,
            CaseEvent::CommentChanged { .. } => CaseEventKind::CommentChanged,
        }
    }

    /// The content object the event is about, if any.
    pub fn content_id(&self) -> Option<ObjectId> {
        match self {
            CaseEvent::ContentTagAdded { tag } => Some(tag.content_id),
            CaseEvent::ContentTagDeleted { content_id, .. }
            | CaseEvent::CommentChanged { content_id } => Some(*content_id),
            CaseEvent::CaseOpened { .. } | CaseEvent::CaseClosed => None,
        }
    }
}

/// Receiver of case events.
pub trait CaseEventListener: Send + Sync {
    fn on_case_event(&self, event: &CaseEvent);
}

/// Handle returned by [`CaseEventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    kinds: Vec<CaseEventKind>,
    listener: Weak<dyn CaseEventListener>,
}

/// Publishes [`CaseEvent`]s to subscribers without keeping them alive.
///
/// Subscribers whose listener has been dropped are pruned on the next publish.
#[derive(Default)]
pub struct CaseEventBus {
    subscriptions: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl CaseEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `listener` to the given event kinds.
    pub fn subscribe(
        &self,
        kinds: &[CaseEventKind],
        listener: Weak<dyn CaseEventListener>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.lock().push(Subscription {
            id,
            kinds: kinds.to_vec(),
            listener,
        });
        trace!(subscription = id.0, "Case event subscriber added");
        id
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        before != subscriptions.len()
    }

    /// Deliver `event` to every live subscriber interested in its kind.
    ///
    /// Listeners are invoked after the subscription lock is released, so they
    /// may unsubscribe from within the callback. Returns the number of
    /// listeners notified.
    pub fn publish(&self, event: &CaseEvent) -> usize {
        let kind = event.kind();
        let targets: Vec<Arc<dyn CaseEventListener>> = {
            let mut subscriptions = self.subscriptions.lock();
            let before = subscriptions.len();
            subscriptions.retain(|s| s.listener.strong_count() > 0);
            let pruned = before - subscriptions.len();
            if pruned > 0 {
                debug!(pruned, "Pruned stale case event subscribers");
            }
            subscriptions
                .iter()
                .filter(|s| s.kinds.contains(&kind))
                .filter_map(|s| s.listener.upgrade())
                .collect()
        };

        for listener in &targets {
            listener.on_case_event(event);
        }
        targets.len()
    }

    /// Number of registered subscriptions, including ones not yet pruned.
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.lock().len()
    }
}
