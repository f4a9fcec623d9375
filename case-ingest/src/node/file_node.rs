//! Display node for one file and its live property sheet.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use strum::{Display, EnumIter, IntoEnumIterator, IntoStaticStr};
use tracing::{debug, warn};

use super::DisplayPreferences;
use crate::case::{
    CaseEvent, CaseEventBus, CaseEventKind, CaseEventListener, Content, ContentProvider,
    ObjectId, SubscriptionId,
};
use crate::enrichment::{
    CommentState, EnrichmentListener, EnrichmentPool, NodeEvent, Occurrences, Score,
    comment_state, score_for,
};
use crate::properties::{EnabledPredicate, Property, PropertySheet, PropertyValue};

const NO_DESCRIPTION: &str = "No description";

/// Declared property slots of a file node, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr)]
pub enum FilePropertyType {
    #[strum(serialize = "Name")]
    Name,
    #[strum(serialize = "Translated Name")]
    Translation,
    #[strum(serialize = "S")]
    Score,
    #[strum(serialize = "C")]
    Comment,
    #[strum(serialize = "O")]
    Occurrences,
    #[strum(serialize = "Location")]
    Location,
    #[strum(serialize = "Modified Time")]
    ModifiedTime,
    #[strum(serialize = "Change Time")]
    ChangeTime,
    #[strum(serialize = "Access Time")]
    AccessTime,
    #[strum(serialize = "Created Time")]
    CreatedTime,
    #[strum(serialize = "Size")]
    Size,
    #[strum(serialize = "Flags(Dir)")]
    FlagsDir,
    #[strum(serialize = "Flags(Meta)")]
    FlagsMeta,
    #[strum(serialize = "Mode")]
    Mode,
    #[strum(serialize = "UserID")]
    UserId,
    #[strum(serialize = "GroupID")]
    GroupId,
    #[strum(serialize = "Meta Addr.")]
    MetaAddr,
    #[strum(serialize = "Attr. Addr.")]
    AttrAddr,
    #[strum(serialize = "Type(Dir)")]
    TypeDir,
    #[strum(serialize = "Type(Meta)")]
    TypeMeta,
    #[strum(serialize = "Known")]
    Known,
    #[strum(serialize = "MD5 Hash")]
    Md5Hash,
    #[strum(serialize = "Object ID")]
    ObjectId,
    #[strum(serialize = "MIME Type")]
    MimeType,
    #[strum(serialize = "Extension")]
    Extension,
}

impl FilePropertyType {
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// Collaborators shared by every [`FileNode`].
#[derive(Clone)]
pub struct NodeServices {
    pub provider: Arc<dyn ContentProvider>,
    pub pool: Arc<EnrichmentPool>,
    pub bus: Arc<CaseEventBus>,
    pub prefs: Arc<DisplayPreferences>,
}

/// A realized file entity with a property sheet kept current by background
/// enrichment and case events.
pub struct FileNode {
    content: Arc<Content>,
    sheet: PropertySheet,
    services: NodeServices,
    subscription: Mutex<Option<SubscriptionId>>,
    weak_self: Weak<FileNode>,
}

impl FileNode {
    /// Realize `content`: build its sheet, subscribe to case events and queue
    /// enrichment.
    pub fn new(content: Arc<Content>, services: NodeServices) -> Arc<Self> {
        let node = Arc::new_cyclic(|weak_self| {
            let sheet = PropertySheet::from_declared(declared_properties(&content, &services.prefs));
            Self {
                content,
                sheet,
                services,
                subscription: Mutex::new(None),
                weak_self: weak_self.clone(),
            }
        });

        let listener: Weak<dyn CaseEventListener> = node.weak_self.clone();
        let id = node.services.bus.subscribe(
            &[
                CaseEventKind::CaseClosed,
                CaseEventKind::ContentTagAdded,
                CaseEventKind::ContentTagDeleted,
                CaseEventKind::CommentChanged,
            ],
            listener,
        );
        *node.subscription.lock() = Some(id);

        node.request_enrichment();
        node
    }

    pub fn content(&self) -> &Arc<Content> {
        &self.content
    }

    pub fn content_id(&self) -> ObjectId {
        self.content.id
    }

    pub fn sheet(&self) -> &PropertySheet {
        &self.sheet
    }

    /// Rebuild the sheet from the declared properties and queue fresh
    /// enrichment for it.
    pub fn refresh(&self) {
        self.sheet
            .recreate(declared_properties(&self.content, &self.services.prefs));
        self.request_enrichment();
    }

    fn request_enrichment(&self) {
        let listener: Weak<dyn EnrichmentListener> = self.weak_self.clone();
        if !self
            .services
            .pool
            .submit(Arc::downgrade(&self.content), listener)
        {
            debug!(content_id = self.content.id, "Enrichment not queued");
        }
    }

    fn recompute_score_and_comment(&self) {
        let provider = &self.services.provider;
        let id = self.content.id;
        let (tags, hits) = match (provider.content_tags(id), provider.hash_set_hits(id)) {
            (Ok(tags), Ok(hits)) => (tags, hits),
            (Err(e), _) | (_, Err(e)) => {
                warn!(content_id = id, error = %e, "Failed to refresh score after tag change");
                return;
            }
        };
        let correlation = provider.correlation(&self.content).ok().flatten();

        let (score, description) = score_for(&self.content, &hits, &tags);
        self.sheet.reconcile([
            score_property(score, description),
            comment_property(comment_state(&tags, correlation.as_ref())),
        ]);
    }

    fn recompute_comment(&self) {
        let provider = &self.services.provider;
        let id = self.content.id;
        let tags = match provider.content_tags(id) {
            Ok(tags) => tags,
            Err(e) => {
                warn!(content_id = id, error = %e, "Failed to refresh comment");
                return;
            }
        };
        let correlation = provider.correlation(&self.content).ok().flatten();
        self.sheet
            .reconcile([comment_property(comment_state(&tags, correlation.as_ref()))]);
    }

    fn remove_listeners(&self) {
        if let Some(id) = self.subscription.lock().take() {
            self.services.bus.unsubscribe(id);
        }
    }

    fn occurrences_property(&self, occurrences: Occurrences) -> Property {
        Property::new(
            FilePropertyType::Occurrences.name(),
            occurrences.description,
            occurrences.count,
        )
        .with_enabled(show_occurrences(&self.services.prefs))
    }
}

impl EnrichmentListener for FileNode {
    fn on_node_event(&self, content_id: ObjectId, event: NodeEvent) {
        if content_id != self.content.id {
            return;
        }
        match event {
            NodeEvent::DatabaseContentAvailable(results) => {
                let mut batch = Vec::with_capacity(3);
                if let Some((score, description)) = results.score {
                    batch.push(score_property(score, description));
                }
                if let Some(comment) = results.comment {
                    batch.push(comment_property(comment));
                }
                if let Some(occurrences) = results.occurrences {
                    batch.push(self.occurrences_property(occurrences));
                }
                self.sheet.reconcile(batch);
            }
            NodeEvent::TranslationAvailable(name) => {
                self.sheet.reconcile([Property::new(
                    FilePropertyType::Translation.name(),
                    NO_DESCRIPTION,
                    name,
                )
                .with_enabled(show_translation(&self.services.prefs))]);
            }
        }
    }
}

impl CaseEventListener for FileNode {
    fn on_case_event(&self, event: &CaseEvent) {
        match event {
            CaseEvent::CaseOpened { .. } => {}
            CaseEvent::CaseClosed => self.remove_listeners(),
            CaseEvent::ContentTagAdded { .. } | CaseEvent::ContentTagDeleted { .. } => {
                if event.content_id() == Some(self.content.id) {
                    self.recompute_score_and_comment();
                }
            }
            CaseEvent::CommentChanged { content_id } => {
                if *content_id == self.content.id {
                    self.recompute_comment();
                }
            }
        }
    }
}

impl Drop for FileNode {
    fn drop(&mut self) {
        self.remove_listeners();
    }
}

fn score_property(score: Score, description: String) -> Property {
    Property::new(FilePropertyType::Score.name(), description, score.to_string())
}

fn comment_property(comment: CommentState) -> Property {
    Property::new(
        FilePropertyType::Comment.name(),
        NO_DESCRIPTION,
        comment.to_string(),
    )
}

fn show_translation(prefs: &Arc<DisplayPreferences>) -> EnabledPredicate {
    let prefs = Arc::clone(prefs);
    Arc::new(move || prefs.display_translated_names())
}

fn show_occurrences(prefs: &Arc<DisplayPreferences>) -> EnabledPredicate {
    let prefs = Arc::clone(prefs);
    Arc::new(move || !prefs.hide_case_repository_comments_and_occurrences())
}

/// The full declared property list of a file, with placeholders for values
/// that are filled in by enrichment.
fn declared_properties(content: &Content, prefs: &Arc<DisplayPreferences>) -> Vec<Property> {
    FilePropertyType::iter()
        .map(|kind| {
            let value: PropertyValue = match kind {
                FilePropertyType::Name => content.display_name().into(),
                FilePropertyType::Translation
                | FilePropertyType::Score
                | FilePropertyType::Comment
                | FilePropertyType::Occurrences => PropertyValue::Empty,
                FilePropertyType::Location => content.path().into(),
                FilePropertyType::ModifiedTime => content.modified.into(),
                FilePropertyType::ChangeTime => content.changed.into(),
                FilePropertyType::AccessTime => content.accessed.into(),
                FilePropertyType::CreatedTime => content.created.into(),
                FilePropertyType::Size => content.size.into(),
                FilePropertyType::FlagsDir => content.flags_dir.as_str().into(),
                FilePropertyType::FlagsMeta => content.flags_meta.as_str().into(),
                FilePropertyType::Mode => content.mode.as_str().into(),
                FilePropertyType::UserId => content.uid.into(),
                FilePropertyType::GroupId => content.gid.into(),
                FilePropertyType::MetaAddr => content.meta_addr.into(),
                FilePropertyType::AttrAddr => content.attr_addr.as_str().into(),
                FilePropertyType::TypeDir => content.type_dir.as_str().into(),
                FilePropertyType::TypeMeta => content.type_meta.as_str().into(),
                FilePropertyType::Known => content.known.name().into(),
                FilePropertyType::Md5Hash => content.md5_hash.clone().into(),
                FilePropertyType::ObjectId => content.id.into(),
                FilePropertyType::MimeType => content.mime_type.clone().into(),
                FilePropertyType::Extension => content.extension.as_str().into(),
            };
            let property = Property::new(kind.name(), NO_DESCRIPTION, value);
            match kind {
                FilePropertyType::Translation => property.with_enabled(show_translation(prefs)),
                FilePropertyType::Occurrences => property.with_enabled(show_occurrences(prefs)),
                _ => property,
            }
        })
        .collect()
}
