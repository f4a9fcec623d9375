//! Derived display values and the events that carry them.

use serde::Serialize;
use strum::{Display, EnumString, IntoStaticStr};

use crate::case::{Content, ContentTag, CorrelationRecord, HashSetHit, KnownStatus, ObjectId};

/// Reputation of a file.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Display, EnumString, IntoStaticStr,
)]
pub enum Score {
    #[default]
    #[strum(serialize = "No Score")]
    NoScore,
    #[strum(serialize = "Interesting")]
    Interesting,
    #[strum(serialize = "Notable")]
    Notable,
}

/// Which kinds of comment exist for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Display, EnumString, IntoStaticStr)]
pub enum CommentState {
    #[default]
    #[strum(serialize = "No Comment")]
    NoComment,
    #[strum(serialize = "Tag, No Comment")]
    TagNoComment,
    #[strum(serialize = "Case Repository Comment")]
    CaseRepositoryComment,
    #[strum(serialize = "Tag Comment")]
    TagComment,
    #[strum(serialize = "Case Repository and Tag Comment")]
    CaseRepositoryAndTagComment,
}

/// Cross-case occurrence count with a human readable explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Occurrences {
    pub count: Option<u64>,
    pub description: String,
}

/// Score, comment and occurrence values computed for one file.
///
/// Each field is `None` when its lookup failed; consumers apply only what is
/// present.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ScoResults {
    pub score: Option<(Score, String)>,
    pub comment: Option<CommentState>,
    pub occurrences: Option<Occurrences>,
}

impl ScoResults {
    pub fn is_empty(&self) -> bool {
        self.score.is_none() && self.comment.is_none() && self.occurrences.is_none()
    }
}

/// Results posted back to the node that requested enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    DatabaseContentAvailable(ScoResults),
    TranslationAvailable(String),
}

/// Receiver of enrichment results.
pub trait EnrichmentListener: Send + Sync {
    fn on_node_event(&self, content_id: ObjectId, event: NodeEvent);
}

/// Score a file from its known status, hash set hits and tags.
pub fn score_for(content: &Content, hits: &[HashSetHit], tags: &[ContentTag]) -> (Score, String) {
    if content.known == KnownStatus::KnownBad {
        return (Score::Notable, "File recognized as notable.".to_string());
    }
    if let Some(hit) = hits.iter().find(|h| h.notable) {
        return (
            Score::Notable,
            format!("File is in notable hash set {}.", hit.set_name),
        );
    }
    if let Some(hit) = hits.first() {
        return (
            Score::Interesting,
            format!("File is in hash set {}.", hit.set_name),
        );
    }
    if !tags.is_empty() {
        return (Score::Interesting, "File has been tagged.".to_string());
    }
    (Score::NoScore, "No score".to_string())
}

/// Combine tag comments and the correlation comment into a [`CommentState`].
pub fn comment_state(tags: &[ContentTag], correlation: Option<&CorrelationRecord>) -> CommentState {
    let mut state = CommentState::NoComment;
    if !tags.is_empty() {
        state = CommentState::TagNoComment;
        if tags.iter().any(|t| !t.comment.trim().is_empty()) {
            state = CommentState::TagComment;
        }
    }

    let has_repository_comment = correlation
        .and_then(|r| r.comment.as_deref())
        .is_some_and(|c| !c.trim().is_empty());
    if has_repository_comment {
        state = if state == CommentState::TagComment {
            CommentState::CaseRepositoryAndTagComment
        } else {
            CommentState::CaseRepositoryComment
        };
    }
    state
}

/// Occurrence count from a correlation lookup.
pub fn occurrences(correlation: Option<&CorrelationRecord>) -> Occurrences {
    match correlation {
        None => Occurrences {
            count: None,
            description: "No correlation properties found".to_string(),
        },
        Some(CorrelationRecord {
            occurrences: Some(count),
            ..
        }) => Occurrences {
            count: Some(*count),
            description: format!("Seen in {count} data source(s) across cases."),
        },
        Some(_) => Occurrences {
            count: None,
            description: "Occurrence count unavailable".to_string(),
        },
    }
}
