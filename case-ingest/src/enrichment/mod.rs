//! Background enrichment of displayed entities.
//!
//! Score, comment, occurrence and translation values are looked up on a
//! bounded [`EnrichmentPool`] and posted back to an [`EnrichmentListener`] as
//! [`NodeEvent`]s.

mod pool;
mod results;
mod task;

pub use pool::{EnrichmentPool, EnrichmentPoolConfig, EnrichmentPoolStats};
pub use results::{
    CommentState, EnrichmentListener, NodeEvent, Occurrences, ScoResults, Score, comment_state,
    occurrences, score_for,
};
pub use task::{EnrichmentTask, TaskOutcome};
