//! Events published by the ingest scheduler.

use process_utils::TerminationCode;
use serde::Serialize;

use super::job::{JobId, JobState};
use super::pipeline::UnitId;
use crate::case::ObjectId;

/// Progress notifications for ingest jobs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IngestEvent {
    JobStarted {
        job_id: JobId,
        data_sources: Vec<ObjectId>,
    },
    DataSourceStarted {
        job_id: JobId,
        data_source_id: ObjectId,
        files: usize,
    },
    /// One unit ran through its pipeline.
    UnitCompleted {
        job_id: JobId,
        unit: UnitId,
        termination_code: TerminationCode,
        failed_modules: Vec<String>,
    },
    DataSourceCompleted {
        job_id: JobId,
        data_source_id: ObjectId,
    },
    JobCompleted {
        job_id: JobId,
        state: JobState,
    },
    /// A module produced new derived data for a content object.
    ContentChanged {
        job_id: JobId,
        content_id: ObjectId,
        module: String,
        artifact: serde_json::Value,
    },
}

impl IngestEvent {
    pub fn job_id(&self) -> &str {
        match self {
            IngestEvent::JobStarted { job_id, .. }
            | IngestEvent::DataSourceStarted { job_id, .. }
            | IngestEvent::UnitCompleted { job_id, .. }
            | IngestEvent::DataSourceCompleted { job_id, .. }
            | IngestEvent::JobCompleted { job_id, .. }
            | IngestEvent::ContentChanged { job_id, .. } => job_id,
        }
    }
}
