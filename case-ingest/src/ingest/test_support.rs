//! Shared fixtures for ingest unit tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use process_utils::TerminationCode;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::context::IngestJobContext;
use super::job::{IngestJob, IngestJobOptions, ModuleSelection};
use super::module::{DataSourceIngestModule, FileIngestModule};
use crate::Result;
use crate::case::{Content, DataSource, ObjectId};

/// Records the id of every unit it processes.
pub(crate) struct RecordingModule {
    name: String,
    seen: Mutex<Vec<ObjectId>>,
}

impl RecordingModule {
    pub(crate) fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn seen(&self) -> Vec<ObjectId> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl FileIngestModule for RecordingModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, _ctx: &IngestJobContext, file: &Content) -> Result<TerminationCode> {
        self.seen.lock().push(file.id);
        Ok(TerminationCode::None)
    }
}

#[async_trait]
impl DataSourceIngestModule for RecordingModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        _ctx: &IngestJobContext,
        data_source: &DataSource,
    ) -> Result<TerminationCode> {
        self.seen.lock().push(data_source.id);
        Ok(TerminationCode::None)
    }
}

pub(crate) fn test_context() -> (IngestJobContext, Arc<IngestJob>) {
    test_context_with_options(IngestJobOptions::default())
}

pub(crate) fn test_context_with_options(
    options: IngestJobOptions,
) -> (IngestJobContext, Arc<IngestJob>) {
    let data_source = DataSource::new(1, "image");
    let job = Arc::new(IngestJob::new(
        vec![data_source.clone()],
        ModuleSelection::new().with_file_module("a"),
        options,
        CancellationToken::new(),
    ));
    let (events, _) = broadcast::channel(16);
    let ctx = IngestJobContext::new(&job, data_source, Duration::from_millis(5), events);
    (ctx, job)
}
