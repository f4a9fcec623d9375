//! Per-job handle passed to every module invocation.

use std::sync::{Arc, Weak};
use std::time::Duration;

use process_utils::{ExecOutcome, ProcessTerminator, default_timeout};
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::trace;

use super::events::IngestEvent;
use super::job::{IngestJob, IngestJobOptions, JobId};
use super::terminator::IngestJobTerminator;
use crate::Result;
use crate::case::{DataSource, ObjectId};

/// Context for modules running on one data source of a job.
///
/// Holds only a weak reference to the job, so a context kept by a module
/// never extends the job's lifetime.
#[derive(Debug)]
pub struct IngestJobContext {
    job_id: JobId,
    data_source: DataSource,
    job: Weak<IngestJob>,
    cancellation_token: CancellationToken,
    options: IngestJobOptions,
    poll_interval: Duration,
    events: broadcast::Sender<IngestEvent>,
}

impl IngestJobContext {
    pub fn new(
        job: &Arc<IngestJob>,
        data_source: DataSource,
        poll_interval: Duration,
        events: broadcast::Sender<IngestEvent>,
    ) -> Self {
        Self {
            job_id: job.id().to_string(),
            data_source,
            job: Arc::downgrade(job),
            cancellation_token: job.cancellation_token().clone(),
            options: job.options().clone(),
            poll_interval,
            events,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// The data source being ingested.
    pub fn data_source(&self) -> &DataSource {
        &self.data_source
    }

    /// The owning job, if it is still alive.
    pub fn job(&self) -> Option<Arc<IngestJob>> {
        self.job.upgrade()
    }

    pub fn options(&self) -> &IngestJobOptions {
        &self.options
    }

    pub fn skip_unallocated_space(&self) -> bool {
        self.options.skip_unallocated_space
    }

    pub fn keep_search_index(&self) -> bool {
        self.options.keep_search_index
    }

    /// Whether the job has been cancelled. Never reverts to `false`.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Resolves once the job is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancellation_token.cancelled()
    }

    /// The job's maximum per-process run time, if it set one.
    pub fn max_process_run_time(&self) -> Option<Duration> {
        self.options.max_process_run_time()
    }

    /// How often long running operations should poll their terminator.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Terminator that trips only on job cancellation.
    pub fn process_terminator(&self) -> IngestJobTerminator {
        IngestJobTerminator::cancellation_only(self.cancellation_token.clone())
    }

    /// Terminator that trips on job cancellation or after `max_run_time`.
    pub fn process_terminator_with_timeout(&self, max_run_time: Duration) -> IngestJobTerminator {
        IngestJobTerminator::new(self.cancellation_token.clone(), Some(max_run_time))
    }

    /// Terminator that trips on job cancellation and, when
    /// `use_global_timeout` is set, after the job's maximum process run time
    /// or the global default.
    pub fn process_terminator_with_global_timeout(
        &self,
        use_global_timeout: bool,
    ) -> IngestJobTerminator {
        let max_run_time = use_global_timeout
            .then(|| self.max_process_run_time().unwrap_or_else(default_timeout));
        IngestJobTerminator::new(self.cancellation_token.clone(), max_run_time)
    }

    /// Run an external command, killing it when `terminator` trips.
    pub async fn execute(
        &self,
        command: &mut Command,
        terminator: &dyn ProcessTerminator,
    ) -> Result<ExecOutcome> {
        Ok(process_utils::execute(command, terminator, self.poll_interval).await?)
    }

    /// Receive events published by this job's modules.
    pub fn subscribe_events(&self) -> broadcast::Receiver<IngestEvent> {
        self.events.subscribe()
    }

    /// Announce new derived data produced for a content object.
    pub fn post_content_changed(
        &self,
        content_id: ObjectId,
        module: impl Into<String>,
        artifact: serde_json::Value,
    ) {
        let module = module.into();
        trace!(job_id = %self.job_id, content_id, %module, "Content changed");
        let _ = self.events.send(IngestEvent::ContentChanged {
            job_id: self.job_id.clone(),
            content_id,
            module,
            artifact,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::test_support::{test_context, test_context_with_options};
    use process_utils::TerminationCode;

    #[test]
    fn test_context_does_not_keep_job_alive() {
        let (ctx, job) = test_context();
        assert!(ctx.job().is_some());
        drop(job);
        assert!(ctx.job().is_none());
    }

    #[test]
    fn test_cancellation_is_visible_through_context() {
        let (ctx, job) = test_context();
        let terminator = ctx.process_terminator();
        assert!(!ctx.is_cancelled());
        assert!(!terminator.should_terminate());

        job.request_cancel();
        assert!(ctx.is_cancelled());
        assert!(terminator.should_terminate());
        assert_eq!(terminator.termination_code(), TerminationCode::Cancellation);
    }

    #[test]
    fn test_global_timeout_resolution() {
        let (ctx, _job) = test_context_with_options(IngestJobOptions {
            max_process_run_time_secs: Some(5),
            ..Default::default()
        });
        assert_eq!(
            ctx.process_terminator_with_global_timeout(true).max_run_time(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(ctx.process_terminator_with_global_timeout(false).max_run_time(), None);

        let (ctx, _job) = test_context();
        assert_eq!(
            ctx.process_terminator_with_global_timeout(true).max_run_time(),
            Some(default_timeout())
        );
    }

    #[tokio::test]
    async fn test_post_content_changed() {
        let (tx, mut rx) = broadcast::channel(8);
        let (_, job) = test_context();
        let ctx = IngestJobContext::new(&job, DataSource::new(1, "image"), Duration::from_millis(10), tx);

        ctx.post_content_changed(7, "hash", serde_json::json!({ "md5": "abc" }));
        match rx.recv().await.unwrap() {
            IngestEvent::ContentChanged { content_id, module, .. } => {
                assert_eq!(content_id, 7);
                assert_eq!(module, "hash");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
