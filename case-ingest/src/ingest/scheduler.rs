//! Ingest job scheduler.
//!
//! Each submitted job runs on its own task. Data sources are processed in
//! order: the data-source pipeline runs once, then files are fanned out over
//! a bounded set of workers. Cancellation closes dispatch immediately; units
//! already started are left to finish.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::context::IngestJobContext;
use super::events::IngestEvent;
use super::job::{
    IngestJob, IngestJobOptions, IngestJobSnapshot, JobId, JobState, ModuleFailure,
    ModuleSelection,
};
use super::module::ModuleGranularity;
use super::pipeline::{IngestPipeline, IngestUnit, UnitId, UnitReport};
use super::registry::ModuleRegistry;
use crate::case::{Content, ContentProvider, DataSource};
use crate::error::{Error, Result};

/// Configuration for an [`IngestJobScheduler`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Files processed concurrently per data source.
    pub file_workers: usize,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// How often modules poll their terminator, in milliseconds.
    pub terminator_poll_ms: u64,
    /// Number of finished job snapshots kept for queries.
    pub finished_job_retention: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            file_workers: 4,
            event_capacity: 256,
            terminator_poll_ms: 100,
            finished_job_retention: 64,
        }
    }
}

/// Owns active ingest jobs and drives them to completion.
pub struct IngestJobScheduler {
    config: SchedulerConfig,
    registry: Arc<ModuleRegistry>,
    provider: Arc<dyn ContentProvider>,
    jobs: DashMap<JobId, Arc<IngestJob>>,
    finished: Mutex<VecDeque<IngestJobSnapshot>>,
    event_tx: broadcast::Sender<IngestEvent>,
    cancellation_token: CancellationToken,
}

impl IngestJobScheduler {
    pub fn new(
        config: SchedulerConfig,
        registry: Arc<ModuleRegistry>,
        provider: Arc<dyn ContentProvider>,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        Arc::new(Self {
            config,
            registry,
            provider,
            jobs: DashMap::new(),
            finished: Mutex::new(VecDeque::new()),
            event_tx,
            cancellation_token: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Subscribe to ingest events.
    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.event_tx.subscribe()
    }

    /// Submit a job and start it in the background.
    ///
    /// The selection is validated against the registry before anything is
    /// scheduled.
    pub fn submit(
        self: &Arc<Self>,
        data_sources: Vec<DataSource>,
        selection: ModuleSelection,
        options: IngestJobOptions,
    ) -> Result<JobId> {
        if self.cancellation_token.is_cancelled() {
            return Err(Error::scheduler("scheduler is shut down"));
        }
        if data_sources.is_empty() {
            return Err(Error::validation("no data sources given"));
        }
        self.registry.validate_selection(&selection)?;

        let job = Arc::new(IngestJob::new(
            data_sources,
            selection,
            options,
            self.cancellation_token.child_token(),
        ));
        let job_id = job.id().to_string();
        self.jobs.insert(job_id.clone(), Arc::clone(&job));

        info!(
            job_id = %job_id,
            data_sources = job.data_sources().len(),
            "Ingest job submitted"
        );

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(scheduler.run_job(&job)).catch_unwind().await;
            let fault = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some("scheduler task panicked".to_string()),
            };
            if let Some(fault) = fault {
                error!(job_id = %job.id(), error = %fault, "Ingest job failed");
                job.mark_finished();
                if job.transition(JobState::Failed).is_ok() {
                    scheduler.emit(IngestEvent::JobCompleted {
                        job_id: job.id().to_string(),
                        state: JobState::Failed,
                    });
                }
            }
            scheduler.retire(&job);
        });

        Ok(job_id)
    }

    /// Request cancellation of a job.
    ///
    /// Returns `Ok(false)` if the job has already finished.
    pub fn cancel(&self, job_id: &str) -> Result<bool> {
        if let Some(job) = self.jobs.get(job_id).map(|j| Arc::clone(j.value())) {
            let cancelled = job.request_cancel();
            if cancelled {
                info!(job_id, "Ingest job cancellation requested");
            }
            return Ok(cancelled);
        }
        if self.finished_snapshot(job_id).is_some() {
            return Ok(false);
        }
        Err(Error::not_found("ingest job", job_id))
    }

    /// Current state of a job.
    pub fn query_state(&self, job_id: &str) -> Result<JobState> {
        self.snapshot(job_id).map(|s| s.state)
    }

    /// Current snapshot of a job, active or recently finished.
    pub fn snapshot(&self, job_id: &str) -> Result<IngestJobSnapshot> {
        if let Some(job) = self.jobs.get(job_id) {
            return Ok(job.snapshot());
        }
        self.finished_snapshot(job_id)
            .ok_or_else(|| Error::not_found("ingest job", job_id))
    }

    /// Wait until a job reaches a terminal state and return its final snapshot.
    pub async fn wait_for(&self, job_id: &str) -> Result<IngestJobSnapshot> {
        let job = self.jobs.get(job_id).map(|j| Arc::clone(j.value()));
        let Some(job) = job else {
            return self
                .finished_snapshot(job_id)
                .ok_or_else(|| Error::not_found("ingest job", job_id));
        };

        let mut state = job.subscribe_state();
        state
            .wait_for(|s| s.is_terminal())
            .await
            .map_err(|_| Error::scheduler("job state channel closed"))?;
        Ok(job.snapshot())
    }

    /// Ids of jobs that have not finished yet.
    pub fn active_jobs(&self) -> Vec<JobId> {
        self.jobs.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Cancel every active job, refuse new submissions and wait for active
    /// jobs to finish draining.
    pub async fn shutdown(&self) {
        info!("Shutting down ingest scheduler");
        self.cancellation_token.cancel();

        let jobs: Vec<_> = self.jobs.iter().map(|e| Arc::clone(e.value())).collect();
        for job in &jobs {
            job.request_cancel();
        }
        for job in jobs {
            if let Err(e) = self.wait_for(job.id()).await {
                warn!(job_id = %job.id(), error = %e, "Failed waiting for job during shutdown");
            }
        }
        info!("Ingest scheduler shut down");
    }

    fn emit(&self, event: IngestEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    fn finished_snapshot(&self, job_id: &str) -> Option<IngestJobSnapshot> {
        self.finished
            .lock()
            .iter()
            .find(|s| s.job_id == job_id)
            .cloned()
    }

    /// Move a finished job from the active table to the retained snapshots.
    fn retire(&self, job: &Arc<IngestJob>) {
        {
            let mut finished = self.finished.lock();
            finished.push_back(job.snapshot());
            while finished.len() > self.config.finished_job_retention.max(1) {
                finished.pop_front();
            }
        }
        self.jobs.remove(job.id());
    }

    async fn run_job(&self, job: &Arc<IngestJob>) -> Result<()> {
        if job.transition(JobState::Running).is_ok() {
            job.mark_started();
            info!(job_id = %job.id(), "Ingest job started");
            self.emit(IngestEvent::JobStarted {
                job_id: job.id().to_string(),
                data_sources: job.data_sources().iter().map(|ds| ds.id).collect(),
            });

            for (index, data_source) in job.data_sources().iter().enumerate() {
                if job.is_cancelled() {
                    // Files of unstarted data sources were never enumerated.
                    if !job.selection().data_source_modules.is_empty() {
                        job.record_dropped((job.data_sources().len() - index) as u64);
                    }
                    break;
                }
                self.run_data_source(job, data_source).await?;
            }
        }

        self.finish(job);
        Ok(())
    }

    fn finish(&self, job: &Arc<IngestJob>) {
        let state = match job.finalize() {
            Ok(state) => state,
            Err(e) => {
                warn!(job_id = %job.id(), error = %e, "Could not record final job state");
                return;
            }
        };

        let snapshot = job.snapshot();
        info!(
            job_id = %job.id(),
            %state,
            dispatched = snapshot.units_dispatched,
            completed = snapshot.units_completed,
            dropped = snapshot.units_dropped,
            failures = snapshot.module_failures.len(),
            "Ingest job finished"
        );
        self.emit(IngestEvent::JobCompleted {
            job_id: job.id().to_string(),
            state,
        });
    }

    async fn run_data_source(&self, job: &Arc<IngestJob>, data_source: &DataSource) -> Result<()> {
        let ctx = Arc::new(IngestJobContext::new(
            job,
            data_source.clone(),
            Duration::from_millis(self.config.terminator_poll_ms.max(1)),
            self.event_tx.clone(),
        ));
        let selection = job.selection();

        let files = if selection.file_modules.is_empty() {
            Vec::new()
        } else {
            self.enumerate_files(job, data_source).await?
        };

        info!(
            job_id = %job.id(),
            data_source = %data_source.name,
            files = files.len(),
            "Ingesting data source"
        );
        self.emit(IngestEvent::DataSourceStarted {
            job_id: job.id().to_string(),
            data_source_id: data_source.id,
            files: files.len(),
        });

        let data_source_pipeline = self
            .build_pipeline(job, &ctx, ModuleGranularity::DataSourceLevel, &selection.data_source_modules)
            .await?;
        let mut file_pipeline = self
            .build_pipeline(job, &ctx, ModuleGranularity::FileLevel, &selection.file_modules)
            .await?;

        if !data_source_pipeline.is_empty() {
            if job.try_dispatch() {
                let report = data_source_pipeline
                    .run(&ctx, IngestUnit::DataSource(data_source))
                    .await?;
                self.record_unit(job, &report);
            } else {
                job.record_dropped(1);
            }
        }

        if !file_pipeline.is_empty() {
            file_pipeline = self.fan_out_files(job, &ctx, file_pipeline, files).await?;
        }

        data_source_pipeline.shut_down(&ctx).await;
        file_pipeline.shut_down(&ctx).await;

        self.emit(IngestEvent::DataSourceCompleted {
            job_id: job.id().to_string(),
            data_source_id: data_source.id,
        });
        Ok(())
    }

    async fn enumerate_files(
        &self,
        job: &Arc<IngestJob>,
        data_source: &DataSource,
    ) -> Result<Vec<Arc<Content>>> {
        let provider = Arc::clone(&self.provider);
        let ds = data_source.clone();
        let listed = tokio::task::spawn_blocking(move || provider.data_source_files(&ds))
            .await
            .map_err(|e| Error::scheduler(format!("file enumeration task failed: {e}")))?;

        match listed {
            Ok(files) => Ok(files),
            Err(e) => {
                warn!(
                    job_id = %job.id(),
                    data_source = %data_source.name,
                    error = %e,
                    "Failed to enumerate data source files"
                );
                job.record_failure(ModuleFailure {
                    module: "file-enumeration".to_string(),
                    unit: UnitId::DataSource(data_source.id),
                    message: e.to_string(),
                });
                Ok(Vec::new())
            }
        }
    }

    /// Build and start a pipeline; modules that cannot be built or started
    /// are recorded as failures and left out.
    async fn build_pipeline(
        &self,
        job: &Arc<IngestJob>,
        ctx: &IngestJobContext,
        granularity: ModuleGranularity,
        names: &[String],
    ) -> Result<IngestPipeline> {
        let (mut pipeline, mut failures) = self.registry.build_pipeline(granularity, names)?;
        failures.extend(pipeline.start_up(ctx).await);

        for (module, e) in failures {
            job.record_failure(ModuleFailure {
                module,
                unit: UnitId::DataSource(ctx.data_source().id),
                message: e.to_string(),
            });
        }
        Ok(pipeline)
    }

    async fn fan_out_files(
        &self,
        job: &Arc<IngestJob>,
        ctx: &Arc<IngestJobContext>,
        pipeline: IngestPipeline,
        files: Vec<Arc<Content>>,
    ) -> Result<IngestPipeline> {
        let pipeline = Arc::new(pipeline);
        let semaphore = Arc::new(Semaphore::new(self.config.file_workers.max(1)));
        let skip_unallocated = job.options().skip_unallocated_space;
        let mut workers = JoinSet::new();
        let mut files = files.into_iter();

        while let Some(file) = files.next() {
            if skip_unallocated && file.unallocated {
                job.record_skipped(1);
                continue;
            }

            let permit = tokio::select! {
                biased;
                _ = ctx.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => Some(
                    permit.map_err(|_| Error::scheduler("file worker semaphore closed"))?,
                ),
            };
            let Some(permit) = permit.filter(|_| job.try_dispatch()) else {
                self.drop_remaining(job, std::iter::once(file).chain(files.by_ref()), skip_unallocated);
                break;
            };

            let pipeline = Arc::clone(&pipeline);
            let ctx = Arc::clone(ctx);
            let worker_job = Arc::clone(job);
            let event_tx = self.event_tx.clone();
            workers.spawn(async move {
                let result = pipeline.run(&ctx, IngestUnit::File(&file)).await;
                drop(permit);
                match result {
                    Ok(report) => {
                        worker_job.record_unit(&report);
                        let _ = event_tx.send(unit_completed(worker_job.id(), &report));
                    }
                    Err(e) => error!(job_id = %worker_job.id(), file_id = file.id, error = %e, "File pipeline rejected unit"),
                }
            });

            // Reap finished workers so the set stays small.
            while let Some(joined) = workers.try_join_next() {
                if let Err(e) = joined {
                    error!(job_id = %job.id(), error = %e, "File worker failed");
                }
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(job_id = %job.id(), error = %e, "File worker failed");
            }
        }
        debug!(job_id = %job.id(), data_source = %ctx.data_source().name, "File workers drained");

        Arc::try_unwrap(pipeline)
            .map_err(|_| Error::scheduler("file pipeline still shared after drain"))
    }

    fn drop_remaining(
        &self,
        job: &IngestJob,
        files: impl Iterator<Item = Arc<Content>>,
        skip_unallocated: bool,
    ) {
        let (mut dropped, mut skipped) = (0u64, 0u64);
        for file in files {
            if skip_unallocated && file.unallocated {
                skipped += 1;
            } else {
                dropped += 1;
            }
        }
        job.record_skipped(skipped);
        job.record_dropped(dropped);
        info!(job_id = %job.id(), dropped, "Dropped queued files after cancellation");
    }

    fn record_unit(&self, job: &IngestJob, report: &UnitReport) {
        job.record_unit(report);
        self.emit(unit_completed(job.id(), report));
    }
}

fn unit_completed(job_id: &str, report: &UnitReport) -> IngestEvent {
    IngestEvent::UnitCompleted {
        job_id: job_id.to_string(),
        unit: report.unit,
        termination_code: report.termination_code,
        failed_modules: report.failed_modules(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::InMemoryCase;
    use crate::ingest::module::{DataSourceIngestModule, FileIngestModule};
    use async_trait::async_trait;
    use process_utils::{ProcessTerminator, TerminationCode};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Appends `name:unit` to a shared log.
    struct LogModule {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl FileIngestModule for LogModule {
        fn name(&self) -> &str {
            self.name
        }

        async fn process(&self, _ctx: &IngestJobContext, file: &Content) -> Result<TerminationCode> {
            self.log.lock().push(format!("{}:{}", self.name, file.id));
            Ok(TerminationCode::None)
        }
    }

    #[async_trait]
    impl DataSourceIngestModule for LogModule {
        fn name(&self) -> &str {
            self.name
        }

        async fn process(&self, _ctx: &IngestJobContext, ds: &DataSource) -> Result<TerminationCode> {
            self.log.lock().push(format!("{}:ds{}", self.name, ds.id));
            Ok(TerminationCode::None)
        }
    }

    struct FailingModule;

    #[async_trait]
    impl FileIngestModule for FailingModule {
        fn name(&self) -> &str {
            "b"
        }

        async fn process(&self, _ctx: &IngestJobContext, _file: &Content) -> Result<TerminationCode> {
            Err(Error::module("b", "unsupported format"))
        }
    }

    /// Polls a terminator until it trips or `work` elapses.
    struct PollingModule {
        work: Duration,
        timeout: Option<Duration>,
        started: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FileIngestModule for PollingModule {
        fn name(&self) -> &str {
            "poll"
        }

        async fn process(&self, ctx: &IngestJobContext, _file: &Content) -> Result<TerminationCode> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let terminator = match self.timeout {
                Some(timeout) => ctx.process_terminator_with_timeout(timeout),
                None => ctx.process_terminator(),
            };
            let deadline = tokio::time::Instant::now() + self.work;
            while tokio::time::Instant::now() < deadline {
                if terminator.should_terminate() {
                    return Ok(terminator.termination_code());
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Ok(TerminationCode::None)
        }
    }

    struct Fixture {
        case: Arc<InMemoryCase>,
        registry: Arc<ModuleRegistry>,
        log: Arc<Mutex<Vec<String>>>,
        started: Arc<AtomicUsize>,
        data_source: DataSource,
    }

    impl Fixture {
        fn new(files: i64) -> Self {
            let case = Arc::new(InMemoryCase::new());
            let data_source = DataSource::new(1, "image");
            case.add_data_source(&data_source);
            for id in 0..files {
                case.add_file(Content::new(100 + id, 1, format!("f{id}.bin")));
            }

            let registry = Arc::new(ModuleRegistry::new());
            let log = Arc::new(Mutex::new(Vec::new()));
            let started = Arc::new(AtomicUsize::new(0));
            for name in ["a", "c"] {
                let log = Arc::clone(&log);
                registry
                    .register_file_module(name, "", serde_json::json!({}), move |_| {
                        Ok(LogModule { name, log: Arc::clone(&log) })
                    })
                    .unwrap();
            }
            {
                let log = Arc::clone(&log);
                registry
                    .register_data_source_module("ds", "", serde_json::json!({}), move |_| {
                        Ok(LogModule { name: "ds", log: Arc::clone(&log) })
                    })
                    .unwrap();
            }
            registry
                .register_file_module("b", "", serde_json::json!({}), |_| Ok(FailingModule))
                .unwrap();
            for (name, work, timeout) in [
                ("slow", Duration::from_millis(300), None),
                ("timed", Duration::from_secs(5), Some(Duration::from_millis(20))),
            ] {
                let started = Arc::clone(&started);
                registry
                    .register_file_module(name, "", serde_json::json!({}), move |_| {
                        Ok(PollingModule { work, timeout, started: Arc::clone(&started) })
                    })
                    .unwrap();
            }

            Self { case, registry, log, started, data_source }
        }

        fn scheduler(&self, file_workers: usize) -> Arc<IngestJobScheduler> {
            IngestJobScheduler::new(
                SchedulerConfig {
                    file_workers,
                    terminator_poll_ms: 5,
                    ..Default::default()
                },
                Arc::clone(&self.registry),
                self.case.clone(),
            )
        }
    }

    fn files(names: &[&str]) -> ModuleSelection {
        names
            .iter()
            .fold(ModuleSelection::new(), |s, n| s.with_file_module(*n))
    }

    #[tokio::test]
    async fn test_partial_failure_completes_job() {
        let fx = Fixture::new(3);
        let scheduler = fx.scheduler(2);

        let job_id = scheduler
            .submit(vec![fx.data_source.clone()], files(&["a", "b", "c"]), IngestJobOptions::default())
            .unwrap();
        let snapshot = scheduler.wait_for(&job_id).await.unwrap();

        assert_eq!(snapshot.state, JobState::Completed);
        assert_eq!(snapshot.units_completed, 3);
        assert_eq!(snapshot.module_failures.len(), 3);
        assert!(snapshot.module_failures.iter().all(|f| f.module == "b"));

        let log = fx.log.lock();
        for id in 100..103 {
            assert!(log.contains(&format!("a:{id}")));
            assert!(log.contains(&format!("c:{id}")));
        }
    }

    #[tokio::test]
    async fn test_modules_run_in_order_per_unit() {
        let fx = Fixture::new(1);
        let scheduler = fx.scheduler(1);
        let selection = files(&["c", "a"]).with_data_source_module("ds");

        let job_id = scheduler
            .submit(vec![fx.data_source.clone()], selection, IngestJobOptions::default())
            .unwrap();
        scheduler.wait_for(&job_id).await.unwrap();

        assert_eq!(*fx.log.lock(), vec!["ds:ds1", "c:100", "a:100"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancel_drops_queued_units() {
        let fx = Fixture::new(20);
        let scheduler = fx.scheduler(2);
        let job_id = scheduler
            .submit(vec![fx.data_source.clone()], files(&["slow"]), IngestJobOptions::default())
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while fx.started.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(scheduler.cancel(&job_id).unwrap());
        let at_cancel = scheduler.snapshot(&job_id).unwrap();
        assert_eq!(at_cancel.state, JobState::Cancelling);

        let snapshot = scheduler.wait_for(&job_id).await.unwrap();
        assert_eq!(snapshot.state, JobState::Cancelled);
        assert_eq!(snapshot.units_dispatched, at_cancel.units_dispatched);
        assert_eq!(snapshot.units_completed, snapshot.units_dispatched);
        assert_eq!(snapshot.units_dropped, 20 - snapshot.units_dispatched);
        assert!(snapshot.units_cancelled >= 1);
        assert_eq!(fx.started.load(Ordering::SeqCst) as u64, snapshot.units_dispatched);
    }

    #[tokio::test]
    async fn test_timed_out_unit_marks_job() {
        let fx = Fixture::new(1);
        let scheduler = fx.scheduler(1);
        let job_id = scheduler
            .submit(vec![fx.data_source.clone()], files(&["timed", "a"]), IngestJobOptions::default())
            .unwrap();

        let snapshot = scheduler.wait_for(&job_id).await.unwrap();
        assert_eq!(snapshot.state, JobState::TimedOut);
        assert_eq!(snapshot.units_timed_out, 1);
        // The module after the timed out one never ran.
        assert!(fx.log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_module_rejected_at_submit() {
        let fx = Fixture::new(1);
        let scheduler = fx.scheduler(1);
        let err = scheduler
            .submit(vec![fx.data_source.clone()], files(&["missing"]), IngestJobOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(scheduler.active_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_skip_unallocated_space() {
        let fx = Fixture::new(2);
        let mut unallocated = Content::new(500, 1, "carved.bin");
        unallocated.unallocated = true;
        fx.case.add_file(unallocated);
        let scheduler = fx.scheduler(2);

        let job_id = scheduler
            .submit(
                vec![fx.data_source.clone()],
                files(&["a"]),
                IngestJobOptions {
                    skip_unallocated_space: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let snapshot = scheduler.wait_for(&job_id).await.unwrap();

        assert_eq!(snapshot.units_skipped, 1);
        assert_eq!(snapshot.units_completed, 2);
        assert!(!fx.log.lock().contains(&"a:500".to_string()));
    }

    #[tokio::test]
    async fn test_events_and_finished_queries() {
        let fx = Fixture::new(2);
        let scheduler = fx.scheduler(2);
        let mut events = scheduler.subscribe();

        let job_id = scheduler
            .submit(vec![fx.data_source.clone()], files(&["a"]), IngestJobOptions::default())
            .unwrap();
        scheduler.wait_for(&job_id).await.unwrap();

        let mut kinds = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(event.job_id(), job_id);
            let done = matches!(event, IngestEvent::JobCompleted { .. });
            kinds.push(event);
            if done {
                break;
            }
        }
        assert!(matches!(kinds.first(), Some(IngestEvent::JobStarted { .. })));
        let units = kinds
            .iter()
            .filter(|e| matches!(e, IngestEvent::UnitCompleted { .. }))
            .count();
        assert_eq!(units, 2);

        tokio::time::timeout(Duration::from_secs(5), async {
            while !scheduler.active_jobs().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(scheduler.query_state(&job_id).unwrap(), JobState::Completed);
        assert!(!scheduler.cancel(&job_id).unwrap());
        assert!(scheduler.query_state("nope").is_err());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_jobs_and_rejects_submissions() {
        let fx = Fixture::new(10);
        let scheduler = fx.scheduler(1);
        let job_id = scheduler
            .submit(vec![fx.data_source.clone()], files(&["slow"]), IngestJobOptions::default())
            .unwrap();

        scheduler.shutdown().await;
        assert_eq!(scheduler.query_state(&job_id).unwrap(), JobState::Cancelled);
        assert!(
            scheduler
                .submit(vec![fx.data_source.clone()], files(&["a"]), IngestJobOptions::default())
                .is_err()
        );
    }
}
