//! Ingest job state and accounting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use process_utils::TerminationCode;
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::pipeline::{UnitId, UnitReport};
use crate::case::{DataSource, ObjectId};
use crate::error::{Error, Result};

/// Identifier of an ingest job.
pub type JobId = String;

/// Aggregate state of an ingest job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    /// Cancellation requested; started units are draining.
    Cancelling,
    Cancelled,
    Completed,
    /// Completed, but at least one unit stopped on a timeout.
    TimedOut,
    /// Stopped by a scheduler-level fault.
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Cancelled | JobState::Completed | JobState::TimedOut | JobState::Failed
        )
    }

    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Queued, Running | Cancelling | Failed)
                | (Running, Cancelling | Completed | TimedOut | Failed)
                | (Cancelling, Cancelled | Failed)
        )
    }
}

/// Options supplied with a job submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestJobOptions {
    /// Do not dispatch files that live in unallocated space.
    pub skip_unallocated_space: bool,
    /// Keep the search index after the job; read by indexing modules.
    pub keep_search_index: bool,
    /// Overrides the global default process timeout for this job.
    pub max_process_run_time_secs: Option<u64>,
}

impl IngestJobOptions {
    pub fn max_process_run_time(&self) -> Option<Duration> {
        self.max_process_run_time_secs.map(Duration::from_secs)
    }
}

/// Names of the modules to run, per granularity, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleSelection {
    pub data_source_modules: Vec<String>,
    pub file_modules: Vec<String>,
}

impl ModuleSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data_source_module(mut self, name: impl Into<String>) -> Self {
        self.data_source_modules.push(name.into());
        self
    }

    pub fn with_file_module(mut self, name: impl Into<String>) -> Self {
        self.file_modules.push(name.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.data_source_modules.is_empty() && self.file_modules.is_empty()
    }
}

/// A module failure attributed to one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleFailure {
    pub module: String,
    pub unit: UnitId,
    pub message: String,
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, Serialize)]
pub struct IngestJobSnapshot {
    pub job_id: JobId,
    pub state: JobState,
    pub data_sources: Vec<ObjectId>,
    /// Units handed to a pipeline.
    pub units_dispatched: u64,
    /// Dispatched units that finished, whatever their termination code.
    pub units_completed: u64,
    /// Units dropped without execution because of cancellation.
    pub units_dropped: u64,
    /// Units excluded by job options.
    pub units_skipped: u64,
    pub units_cancelled: u64,
    pub units_timed_out: u64,
    pub module_failures: Vec<ModuleFailure>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct UnitCounters {
    dispatched: AtomicU64,
    completed: AtomicU64,
    dropped: AtomicU64,
    skipped: AtomicU64,
    cancelled: AtomicU64,
    timed_out: AtomicU64,
}

#[derive(Debug, Default)]
struct Timestamps {
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

/// One submitted ingest job. Owned by the scheduler.
#[derive(Debug)]
pub struct IngestJob {
    id: JobId,
    data_sources: Vec<DataSource>,
    selection: ModuleSelection,
    options: IngestJobOptions,
    state: watch::Sender<JobState>,
    cancellation_token: CancellationToken,
    /// Set once cancellation is requested; guards dispatch accounting.
    dispatch_closed: Mutex<bool>,
    counters: UnitCounters,
    module_failures: Mutex<Vec<ModuleFailure>>,
    created_at: DateTime<Utc>,
    timestamps: Mutex<Timestamps>,
}

impl IngestJob {
    pub(crate) fn new(
        data_sources: Vec<DataSource>,
        selection: ModuleSelection,
        options: IngestJobOptions,
        cancellation_token: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(JobState::Queued);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            data_sources,
            selection,
            options,
            state,
            cancellation_token,
            dispatch_closed: Mutex::new(false),
            counters: UnitCounters::default(),
            module_failures: Mutex::new(Vec::new()),
            created_at: Utc::now(),
            timestamps: Mutex::new(Timestamps::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data_sources(&self) -> &[DataSource] {
        &self.data_sources
    }

    pub fn selection(&self) -> &ModuleSelection {
        &self.selection
    }

    pub fn options(&self) -> &IngestJobOptions {
        &self.options
    }

    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    /// Watch state changes of this job.
    pub fn subscribe_state(&self) -> watch::Receiver<JobState> {
        self.state.subscribe()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Move to `next` if the state machine allows it.
    pub(crate) fn transition(&self, next: JobState) -> Result<()> {
        let mut from = next;
        let changed = self.state.send_if_modified(|state| {
            from = *state;
            if state.can_transition_to(next) {
                *state = next;
                true
            } else {
                false
            }
        });

        if changed {
            debug!(job_id = %self.id, %from, to = %next, "Job state changed");
            Ok(())
        } else {
            Err(Error::InvalidStateTransition {
                from: from.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// Request cancellation. Returns `false` if the job already finished.
    ///
    /// No unit is dispatched once this returns.
    pub fn request_cancel(&self) -> bool {
        let mut closed = self.dispatch_closed.lock();
        if self.state().is_terminal() {
            return false;
        }
        *closed = true;
        self.cancellation_token.cancel();
        let _ = self.transition(JobState::Cancelling);
        true
    }

    /// Decide and record the terminal state once all units have drained.
    ///
    /// Runs under the same lock as [`request_cancel`](Self::request_cancel),
    /// so a cancellation lands either fully before or fully after it.
    pub(crate) fn finalize(&self) -> Result<JobState> {
        let mut closed = self.dispatch_closed.lock();
        *closed = true;

        let state = if self.cancellation_token.is_cancelled() {
            // Cancelled through the scheduler token without a request.
            let _ = self.transition(JobState::Cancelling);
            JobState::Cancelled
        } else if self.timed_out_units() > 0 {
            JobState::TimedOut
        } else {
            JobState::Completed
        };

        self.mark_finished();
        self.transition(state)?;
        Ok(state)
    }

    /// Account for a unit about to be handed to a pipeline.
    ///
    /// Returns `false` once cancellation has been requested; the caller must
    /// then drop the unit.
    pub(crate) fn try_dispatch(&self) -> bool {
        let closed = self.dispatch_closed.lock();
        if *closed || self.cancellation_token.is_cancelled() {
            return false;
        }
        self.counters.dispatched.fetch_add(1, Ordering::SeqCst);
        true
    }

    pub(crate) fn record_unit(&self, report: &UnitReport) {
        self.counters.completed.fetch_add(1, Ordering::SeqCst);
        match report.termination_code {
            TerminationCode::None => {}
            TerminationCode::Cancellation => {
                self.counters.cancelled.fetch_add(1, Ordering::SeqCst);
            }
            TerminationCode::Timeout => {
                self.counters.timed_out.fetch_add(1, Ordering::SeqCst);
            }
        }

        let failures: Vec<_> = report.failures().collect();
        if !failures.is_empty() {
            self.module_failures.lock().extend(failures);
        }
    }

    pub(crate) fn record_failure(&self, failure: ModuleFailure) {
        self.module_failures.lock().push(failure);
    }

    pub(crate) fn record_dropped(&self, units: u64) {
        self.counters.dropped.fetch_add(units, Ordering::SeqCst);
    }

    pub(crate) fn record_skipped(&self, units: u64) {
        self.counters.skipped.fetch_add(units, Ordering::SeqCst);
    }

    pub(crate) fn timed_out_units(&self) -> u64 {
        self.counters.timed_out.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_started(&self) {
        self.timestamps.lock().started_at = Some(Utc::now());
    }

    pub(crate) fn mark_finished(&self) {
        self.timestamps.lock().finished_at = Some(Utc::now());
    }

    pub fn snapshot(&self) -> IngestJobSnapshot {
        let timestamps = self.timestamps.lock();
        IngestJobSnapshot {
            job_id: self.id.clone(),
            state: self.state(),
            data_sources: self.data_sources.iter().map(|ds| ds.id).collect(),
            units_dispatched: self.counters.dispatched.load(Ordering::SeqCst),
            units_completed: self.counters.completed.load(Ordering::SeqCst),
            units_dropped: self.counters.dropped.load(Ordering::SeqCst),
            units_skipped: self.counters.skipped.load(Ordering::SeqCst),
            units_cancelled: self.counters.cancelled.load(Ordering::SeqCst),
            units_timed_out: self.counters.timed_out.load(Ordering::SeqCst),
            module_failures: self.module_failures.lock().clone(),
            created_at: self.created_at,
            started_at: timestamps.started_at,
            finished_at: timestamps.finished_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn job() -> IngestJob {
        IngestJob::new(
            vec![DataSource::new(1, "image")],
            ModuleSelection::new().with_file_module("hash"),
            IngestJobOptions::default(),
            CancellationToken::new(),
        )
    }

    #[rstest]
    #[case(JobState::Queued, JobState::Running, true)]
    #[case(JobState::Running, JobState::Completed, true)]
    #[case(JobState::Running, JobState::TimedOut, true)]
    #[case(JobState::Running, JobState::Cancelling, true)]
    #[case(JobState::Cancelling, JobState::Cancelled, true)]
    #[case(JobState::Running, JobState::Cancelled, false)]
    #[case(JobState::Cancelling, JobState::Completed, false)]
    #[case(JobState::Completed, JobState::Running, false)]
    #[case(JobState::Queued, JobState::Completed, false)]
    fn test_transitions(#[case] from: JobState, #[case] to: JobState, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let job = job();
        let err = job.transition(JobState::Completed).unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
        assert_eq!(job.state(), JobState::Queued);
    }

    #[test]
    fn test_cancel_closes_dispatch() {
        let job = job();
        job.transition(JobState::Running).unwrap();
        assert!(job.try_dispatch());

        assert!(job.request_cancel());
        assert_eq!(job.state(), JobState::Cancelling);
        assert!(job.is_cancelled());
        assert!(!job.try_dispatch());
        assert_eq!(job.snapshot().units_dispatched, 1);
    }

    #[test]
    fn test_cancel_after_completion_is_noop() {
        let job = job();
        job.transition(JobState::Running).unwrap();
        job.transition(JobState::Completed).unwrap();

        assert!(!job.request_cancel());
        assert!(!job.is_cancelled());
        assert_eq!(job.state(), JobState::Completed);
    }

    #[test]
    fn test_finalize_then_cancel_keeps_completed() {
        let job = job();
        job.transition(JobState::Running).unwrap();

        assert_eq!(job.finalize().unwrap(), JobState::Completed);
        assert!(!job.request_cancel());
        assert!(!job.is_cancelled());
        assert_eq!(job.state(), JobState::Completed);
        assert!(job.snapshot().finished_at.is_some());
    }

    #[test]
    fn test_finalize_after_cancel_reaches_cancelled() {
        let job = job();
        job.transition(JobState::Running).unwrap();
        job.record_unit(&UnitReport::for_test(UnitId::File(1), TerminationCode::Timeout, vec![]));

        assert!(job.request_cancel());
        assert_eq!(job.finalize().unwrap(), JobState::Cancelled);
        assert_eq!(job.state(), JobState::Cancelled);
        assert!(!job.try_dispatch());
    }

    #[test]
    fn test_finalize_on_token_cancel_without_request() {
        let token = CancellationToken::new();
        let job = IngestJob::new(
            vec![DataSource::new(1, "image")],
            ModuleSelection::new().with_file_module("hash"),
            IngestJobOptions::default(),
            token.child_token(),
        );
        job.transition(JobState::Running).unwrap();
        token.cancel();

        assert_eq!(job.finalize().unwrap(), JobState::Cancelled);
    }

    #[test]
    fn test_record_unit_counts_codes_and_failures() {
        let job = job();
        let report = UnitReport::for_test(
            UnitId::File(3),
            TerminationCode::Timeout,
            vec![("b".to_string(), "boom".to_string())],
        );
        job.record_unit(&report);

        let snapshot = job.snapshot();
        assert_eq!(snapshot.units_completed, 1);
        assert_eq!(snapshot.units_timed_out, 1);
        assert_eq!(snapshot.module_failures.len(), 1);
        assert_eq!(snapshot.module_failures[0].module, "b");
        assert_eq!(snapshot.module_failures[0].unit, UnitId::File(3));
    }

    #[test]
    fn test_options_max_run_time() {
        let options = IngestJobOptions {
            max_process_run_time_secs: Some(90),
            ..Default::default()
        };
        assert_eq!(options.max_process_run_time(), Some(Duration::from_secs(90)));
        assert_eq!(IngestJobOptions::default().max_process_run_time(), None);
    }
}
