//! Termination policies for long running child processes.

use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Default maximum run time for a child process (30 minutes).
pub const DEFAULT_PROCESS_TIMEOUT: Duration = Duration::from_secs(30 * 60);

static DEFAULT_TIMEOUT_MS: AtomicU64 = AtomicU64::new(DEFAULT_PROCESS_TIMEOUT.as_millis() as u64);

/// Get the process-wide default timeout used by terminators built with
/// [`TimedProcessTerminator::with_default_timeout`].
pub fn default_timeout() -> Duration {
    Duration::from_millis(DEFAULT_TIMEOUT_MS.load(Ordering::Relaxed))
}

/// Replace the process-wide default timeout.
///
/// Kept at millisecond precision; anything below one millisecond is rounded
/// up so a non-zero budget never trips immediately. Terminators already
/// constructed keep the budget they were built with.
pub fn set_default_timeout(timeout: Duration) {
    let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    let millis = if timeout.is_zero() { 0 } else { millis.max(1) };
    DEFAULT_TIMEOUT_MS.store(millis, Ordering::Relaxed);
}

/// Why a bounded operation stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum TerminationCode {
    /// The operation ran to completion.
    #[default]
    None,
    /// The owning job was cancelled.
    Cancellation,
    /// The operation exceeded its maximum run time.
    Timeout,
}

impl TerminationCode {
    /// Whether this code records an early stop.
    pub fn is_terminated(self) -> bool {
        !matches!(self, TerminationCode::None)
    }
}

impl fmt::Display for TerminationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationCode::None => write!(f, "none"),
            TerminationCode::Cancellation => write!(f, "cancellation"),
            TerminationCode::Timeout => write!(f, "timeout"),
        }
    }
}

/// Write-once cell holding the first [`TerminationCode`] signalled.
#[derive(Debug, Default)]
pub struct TerminationLatch {
    code: OnceLock<TerminationCode>,
}

impl TerminationLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch `code` unless a code is already latched.
    ///
    /// Returns the code in effect after the call, which is the first one ever
    /// tripped.
    pub fn trip(&self, code: TerminationCode) -> TerminationCode {
        debug_assert!(code.is_terminated(), "cannot latch TerminationCode::None");
        *self.code.get_or_init(|| code)
    }

    pub fn is_tripped(&self) -> bool {
        self.code.get().is_some()
    }

    /// The latched code, or [`TerminationCode::None`] if nothing tripped yet.
    pub fn get(&self) -> TerminationCode {
        self.code.get().copied().unwrap_or_default()
    }
}

/// Decides whether an external or long running operation must be aborted.
///
/// `should_terminate` is polled repeatedly from inside the operation, so it
/// must be cheap. Once it returns `true` it keeps returning `true`.
pub trait ProcessTerminator: Send + Sync {
    fn should_terminate(&self) -> bool;

    /// Reason for the first positive answer of `should_terminate`.
    fn termination_code(&self) -> TerminationCode {
        TerminationCode::None
    }
}

/// A terminator with no conditions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverTerminate;

impl ProcessTerminator for NeverTerminate {
    fn should_terminate(&self) -> bool {
        false
    }
}

/// Terminates once a wall-clock budget measured from construction is exceeded.
#[derive(Debug)]
pub struct TimedProcessTerminator {
    started: Instant,
    max_run_time: Duration,
    latch: TerminationLatch,
}

impl TimedProcessTerminator {
    pub fn new(max_run_time: Duration) -> Self {
        Self {
            started: Instant::now(),
            max_run_time,
            latch: TerminationLatch::new(),
        }
    }

    /// Build a terminator using the process-wide [`default_timeout`].
    pub fn with_default_timeout() -> Self {
        Self::new(default_timeout())
    }

    pub fn max_run_time(&self) -> Duration {
        self.max_run_time
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Check the budget without consulting the latch.
    pub fn is_expired(&self) -> bool {
        self.started.elapsed() > self.max_run_time
    }
}

impl ProcessTerminator for TimedProcessTerminator {
    fn should_terminate(&self) -> bool {
        if self.latch.is_tripped() {
            return true;
        }
        if self.is_expired() {
            self.latch.trip(TerminationCode::Timeout);
            return true;
        }
        false
    }

    fn termination_code(&self) -> TerminationCode {
        self.latch.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latch_keeps_first_code() {
        let latch = TerminationLatch::new();
        assert_eq!(latch.get(), TerminationCode::None);
        assert!(!latch.is_tripped());

        assert_eq!(latch.trip(TerminationCode::Cancellation), TerminationCode::Cancellation);
        assert_eq!(latch.trip(TerminationCode::Timeout), TerminationCode::Cancellation);
        assert_eq!(latch.get(), TerminationCode::Cancellation);
    }

    #[test]
    fn test_timed_terminator_trips_after_budget() {
        let terminator = TimedProcessTerminator::new(Duration::from_millis(20));
        assert!(!terminator.should_terminate());
        assert_eq!(terminator.termination_code(), TerminationCode::None);

        std::thread::sleep(Duration::from_millis(40));
        assert!(terminator.should_terminate());
        assert_eq!(terminator.termination_code(), TerminationCode::Timeout);
        assert!(terminator.should_terminate());
    }

    #[test]
    fn test_never_terminate() {
        let terminator = NeverTerminate;
        assert!(!terminator.should_terminate());
        assert_eq!(terminator.termination_code(), TerminationCode::None);
    }

    // Serializes tests that touch the process-wide default.
    static DEFAULT_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn test_default_timeout_is_used() {
        let _guard = DEFAULT_LOCK.lock().unwrap();
        let before = default_timeout();
        let terminator = TimedProcessTerminator::with_default_timeout();
        assert_eq!(terminator.max_run_time(), before);
    }

    #[test]
    fn test_default_timeout_keeps_sub_second_budget() {
        let _guard = DEFAULT_LOCK.lock().unwrap();
        let before = default_timeout();

        set_default_timeout(Duration::from_millis(500));
        assert_eq!(default_timeout(), Duration::from_millis(500));
        let terminator = TimedProcessTerminator::with_default_timeout();
        assert!(!terminator.should_terminate());

        set_default_timeout(Duration::from_micros(10));
        assert_eq!(default_timeout(), Duration::from_millis(1));

        set_default_timeout(before);
        assert_eq!(default_timeout(), before);
    }

    #[test]
    fn test_termination_code_display() {
        assert_eq!(TerminationCode::None.to_string(), "none");
        assert_eq!(TerminationCode::Cancellation.to_string(), "cancellation");
        assert_eq!(TerminationCode::Timeout.to_string(), "timeout");
        assert!(!TerminationCode::None.is_terminated());
        assert!(TerminationCode::Timeout.is_terminated());
    }
}
