//! Terminator tied to an ingest job's cancellation.

use std::time::Duration;

use process_utils::{ProcessTerminator, TerminationCode, TerminationLatch, TimedProcessTerminator};
use tokio_util::sync::CancellationToken;

/// Terminates when the owning job is cancelled or, if configured, when a
/// wall-clock budget is exceeded.
///
/// Cancellation is checked first, so a job cancelled before its budget runs
/// out always latches [`TerminationCode::Cancellation`]. The first code
/// latched never changes.
#[derive(Debug)]
pub struct IngestJobTerminator {
    cancellation_token: CancellationToken,
    timer: Option<TimedProcessTerminator>,
    latch: TerminationLatch,
}

impl IngestJobTerminator {
    /// A terminator that only observes job cancellation.
    pub fn cancellation_only(cancellation_token: CancellationToken) -> Self {
        Self::new(cancellation_token, None)
    }

    /// A terminator observing cancellation and, when `max_run_time` is set,
    /// a timeout measured from now.
    pub fn new(cancellation_token: CancellationToken, max_run_time: Option<Duration>) -> Self {
        Self {
            cancellation_token,
            timer: max_run_time.map(TimedProcessTerminator::new),
            latch: TerminationLatch::new(),
        }
    }

    pub fn max_run_time(&self) -> Option<Duration> {
        self.timer.as_ref().map(TimedProcessTerminator::max_run_time)
    }
}

impl ProcessTerminator for IngestJobTerminator {
    fn should_terminate(&self) -> bool {
        if self.latch.is_tripped() {
            return true;
        }
        if self.cancellation_token.is_cancelled() {
            self.latch.trip(TerminationCode::Cancellation);
            return true;
        }
        if self.timer.as_ref().is_some_and(TimedProcessTerminator::is_expired) {
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
    fn test_cancellation_only_follows_flag() {
        let token = CancellationToken::new();
        let terminator = IngestJobTerminator::cancellation_only(token.clone());

        for _ in 0..3 {
            assert!(!terminator.should_terminate());
            assert_eq!(terminator.termination_code(), TerminationCode::None);
        }

        token.cancel();
        assert!(terminator.should_terminate());
        assert_eq!(terminator.termination_code(), TerminationCode::Cancellation);
        assert_eq!(terminator.max_run_time(), None);
    }

    #[test]
    fn test_cancellation_takes_precedence_over_timeout() {
        let token = CancellationToken::new();
        let terminator = IngestJobTerminator::new(token.clone(), Some(Duration::from_millis(30)));

        token.cancel();
        std::thread::sleep(Duration::from_millis(50));

        assert!(terminator.should_terminate());
        assert_eq!(terminator.termination_code(), TerminationCode::Cancellation);
    }

    #[test]
    fn test_cancellation_wins_when_both_tripped_before_first_poll() {
        let token = CancellationToken::new();
        let terminator = IngestJobTerminator::new(token.clone(), Some(Duration::ZERO));
        std::thread::sleep(Duration::from_millis(5));
        token.cancel();

        assert!(terminator.should_terminate());
        assert_eq!(terminator.termination_code(), TerminationCode::Cancellation);
    }

    #[test]
    fn test_timeout_latches_and_stays() {
        let token = CancellationToken::new();
        let terminator = IngestJobTerminator::new(token.clone(), Some(Duration::from_millis(10)));
        assert!(!terminator.should_terminate());

        std::thread::sleep(Duration::from_millis(30));
        assert!(terminator.should_terminate());
        assert_eq!(terminator.termination_code(), TerminationCode::Timeout);

        // A later cancellation does not change the latched code.
        token.cancel();
        for _ in 0..3 {
            assert!(terminator.should_terminate());
            assert_eq!(terminator.termination_code(), TerminationCode::Timeout);
        }
    }

    #[test]
    fn test_latched_code_survives_after_trip() {
        let token = CancellationToken::new();
        let terminator = IngestJobTerminator::new(token.clone(), Some(Duration::from_secs(60)));
        token.cancel();

        assert!(terminator.should_terminate());
        for _ in 0..5 {
            assert!(terminator.should_terminate());
            assert_eq!(terminator.termination_code(), TerminationCode::Cancellation);
        }
    }
}
