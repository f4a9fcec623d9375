//! Run a child process under the control of a [`ProcessTerminator`].

use std::process::ExitStatus;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::process::Command;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::terminator::{ProcessTerminator, TerminationCode};

/// How often [`execute`] polls its terminator by default.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Failed to spawn process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Failed to wait for process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Failed to kill process: {0}")]
    Kill(#[source] std::io::Error),
}

/// Result of a polled process execution.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    /// Exit status, if the process was started and reaped.
    pub status: Option<ExitStatus>,
    /// Why the process was stopped early, or `None` if it exited on its own.
    pub termination_code: TerminationCode,
    /// Wall-clock time spent in `execute`.
    pub duration: Duration,
}

impl ExecOutcome {
    /// Whether the process exited on its own with a zero status.
    pub fn success(&self) -> bool {
        !self.termination_code.is_terminated() && self.status.is_some_and(|s| s.success())
    }
}

/// Spawn `command` and wait for it, polling `terminator` every `poll_interval`.
///
/// The terminator is checked once before spawning; a terminator that has
/// already tripped means the process is never started. When it trips while
/// the process runs, the child is killed and reaped.
pub async fn execute(
    command: &mut Command,
    terminator: &dyn ProcessTerminator,
    poll_interval: Duration,
) -> Result<ExecOutcome, ExecError> {
    let start = Instant::now();

    if terminator.should_terminate() {
        return Ok(ExecOutcome {
            status: None,
            termination_code: terminator.termination_code(),
            duration: start.elapsed(),
        });
    }

    command.kill_on_drop(true);
    let mut child = command.spawn().map_err(ExecError::Spawn)?;
    let pid = child.id();
    debug!(?pid, "Spawned child process");

    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let tripped = tokio::select! {
            status = child.wait() => {
                let status = status.map_err(ExecError::Wait)?;
                debug!(?pid, %status, "Child process exited");
                return Ok(ExecOutcome {
                    status: Some(status),
                    termination_code: TerminationCode::None,
                    duration: start.elapsed(),
                });
            }
            _ = ticker.tick() => terminator.should_terminate(),
        };

        if tripped {
            let code = terminator.termination_code();
            warn!(?pid, %code, "Terminating child process");
            match child.kill().await {
                Ok(()) => {}
                // Raced with a natural exit.
                Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {}
                Err(e) => return Err(ExecError::Kill(e)),
            }
            let status = child.try_wait().map_err(ExecError::Wait)?;
            return Ok(ExecOutcome {
                status,
                termination_code: code,
                duration: start.elapsed(),
            });
        }
    }
}
