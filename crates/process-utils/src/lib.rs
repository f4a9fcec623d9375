//! Process helpers shared across the workspace.
//!
//! - Command builders that suppress console windows on Windows.
//! - [`ProcessTerminator`] policies deciding when a long running child
//!   process must be stopped, and the [`TerminationCode`] they latch.
//! - [`execute`], which runs a child process while polling a terminator.

#[cfg(feature = "tokio")]
use std::ffi::OsStr;

#[cfg(feature = "tokio")]
mod exec;
mod terminator;

#[cfg(feature = "tokio")]
pub use exec::{DEFAULT_POLL_INTERVAL, ExecError, ExecOutcome, execute};
pub use terminator::{
    DEFAULT_PROCESS_TIMEOUT, NeverTerminate, ProcessTerminator, TerminationCode,
    TerminationLatch, TimedProcessTerminator, default_timeout, set_default_timeout,
};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
///
/// The returned command is killed when its `Child` handle is dropped, so a
/// terminated helper never outlives the module that spawned it.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd.kill_on_drop(true);
    cmd
}

/// Build a platform shell invocation for a command line.
#[cfg(feature = "tokio")]
pub fn shell_command(command_line: &str) -> tokio::process::Command {
    #[cfg(windows)]
    {
        let mut cmd = tokio_command("cmd");
        cmd.args(["/C", command_line]);
        cmd
    }

    #[cfg(not(windows))]
    {
        let mut cmd = tokio_command("sh");
        cmd.args(["-c", command_line]);
        cmd
    }
}
