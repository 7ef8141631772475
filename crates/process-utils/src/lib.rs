//! Small process-related helpers for long-running child processes.
//!
//! The streamer keeps one encoder child per live channel. These helpers
//! build commands that never inherit the server's stdin, never outlive a
//! dropped handle, and can be polled without blocking.

use std::ffi::OsStr;
use std::io;
use std::process::Stdio;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` suitable for a supervised worker.
///
/// The command has stdin and stdout detached, stderr piped (so callers can
/// forward diagnostics into their logs) and `kill_on_drop` enabled.
pub fn supervised_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Observed state of a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    /// The process has not exited yet.
    Running,
    /// The process exited with the given code (`None` when killed by a signal).
    Exited(Option<i32>),
    /// The state could not be queried.
    Unknown,
}

impl ExitState {
    /// Whether the process is still considered alive.
    pub fn is_running(&self) -> bool {
        matches!(self, ExitState::Running)
    }
}

/// Poll a child without blocking.
pub fn poll_exit(child: &mut tokio::process::Child) -> ExitState {
    match child.try_wait() {
        Ok(None) => ExitState::Running,
        Ok(Some(status)) => ExitState::Exited(status.code()),
        Err(_) => ExitState::Unknown,
    }
}

/// Send a kill signal without waiting for the process to exit.
///
/// Killing a process that has already exited is not an error.
pub fn kill_nowait(child: &mut tokio::process::Child) -> io::Result<()> {
    match child.start_kill() {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
        Err(e) => Err(e),
    }
}
