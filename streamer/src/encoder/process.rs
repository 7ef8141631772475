//! Owned encoder processes.

use std::fmt;
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use process_utils::{ExitState, kill_nowait, poll_exit};
use serde::Serialize;
use tokio::process::Child;
use tokio::time::Instant;

use super::profile::OutputFormat;
use crate::Result;

/// What the supervisor asks a launcher to start.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub channel: String,
    /// Directory the encoder writes into; already created and emptied.
    pub output_dir: PathBuf,
}

/// A running encoder as seen by the supervisor.
///
/// Only liveness and termination are exposed; the process is never shared.
pub trait EncoderProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Poll without blocking.
    fn is_alive(&mut self) -> bool;

    /// Request termination without waiting for exit.
    fn kill(&mut self) -> io::Result<()>;
}

/// Starts encoder processes.
#[async_trait]
pub trait EncoderLauncher: Send + Sync {
    async fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn EncoderProcess>>;
}

/// [`EncoderProcess`] backed by a tokio child spawned with `kill_on_drop`.
pub struct ChildProcess {
    child: Child,
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        Self { child }
    }
}

impl EncoderProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn is_alive(&mut self) -> bool {
        match poll_exit(&mut self.child) {
            ExitState::Running => true,
            ExitState::Exited(code) => {
                tracing::debug!(code = ?code, "Encoder process exited");
                false
            }
            ExitState::Unknown => false,
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        kill_nowait(&mut self.child)
    }
}

/// Snapshot of an encoder handed out to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncoderInfo {
    /// Process-wide launch counter; a relaunch always gets a new value.
    pub generation: u64,
    pub pid: Option<u32>,
    pub format: OutputFormat,
    pub started_at: DateTime<Utc>,
    #[serde(skip)]
    pub started: Instant,
}

/// Owned handle of one channel's encoder.
pub struct EncoderHandle {
    generation: u64,
    format: OutputFormat,
    started: Instant,
    started_at: DateTime<Utc>,
    process: Box<dyn EncoderProcess>,
}

impl EncoderHandle {
    pub fn new(generation: u64, format: OutputFormat, process: Box<dyn EncoderProcess>) -> Self {
        Self {
            generation,
            format,
            started: Instant::now(),
            started_at: Utc::now(),
            process,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_alive(&mut self) -> bool {
        self.process.is_alive()
    }

    pub fn kill(&mut self) -> io::Result<()> {
        self.process.kill()
    }

    pub fn info(&self) -> EncoderInfo {
        EncoderInfo {
            generation: self.generation,
            pid: self.process.pid(),
            format: self.format,
            started_at: self.started_at,
            started: self.started,
        }
    }
}

impl fmt::Debug for EncoderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncoderHandle")
            .field("generation", &self.generation)
            .field("pid", &self.process.pid())
            .field("format", &self.format)
            .finish()
    }
}
