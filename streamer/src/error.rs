//! Application-wide error types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// The encoder process could not be started.
    #[error("Failed to launch encoder for channel {channel}: {reason}")]
    EncoderLaunch { channel: String, reason: String },

    /// The encoder did not produce a usable manifest in time.
    #[error("Manifest for channel {channel} not ready after {waited:?}")]
    NotReady { channel: String, waited: Duration },

    /// The requested file does not exist in the channel directory.
    #[error("Segment {file} not found for channel {channel}")]
    SegmentNotFound { channel: String, file: String },

    /// The requesting key is under circuit-breaker cooldown.
    #[error("Channel {channel} is flagged for this client")]
    Flagged { channel: String },

    /// The wait was aborted because the service is shutting down.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error while {op} {path}: {source}")]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn encoder_launch(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EncoderLaunch {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    /// Attach an operation label and a path to an IO error.
    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether a client may simply retry the same request shortly.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::NotReady { .. } | Error::EncoderLaunch { .. } | Error::Cancelled
        )
    }
}
