//! Logging setup.
//!
//! Console output always; a daily-rotated file under the configured log
//! directory when one is set. Timestamps use the local timezone.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, NaiveDate, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::LoggingConfig;
use crate::utils::fs::io_error;
use crate::{Error, Result};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "streamer=info,tower_http=info";

/// File name prefix of rotated log files.
const LOG_FILE_PREFIX: &str = "streamer.log";

/// Log retention period in days.
const LOG_RETENTION_DAYS: i64 = 7;

/// Timer that formats timestamps in the server's local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Install the global subscriber.
///
/// Returns the file writer's guard when file logging is enabled; keep it
/// alive for the lifetime of the process so buffered lines are flushed.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console = fmt::layer().with_ansi(true).with_timer(LocalTimer);

    match &config.log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir)
                .map_err(|e| io_error("creating log directory", log_dir, e))?;

            let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(
                    fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_timer(LocalTimer),
                )
                .try_init()
                .map_err(|e| Error::Other(format!("Failed to set global default subscriber: {e}")))?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .try_init()
                .map_err(|e| Error::Other(format!("Failed to set global default subscriber: {e}")))?;
            Ok(None)
        }
    }
}

/// Periodically delete rotated log files older than the retention period.
pub fn start_retention_cleanup(log_dir: PathBuf, cancel_token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let cleanup_interval = Duration::from_secs(24 * 60 * 60);

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!("Log retention cleanup task shutting down");
                    break;
                }
                _ = tokio::time::sleep(cleanup_interval) => {
                    if let Err(e) = cleanup_old_logs(&log_dir, LOG_RETENTION_DAYS).await {
                        warn!(error = %e, "Failed to cleanup old logs");
                    }
                }
            }
        }
    })
}

/// Delete `streamer.log.YYYY-MM-DD` files older than `retention_days`.
async fn cleanup_old_logs(log_dir: &Path, retention_days: i64) -> std::io::Result<usize> {
    let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).date_naive();

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(date) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(LOG_FILE_PREFIX))
            .and_then(|n| n.strip_prefix('.'))
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        else {
            continue;
        };

        if date < cutoff {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => deleted += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete old log file"),
            }
        }
    }

    if deleted > 0 {
        info!(count = deleted, "Cleaned up old log files");
    }
    Ok(deleted)
}
