//! Readiness barrier: wait until the encoder has written a usable manifest.
//!
//! A freshly launched encoder writes a stub manifest before the first
//! segment exists. A manifest counts as ready once it is strictly larger
//! than `min_bytes`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ReadinessConfig;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct ReadinessBarrier {
    min_bytes: u64,
    max_wait: Duration,
    poll_interval: Duration,
}

impl ReadinessBarrier {
    pub fn new(config: &ReadinessConfig) -> Self {
        Self {
            min_bytes: config.min_bytes,
            max_wait: config.max_wait(),
            poll_interval: config.poll_interval(),
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_min_bytes(mut self, min_bytes: u64) -> Self {
        self.min_bytes = min_bytes;
        self
    }

    async fn is_ready(&self, path: &Path) -> bool {
        match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata.is_file() && metadata.len() > self.min_bytes,
            Err(_) => false,
        }
    }

    /// Wait for a single manifest.
    pub async fn await_manifest(
        &self,
        channel: &str,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        self.await_all(channel, &[path.to_path_buf()], cancel)
            .await?;
        Ok(path.to_path_buf())
    }

    /// Wait until every path is ready, sharing one deadline.
    pub async fn await_all(
        &self,
        channel: &str,
        paths: &[PathBuf],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let started = Instant::now();

        let poll = async {
            let mut pending: Vec<&PathBuf> = paths.iter().collect();
            loop {
                let mut still_pending = Vec::with_capacity(pending.len());
                for path in pending {
                    if !self.is_ready(path).await {
                        still_pending.push(path);
                    }
                }
                if still_pending.is_empty() {
                    return;
                }
                pending = still_pending;
                sleep(self.poll_interval).await;
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = timeout(self.max_wait, poll) => match result {
                Ok(()) => {
                    debug!(
                        channel = %channel,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "Manifest ready"
                    );
                    Ok(())
                }
                Err(_) => Err(Error::NotReady {
                    channel: channel.to_string(),
                    waited: started.elapsed(),
                }),
            },
        }
    }
}

impl Default for ReadinessBarrier {
    fn default() -> Self {
        Self::new(&ReadinessConfig::default())
    }
}
