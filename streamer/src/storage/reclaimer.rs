//! Storage Reclaimer for the bounded scratch volume.
//!
//! Two eviction policies, selected by configuration:
//! - **Global**: delete the oldest segment files across all channels while
//!   free space is below a floor.
//! - **Per-channel**: delete transport-stream segments older than a fixed
//!   lifetime, leaving encoder-rotated fragments alone.
//!
//! Per-file failures are logged and skipped; a pass never aborts because one
//! file vanished or could not be removed.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::layout::{FileKind, StorageLayout};
use super::space::{SpaceProbe, format_bytes};
use crate::config::{ReclaimConfig, ReclaimMode};
use crate::utils::fs::remove_file_if_exists;

/// Outcome of a single reclaim pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    /// Files removed by this pass.
    pub files_deleted: usize,
    /// Bytes released by removed files.
    pub bytes_freed: u64,
    /// Files that could not be removed.
    pub errors: usize,
    /// The pass did not run (free space unknown).
    pub skipped: bool,
}

/// A file considered for eviction.
#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    modified: SystemTime,
    size: u64,
}

/// Background eviction of old segment files.
pub struct StorageReclaimer {
    layout: StorageLayout,
    probe: Arc<dyn SpaceProbe>,
    config: ReclaimConfig,
}

impl StorageReclaimer {
    pub fn new(layout: StorageLayout, probe: Arc<dyn SpaceProbe>, config: ReclaimConfig) -> Self {
        Self {
            layout,
            probe,
            config,
        }
    }

    pub fn config(&self) -> &ReclaimConfig {
        &self.config
    }

    /// Enumerate files matching `eligible` across all channel directories.
    async fn collect_candidates(&self, eligible: fn(FileKind) -> bool) -> Vec<Candidate> {
        let dirs = match self.layout.channel_dirs().await {
            Ok(dirs) => dirs,
            Err(e) => {
                warn!(error = %e, "Failed to list channel directories");
                return Vec::new();
            }
        };

        let mut candidates = Vec::new();
        for (channel, dir) in dirs {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(channel = %channel, error = %e, "Skipping unreadable channel directory");
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        debug!(channel = %channel, error = %e, "Directory listing interrupted");
                        break;
                    }
                };

                let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                    continue;
                };
                if !eligible(FileKind::classify(&name)) {
                    continue;
                }

                // The encoder may rotate the file away between listing and stat.
                let Ok(metadata) = entry.metadata().await else {
                    continue;
                };
                if !metadata.is_file() {
                    continue;
                }
                let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                candidates.push(Candidate {
                    path: entry.path(),
                    modified,
                    size: metadata.len(),
                });
            }
        }

        candidates
    }

    async fn delete(&self, candidate: &Candidate, report: &mut ReclaimReport) {
        match remove_file_if_exists(&candidate.path).await {
            Ok(true) => {
                report.files_deleted += 1;
                report.bytes_freed += candidate.size;
            }
            // Already gone: the encoder or a teardown got there first.
            Ok(false) => {}
            Err(e) => {
                report.errors += 1;
                warn!(error = %e, "Failed to reclaim segment file");
            }
        }
    }

    /// Delete the oldest segments across all channels until free space is at
    /// least `min_free_bytes` or nothing evictable remains.
    pub async fn run_global_pass(&self) -> ReclaimReport {
        let mut report = ReclaimReport::default();
        let root = self.layout.root();
        let floor = self.config.min_free_bytes;

        let Some(mut available) = self.probe.available_bytes(root) else {
            report.skipped = true;
            return report;
        };
        if available >= floor {
            return report;
        }

        let mut candidates = self
            .collect_candidates(|kind| kind.is_space_evictable())
            .await;
        candidates.sort_by_key(|c| c.modified);

        let mut remaining = candidates.iter();
        while available < floor {
            let Some(oldest) = remaining.next() else {
                warn!(
                    available = %format_bytes(available),
                    floor = %format_bytes(floor),
                    "Free space still below floor but no evictable segments remain"
                );
                break;
            };
            self.delete(oldest, &mut report).await;

            match self.probe.available_bytes(root) {
                Some(bytes) => available = bytes,
                None => {
                    report.skipped = true;
                    break;
                }
            }
        }

        if report.files_deleted > 0 {
            info!(
                files = report.files_deleted,
                freed = %format_bytes(report.bytes_freed),
                available = %format_bytes(available),
                "Reclaimed scratch space"
            );
        }
        report
    }

    /// Delete transport-stream segments older than the configured lifetime.
    pub async fn run_age_pass(&self) -> ReclaimReport {
        self.run_age_pass_at(SystemTime::now()).await
    }

    /// Age pass evaluated against an explicit observation time.
    pub async fn run_age_pass_at(&self, now: SystemTime) -> ReclaimReport {
        let lifetime = self.config.segment_lifetime();
        let mut report = ReclaimReport::default();

        for candidate in self.collect_candidates(|kind| kind.is_age_evictable()).await {
            let age = now
                .duration_since(candidate.modified)
                .unwrap_or(Duration::ZERO);
            if age > lifetime {
                self.delete(&candidate, &mut report).await;
            }
        }

        if report.files_deleted > 0 {
            debug!(
                files = report.files_deleted,
                freed = %format_bytes(report.bytes_freed),
                "Removed expired segments"
            );
        }
        report
    }

    /// Run one pass of the configured policy.
    pub async fn run_pass(&self) -> ReclaimReport {
        match self.config.mode {
            ReclaimMode::Global => self.run_global_pass().await,
            ReclaimMode::PerChannel => self.run_age_pass().await,
        }
    }

    /// Start the background reclaim loop for the configured mode.
    pub fn start_background_task(self: &Arc<Self>, cancellation_token: CancellationToken) -> JoinHandle<()> {
        let reclaimer = Arc::clone(self);

        tokio::spawn(async move {
            let period = reclaimer.config.pass_interval();
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                mode = ?reclaimer.config.mode,
                interval_secs = period.as_secs(),
                "Storage reclaimer started"
            );

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("Storage reclaimer shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = reclaimer.run_pass().await;
                        if report.skipped {
                            warn!("Reclaim pass skipped: free space unknown");
                        }
                    }
                }
            }
        })
    }
}
