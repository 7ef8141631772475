//! Activity monitor: expires idle viewers and tears down idle channels.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::registry::SessionRegistry;
use crate::supervisor::ProcessSupervisor;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_viewers: usize,
    pub flagged: usize,
    /// Channels torn down by this sweep, in the order they were handled.
    pub torn_down: Vec<String>,
}

pub struct ActivityMonitor {
    registry: Arc<SessionRegistry>,
    supervisor: Arc<ProcessSupervisor>,
    inactivity_timeout: Duration,
    sweep_interval: Duration,
}

impl ActivityMonitor {
    pub fn new(
        registry: Arc<SessionRegistry>,
        supervisor: Arc<ProcessSupervisor>,
        inactivity_timeout: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            registry,
            supervisor,
            inactivity_timeout,
            sweep_interval,
        }
    }

    /// Run one sweep against a single observation instant.
    pub async fn sweep(&self) -> SweepReport {
        let now = Instant::now();
        let timeout = self.inactivity_timeout;
        let mut report = SweepReport::default();

        // Viewer expiry and circuit breaker.
        let expired = self.registry.expire_viewers(now, timeout);
        report.expired_viewers = expired.len();

        let mut emptied = BTreeSet::new();
        for session in &expired {
            debug!(
                channel = %session.channel(),
                client = %session.key.client,
                segments = session.segments_served,
                "Viewer session expired"
            );
            if self.registry.flag_if_eligible(session, now) {
                report.flagged += 1;
            }
            emptied.insert(session.channel().to_string());
        }

        for channel in emptied {
            if self.registry.viewer_count(&channel) == 0 {
                info!(channel = %channel, "Last viewer left, stopping encoder");
                self.supervisor.teardown(&channel).await;
                report.torn_down.push(channel);
            }
        }

        // Channel expiry.
        for channel in self.registry.stale_channels(now, timeout) {
            if report.torn_down.contains(&channel) {
                continue;
            }
            info!(channel = %channel, "No segment requested recently, stopping encoder");
            self.supervisor.teardown(&channel).await;
            report.torn_down.push(channel);
        }

        report
    }

    /// Start the periodic sweep loop.
    pub fn start_background_task(self: &Arc<Self>, cancellation_token: CancellationToken) -> JoinHandle<()> {
        let monitor = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = interval(monitor.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                interval_secs = monitor.sweep_interval.as_secs(),
                timeout_secs = monitor.inactivity_timeout.as_secs(),
                "Activity monitor started"
            );

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("Activity monitor shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = monitor.sweep().await;
                        if !report.torn_down.is_empty() || report.flagged > 0 {
                            debug!(
                                expired = report.expired_viewers,
                                flagged = report.flagged,
                                torn_down = ?report.torn_down,
                                "Sweep finished"
                            );
                        }
                    }
                }
            }
        })
    }
}
