//! Service container: wires components and owns background tasks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Result;
use crate::config::StreamerConfig;
use crate::encoder::{EncoderLauncher, FfmpegLauncher};
use crate::logging;
use crate::readiness::ReadinessBarrier;
use crate::session::{ActivityMonitor, SessionRegistry};
use crate::storage::{SpaceProbe, StatvfsProbe, StorageLayout, StorageReclaimer};
use crate::supervisor::ProcessSupervisor;
use crate::utils::fs::purge_root;

/// Default shutdown timeout.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct StreamerService {
    pub config: Arc<StreamerConfig>,
    pub layout: StorageLayout,
    pub registry: Arc<SessionRegistry>,
    pub supervisor: Arc<ProcessSupervisor>,
    pub monitor: Arc<ActivityMonitor>,
    pub reclaimer: Arc<StorageReclaimer>,
    pub readiness: ReadinessBarrier,
    started_at: Instant,
    cancellation_token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamerService {
    /// Build the service with the ffmpeg launcher and the statvfs probe.
    pub fn new(config: StreamerConfig) -> Self {
        let launcher = Arc::new(FfmpegLauncher::new(config.encoder.clone()));
        Self::with_parts(config, launcher, Arc::new(StatvfsProbe))
    }

    /// Build the service with a custom launcher and space probe.
    pub fn with_parts(
        config: StreamerConfig,
        launcher: Arc<dyn EncoderLauncher>,
        probe: Arc<dyn SpaceProbe>,
    ) -> Self {
        let layout = StorageLayout::new(config.storage.scratch_root.clone());
        let registry = Arc::new(SessionRegistry::new(config.session.flag_policy()));
        let cancellation_token = CancellationToken::new();
        let supervisor = Arc::new(
            ProcessSupervisor::new(
                layout.clone(),
                launcher,
                Arc::clone(&registry),
                config.encoder.output_format,
            )
            .with_shutdown_token(cancellation_token.clone()),
        );
        let monitor = Arc::new(ActivityMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&supervisor),
            config.session.inactivity_timeout(),
            config.session.sweep_interval(),
        ));
        let reclaimer = Arc::new(StorageReclaimer::new(
            layout.clone(),
            probe,
            config.reclaim.clone(),
        ));
        let readiness = ReadinessBarrier::new(&config.readiness);

        Self {
            config: Arc::new(config),
            layout,
            registry,
            supervisor,
            monitor,
            reclaimer,
            readiness,
            started_at: Instant::now(),
            cancellation_token,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Clear the scratch root. Nothing survives a restart.
    pub async fn prepare_storage(&self) -> Result<()> {
        let removed = purge_root(self.layout.root()).await?;
        info!(
            root = %self.layout.root().display(),
            removed,
            "Scratch root ready"
        );
        Ok(())
    }

    /// Spawn the activity monitor, the reclaimer, and log retention.
    pub fn start_background_tasks(&self) {
        let mut tasks = self.tasks.lock();
        tasks.push(
            self.monitor
                .start_background_task(self.cancellation_token.child_token()),
        );
        tasks.push(
            self.reclaimer
                .start_background_task(self.cancellation_token.child_token()),
        );
        if let Some(log_dir) = &self.config.logging.log_dir {
            tasks.push(logging::start_retention_cleanup(
                log_dir.clone(),
                self.cancellation_token.child_token(),
            ));
        }
    }

    pub async fn shutdown(&self) {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Stop background tasks and every encoder.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) {
        info!("Shutting down services (timeout: {:?})", timeout);
        self.cancellation_token.cancel();

        let stopped = self.supervisor.shutdown_all().await;
        info!(stopped, "Encoders stopped");

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        let joined = tokio::time::timeout(timeout, futures::future::join_all(tasks)).await;
        if joined.is_err() {
            warn!("Shutdown timeout reached, forcing shutdown");
        }

        info!("Services shut down");
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
