use std::sync::Arc;

use mimalloc::MiMalloc;
use tracing::{error, info};

use streamer::api::{ApiServer, AppState};
use streamer::app::StreamerService;
use streamer::config::StreamerConfig;
use streamer::logging;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = StreamerConfig::from_env()?;
    let _log_guard = logging::init_logging(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        format = %config.encoder.output_format,
        scratch_root = %config.storage.scratch_root.display(),
        "Starting streamer"
    );

    let service = Arc::new(StreamerService::new(config));
    service.prepare_storage().await?;
    service.start_background_tasks();

    let server = ApiServer::new(
        service.config.server.clone(),
        AppState::new(Arc::clone(&service)),
        service.cancellation_token().child_token(),
    );

    let shutdown_token = service.cancellation_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                shutdown_token.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    let result = server.run().await;
    service.shutdown().await;

    result?;
    Ok(())
}
