use std::sync::Arc;

use rust_mux::api::{ApiServer, ApiServerConfig, AppState};
use rust_mux::config::MuxConfig;
use rust_mux::logging;
use rust_mux::service::MuxService;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let log_dir = std::env::var("LOG_DIR").ok();
    let (logging_config, _log_guard) = logging::init_logging(log_dir.as_deref())?;

    let config = MuxConfig::from_env_or_default();
    info!(
        uploads_dir = %config.uploads_dir.display(),
        fonts_dir = %config.fonts_dir.display(),
        ffmpeg = %config.ffmpeg_path,
        storage_limit = config.storage_limit,
        workers = config.max_workers,
        "Starting rust-mux v{}",
        env!("CARGO_PKG_VERSION")
    );

    let mux = Arc::new(MuxService::new(config)?);
    mux.start().await?;

    let background = CancellationToken::new();
    logging_config.start_retention_cleanup(background.child_token());

    let server = ApiServer::new(
        ApiServerConfig::from_env_or_default(),
        AppState::new(Arc::clone(&mux)),
    );
    let server_token = server.cancel_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                server_token.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    let served = server.run().await;

    background.cancel();
    mux.shutdown().await;

    served?;
    info!("rust-mux stopped");
    Ok(())
}
