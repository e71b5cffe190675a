use std::sync::Arc;

use media_extractor::{YtDlpConfig, YtDlpExtractor};
use tracing::{info, warn};
use tubegate::api::{ApiServer, ApiServerConfig, AppState};
use tubegate::config::GatewayConfig;
use tubegate::logging;
use tubegate::transform::{FfmpegConfig, FfmpegTransformer};
use tubegate::utils::fs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = GatewayConfig::from_env_or_default();
    let (logging_config, _log_guard) = logging::init_logging(&config.log_dir)?;

    fs::ensure_dir_all_sync_with_op("creating download directory", &config.download_dir)?;

    let client = media_extractor::client::default_client()?;
    let extractor = Arc::new(YtDlpExtractor::new(
        YtDlpConfig {
            binary_path: config.ytdlp_path.clone(),
            ..Default::default()
        },
        client,
    ));
    match extractor.version() {
        Some(version) => info!(version = %version, "Using yt-dlp"),
        None => warn!(path = %config.ytdlp_path, "yt-dlp not found; extraction will fail"),
    }

    let transformer = Arc::new(FfmpegTransformer::new(FfmpegConfig {
        binary_path: config.ffmpeg_path.clone(),
        connect_timeout: config.transform_connect_timeout,
    }));
    match transformer.version() {
        Some(version) => info!(version = %version, "Using ffmpeg"),
        None => warn!(path = %config.ffmpeg_path, "ffmpeg not found; muxing and re-encoding will fail"),
    }

    info!(
        download_dir = %config.download_dir.display(),
        allow_external_mux = config.allow_external_mux,
        "tubegate starting"
    );

    let state = AppState::new(config, extractor, transformer)
        .with_logging_config(logging_config.clone());
    let server = ApiServer::with_state(ApiServerConfig::from_env_or_default(), state);

    let cancel_token = server.cancel_token();
    logging_config.start_retention_cleanup(cancel_token.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            cancel_token.cancel();
        }
    });

    server.run().await?;

    info!("tubegate stopped");
    Ok(())
}
