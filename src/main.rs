//! Spatial View Server
//!
//! Loads configuration, sets up logging, loads the seed data into the
//! in-memory engine and serves spatial queries until Ctrl-C.

use spatial_view::{MemorySpatialEngine, ServerConfig, SpatialServer};
use std::env;
use std::sync::Arc;
use tracing::{error, info};

const DEFAULT_CONFIG_PATH: &str = "spatial_view.yaml";

/// Main entry point for the spatial view server
///
/// # Usage
/// ```bash
/// # Start with default config (spatial_view.yaml, defaults if absent)
/// cargo run
///
/// # Start with custom config
/// cargo run -- /path/to/config.yaml
/// ```
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Get config file path from command line or use default
    let explicit_path = env::args().nth(1);
    let config_path = explicit_path
        .clone()
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    // Only the default path may be missing
    let config = ServerConfig::load_or_default(&config_path, explicit_path.is_none())?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level()?)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Spatial View Server");
    info!("Configuration loaded from: {}", config_path);
    info!("  - Listen address: {}", config.listen_address);
    info!("  - Stream buffer: {} chunks", config.stream_buffer);
    info!("  - Metrics endpoint: {}", config.expose_metrics);

    let engine = match &config.seed_file {
        Some(seed_file) => {
            info!("Loading seed data from: {}", seed_file);
            MemorySpatialEngine::from_seed_file(seed_file)?
        }
        None => {
            info!("No seed file configured, starting with an empty engine");
            MemorySpatialEngine::new()
        }
    };

    let addr = config.socket_addr()?;
    let server = SpatialServer::new(Arc::new(engine), &config);

    tokio::select! {
        result = server.run(addr) => {
            if let Err(e) = &result {
                error!("Server stopped: {}", e);
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down");
        }
    }

    Ok(())
}
