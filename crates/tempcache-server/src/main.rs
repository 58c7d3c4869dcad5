//! Tempcache Server - HTTP front end for the tempcache artifact cache
//!
//! Artifacts are deposited under a key and retrieved as bytes, a path, or a
//! stream until their lifetime runs out. The cache directory is wiped on
//! every start.

mod error;
mod server;
mod types;

use crate::error::Result;
use crate::server::{start_server, ServerState, SharedState};
use crate::types::ServerConfig;
use std::sync::Arc;
use tempcache::TempcacheService;
use tracing::{info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("tempcache=info".parse()?)
        .add_directive("tempcache_server=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting Tempcache Server...");

    // Load configuration from environment
    let config = ServerConfig::from_lookup(|name| std::env::var(name).ok());
    info!("Port: {}", config.port);
    info!("Cache dir: {:?}", config.tempcache.root_dir);
    info!("Import dir: {:?}", config.import_dir);
    info!("Tick interval: {:?}", config.tempcache.tick_interval);
    info!("Bump strength: {:?}", config.tempcache.bump_strength);
    info!("Max outstanding: {}", config.tempcache.max_outstanding);

    let service = TempcacheService::start(config.tempcache).await?;
    let state: SharedState = Arc::new(ServerState::new(service, config.import_dir));

    // Serve until Ctrl-C, then stop the timers
    start_server(state.clone(), config.port, shutdown_signal()).await?;
    state.service.shutdown();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
