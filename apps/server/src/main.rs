//! CineSync Server - standalone headless watch-party server.
//!
//! This binary hosts the room coordinator, the gateway (WebSocket with
//! long-poll fallback), the REST surface, and the range-capable media proxy
//! with its transcoding pipeline. It's designed for server deployments
//! where CineSync runs as a background daemon.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use cinesync_core::{bootstrap_services, start_server};
use tokio::signal;

use crate::config::ServerConfig;

/// CineSync Server - synchronized video watch parties.
#[derive(Parser, Debug)]
#[command(name = "cinesync-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "CINESYNC_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Environment label for the health endpoint (overrides config file).
    #[arg(short = 'e', long)]
    environment: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("CineSync Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(environment) = args.environment {
        config.environment = environment;
    }

    log::info!(
        "Configuration: port={}, environment={}, storage={}",
        config.port,
        config.environment,
        config.storage_dsn
    );

    // Bootstrap services
    let core_config = config.to_core_config();
    let services = bootstrap_services(&core_config).context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    // Spawn the HTTP server; it drains in-flight requests when the
    // shutdown token fires.
    let app_state = services.app_state();
    let server_shutdown = services.cancel_token.child_token();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state, server_shutdown).await {
            log::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    // Graceful shutdown: rooms flush, sessions close, encoders stop.
    services.shutdown().await;
    let _ = server_handle.await;

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
