//! Common utilities for all binaries
//!
//! Shared CLI parsing, logging setup, and graceful-shutdown wiring.

use anyhow::{Context, Result};
use clap::Parser;
use engine_core::config::Config;
use engine_core::monitoring::{EngineMetrics, MetricsServer, MetricsServerConfig};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Common CLI arguments shared by every binary.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CommonArgs {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    /// Log level override (falls back to `RUST_LOG`, then this value).
    #[arg(short, long, default_value = "info")]
    pub log_level: String,
}

/// Initialize the tracing subscriber.
pub fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::registry().with(fmt::layer().with_target(false)).with(filter).init();

    Ok(())
}

/// Load and validate configuration from the path given on the command line.
pub fn load_config(path: &str) -> Result<Config> {
    Config::load(path).with_context(|| format!("failed to load config from {path}"))
}

/// Spawn the Prometheus metrics server as a background task if enabled.
pub fn spawn_metrics_server(config: &Config, metrics: Arc<EngineMetrics>) {
    if !config.monitoring.enable_prometheus {
        tracing::info!("prometheus metrics server disabled by config");
        return;
    }
    let listen_addr = config.monitoring.metrics_addr.parse().unwrap_or_else(|_| "127.0.0.1:9090".parse().unwrap());
    let server_config = MetricsServerConfig { listen_addr, metrics_path: config.monitoring.metrics_path.clone() };
    let server = MetricsServer::new(server_config, metrics);
    tokio::spawn(async move {
        if let Err(e) = server.serve().await {
            tracing::error!(error = %e, "metrics server exited");
        }
    });
}

/// Install a `Ctrl-C` handler that flips a shared flag, used by the main
/// loop to exit cleanly instead of being killed mid-cycle.
pub fn install_shutdown_handler() -> Arc<std::sync::atomic::AtomicBool> {
    let running = Arc::new(std::sync::atomic::AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("shutdown signal received");
        r.store(false, std::sync::atomic::Ordering::SeqCst);
    }) {
        tracing::warn!(error = %e, "failed to install ctrl-c handler");
    }
    running
}
