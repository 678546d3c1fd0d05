//! wave-relay binary entry point.
//!
//! Usage:
//! ```bash
//! wave-relay --config relay.toml
//! wave-relay --help
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wave_relay::config::Config;
use wave_relay::http::{build_router, health};
use wave_relay::limits::spawn_limiter_sweeper;
use wave_relay::reaper::spawn_reaper;
use wave_relay::server::WaveRelay;

/// Zero-knowledge relay backend for Wave.
#[derive(Parser, Debug)]
#[command(name = "wave-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, short, default_value = "relay.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wave_relay=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    health::init_start_time();

    info!("Starting wave-relay v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&cli.config)?;

    let addr: SocketAddr = config
        .server
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind_address))?;

    let database = config.storage.database.clone();
    let sweep_interval = Duration::from_secs(config.limits.sweep_interval_secs);
    let cleanup = config.cleanup.clone();
    let relay = Arc::new(
        WaveRelay::open(config)
            .await
            .with_context(|| format!("failed to open database {:?}", database))?,
    );
    info!("Database ready at {:?}", database);

    // Background tasks share one shutdown signal.
    let shutdown = CancellationToken::new();
    let reaper = spawn_reaper(relay.tokens_arc(), cleanup, shutdown.clone());
    let sweeper = spawn_limiter_sweeper(
        relay.rate_limits().clone(),
        sweep_interval,
        shutdown.clone(),
    );

    let app = build_router(relay);

    info!("wave-relay listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    shutdown.cancel();
    for (name, handle) in [("reaper", reaper), ("limiter sweeper", sweeper)] {
        if let Err(e) = handle.await {
            error!("{} task failed: {}", name, e);
        }
    }

    served.context("HTTP server failed")?;
    info!("wave-relay shutdown complete");
    Ok(())
}

/// Load the config file, falling back to defaults when it does not exist.
fn load_config(path: &std::path::Path) -> Result<Config> {
    if !path.exists() {
        warn!("Config file {:?} not found, using defaults", path);
        return Ok(Config::default());
    }

    let config = Config::from_file(path)?;
    info!("Loaded configuration from {:?}", path);
    Ok(config)
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
