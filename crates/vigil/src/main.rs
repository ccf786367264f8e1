//! # Vigil - Login Defense Service
//!
//! Registration and login for the community app, with a brute-force guard
//! in front of credential verification.
//!
//! ## Architecture
//! ```text
//! Client → /login → Guard (lock window, CAPTCHA) → Credentials → Session
//!                     ↑                               ↓
//!                  Sweeper                     Redis / memory
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod auth;
mod captcha;
mod config;
mod guard;
mod routes;
mod state;

use config::{AppConfig, StorageBackend};
use guard::sweeper_worker;
use state::AppState;

/// Vigil - login defense service
#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/vigil.toml", env = "VIGIL_CONFIG")]
    config: String,

    /// Redis URL (overrides config)
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, env = "LISTEN_ADDR")]
    listen: Option<String>,

    /// Storage backend for users and sessions (overrides config)
    #[arg(long, value_enum, env = "VIGIL_STORAGE")]
    storage: Option<StorageBackend>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Pick up a local .env before clap reads env fallbacks
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level, args.json_logs)?;

    info!("🛡️ Starting Vigil v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::load(&args.config, &args)?;
    info!(
        storage = ?config.storage,
        lock_schedule_secs = ?config.guard.lock_schedule_secs,
        challenge_threshold = config.guard.challenge_threshold,
        "📋 Configuration loaded from {}",
        args.config
    );

    // Create shutdown broadcast channel
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    // Initialize application state
    let state = AppState::new(config.clone()).await?;
    if config.storage == StorageBackend::Redis {
        info!("✅ Redis connected: {}", config.redis_url);
    }

    // Spawn guard sweeper
    if config.guard.sweep_interval_secs > 0 {
        let guard = state.guard.clone();
        let sessions = state.flow.sessions().clone();
        let interval = Duration::from_secs(config.guard.sweep_interval_secs);
        let sweeper_shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            sweeper_worker(guard, sessions, interval, sweeper_shutdown).await;
        });
    } else {
        tracing::warn!("Sweeper disabled, attempt records and expired sessions are never evicted");
    }

    // Build router
    let app = routes::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!("🚀 Vigil listening on {}", config.listen_addr);

    // Handle graceful shutdown
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        info!("🛑 Shutdown signal received");
        let _ = shutdown_tx.send(());
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await
    .context("Server error")?;

    info!("👋 Vigil shutdown complete");
    Ok(())
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }

    Ok(())
}
