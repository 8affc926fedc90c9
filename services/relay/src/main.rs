//! Freeplay relay
//!
//! Single-binary service that exposes an OpenAI-compatible chat API and
//! serves it from a pool of Freeplay web accounts:
//! 1. Loads the account store and parks a rotation cursor on the first
//!    usable account
//! 2. Dispatches each completion with bounded failover across the pool
//! 3. Translates the upstream event stream into OpenAI chunk frames
//! 4. Refreshes and persists balances as generations complete

mod admin;
mod config;
mod dispatch;
mod metrics;
mod models;
mod openai;
mod routes;
mod sse;

use std::sync::Arc;
use std::time::{Duration, Instant};

use account_pool::AccountPool;
use anyhow::{Context, Result};
use freeplay_client::FreeplayClient;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::routes::{AppState, build_router};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting freeplay-relay");

    // Install the Prometheus recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        accounts_path = %config.accounts.path.display(),
        timeout_secs = config.server.timeout_secs,
        "configuration loaded"
    );

    // One client serves both roles: completion transport and balance prober
    let client = Arc::new(FreeplayClient::new(Duration::from_secs(
        config.server.timeout_secs,
    )));

    let pool = Arc::new(AccountPool::new(
        config.accounts.path.clone(),
        config.accounts.default_balance,
        client.clone(),
    ));
    pool.reload()
        .await
        .context("failed to load account store")?;

    let total = pool.len().await;
    if total == 0 {
        warn!(
            path = %config.accounts.path.display(),
            "no accounts loaded; completions will fail until the store is populated and reloaded"
        );
    } else {
        info!(accounts = total, "account pool ready");
    }

    let dispatcher = Arc::new(Dispatcher::new(pool.clone(), client));

    let state = AppState {
        pool: pool.clone(),
        dispatcher,
        prometheus: prometheus_handle,
        started_at: Instant::now(),
    };

    let app = build_router(state, config.server.max_connections);

    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.listen_addr))?;

    info!(addr = %config.server.listen_addr, "accepting requests");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Flush the last in-memory balances so the next start sees them.
    if let Err(e) = pool.persist().await {
        warn!(error = %e, "failed to persist account store during shutdown");
    }

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
