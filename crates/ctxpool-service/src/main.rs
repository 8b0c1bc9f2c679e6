//! Supervisor entry point. Grounded in `riptide-headless`'s `main.rs`:
//! JSON structured logging via `tracing_subscriber`, an axum router behind
//! `TraceLayer`/`CorsLayer`, graceful shutdown on SIGTERM/SIGINT.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ctxpool_core::ContextPool;
use ctxpool_driver::ChromeDriver;
use ctxpool_service::{http, AppState, ServiceConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Spec §6 names `LOG_LEVEL`; `RUST_LOG` still wins if both are set, the
    // way `EnvFilter::from_default_env` already behaves for `tower`/`axum`.
    let filter = std::env::var("RUST_LOG")
        .or_else(|_| std::env::var("LOG_LEVEL"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .json()
        .init();

    let config = ServiceConfig::from_env();
    info!(bind_addr = %config.bind_addr, max_contexts = config.pool.max_contexts, "starting ctxpool-service");

    let driver = Arc::new(ChromeDriver::with_options(config.chrome.clone()));
    let pool = Arc::new(
        ContextPool::new(config.pool.clone(), driver)
            .await
            .context("failed to launch browser")?,
    );

    spawn_queue_sweeper(pool.clone());

    let state = AppState { pool: pool.clone() };
    let app = http::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    pool.shutdown().await;
    Ok(())
}

/// Periodically drops queue entries whose deadline has passed, the way the
/// teacher's `BrowserPool` runs a tiered health-check task alongside the
/// server (`riptide-headless::pool::BrowserPool::start_health_check_task`).
fn spawn_queue_sweeper(pool: Arc<ContextPool>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            pool.sweep_expired_waiters().await;
        }
    });
}

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
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
