// Main entry point for the trust scoring API server

use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trust_server::server::{build_app, build_service, AppState};
use trust_server::ServerConfig;

/// Interval between expiry sweeps of the content cache.
const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,trust_engine=debug,trust_server=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Trust Score API");

    // Load configuration
    let config = ServerConfig::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    let (service, db_pool) = build_service(&config).await?;
    service
        .start()
        .await
        .context("Failed to initialize analyzers")?;

    // Periodic expiry sweep
    let sweeper = service.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CACHE_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = sweeper.purge_expired().await {
                tracing::warn!(error = %e, "Cache purge failed");
            }
        }
    });

    let app = build_app(AppState {
        service: service.clone(),
        db_pool,
    });

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    service.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
