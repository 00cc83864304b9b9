mod config;
mod error;
mod handlers;
mod models;
mod services;

use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::Config;
use crate::handlers::AppState;
use crate::services::book::{BookOrchestrator, BookSettings};
use crate::services::manager::ProviderManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .init();

    let config = Config::from_env();

    let manager = Arc::new(ProviderManager::from_config(&config)?);
    let books = Arc::new(BookOrchestrator::new(
        manager.clone(),
        BookSettings::from_config(&config),
    ));
    let app = handlers::router(AppState {
        manager,
        books,
        started_at: Instant::now(),
    });

    let listener = TcpListener::bind(config.socket_addr()?).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
