//! `PassVault` server entry point.
//!
//! Loads configuration, bootstraps the storage backend and event sinks, then
//! starts the Axum HTTP server with graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use passvault_core::events::EventDispatcher;
use passvault_core::events_file::FileEventSink;
use passvault_storage::{CatalogRepository, MemoryStore, TrackRepository};

use passvault_server::config::{ServerConfig, StorageBackendType};
use passvault_server::routes::build_router;
use passvault_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(storage = ?config.storage_backend, "PassVault starting");

    let state = build_app_state(&config).await?;
    let app = build_router(state);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "PassVault server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    info!("PassVault server stopped");
    Ok(())
}

/// Build the shared application state.
async fn build_app_state(config: &ServerConfig) -> anyhow::Result<Arc<AppState>> {
    let (tracks, catalog): (Arc<dyn TrackRepository>, Arc<dyn CatalogRepository>) =
        match &config.storage_backend {
            StorageBackendType::Memory => {
                info!("using in-memory storage (data will not persist)");
                let store = MemoryStore::new();
                (Arc::new(store.clone()), Arc::new(store))
            }
            #[cfg(feature = "postgres-backend")]
            StorageBackendType::Postgres { url } => {
                info!("using PostgreSQL storage");
                let store = passvault_storage::PostgresStore::connect(url)
                    .await
                    .context("failed to connect to PostgreSQL")?;
                (Arc::new(store.clone()), Arc::new(store))
            }
            #[cfg(not(feature = "postgres-backend"))]
            StorageBackendType::Postgres { .. } => {
                anyhow::bail!(
                    "PostgreSQL backend requested but feature 'postgres-backend' is not enabled"
                );
            }
        };

    let events = Arc::new(EventDispatcher::new());
    if let Some(path) = &config.event_log_path {
        events.add_sink(Arc::new(FileEventSink::new(path))).await;
        info!(path = %path.display(), "event log enabled");
    }

    if config.admin_token.is_none() {
        warn!("PASSVAULT_ADMIN_TOKEN is not set, every admin request will be rejected");
    }

    Ok(Arc::new(AppState::new(config, tracks, catalog, events)))
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
}
