//! # Animal Registry Server
//!
//! HTTP service for the animal registry. Dashboards list and edit records over
//! REST and keep their view current through a live change feed (SSE or
//! WebSocket); an RFID scanner posts tag reads that are relayed to every
//! connected observer.
//!
//! ## Startup:
//! 1.  Load `.env`, then defaults ← `server_animals.conf` ← environment/CLI.
//! 2.  Install `tracing` (stdout + non-blocking log file).
//! 3.  Open the record store: a PostgreSQL pool (optionally bootstrapping the
//!     `animals` table) or the in-process memory store.
//! 4.  Serve the router until `CTRL+C`/`SIGTERM`, then close every live feed so
//!     long-lived streams let the graceful shutdown complete.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

mod animals_logic;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use lib_common::connections::db_postgres::{PgPoolSettings, create_pool, mask_url_password, ping};
use lib_common::records::{MemoryRecordStore, PgRecordStore, RecordService, RecordStore};

use animals_logic::config::{Settings, StorageKind, load_config};
use animals_logic::logger::setup_logging;
use animals_logic::routes::router;
use animals_logic::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = load_config()?;
    let _log_guard = setup_logging(&settings.log_dir, &settings.log_level, settings.log_json)?;

    match &settings.config_file {
        Some(path) => info!("Configuration loaded from {}", path.display()),
        None => info!("No config file found. Using defaults and environment/CLI variables."),
    }

    match settings.storage {
        StorageKind::Memory => {
            warn!("Using the in-memory record store; records are lost on exit.");
            serve(MemoryRecordStore::new(), &settings).await
        }
        StorageKind::Postgres => {
            let store = open_postgres(&settings).await?;
            serve(store, &settings).await
        }
    }
}

async fn open_postgres(settings: &Settings) -> anyhow::Result<PgRecordStore> {
    let url = settings
        .database_url
        .as_deref()
        .context("storage 'postgres' requires a database URL")?;

    let mut pool_settings = PgPoolSettings::new(url);
    pool_settings.max_connections = settings.db_max_connections;
    let pool = create_pool(&pool_settings)?;
    info!(
        "Database connection pool created for {} (max {} connections).",
        mask_url_password(url),
        settings.db_max_connections
    );

    // The pool connects lazily; an unreachable database is reported per request.
    if let Err(e) = ping(&pool).await {
        error!("Database is not reachable yet: {}", e);
    }

    let store = PgRecordStore::new(pool);
    if settings.ensure_schema {
        store
            .ensure_schema()
            .await
            .context("Failed to create the animals table")?;
    }
    Ok(store)
}

async fn serve<S: RecordStore>(store: S, settings: &Settings) -> anyhow::Result<()> {
    let service = Arc::new(RecordService::new(store, settings.service_settings()));
    let notifier = service.notifier().clone();
    let app = router(AppState::new(service, settings.sse_keep_alive));

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Animal registry listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            warn!("Shutdown signal received. Closing live feeds...");
            notifier.close();
        })
        .await?;

    info!("Server stopped.");
    Ok(())
}

/// # Graceful Shutdown Signal Handler
///
/// Resolves on `CTRL+C`, or on `SIGTERM` on UNIX-like systems.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    // On non-UNIX systems, `terminate` is a future that never completes.
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
