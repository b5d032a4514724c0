//! FlowLine server - Main entry point
//!
//! Wires the SQLite stores, the workflow service, the notification hub,
//! and the HTTP/SSE API into one process.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flowline_common::events::EventBus;
use flowline_server::api::{self, AppContext};
use flowline_server::config::{Args, Config, RuntimeSettings};
use flowline_server::db::init_database;
use flowline_server::notify::NotificationHub;
use flowline_server::store::SqliteStore;
use flowline_server::workflow::WorkflowService;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments and merge over the TOML bootstrap
    let args = Args::parse();
    let mut config = Config::bootstrap(&args).context("Failed to load configuration")?;

    // Initialize tracing; RUST_LOG overrides the configured level
    let default_filter = format!(
        "flowline_server={level},flowline_common={level},tower_http={level}",
        level = config.logging.level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&default_filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting FlowLine server {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH")
    );
    info!("Database: {}", config.database_path.display());

    // Initialize database (creates schema and seeds reference data)
    let pool = init_database(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    // Runtime settings live in the database, not the TOML file
    config.runtime = RuntimeSettings::load(&pool)
        .await
        .context("Failed to load runtime settings")?;

    let store = Arc::new(SqliteStore::new(pool.clone()));
    let bus = EventBus::new(config.runtime.event_bus_capacity);

    let hub = Arc::new(NotificationHub::new(
        config.runtime.hub_settings(),
        bus.clone(),
    ));
    hub.spawn_reaper();

    let service = Arc::new(WorkflowService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::clone(&hub),
        bus.clone(),
    ));

    let ctx = AppContext {
        service,
        hub,
        bus,
        notifications: store.clone(),
        authority: store,
        pool,
    };
    let app = api::create_router(ctx);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
