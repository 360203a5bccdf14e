//! Application entry point for the `floodwatch-ingest` service.
//!
//! This binary orchestrates the full startup sequence for the flood sensor
//! ingestion and alerting pipeline, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Establishing a PostgreSQL connection pool
//! - Creating the database schema if it does not exist
//! - Wiring the store, cache, event hub, ingest service and alert engine
//! - Spawning the alert worker and the maintenance sweeper
//! - Mounting all API routes via the `routes` gateway (EMBP pattern)
//! - Binding the Axum HTTP server and serving until Ctrl-C / SIGTERM
//!
//! # Environment Variables
//! - `DATABASE_URL` (**required**) – PostgreSQL connection string
//! - `DB_POOL_MAX` (optional) – maximum number of DB connections (default: 5)
//! - `HTTP_PORT` (optional) – listen port (default: 8080)
//! - `API_KEY_SECRET` (optional) – bearer key for write endpoints
//! - `AXUM_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `AXUM_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See `config.rs` for the pipeline tunables.
use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use axum::Router;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::Result;

mod alerts;
mod cache;
mod config;
mod error;
mod events;
mod ingest;
mod maintenance;
mod models;
mod normalize;
mod routes;
mod schema;
mod state;
mod store;

pub use config::Config;

use alerts::{AlertDispatcher, AlertEngine, AlertQueue};
use cache::{CacheGuard, MemoryCache};
use events::EventHub;
use ingest::IngestService;
use maintenance::Sweeper;
use state::AppState;
use store::{PgStore, Store};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    tracing::info!("Attempting to connect to database");

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&cfg.db_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;

    // Explicitly constructed clients, owned here and handed down
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool.clone()));
    let memory_cache = Arc::new(MemoryCache::new());
    let cache = CacheGuard::new(memory_cache.clone(), cfg.dependency_timeout());
    let hub = Arc::new(EventHub::new());

    let (queue, queue_rx) = AlertQueue::new();
    let dispatcher = AlertDispatcher::new(
        store.clone(),
        cache.clone(),
        hub.clone(),
        cfg.alert_cooldown(),
        cfg.dependency_timeout(),
    );
    let engine = Arc::new(AlertEngine::new(
        store.clone(),
        dispatcher,
        cfg.dependency_timeout(),
    ));
    let worker = tokio::spawn(alerts::run_worker(engine, queue_rx));

    let ingest = IngestService::new(
        store.clone(),
        cache.clone(),
        hub.clone(),
        queue,
        cfg.ingest_settings(),
    );

    let sweeper = Sweeper::new(
        store.clone(),
        memory_cache,
        hub.clone(),
        ingest.rate_limiter(),
        Duration::from_secs(cfg.alert_retention_secs),
        Duration::from_secs(cfg.gateway_offline_secs),
        cfg.dependency_timeout(),
    );
    let sweeper = tokio::spawn(sweeper.run(Duration::from_secs(cfg.maintenance_interval_secs)));

    let port = cfg.http_port;
    let closing_hub = hub.clone();
    let state = AppState {
        store,
        cache,
        ingest: Arc::new(ingest),
        hub,
        config: Arc::new(cfg),
    };

    // Build app from routes gateway (EMBP)
    let app: Router = routes::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(closing_hub))
        .await?;

    // The router (and with it the last queue sender) is gone: let queued
    // evaluations finish before closing the pool.
    sweeper.abort();
    if let Err(e) = worker.await {
        tracing::error!(error = %e, "alert worker ended abnormally");
    }
    pool.close().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

// ---

/// Resolve on Ctrl-C or, on Unix, SIGTERM, closing open event streams.
async fn shutdown_signal(hub: Arc<EventHub>) {
    // ---
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
    hub.close();
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `AXUM_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `AXUM_LOG_LEVEL` env var
///
/// This should be called once at application startup before any logging
/// or tracing macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("AXUM_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to AXUM_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("AXUM_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
