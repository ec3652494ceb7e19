//! # evscrap-api: Binary Entry Point
//!
//! Starts the anchor consumers and the Axum HTTP server.
//! Binds to configurable port (default 8080).

use evscrap_anchor::{ProviderConfig, QueueConfig, WorkerConfig};
use evscrap_api::state::{AppConfig, AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // LOG_FORMAT=json switches to one JSON object per line.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = AppConfig::from_env();
    let port = config.port;

    // Absent DATABASE_URL means in-memory only.
    let db_pool = evscrap_api::db::init_pool().await.map_err(|e| {
        tracing::error!("Database initialization failed: {e}");
        e
    })?;

    let state = AppState::with_config(config, QueueConfig::from_env(), db_pool);

    state.hydrate_from_db().await.map_err(|e| {
        tracing::error!("Database hydration failed: {e}");
        e
    })?;

    let requeued = state.requeue_unverified().await;
    if requeued > 0 {
        tracing::info!(requeued, "re-enqueued unverified events");
    }

    let worker_config = WorkerConfig::from_env();
    let consumers = state.spawn_anchor_consumers(ProviderConfig::from_env(), worker_config);
    tracing::info!(consumers = consumers.len(), "anchor consumers started");

    let app = evscrap_api::app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("evscrap API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
