//! # Database Persistence Layer
//!
//! Optional Postgres write-through via SQLx.
//!
//! When `DATABASE_URL` is set, targets, evidence, events, anchor proofs,
//! settlements, breakdown items, acks and disputes are written to Postgres
//! after the in-memory [`Datastore`](crate::store::Datastore) accepts them,
//! and loaded back on startup. When absent, the API runs in-memory only.
//!
//! The migrations carry the same unique constraints the datastore enforces
//! (one settlement per target, one ack per user, one active dispute per
//! user, one proof per event), and status updates are conditional on the
//! prior status.
//!
//! Idempotency records are not persisted.

pub mod acks;
pub mod disputes;
pub mod events;
pub mod settlements;
pub mod targets;

use sqlx::postgres::{PgPool, PgPoolOptions};

/// Initialize the database connection pool and run migrations.
///
/// Returns `None` if `DATABASE_URL` is not set (in-memory-only mode).
pub async fn init_pool() -> Result<Option<PgPool>, sqlx::Error> {
    let url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            tracing::warn!(
                "DATABASE_URL not set, running in-memory only mode. \
                 State will not survive restarts."
            );
            return Ok(None);
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(&url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(Some(pool))
}

/// Serialize a value to JSON for a JSONB column.
pub(crate) fn to_json<T: serde::Serialize>(
    value: &T,
    what: &str,
) -> Result<serde_json::Value, sqlx::Error> {
    serde_json::to_value(value)
        .map_err(|e| sqlx::Error::Protocol(format!("failed to serialize {what}: {e}")))
}

/// Decode a column value that failed domain validation.
pub(crate) fn decode_error(what: &str, value: impl std::fmt::Display) -> sqlx::Error {
    sqlx::Error::Decode(format!("invalid {what} in database: {value}").into())
}
