//! Event and anchor proof persistence.
//!
//! Events are immutable apart from `anchor_status` / `anchor_txid`. The
//! VERIFIED flip and the proof insert share one transaction, and no
//! statement here ever moves an event out of VERIFIED.

use chrono::{DateTime, Utc};
use evscrap_core::{AnchorProof, AnchorStatus, Event, EventId, EventPayload, EventType, UserSub};
use sqlx::PgPool;
use uuid::Uuid;

use super::targets::{sub, target_ref, tenant};
use super::decode_error;

pub async fn insert(pool: &PgPool, event: &Event) -> Result<(), sqlx::Error> {
    let payload = event.payload.to_value();
    sqlx::query(
        "INSERT INTO events (id, tenant_id, target_type, target_id, event_type, payload, occurred_at,
                             canonical_hash, anchor_status, anchor_txid, created_by, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
    )
    .bind(event.id.as_uuid())
    .bind(event.tenant_id.as_str())
    .bind(event.target.target_type.as_str())
    .bind(event.target.target_id)
    .bind(event.event_type().as_str())
    .bind(&payload)
    .bind(event.occurred_at)
    .bind(&event.canonical_hash)
    .bind(event.anchor_status.as_str())
    .bind(&event.anchor_txid)
    .bind(event.created_by.as_ref().map(UserSub::as_str))
    .bind(event.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Set a non-verified event's anchor status. Returns whether a row changed.
pub async fn set_anchor_status(
    pool: &PgPool,
    id: EventId,
    status: AnchorStatus,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE events SET anchor_status = $1 WHERE id = $2 AND anchor_status <> 'VERIFIED'",
    )
    .bind(status.as_str())
    .bind(id.as_uuid())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Flip the event to VERIFIED and insert its proof in one transaction.
/// A second call for the same event changes nothing.
pub async fn mark_verified(pool: &PgPool, proof: &AnchorProof) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "UPDATE events SET anchor_status = 'VERIFIED', anchor_txid = $1
         WHERE id = $2 AND anchor_status <> 'VERIFIED'",
    )
    .bind(&proof.txid)
    .bind(proof.event_id.as_uuid())
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO anchor_proofs (event_id, txid, verified_at) VALUES ($1, $2, $3)
         ON CONFLICT (event_id) DO NOTHING",
    )
    .bind(proof.event_id.as_uuid())
    .bind(&proof.txid)
    .bind(proof.verified_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await
}

pub async fn load_all(pool: &PgPool) -> Result<Vec<Event>, sqlx::Error> {
    let rows = sqlx::query_as::<_, EventRow>(
        "SELECT id, tenant_id, target_type, target_id, event_type, payload, occurred_at,
                canonical_hash, anchor_status, anchor_txid, created_by, created_at
         FROM events ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(EventRow::into_event).collect()
}

pub async fn load_proofs(pool: &PgPool) -> Result<Vec<AnchorProof>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ProofRow>(
        "SELECT event_id, txid, verified_at FROM anchor_proofs ORDER BY verified_at",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| AnchorProof {
            event_id: EventId::from_uuid(r.event_id),
            txid: r.txid,
            verified_at: r.verified_at,
        })
        .collect())
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    tenant_id: String,
    target_type: String,
    target_id: Uuid,
    event_type: String,
    payload: serde_json::Value,
    occurred_at: DateTime<Utc>,
    canonical_hash: String,
    anchor_status: String,
    anchor_txid: Option<String>,
    created_by: Option<String>,
    created_at: DateTime<Utc>,
}

impl EventRow {
    /// The stored hash is kept as-is, never recomputed.
    fn into_event(self) -> Result<Event, sqlx::Error> {
        let event_type: EventType = self
            .event_type
            .parse()
            .map_err(|_| decode_error("event_type", &self.event_type))?;
        let payload =
            EventPayload::parse(event_type, self.payload).map_err(|e| decode_error("payload", e))?;
        let anchor_status: AnchorStatus = self
            .anchor_status
            .parse()
            .map_err(|_| decode_error("anchor_status", &self.anchor_status))?;
        Ok(Event {
            id: EventId::from_uuid(self.id),
            tenant_id: tenant(self.tenant_id)?,
            target: target_ref(&self.target_type, self.target_id)?,
            payload,
            occurred_at: self.occurred_at,
            canonical_hash: self.canonical_hash,
            anchor_status,
            anchor_txid: self.anchor_txid,
            created_by: self.created_by.map(sub).transpose()?,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProofRow {
    event_id: Uuid,
    txid: String,
    verified_at: DateTime<Utc>,
}
