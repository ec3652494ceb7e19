//! Dispute persistence.
//!
//! The partial unique index `disputes_one_active_idx` backs the
//! one-active-dispute rule; transitions are conditional on the prior status.

use chrono::{DateTime, Utc};
use evscrap_core::{DisputeId, EvidenceId, SettlementId};
use evscrap_state::{Dispute, DisputeStatus, ReasonCode, TransitionRecord};
use sqlx::PgPool;
use uuid::Uuid;

use super::targets::{sub, tenant};
use super::{decode_error, to_json};

pub async fn insert(pool: &PgPool, dispute: &Dispute) -> Result<(), sqlx::Error> {
    let evidence_ids = to_json(&dispute.evidence_ids, "dispute evidence_ids")?;
    let transition_log = to_json(&dispute.transition_log, "dispute transition_log")?;
    sqlx::query(
        "INSERT INTO disputes (id, settlement_id, tenant_id, user_sub, reason_code, description,
                               evidence_ids, status, admin_note, transition_log, created_at,
                               updated_at, resolved_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
    )
    .bind(dispute.id.as_uuid())
    .bind(dispute.settlement_id.as_uuid())
    .bind(dispute.tenant_id.as_str())
    .bind(dispute.user_sub.as_str())
    .bind(dispute.reason_code.as_str())
    .bind(&dispute.description)
    .bind(&evidence_ids)
    .bind(dispute.status.as_str())
    .bind(&dispute.admin_note)
    .bind(&transition_log)
    .bind(dispute.created_at)
    .bind(dispute.updated_at)
    .bind(dispute.resolved_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Persist a dispute transition if the stored status is still `expected`.
pub async fn update_status(
    pool: &PgPool,
    dispute: &Dispute,
    expected: DisputeStatus,
) -> Result<bool, sqlx::Error> {
    let transition_log = to_json(&dispute.transition_log, "dispute transition_log")?;
    let result = sqlx::query(
        "UPDATE disputes
         SET status = $1, admin_note = $2, transition_log = $3, updated_at = $4, resolved_at = $5
         WHERE id = $6 AND status = $7",
    )
    .bind(dispute.status.as_str())
    .bind(&dispute.admin_note)
    .bind(&transition_log)
    .bind(dispute.updated_at)
    .bind(dispute.resolved_at)
    .bind(dispute.id.as_uuid())
    .bind(expected.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn load_all(pool: &PgPool) -> Result<Vec<Dispute>, sqlx::Error> {
    let rows = sqlx::query_as::<_, DisputeRow>(
        "SELECT id, settlement_id, tenant_id, user_sub, reason_code, description, evidence_ids,
                status, admin_note, transition_log, created_at, updated_at, resolved_at
         FROM disputes ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(DisputeRow::into_dispute).collect()
}

#[derive(sqlx::FromRow)]
struct DisputeRow {
    id: Uuid,
    settlement_id: Uuid,
    tenant_id: String,
    user_sub: String,
    reason_code: String,
    description: String,
    evidence_ids: serde_json::Value,
    status: String,
    admin_note: Option<String>,
    transition_log: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

impl DisputeRow {
    fn into_dispute(self) -> Result<Dispute, sqlx::Error> {
        let reason_code = ReasonCode::parse(&self.reason_code)
            .map_err(|_| decode_error("reason_code", &self.reason_code))?;
        let status = DisputeStatus::parse(&self.status)
            .ok_or_else(|| decode_error("dispute status", &self.status))?;
        let evidence_ids: Vec<EvidenceId> = serde_json::from_value(self.evidence_ids)
            .map_err(|e| decode_error("evidence_ids", e))?;
        let transition_log: Vec<TransitionRecord<DisputeStatus>> =
            serde_json::from_value(self.transition_log).unwrap_or_else(|e| {
                tracing::warn!(
                    dispute_id = %self.id,
                    error = %e,
                    "failed to deserialize dispute transition_log, defaulting to empty"
                );
                Vec::new()
            });
        Ok(Dispute {
            id: DisputeId::from_uuid(self.id),
            settlement_id: SettlementId::from_uuid(self.settlement_id),
            tenant_id: tenant(self.tenant_id)?,
            user_sub: sub(self.user_sub)?,
            reason_code,
            description: self.description,
            evidence_ids,
            status,
            admin_note: self.admin_note,
            created_at: self.created_at,
            updated_at: self.updated_at,
            resolved_at: self.resolved_at,
            transition_log,
        })
    }
}
