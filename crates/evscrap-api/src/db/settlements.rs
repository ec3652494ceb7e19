//! Settlement and breakdown item persistence.
//!
//! Status updates are compare-and-swap on the prior status; the
//! state machine itself lives in `evscrap-state`.

use chrono::{DateTime, Utc};
use evscrap_core::{BreakdownItemId, SettlementId, UserSub};
use evscrap_state::{BreakdownCategory, BreakdownItem, Settlement, SettlementStatus, TransitionRecord};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::targets::{sub, target_ref, tenant};
use super::{decode_error, to_json};

/// Insert a settlement together with its initial breakdown items.
pub async fn insert(
    pool: &PgPool,
    settlement: &Settlement,
    items: &[BreakdownItem],
) -> Result<(), sqlx::Error> {
    let transition_log = to_json(&settlement.transition_log, "settlement transition_log")?;
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO settlements (id, tenant_id, target_type, target_id, status, amount_total, amount_min,
                                  amount_bonus, receipt_hash, created_by, approved_by, approved_at,
                                  committed_at, transition_log, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
    )
    .bind(settlement.id.as_uuid())
    .bind(settlement.tenant_id.as_str())
    .bind(settlement.target.target_type.as_str())
    .bind(settlement.target.target_id)
    .bind(settlement.status.as_str())
    .bind(settlement.amount_total)
    .bind(settlement.amount_min)
    .bind(settlement.amount_bonus)
    .bind(&settlement.receipt_hash)
    .bind(settlement.created_by.as_ref().map(UserSub::as_str))
    .bind(&settlement.approved_by)
    .bind(settlement.approved_at)
    .bind(settlement.committed_at)
    .bind(&transition_log)
    .bind(settlement.created_at)
    .bind(settlement.updated_at)
    .execute(&mut *tx)
    .await?;

    insert_items_tx(&mut tx, items).await?;
    tx.commit().await
}

/// Persist a settlement transition if the stored status is still `expected`.
/// Returns `false` when the guard did not match.
pub async fn update_status(
    pool: &PgPool,
    settlement: &Settlement,
    expected: SettlementStatus,
) -> Result<bool, sqlx::Error> {
    let transition_log = to_json(&settlement.transition_log, "settlement transition_log")?;
    let result = sqlx::query(
        "UPDATE settlements
         SET status = $1, receipt_hash = $2, approved_by = $3, approved_at = $4,
             committed_at = $5, transition_log = $6, updated_at = $7
         WHERE id = $8 AND status = $9",
    )
    .bind(settlement.status.as_str())
    .bind(&settlement.receipt_hash)
    .bind(&settlement.approved_by)
    .bind(settlement.approved_at)
    .bind(settlement.committed_at)
    .bind(&transition_log)
    .bind(settlement.updated_at)
    .bind(settlement.id.as_uuid())
    .bind(expected.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Insert breakdown items, skipping codes already present.
pub async fn insert_items(pool: &PgPool, items: &[BreakdownItem]) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    insert_items_tx(&mut tx, items).await?;
    tx.commit().await
}

async fn insert_items_tx(
    tx: &mut Transaction<'_, Postgres>,
    items: &[BreakdownItem],
) -> Result<(), sqlx::Error> {
    for item in items {
        sqlx::query(
            "INSERT INTO settlement_breakdown_items (id, settlement_id, code, title, category, amount, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (settlement_id, code) DO NOTHING",
        )
        .bind(item.id.as_uuid())
        .bind(item.settlement_id.as_uuid())
        .bind(&item.code)
        .bind(&item.title)
        .bind(item.category.as_str())
        .bind(item.amount)
        .bind(item.created_at)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

pub async fn load_all(pool: &PgPool) -> Result<Vec<Settlement>, sqlx::Error> {
    let rows = sqlx::query_as::<_, SettlementRow>(
        "SELECT id, tenant_id, target_type, target_id, status, amount_total, amount_min, amount_bonus,
                receipt_hash, created_by, approved_by, approved_at, committed_at, transition_log,
                created_at, updated_at
         FROM settlements ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(SettlementRow::into_settlement).collect()
}

pub async fn load_items(pool: &PgPool) -> Result<Vec<BreakdownItem>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ItemRow>(
        "SELECT id, settlement_id, code, title, category, amount, created_at
         FROM settlement_breakdown_items ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(ItemRow::into_item).collect()
}

#[derive(sqlx::FromRow)]
struct SettlementRow {
    id: Uuid,
    tenant_id: String,
    target_type: String,
    target_id: Uuid,
    status: String,
    amount_total: i64,
    amount_min: i64,
    amount_bonus: i64,
    receipt_hash: Option<String>,
    created_by: Option<String>,
    approved_by: Option<String>,
    approved_at: Option<DateTime<Utc>>,
    committed_at: Option<DateTime<Utc>>,
    transition_log: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SettlementRow {
    fn into_settlement(self) -> Result<Settlement, sqlx::Error> {
        let status = SettlementStatus::parse(&self.status)
            .ok_or_else(|| decode_error("settlement status", &self.status))?;
        let transition_log: Vec<TransitionRecord<SettlementStatus>> =
            serde_json::from_value(self.transition_log).unwrap_or_else(|e| {
                tracing::warn!(
                    settlement_id = %self.id,
                    error = %e,
                    "failed to deserialize settlement transition_log, defaulting to empty"
                );
                Vec::new()
            });
        Ok(Settlement {
            id: SettlementId::from_uuid(self.id),
            tenant_id: tenant(self.tenant_id)?,
            target: target_ref(&self.target_type, self.target_id)?,
            status,
            amount_total: self.amount_total,
            amount_min: self.amount_min,
            amount_bonus: self.amount_bonus,
            receipt_hash: self.receipt_hash,
            created_by: self.created_by.map(sub).transpose()?,
            approved_by: self.approved_by,
            approved_at: self.approved_at,
            committed_at: self.committed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            transition_log,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: Uuid,
    settlement_id: Uuid,
    code: String,
    title: String,
    category: String,
    amount: i64,
    created_at: DateTime<Utc>,
}

impl ItemRow {
    fn into_item(self) -> Result<BreakdownItem, sqlx::Error> {
        let category = BreakdownCategory::parse(&self.category)
            .ok_or_else(|| decode_error("breakdown category", &self.category))?;
        Ok(BreakdownItem {
            id: BreakdownItemId::from_uuid(self.id),
            settlement_id: SettlementId::from_uuid(self.settlement_id),
            code: self.code,
            title: self.title,
            category,
            amount: self.amount,
            created_at: self.created_at,
        })
    }
}
