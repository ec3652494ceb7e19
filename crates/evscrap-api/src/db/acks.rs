//! Settlement acknowledgement persistence. Append-only.

use chrono::{DateTime, Utc};
use evscrap_core::{AckId, SettlementId};
use evscrap_state::{Ack, AckMetadata};
use sqlx::PgPool;
use uuid::Uuid;

use super::targets::{sub, tenant};

/// Insert an ack. Returns `false` if one already existed for
/// (settlement, user).
pub async fn insert(pool: &PgPool, ack: &Ack) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO settlement_acks (id, settlement_id, tenant_id, user_sub, acked_at,
                                      ip_address, user_agent, correlation_id)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (settlement_id, user_sub) DO NOTHING",
    )
    .bind(ack.id.as_uuid())
    .bind(ack.settlement_id.as_uuid())
    .bind(ack.tenant_id.as_str())
    .bind(ack.user_sub.as_str())
    .bind(ack.acked_at)
    .bind(&ack.metadata.ip_address)
    .bind(&ack.metadata.user_agent)
    .bind(&ack.metadata.correlation_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn load_all(pool: &PgPool) -> Result<Vec<Ack>, sqlx::Error> {
    let rows = sqlx::query_as::<_, AckRow>(
        "SELECT id, settlement_id, tenant_id, user_sub, acked_at, ip_address, user_agent, correlation_id
         FROM settlement_acks ORDER BY acked_at",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(AckRow::into_ack).collect()
}

#[derive(sqlx::FromRow)]
struct AckRow {
    id: Uuid,
    settlement_id: Uuid,
    tenant_id: String,
    user_sub: String,
    acked_at: DateTime<Utc>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    correlation_id: Option<String>,
}

impl AckRow {
    fn into_ack(self) -> Result<Ack, sqlx::Error> {
        Ok(Ack {
            id: AckId::from_uuid(self.id),
            settlement_id: SettlementId::from_uuid(self.settlement_id),
            tenant_id: tenant(self.tenant_id)?,
            user_sub: sub(self.user_sub)?,
            acked_at: self.acked_at,
            metadata: AckMetadata {
                ip_address: self.ip_address,
                user_agent: self.user_agent,
                correlation_id: self.correlation_id,
            },
        })
    }
}
