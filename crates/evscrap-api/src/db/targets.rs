//! Target and evidence registry persistence.

use chrono::{DateTime, Utc};
use evscrap_core::{EvidenceId, TargetRef, TargetType, TenantId, UserSub};
use sqlx::PgPool;
use uuid::Uuid;

use super::decode_error;
use crate::store::{EvidenceRecord, TargetRecord};

pub async fn insert_target(pool: &PgPool, record: &TargetRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO targets (target_type, target_id, tenant_id, title, parent_type, parent_id, created_by, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (target_type, target_id) DO NOTHING",
    )
    .bind(record.target.target_type.as_str())
    .bind(record.target.target_id)
    .bind(record.tenant_id.as_str())
    .bind(&record.title)
    .bind(record.parent.map(|p| p.target_type.as_str()))
    .bind(record.parent.map(|p| p.target_id))
    .bind(record.created_by.as_str())
    .bind(record.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_evidence(pool: &PgPool, record: &EvidenceRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO evidence (id, tenant_id, target_type, target_id, file_name, sha256, created_by, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(record.id.as_uuid())
    .bind(record.tenant_id.as_str())
    .bind(record.target.target_type.as_str())
    .bind(record.target.target_id)
    .bind(&record.file_name)
    .bind(&record.sha256)
    .bind(record.created_by.as_str())
    .bind(record.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_targets(pool: &PgPool) -> Result<Vec<TargetRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TargetRow>(
        "SELECT target_type, target_id, tenant_id, title, parent_type, parent_id, created_by, created_at
         FROM targets ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(TargetRow::into_record).collect()
}

pub async fn load_evidence(pool: &PgPool) -> Result<Vec<EvidenceRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, EvidenceRow>(
        "SELECT id, tenant_id, target_type, target_id, file_name, sha256, created_by, created_at
         FROM evidence ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(EvidenceRow::into_record).collect()
}

pub(crate) fn target_ref(target_type: &str, target_id: Uuid) -> Result<TargetRef, sqlx::Error> {
    let target_type: TargetType = target_type
        .parse()
        .map_err(|_| decode_error("target_type", target_type))?;
    Ok(TargetRef::new(target_type, target_id))
}

pub(crate) fn tenant(value: String) -> Result<TenantId, sqlx::Error> {
    TenantId::new(value).map_err(|e| decode_error("tenant_id", e))
}

pub(crate) fn sub(value: String) -> Result<UserSub, sqlx::Error> {
    UserSub::new(value).map_err(|e| decode_error("user sub", e))
}

#[derive(sqlx::FromRow)]
struct TargetRow {
    target_type: String,
    target_id: Uuid,
    tenant_id: String,
    title: Option<String>,
    parent_type: Option<String>,
    parent_id: Option<Uuid>,
    created_by: String,
    created_at: DateTime<Utc>,
}

impl TargetRow {
    fn into_record(self) -> Result<TargetRecord, sqlx::Error> {
        let parent = match (self.parent_type, self.parent_id) {
            (Some(t), Some(id)) => Some(target_ref(&t, id)?),
            _ => None,
        };
        Ok(TargetRecord {
            target: target_ref(&self.target_type, self.target_id)?,
            tenant_id: tenant(self.tenant_id)?,
            title: self.title,
            parent,
            created_by: sub(self.created_by)?,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EvidenceRow {
    id: Uuid,
    tenant_id: String,
    target_type: String,
    target_id: Uuid,
    file_name: String,
    sha256: Option<String>,
    created_by: String,
    created_at: DateTime<Utc>,
}

impl EvidenceRow {
    fn into_record(self) -> Result<EvidenceRecord, sqlx::Error> {
        Ok(EvidenceRecord {
            id: EvidenceId::from_uuid(self.id),
            tenant_id: tenant(self.tenant_id)?,
            target: target_ref(&self.target_type, self.target_id)?,
            file_name: self.file_name,
            sha256: self.sha256,
            created_by: sub(self.created_by)?,
            created_at: self.created_at,
        })
    }
}
