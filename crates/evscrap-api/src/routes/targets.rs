//! # Target & Evidence Registry
//!
//! Registers the cases, lots and evidence references that events,
//! settlements and disputes point at. Each record is owned by the caller's
//! tenant; ownership checks elsewhere resolve through this registry.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use evscrap_core::{EvidenceId, TargetRef, TargetType};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::UserPrincipal;
use crate::error::AppError;
use crate::extractors::{extract_validated_json, Validate};
use crate::idempotency::{self, ApiResponse, Idempotency, IdempotentResponse};
use crate::routes::{owned_target, persist_failed};
use crate::state::AppState;
use crate::store::{EvidenceRecord, TargetRecord};

const MAX_TITLE_LEN: usize = 255;

// -- Request / response types --------------------------------------------------

/// Request to register a case.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateCaseRequest {
    pub title: Option<String>,
}

impl Validate for CreateCaseRequest {
    fn validate(&self) -> Result<(), String> {
        validate_title(self.title.as_deref())
    }
}

/// Request to register a lot, optionally under an existing case.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateLotRequest {
    pub title: Option<String>,
    pub case_id: Option<Uuid>,
}

impl Validate for CreateLotRequest {
    fn validate(&self) -> Result<(), String> {
        validate_title(self.title.as_deref())
    }
}

fn validate_title(title: Option<&str>) -> Result<(), String> {
    match title {
        Some(t) if t.chars().count() > MAX_TITLE_LEN => {
            Err(format!("title must not exceed {MAX_TITLE_LEN} characters"))
        }
        _ => Ok(()),
    }
}

/// Request to register an evidence file reference.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateEvidenceRequest {
    /// `CASE` or `LOT`.
    pub target_type: String,
    pub target_id: Uuid,
    pub file_name: String,
    /// Lowercase hex SHA-256 of the file, if known.
    pub sha256: Option<String>,
}

impl Validate for CreateEvidenceRequest {
    fn validate(&self) -> Result<(), String> {
        if self.file_name.trim().is_empty() {
            return Err("file_name must not be empty".into());
        }
        if self.file_name.len() > 1024 {
            return Err("file_name must not exceed 1024 bytes".into());
        }
        if let Some(hash) = &self.sha256 {
            let is_hex = hash.len() == 64
                && hash.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
            if !is_hex {
                return Err("sha256 must be 64 lowercase hex characters".into());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TargetResponse {
    pub target_type: String,
    pub target_id: Uuid,
    pub tenant_id: String,
    pub title: Option<String>,
    /// The case a lot belongs to.
    pub parent_id: Option<Uuid>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl From<&TargetRecord> for TargetResponse {
    fn from(r: &TargetRecord) -> Self {
        Self {
            target_type: r.target.target_type.as_str().to_string(),
            target_id: r.target.target_id,
            tenant_id: r.tenant_id.as_str().to_string(),
            title: r.title.clone(),
            parent_id: r.parent.map(|p| p.target_id),
            created_by: r.created_by.as_str().to_string(),
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EvidenceResponse {
    pub id: Uuid,
    pub tenant_id: String,
    pub target_type: String,
    pub target_id: Uuid,
    pub file_name: String,
    pub sha256: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl From<&EvidenceRecord> for EvidenceResponse {
    fn from(r: &EvidenceRecord) -> Self {
        Self {
            id: *r.id.as_uuid(),
            tenant_id: r.tenant_id.as_str().to_string(),
            target_type: r.target.target_type.as_str().to_string(),
            target_id: r.target.target_id,
            file_name: r.file_name.clone(),
            sha256: r.sha256.clone(),
            created_by: r.created_by.as_str().to_string(),
            created_at: r.created_at,
        }
    }
}

// -- Router --------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/user/v1/cases", post(create_case))
        .route("/user/v1/lots", post(create_lot))
        .route("/user/v1/evidence", post(create_evidence))
}

// -- Handlers ------------------------------------------------------------------

async fn register_target(
    state: &AppState,
    record: TargetRecord,
) -> Result<ApiResponse, AppError> {
    if let Some(pool) = &state.db_pool {
        crate::db::targets::insert_target(pool, &record)
            .await
            .map_err(|e| persist_failed("target", record.target, e))?;
    }
    state.store.insert_target(record.clone());
    tracing::info!(target_ref = %record.target, tenant_id = %record.tenant_id.as_str(), "target registered");
    ApiResponse::new(StatusCode::CREATED, &TargetResponse::from(&record))
}

/// POST /user/v1/cases: register a case owned by the caller's tenant.
#[utoipa::path(
    post,
    path = "/user/v1/cases",
    request_body = CreateCaseRequest,
    responses(
        (status = 201, description = "Case registered", body = TargetResponse),
        (status = 400, description = "Invalid request", body = crate::error::ErrorBody),
    ),
    tag = "targets"
)]
async fn create_case(
    State(state): State<AppState>,
    user: UserPrincipal,
    idem: Idempotency,
    body: Result<Json<CreateCaseRequest>, JsonRejection>,
) -> Result<IdempotentResponse, AppError> {
    let req = extract_validated_json(body)?;
    let keyed = idem.request(&req)?;
    idempotency::execute(&state.store, keyed, async {
        let record = TargetRecord {
            target: TargetRef::new(TargetType::Case, Uuid::new_v4()),
            tenant_id: user.tenant_id.clone(),
            title: req.title.clone(),
            parent: None,
            created_by: user.sub.clone(),
            created_at: Utc::now(),
        };
        register_target(&state, record).await
    })
    .await
}

/// POST /user/v1/lots: register a lot, optionally under one of the caller's cases.
#[utoipa::path(
    post,
    path = "/user/v1/lots",
    request_body = CreateLotRequest,
    responses(
        (status = 201, description = "Lot registered", body = TargetResponse),
        (status = 400, description = "Invalid request", body = crate::error::ErrorBody),
        (status = 404, description = "Parent case not found", body = crate::error::ErrorBody),
    ),
    tag = "targets"
)]
async fn create_lot(
    State(state): State<AppState>,
    user: UserPrincipal,
    idem: Idempotency,
    body: Result<Json<CreateLotRequest>, JsonRejection>,
) -> Result<IdempotentResponse, AppError> {
    let req = extract_validated_json(body)?;
    let keyed = idem.request(&req)?;
    idempotency::execute(&state.store, keyed, async {
        let parent = match req.case_id {
            Some(case_id) => {
                let case = TargetRef::new(TargetType::Case, case_id);
                owned_target(&state, &user, &case)?;
                Some(case)
            }
            None => None,
        };
        let record = TargetRecord {
            target: TargetRef::new(TargetType::Lot, Uuid::new_v4()),
            tenant_id: user.tenant_id.clone(),
            title: req.title.clone(),
            parent,
            created_by: user.sub.clone(),
            created_at: Utc::now(),
        };
        register_target(&state, record).await
    })
    .await
}

/// POST /user/v1/evidence: register an evidence reference on one of the caller's targets.
#[utoipa::path(
    post,
    path = "/user/v1/evidence",
    request_body = CreateEvidenceRequest,
    responses(
        (status = 201, description = "Evidence registered", body = EvidenceResponse),
        (status = 400, description = "Invalid request", body = crate::error::ErrorBody),
        (status = 404, description = "Target not found", body = crate::error::ErrorBody),
    ),
    tag = "targets"
)]
async fn create_evidence(
    State(state): State<AppState>,
    user: UserPrincipal,
    idem: Idempotency,
    body: Result<Json<CreateEvidenceRequest>, JsonRejection>,
) -> Result<IdempotentResponse, AppError> {
    let req = extract_validated_json(body)?;
    let target = TargetRef::new(req.target_type.parse()?, req.target_id);
    let keyed = idem.request(&req)?;
    idempotency::execute(&state.store, keyed, async {
        owned_target(&state, &user, &target)?;
        let record = EvidenceRecord {
            id: EvidenceId::new(),
            tenant_id: user.tenant_id.clone(),
            target,
            file_name: req.file_name.trim().to_string(),
            sha256: req.sha256.clone(),
            created_by: user.sub.clone(),
            created_at: Utc::now(),
        };
        if let Some(pool) = &state.db_pool {
            crate::db::targets::insert_evidence(pool, &record)
                .await
                .map_err(|e| persist_failed("evidence", record.id, e))?;
        }
        state.store.insert_evidence(record.clone());
        ApiResponse::new(StatusCode::CREATED, &EvidenceResponse::from(&record))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evidence_hash_must_be_lowercase_hex() {
        let mut req = CreateEvidenceRequest {
            target_type: "CASE".into(),
            target_id: Uuid::new_v4(),
            file_name: "photo.jpg".into(),
            sha256: Some("AB".repeat(32)),
        };
        assert!(req.validate().is_err());
        req.sha256 = Some("ab".repeat(32));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn evidence_requires_file_name() {
        let req = CreateEvidenceRequest {
            target_type: "LOT".into(),
            target_id: Uuid::new_v4(),
            file_name: "  ".into(),
            sha256: None,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn long_titles_rejected() {
        let req = CreateCaseRequest {
            title: Some("x".repeat(MAX_TITLE_LEN + 1)),
        };
        assert!(req.validate().is_err());
    }
}
