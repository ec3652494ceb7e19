//! # Disputes API
//!
//! Users raise disputes against committed settlements of their own tenant;
//! operators move them through review:
//!
//! ```text
//! OPEN ──► UNDER_REVIEW ──► RESOLVED_ACCEPTED
//!   │          │  ▲
//!   │          ▼  │
//!   │       NEEDS_INFO
//!   │          │
//!   └──────────┴──► RESOLVED_REJECTED   (from OPEN or UNDER_REVIEW)
//! ```
//!
//! At most one active (unresolved) dispute exists per (settlement, user).
//! Transitions accept the status the operator believes is current; if the
//! stored status has moved on, the request fails with
//! `DISPUTE_STATUS_CONFLICT` and nothing is written.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use evscrap_core::{DisputeId, EvidenceId, SettlementId, TenantId};
use evscrap_state::{
    validate_description, Dispute, DisputeStatus, ReasonCode, TransitionRecord,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{AdminPrincipal, UserPrincipal};
use crate::error::AppError;
use crate::extractors::{extract_json, parse_id};
use crate::idempotency::{self, ApiResponse, Idempotency, IdempotentResponse};
use crate::routes::{owned_settlement, persist_failed};
use crate::state::AppState;
use crate::store::DisputeFilter;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 200;

// -- Request / response types --------------------------------------------------

/// Request to open a dispute.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateDisputeRequest {
    /// AMOUNT_ERROR, MISSING_ITEM, GRADE_DISPUTE or OTHER.
    pub reason_code: String,
    /// 1-2000 characters.
    pub description: String,
    /// Evidence references registered by the caller's tenant.
    #[serde(default)]
    pub evidence_ids: Vec<String>,
}

/// Request to move a dispute to another status.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TransitionDisputeRequest {
    pub next_status: String,
    /// The status the caller believes is current. Defaults to the stored status.
    pub current_status: Option<String>,
    pub admin_note: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UserDisputeParams {
    pub status: Option<String>,
    pub settlement_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct AdminDisputeParams {
    pub status: Option<String>,
    pub tenant_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl AdminDisputeParams {
    fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    fn effective_offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DisputeResponse {
    pub id: Uuid,
    pub settlement_id: Uuid,
    pub tenant_id: String,
    pub user_sub: String,
    pub reason_code: String,
    pub description: String,
    pub evidence_ids: Vec<Uuid>,
    pub status: String,
    pub admin_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    #[schema(value_type = Vec<Object>)]
    pub transition_log: Vec<TransitionRecord<DisputeStatus>>,
}

impl From<&Dispute> for DisputeResponse {
    fn from(d: &Dispute) -> Self {
        Self {
            id: *d.id.as_uuid(),
            settlement_id: *d.settlement_id.as_uuid(),
            tenant_id: d.tenant_id.as_str().to_string(),
            user_sub: d.user_sub.as_str().to_string(),
            reason_code: d.reason_code.as_str().to_string(),
            description: d.description.clone(),
            evidence_ids: d.evidence_ids.iter().map(|e| *e.as_uuid()).collect(),
            status: d.status.as_str().to_string(),
            admin_note: d.admin_note.clone(),
            created_at: d.created_at,
            updated_at: d.updated_at,
            resolved_at: d.resolved_at,
            transition_log: d.transition_log.clone(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DisputeListResponse {
    pub items: Vec<DisputeResponse>,
    /// Matching disputes before pagination.
    pub total: usize,
}

// -- Router --------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/user/v1/settlements/:id/disputes", post(create_dispute))
        .route("/user/v1/disputes", get(list_disputes))
        .route("/user/v1/disputes/:id", get(get_dispute))
        .route("/admin/v1/disputes", get(admin_list_disputes))
        .route("/admin/v1/disputes/:id", get(admin_get_dispute))
        .route("/admin/v1/disputes/:id/transition", post(transition_dispute))
}

fn parse_dispute_status(raw: &str) -> Result<DisputeStatus, AppError> {
    DisputeStatus::parse(raw.trim())
        .ok_or_else(|| AppError::Validation(format!("unknown dispute status: {raw}")))
}

fn list_page(disputes: Vec<Dispute>, offset: usize, limit: usize) -> DisputeListResponse {
    let total = disputes.len();
    DisputeListResponse {
        items: disputes
            .iter()
            .skip(offset)
            .take(limit)
            .map(DisputeResponse::from)
            .collect(),
        total,
    }
}

/// Parse evidence ids and check each belongs to `tenant_id`.
fn resolve_evidence(
    state: &AppState,
    tenant_id: &TenantId,
    raw: &[String],
) -> Result<Vec<EvidenceId>, AppError> {
    raw.iter()
        .map(|r| {
            let id: EvidenceId = r.trim().parse().map_err(|_| {
                AppError::InvalidEvidenceReference(format!("invalid evidence id: {r}"))
            })?;
            match state.store.get_evidence(&id) {
                Some(e) if &e.tenant_id == tenant_id => Ok(id),
                _ => Err(AppError::InvalidEvidenceReference(format!(
                    "evidence {id} not found"
                ))),
            }
        })
        .collect()
}

// -- User handlers -------------------------------------------------------------

/// POST /user/v1/settlements/{id}/disputes: open a dispute on a committed settlement.
///
/// Requires `Idempotency-Key`.
#[utoipa::path(
    post,
    path = "/user/v1/settlements/{id}/disputes",
    params(("id" = Uuid, Path, description = "Settlement ID")),
    request_body = CreateDisputeRequest,
    responses(
        (status = 201, description = "Dispute opened", body = DisputeResponse),
        (status = 400, description = "Invalid reason, description or evidence", body = crate::error::ErrorBody),
        (status = 403, description = "Settlement belongs to another tenant", body = crate::error::ErrorBody),
        (status = 404, description = "Settlement not found", body = crate::error::ErrorBody),
        (status = 409, description = "DISPUTE_ALREADY_OPEN or settlement not committed", body = crate::error::ErrorBody),
    ),
    tag = "disputes"
)]
async fn create_dispute(
    State(state): State<AppState>,
    user: UserPrincipal,
    idem: Idempotency,
    Path(id): Path<String>,
    body: Result<Json<CreateDisputeRequest>, JsonRejection>,
) -> Result<IdempotentResponse, AppError> {
    idem.require_key()?;
    let settlement_id: SettlementId = parse_id("settlement id", &id)?;
    let req = extract_json(body)?;
    let reason_code = ReasonCode::parse(req.reason_code.trim())?;
    validate_description(&req.description)?;
    let keyed = idem.request(&req)?;

    idempotency::execute(&state.store, keyed, async {
        let settlement = owned_settlement(&state, &user, &settlement_id)?;
        if state
            .store
            .active_dispute(&settlement_id, &user.sub)
            .is_some()
        {
            return Err(AppError::DisputeAlreadyOpen);
        }
        let evidence_ids = resolve_evidence(&state, &user.tenant_id, &req.evidence_ids)?;
        let dispute = Dispute::open(
            &settlement,
            user.tenant_id.clone(),
            user.sub.clone(),
            reason_code,
            req.description.trim(),
            evidence_ids,
        )?;
        let dispute = state.store.insert_dispute(dispute)?;
        if let Some(pool) = &state.db_pool {
            if let Err(e) = crate::db::disputes::insert(pool, &dispute).await {
                state.store.remove_dispute(&dispute.id);
                return Err(persist_failed("dispute", dispute.id, e));
            }
        }
        tracing::info!(
            dispute_id = %dispute.id,
            %settlement_id,
            reason_code = reason_code.as_str(),
            "dispute opened"
        );
        ApiResponse::new(StatusCode::CREATED, &DisputeResponse::from(&dispute))
    })
    .await
}

/// GET /user/v1/disputes: the caller's tenant's disputes, newest first.
#[utoipa::path(
    get,
    path = "/user/v1/disputes",
    params(
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("settlement_id" = Option<Uuid>, Query, description = "Filter by settlement"),
    ),
    responses(
        (status = 200, description = "Disputes", body = DisputeListResponse),
        (status = 400, description = "Invalid filter", body = crate::error::ErrorBody),
    ),
    tag = "disputes"
)]
async fn list_disputes(
    State(state): State<AppState>,
    user: UserPrincipal,
    Query(params): Query<UserDisputeParams>,
) -> Result<Json<DisputeListResponse>, AppError> {
    let filter = DisputeFilter {
        tenant_id: Some(user.tenant_id.clone()),
        status: params.status.as_deref().map(parse_dispute_status).transpose()?,
        settlement_id: params
            .settlement_id
            .as_deref()
            .map(|s| parse_id("settlement id", s))
            .transpose()?,
    };
    let disputes = state.store.list_disputes(&filter);
    let total = disputes.len();
    Ok(Json(list_page(disputes, 0, total)))
}

/// GET /user/v1/disputes/{id}
#[utoipa::path(
    get,
    path = "/user/v1/disputes/{id}",
    params(("id" = Uuid, Path, description = "Dispute ID")),
    responses(
        (status = 200, description = "Dispute found", body = DisputeResponse),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "disputes"
)]
async fn get_dispute(
    State(state): State<AppState>,
    user: UserPrincipal,
    Path(id): Path<String>,
) -> Result<Json<DisputeResponse>, AppError> {
    let id: DisputeId = parse_id("dispute id", &id)?;
    state
        .store
        .get_dispute(&id)
        .filter(|d| d.tenant_id == user.tenant_id)
        .map(|d| Json(DisputeResponse::from(&d)))
        .ok_or_else(|| AppError::NotFound(format!("Dispute {id} not found")))
}

// -- Admin handlers ------------------------------------------------------------

/// GET /admin/v1/disputes: all disputes, newest first, paginated.
#[utoipa::path(
    get,
    path = "/admin/v1/disputes",
    params(
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("tenant_id" = Option<String>, Query, description = "Filter by tenant"),
        ("limit" = Option<usize>, Query, description = "Max items to return (default 50, max 200)"),
        ("offset" = Option<usize>, Query, description = "Items to skip (default 0)"),
    ),
    responses(
        (status = 200, description = "Disputes", body = DisputeListResponse),
        (status = 400, description = "Invalid filter", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
async fn admin_list_disputes(
    State(state): State<AppState>,
    _admin: AdminPrincipal,
    Query(params): Query<AdminDisputeParams>,
) -> Result<Json<DisputeListResponse>, AppError> {
    let filter = DisputeFilter {
        tenant_id: params
            .tenant_id
            .as_deref()
            .map(TenantId::new)
            .transpose()?,
        status: params.status.as_deref().map(parse_dispute_status).transpose()?,
        settlement_id: None,
    };
    let disputes = state.store.list_disputes(&filter);
    Ok(Json(list_page(
        disputes,
        params.effective_offset(),
        params.effective_limit(),
    )))
}

/// GET /admin/v1/disputes/{id}
#[utoipa::path(
    get,
    path = "/admin/v1/disputes/{id}",
    params(("id" = Uuid, Path, description = "Dispute ID")),
    responses(
        (status = 200, description = "Dispute found", body = DisputeResponse),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
async fn admin_get_dispute(
    State(state): State<AppState>,
    _admin: AdminPrincipal,
    Path(id): Path<String>,
) -> Result<Json<DisputeResponse>, AppError> {
    let id: DisputeId = parse_id("dispute id", &id)?;
    state
        .store
        .get_dispute(&id)
        .map(|d| Json(DisputeResponse::from(&d)))
        .ok_or_else(|| AppError::NotFound(format!("Dispute {id} not found")))
}

/// POST /admin/v1/disputes/{id}/transition: move a dispute, guarded by its believed status.
#[utoipa::path(
    post,
    path = "/admin/v1/disputes/{id}/transition",
    params(("id" = Uuid, Path, description = "Dispute ID")),
    request_body = TransitionDisputeRequest,
    responses(
        (status = 200, description = "Dispute transitioned", body = DisputeResponse),
        (status = 400, description = "Unknown status", body = crate::error::ErrorBody),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "DISPUTE_STATUS_CONFLICT or INVALID_STATUS_TRANSITION", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
async fn transition_dispute(
    State(state): State<AppState>,
    admin: AdminPrincipal,
    idem: Idempotency,
    Path(id): Path<String>,
    body: Result<Json<TransitionDisputeRequest>, JsonRejection>,
) -> Result<IdempotentResponse, AppError> {
    let id: DisputeId = parse_id("dispute id", &id)?;
    let req = extract_json(body)?;
    let next = parse_dispute_status(&req.next_status)?;
    let believed = req
        .current_status
        .as_deref()
        .map(parse_dispute_status)
        .transpose()?;
    let keyed = idem.request(&req)?;

    idempotency::execute(&state.store, keyed, async {
        let stored = state
            .store
            .get_dispute(&id)
            .ok_or_else(|| AppError::NotFound(format!("Dispute {id} not found")))?;
        let expected = believed.unwrap_or(stored.status);

        let mut updated = stored;
        updated.transition(
            next,
            Some(expected),
            req.admin_note.clone(),
            Some(admin.sub.as_str().to_string()),
        )?;
        if let Some(pool) = &state.db_pool {
            let applied = crate::db::disputes::update_status(pool, &updated, expected)
                .await
                .map_err(|e| persist_failed("dispute", id, e))?;
            if !applied {
                return Err(AppError::DisputeStatusConflict(format!(
                    "dispute {id} is no longer {expected}"
                )));
            }
        }
        let saved = state.store.compare_and_swap_dispute(updated, expected)?;
        tracing::info!(
            dispute_id = %id,
            from = expected.as_str(),
            to = next.as_str(),
            "dispute transitioned"
        );
        ApiResponse::new(StatusCode::OK, &DisputeResponse::from(&saved))
    })
    .await
}
