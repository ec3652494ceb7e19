//! # Settlements API
//!
//! One settlement per target, moving `DRAFT → READY_FOR_APPROVAL →
//! APPROVED → COMMITTED`. Approve and commit re-read the target's events
//! and run the anchor gate on every call; a settlement is never approved
//! on the strength of an earlier check.
//!
//! Every status write is a compare-and-swap against the status the handler
//! read, in memory and in Postgres, so two concurrent approvals cannot
//! both succeed.
//!
//! Acknowledgements are one per (settlement, user): the first call creates
//! the record (201), later calls return it unchanged (200).

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use evscrap_core::SettlementId;
use evscrap_state::{
    check_consistency, default_items, missing_default_items, summarize, Ack, AckMetadata,
    BreakdownItem, BreakdownSummary, Consistency, Settlement, SettlementAmounts,
    SettlementStatus, TransitionRecord,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{AdminPrincipal, UserPrincipal};
use crate::error::AppError;
use crate::extractors::{extract_validated_json, parse_id, Validate};
use crate::idempotency::{self, ApiResponse, Idempotency, IdempotentResponse};
use crate::middleware::request_context::Ctx;
use crate::routes::{owned_settlement, owned_target, persist_failed, TargetPath};
use crate::state::AppState;
use crate::store::AckInsert;

// -- Request / response types --------------------------------------------------

/// Request to create a settlement. Amounts are in minor currency units.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateSettlementRequest {
    pub amount_total: i64,
    /// Defaults to `amount_total`.
    pub amount_min: Option<i64>,
    /// Defaults to 0.
    pub amount_bonus: Option<i64>,
}

impl Validate for CreateSettlementRequest {
    fn validate(&self) -> Result<(), String> {
        if self.amount_total <= 0 {
            return Err("amount_total is required and must be a positive number".into());
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CommitSettlementRequest {
    pub receipt_hash: String,
}

impl Validate for CommitSettlementRequest {
    fn validate(&self) -> Result<(), String> {
        if self.receipt_hash.trim().is_empty() {
            return Err("receipt_hash is required".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct SettlementListParams {
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SettlementResponse {
    pub id: Uuid,
    /// Same value as `id`.
    pub settlement_id: Uuid,
    pub tenant_id: String,
    pub target_type: String,
    pub target_id: Uuid,
    /// DRAFT, READY_FOR_APPROVAL, APPROVED or COMMITTED.
    pub status: String,
    pub amount_total: i64,
    pub amount_min: i64,
    pub amount_bonus: i64,
    pub receipt_hash: Option<String>,
    pub created_by: Option<String>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub committed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[schema(value_type = Vec<Object>)]
    pub transition_log: Vec<TransitionRecord<SettlementStatus>>,
}

impl From<&Settlement> for SettlementResponse {
    fn from(s: &Settlement) -> Self {
        Self {
            id: *s.id.as_uuid(),
            settlement_id: *s.id.as_uuid(),
            tenant_id: s.tenant_id.as_str().to_string(),
            target_type: s.target.target_type.as_str().to_string(),
            target_id: s.target.target_id,
            status: s.status.as_str().to_string(),
            amount_total: s.amount_total,
            amount_min: s.amount_min,
            amount_bonus: s.amount_bonus,
            receipt_hash: s.receipt_hash.clone(),
            created_by: s.created_by.as_ref().map(|u| u.as_str().to_string()),
            approved_by: s.approved_by.clone(),
            approved_at: s.approved_at,
            committed_at: s.committed_at,
            created_at: s.created_at,
            updated_at: s.updated_at,
            transition_log: s.transition_log.clone(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SettlementListResponse {
    pub items: Vec<SettlementResponse>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BreakdownItemResponse {
    pub id: Uuid,
    pub code: String,
    pub title: String,
    /// MIN, BONUS, DEDUCTION, LOGISTICS or OTHER.
    pub category: String,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

impl From<&BreakdownItem> for BreakdownItemResponse {
    fn from(i: &BreakdownItem) -> Self {
        Self {
            id: *i.id.as_uuid(),
            code: i.code.clone(),
            title: i.title.clone(),
            category: i.category.as_str().to_string(),
            amount: i.amount,
            created_at: i.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BreakdownResponse {
    pub settlement_id: Uuid,
    pub items: Vec<BreakdownItemResponse>,
    #[schema(value_type = Object)]
    pub summary: BreakdownSummary,
    #[schema(value_type = Object)]
    pub consistency: Consistency,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AckRecordResponse {
    pub id: Uuid,
    pub settlement_id: Uuid,
    pub tenant_id: String,
    pub user_sub: String,
    pub acked_at: DateTime<Utc>,
}

impl From<&Ack> for AckRecordResponse {
    fn from(a: &Ack) -> Self {
        Self {
            id: *a.id.as_uuid(),
            settlement_id: *a.settlement_id.as_uuid(),
            tenant_id: a.tenant_id.as_str().to_string(),
            user_sub: a.user_sub.as_str().to_string(),
            acked_at: a.acked_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AckResponse {
    pub acked: bool,
    /// `new` on first acknowledgement, `already` afterwards.
    pub status: String,
    #[serde(flatten)]
    pub ack: AckRecordResponse,
}

// -- Router --------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/user/v1/:target_type/:target_id/settlement",
            get(get_target_settlement).post(create_settlement),
        )
        .route(
            "/user/v1/:target_type/:target_id/settlement/breakdown",
            get(get_target_breakdown),
        )
        .route("/user/v1/settlements", get(list_settlements))
        .route(
            "/user/v1/settlements/:id/request-approval",
            post(request_approval),
        )
        .route("/user/v1/settlements/:id/ack", post(ack_settlement))
        .route("/admin/v1/settlements", get(admin_list_settlements))
        .route("/admin/v1/settlements/:id", get(admin_get_settlement))
        .route(
            "/admin/v1/settlements/:id/breakdown",
            get(admin_get_breakdown),
        )
        .route("/admin/v1/settlements/:id/approve", post(approve_settlement))
        .route("/admin/v1/settlements/:id/commit", post(commit_settlement))
}

// -- Shared steps --------------------------------------------------------------

fn find_settlement(state: &AppState, id: &SettlementId) -> Result<Settlement, AppError> {
    state
        .store
        .get_settlement(id)
        .ok_or_else(|| AppError::NotFound(format!("Settlement {id} not found")))
}

/// Write a transitioned settlement, guarded by the status it was read in.
///
/// The database row is updated first; memory only changes once it has.
async fn save_transition(
    state: &AppState,
    updated: Settlement,
    expected: SettlementStatus,
) -> Result<Settlement, AppError> {
    if let Some(pool) = &state.db_pool {
        let applied = crate::db::settlements::update_status(pool, &updated, expected)
            .await
            .map_err(|e| persist_failed("settlement", updated.id, e))?;
        if !applied {
            tracing::warn!(
                settlement_id = %updated.id,
                expected = expected.as_str(),
                "settlement status changed in database before update"
            );
            return Err(AppError::SettlementStatusConflict(format!(
                "settlement {} is no longer {expected}",
                updated.id
            )));
        }
    }
    let saved = state
        .store
        .compare_and_swap_settlement(updated, expected)?;
    tracing::info!(
        settlement_id = %saved.id,
        from = expected.as_str(),
        to = saved.status.as_str(),
        "settlement transitioned"
    );
    Ok(saved)
}

/// Item view, first regenerating any missing default items.
async fn breakdown_view(
    state: &AppState,
    settlement: &Settlement,
) -> Result<BreakdownResponse, AppError> {
    if let Some(pool) = &state.db_pool {
        let missing =
            missing_default_items(settlement, &state.store.breakdown_items(&settlement.id));
        if !missing.is_empty() {
            crate::db::settlements::insert_items(pool, &missing)
                .await
                .map_err(|e| persist_failed("breakdown items", settlement.id, e))?;
        }
    }
    let (items, inserted) = state.store.ensure_default_items(settlement);
    if !inserted.is_empty() {
        tracing::info!(
            settlement_id = %settlement.id,
            count = inserted.len(),
            "regenerated missing default breakdown items"
        );
    }
    let consistency = check_consistency(settlement, &items);
    if !consistency.ok {
        tracing::warn!(
            settlement_id = %settlement.id,
            rule = %consistency.rule,
            "breakdown items do not match settlement amounts"
        );
    }
    Ok(BreakdownResponse {
        settlement_id: *settlement.id.as_uuid(),
        items: items.iter().map(BreakdownItemResponse::from).collect(),
        summary: summarize(&items),
        consistency,
    })
}

fn list_response(settlements: Vec<Settlement>) -> SettlementListResponse {
    let items: Vec<SettlementResponse> = settlements.iter().map(SettlementResponse::from).collect();
    SettlementListResponse {
        total: items.len(),
        items,
    }
}

fn parse_status(raw: Option<&str>) -> Result<Option<SettlementStatus>, AppError> {
    raw.map(|s| {
        SettlementStatus::parse(s.trim())
            .ok_or_else(|| AppError::Validation(format!("unknown settlement status: {s}")))
    })
    .transpose()
}

fn ack_metadata(headers: &HeaderMap, correlation_id: &str) -> AckMetadata {
    let value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    AckMetadata {
        ip_address: value("x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string())),
        user_agent: value(header::USER_AGENT.as_str()),
        correlation_id: Some(correlation_id.to_string()),
    }
}

// -- User handlers -------------------------------------------------------------

/// POST /user/v1/{target_type}/{target_id}/settlement: create the target's settlement.
#[utoipa::path(
    post,
    path = "/user/v1/{target_type}/{target_id}/settlement",
    params(
        ("target_type" = String, Path, description = "CASE or LOT"),
        ("target_id" = Uuid, Path, description = "Target ID"),
    ),
    request_body = CreateSettlementRequest,
    responses(
        (status = 201, description = "Settlement created in DRAFT", body = SettlementResponse),
        (status = 400, description = "Invalid amounts", body = crate::error::ErrorBody),
        (status = 404, description = "Target not found", body = crate::error::ErrorBody),
        (status = 409, description = "Settlement already exists", body = crate::error::ErrorBody),
    ),
    tag = "settlements"
)]
async fn create_settlement(
    State(state): State<AppState>,
    user: UserPrincipal,
    idem: Idempotency,
    Path(path): Path<TargetPath>,
    body: Result<Json<CreateSettlementRequest>, JsonRejection>,
) -> Result<IdempotentResponse, AppError> {
    let target = path.target()?;
    let req = extract_validated_json(body)?;
    let keyed = idem.request(&req)?;
    idempotency::execute(&state.store, keyed, async {
        owned_target(&state, &user, &target)?;
        let settlement = Settlement::new(
            user.tenant_id.clone(),
            target,
            SettlementAmounts {
                total: req.amount_total,
                min: req.amount_min,
                bonus: req.amount_bonus,
            },
            Some(user.sub.clone()),
        )?;
        let items = default_items(&settlement);
        state
            .store
            .insert_settlement(settlement.clone(), items.clone())?;
        // The memory insert reserves the target; release it if the row never lands.
        if let Some(pool) = &state.db_pool {
            if let Err(e) = crate::db::settlements::insert(pool, &settlement, &items).await {
                state.store.remove_settlement(&settlement.id);
                return Err(persist_failed("settlement", settlement.id, e));
            }
        }
        tracing::info!(
            settlement_id = %settlement.id,
            target_ref = %target,
            amount_total = settlement.amount_total,
            "settlement created"
        );
        ApiResponse::new(StatusCode::CREATED, &SettlementResponse::from(&settlement))
    })
    .await
}

/// GET /user/v1/{target_type}/{target_id}/settlement
#[utoipa::path(
    get,
    path = "/user/v1/{target_type}/{target_id}/settlement",
    params(
        ("target_type" = String, Path, description = "CASE or LOT"),
        ("target_id" = Uuid, Path, description = "Target ID"),
    ),
    responses(
        (status = 200, description = "Settlement found", body = SettlementResponse),
        (status = 404, description = "Target or settlement not found", body = crate::error::ErrorBody),
    ),
    tag = "settlements"
)]
async fn get_target_settlement(
    State(state): State<AppState>,
    user: UserPrincipal,
    Path(path): Path<TargetPath>,
) -> Result<Json<SettlementResponse>, AppError> {
    let target = path.target()?;
    owned_target(&state, &user, &target)?;
    state
        .store
        .settlement_for_target(&target)
        .map(|s| Json(SettlementResponse::from(&s)))
        .ok_or_else(|| AppError::NotFound(format!("No settlement for target {target}")))
}

/// GET /user/v1/{target_type}/{target_id}/settlement/breakdown
#[utoipa::path(
    get,
    path = "/user/v1/{target_type}/{target_id}/settlement/breakdown",
    params(
        ("target_type" = String, Path, description = "CASE or LOT"),
        ("target_id" = Uuid, Path, description = "Target ID"),
    ),
    responses(
        (status = 200, description = "Items, summary and consistency check", body = BreakdownResponse),
        (status = 404, description = "Target or settlement not found", body = crate::error::ErrorBody),
    ),
    tag = "settlements"
)]
async fn get_target_breakdown(
    State(state): State<AppState>,
    user: UserPrincipal,
    Path(path): Path<TargetPath>,
) -> Result<Json<BreakdownResponse>, AppError> {
    let target = path.target()?;
    owned_target(&state, &user, &target)?;
    let settlement = state
        .store
        .settlement_for_target(&target)
        .ok_or_else(|| AppError::NotFound(format!("No settlement for target {target}")))?;
    Ok(Json(breakdown_view(&state, &settlement).await?))
}

/// GET /user/v1/settlements: the caller's tenant's settlements, newest first.
#[utoipa::path(
    get,
    path = "/user/v1/settlements",
    params(("status" = Option<String>, Query, description = "Filter by status")),
    responses(
        (status = 200, description = "Settlements", body = SettlementListResponse),
        (status = 400, description = "Unknown status", body = crate::error::ErrorBody),
    ),
    tag = "settlements"
)]
async fn list_settlements(
    State(state): State<AppState>,
    user: UserPrincipal,
    Query(params): Query<SettlementListParams>,
) -> Result<Json<SettlementListResponse>, AppError> {
    let status = parse_status(params.status.as_deref())?;
    Ok(Json(list_response(
        state.store.list_settlements(Some(&user.tenant_id), status),
    )))
}

/// POST /user/v1/settlements/{id}/request-approval: DRAFT to READY_FOR_APPROVAL.
#[utoipa::path(
    post,
    path = "/user/v1/settlements/{id}/request-approval",
    params(("id" = Uuid, Path, description = "Settlement ID")),
    responses(
        (status = 200, description = "Settlement ready for approval", body = SettlementResponse),
        (status = 403, description = "Settlement belongs to another tenant", body = crate::error::ErrorBody),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "Invalid transition or concurrent update", body = crate::error::ErrorBody),
    ),
    tag = "settlements"
)]
async fn request_approval(
    State(state): State<AppState>,
    user: UserPrincipal,
    idem: Idempotency,
    Path(id): Path<String>,
) -> Result<IdempotentResponse, AppError> {
    let id: SettlementId = parse_id("settlement id", &id)?;
    let keyed = idem.request(&Value::Null)?;
    idempotency::execute(&state.store, keyed, async {
        let mut settlement = owned_settlement(&state, &user, &id)?;
        let expected = settlement.status;
        settlement.submit_for_approval(Some(user.sub.as_str().to_string()))?;
        let saved = save_transition(&state, settlement, expected).await?;
        ApiResponse::new(StatusCode::OK, &SettlementResponse::from(&saved))
    })
    .await
}

/// POST /user/v1/settlements/{id}/ack: acknowledge a committed settlement.
///
/// Requires `Idempotency-Key`. 201 for the first acknowledgement by this
/// user, 200 with the original record afterwards.
#[utoipa::path(
    post,
    path = "/user/v1/settlements/{id}/ack",
    params(("id" = Uuid, Path, description = "Settlement ID")),
    responses(
        (status = 201, description = "Acknowledgement recorded", body = AckResponse),
        (status = 200, description = "Already acknowledged", body = AckResponse),
        (status = 400, description = "Missing Idempotency-Key", body = crate::error::ErrorBody),
        (status = 403, description = "Settlement belongs to another tenant", body = crate::error::ErrorBody),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "Settlement not committed", body = crate::error::ErrorBody),
    ),
    tag = "settlements"
)]
async fn ack_settlement(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    user: UserPrincipal,
    idem: Idempotency,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<IdempotentResponse, AppError> {
    idem.require_key()?;
    let id: SettlementId = parse_id("settlement id", &id)?;
    let keyed = idem.request(&Value::Null)?;
    idempotency::execute(&state.store, keyed, async {
        let settlement = owned_settlement(&state, &user, &id)?;
        if let Some(existing) = state.store.get_ack(&id, &user.sub) {
            return ApiResponse::new(StatusCode::OK, &ack_response("already", &existing));
        }

        let ack = Ack::new(
            &settlement,
            user.tenant_id.clone(),
            user.sub.clone(),
            ack_metadata(&headers, &ctx.correlation_id),
        )?;
        match state.store.insert_ack(ack) {
            AckInsert::Existing(existing) => {
                ApiResponse::new(StatusCode::OK, &ack_response("already", &existing))
            }
            AckInsert::Created(ack) => {
                if let Some(pool) = &state.db_pool {
                    match crate::db::acks::insert(pool, &ack).await {
                        Ok(true) => {}
                        Ok(false) => {
                            tracing::warn!(settlement_id = %id, "ack already present in database");
                        }
                        Err(e) => {
                            state.store.remove_ack(&id, &user.sub);
                            return Err(persist_failed("ack", ack.id, e));
                        }
                    }
                }
                tracing::info!(settlement_id = %id, user_sub = user.sub.as_str(), "settlement acknowledged");
                ApiResponse::new(StatusCode::CREATED, &ack_response("new", &ack))
            }
        }
    })
    .await
}

fn ack_response(status: &str, ack: &Ack) -> AckResponse {
    AckResponse {
        acked: true,
        status: status.to_string(),
        ack: AckRecordResponse::from(ack),
    }
}

// -- Admin handlers ------------------------------------------------------------

/// GET /admin/v1/settlements: all settlements, optionally by status.
#[utoipa::path(
    get,
    path = "/admin/v1/settlements",
    params(("status" = Option<String>, Query, description = "Filter by status")),
    responses(
        (status = 200, description = "Settlements", body = SettlementListResponse),
        (status = 400, description = "Unknown status", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
async fn admin_list_settlements(
    State(state): State<AppState>,
    _admin: AdminPrincipal,
    Query(params): Query<SettlementListParams>,
) -> Result<Json<SettlementListResponse>, AppError> {
    let status = parse_status(params.status.as_deref())?;
    Ok(Json(list_response(state.store.list_settlements(None, status))))
}

/// GET /admin/v1/settlements/{id}
#[utoipa::path(
    get,
    path = "/admin/v1/settlements/{id}",
    params(("id" = Uuid, Path, description = "Settlement ID")),
    responses(
        (status = 200, description = "Settlement found", body = SettlementResponse),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
async fn admin_get_settlement(
    State(state): State<AppState>,
    _admin: AdminPrincipal,
    Path(id): Path<String>,
) -> Result<Json<SettlementResponse>, AppError> {
    let id: SettlementId = parse_id("settlement id", &id)?;
    let settlement = find_settlement(&state, &id)?;
    Ok(Json(SettlementResponse::from(&settlement)))
}

/// GET /admin/v1/settlements/{id}/breakdown
#[utoipa::path(
    get,
    path = "/admin/v1/settlements/{id}/breakdown",
    params(("id" = Uuid, Path, description = "Settlement ID")),
    responses(
        (status = 200, description = "Items, summary and consistency check", body = BreakdownResponse),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
async fn admin_get_breakdown(
    State(state): State<AppState>,
    _admin: AdminPrincipal,
    Path(id): Path<String>,
) -> Result<Json<BreakdownResponse>, AppError> {
    let id: SettlementId = parse_id("settlement id", &id)?;
    let settlement = find_settlement(&state, &id)?;
    Ok(Json(breakdown_view(&state, &settlement).await?))
}

/// POST /admin/v1/settlements/{id}/approve: approve if every target event is anchor-verified.
#[utoipa::path(
    post,
    path = "/admin/v1/settlements/{id}/approve",
    params(("id" = Uuid, Path, description = "Settlement ID")),
    responses(
        (status = 200, description = "Settlement approved", body = SettlementResponse),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "ANCHOR_NOT_VERIFIED, NO_EVENTS or INVALID_STATUS_TRANSITION", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
async fn approve_settlement(
    State(state): State<AppState>,
    admin: AdminPrincipal,
    idem: Idempotency,
    Path(id): Path<String>,
) -> Result<IdempotentResponse, AppError> {
    let id: SettlementId = parse_id("settlement id", &id)?;
    let keyed = idem.request(&Value::Null)?;
    idempotency::execute(&state.store, keyed, async {
        let mut settlement = find_settlement(&state, &id)?;
        let expected = settlement.status;
        let events = state.store.events_for_target(&settlement.target);
        if let Err(e) = settlement.approve(&events, Some(admin.sub.as_str().to_string())) {
            tracing::info!(settlement_id = %id, reason = %e, "settlement approval refused");
            return Err(AppError::from(e));
        }
        let saved = save_transition(&state, settlement, expected).await?;
        ApiResponse::new(StatusCode::OK, &SettlementResponse::from(&saved))
    })
    .await
}

/// POST /admin/v1/settlements/{id}/commit: commit an approved settlement with its receipt hash.
#[utoipa::path(
    post,
    path = "/admin/v1/settlements/{id}/commit",
    params(("id" = Uuid, Path, description = "Settlement ID")),
    request_body = CommitSettlementRequest,
    responses(
        (status = 200, description = "Settlement committed", body = SettlementResponse),
        (status = 400, description = "Missing receipt_hash", body = crate::error::ErrorBody),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "ANCHOR_NOT_VERIFIED, NO_EVENTS or INVALID_STATUS_TRANSITION", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
async fn commit_settlement(
    State(state): State<AppState>,
    admin: AdminPrincipal,
    idem: Idempotency,
    Path(id): Path<String>,
    body: Result<Json<CommitSettlementRequest>, JsonRejection>,
) -> Result<IdempotentResponse, AppError> {
    let id: SettlementId = parse_id("settlement id", &id)?;
    let req = extract_validated_json(body)?;
    let keyed = idem.request(&req)?;
    idempotency::execute(&state.store, keyed, async {
        let mut settlement = find_settlement(&state, &id)?;
        let expected = settlement.status;
        let events = state.store.events_for_target(&settlement.target);
        if let Err(e) = settlement.commit(
            &req.receipt_hash,
            &events,
            Some(admin.sub.as_str().to_string()),
        ) {
            tracing::info!(settlement_id = %id, reason = %e, "settlement commit refused");
            return Err(AppError::from(e));
        }
        let saved = save_transition(&state, settlement, expected).await?;
        ApiResponse::new(StatusCode::OK, &SettlementResponse::from(&saved))
    })
    .await
}
