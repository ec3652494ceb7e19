//! # Events & Anchoring API
//!
//! Chain-of-custody events for a target. Creating an event validates the
//! payload against its event type, computes the canonical hash, stores the
//! event and enqueues a verification request; the anchor worker flips it
//! to VERIFIED asynchronously.
//!
//! Operator endpoints expose the anchor audit: events still lacking a
//! proof, dead-lettered verification messages, and manual re-anchoring.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use evscrap_anchor::DeadLetter;
use evscrap_core::{AnchorProof, Event, EventId, EventPayload, EventType, TargetRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{AdminPrincipal, UserPrincipal};
use crate::error::AppError;
use crate::extractors::{extract_json, parse_id};
use crate::idempotency::{self, ApiResponse, Idempotency, IdempotentResponse};
use crate::middleware::request_context::Ctx;
use crate::routes::{owned_target, persist_failed, TargetPath};
use crate::state::AppState;

// -- Request / response types --------------------------------------------------

/// Request to record an event against a target.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateEventRequest {
    /// One of the supported event types, e.g. `GRADING_COMPLETED`.
    pub event_type: String,
    /// Type-specific payload object.
    #[schema(value_type = Object)]
    pub payload: Value,
    /// When the event happened. Defaults to the time of recording.
    pub occurred_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EventResponse {
    pub id: Uuid,
    pub tenant_id: String,
    pub target_type: String,
    pub target_id: Uuid,
    pub event_type: String,
    #[schema(value_type = Object)]
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
    /// Hex SHA-256 of the canonical event document.
    pub canonical_hash: String,
    /// NONE, PENDING, VERIFIED or FAILED.
    pub anchor_status: String,
    pub anchor_txid: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Event> for EventResponse {
    fn from(e: &Event) -> Self {
        Self {
            id: *e.id.as_uuid(),
            tenant_id: e.tenant_id.as_str().to_string(),
            target_type: e.target.target_type.as_str().to_string(),
            target_id: e.target.target_id,
            event_type: e.event_type().as_str().to_string(),
            payload: e.payload.to_value(),
            occurred_at: e.occurred_at,
            canonical_hash: e.canonical_hash.clone(),
            anchor_status: e.anchor_status.as_str().to_string(),
            anchor_txid: e.anchor_txid.clone(),
            created_by: e.created_by.as_ref().map(|s| s.as_str().to_string()),
            created_at: e.created_at,
        }
    }
}

/// Events for one target, newest first.
#[derive(Debug, Serialize, ToSchema)]
pub struct TimelineResponse {
    pub target_type: String,
    pub target_id: Uuid,
    pub events: Vec<EventResponse>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AnchorProofResponse {
    pub event_id: Uuid,
    pub canonical_hash: String,
    pub anchor_status: String,
    pub txid: String,
    pub verified_at: DateTime<Utc>,
}

impl AnchorProofResponse {
    fn new(event: &Event, proof: &AnchorProof) -> Self {
        Self {
            event_id: *proof.event_id.as_uuid(),
            canonical_hash: event.canonical_hash.clone(),
            anchor_status: event.anchor_status.as_str().to_string(),
            txid: proof.txid.clone(),
            verified_at: proof.verified_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EventListResponse {
    pub items: Vec<EventResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeadLetterResponse {
    pub message_id: Uuid,
    /// Raw message body as received.
    pub body: String,
    pub receive_count: u32,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

impl From<DeadLetter> for DeadLetterResponse {
    fn from(d: DeadLetter) -> Self {
        Self {
            message_id: d.message_id,
            body: d.body,
            receive_count: d.receive_count,
            reason: d.reason,
            dead_lettered_at: d.dead_lettered_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeadLetterListResponse {
    pub items: Vec<DeadLetterResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReanchorResponse {
    pub event_id: Uuid,
    pub anchor_status: String,
}

// -- Router --------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/user/v1/:target_type/:target_id/events", post(create_event))
        .route("/user/v1/:target_type/:target_id/timeline", get(get_timeline))
        .route("/user/v1/events/:id/anchor", get(get_anchor_proof))
        .route("/admin/v1/events/:id", get(admin_get_event))
        .route("/admin/v1/events/:id/reanchor", post(reanchor_event))
        .route("/admin/v1/audit/missing-anchors", get(missing_anchors))
        .route("/admin/v1/anchor/dead-letters", get(dead_letters))
}

// -- User handlers -------------------------------------------------------------

/// POST /user/v1/{target_type}/{target_id}/events: record an event and enqueue anchoring.
#[utoipa::path(
    post,
    path = "/user/v1/{target_type}/{target_id}/events",
    params(
        ("target_type" = String, Path, description = "CASE or LOT"),
        ("target_id" = Uuid, Path, description = "Target ID"),
    ),
    request_body = CreateEventRequest,
    responses(
        (status = 201, description = "Event recorded, anchoring pending", body = EventResponse),
        (status = 400, description = "Invalid event type or payload", body = crate::error::ErrorBody),
        (status = 404, description = "Target not found", body = crate::error::ErrorBody),
    ),
    tag = "events"
)]
async fn create_event(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    user: UserPrincipal,
    idem: Idempotency,
    Path(path): Path<TargetPath>,
    body: Result<Json<CreateEventRequest>, JsonRejection>,
) -> Result<IdempotentResponse, AppError> {
    let target = path.target()?;
    let req = extract_json(body)?;
    let event_type: EventType = req.event_type.trim().parse()?;
    let payload = EventPayload::parse(event_type, req.payload.clone())?;
    let keyed = idem.request(&req)?;

    idempotency::execute(&state.store, keyed, async {
        owned_target(&state, &user, &target)?;
        let event = Event::record(
            user.tenant_id.clone(),
            target,
            payload,
            req.occurred_at,
            Some(user.sub.clone()),
        )
        .map_err(|e| AppError::Validation(format!("event cannot be canonicalized: {e}")))?;
        let event_id = event.id;

        if let Some(pool) = &state.db_pool {
            crate::db::events::insert(pool, &event)
                .await
                .map_err(|e| persist_failed("event", event_id, e))?;
        }
        state.store.insert_event(event.clone());
        tracing::info!(
            %event_id,
            target_ref = %target,
            event_type = event_type.as_str(),
            canonical_hash = %event.canonical_hash,
            "event recorded"
        );

        let event = state.request_anchor(&ctx, event_id).await?.unwrap_or(event);
        ApiResponse::new(StatusCode::CREATED, &EventResponse::from(&event))
    })
    .await
}

/// GET /user/v1/{target_type}/{target_id}/timeline: events for a target, newest first.
#[utoipa::path(
    get,
    path = "/user/v1/{target_type}/{target_id}/timeline",
    params(
        ("target_type" = String, Path, description = "CASE or LOT"),
        ("target_id" = Uuid, Path, description = "Target ID"),
    ),
    responses(
        (status = 200, description = "Timeline", body = TimelineResponse),
        (status = 404, description = "Target not found", body = crate::error::ErrorBody),
    ),
    tag = "events"
)]
async fn get_timeline(
    State(state): State<AppState>,
    user: UserPrincipal,
    Path(path): Path<TargetPath>,
) -> Result<Json<TimelineResponse>, AppError> {
    let target = path.target()?;
    owned_target(&state, &user, &target)?;
    Ok(Json(timeline(&state, &target)))
}

fn timeline(state: &AppState, target: &TargetRef) -> TimelineResponse {
    TimelineResponse {
        target_type: target.target_type.as_str().to_string(),
        target_id: target.target_id,
        events: state
            .store
            .events_for_target(target)
            .iter()
            .map(EventResponse::from)
            .collect(),
    }
}

/// GET /user/v1/events/{id}/anchor: the anchor proof of one of the caller's events.
#[utoipa::path(
    get,
    path = "/user/v1/events/{id}/anchor",
    params(("id" = Uuid, Path, description = "Event ID")),
    responses(
        (status = 200, description = "Anchor proof", body = AnchorProofResponse),
        (status = 404, description = "Event not found or not yet anchored", body = crate::error::ErrorBody),
    ),
    tag = "events"
)]
async fn get_anchor_proof(
    State(state): State<AppState>,
    user: UserPrincipal,
    Path(id): Path<String>,
) -> Result<Json<AnchorProofResponse>, AppError> {
    let id: EventId = parse_id("event id", &id)?;
    let event = state
        .store
        .get_event(&id)
        .filter(|e| e.tenant_id == user.tenant_id)
        .ok_or_else(|| AppError::NotFound(format!("Event {id} not found")))?;
    let proof = state
        .store
        .get_proof(&id)
        .ok_or_else(|| AppError::NotFound(format!("Event {id} has no anchor proof yet")))?;
    Ok(Json(AnchorProofResponse::new(&event, &proof)))
}

// -- Admin handlers ------------------------------------------------------------

/// GET /admin/v1/events/{id}
#[utoipa::path(
    get,
    path = "/admin/v1/events/{id}",
    params(("id" = Uuid, Path, description = "Event ID")),
    responses(
        (status = 200, description = "Event found", body = EventResponse),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
async fn admin_get_event(
    State(state): State<AppState>,
    _admin: AdminPrincipal,
    Path(id): Path<String>,
) -> Result<Json<EventResponse>, AppError> {
    let id: EventId = parse_id("event id", &id)?;
    state
        .store
        .get_event(&id)
        .map(|e| Json(EventResponse::from(&e)))
        .ok_or_else(|| AppError::NotFound(format!("Event {id} not found")))
}

/// POST /admin/v1/events/{id}/reanchor: re-enqueue verification for a non-verified event.
#[utoipa::path(
    post,
    path = "/admin/v1/events/{id}/reanchor",
    params(("id" = Uuid, Path, description = "Event ID")),
    responses(
        (status = 202, description = "Verification re-enqueued", body = ReanchorResponse),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "Event already verified", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
async fn reanchor_event(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    admin: AdminPrincipal,
    idem: Idempotency,
    Path(id): Path<String>,
) -> Result<IdempotentResponse, AppError> {
    let id: EventId = parse_id("event id", &id)?;
    let keyed = idem.request(&Value::Null)?;
    idempotency::execute(&state.store, keyed, async {
        let event = state.request_anchor(&ctx, id).await?.ok_or_else(|| {
            AppError::InvalidStatusTransition(format!("event {id} is already VERIFIED"))
        })?;
        tracing::info!(event_id = %id, admin = admin.sub.as_str(), "event re-anchor requested");
        ApiResponse::new(
            StatusCode::ACCEPTED,
            &ReanchorResponse {
                event_id: *event.id.as_uuid(),
                anchor_status: event.anchor_status.as_str().to_string(),
            },
        )
    })
    .await
}

/// GET /admin/v1/audit/missing-anchors: events that are not VERIFIED, oldest first.
#[utoipa::path(
    get,
    path = "/admin/v1/audit/missing-anchors",
    responses(
        (status = 200, description = "Unverified events", body = EventListResponse),
    ),
    tag = "admin"
)]
async fn missing_anchors(
    State(state): State<AppState>,
    _admin: AdminPrincipal,
) -> Json<EventListResponse> {
    let items: Vec<EventResponse> = state
        .store
        .unverified_events()
        .iter()
        .map(EventResponse::from)
        .collect();
    Json(EventListResponse {
        total: items.len(),
        items,
    })
}

/// GET /admin/v1/anchor/dead-letters: verification messages that will not be redelivered.
#[utoipa::path(
    get,
    path = "/admin/v1/anchor/dead-letters",
    responses(
        (status = 200, description = "Dead-lettered messages", body = DeadLetterListResponse),
    ),
    tag = "admin"
)]
async fn dead_letters(
    State(state): State<AppState>,
    _admin: AdminPrincipal,
) -> Json<DeadLetterListResponse> {
    let items: Vec<DeadLetterResponse> = state
        .queue
        .dead_letters()
        .into_iter()
        .map(DeadLetterResponse::from)
        .collect();
    Json(DeadLetterListResponse {
        total: items.len(),
        items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use evscrap_core::{TargetType, TenantId};
    use serde_json::json;

    fn recorded(state: &AppState, target: TargetRef) -> Event {
        let payload = EventPayload::parse(EventType::CaseCreated, json!({})).unwrap();
        let event = Event::record(
            TenantId::new("tenant-a").unwrap(),
            target,
            payload,
            None,
            None,
        )
        .unwrap();
        state.store.insert_event(event.clone());
        event
    }

    #[test]
    fn timeline_contains_only_the_target_events() {
        let state = AppState::new();
        let target = TargetRef::new(TargetType::Case, Uuid::new_v4());
        let other = TargetRef::new(TargetType::Lot, Uuid::new_v4());
        let event = recorded(&state, target);
        recorded(&state, other);

        let view = timeline(&state, &target);
        assert_eq!(view.target_type, "CASE");
        assert_eq!(view.events.len(), 1);
        assert_eq!(view.events[0].id, *event.id.as_uuid());
        assert_eq!(view.events[0].event_type, "CASE_CREATED");
        assert_eq!(view.events[0].anchor_status, "NONE");
    }

    #[test]
    fn proof_response_carries_event_hash() {
        let state = AppState::new();
        let event = recorded(&state, TargetRef::new(TargetType::Case, Uuid::new_v4()));
        let proof = AnchorProof {
            event_id: event.id,
            txid: "0xabc".into(),
            verified_at: Utc::now(),
        };
        let view = AnchorProofResponse::new(&event, &proof);
        assert_eq!(view.canonical_hash, event.canonical_hash);
        assert_eq!(view.txid, "0xabc");
    }
}
