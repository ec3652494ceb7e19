//! # OpenAPI Specification Assembly
//!
//! Collects every utoipa-documented handler into one OpenAPI document,
//! served at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::state::AppState;

/// Adds the bearer token security scheme.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some(
                            "Bearer token authentication. Set via the AUTH_TOKEN env var.",
                        ))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "evscrap API",
        description = "Chain-of-custody events with asynchronous anchoring, anchor-gated settlements, acknowledgements and disputes.\n\nMutating endpoints accept an `Idempotency-Key` header; acknowledgements and disputes require one.\n\nAuthentication: `Authorization: Bearer <token>` when AUTH_TOKEN is set. `/health` is unauthenticated."
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development server"),
    ),
    security(
        ("bearer_auth" = [])
    ),
    paths(
        // Targets
        crate::routes::targets::create_case,
        crate::routes::targets::create_lot,
        crate::routes::targets::create_evidence,
        // Events
        crate::routes::events::create_event,
        crate::routes::events::get_timeline,
        crate::routes::events::get_anchor_proof,
        crate::routes::events::admin_get_event,
        crate::routes::events::reanchor_event,
        crate::routes::events::missing_anchors,
        crate::routes::events::dead_letters,
        // Settlements
        crate::routes::settlements::create_settlement,
        crate::routes::settlements::get_target_settlement,
        crate::routes::settlements::get_target_breakdown,
        crate::routes::settlements::list_settlements,
        crate::routes::settlements::request_approval,
        crate::routes::settlements::ack_settlement,
        crate::routes::settlements::admin_list_settlements,
        crate::routes::settlements::admin_get_settlement,
        crate::routes::settlements::admin_get_breakdown,
        crate::routes::settlements::approve_settlement,
        crate::routes::settlements::commit_settlement,
        // Disputes
        crate::routes::disputes::create_dispute,
        crate::routes::disputes::list_disputes,
        crate::routes::disputes::get_dispute,
        crate::routes::disputes::admin_list_disputes,
        crate::routes::disputes::admin_get_dispute,
        crate::routes::disputes::transition_dispute,
        // Health
        crate::routes::health::health,
    ),
    components(
        schemas(
            crate::error::ErrorBody,
            crate::routes::targets::CreateCaseRequest,
            crate::routes::targets::CreateLotRequest,
            crate::routes::targets::CreateEvidenceRequest,
            crate::routes::targets::TargetResponse,
            crate::routes::targets::EvidenceResponse,
            crate::routes::events::CreateEventRequest,
            crate::routes::events::EventResponse,
            crate::routes::events::TimelineResponse,
            crate::routes::events::AnchorProofResponse,
            crate::routes::events::EventListResponse,
            crate::routes::events::DeadLetterResponse,
            crate::routes::events::DeadLetterListResponse,
            crate::routes::events::ReanchorResponse,
            crate::routes::settlements::CreateSettlementRequest,
            crate::routes::settlements::CommitSettlementRequest,
            crate::routes::settlements::SettlementResponse,
            crate::routes::settlements::SettlementListResponse,
            crate::routes::settlements::BreakdownItemResponse,
            crate::routes::settlements::BreakdownResponse,
            crate::routes::settlements::AckRecordResponse,
            crate::routes::settlements::AckResponse,
            crate::routes::disputes::CreateDisputeRequest,
            crate::routes::disputes::TransitionDisputeRequest,
            crate::routes::disputes::DisputeResponse,
            crate::routes::disputes::DisputeListResponse,
            crate::routes::health::HealthResponse,
        ),
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "targets", description = "Case, lot and evidence registration"),
        (name = "events", description = "Chain-of-custody events, timelines and anchor proofs"),
        (name = "settlements", description = "Anchor-gated settlements, breakdowns and acknowledgements"),
        (name = "disputes", description = "User disputes against committed settlements"),
        (name = "admin", description = "Operator surface: approvals, commits, anchor audit and dispute review"),
        (name = "health", description = "Liveness probe"),
    )
)]
pub struct ApiDoc;

/// Serves the document at `/openapi.json`.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
