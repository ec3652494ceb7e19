//! # evscrap-api: Axum API Service
//!
//! HTTP surface over the evscrap domain crates: chain-of-custody events with
//! asynchronous anchoring, settlements whose approve and commit transitions
//! are gated on every event of their target being anchored, acknowledgements,
//! disputes, and an idempotency layer shared by all mutating endpoints.
//!
//! ## API Surface
//!
//! | Prefix                                   | Module                    | Domain |
//! |------------------------------------------|---------------------------|--------|
//! | `/user/v1/cases`, `/lots`, `/evidence`   | [`routes::targets`]       | Targets |
//! | `/user/v1/{type}/{id}/events`, `/timeline` | [`routes::events`]      | Events |
//! | `/user/v1/{type}/{id}/settlement*`       | [`routes::settlements`]   | Settlements |
//! | `/user/v1/settlements/*`                 | [`routes::settlements`], [`routes::disputes`] | Approval requests, acks, disputes |
//! | `/user/v1/disputes/*`                    | [`routes::disputes`]      | Disputes |
//! | `/admin/v1/events/*`, `/audit/*`, `/anchor/*` | [`routes::events`]   | Anchor audit |
//! | `/admin/v1/settlements/*`                | [`routes::settlements`]   | Approve / commit |
//! | `/admin/v1/disputes/*`                   | [`routes::disputes`]      | Dispute review |
//! | `/health`                                | [`routes::health`]        | Liveness |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! Cors → TraceLayer → RequestContext → Auth → Handler
//! ```
//!
//! ## OpenAPI
//!
//! Generated via utoipa derive macros, served at `/openapi.json`.

pub mod auth;
pub mod db;
pub mod error;
pub mod extractors;
pub mod idempotency;
pub mod ledger;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;
pub mod store;

use axum::http::{header, HeaderName};
use axum::middleware::from_fn;
use axum::{Extension, Router};
use tower_http::cors::{Any, CorsLayer};

use crate::auth::AuthConfig;
use crate::idempotency::IDEMPOTENCY_KEY_HEADER;
use crate::middleware::request_context::{request_context_middleware, CORRELATION_ID_HEADER};

pub use error::AppError;
pub use state::AppState;

/// Assemble the full application router.
///
/// `/health` is mounted outside the auth middleware. The request-context
/// middleware wraps auth so that the authenticated actor lands on the
/// context it created.
pub fn app(state: AppState) -> Router {
    let auth_config = AuthConfig {
        token: state.config.auth_token.clone(),
    };

    let api = Router::new()
        .merge(routes::targets::router())
        .merge(routes::events::router())
        .merge(routes::settlements::router())
        .merge(routes::disputes::router())
        .merge(openapi::router())
        .layer(from_fn(auth::auth_middleware))
        .with_state(state.clone());

    let unauthenticated = routes::health::router().with_state(state);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(IDEMPOTENCY_KEY_HEADER),
            HeaderName::from_static(CORRELATION_ID_HEADER),
        ]);

    Router::new()
        .merge(unauthenticated)
        .merge(api)
        .layer(from_fn(request_context_middleware))
        .layer(middleware::tracing_layer::layer())
        .layer(Extension(auth_config))
        .layer(cors)
}
