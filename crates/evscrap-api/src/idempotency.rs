//! # Idempotency Layer
//!
//! Replays the first successful response for a repeated
//! `(scope, endpoint, Idempotency-Key)` triple.
//!
//! ## Flow
//!
//! ```text
//! no key / no principal ──────────────────────────────► run handler
//! record exists, hash differs ────────────────────────► 409 IDEMPOTENCY_KEY_CONFLICT
//! record exists, IN_PROGRESS ─────────────────────────► 409 IDEMPOTENCY_IN_PROGRESS
//! record exists, COMPLETED ───────────────────────────► replay + Idempotency-Replayed: true
//! no record ─► insert IN_PROGRESS ─► run handler ─┬─ 2xx ─► COMPLETED (cached)
//!                                                 └─ else ─► delete record
//! ```
//!
//! Records expire after 24 hours. Store failures never block a request:
//! the handler runs as if no key had been sent.

use std::future::Future;

use axum::extract::{FromRequestParts, MatchedPath};
use axum::http::request::Parts;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use evscrap_core::{sha256_digest, CanonicalBytes, TenantId, UserSub};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::auth::CallerIdentity;
use crate::error::AppError;

/// Request header carrying the client-chosen key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Response header set on replayed responses.
pub const IDEMPOTENCY_REPLAYED_HEADER: &str = "idempotency-replayed";

/// Hours a record is honoured after creation.
pub const RECORD_TTL_HOURS: i64 = 24;

// -- Keys & records ------------------------------------------------------------

/// Whose keys these are: the tenant for tenant users, the subject otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Tenant(TenantId),
    User(UserSub),
}

impl Scope {
    /// Tenant scope when the caller has a tenant, else user scope.
    pub fn for_caller(caller: &CallerIdentity) -> Self {
        match &caller.tenant_id {
            Some(tenant) => Self::Tenant(tenant.clone()),
            None => Self::User(caller.sub.clone()),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tenant(t) => write!(f, "TENANT:{}", t.as_str()),
            Self::User(u) => write!(f, "USER:{}", u.as_str()),
        }
    }
}

/// The unique key of an idempotency record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub scope: Scope,
    /// `"{METHOD} {route template}"`, e.g. `POST /user/v1/settlements/:id/ack`.
    pub endpoint: String,
    pub key: String,
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} [{}]", self.scope, self.endpoint, self.key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyStatus {
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyRecord {
    pub key: IdempotencyKey,
    pub request_hash: String,
    pub status: IdempotencyStatus,
    pub response_status: Option<u16>,
    pub response_body: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    fn in_progress(request: &IdempotencyRequest) -> Self {
        let now = Utc::now();
        Self {
            key: request.key.clone(),
            request_hash: request.request_hash.clone(),
            status: IdempotencyStatus::InProgress,
            response_status: None,
            response_body: None,
            created_at: now,
            expires_at: now + Duration::hours(RECORD_TTL_HOURS),
        }
    }
}

/// One keyed request: the record key plus the hash of its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRequest {
    pub key: IdempotencyKey,
    pub request_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A live record already holds this key.
    AlreadyExists,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("idempotency store unavailable: {0}")]
pub struct IdempotencyStoreError(pub String);

/// Storage for idempotency records. Expired records must read as absent.
pub trait IdempotencyStore: Send + Sync {
    fn find(&self, key: &IdempotencyKey)
        -> Result<Option<IdempotencyRecord>, IdempotencyStoreError>;

    /// Insert unless a live record with the same key exists.
    fn insert_in_progress(
        &self,
        record: IdempotencyRecord,
    ) -> Result<InsertOutcome, IdempotencyStoreError>;

    fn complete(
        &self,
        key: &IdempotencyKey,
        response_status: u16,
        response_body: Value,
    ) -> Result<(), IdempotencyStoreError>;

    fn remove(&self, key: &IdempotencyKey) -> Result<(), IdempotencyStoreError>;
}

// -- Responses -----------------------------------------------------------------

/// A handler result in cacheable form.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: &impl Serialize) -> Result<Self, AppError> {
        let body = serde_json::to_value(body)
            .map_err(|e| AppError::Internal(format!("failed to serialize response: {e}")))?;
        Ok(Self { status, body })
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IdempotentResponse {
    Executed(ApiResponse),
    Replayed(ApiResponse),
}

impl IdempotentResponse {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Executed(r) | Self::Replayed(r) => r.status,
        }
    }
}

impl IntoResponse for IdempotentResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Executed(r) => r.into_response(),
            Self::Replayed(r) => {
                let mut response = r.into_response();
                response.headers_mut().insert(
                    HeaderName::from_static(IDEMPOTENCY_REPLAYED_HEADER),
                    HeaderValue::from_static("true"),
                );
                response
            }
        }
    }
}

// -- Execution -----------------------------------------------------------------

/// Run `handler` under the idempotency protocol for `request`.
///
/// With `request == None` the handler simply runs.
pub async fn execute<S, F>(
    store: &S,
    request: Option<IdempotencyRequest>,
    handler: F,
) -> Result<IdempotentResponse, AppError>
where
    S: IdempotencyStore + ?Sized,
    F: Future<Output = Result<ApiResponse, AppError>>,
{
    let Some(request) = request else {
        return handler.await.map(IdempotentResponse::Executed);
    };

    match store.find(&request.key) {
        Ok(Some(record)) => return resolve_existing(record, &request),
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(key = %request.key, error = %e, "idempotency lookup failed, bypassing");
            return handler.await.map(IdempotentResponse::Executed);
        }
    }

    match store.insert_in_progress(IdempotencyRecord::in_progress(&request)) {
        Ok(InsertOutcome::Inserted) => {}
        Ok(InsertOutcome::AlreadyExists) => {
            // Lost the insert race to a concurrent request with the same key.
            return match store.find(&request.key) {
                Ok(Some(record)) => resolve_existing(record, &request),
                _ => Err(in_progress()),
            };
        }
        Err(e) => {
            tracing::warn!(key = %request.key, error = %e, "idempotency insert failed, bypassing");
            return handler.await.map(IdempotentResponse::Executed);
        }
    }

    let guard = InProgressGuard {
        store,
        key: &request.key,
        armed: true,
    };
    let outcome = handler.await;
    guard.disarm();
    match &outcome {
        Ok(response) if response.status.is_success() => {
            if let Err(e) =
                store.complete(&request.key, response.status.as_u16(), response.body.clone())
            {
                tracing::warn!(key = %request.key, error = %e, "failed to cache idempotent response");
            }
        }
        _ => {
            if let Err(e) = store.remove(&request.key) {
                tracing::warn!(key = %request.key, error = %e, "failed to clear idempotency record");
            }
        }
    }
    outcome.map(IdempotentResponse::Executed)
}

/// Removes an IN_PROGRESS record if the handler future is dropped before it
/// finishes, so a cancelled request does not hold its key until expiry.
struct InProgressGuard<'a, S: IdempotencyStore + ?Sized> {
    store: &'a S,
    key: &'a IdempotencyKey,
    armed: bool,
}

impl<S: IdempotencyStore + ?Sized> InProgressGuard<'_, S> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<S: IdempotencyStore + ?Sized> Drop for InProgressGuard<'_, S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!(key = %self.key, "request cancelled, clearing idempotency record");
        if let Err(e) = self.store.remove(self.key) {
            tracing::warn!(key = %self.key, error = %e, "failed to clear idempotency record");
        }
    }
}

fn resolve_existing(
    record: IdempotencyRecord,
    request: &IdempotencyRequest,
) -> Result<IdempotentResponse, AppError> {
    if record.request_hash != request.request_hash {
        return Err(AppError::IdempotencyKeyConflict);
    }
    match (record.status, record.response_status, record.response_body) {
        (IdempotencyStatus::Completed, Some(status), Some(body)) => {
            let status = StatusCode::from_u16(status)
                .map_err(|e| AppError::Internal(format!("corrupt cached status: {e}")))?;
            tracing::debug!(key = %request.key, "replaying cached response");
            Ok(IdempotentResponse::Replayed(ApiResponse { status, body }))
        }
        _ => Err(in_progress()),
    }
}

fn in_progress() -> AppError {
    AppError::IdempotencyInProgress(
        "A request with this Idempotency-Key is still being processed".into(),
    )
}

/// Hash of a request as stored in `request_hash`: the concrete path plus
/// the canonical body, so one key reused across resources conflicts
/// instead of replaying.
pub fn request_hash(path: &str, body: &impl Serialize) -> Result<String, AppError> {
    let canonical = CanonicalBytes::new(&json!({ "path": path, "body": body }))
        .map_err(|e| AppError::Validation(format!("request body cannot be canonicalized: {e}")))?;
    Ok(sha256_digest(&canonical).to_hex())
}

// -- Extractor -----------------------------------------------------------------

/// Idempotency inputs pulled from the request head.
///
/// `scope` is `None` when no principal was resolved, which disables the layer.
#[derive(Debug, Clone)]
pub struct Idempotency {
    pub key: Option<String>,
    pub scope: Option<Scope>,
    pub endpoint: String,
    pub path: String,
}

impl Idempotency {
    /// Reject the request if no `Idempotency-Key` was sent.
    pub fn require_key(&self) -> Result<(), AppError> {
        match self.key {
            Some(_) => Ok(()),
            None => Err(AppError::MissingIdempotencyKey),
        }
    }

    /// Build the keyed request for `body`, or `None` if the layer is inactive.
    pub fn request(&self, body: &impl Serialize) -> Result<Option<IdempotencyRequest>, AppError> {
        let (Some(key), Some(scope)) = (&self.key, &self.scope) else {
            return Ok(None);
        };
        Ok(Some(IdempotencyRequest {
            key: IdempotencyKey {
                scope: scope.clone(),
                endpoint: self.endpoint.clone(),
                key: key.clone(),
            },
            request_hash: request_hash(&self.path, body)?,
        }))
    }
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Idempotency {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get(IDEMPOTENCY_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(String::from);
        let scope = parts
            .extensions
            .get::<CallerIdentity>()
            .map(Scope::for_caller);
        let path = parts.uri.path().to_string();
        let template = parts
            .extensions
            .get::<MatchedPath>()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| path.clone());
        Ok(Self {
            key,
            scope,
            endpoint: format!("{} {}", parts.method, template),
            path,
        })
    }
}
