//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Maps domain errors from evscrap-state, evscrap-core and the datastore to
//! HTTP status codes and machine-readable `error_code` values. Internal
//! error details are logged, never returned.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use evscrap_core::ValidationError;
use evscrap_state::{AckError, DisputeError, GateError, SettlementError, UnverifiedEvent};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use utoipa::ToSchema;

use crate::store::StoreError;

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// Machine-readable code (e.g. `ANCHOR_NOT_VERIFIED`).
    pub error_code: String,
    pub message: String,
    /// Present only for client errors that carry structured context.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<Value>,
}

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// Request validation failed (400).
    #[error("{0}")]
    Validation(String),

    /// An evidence id did not resolve to the caller's tenant (400).
    #[error("{0}")]
    InvalidEvidenceReference(String),

    /// A mutation that requires an `Idempotency-Key` arrived without one (400).
    #[error("Idempotency-Key header is required")]
    MissingIdempotencyKey,

    /// Missing or invalid credentials (401).
    #[error("{0}")]
    Unauthorized(String),

    /// Authenticated but not allowed (403).
    #[error("{0}")]
    Forbidden(String),

    /// Resource not found (404).
    #[error("{0}")]
    NotFound(String),

    /// The requested transition is not reachable from the current status (409).
    #[error("{0}")]
    InvalidStatusTransition(String),

    /// The anchor gate found events that are not VERIFIED (409).
    #[error("{} event(s) for this target are not anchor-verified", .0.len())]
    AnchorNotVerified(Vec<UnverifiedEvent>),

    /// The anchor gate found no events for the target (409).
    #[error("no events recorded for this target")]
    NoEvents,

    /// A unique resource already exists (409).
    #[error("{message}")]
    DuplicateResource { message: String, details: Value },

    /// An active dispute already exists for this settlement and user (409).
    #[error("an active dispute already exists for this settlement")]
    DisputeAlreadyOpen,

    /// The dispute changed underneath an optimistic update (409).
    #[error("{0}")]
    DisputeStatusConflict(String),

    /// The settlement changed underneath an optimistic update (409).
    #[error("{0}")]
    SettlementStatusConflict(String),

    /// The idempotency key was reused with a different request body (409).
    #[error("Idempotency key reused with different payload")]
    IdempotencyKeyConflict,

    /// A request with this idempotency key is still being processed (409).
    #[error("{0}")]
    IdempotencyInProgress(String),

    /// Internal server error (500). Message is logged but not returned to client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Return the HTTP status code and machine-readable error code for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Self::InvalidEvidenceReference(_) => {
                (StatusCode::BAD_REQUEST, "INVALID_EVIDENCE_REFERENCE")
            }
            Self::MissingIdempotencyKey => (StatusCode::BAD_REQUEST, "MISSING_IDEMPOTENCY_KEY"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "RESOURCE_NOT_FOUND"),
            Self::InvalidStatusTransition(_) => (StatusCode::CONFLICT, "INVALID_STATUS_TRANSITION"),
            Self::AnchorNotVerified(_) => (StatusCode::CONFLICT, "ANCHOR_NOT_VERIFIED"),
            Self::NoEvents => (StatusCode::CONFLICT, "NO_EVENTS"),
            Self::DuplicateResource { .. } => (StatusCode::CONFLICT, "DUPLICATE_RESOURCE"),
            Self::DisputeAlreadyOpen => (StatusCode::CONFLICT, "DISPUTE_ALREADY_OPEN"),
            Self::DisputeStatusConflict(_) => (StatusCode::CONFLICT, "DISPUTE_STATUS_CONFLICT"),
            Self::SettlementStatusConflict(_) => {
                (StatusCode::CONFLICT, "SETTLEMENT_STATUS_CONFLICT")
            }
            Self::IdempotencyKeyConflict => (StatusCode::CONFLICT, "IDEMPOTENCY_KEY_CONFLICT"),
            Self::IdempotencyInProgress(_) => (StatusCode::CONFLICT, "IDEMPOTENCY_IN_PROGRESS"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            Self::AnchorNotVerified(events) => Some(json!({ "unverified_events": events })),
            Self::DuplicateResource { details, .. } => Some(details.clone()),
            _ => None,
        }
    }

    /// Render as the `(status, body)` pair every error response carries.
    pub fn to_parts(&self) -> (StatusCode, ErrorBody) {
        let (status, code) = self.status_and_code();

        // Never expose internal error messages to clients.
        let message = match self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        (
            status,
            ErrorBody {
                error_code: code.to_string(),
                message,
                details: self.details(),
            },
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if matches!(&self, Self::Internal(_)) {
            tracing::error!(error = %self, "internal server error");
        }
        let (status, body) = self.to_parts();
        (status, Json(body)).into_response()
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<GateError> for AppError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::NoEvents => Self::NoEvents,
            GateError::Unverified(events) => Self::AnchorNotVerified(events),
        }
    }
}

impl From<SettlementError> for AppError {
    fn from(err: SettlementError) -> Self {
        match err {
            SettlementError::InvalidTransition { .. } => {
                Self::InvalidStatusTransition(err.to_string())
            }
            SettlementError::Gate(gate) => gate.into(),
            SettlementError::MissingReceiptHash | SettlementError::InvalidAmount(_) => {
                Self::Validation(err.to_string())
            }
        }
    }
}

impl From<DisputeError> for AppError {
    fn from(err: DisputeError) -> Self {
        match err {
            DisputeError::SettlementNotCommitted { .. } | DisputeError::InvalidTransition { .. } => {
                Self::InvalidStatusTransition(err.to_string())
            }
            DisputeError::InvalidReasonCode(_) | DisputeError::InvalidDescription(_) => {
                Self::Validation(err.to_string())
            }
            DisputeError::StatusConflict { .. } => Self::DisputeStatusConflict(err.to_string()),
        }
    }
}

impl From<AckError> for AppError {
    fn from(err: AckError) -> Self {
        Self::InvalidStatusTransition(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::NotFound(err.to_string()),
            StoreError::SettlementExists(existing) => Self::DuplicateResource {
                message: "Settlement already exists for this target".to_string(),
                details: json!({ "settlement_id": existing }),
            },
            StoreError::ActiveDisputeExists(_) => Self::DisputeAlreadyOpen,
            StoreError::SettlementStatusChanged { .. } => {
                Self::SettlementStatusConflict(err.to_string())
            }
            StoreError::DisputeStatusChanged { .. } => Self::DisputeStatusConflict(err.to_string()),
        }
    }
}
