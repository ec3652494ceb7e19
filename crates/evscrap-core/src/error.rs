//! # Error Types
//!
//! Structured errors for the foundational layer, built with `thiserror`.

use thiserror::Error;

/// Errors during canonical serialization.
#[derive(Error, Debug)]
pub enum CanonicalizationError {
    /// JSON serialization failed during canonicalization.
    #[error("serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// Validation failures for identifiers, targets, and event payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// An identifier did not parse.
    #[error("invalid {kind}: {value:?}")]
    InvalidIdentifier {
        /// Which identifier was being parsed.
        kind: &'static str,
        /// The rejected input.
        value: String,
    },

    /// A required string field was empty or blank.
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    /// The target type is not CASE or LOT.
    #[error("invalid target type {0:?}: must be one of CASE, LOT")]
    InvalidTargetType(String),

    /// The event type is not part of the closed event type set.
    #[error("invalid event_type {0:?}")]
    UnknownEventType(String),

    /// The payload is missing or not a JSON object.
    #[error("payload is required and must be an object")]
    PayloadNotObject,

    /// The payload does not satisfy the required fields of its event type.
    #[error("invalid payload for {event_type}: {reason}")]
    InvalidPayload {
        /// The event type discriminator.
        event_type: String,
        /// What was wrong.
        reason: String,
    },

    /// A hex digest string was malformed.
    #[error("invalid digest: {0}")]
    InvalidDigest(String),
}
