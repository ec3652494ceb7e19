//! Error types for the anchor pipeline.

use std::time::Duration;

use evscrap_core::EventId;
use thiserror::Error;

/// Errors from an anchor provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnchorError {
    /// The trust source rejected or failed the anchoring call.
    #[error("anchor rejected: {0}")]
    Rejected(String),

    /// The trust source could not be reached.
    #[error("anchor provider unavailable: {0}")]
    Unavailable(String),
}

/// Errors from the event store backing the worker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("event {0} not found")]
    EventNotFound(EventId),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Why a single worker invocation failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    #[error("Event not found: {0}")]
    EventNotFound(EventId),

    #[error(transparent)]
    Provider(#[from] AnchorError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("anchor worker timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors from the verification queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("verification queue is closed")]
    Closed,

    #[error("invalid verification message: {0}")]
    InvalidMessage(String),
}
