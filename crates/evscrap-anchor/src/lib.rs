//! # evscrap-anchor: Anchor Verification Pipeline
//!
//! Events are anchored asynchronously. Creating an event enqueues a
//! `{"eventId": "..."}` message; consumers drive the [`AnchorWorker`], which
//! calls the [`AnchorProvider`] and records the outcome through an
//! [`AnchorLedger`].
//!
//! ## Delivery model
//!
//! Delivery is at-least-once and unordered. The worker is idempotent per
//! event: a VERIFIED event is skipped, anything else (including FAILED) is
//! re-anchored. Failed deliveries are redelivered until the receive count
//! reaches its bound, then parked in the dead-letter list. Malformed
//! messages are dead-lettered on first receipt.
//!
//! ## Seams
//!
//! - [`AnchorProvider`]: the external trust source. Only the simulated
//!   provider ships here.
//! - [`AnchorLedger`]: the event store as seen by the worker. The API
//!   crate's datastore implements it.

pub mod error;
pub mod provider;
pub mod queue;
pub mod worker;

#[cfg(test)]
mod testing;

pub use error::{AnchorError, LedgerError, QueueError, WorkerError};
pub use provider::{AnchorProvider, AnchorReceipt, ProviderConfig, SimulatedAnchorProvider};
pub use queue::{
    AnchorConsumer, DeadLetter, Delivery, Disposition, QueueConfig, VerificationMessage,
    VerificationQueue,
};
pub use worker::{AnchorLedger, AnchorWorker, WorkerConfig, WorkerOutcome};
