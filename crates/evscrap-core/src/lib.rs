#![deny(missing_docs)]

//! # evscrap-core: Foundational Types
//!
//! Types every other crate in the workspace depends on. No internal crate
//! dependencies, only `serde`, `serde_json`, `thiserror`, `chrono`, `uuid`,
//! and `sha2`.
//!
//! ## Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** You cannot pass a [`DisputeId`]
//!    where a [`SettlementId`] is expected.
//!
//! 2. **[`CanonicalBytes`] is the sole path to digest computation.** Event
//!    hashes and idempotency request hashes both flow through
//!    `CanonicalBytes::new()`, which sorts keys and normalizes timestamps.
//!
//! 3. **Closed event payload model.** [`EventPayload`] has one variant per
//!    [`EventType`]; a payload that does not match its discriminator never
//!    becomes an [`Event`].

pub mod canonical;
pub mod context;
pub mod digest;
pub mod error;
pub mod event;
pub mod identity;
pub mod target;

// Re-export primary types at crate root for ergonomic imports.
pub use canonical::CanonicalBytes;
pub use context::RequestContext;
pub use digest::{sha256_digest, sha256_raw, ContentDigest};
pub use error::{CanonicalizationError, ValidationError};
pub use event::{
    canonical_event_hash, AnchorProof, AnchorStatus, Event, EventPayload, EventType, Grade,
};
pub use identity::{
    AckId, BreakdownItemId, DisputeId, EventId, EvidenceId, SettlementId, TenantId, UserSub,
};
pub use target::{TargetRef, TargetType};
