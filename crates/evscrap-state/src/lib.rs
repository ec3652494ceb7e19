//! # evscrap-state: Settlement, Dispute and Acknowledgement State Machines
//!
//! Runtime-validated enum state machines. Each machine exposes
//! `valid_transitions()` and rejects anything else with an
//! `InvalidTransition` error carrying both state names.
//!
//! ## State Machines
//!
//! - **Settlement** (`settlement.rs`): `DRAFT → READY_FOR_APPROVAL → APPROVED
//!   → COMMITTED`. Approve and commit are guarded by the anchor gate
//!   (`gate.rs`), evaluated live against the target's events on every call.
//!
//! - **Breakdown** (`breakdown.rs`): default line items generated at
//!   settlement creation, plus the summary and consistency check.
//!
//! - **Dispute** (`dispute.rs`): `OPEN → UNDER_REVIEW ⇄ NEEDS_INFO →
//!   RESOLVED_*`, opened only against a committed settlement.
//!
//! - **Acknowledgement** (`ack.rs`): one append-only record per
//!   (settlement, user), only for committed settlements.
//!
//! Persistence and the compare-and-swap guards live in the API crate; this
//! crate only decides whether a transition is legal.

pub mod ack;
pub mod breakdown;
pub mod dispute;
pub mod gate;
pub mod settlement;
pub mod transition;

pub use ack::{Ack, AckError, AckMetadata};
pub use breakdown::{
    check_consistency, default_items, missing_default_items, summarize, BreakdownCategory,
    BreakdownItem, BreakdownSummary, Consistency, ConsistencyDetails, CONSISTENCY_RULE,
};
pub use dispute::{
    validate_description, Dispute, DisputeError, DisputeStatus, ReasonCode, MAX_DESCRIPTION_CHARS,
};
pub use gate::{evaluate_anchor_gate, GateError, UnverifiedEvent};
pub use settlement::{Settlement, SettlementAmounts, SettlementError, SettlementStatus};
pub use transition::TransitionRecord;
