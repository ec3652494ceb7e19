//! # Settlement Lifecycle
//!
//! ```text
//! DRAFT ──submit_for_approval()──▶ READY_FOR_APPROVAL
//!   │                                     │
//!   └──────────────approve()──────────────┤   gate: ≥1 event, all VERIFIED
//!                                         ▼
//!                                     APPROVED ──commit(receipt_hash)──▶ COMMITTED (terminal)
//!                                                 gate re-evaluated
//! ```
//!
//! Status is checked before the gate, so a commit on a DRAFT settlement
//! reports an invalid transition even when events are unverified.

use chrono::{DateTime, Utc};
use evscrap_core::{Event, SettlementId, TargetRef, TenantId, UserSub};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gate::{evaluate_anchor_gate, GateError};
use crate::transition::TransitionRecord;

// ─── Status ──────────────────────────────────────────────────────────

/// Settlement lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStatus {
    /// Created, amounts may still be reviewed.
    Draft,
    /// Submitted by the tenant for approval.
    ReadyForApproval,
    /// Approved by an administrator.
    Approved,
    /// Funds committed. Terminal.
    Committed,
}

impl SettlementStatus {
    /// The canonical string name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::ReadyForApproval => "READY_FOR_APPROVAL",
            Self::Approved => "APPROVED",
            Self::Committed => "COMMITTED",
        }
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed)
    }

    /// Valid target states from this state.
    pub fn valid_transitions(&self) -> &'static [SettlementStatus] {
        match self {
            Self::Draft => &[Self::ReadyForApproval, Self::Approved],
            Self::ReadyForApproval => &[Self::Approved],
            Self::Approved => &[Self::Committed],
            Self::Committed => &[],
        }
    }

    /// Parse a stored status name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(Self::Draft),
            "READY_FOR_APPROVAL" => Some(Self::ReadyForApproval),
            "APPROVED" => Some(Self::Approved),
            "COMMITTED" => Some(Self::Committed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Errors ──────────────────────────────────────────────────────────

/// Errors from settlement operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    /// The transition is not reachable from the current status.
    #[error("invalid settlement transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status.
        from: SettlementStatus,
        /// Attempted status.
        to: SettlementStatus,
    },

    /// The anchor gate refused.
    #[error("anchor gate: {0}")]
    Gate(#[from] GateError),

    /// Commit requires a non-empty receipt hash.
    #[error("receipt_hash is required")]
    MissingReceiptHash,

    /// Amounts failed validation.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

// ─── Settlement ──────────────────────────────────────────────────────

/// Requested amounts for a new settlement, in minor currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementAmounts {
    /// Total payout. Must be positive.
    pub total: i64,
    /// Guaranteed minimum. Defaults to `total`.
    pub min: Option<i64>,
    /// Grade bonus. Defaults to zero.
    pub bonus: Option<i64>,
}

/// A settlement for one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub id: SettlementId,
    pub tenant_id: TenantId,
    pub target: TargetRef,
    pub status: SettlementStatus,
    pub amount_total: i64,
    pub amount_min: i64,
    pub amount_bonus: i64,
    /// Set only at commit.
    pub receipt_hash: Option<String>,
    pub created_by: Option<UserSub>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub committed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub transition_log: Vec<TransitionRecord<SettlementStatus>>,
}

impl Settlement {
    /// Create a DRAFT settlement.
    pub fn new(
        tenant_id: TenantId,
        target: TargetRef,
        amounts: SettlementAmounts,
        created_by: Option<UserSub>,
    ) -> Result<Self, SettlementError> {
        if amounts.total <= 0 {
            return Err(SettlementError::InvalidAmount(
                "amount_total is required and must be a positive number".into(),
            ));
        }
        let amount_min = amounts.min.unwrap_or(amounts.total);
        let amount_bonus = amounts.bonus.unwrap_or(0);
        if amount_min < 0 || amount_bonus < 0 {
            return Err(SettlementError::InvalidAmount(
                "amount_min and amount_bonus must not be negative".into(),
            ));
        }
        let now = Utc::now();
        Ok(Self {
            id: SettlementId::new(),
            tenant_id,
            target,
            status: SettlementStatus::Draft,
            amount_total: amounts.total,
            amount_min,
            amount_bonus,
            receipt_hash: None,
            created_by,
            approved_by: None,
            approved_at: None,
            committed_at: None,
            created_at: now,
            updated_at: now,
            transition_log: Vec::new(),
        })
    }

    /// DRAFT → READY_FOR_APPROVAL.
    pub fn submit_for_approval(&mut self, actor: Option<String>) -> Result<(), SettlementError> {
        self.require_transition(SettlementStatus::ReadyForApproval)?;
        self.do_transition(SettlementStatus::ReadyForApproval, actor);
        Ok(())
    }

    /// DRAFT | READY_FOR_APPROVAL → APPROVED, if the gate passes over `events`.
    pub fn approve(&mut self, events: &[Event], actor: Option<String>) -> Result<(), SettlementError> {
        self.require_transition(SettlementStatus::Approved)?;
        evaluate_anchor_gate(events)?;
        self.approved_by = actor.clone();
        self.approved_at = Some(Utc::now());
        self.do_transition(SettlementStatus::Approved, actor);
        Ok(())
    }

    /// APPROVED → COMMITTED, re-evaluating the gate over `events`.
    pub fn commit(
        &mut self,
        receipt_hash: &str,
        events: &[Event],
        actor: Option<String>,
    ) -> Result<(), SettlementError> {
        if receipt_hash.trim().is_empty() {
            return Err(SettlementError::MissingReceiptHash);
        }
        self.require_transition(SettlementStatus::Committed)?;
        evaluate_anchor_gate(events)?;
        self.receipt_hash = Some(receipt_hash.trim().to_string());
        self.committed_at = Some(Utc::now());
        self.do_transition(SettlementStatus::Committed, actor);
        Ok(())
    }

    fn require_transition(&self, to: SettlementStatus) -> Result<(), SettlementError> {
        if self.status.valid_transitions().contains(&to) {
            Ok(())
        } else {
            Err(SettlementError::InvalidTransition {
                from: self.status,
                to,
            })
        }
    }

    fn do_transition(&mut self, to: SettlementStatus, actor: Option<String>) {
        self.transition_log
            .push(TransitionRecord::now(self.status, to, actor));
        self.status = to;
        self.updated_at = Utc::now();
    }
}
