//! # Dispute Lifecycle
//!
//! A tenant user may dispute a COMMITTED settlement.
//!
//! ```text
//! OPEN ──▶ UNDER_REVIEW ──▶ RESOLVED_ACCEPTED
//!   │          │   ▲
//!   │          ▼   │
//!   │       NEEDS_INFO
//!   │          │
//!   └──────────┴──▶ RESOLVED_REJECTED      (UNDER_REVIEW → RESOLVED_REJECTED too)
//! ```
//!
//! ## Optimistic concurrency
//!
//! [`Dispute::transition`] takes the caller's belief about the current
//! status. Reachability is validated from that belief first; only then is it
//! compared with the stored status. A stale belief is a
//! [`DisputeError::StatusConflict`], never a silent overwrite.

use chrono::{DateTime, Utc};
use evscrap_core::{DisputeId, EvidenceId, SettlementId, TenantId, UserSub};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::settlement::{Settlement, SettlementStatus};
use crate::transition::TransitionRecord;

/// Maximum description length, in characters.
pub const MAX_DESCRIPTION_CHARS: usize = 2000;

// ── Status ─────────────────────────────────────────────────────────────

/// Lifecycle status of a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeStatus {
    Open,
    UnderReview,
    NeedsInfo,
    ResolvedAccepted,
    ResolvedRejected,
}

impl DisputeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::UnderReview => "UNDER_REVIEW",
            Self::NeedsInfo => "NEEDS_INFO",
            Self::ResolvedAccepted => "RESOLVED_ACCEPTED",
            Self::ResolvedRejected => "RESOLVED_REJECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(Self::Open),
            "UNDER_REVIEW" => Some(Self::UnderReview),
            "NEEDS_INFO" => Some(Self::NeedsInfo),
            "RESOLVED_ACCEPTED" => Some(Self::ResolvedAccepted),
            "RESOLVED_REJECTED" => Some(Self::ResolvedRejected),
            _ => None,
        }
    }

    /// Resolved states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ResolvedAccepted | Self::ResolvedRejected)
    }

    /// At most one dispute per (settlement, user) may be in an active status.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Valid target states from this state.
    pub fn valid_transitions(&self) -> &'static [DisputeStatus] {
        match self {
            Self::Open => &[Self::UnderReview, Self::ResolvedRejected],
            Self::UnderReview => &[
                Self::ResolvedAccepted,
                Self::ResolvedRejected,
                Self::NeedsInfo,
            ],
            Self::NeedsInfo => &[Self::UnderReview],
            Self::ResolvedAccepted | Self::ResolvedRejected => &[],
        }
    }

    pub fn can_transition_to(&self, next: DisputeStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl std::fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Reason Code ────────────────────────────────────────────────────────

/// Why the user disputes the settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    AmountError,
    MissingItem,
    GradeDispute,
    Other,
}

impl ReasonCode {
    pub fn all() -> &'static [ReasonCode] {
        &[
            Self::AmountError,
            Self::MissingItem,
            Self::GradeDispute,
            Self::Other,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AmountError => "AMOUNT_ERROR",
            Self::MissingItem => "MISSING_ITEM",
            Self::GradeDispute => "GRADE_DISPUTE",
            Self::Other => "OTHER",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DisputeError> {
        Self::all()
            .iter()
            .copied()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| DisputeError::InvalidReasonCode(s.to_string()))
    }
}

// ── Errors ─────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DisputeError {
    /// Disputes can only be raised against a committed settlement.
    #[error("settlement is {status}, disputes require COMMITTED")]
    SettlementNotCommitted { status: SettlementStatus },

    #[error("reason_code must be one of AMOUNT_ERROR, MISSING_ITEM, GRADE_DISPUTE, OTHER (got {0:?})")]
    InvalidReasonCode(String),

    #[error("description must be 1-2000 characters (got {0})")]
    InvalidDescription(usize),

    /// `next` is not reachable from the believed current status.
    #[error("invalid dispute transition: {from} -> {to}")]
    InvalidTransition {
        from: DisputeStatus,
        to: DisputeStatus,
    },

    /// The stored status differs from the caller's belief.
    #[error("dispute status changed concurrently: expected {expected}, found {actual}")]
    StatusConflict {
        expected: DisputeStatus,
        actual: DisputeStatus,
    },
}

// ── Dispute ────────────────────────────────────────────────────────────

/// A dispute raised by one user against one settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    pub id: DisputeId,
    pub settlement_id: SettlementId,
    pub tenant_id: TenantId,
    pub user_sub: UserSub,
    pub reason_code: ReasonCode,
    pub description: String,
    pub evidence_ids: Vec<EvidenceId>,
    pub status: DisputeStatus,
    pub admin_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub transition_log: Vec<TransitionRecord<DisputeStatus>>,
}

impl Dispute {
    /// Open a dispute against `settlement`.
    ///
    /// Ownership, the one-active-dispute rule and evidence resolution are
    /// checked by the caller against the datastore.
    pub fn open(
        settlement: &Settlement,
        tenant_id: TenantId,
        user_sub: UserSub,
        reason_code: ReasonCode,
        description: &str,
        evidence_ids: Vec<EvidenceId>,
    ) -> Result<Self, DisputeError> {
        if settlement.status != SettlementStatus::Committed {
            return Err(DisputeError::SettlementNotCommitted {
                status: settlement.status,
            });
        }
        validate_description(description)?;
        let now = Utc::now();
        Ok(Self {
            id: DisputeId::new(),
            settlement_id: settlement.id,
            tenant_id,
            user_sub,
            reason_code,
            description: description.to_string(),
            evidence_ids,
            status: DisputeStatus::Open,
            admin_note: None,
            created_at: now,
            updated_at: now,
            resolved_at: None,
            transition_log: Vec::new(),
        })
    }

    /// Move to `next`, guarded by `expected` (defaults to the stored status).
    pub fn transition(
        &mut self,
        next: DisputeStatus,
        expected: Option<DisputeStatus>,
        admin_note: Option<String>,
        actor: Option<String>,
    ) -> Result<(), DisputeError> {
        let from = expected.unwrap_or(self.status);
        if !from.can_transition_to(next) {
            return Err(DisputeError::InvalidTransition { from, to: next });
        }
        if self.status != from {
            return Err(DisputeError::StatusConflict {
                expected: from,
                actual: self.status,
            });
        }
        let now = Utc::now();
        self.transition_log
            .push(TransitionRecord::now(self.status, next, actor));
        self.status = next;
        if admin_note.is_some() {
            self.admin_note = admin_note;
        }
        if next.is_terminal() {
            self.resolved_at = Some(now);
        }
        self.updated_at = now;
        Ok(())
    }
}

/// Check the 1-2000 character bound on a dispute description.
pub fn validate_description(description: &str) -> Result<(), DisputeError> {
    let len = description.trim().chars().count();
    if len == 0 || description.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(DisputeError::InvalidDescription(description.chars().count()));
    }
    Ok(())
}
