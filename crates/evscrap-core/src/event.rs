//! # Chain-of-Custody Events
//!
//! An [`Event`] is immutable apart from its anchor fields. Its payload is a
//! closed sum type: [`EventPayload`] carries one variant per [`EventType`],
//! and construction through [`EventPayload::parse`] is the only way to turn
//! untyped JSON into a payload.
//!
//! The canonical hash is computed once in [`Event::record`] from
//! `{targetType, targetId, event_type, payload, occurredAt}` and never
//! recomputed afterwards.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::canonical::{format_timestamp, CanonicalBytes};
use crate::digest::{sha256_digest, ContentDigest};
use crate::error::{CanonicalizationError, ValidationError};
use crate::identity::{EventId, TenantId, UserSub};
use crate::target::{TargetRef, TargetType};

// ── Event Type ──────────────────────────────────────────────────────────────

/// Discriminator of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Tenant onboarding submitted.
    TenantSubmitted,
    /// Tenant onboarding approved.
    TenantApproved,
    /// A case was opened.
    CaseCreated,
    /// A lot was registered.
    LotCreated,
    /// Initial (M0) price quote issued.
    #[serde(rename = "M0_QUOTED")]
    M0Quoted,
    /// Inbound inspection completed.
    InboundChecked,
    /// Reuse/recycle grading completed.
    GradingCompleted,
    /// Price delta against the quote calculated.
    DeltaCalculated,
    /// Settlement approved.
    SettlementApproved,
    /// Settlement committed.
    SettlementCommitted,
}

impl EventType {
    /// All event types, in lifecycle order.
    pub fn all() -> &'static [EventType] {
        &[
            Self::TenantSubmitted,
            Self::TenantApproved,
            Self::CaseCreated,
            Self::LotCreated,
            Self::M0Quoted,
            Self::InboundChecked,
            Self::GradingCompleted,
            Self::DeltaCalculated,
            Self::SettlementApproved,
            Self::SettlementCommitted,
        ]
    }

    /// The canonical string name of this event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TenantSubmitted => "TENANT_SUBMITTED",
            Self::TenantApproved => "TENANT_APPROVED",
            Self::CaseCreated => "CASE_CREATED",
            Self::LotCreated => "LOT_CREATED",
            Self::M0Quoted => "M0_QUOTED",
            Self::InboundChecked => "INBOUND_CHECKED",
            Self::GradingCompleted => "GRADING_COMPLETED",
            Self::DeltaCalculated => "DELTA_CALCULATED",
            Self::SettlementApproved => "SETTLEMENT_APPROVED",
            Self::SettlementCommitted => "SETTLEMENT_COMMITTED",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownEventType(s.to_string()))
    }
}

// ── Payload Variants ────────────────────────────────────────────────────────

/// Reuse / recycle grade assigned at grading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Grade {
    /// Best grade.
    A,
    /// Middle grade.
    B,
    /// Lowest grade.
    C,
    /// Could not be graded.
    Unknown,
}

/// Payload of `GRADING_COMPLETED`. Both grades are required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingCompleted {
    /// Reuse grade.
    pub reuse_grade: Grade,
    /// Recycle grade.
    pub recycle_grade: Grade,
    /// Additional client fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Validated event payload, one variant per [`EventType`].
///
/// Only `GRADING_COMPLETED` has required fields. Every other type carries
/// the client's object unchanged, so optional fields keep whatever JSON
/// type and explicit nulls the client sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    /// `TENANT_SUBMITTED`.
    TenantSubmitted(Map<String, Value>),
    /// `TENANT_APPROVED`.
    TenantApproved(Map<String, Value>),
    /// `CASE_CREATED`.
    CaseCreated(Map<String, Value>),
    /// `LOT_CREATED`.
    LotCreated(Map<String, Value>),
    /// `M0_QUOTED`.
    M0Quoted(Map<String, Value>),
    /// `INBOUND_CHECKED`.
    InboundChecked(Map<String, Value>),
    /// `GRADING_COMPLETED`.
    GradingCompleted(GradingCompleted),
    /// `DELTA_CALCULATED`.
    DeltaCalculated(Map<String, Value>),
    /// `SETTLEMENT_APPROVED`.
    SettlementApproved(Map<String, Value>),
    /// `SETTLEMENT_COMMITTED`.
    SettlementCommitted(Map<String, Value>),
}

impl EventPayload {
    /// Validate untyped JSON against the field set of `event_type`.
    pub fn parse(event_type: EventType, payload: Value) -> Result<Self, ValidationError> {
        let map = match payload {
            Value::Object(map) => map,
            _ => return Err(ValidationError::PayloadNotObject),
        };
        let invalid = |e: serde_json::Error| ValidationError::InvalidPayload {
            event_type: event_type.as_str().to_string(),
            reason: e.to_string(),
        };
        Ok(match event_type {
            EventType::TenantSubmitted => Self::TenantSubmitted(map),
            EventType::TenantApproved => Self::TenantApproved(map),
            EventType::CaseCreated => Self::CaseCreated(map),
            EventType::LotCreated => Self::LotCreated(map),
            EventType::M0Quoted => Self::M0Quoted(map),
            EventType::InboundChecked => Self::InboundChecked(map),
            EventType::GradingCompleted => Self::GradingCompleted(
                serde_json::from_value(Value::Object(map)).map_err(invalid)?,
            ),
            EventType::DeltaCalculated => Self::DeltaCalculated(map),
            EventType::SettlementApproved => Self::SettlementApproved(map),
            EventType::SettlementCommitted => Self::SettlementCommitted(map),
        })
    }

    /// The discriminator of this payload.
    pub fn event_type(&self) -> EventType {
        match self {
            Self::TenantSubmitted(_) => EventType::TenantSubmitted,
            Self::TenantApproved(_) => EventType::TenantApproved,
            Self::CaseCreated(_) => EventType::CaseCreated,
            Self::LotCreated(_) => EventType::LotCreated,
            Self::M0Quoted(_) => EventType::M0Quoted,
            Self::InboundChecked(_) => EventType::InboundChecked,
            Self::GradingCompleted(_) => EventType::GradingCompleted,
            Self::DeltaCalculated(_) => EventType::DeltaCalculated,
            Self::SettlementApproved(_) => EventType::SettlementApproved,
            Self::SettlementCommitted(_) => EventType::SettlementCommitted,
        }
    }

    /// Render the payload back to JSON.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ── Anchor Status ───────────────────────────────────────────────────────────

/// Verification state of an event against the external trust source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnchorStatus {
    /// Not yet submitted for verification.
    None,
    /// Verification request enqueued.
    Pending,
    /// Anchored; `anchor_txid` is set and an [`AnchorProof`] exists.
    Verified,
    /// Last attempt failed. Eligible for retry.
    Failed,
}

impl AnchorStatus {
    /// The canonical string name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Pending => "PENDING",
            Self::Verified => "VERIFIED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for AnchorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnchorStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(Self::None),
            "PENDING" => Ok(Self::Pending),
            "VERIFIED" => Ok(Self::Verified),
            "FAILED" => Ok(Self::Failed),
            other => Err(ValidationError::InvalidIdentifier {
                kind: "anchor status",
                value: other.to_string(),
            }),
        }
    }
}

/// Proof that an event hash was anchored. Append-only, one per verified event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorProof {
    /// The anchored event.
    pub event_id: EventId,
    /// Transaction identifier returned by the trust source.
    pub txid: String,
    /// When verification was recorded.
    pub verified_at: DateTime<Utc>,
}

// ── Event ───────────────────────────────────────────────────────────────────

/// An immutable chain-of-custody event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event identifier.
    pub id: EventId,
    /// Tenant owning the target.
    pub tenant_id: TenantId,
    /// Entity the event is about.
    pub target: TargetRef,
    /// Validated payload.
    pub payload: EventPayload,
    /// Business time of the event.
    pub occurred_at: DateTime<Utc>,
    /// Hex SHA-256 of the canonical event document.
    pub canonical_hash: String,
    /// Verification state.
    pub anchor_status: AnchorStatus,
    /// Set only while `anchor_status` is `VERIFIED`.
    pub anchor_txid: Option<String>,
    /// Subject that recorded the event.
    pub created_by: Option<UserSub>,
    /// Wall-clock creation time.
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Record a new event, computing its canonical hash.
    ///
    /// The event starts in [`AnchorStatus::None`]; it moves to `PENDING`
    /// once a verification request has been enqueued.
    pub fn record(
        tenant_id: TenantId,
        target: TargetRef,
        payload: EventPayload,
        occurred_at: Option<DateTime<Utc>>,
        created_by: Option<UserSub>,
    ) -> Result<Self, CanonicalizationError> {
        let now = Utc::now();
        let occurred_at = occurred_at.unwrap_or(now);
        let canonical_hash = canonical_event_hash(&target, &payload, &occurred_at)?.to_hex();
        Ok(Self {
            id: EventId::new(),
            tenant_id,
            target,
            payload,
            occurred_at,
            canonical_hash,
            anchor_status: AnchorStatus::None,
            anchor_txid: None,
            created_by,
            created_at: now,
        })
    }

    /// The event's discriminator.
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// Whether the event has been anchor-verified.
    pub fn is_verified(&self) -> bool {
        self.anchor_status == AnchorStatus::Verified
    }
}

#[derive(Serialize)]
struct CanonicalEventDocument<'a> {
    #[serde(rename = "targetType")]
    target_type: TargetType,
    #[serde(rename = "targetId")]
    target_id: &'a Uuid,
    event_type: EventType,
    payload: &'a EventPayload,
    #[serde(rename = "occurredAt")]
    occurred_at: String,
}

/// Compute the canonical hash of an event's identifying content.
pub fn canonical_event_hash(
    target: &TargetRef,
    payload: &EventPayload,
    occurred_at: &DateTime<Utc>,
) -> Result<ContentDigest, CanonicalizationError> {
    let doc = CanonicalEventDocument {
        target_type: target.target_type,
        target_id: &target.target_id,
        event_type: payload.event_type(),
        payload,
        occurred_at: format_timestamp(occurred_at),
    };
    Ok(sha256_digest(&CanonicalBytes::new(&doc)?))
}
