//! # Identity Newtypes
//!
//! Distinct identifier types for every record kind. UUID-based identifiers
//! are always valid by construction; [`TenantId`] and [`UserSub`] come from
//! the authenticated principal and only reject blank input.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

// ---------------------------------------------------------------------------
// UUID-based identifiers
// ---------------------------------------------------------------------------

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create an identifier from an existing UUID.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Access the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|_| ValidationError::InvalidIdentifier {
                        kind: $kind,
                        value: s.to_string(),
                    })
            }
        }
    };
}

uuid_id!(
    /// Identifier of a chain-of-custody event.
    EventId,
    "event id"
);
uuid_id!(
    /// Identifier of a settlement.
    SettlementId,
    "settlement id"
);
uuid_id!(
    /// Identifier of a dispute raised against a committed settlement.
    DisputeId,
    "dispute id"
);
uuid_id!(
    /// Identifier of a settlement acknowledgement.
    AckId,
    "ack id"
);
uuid_id!(
    /// Identifier of a settlement breakdown line item.
    BreakdownItemId,
    "breakdown item id"
);
uuid_id!(
    /// Identifier of a registered evidence object.
    EvidenceId,
    "evidence id"
);

// ---------------------------------------------------------------------------
// Principal-derived identifiers
// ---------------------------------------------------------------------------

/// Tenant that owns cases, lots, evidence and settlements.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Create a tenant identifier, rejecting blank input.
    pub fn new(s: impl Into<String>) -> Result<Self, ValidationError> {
        let s = s.into();
        if s.trim().is_empty() {
            return Err(ValidationError::EmptyField("tenant_id"));
        }
        Ok(Self(s))
    }

    /// Access the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Subject claim of an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserSub(String);

impl UserSub {
    /// Create a user subject, rejecting blank input.
    pub fn new(s: impl Into<String>) -> Result<Self, ValidationError> {
        let s = s.into();
        if s.trim().is_empty() {
            return Err(ValidationError::EmptyField("user_sub"));
        }
        Ok(Self(s))
    }

    /// Access the subject as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserSub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
