//! Settlement acknowledgements.
//!
//! One append-only record per (settlement, user), created only for a
//! COMMITTED settlement. Repeat acknowledgement returns the original record
//! unchanged; the datastore enforces uniqueness.

use chrono::{DateTime, Utc};
use evscrap_core::{AckId, SettlementId, TenantId, UserSub};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::settlement::{Settlement, SettlementStatus};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AckError {
    #[error("settlement is {status}, acknowledgement requires COMMITTED")]
    SettlementNotCommitted { status: SettlementStatus },
}

/// Request metadata captured with the acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckMetadata {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub id: AckId,
    pub settlement_id: SettlementId,
    pub tenant_id: TenantId,
    pub user_sub: UserSub,
    pub acked_at: DateTime<Utc>,
    pub metadata: AckMetadata,
}

impl Ack {
    pub fn new(
        settlement: &Settlement,
        tenant_id: TenantId,
        user_sub: UserSub,
        metadata: AckMetadata,
    ) -> Result<Self, AckError> {
        if settlement.status != SettlementStatus::Committed {
            return Err(AckError::SettlementNotCommitted {
                status: settlement.status,
            });
        }
        Ok(Self {
            id: AckId::new(),
            settlement_id: settlement.id,
            tenant_id,
            user_sub,
            acked_at: Utc::now(),
            metadata,
        })
    }
}
