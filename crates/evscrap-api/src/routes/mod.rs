//! # API Route Modules
//!
//! - `targets`: case, lot and evidence registration (ownership anchors).
//! - `events`: chain-of-custody events, timelines, anchor proofs, and the
//!   admin anchor audit / re-anchor surface.
//! - `settlements`: settlement creation, the anchor-gated approve/commit
//!   transitions, breakdown views, acknowledgements.
//! - `disputes`: dispute creation and the admin review state machine.
//! - `health`: unauthenticated liveness probe.
//!
//! User routes live under `/user/v1`, operator routes under `/admin/v1`.
//! Target paths take the form `/{target_type}/{target_id}` where the type is
//! `CASE` or `LOT` (case-insensitive).

pub mod disputes;
pub mod events;
pub mod health;
pub mod settlements;
pub mod targets;

use evscrap_core::{SettlementId, TargetRef};
use evscrap_state::Settlement;
use serde::Deserialize;

use crate::auth::UserPrincipal;
use crate::error::AppError;
use crate::state::AppState;
use crate::store::TargetRecord;

/// Raw `/{target_type}/{target_id}` path segments.
#[derive(Debug, Deserialize)]
pub struct TargetPath {
    pub target_type: String,
    pub target_id: String,
}

impl TargetPath {
    pub fn target(&self) -> Result<TargetRef, AppError> {
        Ok(TargetRef::parse(&self.target_type, &self.target_id)?)
    }
}

/// The caller's own target. Targets of other tenants are reported as absent.
pub(crate) fn owned_target(
    state: &AppState,
    user: &UserPrincipal,
    target: &TargetRef,
) -> Result<TargetRecord, AppError> {
    state
        .store
        .get_target(target)
        .filter(|record| record.tenant_id == user.tenant_id)
        .ok_or_else(|| AppError::NotFound(format!("Target {target} not found")))
}

/// A settlement the caller's tenant owns. Another tenant's settlement is 403.
pub(crate) fn owned_settlement(
    state: &AppState,
    user: &UserPrincipal,
    id: &SettlementId,
) -> Result<Settlement, AppError> {
    let settlement = state
        .store
        .get_settlement(id)
        .ok_or_else(|| AppError::NotFound(format!("Settlement {id} not found")))?;
    if settlement.tenant_id != user.tenant_id {
        return Err(AppError::Forbidden(
            "settlement belongs to another tenant".into(),
        ));
    }
    Ok(settlement)
}

/// Log a failed write-through and map it to a 500.
pub(crate) fn persist_failed(resource: &str, id: impl std::fmt::Display, err: sqlx::Error) -> AppError {
    tracing::error!(resource, id = %id, error = %err, "failed to persist to database");
    AppError::Internal(format!("failed to persist {resource}"))
}
