//! [`AnchorLedger`] over the [`Datastore`], with Postgres write-through.
//!
//! The VERIFIED flip is written to Postgres before the in-memory store, so
//! a failed write leaves the event unverified everywhere and redelivery
//! retries it.

use chrono::{DateTime, Utc};
use evscrap_anchor::{AnchorLedger, LedgerError};
use evscrap_core::{AnchorProof, AnchorStatus, Event, EventId};
use sqlx::PgPool;

use crate::store::{Datastore, StoreError};

#[derive(Debug, Clone)]
pub struct StoreLedger {
    store: Datastore,
    db_pool: Option<PgPool>,
}

impl StoreLedger {
    pub fn new(store: Datastore, db_pool: Option<PgPool>) -> Self {
        Self { store, db_pool }
    }
}

fn ledger_error(id: EventId, err: StoreError) -> LedgerError {
    match err {
        StoreError::NotFound { .. } => LedgerError::EventNotFound(id),
        other => LedgerError::Unavailable(other.to_string()),
    }
}

impl AnchorLedger for StoreLedger {
    async fn load_event(&self, id: EventId) -> Result<Option<Event>, LedgerError> {
        Ok(self.store.get_event(&id))
    }

    async fn mark_verified(
        &self,
        id: EventId,
        txid: String,
        verified_at: DateTime<Utc>,
    ) -> Result<AnchorProof, LedgerError> {
        if let Some(existing) = self.store.get_proof(&id) {
            return Ok(existing);
        }
        if self.store.get_event(&id).is_none() {
            return Err(LedgerError::EventNotFound(id));
        }
        if let Some(pool) = &self.db_pool {
            let proof = AnchorProof {
                event_id: id,
                txid: txid.clone(),
                verified_at,
            };
            crate::db::events::mark_verified(pool, &proof)
                .await
                .map_err(|e| {
                    tracing::error!(event_id = %id, error = %e, "failed to persist anchor proof");
                    LedgerError::Unavailable(e.to_string())
                })?;
        }
        self.store
            .mark_verified(&id, txid, verified_at)
            .map_err(|e| ledger_error(id, e))
    }

    async fn mark_failed(&self, id: EventId) -> Result<(), LedgerError> {
        let status = self.store.mark_failed(&id).map_err(|e| ledger_error(id, e))?;
        if status == AnchorStatus::Verified {
            return Ok(());
        }
        if let Some(pool) = &self.db_pool {
            crate::db::events::set_anchor_status(pool, id, AnchorStatus::Failed)
                .await
                .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        }
        Ok(())
    }
}
