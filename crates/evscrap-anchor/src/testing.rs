//! In-memory [`AnchorLedger`] for unit tests.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use evscrap_core::{
    AnchorProof, AnchorStatus, Event, EventId, EventPayload, EventType, TargetRef, TargetType,
    TenantId,
};
use parking_lot::Mutex;

use crate::error::LedgerError;
use crate::worker::AnchorLedger;

#[derive(Default)]
pub(crate) struct MemoryLedger {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    events: HashMap<EventId, Event>,
    proofs: Vec<AnchorProof>,
}

impl MemoryLedger {
    pub(crate) fn insert_pending(&self) -> EventId {
        let payload = EventPayload::parse(EventType::CaseCreated, serde_json::json!({}))
            .expect("empty object payload");
        let mut event = Event::record(
            TenantId::new("tenant-a").expect("tenant"),
            TargetRef::new(TargetType::Case, uuid::Uuid::new_v4()),
            payload,
            None,
            None,
        )
        .expect("record event");
        event.anchor_status = AnchorStatus::Pending;
        let id = event.id;
        self.inner.lock().events.insert(id, event);
        id
    }

    pub(crate) fn event(&self, id: EventId) -> Event {
        self.inner
            .lock()
            .events
            .get(&id)
            .cloned()
            .expect("event exists")
    }

    pub(crate) fn proof_count(&self, id: EventId) -> usize {
        self.inner
            .lock()
            .proofs
            .iter()
            .filter(|p| p.event_id == id)
            .count()
    }
}

impl AnchorLedger for MemoryLedger {
    async fn load_event(&self, id: EventId) -> Result<Option<Event>, LedgerError> {
        Ok(self.inner.lock().events.get(&id).cloned())
    }

    async fn mark_verified(
        &self,
        id: EventId,
        txid: String,
        verified_at: DateTime<Utc>,
    ) -> Result<AnchorProof, LedgerError> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.proofs.iter().find(|p| p.event_id == id) {
            return Ok(existing.clone());
        }
        let event = inner
            .events
            .get_mut(&id)
            .ok_or(LedgerError::EventNotFound(id))?;
        event.anchor_status = AnchorStatus::Verified;
        event.anchor_txid = Some(txid.clone());
        let proof = AnchorProof {
            event_id: id,
            txid,
            verified_at,
        };
        inner.proofs.push(proof.clone());
        Ok(proof)
    }

    async fn mark_failed(&self, id: EventId) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock();
        let event = inner
            .events
            .get_mut(&id)
            .ok_or(LedgerError::EventNotFound(id))?;
        if event.anchor_status != AnchorStatus::Verified {
            event.anchor_status = AnchorStatus::Failed;
        }
        Ok(())
    }
}
