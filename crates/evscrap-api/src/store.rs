//! # Datastore
//!
//! The process-wide datastore, constructed once and injected through
//! [`AppState`](crate::state::AppState). Every table lives behind one
//! `parking_lot::RwLock`, so each method is a single atomic step.
//!
//! All operations are synchronous: the lock is never held across an
//! `.await`. Cross-request invariants are enforced here using two idioms:
//!
//! - **first writer wins** on unique keys: one settlement per target, one
//!   ack per (settlement, user), one active dispute per (settlement, user),
//!   one idempotency record per (scope, endpoint, key);
//! - **compare-and-swap** on status: settlement and dispute updates carry
//!   the status the caller read, and are refused if it has changed.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use evscrap_core::{
    AnchorProof, AnchorStatus, DisputeId, Event, EventId, EvidenceId, SettlementId, TargetRef,
    TenantId, UserSub,
};
use evscrap_state::{
    missing_default_items, Ack, BreakdownItem, Dispute, DisputeStatus, Settlement,
    SettlementStatus,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::idempotency::{
    IdempotencyKey, IdempotencyRecord, IdempotencyStatus, IdempotencyStore,
    IdempotencyStoreError, InsertOutcome,
};

// -- Errors --------------------------------------------------------------------

/// Datastore constraint violations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("settlement {0} already exists for this target")]
    SettlementExists(SettlementId),

    #[error("dispute {0} is already active for this settlement and user")]
    ActiveDisputeExists(DisputeId),

    #[error("settlement status changed concurrently: expected {expected}, found {actual}")]
    SettlementStatusChanged {
        expected: SettlementStatus,
        actual: SettlementStatus,
    },

    #[error("dispute status changed concurrently: expected {expected}, found {actual}")]
    DisputeStatusChanged {
        expected: DisputeStatus,
        actual: DisputeStatus,
    },
}

impl StoreError {
    fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

// -- Records -------------------------------------------------------------------

/// A registered case or lot, owned by one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRecord {
    pub target: TargetRef,
    pub tenant_id: TenantId,
    pub title: Option<String>,
    /// For lots: the case the lot belongs to.
    pub parent: Option<TargetRef>,
    pub created_by: UserSub,
    pub created_at: DateTime<Utc>,
}

/// A registered evidence reference, owned by one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub id: EvidenceId,
    pub tenant_id: TenantId,
    pub target: TargetRef,
    pub file_name: String,
    pub sha256: Option<String>,
    pub created_by: UserSub,
    pub created_at: DateTime<Utc>,
}

/// Result of [`Datastore::insert_ack`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckInsert {
    Created(Ack),
    /// An ack already existed for this (settlement, user).
    Existing(Ack),
}

/// Filter for dispute listings.
#[derive(Debug, Clone, Default)]
pub struct DisputeFilter {
    pub tenant_id: Option<TenantId>,
    pub status: Option<DisputeStatus>,
    pub settlement_id: Option<SettlementId>,
}

impl DisputeFilter {
    fn matches(&self, d: &Dispute) -> bool {
        self.tenant_id.as_ref().map_or(true, |t| &d.tenant_id == t)
            && self.status.map_or(true, |s| d.status == s)
            && self.settlement_id.map_or(true, |s| d.settlement_id == s)
    }
}

// -- Datastore -----------------------------------------------------------------

#[derive(Debug, Default)]
struct Tables {
    targets: HashMap<TargetRef, TargetRecord>,
    evidence: HashMap<EvidenceId, EvidenceRecord>,
    events: HashMap<EventId, Event>,
    proofs: HashMap<EventId, AnchorProof>,
    settlements: HashMap<SettlementId, Settlement>,
    settlement_by_target: HashMap<TargetRef, SettlementId>,
    breakdown: HashMap<SettlementId, Vec<BreakdownItem>>,
    acks: HashMap<(SettlementId, UserSub), Ack>,
    disputes: HashMap<DisputeId, Dispute>,
    idempotency: HashMap<IdempotencyKey, IdempotencyRecord>,
}

/// Thread-safe, cloneable datastore. Clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct Datastore {
    tables: Arc<RwLock<Tables>>,
}

impl Datastore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Targets & evidence ───────────────────────────────────────────

    pub fn insert_target(&self, record: TargetRecord) {
        self.tables.write().targets.insert(record.target, record);
    }

    pub fn get_target(&self, target: &TargetRef) -> Option<TargetRecord> {
        self.tables.read().targets.get(target).cloned()
    }

    pub fn insert_evidence(&self, record: EvidenceRecord) {
        self.tables.write().evidence.insert(record.id, record);
    }

    pub fn get_evidence(&self, id: &EvidenceId) -> Option<EvidenceRecord> {
        self.tables.read().evidence.get(id).cloned()
    }

    // ── Events ───────────────────────────────────────────────────────

    pub fn insert_event(&self, event: Event) {
        self.tables.write().events.insert(event.id, event);
    }

    pub fn get_event(&self, id: &EventId) -> Option<Event> {
        self.tables.read().events.get(id).cloned()
    }

    /// All events for `target`, newest `occurred_at` first.
    pub fn events_for_target(&self, target: &TargetRef) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .tables
            .read()
            .events
            .values()
            .filter(|e| &e.target == target)
            .cloned()
            .collect();
        events.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        events
    }

    /// Events that are not VERIFIED, oldest first.
    pub fn unverified_events(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .tables
            .read()
            .events
            .values()
            .filter(|e| !e.is_verified())
            .cloned()
            .collect();
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        events
    }

    /// Set a non-verified event back to PENDING. Returns the updated event,
    /// or `None` if it is already VERIFIED.
    pub fn mark_pending(&self, id: &EventId) -> Result<Option<Event>, StoreError> {
        let mut tables = self.tables.write();
        let event = tables
            .events
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("event", id))?;
        if event.is_verified() {
            return Ok(None);
        }
        event.anchor_status = AnchorStatus::Pending;
        Ok(Some(event.clone()))
    }

    /// Flip the event to VERIFIED and append its proof in one step.
    ///
    /// Idempotent: an event that already has a proof keeps it, and that
    /// proof is returned.
    pub fn mark_verified(
        &self,
        id: &EventId,
        txid: String,
        verified_at: DateTime<Utc>,
    ) -> Result<AnchorProof, StoreError> {
        let mut tables = self.tables.write();
        if let Some(existing) = tables.proofs.get(id) {
            return Ok(existing.clone());
        }
        let event = tables
            .events
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("event", id))?;
        event.anchor_status = AnchorStatus::Verified;
        event.anchor_txid = Some(txid.clone());
        let proof = AnchorProof {
            event_id: *id,
            txid,
            verified_at,
        };
        tables.proofs.insert(*id, proof.clone());
        Ok(proof)
    }

    /// Set the event FAILED unless it is already VERIFIED.
    pub fn mark_failed(&self, id: &EventId) -> Result<AnchorStatus, StoreError> {
        let mut tables = self.tables.write();
        let event = tables
            .events
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("event", id))?;
        if !event.is_verified() {
            event.anchor_status = AnchorStatus::Failed;
        }
        Ok(event.anchor_status)
    }

    pub fn get_proof(&self, event_id: &EventId) -> Option<AnchorProof> {
        self.tables.read().proofs.get(event_id).cloned()
    }

    // ── Settlements ──────────────────────────────────────────────────

    /// Insert a new settlement with its breakdown items.
    pub fn insert_settlement(
        &self,
        settlement: Settlement,
        items: Vec<BreakdownItem>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if let Some(existing) = tables.settlement_by_target.get(&settlement.target) {
            return Err(StoreError::SettlementExists(*existing));
        }
        tables
            .settlement_by_target
            .insert(settlement.target, settlement.id);
        tables.breakdown.insert(settlement.id, items);
        tables.settlements.insert(settlement.id, settlement);
        Ok(())
    }

    /// Undo [`Datastore::insert_settlement`] when the database write fails.
    pub fn remove_settlement(&self, id: &SettlementId) {
        let mut tables = self.tables.write();
        if let Some(settlement) = tables.settlements.remove(id) {
            tables.settlement_by_target.remove(&settlement.target);
        }
        tables.breakdown.remove(id);
    }

    pub fn get_settlement(&self, id: &SettlementId) -> Option<Settlement> {
        self.tables.read().settlements.get(id).cloned()
    }

    pub fn settlement_for_target(&self, target: &TargetRef) -> Option<Settlement> {
        let tables = self.tables.read();
        tables
            .settlement_by_target
            .get(target)
            .and_then(|id| tables.settlements.get(id))
            .cloned()
    }

    /// Settlements matching the filters, newest first.
    pub fn list_settlements(
        &self,
        tenant_id: Option<&TenantId>,
        status: Option<SettlementStatus>,
    ) -> Vec<Settlement> {
        let mut list: Vec<Settlement> = self
            .tables
            .read()
            .settlements
            .values()
            .filter(|s| tenant_id.map_or(true, |t| &s.tenant_id == t))
            .filter(|s| status.map_or(true, |st| s.status == st))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list
    }

    /// Replace a settlement if its stored status still equals `expected`.
    pub fn compare_and_swap_settlement(
        &self,
        updated: Settlement,
        expected: SettlementStatus,
    ) -> Result<Settlement, StoreError> {
        let mut tables = self.tables.write();
        let current = tables
            .settlements
            .get_mut(&updated.id)
            .ok_or_else(|| StoreError::not_found("settlement", updated.id))?;
        if current.status != expected {
            return Err(StoreError::SettlementStatusChanged {
                expected,
                actual: current.status,
            });
        }
        *current = updated.clone();
        Ok(updated)
    }

    /// Breakdown items for a settlement, in insertion order.
    pub fn breakdown_items(&self, settlement_id: &SettlementId) -> Vec<BreakdownItem> {
        self.tables
            .read()
            .breakdown
            .get(settlement_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Add any default items whose codes are missing. Returns the full item
    /// list and the newly inserted items.
    pub fn ensure_default_items(
        &self,
        settlement: &Settlement,
    ) -> (Vec<BreakdownItem>, Vec<BreakdownItem>) {
        let mut tables = self.tables.write();
        let items = tables.breakdown.entry(settlement.id).or_default();
        let inserted = missing_default_items(settlement, items);
        items.extend(inserted.iter().cloned());
        (items.clone(), inserted)
    }

    /// Append items, skipping codes already present. Returns the items
    /// actually inserted.
    pub fn insert_breakdown_items(
        &self,
        settlement_id: &SettlementId,
        new_items: Vec<BreakdownItem>,
    ) -> Vec<BreakdownItem> {
        let mut tables = self.tables.write();
        let items = tables.breakdown.entry(*settlement_id).or_default();
        let mut inserted = Vec::new();
        for item in new_items {
            if !items.iter().any(|existing| existing.code == item.code) {
                items.push(item.clone());
                inserted.push(item);
            }
        }
        inserted
    }

    // ── Acks ─────────────────────────────────────────────────────────

    pub fn get_ack(&self, settlement_id: &SettlementId, user_sub: &UserSub) -> Option<Ack> {
        self.tables
            .read()
            .acks
            .get(&(*settlement_id, user_sub.clone()))
            .cloned()
    }

    /// Insert an ack unless one exists for (settlement, user).
    pub fn insert_ack(&self, ack: Ack) -> AckInsert {
        let mut tables = self.tables.write();
        let key = (ack.settlement_id, ack.user_sub.clone());
        if let Some(existing) = tables.acks.get(&key) {
            return AckInsert::Existing(existing.clone());
        }
        tables.acks.insert(key, ack.clone());
        AckInsert::Created(ack)
    }

    pub fn remove_ack(&self, settlement_id: &SettlementId, user_sub: &UserSub) {
        self.tables
            .write()
            .acks
            .remove(&(*settlement_id, user_sub.clone()));
    }

    // ── Disputes ─────────────────────────────────────────────────────

    /// The active dispute for (settlement, user), if any.
    pub fn active_dispute(
        &self,
        settlement_id: &SettlementId,
        user_sub: &UserSub,
    ) -> Option<Dispute> {
        self.tables
            .read()
            .disputes
            .values()
            .find(|d| {
                &d.settlement_id == settlement_id && &d.user_sub == user_sub && d.status.is_active()
            })
            .cloned()
    }

    /// Insert a dispute unless an active one exists for (settlement, user).
    pub fn insert_dispute(&self, dispute: Dispute) -> Result<Dispute, StoreError> {
        let mut tables = self.tables.write();
        if let Some(active) = tables.disputes.values().find(|d| {
            d.settlement_id == dispute.settlement_id
                && d.user_sub == dispute.user_sub
                && d.status.is_active()
        }) {
            return Err(StoreError::ActiveDisputeExists(active.id));
        }
        tables.disputes.insert(dispute.id, dispute.clone());
        Ok(dispute)
    }

    pub fn remove_dispute(&self, id: &DisputeId) {
        self.tables.write().disputes.remove(id);
    }

    pub fn get_dispute(&self, id: &DisputeId) -> Option<Dispute> {
        self.tables.read().disputes.get(id).cloned()
    }

    /// Disputes matching `filter`, newest first.
    pub fn list_disputes(&self, filter: &DisputeFilter) -> Vec<Dispute> {
        let mut list: Vec<Dispute> = self
            .tables
            .read()
            .disputes
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list
    }

    /// Replace a dispute if its stored status still equals `expected`.
    pub fn compare_and_swap_dispute(
        &self,
        updated: Dispute,
        expected: DisputeStatus,
    ) -> Result<Dispute, StoreError> {
        let mut tables = self.tables.write();
        let current = tables
            .disputes
            .get_mut(&updated.id)
            .ok_or_else(|| StoreError::not_found("dispute", updated.id))?;
        if current.status != expected {
            return Err(StoreError::DisputeStatusChanged {
                expected,
                actual: current.status,
            });
        }
        *current = updated.clone();
        Ok(updated)
    }

    // ── Hydration ────────────────────────────────────────────────────

    /// Load persisted rows without re-checking constraints.
    pub fn restore(&self, snapshot: Snapshot) {
        let mut tables = self.tables.write();
        for t in snapshot.targets {
            tables.targets.insert(t.target, t);
        }
        for e in snapshot.evidence {
            tables.evidence.insert(e.id, e);
        }
        for e in snapshot.events {
            tables.events.insert(e.id, e);
        }
        for p in snapshot.proofs {
            tables.proofs.insert(p.event_id, p);
        }
        for s in snapshot.settlements {
            tables.settlement_by_target.insert(s.target, s.id);
            tables.settlements.insert(s.id, s);
        }
        for item in snapshot.breakdown_items {
            tables
                .breakdown
                .entry(item.settlement_id)
                .or_default()
                .push(item);
        }
        for a in snapshot.acks {
            tables.acks.insert((a.settlement_id, a.user_sub.clone()), a);
        }
        for d in snapshot.disputes {
            tables.disputes.insert(d.id, d);
        }
    }
}

/// Rows loaded from persistent storage on startup.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub targets: Vec<TargetRecord>,
    pub evidence: Vec<EvidenceRecord>,
    pub events: Vec<Event>,
    pub proofs: Vec<AnchorProof>,
    pub settlements: Vec<Settlement>,
    pub breakdown_items: Vec<BreakdownItem>,
    pub acks: Vec<Ack>,
    pub disputes: Vec<Dispute>,
}

// -- Idempotency records -------------------------------------------------------

impl IdempotencyStore for Datastore {
    fn find(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, IdempotencyStoreError> {
        let now = Utc::now();
        let mut tables = self.tables.write();
        let expired = tables
            .idempotency
            .get(key)
            .map_or(false, |record| record.expires_at <= now);
        if expired {
            tables.idempotency.remove(key);
        }
        Ok(tables.idempotency.get(key).cloned())
    }

    fn insert_in_progress(
        &self,
        record: IdempotencyRecord,
    ) -> Result<InsertOutcome, IdempotencyStoreError> {
        let mut tables = self.tables.write();
        let now = Utc::now();
        if let Some(existing) = tables.idempotency.get(&record.key) {
            if existing.expires_at > now {
                return Ok(InsertOutcome::AlreadyExists);
            }
        }
        tables.idempotency.insert(record.key.clone(), record);
        Ok(InsertOutcome::Inserted)
    }

    fn complete(
        &self,
        key: &IdempotencyKey,
        response_status: u16,
        response_body: serde_json::Value,
    ) -> Result<(), IdempotencyStoreError> {
        let mut tables = self.tables.write();
        let record = tables
            .idempotency
            .get_mut(key)
            .ok_or_else(|| {
                IdempotencyStoreError(format!("record {key} vanished before completion"))
            })?;
        record.status = IdempotencyStatus::Completed;
        record.response_status = Some(response_status);
        record.response_body = Some(response_body);
        Ok(())
    }

    fn remove(&self, key: &IdempotencyKey) -> Result<(), IdempotencyStoreError> {
        self.tables.write().idempotency.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evscrap_core::{EventPayload, EventType, TargetType};
    use evscrap_state::{
        check_consistency, default_items, AckMetadata, BreakdownCategory, ReasonCode,
        SettlementAmounts,
    };
    use serde_json::json;
    use uuid::Uuid;

    fn tenant() -> TenantId {
        TenantId::new("tenant-a").unwrap()
    }

    fn user() -> UserSub {
        UserSub::new("user-1").unwrap()
    }

    fn target() -> TargetRef {
        TargetRef::new(TargetType::Case, Uuid::new_v4())
    }

    fn event(target: TargetRef) -> Event {
        let payload = EventPayload::parse(EventType::CaseCreated, json!({})).unwrap();
        Event::record(tenant(), target, payload, None, None).unwrap()
    }

    fn settlement(target: TargetRef) -> Settlement {
        Settlement::new(
            tenant(),
            target,
            SettlementAmounts {
                total: 100_000,
                min: Some(80_000),
                bonus: Some(20_000),
            },
            None,
        )
        .unwrap()
    }

    fn committed(store: &Datastore) -> Settlement {
        let t = target();
        let mut e = event(t);
        e.anchor_status = AnchorStatus::Verified;
        let mut s = settlement(t);
        s.approve(std::slice::from_ref(&e), None).unwrap();
        s.commit("0xabc", std::slice::from_ref(&e), None).unwrap();
        store.insert_settlement(s.clone(), vec![]).unwrap();
        s
    }

    #[test]
    fn second_settlement_for_target_is_rejected() {
        let store = Datastore::new();
        let t = target();
        let first = settlement(t);
        store.insert_settlement(first.clone(), vec![]).unwrap();
        let err = store.insert_settlement(settlement(t), vec![]).unwrap_err();
        assert_eq!(err, StoreError::SettlementExists(first.id));
        assert_eq!(store.settlement_for_target(&t).unwrap().id, first.id);
    }

    #[test]
    fn settlement_cas_rejects_stale_status() {
        let store = Datastore::new();
        let s = settlement(target());
        store.insert_settlement(s.clone(), vec![]).unwrap();

        let mut ready = s.clone();
        ready.submit_for_approval(None).unwrap();
        store
            .compare_and_swap_settlement(ready.clone(), SettlementStatus::Draft)
            .unwrap();

        let err = store
            .compare_and_swap_settlement(ready, SettlementStatus::Draft)
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::SettlementStatusChanged {
                expected: SettlementStatus::Draft,
                actual: SettlementStatus::ReadyForApproval,
            }
        );
    }

    #[test]
    fn mark_verified_is_idempotent() {
        let store = Datastore::new();
        let e = event(target());
        store.insert_event(e.clone());

        let first = store.mark_verified(&e.id, "tx-1".into(), Utc::now()).unwrap();
        let second = store.mark_verified(&e.id, "tx-2".into(), Utc::now()).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            store.get_event(&e.id).unwrap().anchor_txid.as_deref(),
            Some("tx-1")
        );
    }

    #[test]
    fn mark_failed_never_downgrades_verified() {
        let store = Datastore::new();
        let e = event(target());
        store.insert_event(e.clone());
        store.mark_verified(&e.id, "tx".into(), Utc::now()).unwrap();
        assert_eq!(store.mark_failed(&e.id).unwrap(), AnchorStatus::Verified);
        assert!(store.mark_pending(&e.id).unwrap().is_none());
    }

    #[test]
    fn events_for_target_are_newest_first() {
        let store = Datastore::new();
        let t = target();
        let mut older = event(t);
        older.occurred_at = Utc::now() - chrono::Duration::hours(1);
        let newer = event(t);
        store.insert_event(older.clone());
        store.insert_event(newer.clone());
        store.insert_event(event(target()));

        let ids: Vec<EventId> = store.events_for_target(&t).iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }

    #[test]
    fn ack_insert_is_first_writer_wins() {
        let store = Datastore::new();
        let s = committed(&store);
        let first = Ack::new(&s, tenant(), user(), AckMetadata::default()).unwrap();
        let second = Ack::new(&s, tenant(), user(), AckMetadata::default()).unwrap();

        assert_eq!(store.insert_ack(first.clone()), AckInsert::Created(first.clone()));
        assert_eq!(store.insert_ack(second), AckInsert::Existing(first));
    }

    #[test]
    fn only_one_active_dispute_per_user() {
        let store = Datastore::new();
        let s = committed(&store);
        let open = |u: UserSub| {
            Dispute::open(&s, tenant(), u, ReasonCode::AmountError, "short", vec![]).unwrap()
        };

        let first = store.insert_dispute(open(user())).unwrap();
        let err = store.insert_dispute(open(user())).unwrap_err();
        assert_eq!(err, StoreError::ActiveDisputeExists(first.id));

        // Another user is unaffected.
        store
            .insert_dispute(open(UserSub::new("user-2").unwrap()))
            .unwrap();

        // Once resolved, a new dispute may be opened.
        let mut rejected = first.clone();
        rejected
            .transition(DisputeStatus::ResolvedRejected, None, None, None)
            .unwrap();
        store
            .compare_and_swap_dispute(rejected, DisputeStatus::Open)
            .unwrap();
        store.insert_dispute(open(user())).unwrap();
    }

    #[test]
    fn dispute_cas_leaves_status_unchanged_on_conflict() {
        let store = Datastore::new();
        let s = committed(&store);
        let d = store
            .insert_dispute(
                Dispute::open(&s, tenant(), user(), ReasonCode::Other, "x", vec![]).unwrap(),
            )
            .unwrap();

        let mut review = d.clone();
        review
            .transition(DisputeStatus::UnderReview, None, None, None)
            .unwrap();
        store
            .compare_and_swap_dispute(review.clone(), DisputeStatus::Open)
            .unwrap();

        let mut stale = d.clone();
        stale
            .transition(DisputeStatus::ResolvedRejected, None, None, None)
            .unwrap();
        let err = store
            .compare_and_swap_dispute(stale, DisputeStatus::Open)
            .unwrap_err();
        assert!(matches!(err, StoreError::DisputeStatusChanged { .. }));
        assert_eq!(
            store.get_dispute(&d.id).unwrap().status,
            DisputeStatus::UnderReview
        );
    }

    #[test]
    fn removed_settlement_frees_its_target() {
        let store = Datastore::new();
        let t = target();
        let s = settlement(t);
        store.insert_settlement(s.clone(), default_items(&s)).unwrap();

        store.remove_settlement(&s.id);
        assert!(store.get_settlement(&s.id).is_none());
        assert!(store.settlement_for_target(&t).is_none());
        assert!(store.breakdown_items(&s.id).is_empty());

        let again = settlement(t);
        store.insert_settlement(again, vec![]).unwrap();
    }

    #[test]
    fn ensure_default_items_is_idempotent() {
        let store = Datastore::new();
        let s = settlement(target());
        store.insert_settlement(s.clone(), vec![]).unwrap();

        let (items, inserted) = store.ensure_default_items(&s);
        assert_eq!(items.len(), 2);
        assert_eq!(inserted.len(), 2);

        let (items, inserted) = store.ensure_default_items(&s);
        assert_eq!(items.len(), 2);
        assert!(inserted.is_empty());
        assert!(check_consistency(&s, &items).ok);
    }

    #[test]
    fn one_unit_short_is_inconsistent() {
        let store = Datastore::new();
        let s = settlement(target());
        let mut items = default_items(&s);
        items[0].amount -= 1;
        store.insert_settlement(s.clone(), items).unwrap();

        let stored = store.breakdown_items(&s.id);
        assert_eq!(stored.iter().map(|i| i.amount).sum::<i64>(), 99_999);
        let consistency = check_consistency(&s, &stored);
        assert!(!consistency.ok);
        assert!(!consistency.details.total_ok);
        assert!(!consistency.details.min_ok);
        assert!(consistency.details.bonus_ok);
    }

    #[test]
    fn insert_breakdown_items_skips_duplicate_codes() {
        let store = Datastore::new();
        let s = settlement(target());
        store
            .insert_settlement(s.clone(), default_items(&s))
            .unwrap();
        let inserted = store.insert_breakdown_items(&s.id, default_items(&s));
        assert!(inserted.is_empty());
        let items = store.breakdown_items(&s.id);
        assert_eq!(items.len(), 2);
        assert!(items
            .iter()
            .any(|i| i.category == BreakdownCategory::Min));
    }

    #[test]
    fn dispute_filter_by_tenant_and_status() {
        let store = Datastore::new();
        let s = committed(&store);
        store
            .insert_dispute(
                Dispute::open(&s, tenant(), user(), ReasonCode::Other, "x", vec![]).unwrap(),
            )
            .unwrap();

        let all = store.list_disputes(&DisputeFilter::default());
        assert_eq!(all.len(), 1);
        let other_tenant = store.list_disputes(&DisputeFilter {
            tenant_id: Some(TenantId::new("tenant-b").unwrap()),
            ..Default::default()
        });
        assert!(other_tenant.is_empty());
        let resolved = store.list_disputes(&DisputeFilter {
            status: Some(DisputeStatus::ResolvedAccepted),
            ..Default::default()
        });
        assert!(resolved.is_empty());
    }
}
