//! # Anchor Worker
//!
//! Processes one verification request: load the event, skip it if already
//! VERIFIED, call the provider, and record VERIFIED plus the proof in one
//! ledger operation. On any failure after the event is loaded, the event is
//! marked FAILED (best effort) and the error is returned so the delivery
//! can be retried.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use evscrap_core::{AnchorProof, Event, EventId, RequestContext};
use tracing::Instrument;

use crate::error::{LedgerError, WorkerError};
use crate::provider::AnchorProvider;

/// The event store as seen by the anchor worker.
pub trait AnchorLedger: Send + Sync + 'static {
    /// Load an event by id.
    fn load_event(
        &self,
        id: EventId,
    ) -> impl Future<Output = Result<Option<Event>, LedgerError>> + Send;

    /// Atomically set the event VERIFIED with `txid` and append its proof.
    ///
    /// Must be idempotent: if the event is already VERIFIED, the existing
    /// proof is returned and nothing is written.
    fn mark_verified(
        &self,
        id: EventId,
        txid: String,
        verified_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<AnchorProof, LedgerError>> + Send;

    /// Set the event FAILED. Must never downgrade a VERIFIED event.
    fn mark_failed(&self, id: EventId) -> impl Future<Output = Result<(), LedgerError>> + Send;
}

/// What a successful worker invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// The event was already VERIFIED; the provider was not called.
    AlreadyVerified { txid: Option<String> },
    /// The event was anchored and its proof recorded.
    Verified(AnchorProof),
}

/// Worker pool sizing and per-invocation timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub instances: usize,
    pub timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            instances: 2,
            timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Read `ANCHOR_WORKERS` and `ANCHOR_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let instances = std::env::var("ANCHOR_WORKERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.instances);
        let timeout = std::env::var("ANCHOR_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|n| *n > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout);
        Self { instances, timeout }
    }
}

/// Idempotent per-event anchoring.
pub struct AnchorWorker<P, L> {
    provider: Arc<P>,
    ledger: Arc<L>,
}

impl<P, L> Clone for AnchorWorker<P, L> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            ledger: Arc::clone(&self.ledger),
        }
    }
}

impl<P: AnchorProvider, L: AnchorLedger> AnchorWorker<P, L> {
    pub fn new(provider: Arc<P>, ledger: Arc<L>) -> Self {
        Self { provider, ledger }
    }

    /// Anchor `event_id`. Safe to call any number of times for the same event.
    pub async fn process(
        &self,
        ctx: &RequestContext,
        event_id: EventId,
    ) -> Result<WorkerOutcome, WorkerError> {
        let span = tracing::info_span!(
            "anchor_worker",
            correlation_id = %ctx.correlation_id,
            event_id = %event_id,
        );
        self.process_inner(event_id).instrument(span).await
    }

    async fn process_inner(&self, event_id: EventId) -> Result<WorkerOutcome, WorkerError> {
        let event = self
            .ledger
            .load_event(event_id)
            .await?
            .ok_or(WorkerError::EventNotFound(event_id))?;

        if event.is_verified() {
            tracing::info!("event already verified, skipping");
            return Ok(WorkerOutcome::AlreadyVerified {
                txid: event.anchor_txid,
            });
        }

        match self.anchor_event(&event).await {
            Ok(proof) => {
                tracing::info!(txid = %proof.txid, "event anchored");
                Ok(WorkerOutcome::Verified(proof))
            }
            Err(err) => {
                tracing::warn!(error = %err, "anchoring failed");
                self.mark_failed_best_effort(event_id).await;
                Err(err)
            }
        }
    }

    async fn anchor_event(&self, event: &Event) -> Result<AnchorProof, WorkerError> {
        let receipt = self.provider.anchor(&event.canonical_hash).await?;
        let proof = self
            .ledger
            .mark_verified(event.id, receipt.txid, Utc::now())
            .await?;
        Ok(proof)
    }

    /// Mark `event_id` FAILED, logging rather than returning any error.
    pub async fn mark_failed_best_effort(&self, event_id: EventId) {
        if let Err(e) = self.ledger.mark_failed(event_id).await {
            tracing::error!(%event_id, error = %e, "failed to mark event FAILED");
        }
    }
}
