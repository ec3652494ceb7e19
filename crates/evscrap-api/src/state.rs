//! # Application State
//!
//! Shared state for the Axum application, passed to all route handlers
//! via the `State` extractor.
//!
//! AppState holds:
//! - **Datastore**: the in-memory tables, authoritative for the process
//! - **Verification queue**: the anchor pipeline's message queue
//! - **Database pool**: optional Postgres write-through
//!
//! The anchor consumers are spawned from here so that they share the
//! same datastore and queue as the HTTP handlers.

use std::sync::Arc;

use evscrap_anchor::{
    AnchorConsumer, AnchorWorker, ProviderConfig, QueueConfig, SimulatedAnchorProvider,
    VerificationQueue, WorkerConfig,
};
use evscrap_core::{AnchorStatus, Event, EventId, RequestContext};
use sqlx::PgPool;

use crate::error::AppError;
use crate::ledger::StoreLedger;
use crate::store::{Datastore, Snapshot};

/// Application configuration.
///
/// Custom `Debug` redacts `auth_token`.
#[derive(Clone)]
pub struct AppConfig {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Shared bearer secret. If `None`, development-mode identity headers
    /// are accepted instead.
    pub auth_token: Option<String>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            auth_token: None,
        }
    }
}

impl AppConfig {
    /// Read `PORT` and `AUTH_TOKEN`.
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);
        let auth_token = std::env::var("AUTH_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());
        Self { port, auth_token }
    }
}

/// Anchor worker type used by the service.
pub type ServiceWorker = AnchorWorker<SimulatedAnchorProvider, StoreLedger>;

/// Shared application state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub store: Datastore,
    pub queue: VerificationQueue,
    /// `None` runs in-memory only.
    pub db_pool: Option<PgPool>,
    pub config: AppConfig,
}

impl AppState {
    /// In-memory state with default configuration.
    pub fn new() -> Self {
        Self::with_config(AppConfig::default(), QueueConfig::default(), None)
    }

    pub fn with_config(config: AppConfig, queue: QueueConfig, db_pool: Option<PgPool>) -> Self {
        Self {
            store: Datastore::new(),
            queue: VerificationQueue::new(queue),
            db_pool,
            config,
        }
    }

    /// Load persisted rows into the datastore. No-op without a pool.
    pub async fn hydrate_from_db(&self) -> Result<(), String> {
        let pool = match &self.db_pool {
            Some(pool) => pool,
            None => return Ok(()),
        };

        let snapshot = Snapshot {
            targets: crate::db::targets::load_targets(pool)
                .await
                .map_err(|e| format!("failed to load targets: {e}"))?,
            evidence: crate::db::targets::load_evidence(pool)
                .await
                .map_err(|e| format!("failed to load evidence: {e}"))?,
            events: crate::db::events::load_all(pool)
                .await
                .map_err(|e| format!("failed to load events: {e}"))?,
            proofs: crate::db::events::load_proofs(pool)
                .await
                .map_err(|e| format!("failed to load anchor proofs: {e}"))?,
            settlements: crate::db::settlements::load_all(pool)
                .await
                .map_err(|e| format!("failed to load settlements: {e}"))?,
            breakdown_items: crate::db::settlements::load_items(pool)
                .await
                .map_err(|e| format!("failed to load breakdown items: {e}"))?,
            acks: crate::db::acks::load_all(pool)
                .await
                .map_err(|e| format!("failed to load acks: {e}"))?,
            disputes: crate::db::disputes::load_all(pool)
                .await
                .map_err(|e| format!("failed to load disputes: {e}"))?,
        };

        tracing::info!(
            targets = snapshot.targets.len(),
            evidence = snapshot.evidence.len(),
            events = snapshot.events.len(),
            anchor_proofs = snapshot.proofs.len(),
            settlements = snapshot.settlements.len(),
            breakdown_items = snapshot.breakdown_items.len(),
            acks = snapshot.acks.len(),
            disputes = snapshot.disputes.len(),
            "Hydrated in-memory stores from database"
        );
        self.store.restore(snapshot);
        Ok(())
    }

    /// Mark `event_id` PENDING and enqueue a verification request.
    ///
    /// Returns `None` if the event is already VERIFIED. An enqueue failure
    /// is logged; the event stays PENDING and can be re-anchored.
    pub async fn request_anchor(
        &self,
        ctx: &RequestContext,
        event_id: EventId,
    ) -> Result<Option<Event>, AppError> {
        let Some(event) = self.store.mark_pending(&event_id)? else {
            return Ok(None);
        };
        if let Some(pool) = &self.db_pool {
            if let Err(e) =
                crate::db::events::set_anchor_status(pool, event_id, AnchorStatus::Pending).await
            {
                tracing::error!(%event_id, error = %e, "failed to persist PENDING anchor status");
            }
        }
        match self.queue.enqueue(event_id, ctx) {
            Ok(message_id) => {
                tracing::info!(%event_id, %message_id, "verification request enqueued");
            }
            Err(e) => {
                tracing::error!(%event_id, error = %e, "failed to enqueue verification request");
            }
        }
        Ok(Some(event))
    }

    /// Re-enqueue every event that is not VERIFIED. Run once at startup so
    /// that messages lost with the previous process are recovered.
    pub async fn requeue_unverified(&self) -> usize {
        let ctx = RequestContext::generate().with_actor("startup");
        let mut count = 0;
        for event in self.store.unverified_events() {
            match self.request_anchor(&ctx, event.id).await {
                Ok(Some(_)) => count += 1,
                Ok(None) => {}
                Err(e) => tracing::warn!(event_id = %event.id, error = %e, "requeue skipped"),
            }
        }
        if count > 0 {
            tracing::info!(count, "re-enqueued unverified events");
        }
        count
    }

    /// Build an anchor worker over this state's datastore.
    pub fn anchor_worker(&self, provider: ProviderConfig) -> ServiceWorker {
        AnchorWorker::new(
            Arc::new(SimulatedAnchorProvider::new(provider)),
            Arc::new(StoreLedger::new(self.store.clone(), self.db_pool.clone())),
        )
    }

    /// Spawn the anchor consumers onto the runtime.
    pub fn spawn_anchor_consumers(
        &self,
        provider: ProviderConfig,
        worker: WorkerConfig,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let consumer =
            AnchorConsumer::new(self.anchor_worker(provider), self.queue.clone(), worker.timeout);
        consumer.spawn(worker.instances)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evscrap_core::{EventPayload, EventType, TargetRef, TargetType, TenantId};

    fn stored_event(state: &AppState) -> EventId {
        let payload = EventPayload::parse(EventType::CaseCreated, serde_json::json!({})).unwrap();
        let event = Event::record(
            TenantId::new("tenant-a").unwrap(),
            TargetRef::new(TargetType::Case, uuid::Uuid::new_v4()),
            payload,
            None,
            None,
        )
        .unwrap();
        let id = event.id;
        state.store.insert_event(event);
        id
    }

    #[test]
    fn config_debug_redacts_token() {
        let config = AppConfig {
            port: 9000,
            auth_token: Some("super-secret".into()),
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn request_anchor_marks_pending_and_enqueues() {
        let state = AppState::new();
        let id = stored_event(&state);

        let event = state
            .request_anchor(&RequestContext::generate(), id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.anchor_status, AnchorStatus::Pending);

        let delivery = state.queue.try_receive().await.unwrap();
        assert!(delivery.body.contains(&id.to_string()));
    }

    #[tokio::test]
    async fn request_anchor_skips_verified_events() {
        let state = AppState::new();
        let id = stored_event(&state);
        state
            .store
            .mark_verified(&id, "tx-1".into(), chrono::Utc::now())
            .unwrap();

        let outcome = state
            .request_anchor(&RequestContext::generate(), id)
            .await
            .unwrap();
        assert!(outcome.is_none());
        assert!(state.queue.try_receive().await.is_none());
    }

    #[tokio::test]
    async fn requeue_covers_every_unverified_event() {
        let state = AppState::new();
        stored_event(&state);
        stored_event(&state);
        let verified = stored_event(&state);
        state
            .store
            .mark_verified(&verified, "tx".into(), chrono::Utc::now())
            .unwrap();

        assert_eq!(state.requeue_unverified().await, 2);
    }

    #[tokio::test]
    async fn spawned_consumers_verify_enqueued_events() {
        let state = AppState::new();
        let id = stored_event(&state);
        state
            .spawn_anchor_consumers(ProviderConfig::instant(), WorkerConfig::default());
        state
            .request_anchor(&RequestContext::generate(), id)
            .await
            .unwrap();

        for _ in 0..100 {
            if state.store.get_event(&id).unwrap().is_verified() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("event was not verified");
    }
}
