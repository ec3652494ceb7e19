//! # Verification Queue
//!
//! An in-process stand-in for a managed message queue with at-least-once
//! delivery and a dead-letter list.
//!
//! Each message body is `{"eventId": "<uuid>"}`, optionally carrying the
//! `correlationId` of the request that created the event. A delivery whose
//! processing fails is redelivered after a delay until its receive count
//! reaches [`QueueConfig::max_receive_count`]; then it is dead-lettered.
//! Bodies that do not parse are dead-lettered immediately.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use evscrap_core::{EventId, RequestContext};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{QueueError, WorkerError};
use crate::provider::AnchorProvider;
use crate::worker::{AnchorLedger, AnchorWorker};

/// Body of a verification request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationMessage {
    #[serde(rename = "eventId")]
    pub event_id: EventId,
    #[serde(
        rename = "correlationId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub correlation_id: Option<String>,
}

impl VerificationMessage {
    pub fn new(event_id: EventId, ctx: &RequestContext) -> Self {
        Self {
            event_id,
            correlation_id: Some(ctx.correlation_id.clone()),
        }
    }

    /// Parse a raw message body. A missing or non-UUID `eventId` is an error.
    pub fn parse(body: &str) -> Result<Self, QueueError> {
        serde_json::from_str(body).map_err(|e| QueueError::InvalidMessage(e.to_string()))
    }

    pub fn to_body(&self) -> Result<String, QueueError> {
        serde_json::to_string(self).map_err(|e| QueueError::InvalidMessage(e.to_string()))
    }
}

/// One delivery of a message to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: Uuid,
    pub body: String,
    /// Number of times this message has been received, including this one.
    pub receive_count: u32,
}

/// A message that will not be delivered again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub message_id: Uuid,
    pub body: String,
    pub receive_count: u32,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

/// What happened to a delivery after it was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Completed,
    Redelivered,
    DeadLettered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub max_receive_count: u32,
    pub redelivery_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_receive_count: 3,
            redelivery_delay: Duration::from_millis(1000),
        }
    }
}

impl QueueConfig {
    /// Read `ANCHOR_MAX_RECEIVE_COUNT` and `ANCHOR_REDELIVERY_DELAY_MS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_receive_count = std::env::var("ANCHOR_MAX_RECEIVE_COUNT")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.max_receive_count);
        let redelivery_delay = std::env::var("ANCHOR_REDELIVERY_DELAY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.redelivery_delay);
        Self {
            max_receive_count,
            redelivery_delay,
        }
    }
}

/// Clonable handle to the verification queue.
#[derive(Clone)]
pub struct VerificationQueue {
    sender: mpsc::UnboundedSender<Delivery>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Delivery>>>,
    dead_letters: Arc<RwLock<Vec<DeadLetter>>>,
    config: QueueConfig,
}

impl std::fmt::Debug for VerificationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationQueue")
            .field("dead_letters", &self.dead_letters.read().len())
            .field("config", &self.config)
            .finish()
    }
}

impl Default for VerificationQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl VerificationQueue {
    pub fn new(config: QueueConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            dead_letters: Arc::new(RwLock::new(Vec::new())),
            config,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Enqueue a verification request for `event_id`.
    pub fn enqueue(&self, event_id: EventId, ctx: &RequestContext) -> Result<Uuid, QueueError> {
        let body = VerificationMessage::new(event_id, ctx).to_body()?;
        self.enqueue_raw(body)
    }

    /// Enqueue an arbitrary body. Used for redrives and tests.
    pub fn enqueue_raw(&self, body: impl Into<String>) -> Result<Uuid, QueueError> {
        let message_id = Uuid::new_v4();
        self.sender
            .send(Delivery {
                message_id,
                body: body.into(),
                receive_count: 0,
            })
            .map_err(|_| QueueError::Closed)?;
        Ok(message_id)
    }

    /// Wait for the next delivery.
    pub async fn receive(&self) -> Option<Delivery> {
        let mut rx = self.receiver.lock().await;
        rx.recv().await.map(Self::received)
    }

    /// Take the next delivery if one is ready.
    pub async fn try_receive(&self) -> Option<Delivery> {
        let mut rx = self.receiver.lock().await;
        rx.try_recv().ok().map(Self::received)
    }

    fn received(mut delivery: Delivery) -> Delivery {
        delivery.receive_count += 1;
        delivery
    }

    /// Return a failed delivery to the queue, or dead-letter it once it has
    /// been received `max_receive_count` times.
    pub fn retry(&self, delivery: Delivery, reason: &str) -> Disposition {
        if delivery.receive_count >= self.config.max_receive_count {
            self.dead_letter(delivery, reason);
            return Disposition::DeadLettered;
        }

        tracing::warn!(
            message_id = %delivery.message_id,
            receive_count = delivery.receive_count,
            reason,
            "redelivering verification request"
        );
        let delay = self.config.redelivery_delay;
        if delay.is_zero() {
            if self.sender.send(delivery).is_err() {
                tracing::error!("verification queue closed during redelivery");
            }
        } else {
            let sender = self.sender.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if sender.send(delivery).is_err() {
                    tracing::error!("verification queue closed during redelivery");
                }
            });
        }
        Disposition::Redelivered
    }

    pub fn dead_letter(&self, delivery: Delivery, reason: &str) {
        tracing::error!(
            message_id = %delivery.message_id,
            receive_count = delivery.receive_count,
            reason,
            "verification request dead-lettered"
        );
        self.dead_letters.write().push(DeadLetter {
            message_id: delivery.message_id,
            body: delivery.body,
            receive_count: delivery.receive_count,
            reason: reason.to_string(),
            dead_lettered_at: Utc::now(),
        });
    }

    /// Snapshot of the dead-letter list, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.read().clone()
    }
}

/// Pulls deliveries off the queue and drives the worker.
pub struct AnchorConsumer<P, L> {
    worker: AnchorWorker<P, L>,
    queue: VerificationQueue,
    timeout: Duration,
}

impl<P, L> Clone for AnchorConsumer<P, L> {
    fn clone(&self) -> Self {
        Self {
            worker: self.worker.clone(),
            queue: self.queue.clone(),
            timeout: self.timeout,
        }
    }
}

impl<P: AnchorProvider, L: AnchorLedger> AnchorConsumer<P, L> {
    pub fn new(worker: AnchorWorker<P, L>, queue: VerificationQueue, timeout: Duration) -> Self {
        Self {
            worker,
            queue,
            timeout,
        }
    }

    /// Handle one delivery to completion.
    pub async fn handle(&self, delivery: Delivery) -> Disposition {
        let message = match VerificationMessage::parse(&delivery.body) {
            Ok(m) => m,
            Err(e) => {
                self.queue.dead_letter(delivery, &e.to_string());
                return Disposition::DeadLettered;
            }
        };

        let ctx = match &message.correlation_id {
            Some(id) => RequestContext::new(id.clone()),
            None => RequestContext::new(delivery.message_id.to_string()),
        }
        .with_actor("anchor-worker");

        let result = tokio::time::timeout(self.timeout, self.worker.process(&ctx, message.event_id))
            .await
            .unwrap_or_else(|_| Err(WorkerError::Timeout(self.timeout)));

        match result {
            Ok(_) => Disposition::Completed,
            Err(err) => {
                if matches!(err, WorkerError::Timeout(_)) {
                    self.worker.mark_failed_best_effort(message.event_id).await;
                }
                self.queue.retry(delivery, &err.to_string())
            }
        }
    }

    /// Consume until the queue closes.
    pub async fn run(self, instance: usize) {
        tracing::info!(instance, "anchor consumer started");
        while let Some(delivery) = self.queue.receive().await {
            let span = tracing::info_span!(
                "anchor_consumer",
                instance,
                message_id = %delivery.message_id,
                receive_count = delivery.receive_count,
            );
            self.handle(delivery).instrument(span).await;
        }
        tracing::info!(instance, "anchor consumer stopped");
    }

    /// Spawn `instances` consumers onto the runtime.
    pub fn spawn(self, instances: usize) -> Vec<tokio::task::JoinHandle<()>> {
        (0..instances.max(1))
            .map(|instance| tokio::spawn(self.clone().run(instance)))
            .collect()
    }
}
