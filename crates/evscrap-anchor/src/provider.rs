//! # Anchor Provider
//!
//! The [`AnchorProvider`] trait is the interface to the external trust
//! source that anchors an event's canonical hash and returns a transaction
//! id. The trait is **sealed**: only providers defined in this crate may be
//! used, so nothing outside it can claim an anchor that never happened.
//!
//! [`SimulatedAnchorProvider`] stands in for a real chain. It sleeps for a
//! random delay, then succeeds with a configurable probability.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::AnchorError;

/// Result of a successful anchoring call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorReceipt {
    /// Transaction id assigned by the trust source.
    pub txid: String,
}

/// Interface to the external trust source.
///
/// Implementations must return `Ok` only when the hash has actually been
/// recorded; an `Ok` for an unrecorded hash would let a settlement pass
/// the anchor gate.
pub trait AnchorProvider: private::Sealed + Send + Sync + 'static {
    /// Anchor a hex-encoded canonical hash.
    fn anchor(
        &self,
        canonical_hash: &str,
    ) -> impl Future<Output = Result<AnchorReceipt, AnchorError>> + Send;
}

mod private {
    pub trait Sealed {}
    impl Sealed for super::SimulatedAnchorProvider {}
}

/// Tuning for the simulated provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    /// Probability in `[0, 1]` that a call succeeds.
    pub success_rate: f64,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            success_rate: 0.95,
            min_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(3000),
        }
    }
}

impl ProviderConfig {
    /// Read `ANCHOR_SUCCESS_RATE`, `ANCHOR_MIN_DELAY_MS` and
    /// `ANCHOR_MAX_DELAY_MS`, falling back to defaults for unset or
    /// unparseable values.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let success_rate = std::env::var("ANCHOR_SUCCESS_RATE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .map(|r| r.clamp(0.0, 1.0))
            .unwrap_or(defaults.success_rate);
        let min_delay = env_millis("ANCHOR_MIN_DELAY_MS").unwrap_or(defaults.min_delay);
        let max_delay = env_millis("ANCHOR_MAX_DELAY_MS")
            .unwrap_or(defaults.max_delay)
            .max(min_delay);
        Self {
            success_rate,
            min_delay,
            max_delay,
        }
    }

    /// No delay, always succeeds.
    pub fn instant() -> Self {
        Self {
            success_rate: 1.0,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// No delay, always fails.
    pub fn always_failing() -> Self {
        Self {
            success_rate: 0.0,
            ..Self::instant()
        }
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Simulated trust source used in development and tests.
#[derive(Debug, Clone, Default)]
pub struct SimulatedAnchorProvider {
    config: ProviderConfig,
}

impl SimulatedAnchorProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn pick_delay(&self) -> Duration {
        let min = self.config.min_delay.as_millis() as u64;
        let max = self.config.max_delay.as_millis() as u64;
        if max <= min {
            return self.config.min_delay;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    fn roll_success(&self) -> bool {
        let rate = self.config.success_rate;
        if rate.is_nan() || rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        rand::thread_rng().gen_bool(rate)
    }
}

impl AnchorProvider for SimulatedAnchorProvider {
    async fn anchor(&self, canonical_hash: &str) -> Result<AnchorReceipt, AnchorError> {
        let delay = self.pick_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if !self.roll_success() {
            tracing::warn!(canonical_hash, "simulated anchor call failed");
            return Err(AnchorError::Rejected(
                "Mock anchoring failed (simulated network error)".to_string(),
            ));
        }

        let txid = format!(
            "mock-tx-{}-{:08x}",
            chrono::Utc::now().timestamp_millis(),
            rand::random::<u32>()
        );
        tracing::debug!(canonical_hash, %txid, "simulated anchor recorded");
        Ok(AnchorReceipt { txid })
    }
}
