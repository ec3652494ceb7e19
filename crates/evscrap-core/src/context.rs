//! # Request Context
//!
//! Per-request context carried explicitly through HTTP handlers and anchor
//! worker invocations alike. There is no ambient (task-local) context.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation and actor information for one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Correlation identifier propagated in logs and the `x-correlation-id` header.
    pub correlation_id: String,
    /// Subject performing the work, if any.
    pub actor: Option<String>,
}

impl RequestContext {
    /// Context with the given correlation id.
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            actor: None,
        }
    }

    /// Context with a freshly generated correlation id.
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    /// Attach the acting subject.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::generate()
    }
}
