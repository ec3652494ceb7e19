//! Transition audit records shared by the settlement and dispute machines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Record of a single state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord<S> {
    /// State before the transition.
    pub from_state: S,
    /// State after the transition.
    pub to_state: S,
    /// When the transition occurred.
    pub timestamp: DateTime<Utc>,
    /// Who performed it, when known.
    pub actor: Option<String>,
}

impl<S> TransitionRecord<S> {
    /// Record a transition happening now.
    pub fn now(from_state: S, to_state: S, actor: Option<String>) -> Self {
        Self {
            from_state,
            to_state,
            timestamp: Utc::now(),
            actor,
        }
    }
}
