//! # Anchor Gate
//!
//! Money-moving settlement transitions require that the target has at least
//! one event and that every one of them is anchor-verified. The gate takes
//! the events as read at call time; callers must not cache its result.

use evscrap_core::{AnchorStatus, Event, EventId, EventType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An event blocking the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnverifiedEvent {
    pub id: EventId,
    pub event_type: EventType,
    pub anchor_status: AnchorStatus,
}

/// Why the gate refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// The target has no events at all.
    #[error("no events recorded for target")]
    NoEvents,

    /// Some events are not yet verified.
    #[error("{} event(s) not anchor-verified", .0.len())]
    Unverified(Vec<UnverifiedEvent>),
}

/// Evaluate the gate over the target's current events.
pub fn evaluate_anchor_gate(events: &[Event]) -> Result<(), GateError> {
    if events.is_empty() {
        return Err(GateError::NoEvents);
    }
    let unverified: Vec<UnverifiedEvent> = events
        .iter()
        .filter(|e| e.anchor_status != AnchorStatus::Verified)
        .map(|e| UnverifiedEvent {
            id: e.id,
            event_type: e.event_type(),
            anchor_status: e.anchor_status,
        })
        .collect();
    if unverified.is_empty() {
        Ok(())
    } else {
        Err(GateError::Unverified(unverified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evscrap_core::{EventPayload, TargetRef, TargetType, TenantId};
    use proptest::prelude::*;
    use serde_json::json;

    fn event(status: AnchorStatus) -> Event {
        let payload = EventPayload::parse(EventType::CaseCreated, json!({})).unwrap();
        let mut e = Event::record(
            TenantId::new("t1").unwrap(),
            TargetRef::new(TargetType::Case, uuid::Uuid::new_v4()),
            payload,
            None,
            None,
        )
        .unwrap();
        e.anchor_status = status;
        e
    }

    #[test]
    fn empty_target_never_passes() {
        assert_eq!(evaluate_anchor_gate(&[]), Err(GateError::NoEvents));
    }

    #[test]
    fn all_verified_passes() {
        let events = vec![event(AnchorStatus::Verified), event(AnchorStatus::Verified)];
        assert!(evaluate_anchor_gate(&events).is_ok());
    }

    #[test]
    fn reports_exactly_the_non_verified_events() {
        let verified = event(AnchorStatus::Verified);
        let pending = event(AnchorStatus::Pending);
        let failed = event(AnchorStatus::Failed);
        let events = vec![verified, pending.clone(), failed.clone()];
        match evaluate_anchor_gate(&events) {
            Err(GateError::Unverified(list)) => {
                let ids: Vec<_> = list.iter().map(|u| u.id).collect();
                assert_eq!(ids, vec![pending.id, failed.id]);
                assert_eq!(list[0].anchor_status, AnchorStatus::Pending);
                assert_eq!(list[1].event_type, EventType::CaseCreated);
            }
            other => panic!("expected Unverified, got {other:?}"),
        }
    }

    fn status_strategy() -> impl Strategy<Value = AnchorStatus> {
        prop_oneof![
            Just(AnchorStatus::None),
            Just(AnchorStatus::Pending),
            Just(AnchorStatus::Verified),
            Just(AnchorStatus::Failed),
        ]
    }

    proptest! {
        #[test]
        fn passes_iff_nonempty_and_all_verified(statuses in proptest::collection::vec(status_strategy(), 0..12)) {
            let events: Vec<Event> = statuses.iter().map(|s| event(*s)).collect();
            let expected_ok = !statuses.is_empty() && statuses.iter().all(|s| *s == AnchorStatus::Verified);
            let result = evaluate_anchor_gate(&events);
            prop_assert_eq!(result.is_ok(), expected_ok);
            if let Err(GateError::Unverified(list)) = result {
                let blocking = statuses.iter().filter(|s| **s != AnchorStatus::Verified).count();
                prop_assert_eq!(list.len(), blocking);
            }
        }
    }
}
