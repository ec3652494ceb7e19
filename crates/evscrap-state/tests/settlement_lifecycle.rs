//! Cross-module lifecycle: settlement gate, breakdown, ack and dispute on the
//! same target.

use evscrap_core::{
    AnchorStatus, Event, EventPayload, EventType, TargetRef, TargetType, TenantId, UserSub,
};
use evscrap_state::{
    check_consistency, default_items, Ack, AckMetadata, Dispute, DisputeError, DisputeStatus,
    GateError, ReasonCode, Settlement, SettlementAmounts, SettlementError, SettlementStatus,
};
use serde_json::json;

fn tenant() -> TenantId {
    TenantId::new("tenant-a").unwrap()
}

fn record(target: TargetRef, event_type: EventType, payload: serde_json::Value) -> Event {
    let payload = EventPayload::parse(event_type, payload).unwrap();
    let mut e = Event::record(tenant(), target, payload, None, None).unwrap();
    e.anchor_status = AnchorStatus::Pending;
    e
}

#[test]
fn pending_event_blocks_approval_until_verified() {
    let target = TargetRef::new(TargetType::Case, uuid::Uuid::new_v4());
    let mut created = record(target, EventType::CaseCreated, json!({}));
    created.anchor_status = AnchorStatus::Verified;
    let mut graded = record(
        target,
        EventType::GradingCompleted,
        json!({"reuse_grade": "A", "recycle_grade": "B"}),
    );

    let mut settlement = Settlement::new(
        tenant(),
        target,
        SettlementAmounts {
            total: 100_000,
            min: Some(80_000),
            bonus: Some(20_000),
        },
        None,
    )
    .unwrap();
    assert!(check_consistency(&settlement, &default_items(&settlement)).ok);

    let err = settlement
        .approve(&[created.clone(), graded.clone()], None)
        .unwrap_err();
    match err {
        SettlementError::Gate(GateError::Unverified(list)) => {
            assert_eq!(list.len(), 1);
            assert_eq!(list[0].id, graded.id);
            assert_eq!(list[0].event_type, EventType::GradingCompleted);
        }
        other => panic!("expected unverified gate error, got {other:?}"),
    }

    graded.anchor_status = AnchorStatus::Verified;
    let events = [created, graded];
    settlement.approve(&events, Some("admin".into())).unwrap();
    settlement.commit("0xreceipt", &events, Some("admin".into())).unwrap();
    assert_eq!(settlement.status, SettlementStatus::Committed);

    let ack = Ack::new(
        &settlement,
        tenant(),
        UserSub::new("user-1").unwrap(),
        AckMetadata::default(),
    )
    .unwrap();
    assert_eq!(ack.settlement_id, settlement.id);

    let mut dispute = Dispute::open(
        &settlement,
        tenant(),
        UserSub::new("user-1").unwrap(),
        ReasonCode::GradeDispute,
        "grade should be A",
        vec![],
    )
    .unwrap();
    dispute
        .transition(DisputeStatus::UnderReview, Some(DisputeStatus::Open), None, None)
        .unwrap();
    assert!(matches!(
        dispute.transition(DisputeStatus::ResolvedRejected, Some(DisputeStatus::Open), None, None),
        Err(DisputeError::StatusConflict { .. })
    ));
}
