use chrono::Utc;
use daara_core::{
    DeleteOutcome, DomainEvent, DomainEventKind, EventStore, InsertOutcome, LedgerStore,
    Obligation, ObligationKind, PaymentMethod, Resolution, ResolveOutcome, Settlement,
    SettlementFilter, SettlementStatus, UpdateGuard, UpdateOutcome,
};
use daara_store::{InMemoryEventStore, InMemoryLedgerStore};
use rust_decimal::Decimal;
use uuid::Uuid;

fn obligation(amount_due: i64) -> Obligation {
    Obligation {
        id: Uuid::new_v4(),
        kind: ObligationKind::CampaignPledge,
        owner_member_id: Some("awa".to_string()),
        program_id: Uuid::new_v4(),
        slot: None,
        label: "Campaign".to_string(),
        amount_due: Decimal::from(amount_due),
        due_period: None,
        created_at: Utc::now(),
    }
}

fn pending(obligation_id: Uuid, amount: i64) -> Settlement {
    Settlement {
        id: Uuid::new_v4(),
        obligation_id,
        declared_by_member_id: "awa".to_string(),
        amount: Decimal::from(amount),
        method: PaymentMethod::Cash,
        external_reference: None,
        idempotency_key: None,
        on_behalf: false,
        status: SettlementStatus::Pending,
        rejection_note: None,
        declared_at: Utc::now(),
        resolved_at: None,
        resolved_by: None,
    }
}

fn confirm_against(total: i64) -> Resolution {
    Resolution::Confirm {
        expected_confirmed_total: Decimal::from(total),
    }
}

#[tokio::test]
async fn confirmation_applies_only_against_the_expected_total() {
    let store = InMemoryLedgerStore::new();
    let target = obligation(1_000);
    store.insert_obligation(&target).await.unwrap();
    let first = pending(target.id, 400);
    let second = pending(target.id, 400);
    store.insert_settlement(&first).await.unwrap();
    store.insert_settlement(&second).await.unwrap();

    let outcome = store
        .resolve_settlement(first.id, "validator", Utc::now(), &confirm_against(0))
        .await
        .unwrap();
    let ResolveOutcome::Applied(confirmed) = outcome else {
        panic!("expected the first confirmation to apply, got {outcome:?}");
    };
    assert_eq!(confirmed.status, SettlementStatus::Confirmed);
    assert_eq!(confirmed.resolved_by.as_deref(), Some("validator"));

    let stale = store
        .resolve_settlement(second.id, "validator", Utc::now(), &confirm_against(0))
        .await
        .unwrap();
    assert_eq!(
        stale,
        ResolveOutcome::TotalChanged {
            current_total: Decimal::from(400)
        }
    );
    assert!(store.settlement(second.id).await.unwrap().unwrap().is_pending());

    let again = store
        .resolve_settlement(first.id, "other", Utc::now(), &confirm_against(400))
        .await
        .unwrap();
    assert!(matches!(again, ResolveOutcome::NotPending(ref s) if s.resolved_by.as_deref() == Some("validator")));

    let missing = store
        .resolve_settlement(Uuid::new_v4(), "validator", Utc::now(), &confirm_against(0))
        .await
        .unwrap();
    assert_eq!(missing, ResolveOutcome::Missing);
}

#[tokio::test]
async fn rejection_records_the_note() {
    let store = InMemoryLedgerStore::new();
    let target = obligation(1_000);
    store.insert_obligation(&target).await.unwrap();
    let settlement = pending(target.id, 100);
    store.insert_settlement(&settlement).await.unwrap();

    let outcome = store
        .resolve_settlement(
            settlement.id,
            "validator",
            Utc::now(),
            &Resolution::Reject {
                note: Some("receipt missing".to_string()),
            },
        )
        .await
        .unwrap();
    let ResolveOutcome::Applied(rejected) = outcome else {
        panic!("expected rejection to apply, got {outcome:?}");
    };
    assert_eq!(rejected.status, SettlementStatus::Rejected);
    assert_eq!(rejected.rejection_note.as_deref(), Some("receipt missing"));
}

#[tokio::test]
async fn guarded_update_refuses_obligations_with_confirmed_money() {
    let store = InMemoryLedgerStore::new();
    let target = obligation(1_000);
    store.insert_obligation(&target).await.unwrap();

    let mut revised = target.clone();
    revised.amount_due = Decimal::from(2_000);
    assert_eq!(
        store
            .update_obligation(&revised, UpdateGuard::NoConfirmedSettlements)
            .await
            .unwrap(),
        UpdateOutcome::Applied
    );

    let settlement = pending(target.id, 100);
    store.insert_settlement(&settlement).await.unwrap();
    store
        .resolve_settlement(settlement.id, "validator", Utc::now(), &confirm_against(0))
        .await
        .unwrap();

    revised.amount_due = Decimal::from(3_000);
    assert_eq!(
        store
            .update_obligation(&revised, UpdateGuard::NoConfirmedSettlements)
            .await
            .unwrap(),
        UpdateOutcome::HasConfirmedSettlements
    );
    assert_eq!(
        store
            .update_obligation(&revised, UpdateGuard::Unconditional)
            .await
            .unwrap(),
        UpdateOutcome::Applied
    );

    let unknown = obligation(10);
    assert_eq!(
        store
            .update_obligation(&unknown, UpdateGuard::Unconditional)
            .await
            .unwrap(),
        UpdateOutcome::Missing
    );
}

#[tokio::test]
async fn delete_counts_settlements_of_every_status() {
    let store = InMemoryLedgerStore::new();
    let target = obligation(1_000);
    store.insert_obligation(&target).await.unwrap();
    store.insert_settlement(&pending(target.id, 10)).await.unwrap();
    store.insert_settlement(&pending(target.id, 20)).await.unwrap();

    assert_eq!(
        store.delete_obligation(target.id).await.unwrap(),
        DeleteOutcome::Referenced(2)
    );

    let empty = obligation(500);
    store.insert_obligation(&empty).await.unwrap();
    assert_eq!(
        store.delete_obligation(empty.id).await.unwrap(),
        DeleteOutcome::Deleted
    );
    assert_eq!(
        store.delete_obligation(empty.id).await.unwrap(),
        DeleteOutcome::Missing
    );
}

#[tokio::test]
async fn confirmation_rechecks_the_ceiling_against_the_stored_amount_due() {
    let store = InMemoryLedgerStore::new();
    let target = obligation(10_000);
    store.insert_obligation(&target).await.unwrap();
    let settlement = pending(target.id, 8_000);
    store.insert_settlement(&settlement).await.unwrap();

    let mut revised = target.clone();
    revised.amount_due = Decimal::from(5_000);
    store
        .update_obligation(&revised, UpdateGuard::NoConfirmedSettlements)
        .await
        .unwrap();

    let outcome = store
        .resolve_settlement(settlement.id, "validator", Utc::now(), &confirm_against(0))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ResolveOutcome::CeilingExceeded {
            amount_due: Decimal::from(5_000),
            confirmed_total: Decimal::ZERO,
        }
    );
    assert!(store.settlement(settlement.id).await.unwrap().unwrap().is_pending());
}

#[tokio::test]
async fn confirmed_reference_cannot_back_a_second_settlement() {
    let store = InMemoryLedgerStore::new();
    let first_due = obligation(1_000);
    let second_due = obligation(1_000);
    store.insert_obligation(&first_due).await.unwrap();
    store.insert_obligation(&second_due).await.unwrap();

    let mut first = pending(first_due.id, 500);
    first.method = PaymentMethod::MobileWallet;
    first.external_reference = Some("TX-1".to_string());
    let mut second = pending(second_due.id, 500);
    second.method = PaymentMethod::MobileWallet;
    second.external_reference = Some("TX-1".to_string());
    let mut cash = pending(second_due.id, 100);
    cash.external_reference = Some("TX-1".to_string());
    for settlement in [&first, &second, &cash] {
        store.insert_settlement(settlement).await.unwrap();
    }

    let applied = store
        .resolve_settlement(first.id, "validator", Utc::now(), &confirm_against(0))
        .await
        .unwrap();
    assert!(matches!(applied, ResolveOutcome::Applied(_)));

    let taken = store
        .resolve_settlement(second.id, "validator", Utc::now(), &confirm_against(0))
        .await
        .unwrap();
    assert_eq!(taken, ResolveOutcome::ReferenceTaken { existing: first.id });
    assert!(store.settlement(second.id).await.unwrap().unwrap().is_pending());

    // Same reference under another method is a different transaction.
    let other_method = store
        .resolve_settlement(cash.id, "validator", Utc::now(), &confirm_against(0))
        .await
        .unwrap();
    assert!(matches!(other_method, ResolveOutcome::Applied(_)));
}

#[tokio::test]
async fn inserts_reject_orphans_and_report_reused_idempotency_keys() {
    let store = InMemoryLedgerStore::new();
    assert!(store.insert_settlement(&pending(Uuid::new_v4(), 10)).await.is_err());

    let target = obligation(1_000);
    store.insert_obligation(&target).await.unwrap();
    assert!(store.insert_obligation(&target).await.is_err());

    let mut keyed = pending(target.id, 10);
    keyed.idempotency_key = Some("k-1".to_string());
    assert_eq!(
        store.insert_settlement(&keyed).await.unwrap(),
        InsertOutcome::Inserted
    );

    let other = obligation(1_000);
    store.insert_obligation(&other).await.unwrap();
    let mut reused = pending(other.id, 10);
    reused.idempotency_key = Some("k-1".to_string());
    assert_eq!(
        store.insert_settlement(&reused).await.unwrap(),
        InsertOutcome::KeyTaken(keyed.clone())
    );
    assert!(store.settlement(reused.id).await.unwrap().is_none());

    let found = store.settlement_by_idempotency_key("k-1").await.unwrap();
    assert_eq!(found.map(|s| s.id), Some(keyed.id));

    let all = store
        .settlements(&SettlementFilter {
            obligation_ids: Some(vec![target.id]),
            ..SettlementFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn event_streams_share_one_sequence() {
    let events = InMemoryEventStore::default();
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();

    let payload = serde_json::json!({ "note": "created" });
    events
        .append(first, DomainEvent::new(first, DomainEventKind::ObligationCreated, None, payload.clone()))
        .await
        .unwrap();
    events
        .append(second, DomainEvent::new(second, DomainEventKind::ObligationCreated, Some("admin"), payload))
        .await
        .unwrap();
    events
        .append(
            first,
            DomainEvent::new(first, DomainEventKind::ObligationDeleted, Some("admin"), serde_json::Value::Null),
        )
        .await
        .unwrap();

    let stream = events.stream(first).await.unwrap();
    let sequences: Vec<i64> = stream.iter().map(|envelope| envelope.sequence).collect();
    assert_eq!(sequences, [1, 3]);
    assert_eq!(events.last_sequence().await, 3);
    assert!(events.stream(Uuid::new_v4()).await.unwrap().is_empty());
}
