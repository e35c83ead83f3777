mod common;

use chrono::{Duration, Utc};
use common::{VALIDATOR, cash, dec, harness, monthly_due, pledge};
use daara_core::{
    DomainEventKind, DuePeriod, LedgerStore, ObligationFilter, PaymentMethod, Settlement,
    SettlementStatus,
};
use daara_finance::PortfolioTotals;
use daara_ledger::CategoryKey;
use rust_decimal::Decimal;
use uuid::Uuid;

#[tokio::test]
async fn portfolio_is_weighted_by_amount_due() {
    let h = harness();
    let program_id = Uuid::new_v4();
    let small = h.obligation(monthly_due("awa", program_id, 2026, 1)).await;
    let mut big = pledge("moussa", 9_000);
    big.program_id = program_id;
    let big = h.obligation(big).await;

    h.confirmed(cash(small.id, "awa", 1_000)).await;
    h.confirmed(cash(big.id, "moussa", 900)).await;

    let totals = h
        .engine
        .portfolio(&ObligationFilter::by_program(program_id))
        .await
        .unwrap();
    assert_eq!(totals.obligation_count, 2);
    assert_eq!(totals.total_due, dec(10_000));
    assert_eq!(totals.total_settled, dec(1_900));
    assert_eq!(totals.total_remaining, dec(8_100));
    assert_eq!(totals.global_percentage, Decimal::new(190, 1));
    assert_eq!(totals.settled_count, 1);
    assert_eq!(totals.partially_settled_count, 1);
    assert_eq!(totals.unpaid_count, 0);

    let empty = h
        .engine
        .portfolio(&ObligationFilter::by_program(Uuid::new_v4()))
        .await
        .unwrap();
    assert_eq!(empty.obligation_count, 0);
    assert_eq!(empty.global_percentage, Decimal::ZERO);
}

#[tokio::test]
async fn member_report_counts_settlements_on_owned_obligations() {
    let h = harness();
    let program_id = Uuid::new_v4();
    let due = h.obligation(monthly_due("awa", program_id, 2026, 5)).await;
    let other = h.obligation(pledge("moussa", 4_000)).await;

    h.confirmed(cash(due.id, "awa", 400)).await;
    let rejected = h
        .engine
        .declare_settlement(cash(due.id, "awa", 100))
        .await
        .unwrap();
    h.engine.reject(rejected.id, VALIDATOR, None).await.unwrap();
    h.engine
        .declare_settlement(cash(due.id, "treasurer", 200))
        .await
        .unwrap();
    h.engine
        .declare_settlement(cash(other.id, "awa", 50))
        .await
        .unwrap();

    let report = h.engine.member_report("awa").await.unwrap();
    assert_eq!(report.member_id, "awa");
    assert_eq!(report.totals.obligation_count, 1);
    assert_eq!(report.totals.total_settled, dec(400));
    assert_eq!(report.totals.total_remaining, dec(600));
    assert_eq!(report.declared_count, 3);
    assert_eq!(report.confirmed_count, 1);
    assert_eq!(report.rejected_count, 1);
    assert_eq!(report.pending_count, 1);

    let stranger = h.engine.member_report("nobody").await.unwrap();
    assert_eq!(stranger.totals.obligation_count, 0);
    assert_eq!(stranger.declared_count, 0);
}

#[tokio::test]
async fn category_report_groups_and_adds_up() {
    let h = harness();
    let dues = Uuid::new_v4();
    let january = h.obligation(monthly_due("awa", dues, 2026, 1)).await;
    h.obligation(monthly_due("moussa", dues, 2026, 1)).await;
    h.obligation(monthly_due("awa", dues, 2026, 2)).await;
    h.confirmed(cash(january.id, "awa", 500)).await;

    let by_month = h
        .engine
        .category_report(&ObligationFilter::by_program(dues), CategoryKey::Month)
        .await
        .unwrap();
    let keys: Vec<&str> = by_month.iter().map(|group| group.key.as_str()).collect();
    assert_eq!(keys, ["2026-01", "2026-02"]);
    assert_eq!(by_month[0].totals.obligation_count, 2);
    assert_eq!(by_month[0].totals.total_settled, dec(500));
    assert_eq!(by_month[0].totals.global_percentage, Decimal::new(250, 1));

    let whole = h
        .engine
        .portfolio(&ObligationFilter::by_program(dues))
        .await
        .unwrap();
    let summed = by_month
        .into_iter()
        .map(|group| group.totals)
        .fold(PortfolioTotals::default(), |acc, totals| acc + totals);
    assert_eq!(summed, whole);

    h.obligation(pledge("awa", 2_000)).await;
    let by_kind = h
        .engine
        .category_report(&ObligationFilter::default(), CategoryKey::Kind)
        .await
        .unwrap();
    let kinds: Vec<&str> = by_kind.iter().map(|group| group.key.as_str()).collect();
    assert_eq!(kinds, ["campaign-pledge", "recurring-due"]);
}

#[test]
fn category_key_parses_query_values() {
    assert_eq!("program".parse::<CategoryKey>().unwrap(), CategoryKey::Program);
    assert_eq!("month".parse::<CategoryKey>().unwrap(), CategoryKey::Month);
    assert_eq!("kind".parse::<CategoryKey>().unwrap(), CategoryKey::Kind);
    assert!("campaign".parse::<CategoryKey>().is_err());
}

#[tokio::test]
async fn ended_period_without_full_settlement_is_overdue() {
    let h = harness();
    let program_id = Uuid::new_v4();
    let last_year = Utc::now().date_naive() - Duration::days(400);
    let mut late = monthly_due("awa", program_id, 2026, 1);
    late.due_period = Some(DuePeriod::Window {
        start: last_year,
        end: last_year + Duration::days(30),
    });
    let late = h.obligation(late).await;
    let paid = h.obligation(monthly_due("awa", program_id, 2020, 1)).await;
    h.confirmed(cash(paid.id, "awa", 1_000)).await;
    let open_ended = h.obligation(pledge("awa", 1_000)).await;

    let views = h
        .engine
        .list_obligation_views(&ObligationFilter::by_member("awa"))
        .await
        .unwrap();
    let overdue = |id: Uuid| {
        views
            .iter()
            .find(|view| view.obligation.id == id)
            .map(|view| view.figures.overdue)
            .unwrap()
    };
    assert!(overdue(late.id));
    assert!(!overdue(paid.id));
    assert!(!overdue(open_ended.id));
}

#[tokio::test]
async fn history_lists_every_state_change_in_order() {
    let h = harness();
    let obligation = h.obligation(pledge("awa", 1_000)).await;
    let first = h
        .engine
        .declare_settlement(cash(obligation.id, "awa", 300))
        .await
        .unwrap();
    h.engine.confirm(first.id, VALIDATOR).await.unwrap();
    let second = h
        .engine
        .declare_settlement(cash(obligation.id, "awa", 300))
        .await
        .unwrap();
    h.engine
        .reject(second.id, VALIDATOR, Some("unknown receipt".into()))
        .await
        .unwrap();

    let history = h.engine.history(obligation.id).await.unwrap();
    let kinds: Vec<DomainEventKind> = history.iter().map(|envelope| envelope.event.kind).collect();
    assert_eq!(
        kinds,
        [
            DomainEventKind::ObligationCreated,
            DomainEventKind::SettlementDeclared,
            DomainEventKind::SettlementConfirmed,
            DomainEventKind::SettlementDeclared,
            DomainEventKind::SettlementRejected,
        ]
    );
    assert!(history.windows(2).all(|pair| pair[0].sequence < pair[1].sequence));
    assert_eq!(history[2].event.actor.as_deref(), Some(VALIDATOR));
    assert_eq!(h.events.last_sequence().await, 5);

    let missing = Uuid::new_v4();
    assert_eq!(
        h.engine.history(missing).await.unwrap_err().kind(),
        "ObligationNotFound"
    );
}

fn stale_settlement(obligation_id: Uuid, age_days: i64) -> Settlement {
    Settlement {
        id: Uuid::new_v4(),
        obligation_id,
        declared_by_member_id: "awa".to_string(),
        amount: dec(100),
        method: PaymentMethod::Cash,
        external_reference: None,
        idempotency_key: None,
        on_behalf: false,
        status: SettlementStatus::Pending,
        rejection_note: None,
        declared_at: Utc::now() - Duration::days(age_days),
        resolved_at: None,
        resolved_by: None,
    }
}

#[tokio::test]
async fn expiry_rejects_only_stale_pending_settlements() {
    let h = harness();
    let obligation = h.obligation(pledge("awa", 10_000)).await;

    let stale = stale_settlement(obligation.id, 45);
    let recent = stale_settlement(obligation.id, 2);
    h.store.insert_settlement(&stale).await.unwrap();
    h.store.insert_settlement(&recent).await.unwrap();
    let confirmed_old = stale_settlement(obligation.id, 60);
    h.store.insert_settlement(&confirmed_old).await.unwrap();
    h.engine.confirm(confirmed_old.id, VALIDATOR).await.unwrap();

    let summary = h
        .engine
        .expire_pending(Duration::days(30), "system:expiry")
        .await
        .unwrap();
    assert_eq!(summary.rejected, vec![stale.id]);
    assert_eq!(summary.skipped, 0);

    let expired = h.engine.get_settlement(stale.id).await.unwrap();
    assert_eq!(expired.status, SettlementStatus::Rejected);
    assert_eq!(expired.resolved_by.as_deref(), Some("system:expiry"));
    assert_eq!(
        expired.rejection_note.as_deref(),
        Some("expired after 30 days without validation")
    );
    assert!(h.engine.get_settlement(recent.id).await.unwrap().is_pending());

    let again = h
        .engine
        .expire_pending(Duration::days(30), "system:expiry")
        .await
        .unwrap();
    assert!(again.rejected.is_empty());
}
