use chrono::NaiveDate;
use daara_core::{Obligation, ObligationStatus, Settlement, SettlementStatus};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

pub fn settled_amount(obligation: &Obligation, settlements: &[Settlement]) -> Decimal {
    confirmed_sum(obligation.id, settlements)
}

pub fn remaining_balance(obligation: &Obligation, settlements: &[Settlement]) -> Decimal {
    balance_after(obligation.amount_due, settled_amount(obligation, settlements))
}

pub fn completion_percentage(obligation: &Obligation, settlements: &[Settlement]) -> Decimal {
    percentage_of(settled_amount(obligation, settlements), obligation.amount_due)
}

pub fn obligation_status(obligation: &Obligation, settlements: &[Settlement]) -> ObligationStatus {
    status_for(obligation.amount_due, settled_amount(obligation, settlements))
}

/// `part / whole` as a percentage rounded half away from zero to one
/// decimal place, clamped to `[0, 100]`. A non-positive `whole` yields 0.
pub fn percentage_of(part: Decimal, whole: Decimal) -> Decimal {
    if whole <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    // Scaling first keeps precision; dividing first keeps huge parts in range.
    let raw = part
        .checked_mul(HUNDRED)
        .and_then(|scaled| scaled.checked_div(whole))
        .or_else(|| part.checked_div(whole)?.checked_mul(HUNDRED));
    match raw {
        Some(raw) => raw
            .round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero)
            .clamp(Decimal::ZERO, HUNDRED),
        None if part.is_sign_negative() => Decimal::ZERO,
        None => HUNDRED,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObligationFigures {
    pub obligation_id: Uuid,
    pub amount_due: Decimal,
    pub settled_amount: Decimal,
    pub remaining_balance: Decimal,
    pub completion_percentage: Decimal,
    pub status: ObligationStatus,
    pub pending_count: usize,
    pub pending_amount: Decimal,
    pub overdue: bool,
}

pub fn figures(
    obligation: &Obligation,
    settlements: &[Settlement],
    today: NaiveDate,
) -> ObligationFigures {
    let settled = settled_amount(obligation, settlements);
    let status = status_for(obligation.amount_due, settled);
    let pending: Vec<&Settlement> = settlements
        .iter()
        .filter(|s| s.obligation_id == obligation.id && s.status == SettlementStatus::Pending)
        .collect();
    let overdue = status != ObligationStatus::Settled
        && obligation
            .due_period
            .and_then(|period| period.last_day())
            .is_some_and(|last_day| last_day < today);

    ObligationFigures {
        obligation_id: obligation.id,
        amount_due: obligation.amount_due,
        settled_amount: settled,
        remaining_balance: balance_after(obligation.amount_due, settled),
        completion_percentage: percentage_of(settled, obligation.amount_due),
        status,
        pending_count: pending.len(),
        pending_amount: pending.iter().map(|s| s.amount).sum(),
        overdue,
    }
}

pub(crate) fn confirmed_sum(obligation_id: Uuid, settlements: &[Settlement]) -> Decimal {
    settlements
        .iter()
        .filter(|s| s.obligation_id == obligation_id && s.status == SettlementStatus::Confirmed)
        .map(|s| s.amount)
        .sum()
}

pub(crate) fn balance_after(amount_due: Decimal, settled: Decimal) -> Decimal {
    (amount_due - settled).max(Decimal::ZERO)
}

pub(crate) fn status_for(amount_due: Decimal, settled: Decimal) -> ObligationStatus {
    if settled <= Decimal::ZERO {
        // A zero-amount obligation cannot be created, but migrated data may carry one.
        if amount_due <= Decimal::ZERO {
            ObligationStatus::Settled
        } else {
            ObligationStatus::Unpaid
        }
    } else if settled < amount_due {
        ObligationStatus::PartiallySettled
    } else {
        ObligationStatus::Settled
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use daara_core::{DuePeriod, ObligationKind, PaymentMethod};

    use super::*;

    fn obligation(amount_due: i64) -> Obligation {
        Obligation {
            id: Uuid::new_v4(),
            kind: ObligationKind::ProgramChapter,
            owner_member_id: Some("awa".to_string()),
            program_id: Uuid::new_v4(),
            slot: Some(1),
            label: "Juzz 1".to_string(),
            amount_due: Decimal::from(amount_due),
            due_period: None,
            created_at: Utc::now(),
        }
    }

    fn settlement(obligation: &Obligation, amount: i64, status: SettlementStatus) -> Settlement {
        Settlement {
            id: Uuid::new_v4(),
            obligation_id: obligation.id,
            declared_by_member_id: "awa".to_string(),
            amount: Decimal::from(amount),
            method: PaymentMethod::Cash,
            external_reference: None,
            idempotency_key: None,
            on_behalf: false,
            status,
            rejection_note: None,
            declared_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
        }
    }

    #[test]
    fn only_confirmed_settlements_count() {
        let due = obligation(10000);
        let other = obligation(500);
        let ledger = vec![
            settlement(&due, 4000, SettlementStatus::Confirmed),
            settlement(&due, 3000, SettlementStatus::Pending),
            settlement(&due, 2000, SettlementStatus::Rejected),
            settlement(&other, 500, SettlementStatus::Confirmed),
        ];

        assert_eq!(settled_amount(&due, &ledger), Decimal::from(4000));
        assert_eq!(remaining_balance(&due, &ledger), Decimal::from(6000));
        assert_eq!(completion_percentage(&due, &ledger), Decimal::new(400, 1));
        assert_eq!(
            obligation_status(&due, &ledger),
            ObligationStatus::PartiallySettled
        );
    }

    #[test]
    fn percentage_rounds_to_one_decimal_and_caps_at_hundred() {
        assert_eq!(
            percentage_of(Decimal::from(1), Decimal::from(3)),
            Decimal::new(333, 1)
        );
        assert_eq!(
            percentage_of(Decimal::from(2), Decimal::from(3)),
            Decimal::new(667, 1)
        );
        assert_eq!(
            percentage_of(Decimal::new(25, 2), Decimal::from(200)),
            Decimal::new(1, 1)
        );
        assert_eq!(
            percentage_of(Decimal::from(150), Decimal::from(100)),
            Decimal::from(100)
        );
        assert_eq!(percentage_of(Decimal::from(5), Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn percentage_of_extreme_values_does_not_overflow() {
        assert_eq!(percentage_of(Decimal::MAX, Decimal::MAX), HUNDRED);
        assert_eq!(
            percentage_of(Decimal::MAX / Decimal::TWO, Decimal::MAX),
            Decimal::new(500, 1)
        );
        assert_eq!(percentage_of(Decimal::MAX, Decimal::new(1, 2)), HUNDRED);
    }

    #[test]
    fn migrated_overpayment_is_clamped() {
        let due = obligation(1000);
        let ledger = vec![
            settlement(&due, 800, SettlementStatus::Confirmed),
            settlement(&due, 700, SettlementStatus::Confirmed),
        ];

        assert_eq!(remaining_balance(&due, &ledger), Decimal::ZERO);
        assert_eq!(completion_percentage(&due, &ledger), Decimal::from(100));
        assert_eq!(obligation_status(&due, &ledger), ObligationStatus::Settled);
    }

    #[test]
    fn figures_flag_overdue_unsettled_periods() {
        let mut due = obligation(1000);
        due.due_period = Some(DuePeriod::Month {
            year: 2026,
            month: 1,
        });
        let ledger = vec![settlement(&due, 250, SettlementStatus::Pending)];
        let february = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        let january = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();

        let late = figures(&due, &ledger, february);
        assert!(late.overdue);
        assert_eq!(late.status, ObligationStatus::Unpaid);
        assert_eq!(late.pending_count, 1);
        assert_eq!(late.pending_amount, Decimal::from(250));

        assert!(!figures(&due, &ledger, january).overdue);

        let paid = vec![settlement(&due, 1000, SettlementStatus::Confirmed)];
        assert!(!figures(&due, &paid, february).overdue);
    }
}
