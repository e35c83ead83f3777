use std::collections::{BTreeMap, HashMap};
use std::ops::Add;

use daara_core::{Obligation, ObligationStatus, Settlement, SettlementStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::figures::{balance_after, percentage_of, status_for};

/// Weighted totals over a set of obligations. All fields except
/// `global_percentage` are plain sums, so totals of disjoint sets add.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioTotals {
    pub obligation_count: usize,
    pub total_due: Decimal,
    pub total_settled: Decimal,
    pub total_remaining: Decimal,
    pub global_percentage: Decimal,
    pub unpaid_count: usize,
    pub partially_settled_count: usize,
    pub settled_count: usize,
}

impl Default for PortfolioTotals {
    fn default() -> Self {
        Self {
            obligation_count: 0,
            total_due: Decimal::ZERO,
            total_settled: Decimal::ZERO,
            total_remaining: Decimal::ZERO,
            global_percentage: Decimal::ZERO,
            unpaid_count: 0,
            partially_settled_count: 0,
            settled_count: 0,
        }
    }
}

impl PortfolioTotals {
    fn record(&mut self, amount_due: Decimal, settled: Decimal) {
        self.obligation_count += 1;
        self.total_due += amount_due;
        self.total_settled += settled;
        self.total_remaining += balance_after(amount_due, settled);
        match status_for(amount_due, settled) {
            ObligationStatus::Unpaid => self.unpaid_count += 1,
            ObligationStatus::PartiallySettled => self.partially_settled_count += 1,
            ObligationStatus::Settled => self.settled_count += 1,
        }
        self.global_percentage = percentage_of(self.total_settled, self.total_due);
    }
}

impl Add for PortfolioTotals {
    type Output = PortfolioTotals;

    fn add(self, rhs: Self) -> Self::Output {
        let total_due = self.total_due + rhs.total_due;
        let total_settled = self.total_settled + rhs.total_settled;
        PortfolioTotals {
            obligation_count: self.obligation_count + rhs.obligation_count,
            total_due,
            total_settled,
            total_remaining: self.total_remaining + rhs.total_remaining,
            global_percentage: percentage_of(total_settled, total_due),
            unpaid_count: self.unpaid_count + rhs.unpaid_count,
            partially_settled_count: self.partially_settled_count + rhs.partially_settled_count,
            settled_count: self.settled_count + rhs.settled_count,
        }
    }
}

pub fn portfolio_totals(obligations: &[Obligation], settlements: &[Settlement]) -> PortfolioTotals {
    let settled = confirmed_by_obligation(settlements);
    let mut totals = PortfolioTotals::default();
    for obligation in obligations {
        totals.record(obligation.amount_due, settled_of(&settled, obligation.id));
    }
    totals
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemberBreakdown {
    pub member_id: String,
    pub totals: PortfolioTotals,
    pub pending_count: usize,
    pub declared_count: usize,
    pub confirmed_count: usize,
    pub rejected_count: usize,
}

pub fn member_breakdown(
    obligations: &[Obligation],
    settlements: &[Settlement],
    member_id: &str,
) -> MemberBreakdown {
    let owned: Vec<Obligation> = obligations
        .iter()
        .filter(|obligation| obligation.owner_member_id.as_deref() == Some(member_id))
        .cloned()
        .collect();
    let owned_ids: Vec<Uuid> = owned.iter().map(|obligation| obligation.id).collect();
    let on_owned: Vec<&Settlement> = settlements
        .iter()
        .filter(|settlement| owned_ids.contains(&settlement.obligation_id))
        .collect();
    let count_with = |status: SettlementStatus| {
        on_owned
            .iter()
            .filter(|settlement| settlement.status == status)
            .count()
    };

    MemberBreakdown {
        member_id: member_id.to_string(),
        totals: portfolio_totals(&owned, settlements),
        pending_count: count_with(SettlementStatus::Pending),
        declared_count: on_owned.len(),
        confirmed_count: count_with(SettlementStatus::Confirmed),
        rejected_count: count_with(SettlementStatus::Rejected),
    }
}

pub fn category_breakdown<K, F>(
    obligations: &[Obligation],
    settlements: &[Settlement],
    key_fn: F,
) -> BTreeMap<K, PortfolioTotals>
where
    K: Ord,
    F: Fn(&Obligation) -> K,
{
    let settled = confirmed_by_obligation(settlements);
    let mut groups: BTreeMap<K, PortfolioTotals> = BTreeMap::new();
    for obligation in obligations {
        groups
            .entry(key_fn(obligation))
            .or_default()
            .record(obligation.amount_due, settled_of(&settled, obligation.id));
    }
    groups
}

fn confirmed_by_obligation(settlements: &[Settlement]) -> HashMap<Uuid, Decimal> {
    let mut sums: HashMap<Uuid, Decimal> = HashMap::new();
    for settlement in settlements.iter().filter(|s| s.is_confirmed()) {
        *sums.entry(settlement.obligation_id).or_insert(Decimal::ZERO) += settlement.amount;
    }
    sums
}

fn settled_of(sums: &HashMap<Uuid, Decimal>, obligation_id: Uuid) -> Decimal {
    sums.get(&obligation_id).copied().unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use daara_core::{ObligationKind, PaymentMethod};

    use super::*;

    fn obligation(owner: &str, program_id: Uuid, amount_due: i64) -> Obligation {
        Obligation {
            id: Uuid::new_v4(),
            kind: ObligationKind::RecurringDue,
            owner_member_id: Some(owner.to_string()),
            program_id,
            slot: None,
            label: "Monthly due".to_string(),
            amount_due: Decimal::from(amount_due),
            due_period: None,
            created_at: Utc::now(),
        }
    }

    fn settlement(obligation: &Obligation, amount: i64, status: SettlementStatus) -> Settlement {
        Settlement {
            id: Uuid::new_v4(),
            obligation_id: obligation.id,
            declared_by_member_id: obligation.owner_member_id.clone().unwrap_or_default(),
            amount: Decimal::from(amount),
            method: PaymentMethod::MobileWallet,
            external_reference: Some(format!("TX-{amount}")),
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
    fn global_percentage_is_weighted_not_averaged() {
        let program = Uuid::new_v4();
        let small = obligation("awa", program, 100);
        let large = obligation("modou", program, 9900);
        let ledger = vec![settlement(&small, 100, SettlementStatus::Confirmed)];

        let totals = portfolio_totals(&[small, large], &ledger);

        // Averaging per-obligation percentages would report 50%.
        assert_eq!(totals.global_percentage, Decimal::from(1));
        assert_eq!(totals.total_due, Decimal::from(10000));
        assert_eq!(totals.total_remaining, Decimal::from(9900));
        assert_eq!(totals.settled_count, 1);
        assert_eq!(totals.unpaid_count, 1);
    }

    #[test]
    fn totals_of_disjoint_sets_add_up() {
        let program = Uuid::new_v4();
        let a = vec![obligation("awa", program, 1000), obligation("awa", program, 3000)];
        let b = vec![obligation("modou", program, 2500)];
        let ledger = vec![
            settlement(&a[0], 1000, SettlementStatus::Confirmed),
            settlement(&a[1], 500, SettlementStatus::Confirmed),
            settlement(&a[1], 700, SettlementStatus::Pending),
            settlement(&b[0], 2000, SettlementStatus::Confirmed),
            settlement(&b[0], 100, SettlementStatus::Rejected),
        ];
        let union: Vec<Obligation> = a.iter().chain(b.iter()).cloned().collect();

        let combined = portfolio_totals(&union, &ledger);
        let summed = portfolio_totals(&a, &ledger) + portfolio_totals(&b, &ledger);

        assert_eq!(combined, summed);
        assert_eq!(combined.total_settled, Decimal::from(3500));
        assert_eq!(combined.global_percentage, Decimal::new(538, 1));
    }

    #[test]
    fn member_breakdown_counts_settlements_on_owned_obligations() {
        let program = Uuid::new_v4();
        let mine = obligation("awa", program, 2000);
        let theirs = obligation("modou", program, 2000);
        let ledger = vec![
            settlement(&mine, 500, SettlementStatus::Confirmed),
            settlement(&mine, 500, SettlementStatus::Pending),
            settlement(&mine, 200, SettlementStatus::Rejected),
            settlement(&theirs, 2000, SettlementStatus::Confirmed),
        ];

        let breakdown = member_breakdown(&[mine, theirs], &ledger, "awa");

        assert_eq!(breakdown.totals.obligation_count, 1);
        assert_eq!(breakdown.totals.total_settled, Decimal::from(500));
        assert_eq!(breakdown.totals.global_percentage, Decimal::from(25));
        assert_eq!(breakdown.pending_count, 1);
        assert_eq!(breakdown.declared_count, 3);
        assert_eq!(breakdown.confirmed_count, 1);
        assert_eq!(breakdown.rejected_count, 1);
    }

    #[test]
    fn category_breakdown_groups_by_caller_key() {
        let kamil = Uuid::new_v4();
        let roof = Uuid::new_v4();
        let obligations = vec![
            obligation("awa", kamil, 500),
            obligation("modou", kamil, 500),
            obligation("awa", roof, 20000),
        ];
        let ledger = vec![
            settlement(&obligations[0], 500, SettlementStatus::Confirmed),
            settlement(&obligations[2], 5000, SettlementStatus::Confirmed),
        ];

        let groups = category_breakdown(&obligations, &ledger, |o| o.program_id);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&kamil].total_due, Decimal::from(1000));
        assert_eq!(groups[&kamil].global_percentage, Decimal::from(50));
        assert_eq!(groups[&roof].total_remaining, Decimal::from(15000));
        assert_eq!(
            groups.values().cloned().fold(PortfolioTotals::default(), Add::add),
            portfolio_totals(&obligations, &ledger)
        );
    }

    #[test]
    fn empty_portfolio_reports_zero_percentage() {
        let totals = portfolio_totals(&[], &[]);
        assert_eq!(totals, PortfolioTotals::default());
    }
}
