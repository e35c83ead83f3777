use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use daara_core::{
    DeleteOutcome, InsertOutcome, LedgerStore, Obligation, ObligationFilter, Resolution,
    ResolveOutcome, Settlement, SettlementFilter, SettlementStatus, UpdateGuard, UpdateOutcome,
};
use daara_finance::check_confirmation;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct LedgerState {
    obligations: HashMap<Uuid, Obligation>,
    settlements: HashMap<Uuid, Settlement>,
    by_obligation: HashMap<Uuid, Vec<Uuid>>,
    idempotency_keys: HashMap<String, Uuid>,
}

impl LedgerState {
    fn settlements_of(&self, obligation_id: Uuid) -> impl Iterator<Item = &Settlement> {
        self.by_obligation
            .get(&obligation_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.settlements.get(id))
    }

    fn confirmed_total(&self, obligation_id: Uuid) -> Decimal {
        self.settlements_of(obligation_id)
            .filter(|settlement| settlement.is_confirmed())
            .map(|settlement| settlement.amount)
            .sum()
    }

    fn confirmed_with_reference(&self, settlement: &Settlement) -> Option<&Settlement> {
        let reference = settlement.external_reference.as_ref()?;
        self.settlements.values().find(|other| {
            other.id != settlement.id
                && other.is_confirmed()
                && other.method == settlement.method
                && other.external_reference.as_ref() == Some(reference)
        })
    }
}

/// Process-local ledger. Every conditional write runs under the single
/// write guard, which makes guard evaluation and mutation atomic.
#[derive(Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<LedgerState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn insert_obligation(&self, obligation: &Obligation) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        if state.obligations.contains_key(&obligation.id) {
            anyhow::bail!("obligation {} already stored", obligation.id);
        }
        state.obligations.insert(obligation.id, obligation.clone());
        Ok(())
    }

    async fn update_obligation(
        &self,
        obligation: &Obligation,
        guard: UpdateGuard,
    ) -> anyhow::Result<UpdateOutcome> {
        let mut state = self.state.write().await;
        if !state.obligations.contains_key(&obligation.id) {
            return Ok(UpdateOutcome::Missing);
        }
        if guard == UpdateGuard::NoConfirmedSettlements
            && state
                .settlements_of(obligation.id)
                .any(|settlement| settlement.is_confirmed())
        {
            return Ok(UpdateOutcome::HasConfirmedSettlements);
        }
        state.obligations.insert(obligation.id, obligation.clone());
        Ok(UpdateOutcome::Applied)
    }

    async fn delete_obligation(&self, obligation_id: Uuid) -> anyhow::Result<DeleteOutcome> {
        let mut state = self.state.write().await;
        if !state.obligations.contains_key(&obligation_id) {
            return Ok(DeleteOutcome::Missing);
        }
        let referenced = state.settlements_of(obligation_id).count();
        if referenced > 0 {
            return Ok(DeleteOutcome::Referenced(referenced));
        }
        state.obligations.remove(&obligation_id);
        state.by_obligation.remove(&obligation_id);
        Ok(DeleteOutcome::Deleted)
    }

    async fn obligation(&self, obligation_id: Uuid) -> anyhow::Result<Option<Obligation>> {
        let state = self.state.read().await;
        Ok(state.obligations.get(&obligation_id).cloned())
    }

    async fn obligations(&self, filter: &ObligationFilter) -> anyhow::Result<Vec<Obligation>> {
        let state = self.state.read().await;
        let mut items: Vec<Obligation> = state
            .obligations
            .values()
            .filter(|obligation| filter.matches(obligation))
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.slot.cmp(&b.slot))
                .then(a.id.cmp(&b.id))
        });
        Ok(items)
    }

    async fn insert_settlement(&self, settlement: &Settlement) -> anyhow::Result<InsertOutcome> {
        let mut state = self.state.write().await;
        if !state.obligations.contains_key(&settlement.obligation_id) {
            anyhow::bail!(
                "settlement {} references unknown obligation {}",
                settlement.id,
                settlement.obligation_id
            );
        }
        if let Some(key) = &settlement.idempotency_key {
            if let Some(existing) = state
                .idempotency_keys
                .get(key)
                .and_then(|id| state.settlements.get(id))
            {
                return Ok(InsertOutcome::KeyTaken(existing.clone()));
            }
            state.idempotency_keys.insert(key.clone(), settlement.id);
        }
        state
            .by_obligation
            .entry(settlement.obligation_id)
            .or_default()
            .push(settlement.id);
        state.settlements.insert(settlement.id, settlement.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn settlement(&self, settlement_id: Uuid) -> anyhow::Result<Option<Settlement>> {
        let state = self.state.read().await;
        Ok(state.settlements.get(&settlement_id).cloned())
    }

    async fn settlements(&self, filter: &SettlementFilter) -> anyhow::Result<Vec<Settlement>> {
        let state = self.state.read().await;
        let mut items: Vec<Settlement> = state
            .settlements
            .values()
            .filter(|settlement| filter.matches(settlement))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.declared_at.cmp(&b.declared_at).then(a.id.cmp(&b.id)));
        Ok(items)
    }

    async fn settlement_by_idempotency_key(
        &self,
        key: &str,
    ) -> anyhow::Result<Option<Settlement>> {
        let state = self.state.read().await;
        Ok(state
            .idempotency_keys
            .get(key)
            .and_then(|id| state.settlements.get(id))
            .cloned())
    }

    async fn resolve_settlement(
        &self,
        settlement_id: Uuid,
        resolved_by: &str,
        resolved_at: DateTime<Utc>,
        resolution: &Resolution,
    ) -> anyhow::Result<ResolveOutcome> {
        let mut state = self.state.write().await;
        let Some(current) = state.settlements.get(&settlement_id).cloned() else {
            return Ok(ResolveOutcome::Missing);
        };
        if !current.is_pending() {
            return Ok(ResolveOutcome::NotPending(current));
        }

        let mut resolved = current;
        match resolution {
            Resolution::Confirm {
                expected_confirmed_total,
            } => {
                let current_total = state.confirmed_total(resolved.obligation_id);
                if current_total != *expected_confirmed_total {
                    return Ok(ResolveOutcome::TotalChanged { current_total });
                }
                let Some(obligation) = state.obligations.get(&resolved.obligation_id) else {
                    return Ok(ResolveOutcome::Missing);
                };
                if check_confirmation(obligation, current_total, resolved.amount).is_err() {
                    return Ok(ResolveOutcome::CeilingExceeded {
                        amount_due: obligation.amount_due,
                        confirmed_total: current_total,
                    });
                }
                if let Some(existing) = state.confirmed_with_reference(&resolved) {
                    return Ok(ResolveOutcome::ReferenceTaken {
                        existing: existing.id,
                    });
                }
                resolved.status = SettlementStatus::Confirmed;
            }
            Resolution::Reject { note } => {
                resolved.status = SettlementStatus::Rejected;
                resolved.rejection_note = note.clone();
            }
        }
        resolved.resolved_at = Some(resolved_at);
        resolved.resolved_by = Some(resolved_by.to_string());

        state.settlements.insert(settlement_id, resolved.clone());
        Ok(ResolveOutcome::Applied(resolved))
    }
}
