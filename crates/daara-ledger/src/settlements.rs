use chrono::Utc;
use daara_core::{
    DomainEventKind, EngineError, EngineResult, InsertOutcome, NewSettlement, Settlement,
    SettlementFilter, SettlementStatus,
};
use daara_finance::{check_amount, check_declaration, settled_amount};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{SettlementEngine, normalize_text};

impl SettlementEngine {
    /// Checks run in order: obligation exists, amount is valid, wallet
    /// payments carry a reference, amount fits the confirmed balance.
    pub async fn declare_settlement(&self, request: NewSettlement) -> EngineResult<Settlement> {
        let obligation_id = request.obligation_id;
        let idempotency_key = normalize_text(request.idempotency_key);
        let external_reference = normalize_text(request.external_reference);
        let declared_by = request.declared_by_member_id.trim().to_string();

        // Unknown ids are refused before they get a lock entry.
        self.get_obligation(obligation_id).await?;
        let _guard = self.locks.acquire(obligation_id).await;

        if let Some(key) = &idempotency_key
            && let Some(existing) = self.store.settlement_by_idempotency_key(key).await?
        {
            return replay(key, obligation_id, existing);
        }

        let obligation = self.get_obligation(obligation_id).await?;
        check_amount(request.amount)?;
        if external_reference.is_none() && self.policy.requires_reference(request.method) {
            return Err(EngineError::MissingReference {
                method: request.method,
            });
        }
        let ledger = self.obligation_settlements(obligation_id).await?;
        check_declaration(
            &obligation,
            settled_amount(&obligation, &ledger),
            request.amount,
        )?;

        let on_behalf = obligation.owner_member_id.as_deref() != Some(declared_by.as_str());
        let settlement = Settlement {
            id: Uuid::new_v4(),
            obligation_id,
            declared_by_member_id: declared_by,
            amount: request.amount,
            method: request.method,
            external_reference,
            idempotency_key,
            on_behalf,
            status: SettlementStatus::Pending,
            rejection_note: None,
            declared_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
        };
        // The key may have been claimed on another obligation since the lookup.
        match self.store.insert_settlement(&settlement).await? {
            InsertOutcome::Inserted => {}
            InsertOutcome::KeyTaken(existing) => {
                let key = settlement.idempotency_key.as_deref().unwrap_or_default();
                return replay(key, obligation_id, existing);
            }
        }

        if on_behalf {
            warn!(
                "settlement {} declared by {} on obligation {} owned by {:?}",
                settlement.id,
                settlement.declared_by_member_id,
                obligation_id,
                obligation.owner_member_id
            );
        }
        info!(
            "settlement {} declared: {} via {} on obligation {}",
            settlement.id, settlement.amount, settlement.method, obligation_id
        );
        self.record(
            obligation_id,
            DomainEventKind::SettlementDeclared,
            Some(settlement.declared_by_member_id.as_str()),
            json!(settlement),
        )
        .await;

        Ok(settlement)
    }

    pub async fn list_settlements(&self, obligation_id: Uuid) -> EngineResult<Vec<Settlement>> {
        self.get_obligation(obligation_id).await?;
        self.obligation_settlements(obligation_id).await
    }

    pub async fn list_pending(&self, filter: SettlementFilter) -> EngineResult<Vec<Settlement>> {
        let filter = SettlementFilter {
            status: Some(SettlementStatus::Pending),
            ..filter
        };
        Ok(self.store.settlements(&filter).await?)
    }

    pub async fn get_settlement(&self, settlement_id: Uuid) -> EngineResult<Settlement> {
        self.store
            .settlement(settlement_id)
            .await?
            .ok_or(EngineError::SettlementNotFound(settlement_id))
    }

    pub(crate) async fn obligation_settlements(
        &self,
        obligation_id: Uuid,
    ) -> EngineResult<Vec<Settlement>> {
        Ok(self
            .store
            .settlements(&SettlementFilter {
                obligation_ids: Some(vec![obligation_id]),
                ..SettlementFilter::default()
            })
            .await?)
    }
}

fn replay(key: &str, obligation_id: Uuid, existing: Settlement) -> EngineResult<Settlement> {
    if existing.obligation_id != obligation_id {
        return Err(EngineError::DuplicateAssignment(format!(
            "idempotency key {key} was used for obligation {}",
            existing.obligation_id
        )));
    }
    info!("settlement {} replayed for idempotency key {key}", existing.id);
    Ok(existing)
}
