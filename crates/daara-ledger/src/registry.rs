use std::collections::BTreeMap;

use chrono::Utc;
use daara_core::{
    DeleteOutcome, DomainEventKind, DuePeriod, EngineError, EngineResult, MemberId,
    NewObligation, Obligation, ObligationFilter, ObligationKind, SettlementFilter, UpdateGuard,
    UpdateOutcome,
};
use daara_finance::check_amount;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{SettlementEngine, normalize_text};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramSlots {
    pub program_id: Uuid,
    pub label_prefix: String,
    /// Defaults to the policy's chapters-per-program.
    pub count: Option<u32>,
    pub amount_due: Decimal,
    pub due_period: Option<DuePeriod>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotAssignment {
    pub slot: u32,
    pub result: EngineResult<Obligation>,
}

impl SettlementEngine {
    pub async fn create_obligation(
        &self,
        request: NewObligation,
        actor: Option<&str>,
    ) -> EngineResult<Obligation> {
        check_amount(request.amount_due)?;
        if let Some(period) = &request.due_period {
            period.validate()?;
        }

        let _claims = self.claims.lock().await;
        let owner = normalize_text(request.owner_member_id.clone());

        if request.kind == ObligationKind::ProgramChapter
            && let Some(slot) = request.slot
            && let Some(existing) = self.slot_obligation(request.program_id, slot).await?
        {
            return self.claim_slot(existing, request, owner, actor).await;
        }

        if let Some(owner) = &owner {
            self.ensure_single_due(
                request.kind,
                request.program_id,
                request.due_period,
                owner,
                None,
            )
            .await?;
        }

        let obligation = Obligation {
            id: Uuid::new_v4(),
            kind: request.kind,
            owner_member_id: owner,
            program_id: request.program_id,
            slot: match request.kind {
                ObligationKind::ProgramChapter => request.slot,
                _ => None,
            },
            label: request.label.trim().to_string(),
            amount_due: request.amount_due,
            due_period: request.due_period,
            created_at: Utc::now(),
        };
        self.store.insert_obligation(&obligation).await?;

        info!(
            "obligation {} created ({}, {} due)",
            obligation.id, obligation.kind, obligation.amount_due
        );
        self.record(
            obligation.id,
            DomainEventKind::ObligationCreated,
            actor,
            json!(obligation),
        )
        .await;

        Ok(obligation)
    }

    pub async fn create_program_slots(
        &self,
        request: ProgramSlots,
        actor: Option<&str>,
    ) -> EngineResult<Vec<Obligation>> {
        let defaults = self.policy.defaults();
        let count = request.count.unwrap_or(defaults.chapters_per_program);
        if count == 0 || count > defaults.max_slots_per_program {
            return Err(EngineError::InvalidSlotCount {
                requested: count,
                max: defaults.max_slots_per_program,
            });
        }
        check_amount(request.amount_due)?;
        if let Some(period) = &request.due_period {
            period.validate()?;
        }

        let _claims = self.claims.lock().await;
        let existing = self
            .store
            .obligations(&ObligationFilter {
                program_id: Some(request.program_id),
                kind: Some(ObligationKind::ProgramChapter),
                ..ObligationFilter::default()
            })
            .await?;
        if !existing.is_empty() {
            return Err(EngineError::DuplicateAssignment(format!(
                "program {} already has {} chapter slot(s)",
                request.program_id,
                existing.len()
            )));
        }

        let created_at = Utc::now();
        let prefix = request.label_prefix.trim();
        let mut created = Vec::with_capacity(count as usize);
        for slot in 1..=count {
            let obligation = Obligation {
                id: Uuid::new_v4(),
                kind: ObligationKind::ProgramChapter,
                owner_member_id: None,
                program_id: request.program_id,
                slot: Some(slot),
                label: format!("{prefix} {slot}").trim().to_string(),
                amount_due: request.amount_due,
                due_period: request.due_period,
                created_at,
            };
            self.store.insert_obligation(&obligation).await?;
            self.record(
                obligation.id,
                DomainEventKind::ObligationCreated,
                actor,
                json!(obligation),
            )
            .await;
            created.push(obligation);
        }

        info!(
            "program {} opened with {} chapter slot(s)",
            request.program_id, count
        );
        Ok(created)
    }

    pub async fn issue_dues(
        &self,
        program_id: Uuid,
        members: &[MemberId],
        period: DuePeriod,
        amount_due: Option<Decimal>,
        actor: Option<&str>,
    ) -> EngineResult<Vec<(MemberId, EngineResult<Obligation>)>> {
        period.validate()?;
        let amount_due = amount_due.unwrap_or(self.policy.defaults().monthly_due_amount);
        check_amount(amount_due)?;

        let mut results = Vec::with_capacity(members.len());
        for member in members {
            let request = NewObligation {
                kind: ObligationKind::RecurringDue,
                owner_member_id: Some(member.clone()),
                program_id,
                slot: None,
                label: format!("Monthly due {}", period.month_key()),
                amount_due,
                due_period: Some(period),
            };
            let result = self.create_obligation(request, actor).await;
            results.push((member.clone(), result));
        }
        Ok(results)
    }

    pub async fn reassign(
        &self,
        obligation_id: Uuid,
        new_owner: Option<MemberId>,
        force: bool,
        actor: Option<&str>,
    ) -> EngineResult<Obligation> {
        let new_owner = normalize_text(new_owner);
        // Claims before the obligation lock, the same order `create_obligation` uses.
        let _claims = match &new_owner {
            Some(_) => Some(self.claims.lock().await),
            None => None,
        };
        let _guard = self.locks.acquire(obligation_id).await;
        let current = self.get_obligation(obligation_id).await?;
        if current.owner_member_id == new_owner {
            return Ok(current);
        }

        if let Some(owner) = &new_owner {
            self.ensure_single_due(
                current.kind,
                current.program_id,
                current.due_period,
                owner,
                Some(current.id),
            )
            .await?;
        }

        let mut updated = current.clone();
        updated.owner_member_id = new_owner;
        let guard = if force {
            UpdateGuard::Unconditional
        } else {
            UpdateGuard::NoConfirmedSettlements
        };
        match self.store.update_obligation(&updated, guard).await? {
            UpdateOutcome::Applied => {}
            UpdateOutcome::Missing => return Err(EngineError::ObligationNotFound(obligation_id)),
            UpdateOutcome::HasConfirmedSettlements => {
                return Err(EngineError::ObligationLocked {
                    obligation_id,
                    reason: "confirmed settlements exist; reassignment requires force".to_string(),
                });
            }
        }

        // Pending declarations stay attached; they now show up as declared on behalf.
        let pending = self
            .store
            .settlements(&SettlementFilter {
                obligation_ids: Some(vec![obligation_id]),
                ..SettlementFilter::pending()
            })
            .await?
            .len();
        if pending > 0 {
            warn!(
                "obligation {obligation_id} reassigned with {pending} pending settlement(s) attached"
            );
        }
        info!(
            "obligation {} reassigned from {:?} to {:?}{}",
            obligation_id,
            current.owner_member_id,
            updated.owner_member_id,
            if force { " (forced)" } else { "" }
        );
        self.record(
            obligation_id,
            DomainEventKind::ObligationReassigned,
            actor,
            json!({
                "from": current.owner_member_id,
                "to": updated.owner_member_id,
                "forced": force,
                "pending_settlements": pending,
            }),
        )
        .await;

        Ok(updated)
    }

    pub async fn assign_slots(
        &self,
        program_id: Uuid,
        assignments: BTreeMap<u32, Option<MemberId>>,
        force: bool,
        actor: Option<&str>,
    ) -> EngineResult<Vec<SlotAssignment>> {
        let mut outcomes = Vec::with_capacity(assignments.len());
        for (slot, member) in assignments {
            let result = match self.slot_obligation(program_id, slot).await? {
                Some(obligation) => self.reassign(obligation.id, member, force, actor).await,
                None => Err(EngineError::SlotNotFound { program_id, slot }),
            };
            outcomes.push(SlotAssignment { slot, result });
        }
        Ok(outcomes)
    }

    /// Changes the target amount. Refused once money has been confirmed,
    /// since that would rewrite the completion history.
    pub async fn revise_amount(
        &self,
        obligation_id: Uuid,
        amount_due: Decimal,
        actor: Option<&str>,
    ) -> EngineResult<Obligation> {
        check_amount(amount_due)?;
        let _guard = self.locks.acquire(obligation_id).await;
        let current = self.get_obligation(obligation_id).await?;
        if current.amount_due == amount_due {
            return Ok(current);
        }

        let mut updated = current.clone();
        updated.amount_due = amount_due;
        match self
            .store
            .update_obligation(&updated, UpdateGuard::NoConfirmedSettlements)
            .await?
        {
            UpdateOutcome::Applied => {}
            UpdateOutcome::Missing => return Err(EngineError::ObligationNotFound(obligation_id)),
            UpdateOutcome::HasConfirmedSettlements => {
                return Err(EngineError::ObligationLocked {
                    obligation_id,
                    reason: "amount due is frozen once a settlement is confirmed".to_string(),
                });
            }
        }

        info!(
            "obligation {obligation_id} amount revised from {} to {amount_due}",
            current.amount_due
        );
        self.record(
            obligation_id,
            DomainEventKind::ObligationAmountRevised,
            actor,
            json!({ "from": current.amount_due, "to": amount_due }),
        )
        .await;

        Ok(updated)
    }

    pub async fn delete_obligation(
        &self,
        obligation_id: Uuid,
        actor: Option<&str>,
    ) -> EngineResult<()> {
        let guard = self.locks.acquire(obligation_id).await;
        match self.store.delete_obligation(obligation_id).await? {
            DeleteOutcome::Deleted => {}
            DeleteOutcome::Missing => return Err(EngineError::ObligationNotFound(obligation_id)),
            DeleteOutcome::Referenced(count) => {
                return Err(EngineError::ObligationHasSettlements {
                    obligation_id,
                    count,
                });
            }
        }
        drop(guard);
        self.locks.forget(obligation_id).await;

        info!("obligation {obligation_id} deleted");
        self.record(
            obligation_id,
            DomainEventKind::ObligationDeleted,
            actor,
            json!({ "obligation_id": obligation_id }),
        )
        .await;
        Ok(())
    }

    pub async fn list_obligations(
        &self,
        filter: &ObligationFilter,
    ) -> EngineResult<Vec<Obligation>> {
        Ok(self.store.obligations(filter).await?)
    }

    async fn slot_obligation(
        &self,
        program_id: Uuid,
        slot: u32,
    ) -> EngineResult<Option<Obligation>> {
        let found = self
            .store
            .obligations(&ObligationFilter {
                program_id: Some(program_id),
                kind: Some(ObligationKind::ProgramChapter),
                slot: Some(slot),
                ..ObligationFilter::default()
            })
            .await?;
        Ok(found.into_iter().next())
    }

    async fn claim_slot(
        &self,
        existing: Obligation,
        request: NewObligation,
        owner: Option<MemberId>,
        actor: Option<&str>,
    ) -> EngineResult<Obligation> {
        let slot = existing.slot.unwrap_or_default();
        if let Some(holder) = &existing.owner_member_id {
            return Err(EngineError::DuplicateAssignment(format!(
                "slot {slot} of program {} is already assigned to {holder}; use reassign",
                existing.program_id
            )));
        }
        let Some(owner) = owner else {
            return Err(EngineError::DuplicateAssignment(format!(
                "slot {slot} of program {} already exists",
                existing.program_id
            )));
        };

        let _guard = self.locks.acquire(existing.id).await;
        let mut claimed = existing.clone();
        claimed.owner_member_id = Some(owner);
        claimed.amount_due = request.amount_due;
        if !request.label.trim().is_empty() {
            claimed.label = request.label.trim().to_string();
        }
        if request.due_period.is_some() {
            claimed.due_period = request.due_period;
        }

        match self
            .store
            .update_obligation(&claimed, UpdateGuard::NoConfirmedSettlements)
            .await?
        {
            UpdateOutcome::Applied => {}
            UpdateOutcome::Missing => return Err(EngineError::ObligationNotFound(existing.id)),
            UpdateOutcome::HasConfirmedSettlements => {
                return Err(EngineError::ObligationLocked {
                    obligation_id: existing.id,
                    reason: "vacant slot already carries confirmed settlements".to_string(),
                });
            }
        }

        info!(
            "slot {slot} of program {} claimed by {:?}",
            claimed.program_id, claimed.owner_member_id
        );
        self.record(
            claimed.id,
            DomainEventKind::ObligationReassigned,
            actor,
            json!({ "from": null, "to": claimed.owner_member_id, "forced": false }),
        )
        .await;
        Ok(claimed)
    }

    async fn ensure_single_due(
        &self,
        kind: ObligationKind,
        program_id: Uuid,
        period: Option<DuePeriod>,
        owner: &str,
        excluding: Option<Uuid>,
    ) -> EngineResult<()> {
        let Some(period) = period else {
            return Ok(());
        };
        if kind != ObligationKind::RecurringDue {
            return Ok(());
        }
        let held = self
            .store
            .obligations(&ObligationFilter {
                member: Some(owner.to_string()),
                program_id: Some(program_id),
                kind: Some(ObligationKind::RecurringDue),
                ..ObligationFilter::default()
            })
            .await?;
        if held.iter().any(|obligation| {
            Some(obligation.id) != excluding && obligation.due_period == Some(period)
        }) {
            return Err(EngineError::DuplicateAssignment(format!(
                "{owner} already holds a due for {} in program {program_id}",
                period.month_key()
            )));
        }
        Ok(())
    }
}
