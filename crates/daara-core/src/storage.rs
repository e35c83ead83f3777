use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::events::DomainEvent;
use crate::models::{
    MemberId, Obligation, ObligationKind, PaymentMethod, Settlement, SettlementStatus,
};

#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub sequence: i64,
    pub stream_id: Uuid,
    pub event: DomainEvent,
    pub stored_at: DateTime<Utc>,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, stream_id: Uuid, event: DomainEvent) -> anyhow::Result<EventEnvelope>;
    async fn stream(&self, stream_id: Uuid) -> anyhow::Result<Vec<EventEnvelope>>;
}

/// Obligation query. Unset fields do not constrain the result; set fields combine with AND.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObligationFilter {
    pub member: Option<MemberId>,
    pub program_id: Option<Uuid>,
    pub kind: Option<ObligationKind>,
    pub slot: Option<u32>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

impl ObligationFilter {
    pub fn by_member(member: impl Into<MemberId>) -> Self {
        Self {
            member: Some(member.into()),
            ..Self::default()
        }
    }

    pub fn by_program(program_id: Uuid) -> Self {
        Self {
            program_id: Some(program_id),
            ..Self::default()
        }
    }

    pub fn by_kind(kind: ObligationKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn matches(&self, obligation: &Obligation) -> bool {
        if let Some(member) = &self.member
            && obligation.owner_member_id.as_ref() != Some(member)
        {
            return false;
        }
        if self.program_id.is_some_and(|id| id != obligation.program_id) {
            return false;
        }
        if self.kind.is_some_and(|kind| kind != obligation.kind) {
            return false;
        }
        if self.slot.is_some() && self.slot != obligation.slot {
            return false;
        }
        if self.created_from.is_some_and(|from| obligation.created_at < from) {
            return false;
        }
        if self.created_to.is_some_and(|to| obligation.created_at > to) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettlementFilter {
    pub obligation_ids: Option<Vec<Uuid>>,
    pub declared_by: Option<MemberId>,
    pub status: Option<SettlementStatus>,
    pub method: Option<PaymentMethod>,
    pub external_reference: Option<String>,
    pub declared_before: Option<DateTime<Utc>>,
}

impl SettlementFilter {
    pub fn pending() -> Self {
        Self {
            status: Some(SettlementStatus::Pending),
            ..Self::default()
        }
    }

    pub fn matches(&self, settlement: &Settlement) -> bool {
        if let Some(ids) = &self.obligation_ids
            && !ids.contains(&settlement.obligation_id)
        {
            return false;
        }
        if let Some(member) = &self.declared_by
            && &settlement.declared_by_member_id != member
        {
            return false;
        }
        if self.status.is_some_and(|status| status != settlement.status) {
            return false;
        }
        if self.method.is_some_and(|method| method != settlement.method) {
            return false;
        }
        if let Some(reference) = &self.external_reference
            && settlement.external_reference.as_ref() != Some(reference)
        {
            return false;
        }
        if self
            .declared_before
            .is_some_and(|before| settlement.declared_at >= before)
        {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Apply only if the obligation's confirmed total still equals the total
    /// the caller checked against. The store re-checks the ceiling and the
    /// external reference under its own guard.
    Confirm { expected_confirmed_total: Decimal },
    Reject { note: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    Applied(Settlement),
    Missing,
    NotPending(Settlement),
    TotalChanged { current_total: Decimal },
    CeilingExceeded {
        amount_due: Decimal,
        confirmed_total: Decimal,
    },
    ReferenceTaken { existing: Uuid },
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted,
    KeyTaken(Settlement),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateGuard {
    Unconditional,
    NoConfirmedSettlements,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    Missing,
    HasConfirmedSettlements,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Missing,
    Referenced(usize),
}

/// Authoritative record store for obligations and settlements.
///
/// Conditional writes (`update_obligation`, `delete_obligation`,
/// `resolve_settlement`) must evaluate their guard and apply the write
/// atomically with respect to other writers of the same obligation.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert_obligation(&self, obligation: &Obligation) -> anyhow::Result<()>;
    async fn update_obligation(
        &self,
        obligation: &Obligation,
        guard: UpdateGuard,
    ) -> anyhow::Result<UpdateOutcome>;
    async fn delete_obligation(&self, obligation_id: Uuid) -> anyhow::Result<DeleteOutcome>;
    async fn obligation(&self, obligation_id: Uuid) -> anyhow::Result<Option<Obligation>>;
    async fn obligations(&self, filter: &ObligationFilter) -> anyhow::Result<Vec<Obligation>>;

    async fn insert_settlement(&self, settlement: &Settlement) -> anyhow::Result<InsertOutcome>;
    async fn settlement(&self, settlement_id: Uuid) -> anyhow::Result<Option<Settlement>>;
    async fn settlements(&self, filter: &SettlementFilter) -> anyhow::Result<Vec<Settlement>>;
    async fn settlement_by_idempotency_key(&self, key: &str)
    -> anyhow::Result<Option<Settlement>>;
    async fn resolve_settlement(
        &self,
        settlement_id: Uuid,
        resolved_by: &str,
        resolved_at: DateTime<Utc>,
        resolution: &Resolution,
    ) -> anyhow::Result<ResolveOutcome>;
}
