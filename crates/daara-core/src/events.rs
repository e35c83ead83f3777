use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DomainEventKind {
    ObligationCreated,
    ObligationReassigned,
    ObligationAmountRevised,
    ObligationDeleted,
    SettlementDeclared,
    SettlementConfirmed,
    SettlementRejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub kind: DomainEventKind,
    pub actor: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl DomainEvent {
    pub fn new(
        aggregate_id: Uuid,
        kind: DomainEventKind,
        actor: Option<&str>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate_id,
            kind,
            actor: actor.map(str::to_string),
            occurred_at: Utc::now(),
            payload,
        }
    }
}
