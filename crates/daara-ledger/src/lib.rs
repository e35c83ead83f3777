//! Obligation/settlement engine.
//!
//! One pipeline serves every obligation kind (monthly dues, program
//! chapters, campaign pledges): the registry creates and assigns
//! obligations, members declare settlements against them, and a validating
//! authority confirms or rejects each declaration. Derived figures are
//! always recomputed from the store on read.

mod locks;
mod registry;
mod reports;
mod settlements;
mod validation;

use std::sync::Arc;

use daara_core::{
    DaaraPolicy, DomainEvent, DomainEventKind, EngineError, EngineResult, EventStore,
    LedgerStore, Obligation, SettlementPolicy,
};
use tokio::sync::Mutex;
use tracing::error;
use uuid::Uuid;

pub use locks::ObligationLocks;
pub use registry::{ProgramSlots, SlotAssignment};
pub use reports::{CategoryKey, CategoryTotals, ObligationView};
pub use validation::ExpirySummary;

const CONFIRM_ATTEMPTS: usize = 3;

pub struct SettlementEngine {
    store: Arc<dyn LedgerStore>,
    events: Arc<dyn EventStore>,
    policy: Arc<dyn SettlementPolicy>,
    locks: ObligationLocks,
    claims: Mutex<()>,
}

impl SettlementEngine {
    pub fn new(store: Arc<dyn LedgerStore>, events: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            events,
            policy: Arc::new(DaaraPolicy),
            locks: ObligationLocks::default(),
            claims: Mutex::new(()),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn SettlementPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &dyn SettlementPolicy {
        self.policy.as_ref()
    }

    pub async fn get_obligation(&self, obligation_id: Uuid) -> EngineResult<Obligation> {
        self.store
            .obligation(obligation_id)
            .await?
            .ok_or(EngineError::ObligationNotFound(obligation_id))
    }

    async fn record(
        &self,
        obligation_id: Uuid,
        kind: DomainEventKind,
        actor: Option<&str>,
        payload: serde_json::Value,
    ) {
        let event = DomainEvent::new(obligation_id, kind, actor, payload);
        if let Err(err) = self.events.append(obligation_id, event).await {
            error!("failed to append {kind:?} event for obligation {obligation_id}: {err:#}");
        }
    }
}

fn normalize_text(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}
