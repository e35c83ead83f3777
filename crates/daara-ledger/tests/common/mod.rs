#![allow(dead_code)]

use std::sync::Arc;

use daara_core::{
    DuePeriod, NewObligation, NewSettlement, Obligation, ObligationKind, PaymentMethod,
    Settlement,
};
use daara_ledger::SettlementEngine;
use daara_store::{InMemoryEventStore, InMemoryLedgerStore};
use rust_decimal::Decimal;
use uuid::Uuid;

pub const VALIDATOR: &str = "validator-1";

pub struct Harness {
    pub engine: Arc<SettlementEngine>,
    pub store: Arc<InMemoryLedgerStore>,
    pub events: Arc<InMemoryEventStore>,
}

pub fn harness() -> Harness {
    let store = Arc::new(InMemoryLedgerStore::new());
    let events = Arc::new(InMemoryEventStore::default());
    let engine = Arc::new(SettlementEngine::new(store.clone(), events.clone()));
    Harness {
        engine,
        store,
        events,
    }
}

pub fn dec(value: i64) -> Decimal {
    Decimal::from(value)
}

pub fn pledge(owner: &str, amount_due: i64) -> NewObligation {
    NewObligation {
        kind: ObligationKind::CampaignPledge,
        owner_member_id: Some(owner.to_string()),
        program_id: Uuid::new_v4(),
        slot: None,
        label: "Mosque roof campaign".to_string(),
        amount_due: dec(amount_due),
        due_period: None,
    }
}

pub fn monthly_due(owner: &str, program_id: Uuid, year: i32, month: u32) -> NewObligation {
    NewObligation {
        kind: ObligationKind::RecurringDue,
        owner_member_id: Some(owner.to_string()),
        program_id,
        slot: None,
        label: format!("Monthly due {year}-{month:02}"),
        amount_due: dec(1000),
        due_period: Some(DuePeriod::Month { year, month }),
    }
}

pub fn wallet(obligation_id: Uuid, member: &str, amount: i64, reference: &str) -> NewSettlement {
    NewSettlement {
        obligation_id,
        declared_by_member_id: member.to_string(),
        amount: dec(amount),
        method: PaymentMethod::MobileWallet,
        external_reference: Some(reference.to_string()),
        idempotency_key: None,
    }
}

pub fn cash(obligation_id: Uuid, member: &str, amount: i64) -> NewSettlement {
    NewSettlement {
        obligation_id,
        declared_by_member_id: member.to_string(),
        amount: dec(amount),
        method: PaymentMethod::Cash,
        external_reference: None,
        idempotency_key: None,
    }
}

impl Harness {
    pub async fn obligation(&self, request: NewObligation) -> Obligation {
        self.engine
            .create_obligation(request, Some("admin"))
            .await
            .expect("obligation created")
    }

    pub async fn confirmed(&self, request: NewSettlement) -> Settlement {
        let declared = self
            .engine
            .declare_settlement(request)
            .await
            .expect("settlement declared");
        self.engine
            .confirm(declared.id, VALIDATOR)
            .await
            .expect("settlement confirmed")
    }
}
