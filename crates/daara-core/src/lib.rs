pub mod error;
pub mod events;
pub mod models;
pub mod policy;
pub mod storage;

pub use error::{EngineError, EngineResult};
pub use events::{DomainEvent, DomainEventKind};
pub use models::{
    DuePeriod, MemberId, NewObligation, NewSettlement, Obligation, ObligationKind,
    ObligationStatus, PaymentMethod, Settlement, SettlementStatus,
};
pub use policy::{DaaraPolicy, ObligationDefaults, SettlementPolicy};
pub use storage::{
    DeleteOutcome, EventEnvelope, EventStore, InsertOutcome, LedgerStore, ObligationFilter,
    Resolution, ResolveOutcome, SettlementFilter, UpdateGuard, UpdateOutcome,
};
