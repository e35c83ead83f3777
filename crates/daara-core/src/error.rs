use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{PaymentMethod, SettlementStatus};

pub type EngineResult<T> = Result<T, EngineError>;

/// Failures reported by engine operations. Every variant maps to a stable
/// `error_kind` string through [`EngineError::kind`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("invalid amount {amount}: {reason}")]
    InvalidAmount { amount: Decimal, reason: String },

    #[error("{method} payments require an external reference")]
    MissingReference { method: PaymentMethod },

    #[error("obligation not found: {0}")]
    ObligationNotFound(Uuid),

    #[error("settlement not found: {0}")]
    SettlementNotFound(Uuid),

    #[error("settlement {settlement_id} is {from}, cannot become {to}")]
    InvalidTransition {
        settlement_id: Uuid,
        from: SettlementStatus,
        to: SettlementStatus,
    },

    #[error(
        "confirming {attempted} on obligation {obligation_id} would bring the settled total \
         from {confirmed} above the amount due {amount_due}"
    )]
    OverpaymentDetected {
        obligation_id: Uuid,
        amount_due: Decimal,
        confirmed: Decimal,
        attempted: Decimal,
    },

    #[error("obligation {obligation_id} is locked: {reason}")]
    ObligationLocked { obligation_id: Uuid, reason: String },

    #[error("obligation {obligation_id} still has {count} settlement(s)")]
    ObligationHasSettlements { obligation_id: Uuid, count: usize },

    #[error("duplicate assignment: {0}")]
    DuplicateAssignment(String),

    #[error("invalid due period: {0}")]
    InvalidPeriod(String),

    #[error("slot count must be between 1 and {max}, got {requested}")]
    InvalidSlotCount { requested: u32, max: u32 },

    #[error("program {program_id} has no slot {slot}")]
    SlotNotFound { program_id: Uuid, slot: u32 },

    #[error("external reference {reference} is already used by confirmed settlement {existing}")]
    DuplicateReference { reference: String, existing: Uuid },

    #[error("storage failure: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidAmount { .. } => "InvalidAmount",
            Self::MissingReference { .. } => "MissingReference",
            Self::ObligationNotFound(_) => "ObligationNotFound",
            Self::SettlementNotFound(_) => "SettlementNotFound",
            Self::InvalidTransition { .. } => "InvalidTransition",
            Self::OverpaymentDetected { .. } => "OverpaymentDetected",
            Self::ObligationLocked { .. } => "ObligationLocked",
            Self::ObligationHasSettlements { .. } => "ObligationHasSettlements",
            Self::DuplicateAssignment(_) => "DuplicateAssignment",
            Self::InvalidPeriod(_) => "InvalidPeriod",
            Self::InvalidSlotCount { .. } => "InvalidSlotCount",
            Self::SlotNotFound { .. } => "SlotNotFound",
            Self::DuplicateReference { .. } => "DuplicateReference",
            Self::Storage(_) => "Storage",
        }
    }

    pub fn invalid_amount(amount: Decimal, reason: impl Into<String>) -> Self {
        Self::InvalidAmount {
            amount,
            reason: reason.into(),
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(format!("{err:#}"))
    }
}
