use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::PaymentMethod;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObligationDefaults {
    pub monthly_due_amount: Decimal,
    pub chapters_per_program: u32,
    pub max_slots_per_program: u32,
}

pub trait SettlementPolicy: Send + Sync {
    fn name(&self) -> &'static str;
    fn defaults(&self) -> ObligationDefaults;
    /// Whether a method implies an externally verifiable transaction id.
    fn requires_reference(&self, method: PaymentMethod) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct DaaraPolicy;

impl SettlementPolicy for DaaraPolicy {
    fn name(&self) -> &'static str {
        "daara-standard"
    }

    fn defaults(&self) -> ObligationDefaults {
        ObligationDefaults {
            monthly_due_amount: Decimal::new(100000, 2), // 1,000.00
            chapters_per_program: 30,
            max_slots_per_program: 1000,
        }
    }

    fn requires_reference(&self, method: PaymentMethod) -> bool {
        matches!(method, PaymentMethod::MobileWallet)
    }
}
