use daara_core::{EngineError, EngineResult, Obligation};
use rust_decimal::Decimal;

use crate::figures::balance_after;

/// Largest value a `NUMERIC(18, 2)` column holds.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(2_808_348_671, 232_830_643, 0, false, 2);

pub const AMOUNT_SCALE: u32 = 2;

pub fn check_amount(amount: Decimal) -> EngineResult<()> {
    if amount <= Decimal::ZERO {
        return Err(EngineError::invalid_amount(amount, "amount must be positive"));
    }
    if amount.normalize().scale() > AMOUNT_SCALE {
        return Err(EngineError::invalid_amount(
            amount,
            format!("at most {AMOUNT_SCALE} decimal places are allowed"),
        ));
    }
    if amount > MAX_AMOUNT {
        return Err(EngineError::invalid_amount(
            amount,
            format!("exceeds the largest amount of {MAX_AMOUNT}"),
        ));
    }
    Ok(())
}

/// Pending declarations do not reduce the balance.
pub fn check_declaration(
    obligation: &Obligation,
    confirmed_total: Decimal,
    amount: Decimal,
) -> EngineResult<()> {
    check_amount(amount)?;
    let remaining = balance_after(obligation.amount_due, confirmed_total);
    if amount > remaining {
        return Err(EngineError::invalid_amount(
            amount,
            format!("exceeds the remaining balance of {remaining}"),
        ));
    }
    Ok(())
}

pub fn check_confirmation(
    obligation: &Obligation,
    confirmed_total: Decimal,
    amount: Decimal,
) -> EngineResult<()> {
    if confirmed_total + amount > obligation.amount_due {
        return Err(EngineError::OverpaymentDetected {
            obligation_id: obligation.id,
            amount_due: obligation.amount_due,
            confirmed: confirmed_total,
            attempted: amount,
        });
    }
    Ok(())
}
