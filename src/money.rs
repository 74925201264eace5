use crate::error::LedgerError;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Largest amount accepted for an expense or a share. Keeps every balance
/// fold far below the range where `Decimal` addition overflows.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

/// Currency rounding used when comparing split totals and presenting balances.
pub fn round_to_2_decimals(n: Decimal) -> Decimal {
    n.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Parses a user supplied amount, rejecting anything non-numeric or negative.
pub fn parse_amount(text: &str) -> Result<Decimal, LedgerError> {
    let trimmed = text.trim();
    let amount = Decimal::from_str(trimmed)
        .map_err(|_| LedgerError::InvalidInput(format!("'{trimmed}' is not a valid amount")))?;
    ensure_non_negative(amount)?;
    Ok(amount)
}

pub fn ensure_non_negative(amount: Decimal) -> Result<(), LedgerError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(LedgerError::InvalidInput(format!(
            "amount {amount} must not be negative"
        )));
    }
    ensure_within_limit(amount)
}

/// An expense amount must be worth at least one cent once rounded.
pub fn ensure_positive(amount: Decimal) -> Result<(), LedgerError> {
    if round_to_2_decimals(amount) <= Decimal::ZERO {
        return Err(LedgerError::InvalidInput(format!(
            "expense amount {amount} must be at least 0.01"
        )));
    }
    ensure_within_limit(amount)
}

fn ensure_within_limit(amount: Decimal) -> Result<(), LedgerError> {
    if amount > MAX_AMOUNT {
        return Err(LedgerError::InvalidInput(format!(
            "amount {amount} is above the limit of {MAX_AMOUNT}"
        )));
    }
    Ok(())
}
