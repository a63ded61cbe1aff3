//! Decimal currency amounts to integer minor units (cents).

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("Amount '{0}' is not a decimal number")]
    Unparseable(String),
    #[error("Amount {0} must be greater than zero")]
    NotPositive(Decimal),
    #[error("Amount {0} has more than two decimal places")]
    SubCent(Decimal),
    #[error("Amount {0} is too large")]
    Overflow(Decimal),
}

/// Exact conversion; anything that would need rounding is rejected.
pub fn to_minor_units(amount: Decimal) -> Result<i64, AmountError> {
    if amount <= Decimal::ZERO {
        return Err(AmountError::NotPositive(amount));
    }

    let cents = amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .ok_or(AmountError::Overflow(amount))?;

    if !cents.fract().is_zero() {
        return Err(AmountError::SubCent(amount));
    }

    cents.to_i64().ok_or(AmountError::Overflow(amount))
}

pub fn parse_minor_units(amount: &str) -> Result<i64, AmountError> {
    let value = Decimal::from_str(amount.trim())
        .map_err(|_| AmountError::Unparseable(amount.to_string()))?;
    to_minor_units(value)
}
