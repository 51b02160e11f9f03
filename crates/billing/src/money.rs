//! Amount rules and fee definitions.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use levy_core::{DomainError, ValueObject};

/// Amounts are kept with two decimals.
pub const CURRENCY_SCALE: u32 = 2;

/// Positive, with at most two decimals.
pub fn validate_amount(amount: Decimal, what: &str) -> Result<(), DomainError> {
    if amount <= Decimal::ZERO {
        return Err(DomainError::validation(format!("{what} must be positive")));
    }
    if amount.normalize().scale() > CURRENCY_SCALE {
        return Err(DomainError::validation(format!(
            "{what} must not have more than {CURRENCY_SCALE} decimals"
        )));
    }
    Ok(())
}

/// Present an amount with exactly two decimals ("1200" → "1200.00").
pub fn to_currency(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(CURRENCY_SCALE);
    rounded
}

/// How a billing run prices each property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeeSchedule {
    /// Every eligible property pays the same amount.
    Flat { amount: Decimal },
    /// `total` is split by share ratio and rounded to whole currency units.
    Shared { total: Decimal },
}

impl ValueObject for FeeSchedule {}

impl FeeSchedule {
    pub fn validate(&self) -> Result<(), DomainError> {
        match self {
            FeeSchedule::Flat { amount } => validate_amount(*amount, "fee amount"),
            FeeSchedule::Shared { total } => validate_amount(*total, "fee total"),
        }
    }

    /// Amount owed by one property holding `share` out of `total_shares`.
    pub fn amount_for(&self, share: Decimal, total_shares: Decimal) -> Result<Decimal, DomainError> {
        match self {
            FeeSchedule::Flat { amount } => Ok(to_currency(*amount)),
            FeeSchedule::Shared { total } => {
                if share <= Decimal::ZERO {
                    return Err(DomainError::validation("share ratio must be positive"));
                }
                if total_shares <= Decimal::ZERO {
                    return Err(DomainError::validation("sum of share ratios must be positive"));
                }
                let raw = total
                    .checked_mul(share)
                    .and_then(|v| v.checked_div(total_shares))
                    .ok_or_else(|| DomainError::invariant("fee allocation overflow"))?;
                let cents = raw.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero);
                let whole = cents.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
                Ok(to_currency(whole))
            }
        }
    }
}
