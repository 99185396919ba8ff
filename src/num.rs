//! Fixed-precision decimal helpers.
//!
//! Engine math runs at full [`rust_decimal::Decimal`] precision. Rounding is
//! applied only at value boundaries: display values use banker's rounding at
//! the symbol's configured precision, while persisted `quote_amount` and
//! `fee_amount` are truncated toward zero so a fill can never be credited
//! more than was matched.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{ExchangeResult, ValidationError};

/// Fractional digits carried by the persistence layer (`DECIMAL(36, 18)`).
pub const STORE_SCALE: u32 = 18;

/// Banker's rounding at the given number of fractional digits.
pub fn round_display(value: Decimal, precision: u32) -> Decimal {
    value.round_dp_with_strategy(precision, RoundingStrategy::MidpointNearestEven)
}

/// Truncation toward zero at the given number of fractional digits.
pub fn trunc(value: Decimal, precision: u32) -> Decimal {
    value.round_dp_with_strategy(precision, RoundingStrategy::ToZero)
}

/// Clamp a full-precision value to the store scale before persisting.
pub fn to_store_scale(value: Decimal) -> Decimal {
    trunc(value, STORE_SCALE)
}

/// Validates that a user-supplied amount is strictly positive.
pub fn require_positive(field: &'static str, value: Decimal) -> ExchangeResult<Decimal> {
    if value <= Decimal::ZERO {
        return Err(ValidationError::MalformedAmount {
            field,
            value: value.to_string(),
        }
        .into());
    }
    Ok(value)
}

/// Validates that a user-supplied amount is zero or positive.
pub fn require_non_negative(field: &'static str, value: Decimal) -> ExchangeResult<Decimal> {
    if value < Decimal::ZERO {
        return Err(ValidationError::MalformedAmount {
            field,
            value: value.to_string(),
        }
        .into());
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn display_rounding_is_bankers() {
        // Midpoints round to the even neighbor.
        assert_eq!(round_display(dec!(2.5), 0), dec!(2));
        assert_eq!(round_display(dec!(3.5), 0), dec!(4));
        assert_eq!(round_display(dec!(0.125), 2), dec!(0.12));
        assert_eq!(round_display(dec!(0.135), 2), dec!(0.14));
    }

    #[test]
    fn trunc_never_rounds_up() {
        assert_eq!(trunc(dec!(1.999999), 2), dec!(1.99));
        assert_eq!(trunc(dec!(-1.999999), 2), dec!(-1.99));
        assert_eq!(trunc(dec!(1.0), 2), dec!(1.0));
    }

    #[test]
    fn positive_guard_rejects_zero_and_negative() {
        assert!(require_positive("amount_in", dec!(0)).is_err());
        assert!(require_positive("amount_in", dec!(-1)).is_err());
        assert_eq!(require_positive("amount_in", dec!(0.1)).unwrap(), dec!(0.1));
    }
}
