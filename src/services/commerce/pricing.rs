use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::errors::ServiceError;

/// Minor units per major unit for two-decimal currencies
const MINOR_UNITS_PER_MAJOR: i64 = 100;

/// Converts a major-unit price to minor units, rounding half away from zero.
///
/// `10.00` becomes `1000`, `0.005` becomes `1`, `19.994` becomes `1999`.
pub fn to_minor_units(price: Decimal) -> Result<i64, ServiceError> {
    if price.is_sign_negative() && !price.is_zero() {
        return Err(ServiceError::InvalidInput(format!(
            "price must not be negative: {price}"
        )));
    }

    price
        .checked_mul(Decimal::from(MINOR_UNITS_PER_MAJOR))
        .map(|scaled| scaled.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|rounded| rounded.to_i64())
        .ok_or_else(|| ServiceError::InvalidInput(format!("price out of range: {price}")))
}

/// Sum of `unit * quantity` across lines, `None` on overflow
pub fn line_total(unit_minor_units: i64, quantity: u32) -> Option<i64> {
    unit_minor_units.checked_mul(i64::from(quantity))
}
