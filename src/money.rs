//! Money helpers.
//!
//! All amounts in the system are `rust_decimal::Decimal`, two fractional
//! digits, strictly positive at every API boundary. JSON carries them as
//! strings ("120.00"), never floats. These helpers centralize the scale
//! rules so no caller re-implements them.

use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};

/// Maximum fractional digits an amount may carry.
pub const MONEY_SCALE: u32 = 2;

/// Validates an incoming amount: strictly positive, at most two decimal
/// places. Returns the amount normalized to exactly two places so that
/// `120`, `120.0` and `120.00` compare and format identically downstream.
pub fn validate_amount(amount: Decimal) -> CoreResult<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(CoreError::validation(format!(
            "amount must be positive, got {amount}"
        )));
    }
    if amount.scale() > MONEY_SCALE {
        return Err(CoreError::validation(format!(
            "amount {amount} has more than {MONEY_SCALE} decimal places"
        )));
    }
    Ok(normalize(amount))
}

/// Rescales to two fractional digits without rounding surprises.
/// Only call on amounts already known to fit the scale rule.
pub fn normalize(amount: Decimal) -> Decimal {
    let mut out = amount;
    out.rescale(MONEY_SCALE);
    out
}

/// Parses an amount persisted as TEXT by the SQLite mirror.
pub fn parse_stored_amount(raw: &str) -> anyhow::Result<Decimal> {
    let value = Decimal::from_str(raw)
        .map_err(|e| anyhow::anyhow!("bad stored amount {raw:?}: {e}"))?;
    Ok(normalize(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rejects_non_positive() {
        assert!(validate_amount(dec!(0)).is_err());
        assert!(validate_amount(dec!(-5.00)).is_err());
    }

    #[test]
    fn rejects_sub_paise_precision() {
        assert!(validate_amount(dec!(10.005)).is_err());
    }

    #[test]
    fn normalizes_scale() {
        assert_eq!(validate_amount(dec!(120)).unwrap().to_string(), "120.00");
        assert_eq!(validate_amount(dec!(99.5)).unwrap().to_string(), "99.50");
    }

    #[test]
    fn stored_round_trip() {
        let amount = validate_amount(dec!(42.75)).unwrap();
        let back = parse_stored_amount(&amount.to_string()).unwrap();
        assert_eq!(amount, back);
    }
}
