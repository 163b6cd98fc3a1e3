//! Decimal money helpers.
//!
//! Every amount in the system is a `BigDecimal`. Persisted amounts carry
//! [`MONEY_SCALE`] fractional digits; intermediate products keep the full
//! precision of `BigDecimal` division and are rounded once at the end.

use bigdecimal::BigDecimal;
use std::str::FromStr;
use thiserror::Error;

/// Fractional digits stored for every currency amount.
pub const MONEY_SCALE: i64 = 2;

const MONTHS_PER_YEAR: i32 = 12;
/// Absolute tolerance of [`nearly_equal`], 1e-9. Always far below one
/// unit of [`MONEY_SCALE`], so it never absorbs a real cent.
const NEARLY_EQUAL_TOLERANCE: i64 = 1_000_000_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("principal amount must be greater than zero")]
    NonPositivePrincipal,

    #[error("interest rate must not be negative")]
    NegativeRate,

    #[error("loan term must be at least one month")]
    InvalidTerm,

    #[error("invalid amount '{0}'")]
    Parse(String),
}

/// Interest figures computed once when a loan is created.
#[derive(Debug, Clone, PartialEq)]
pub struct LoanReturns {
    pub total_interest: BigDecimal,
    /// Percentage with two fractional digits, e.g. `"8.00"`.
    pub roi: String,
}

/// total interest = principal * rate * (term / 12), ROI = interest / principal * 100.
pub fn calculate_returns(
    principal: &BigDecimal,
    annual_rate: &BigDecimal,
    term_months: i32,
) -> Result<LoanReturns, MoneyError> {
    let zero = BigDecimal::from(0);
    if principal <= &zero {
        return Err(MoneyError::NonPositivePrincipal);
    }
    if annual_rate < &zero {
        return Err(MoneyError::NegativeRate);
    }
    if term_months <= 0 {
        return Err(MoneyError::InvalidTerm);
    }

    // Multiply before dividing so that whole-month terms stay exact.
    let interest = principal * annual_rate * BigDecimal::from(term_months)
        / BigDecimal::from(MONTHS_PER_YEAR);
    let roi = interest.clone() / principal.clone() * BigDecimal::from(100);

    Ok(LoanReturns {
        total_interest: round_money(&interest),
        roi: round_money(&roi).to_string(),
    })
}

/// Rounds to [`MONEY_SCALE`] and pads so the value always renders two digits.
pub fn round_money(value: &BigDecimal) -> BigDecimal {
    value.round(MONEY_SCALE).with_scale(MONEY_SCALE)
}

/// True when `amount` has no more fractional digits than a stored amount.
pub fn fits_money_scale(amount: &BigDecimal) -> bool {
    amount.with_scale(MONEY_SCALE) == *amount
}

pub fn parse_amount(raw: &str) -> Result<BigDecimal, MoneyError> {
    BigDecimal::from_str(raw.trim()).map_err(|_| MoneyError::Parse(raw.to_string()))
}

/// Equality used for the full-funding check.
///
/// Stored amounts are exact at [`MONEY_SCALE`] and compare through the
/// first branch. The tolerance is absolute and independent of magnitude,
/// so two amounts a cent apart are never equal however large they are.
pub fn nearly_equal(a: &BigDecimal, b: &BigDecimal) -> bool {
    if a == b {
        return true;
    }

    let epsilon = BigDecimal::from(1) / BigDecimal::from(NEARLY_EQUAL_TOLERANCE);
    (a - b).abs() < epsilon
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn test_six_month_product_returns() {
        let returns = calculate_returns(&dec("10000000"), &dec("0.08"), 6).unwrap();
        assert_eq!(returns.total_interest, dec("400000"));
        assert_eq!(returns.total_interest.to_string(), "400000.00");
        assert_eq!(returns.roi, "4.00");
    }

    #[test]
    fn test_twelve_month_roi_matches_annual_rate() {
        let returns = calculate_returns(&dec("10000000"), &dec("0.08"), 12).unwrap();
        assert_eq!(returns.total_interest, dec("800000"));
        assert_eq!(returns.roi, "8.00");
    }

    #[test]
    fn test_rounding_of_repeating_fractions() {
        // 1000 * 0.1 * 1 / 12 = 8.3333...
        let returns = calculate_returns(&dec("1000"), &dec("0.1"), 1).unwrap();
        assert_eq!(returns.total_interest.to_string(), "8.33");
        assert_eq!(returns.roi, "0.83");
    }

    #[test]
    fn test_rejects_invalid_inputs() {
        assert_eq!(
            calculate_returns(&dec("0"), &dec("0.08"), 6),
            Err(MoneyError::NonPositivePrincipal)
        );
        assert_eq!(
            calculate_returns(&dec("100"), &dec("-0.01"), 6),
            Err(MoneyError::NegativeRate)
        );
        assert_eq!(
            calculate_returns(&dec("100"), &dec("0.08"), 0),
            Err(MoneyError::InvalidTerm)
        );
    }

    #[test]
    fn test_nearly_equal() {
        assert!(nearly_equal(&dec("10000000"), &dec("10000000.00")));
        assert!(nearly_equal(&dec("10000000"), &dec("10000000.0000000001")));
        assert!(!nearly_equal(&dec("10000000"), &dec("9999999.99")));
        assert!(!nearly_equal(&dec("0"), &dec("0.01")));
        assert!(nearly_equal(&dec("0"), &dec("0.00")));
    }

    #[test]
    fn test_nearly_equal_does_not_scale_with_magnitude() {
        assert!(!nearly_equal(&dec("1000000000"), &dec("999999999.99")));
        assert!(!nearly_equal(&dec("1000000000000"), &dec("999999999999.99")));
        assert!(!nearly_equal(&dec("1000000000"), &dec("999999998.00")));
        assert!(nearly_equal(&dec("1000000000000"), &dec("1000000000000.0000000001")));
    }

    #[test]
    fn test_fits_money_scale() {
        assert!(fits_money_scale(&dec("100")));
        assert!(fits_money_scale(&dec("100.25")));
        assert!(!fits_money_scale(&dec("100.255")));
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount(" 2000000 ").unwrap(), dec("2000000"));
        assert!(matches!(parse_amount("two"), Err(MoneyError::Parse(_))));
    }
}
