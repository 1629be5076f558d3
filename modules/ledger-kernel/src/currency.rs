//! Currency registry and the single sanctioned rounding function.
//!
//! The registry is an immutable compile-time table: ISO 4217 code to decimal
//! places and per-currency rounding tolerance (one minor unit). Any currency
//! outside the table is rejected at the boundary with `CURRENCY_INVALID`.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::errors::LedgerError;

/// (code, decimal places) for every currency the kernel accepts.
///
/// Decimal places follow ISO 4217 minor-unit definitions.
const CURRENCIES: &[(&str, u32)] = &[
    ("AUD", 2),
    ("BHD", 3),
    ("BRL", 2),
    ("CAD", 2),
    ("CHF", 2),
    ("CNY", 2),
    ("DKK", 2),
    ("EUR", 2),
    ("GBP", 2),
    ("HKD", 2),
    ("INR", 2),
    ("JPY", 0),
    ("KRW", 0),
    ("KWD", 3),
    ("MXN", 2),
    ("NOK", 2),
    ("NZD", 2),
    ("PLN", 2),
    ("SEK", 2),
    ("SGD", 2),
    ("USD", 2),
    ("ZAR", 2),
];

/// Number of decimal places for a registered currency.
pub fn decimal_places(code: &str) -> Result<u32, LedgerError> {
    CURRENCIES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, places)| *places)
        .ok_or_else(|| LedgerError::CurrencyInvalid {
            code: code.to_string(),
        })
}

/// Rounding tolerance for a currency: one minor unit.
///
/// Post-rounding drift up to this tolerance is absorbed by a synthetic
/// rounding line; anything larger is an unbalanced posting.
pub fn rounding_tolerance(code: &str) -> Result<Decimal, LedgerError> {
    let places = decimal_places(code)?;
    Ok(Decimal::new(1, places))
}

/// Whether the code is present in the registry.
pub fn is_registered(code: &str) -> bool {
    CURRENCIES.iter().any(|(c, _)| *c == code)
}

/// All registered codes, in sorted order (the table is kept sorted).
pub fn all_codes() -> impl Iterator<Item = &'static str> {
    CURRENCIES.iter().map(|(c, _)| *c)
}

/// Round a monetary amount to the currency's precision, HALF-UP.
///
/// This is the only rounding function in the system. HALF-UP means ties
/// round away from zero: 0.005 USD becomes 0.01, -0.005 becomes -0.01.
pub fn round_money(amount: Decimal, currency: &str) -> Result<Decimal, LedgerError> {
    let places = decimal_places(currency)?;
    Ok(amount.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn half_up_rounds_midpoint_away_from_zero() {
        assert_eq!(round_money(dec("0.005"), "USD").unwrap(), dec("0.01"));
        assert_eq!(round_money(dec("-0.005"), "USD").unwrap(), dec("-0.01"));
        assert_eq!(round_money(dec("0.004"), "USD").unwrap(), dec("0.00"));
        assert_eq!(round_money(dec("2.675"), "USD").unwrap(), dec("2.68"));
    }

    #[test]
    fn zero_decimal_currencies_round_to_whole_units() {
        assert_eq!(round_money(dec("100.4"), "JPY").unwrap(), dec("100"));
        assert_eq!(round_money(dec("100.5"), "JPY").unwrap(), dec("101"));
    }

    #[test]
    fn three_decimal_currencies() {
        assert_eq!(round_money(dec("1.2345"), "KWD").unwrap(), dec("1.235"));
        assert_eq!(rounding_tolerance("KWD").unwrap(), dec("0.001"));
    }

    #[test]
    fn tolerance_is_one_minor_unit() {
        assert_eq!(rounding_tolerance("USD").unwrap(), dec("0.01"));
        assert_eq!(rounding_tolerance("JPY").unwrap(), dec("1"));
    }

    #[test]
    fn unknown_currency_is_rejected() {
        let err = round_money(dec("1"), "XXX").unwrap_err();
        assert_eq!(err.code(), "CURRENCY_INVALID");
        assert!(!is_registered("XXX"));
        assert!(is_registered("EUR"));
    }

    #[test]
    fn registry_table_is_sorted_by_code() {
        let codes: Vec<&str> = all_codes().collect();
        let mut sorted = codes.clone();
        sorted.sort_unstable();
        assert_eq!(codes, sorted);
    }
}
