//! Money - Non-negative integer minor-unit amounts
//!
//! Every amount that crosses a component boundary in Hearth is a `Money`.
//! Decimal strings coming from forms or bank files are parsed exactly once,
//! at the edge, with `Money::parse_decimal`.

use crate::currency::Currency;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when working with money
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Amount cannot be negative: {0}")]
    NegativeAmount(i64),

    #[error("Invalid decimal amount: {0}")]
    InvalidDecimal(String),

    #[error("Amount {value} has more than {exponent} decimal places")]
    TooPrecise { value: String, exponent: u32 },

    #[error("Amount overflows minor-unit range: {0}")]
    Overflow(String),
}

/// A non-negative amount in integer minor units (cents for USD).
///
/// # Invariant
/// The inner value is always >= 0. This is enforced by the constructor.
///
/// # Example
/// ```
/// use hearth_core::{Currency, Money};
///
/// let amount = Money::parse_decimal("1500.25", &Currency::Usd).unwrap();
/// assert_eq!(amount.minor(), 150_025);
///
/// // Negative amounts are rejected
/// assert!(Money::new(-1).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Money(i64);

impl Money {
    /// Zero amount constant
    pub const ZERO: Self = Self(0);

    /// Create a new Money from minor units.
    ///
    /// Returns an error if the value is negative.
    pub fn new(minor: i64) -> Result<Self, MoneyError> {
        if minor < 0 {
            Err(MoneyError::NegativeAmount(minor))
        } else {
            Ok(Self(minor))
        }
    }

    /// Clamp a signed balance into money; negative balances become zero.
    pub fn from_balance(minor: i64) -> Self {
        Self(minor.max(0))
    }

    /// Get the inner minor-unit value
    #[inline]
    pub const fn minor(&self) -> i64 {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(&self, other: &Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    /// Subtraction that returns None if the result would be negative
    pub fn checked_sub(&self, other: &Money) -> Option<Money> {
        let result = self.0.checked_sub(other.0)?;
        if result < 0 {
            None
        } else {
            Some(Money(result))
        }
    }

    pub fn saturating_sub(&self, other: &Money) -> Money {
        Money(self.0.saturating_sub(other.0).max(0))
    }

    /// Parse a decimal string (e.g. "1500.00") into minor units of `currency`.
    ///
    /// Rejects negative values and values with more fractional digits than
    /// the currency's minor-unit exponent allows.
    pub fn parse_decimal(input: &str, currency: &Currency) -> Result<Self, MoneyError> {
        let value = Decimal::from_str(input.trim())
            .map_err(|_| MoneyError::InvalidDecimal(input.to_string()))?;
        Self::from_decimal(value, currency)
    }

    /// Convert a major-unit decimal into minor units of `currency`.
    pub fn from_decimal(value: Decimal, currency: &Currency) -> Result<Self, MoneyError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(MoneyError::InvalidDecimal(format!(
                "negative amount {value}"
            )));
        }

        let exponent = currency.minor_exponent();
        let scaled = value * Decimal::from(10i64.pow(exponent));
        if !scaled.fract().is_zero() {
            return Err(MoneyError::TooPrecise {
                value: value.to_string(),
                exponent,
            });
        }

        let minor = scaled
            .to_i64()
            .ok_or_else(|| MoneyError::Overflow(value.to_string()))?;
        Self::new(minor)
    }

    /// Major-unit decimal representation (e.g. 150000 cents -> 1500.00)
    pub fn to_decimal(&self, currency: &Currency) -> Decimal {
        Decimal::new(self.0, currency.minor_exponent())
    }

    /// Decimal string for display and export ("1500.00")
    pub fn to_decimal_string(&self, currency: &Currency) -> String {
        self.to_decimal(currency).to_string()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for Money {
    type Error = MoneyError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Money> for i64 {
    fn from(money: Money) -> Self {
        money.0
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::ZERO
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        Money(iter.map(|m| m.0).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_positive() {
        let money = Money::new(150_000).unwrap();
        assert_eq!(money.minor(), 150_000);
    }

    #[test]
    fn test_money_negative_rejected() {
        assert!(matches!(Money::new(-5), Err(MoneyError::NegativeAmount(-5))));
    }

    #[test]
    fn test_parse_decimal_usd() {
        let money = Money::parse_decimal("1500.00", &Currency::Usd).unwrap();
        assert_eq!(money.minor(), 150_000);

        let money = Money::parse_decimal(" 0.05 ", &Currency::Usd).unwrap();
        assert_eq!(money.minor(), 5);
    }

    #[test]
    fn test_parse_decimal_zero_exponent() {
        let money = Money::parse_decimal("25000", &Currency::Jpy).unwrap();
        assert_eq!(money.minor(), 25_000);
        assert!(matches!(
            Money::parse_decimal("10.5", &Currency::Jpy),
            Err(MoneyError::TooPrecise { .. })
        ));
    }

    #[test]
    fn test_parse_decimal_rejects_garbage_and_negative() {
        assert!(matches!(
            Money::parse_decimal("12,00", &Currency::Usd),
            Err(MoneyError::InvalidDecimal(_))
        ));
        assert!(matches!(
            Money::parse_decimal("-1.00", &Currency::Usd),
            Err(MoneyError::InvalidDecimal(_))
        ));
        assert!(matches!(
            Money::parse_decimal("1.005", &Currency::Usd),
            Err(MoneyError::TooPrecise { .. })
        ));
    }

    #[test]
    fn test_checked_sub_prevents_negative() {
        let a = Money::new(50).unwrap();
        let b = Money::new(100).unwrap();
        assert!(a.checked_sub(&b).is_none());
        assert_eq!(a.saturating_sub(&b), Money::ZERO);
    }

    #[test]
    fn test_to_decimal() {
        let money = Money::new(12_345).unwrap();
        assert_eq!(money.to_decimal(&Currency::Usd).to_string(), "123.45");
        assert_eq!(Money::new(150_000).unwrap().to_decimal_string(&Currency::Usd), "1500.00");
    }

    #[test]
    fn test_serde_rejects_negative() {
        let json = serde_json::to_string(&Money::new(42).unwrap()).unwrap();
        assert_eq!(json, "42");
        assert!(serde_json::from_str::<Money>("-42").is_err());
    }
}
