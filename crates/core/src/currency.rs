//! Currency - Type-safe ISO currency codes
//!
//! Servicing books are fiat-denominated. Each currency knows its minor-unit
//! exponent so decimal strings can be converted to integer minor units.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when parsing currencies
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CurrencyError {
    #[error("Empty currency code")]
    EmptyCode,

    #[error("Currency code must be 3 letters: {0}")]
    InvalidLength(String),

    #[error("Invalid currency code format: {0}")]
    InvalidFormat(String),
}

/// ISO 4217 currency codes
///
/// # Examples
/// ```
/// use hearth_core::Currency;
///
/// let usd: Currency = "usd".parse().unwrap();
/// assert_eq!(usd, Currency::Usd);
/// assert_eq!(usd.minor_exponent(), 2);
/// assert_eq!(Currency::Jpy.minor_exponent(), 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum Currency {
    /// US Dollar
    #[default]
    Usd,
    /// Canadian Dollar
    Cad,
    /// Euro
    Eur,
    /// British Pound
    Gbp,
    /// Japanese Yen
    Jpy,
    /// Vietnamese Dong
    Vnd,
    /// Any other ISO code (assumed 2 decimal places)
    Other(String),
}

impl Currency {
    /// Returns the currency code as a string slice
    pub fn code(&self) -> &str {
        match self {
            Currency::Usd => "USD",
            Currency::Cad => "CAD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Jpy => "JPY",
            Currency::Vnd => "VND",
            Currency::Other(s) => s.as_str(),
        }
    }

    /// Number of decimal places in one major unit
    pub fn minor_exponent(&self) -> u32 {
        match self {
            Currency::Jpy | Currency::Vnd => 0,
            _ => 2,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Currency {
    type Err = CurrencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_uppercase();

        if s.is_empty() {
            return Err(CurrencyError::EmptyCode);
        }

        if s.len() != 3 {
            return Err(CurrencyError::InvalidLength(s));
        }

        if !s.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(CurrencyError::InvalidFormat(s));
        }

        Ok(match s.as_str() {
            "USD" => Currency::Usd,
            "CAD" => Currency::Cad,
            "EUR" => Currency::Eur,
            "GBP" => Currency::Gbp,
            "JPY" => Currency::Jpy,
            "VND" => Currency::Vnd,
            _ => Currency::Other(s),
        })
    }
}

impl TryFrom<String> for Currency {
    type Error = CurrencyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Currency> for String {
    fn from(c: Currency) -> Self {
        c.code().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_currencies() {
        assert_eq!("USD".parse::<Currency>().unwrap(), Currency::Usd);
        assert_eq!("eur".parse::<Currency>().unwrap(), Currency::Eur);
        assert_eq!("jpy".parse::<Currency>().unwrap(), Currency::Jpy);
    }

    #[test]
    fn test_parse_other_code() {
        let chf: Currency = "CHF".parse().unwrap();
        assert_eq!(chf, Currency::Other("CHF".to_string()));
        assert_eq!(chf.minor_exponent(), 2);
    }

    #[test]
    fn test_invalid_codes() {
        assert!(matches!("".parse::<Currency>(), Err(CurrencyError::EmptyCode)));
        assert!(matches!(
            "USDT".parse::<Currency>(),
            Err(CurrencyError::InvalidLength(_))
        ));
        assert!(matches!(
            "U$D".parse::<Currency>(),
            Err(CurrencyError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_serde_roundtrip() {
        let json = serde_json::to_string(&Currency::Usd).unwrap();
        assert_eq!(json, "\"USD\"");
        let parsed: Currency = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Currency::Usd);
    }
}
