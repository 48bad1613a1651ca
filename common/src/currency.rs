//! Currency and currency-pair types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{RatesError, Result};

/// ISO 4217 currency code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Currency(String);

impl Currency {
    /// Create a new currency from code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().trim().to_uppercase())
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Three ASCII letters.
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == 3 && self.0.chars().all(|c| c.is_ascii_alphabetic())
    }

    /// Common currencies
    pub fn usd() -> Self {
        Self::new("USD")
    }

    pub fn eur() -> Self {
        Self::new("EUR")
    }

    pub fn rub() -> Self {
        Self::new("RUB")
    }

    pub fn gbp() -> Self {
        Self::new("GBP")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Currency {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Which member of a pair a currency occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PairSide {
    From,
    To,
}

impl fmt::Display for PairSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairSide::From => write!(f, "from"),
            PairSide::To => write!(f, "to"),
        }
    }
}

/// A currency pair, written as the six-letter concatenation `FROMTO`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    /// Currency being converted from.
    pub from: Currency,
    /// Currency being converted to.
    pub to: Currency,
}

impl CurrencyPair {
    /// Create a new currency pair.
    pub fn new(from: Currency, to: Currency) -> Self {
        Self { from, to }
    }

    /// Parse a six-letter pair code such as `USDEUR`.
    ///
    /// Only the shape is checked here; membership in the supported set is
    /// the validator's job.
    pub fn parse(code: &str) -> Result<Self> {
        let code = code.trim();
        if code.len() != 6 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(RatesError::UnknownPair(code.to_string()));
        }
        Ok(Self {
            from: Currency::new(&code[..3]),
            to: Currency::new(&code[3..]),
        })
    }

    /// The six-letter pair code.
    pub fn code(&self) -> String {
        format!("{}{}", self.from, self.to)
    }

    /// Get the inverse pair.
    pub fn inverse(&self) -> Self {
        Self {
            from: self.to.clone(),
            to: self.from.clone(),
        }
    }

    /// Both sides are the same currency.
    pub fn is_identity(&self) -> bool {
        self.from == self.to
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)
    }
}

impl FromStr for CurrencyPair {
    type Err = RatesError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_code_roundtrip() {
        let pair = CurrencyPair::parse("usdeur").unwrap();
        assert_eq!(pair.from, Currency::usd());
        assert_eq!(pair.to, Currency::eur());
        assert_eq!(pair.code(), "USDEUR");
        assert_eq!(pair.inverse().to_string(), "EURUSD");
    }

    #[test]
    fn test_malformed_pair_codes() {
        assert!(matches!(
            CurrencyPair::parse("USDEU"),
            Err(RatesError::UnknownPair(_))
        ));
        assert!(CurrencyPair::parse("USD-EU").is_err());
        assert!(CurrencyPair::parse("").is_err());
    }

    #[test]
    fn test_currency_shape() {
        assert!(Currency::new(" rub ").is_well_formed());
        assert!(!Currency::new("RU").is_well_formed());
        assert!(!Currency::new("R1B").is_well_formed());
    }
}
