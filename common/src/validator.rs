//! Supported-currency set and pair well-formedness rules.

use std::collections::BTreeSet;

use crate::currency::{Currency, CurrencyPair, PairSide};
use crate::error::{RatesError, Result};

/// Authoritative set of supported currencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencyValidator {
    supported: BTreeSet<Currency>,
}

impl CurrencyValidator {
    pub fn new(currencies: impl IntoIterator<Item = Currency>) -> Self {
        Self {
            supported: currencies.into_iter().collect(),
        }
    }

    pub fn is_supported(&self, currency: &Currency) -> bool {
        self.supported.contains(currency)
    }

    pub fn currencies(&self) -> impl Iterator<Item = &Currency> {
        self.supported.iter()
    }

    /// Check both sides independently, reporting which side failed.
    pub fn check(&self, from: &Currency, to: &Currency) -> Result<()> {
        if !self.is_supported(from) {
            return Err(RatesError::UnsupportedCurrency {
                side: PairSide::From,
                currency: from.to_string(),
            });
        }
        if !self.is_supported(to) {
            return Err(RatesError::UnsupportedCurrency {
                side: PairSide::To,
                currency: to.to_string(),
            });
        }
        Ok(())
    }

    /// Parse a pair code that must be well formed, fully supported and
    /// made of two distinct currencies.
    pub fn parse_pair(&self, code: &str) -> Result<CurrencyPair> {
        let pair = CurrencyPair::parse(code)?;
        if pair.is_identity() || !self.is_supported(&pair.from) || !self.is_supported(&pair.to) {
            return Err(RatesError::UnknownPair(code.to_string()));
        }
        Ok(pair)
    }
}
