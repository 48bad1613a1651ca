//! Enabled rate types and the storage namespace each one lives in.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{RatesError, Result};
use crate::rate::RateType;

/// Storage namespace (table or collection) of one rate type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Namespace(&'static str);

impl Namespace {
    /// Fixed namespace of a rate type.
    pub fn of(rate_type: RateType) -> Self {
        Self(match rate_type {
            RateType::ExternalMarket => "rates_external_market",
            RateType::CentralBank => "rates_central_bank",
            RateType::CardNetwork => "rates_card_network",
            RateType::InternalPrediction => "rates_internal_prediction",
            RateType::StockDerived => "rates_stock_derived",
        })
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Lookup table of enabled rate types, built once at startup and shared
/// with every store and component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateTypeRegistry {
    enabled: BTreeMap<RateType, Namespace>,
}

impl RateTypeRegistry {
    /// Registry with the given rate types enabled.
    pub fn new(enabled: impl IntoIterator<Item = RateType>) -> Self {
        Self {
            enabled: enabled
                .into_iter()
                .map(|t| (t, Namespace::of(t)))
                .collect(),
        }
    }

    /// Registry with every rate type enabled.
    pub fn all() -> Self {
        Self::new(RateType::ALL)
    }

    /// Parse rate-type names, failing on the first unknown one.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let types = names
            .iter()
            .map(|n| n.as_ref().parse::<RateType>())
            .collect::<Result<Vec<_>>>()?;
        if types.is_empty() {
            return Err(RatesError::Configuration(
                "at least one rate type must be enabled".to_string(),
            ));
        }
        Ok(Self::new(types))
    }

    /// Namespace of an enabled rate type.
    pub fn namespace(&self, rate_type: RateType) -> Result<Namespace> {
        self.enabled
            .get(&rate_type)
            .copied()
            .ok_or_else(|| RatesError::InvalidRateType(rate_type.to_string()))
    }

    /// Parse a rate-type name and require it to be enabled.
    pub fn parse(&self, name: &str) -> Result<RateType> {
        let rate_type = name.parse::<RateType>()?;
        self.namespace(rate_type)?;
        Ok(rate_type)
    }

    pub fn is_enabled(&self, rate_type: RateType) -> bool {
        self.enabled.contains_key(&rate_type)
    }

    pub fn rate_types(&self) -> impl Iterator<Item = RateType> + '_ {
        self.enabled.keys().copied()
    }

    pub fn namespaces(&self) -> impl Iterator<Item = Namespace> + '_ {
        self.enabled.values().copied()
    }
}

impl Default for RateTypeRegistry {
    fn default() -> Self {
        Self::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_type_has_no_namespace() {
        let registry = RateTypeRegistry::new([RateType::ExternalMarket, RateType::CentralBank]);

        assert_eq!(
            registry.namespace(RateType::CentralBank).unwrap().as_str(),
            "rates_central_bank"
        );
        assert!(matches!(
            registry.namespace(RateType::StockDerived),
            Err(RatesError::InvalidRateType(_))
        ));
        assert!(registry.parse("stock-derived").is_err());
    }

    #[test]
    fn test_from_names() {
        let registry = RateTypeRegistry::from_names(&["external-market", "card-network"]).unwrap();
        assert_eq!(registry.rate_types().count(), 2);

        assert!(RateTypeRegistry::from_names(&["external-market", "bogus"]).is_err());
        assert!(RateTypeRegistry::from_names::<&str>(&[]).is_err());
    }
}
