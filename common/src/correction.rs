//! Correction rules, corridor widths and derived correction snapshots.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::currency::CurrencyPair;
use crate::error::{RatesError, Result};
use crate::identifiers::{MerchantId, RuleId};
use crate::precision::to_precise;
use crate::rate::{ExchangeDirection, RateObservation, RateType};

/// Who a correction rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleScope {
    /// Applies to every caller.
    Global,
    /// Applies to one merchant and outranks global rules for it.
    Merchant(MerchantId),
}

impl RuleScope {
    pub fn for_merchant(merchant: Option<MerchantId>) -> Self {
        merchant.map(RuleScope::Merchant).unwrap_or(RuleScope::Global)
    }

    pub fn is_global(&self) -> bool {
        matches!(self, RuleScope::Global)
    }

    /// Merchant identifier, or the empty string for global rules.
    pub fn merchant_str(&self) -> &str {
        match self {
            RuleScope::Global => "",
            RuleScope::Merchant(id) => id.as_str(),
        }
    }
}

impl fmt::Display for RuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleScope::Global => write!(f, "global"),
            RuleScope::Merchant(id) => write!(f, "merchant:{}", id),
        }
    }
}

/// Percent-based adjustment applied to a resolved rate. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRule {
    pub id: RuleId,
    pub rate_type: RateType,
    pub direction: ExchangeDirection,
    pub scope: RuleScope,
    /// Percent used for pairs without an override.
    pub common_correction: Decimal,
    /// Per-pair overrides keyed by six-letter pair code.
    pub pair_correction: BTreeMap<String, Decimal>,
    pub created_at: DateTime<Utc>,
}

impl CorrectionRule {
    /// Create a rule stamped now.
    pub fn new(
        rate_type: RateType,
        direction: ExchangeDirection,
        scope: RuleScope,
        common_correction: Decimal,
        pair_correction: BTreeMap<String, Decimal>,
    ) -> Self {
        Self {
            id: RuleId::new(),
            rate_type,
            direction,
            scope,
            common_correction,
            pair_correction,
            created_at: Utc::now(),
        }
    }

    /// Correction percent for a pair code.
    ///
    /// An empty code yields the common percent, a code that is not six
    /// characters long yields zero.
    pub fn value_for(&self, pair: &str) -> Decimal {
        if pair.is_empty() {
            return self.common_correction;
        }
        if pair.len() != 6 {
            return Decimal::ZERO;
        }
        self.pair_correction
            .get(pair)
            .copied()
            .unwrap_or(self.common_correction)
    }

    /// Adjust the in-memory copy of an observation for an exchange in `direction`.
    ///
    /// The rate is divided by `1 - pct/100` when selling and `1 + pct/100`
    /// when buying, then passed through [`to_precise`]. A zero percent
    /// leaves the observation untouched; a percent whose corrected rate
    /// falls outside the decimal range fails with `InvalidPercent`.
    pub fn apply(&self, observation: &mut RateObservation, direction: ExchangeDirection) -> Result<()> {
        let pct = self.value_for(&observation.pair.code());
        if pct.is_zero() {
            return Ok(());
        }

        let share = pct / Decimal::ONE_HUNDRED;
        let divider = match direction {
            ExchangeDirection::Sell => Decimal::ONE - share,
            ExchangeDirection::Buy => Decimal::ONE + share,
        };
        if divider <= Decimal::ZERO {
            return Err(RatesError::InvalidPercent(pct));
        }

        let corrected = observation
            .rate
            .checked_div(divider)
            .ok_or(RatesError::InvalidPercent(pct))?;
        observation.rate = to_precise(corrected);
        Ok(())
    }
}

/// Blending factor in [0, 1] for the corridor calculation. Latest value wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionCorridor {
    pub id: Uuid,
    pub value: Decimal,
    pub created_at: DateTime<Utc>,
}

impl CorrectionCorridor {
    /// Validate and stamp a corridor width.
    pub fn new(value: Decimal) -> Result<Self> {
        if value < Decimal::ZERO || value > Decimal::ONE {
            return Err(RatesError::InvalidCorridor(value));
        }
        Ok(Self {
            id: Uuid::now_v7(),
            value,
            created_at: Utc::now(),
        })
    }

    /// Re-check a value loaded from storage.
    pub fn validated(self) -> Result<Self> {
        if self.value < Decimal::ZERO || self.value > Decimal::ONE {
            return Err(RatesError::InvalidCorridor(self.value));
        }
        Ok(self)
    }
}

/// Per-pair correction produced by one recalculation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionSnapshot {
    pub id: Uuid,
    pub pair: CurrencyPair,
    pub value: Decimal,
    pub created_at: DateTime<Utc>,
}

impl CorrectionSnapshot {
    pub fn new(pair: CurrencyPair, value: Decimal, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            pair,
            value,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::Currency;
    use rust_decimal_macros::dec;

    fn merchant_rule() -> CorrectionRule {
        let mut pairs = BTreeMap::new();
        pairs.insert("USDEUR".to_string(), dec!(-3));
        CorrectionRule::new(
            RateType::ExternalMarket,
            ExchangeDirection::Sell,
            RuleScope::Merchant(MerchantId::new("m-1")),
            dec!(5),
            pairs,
        )
    }

    fn usd_eur(rate: Decimal) -> RateObservation {
        RateObservation::new(
            CurrencyPair::new(Currency::usd(), Currency::eur()),
            RateType::ExternalMarket,
            "TEST",
            rate,
        )
    }

    #[test]
    fn test_value_for() {
        let rule = merchant_rule();
        assert_eq!(rule.value_for("USDEUR"), dec!(-3));
        assert_eq!(rule.value_for("USDRUB"), dec!(5));
        assert_eq!(rule.value_for(""), dec!(5));
        assert_eq!(rule.value_for("USDEU"), Decimal::ZERO);
    }

    #[test]
    fn test_apply_sell_with_pair_override() {
        let rule = merchant_rule();
        let mut obs = usd_eur(dec!(0.89));

        rule.apply(&mut obs, ExchangeDirection::Sell).unwrap();

        assert_eq!(obs.rate, to_precise(dec!(0.89) / dec!(1.03)));
        assert_eq!(obs.rate, dec!(0.864078));
    }

    #[test]
    fn test_apply_out_of_range_is_rejected() {
        let rule = CorrectionRule::new(
            RateType::ExternalMarket,
            ExchangeDirection::Sell,
            RuleScope::Global,
            dec!(99.9999),
            BTreeMap::new(),
        );
        let mut obs = usd_eur(Decimal::MAX);

        let err = rule.apply(&mut obs, ExchangeDirection::Sell).unwrap_err();

        assert_eq!(err, RatesError::InvalidPercent(dec!(99.9999)));
        assert_eq!(obs.rate, Decimal::MAX);
    }

    #[test]
    fn test_apply_buy() {
        let rule = CorrectionRule::new(
            RateType::ExternalMarket,
            ExchangeDirection::Buy,
            RuleScope::Global,
            dec!(2),
            BTreeMap::new(),
        );
        let mut obs = usd_eur(dec!(0.918));

        rule.apply(&mut obs, ExchangeDirection::Buy).unwrap();

        assert_eq!(obs.rate, dec!(0.9));
    }

    #[test]
    fn test_zero_percent_is_noop() {
        let rule = CorrectionRule::new(
            RateType::ExternalMarket,
            ExchangeDirection::Sell,
            RuleScope::Global,
            Decimal::ZERO,
            BTreeMap::new(),
        );
        let mut obs = usd_eur(dec!(0.89));
        rule.apply(&mut obs, ExchangeDirection::Sell).unwrap();
        assert_eq!(obs.rate, dec!(0.89));
    }

    #[test]
    fn test_full_sell_correction_rejected() {
        let rule = CorrectionRule::new(
            RateType::ExternalMarket,
            ExchangeDirection::Sell,
            RuleScope::Global,
            dec!(100),
            BTreeMap::new(),
        );
        let mut obs = usd_eur(dec!(0.89));
        assert_eq!(
            rule.apply(&mut obs, ExchangeDirection::Sell),
            Err(RatesError::InvalidPercent(dec!(100)))
        );
        assert_eq!(obs.rate, dec!(0.89));
    }

    #[test]
    fn test_corridor_bounds() {
        assert!(CorrectionCorridor::new(dec!(0)).is_ok());
        assert!(CorrectionCorridor::new(dec!(1)).is_ok());
        assert_eq!(
            CorrectionCorridor::new(dec!(1.01)).unwrap_err(),
            RatesError::InvalidCorridor(dec!(1.01))
        );
        assert!(CorrectionCorridor::new(dec!(-0.1)).is_err());
    }
}
