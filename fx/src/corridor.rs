//! Correction corridor: bias between the card-network and external-market feeds.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{debug, info, instrument};

use ratekeeper_common::{
    now, to_precise, CorrectionCorridor, CorrectionSnapshot, Currency, CurrencyPair,
    CurrencyValidator, RateType, RatesError, Result,
};
use ratekeeper_store::{CorrectionStore, CorridorStore};

use crate::bollinger::BollingerBands;
use crate::resolver::RateResolver;

/// Window sizes and the recalculation matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorridorConfig {
    /// Bands compared per pair.
    pub days: usize,
    /// Bollinger window length.
    pub period: usize,
    /// Currencies paired with every supported currency on recalculation.
    pub base_currencies: Vec<Currency>,
}

impl Default for CorridorConfig {
    fn default() -> Self {
        Self {
            days: 7,
            period: 21,
            base_currencies: vec![Currency::usd(), Currency::eur(), Currency::rub(), Currency::gbp()],
        }
    }
}

/// Computes and stores per-pair daily corrections.
pub struct CorridorCalculator {
    resolver: Arc<RateResolver>,
    corridors: Arc<dyn CorridorStore>,
    snapshots: Arc<dyn CorrectionStore>,
    validator: Arc<CurrencyValidator>,
    config: CorridorConfig,
}

impl CorridorCalculator {
    pub fn new(
        resolver: Arc<RateResolver>,
        corridors: Arc<dyn CorridorStore>,
        snapshots: Arc<dyn CorrectionStore>,
        validator: Arc<CurrencyValidator>,
        config: CorridorConfig,
    ) -> Self {
        Self {
            resolver,
            corridors,
            snapshots,
            validator,
            config,
        }
    }

    pub fn config(&self) -> &CorridorConfig {
        &self.config
    }

    /// Append a new corridor width.
    pub async fn set_corridor(&self, value: Decimal) -> Result<CorrectionCorridor> {
        let corridor = CorrectionCorridor::new(value)?;
        self.corridors.insert_corridor(corridor.clone()).await?;
        info!(value = %corridor.value, "Correction corridor set");
        Ok(corridor)
    }

    /// Latest corridor width.
    pub async fn current_corridor(&self) -> Result<Decimal> {
        let corridor = self
            .corridors
            .latest_corridor()
            .await?
            .ok_or(RatesError::CorridorNotSet)?
            .validated()?;
        Ok(corridor.value)
    }

    /// Largest corridor-weighted gap between the two feeds over the last
    /// Unclamped correction candidates, one per band ending at `as_of`.
    ///
    /// For each band `i`:
    /// `(cp.middle - oxr.middle) + (cp.corridor - oxr.corridor) * w`.
    #[instrument(skip(self), fields(pair = %pair))]
    pub async fn daily_candidates(
        &self,
        pair: &CurrencyPair,
        days: usize,
        period: usize,
        as_of: NaiveDate,
    ) -> Result<Vec<Decimal>> {
        let bands = BollingerBands::new(period)?;
        let inputs = bands.required_inputs(days);

        let oxr_series = self
            .resolver
            .daily_series(RateType::ExternalMarket, pair, as_of, inputs)
            .await?;
        let cp_series = self
            .resolver
            .daily_series(RateType::CardNetwork, pair, as_of, inputs)
            .await?;

        let oxr = bands.bands_for_days(&oxr_series, days)?;
        let cp = bands.bands_for_days(&cp_series, days)?;

        let width = self.current_corridor().await?;

        Ok(oxr
            .iter()
            .zip(&cp)
            .map(|(oxr, cp)| (cp.middle - oxr.middle) + (cp.corridor() - oxr.corridor()) * width)
            .collect())
    }

    /// Largest candidate over `days` bands ending at `as_of`, clamped at zero.
    pub async fn daily_correction(
        &self,
        pair: &CurrencyPair,
        days: usize,
        period: usize,
        as_of: NaiveDate,
    ) -> Result<Decimal> {
        let correction = self
            .daily_candidates(pair, days, period, as_of)
            .await?
            .into_iter()
            .fold(Decimal::ZERO, Decimal::max);

        debug!(pair = %pair, correction = %correction, "Computed daily correction");
        Ok(to_precise(correction))
    }

    /// Every `base x supported` pair in both directions, identities skipped.
    pub fn recalculation_pairs(&self) -> Vec<CurrencyPair> {
        let mut pairs = BTreeSet::new();
        for base in &self.config.base_currencies {
            for currency in self.validator.currencies() {
                if base == currency {
                    continue;
                }
                pairs.insert(CurrencyPair::new(base.clone(), currency.clone()));
                pairs.insert(CurrencyPair::new(currency.clone(), base.clone()));
            }
        }
        pairs.into_iter().collect()
    }

    /// Recompute every pair as of `as_of` and store the whole run at once.
    ///
    /// A failure on any pair aborts the run and nothing is stored.
    #[instrument(skip(self))]
    pub async fn recompute_all(&self, as_of: NaiveDate) -> Result<Vec<CorrectionSnapshot>> {
        let pairs = self.recalculation_pairs();
        let created_at = now();
        let mut snapshots = Vec::with_capacity(pairs.len());

        for pair in pairs {
            let value = self
                .daily_correction(&pair, self.config.days, self.config.period, as_of)
                .await?;
            snapshots.push(CorrectionSnapshot::new(pair, value, created_at));
        }

        self.snapshots.insert_snapshots(snapshots.clone()).await?;

        info!(pairs = snapshots.len(), as_of = %as_of, "Correction recalculation finished");
        Ok(snapshots)
    }

    /// Most recent stored correction for a pair.
    pub async fn latest_correction(&self, pair: &CurrencyPair) -> Result<Option<CorrectionSnapshot>> {
        self.snapshots.latest_snapshot(pair).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use ratekeeper_common::{RateObservation, RateTypeRegistry};
    use ratekeeper_store::{MemoryStore, RateStore};
    use rust_decimal_macros::dec;

    fn validator() -> Arc<CurrencyValidator> {
        Arc::new(CurrencyValidator::new(["USD", "EUR", "RUB"].map(Currency::new)))
    }

    fn calculator(store: Arc<MemoryStore>, base: Vec<Currency>) -> CorridorCalculator {
        let resolver = Arc::new(RateResolver::new(
            store.clone(),
            validator(),
            RateTypeRegistry::all(),
        ));
        CorridorCalculator::new(
            resolver,
            store.clone(),
            store,
            validator(),
            CorridorConfig {
                days: 2,
                period: 2,
                base_currencies: base,
            },
        )
    }

    /// Three days of rates for `pair` ending on `last`.
    async fn seed(store: &MemoryStore, pair: &CurrencyPair, rate_type: RateType, rates: [Decimal; 3], last: NaiveDate) {
        for (offset, rate) in rates.into_iter().enumerate() {
            let day = last - Duration::days(2 - offset as i64);
            let at = Utc.from_utc_datetime(&day.and_hms_opt(12, 0, 0).unwrap());
            store
                .insert(RateObservation::new(pair.clone(), rate_type, "SEED", rate).at(at))
                .await
                .unwrap();
        }
    }

    fn last_day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 10).unwrap()
    }

    #[tokio::test]
    async fn test_corridor_bounds() {
        let calc = calculator(Arc::new(MemoryStore::default()), vec![]);

        assert_eq!(calc.current_corridor().await, Err(RatesError::CorridorNotSet));
        assert!(matches!(
            calc.set_corridor(dec!(1.5)).await,
            Err(RatesError::InvalidCorridor(_))
        ));

        calc.set_corridor(dec!(0.2)).await.unwrap();
        calc.set_corridor(dec!(0.7)).await.unwrap();
        assert_eq!(calc.current_corridor().await.unwrap(), dec!(0.7));
    }

    #[tokio::test]
    async fn test_stored_out_of_range_corridor_is_hard_error() {
        let store = Arc::new(MemoryStore::default());
        let mut corridor = CorrectionCorridor::new(dec!(0.5)).unwrap();
        corridor.value = dec!(2);
        store.insert_corridor(corridor).await.unwrap();
        let calc = calculator(store, vec![]);

        assert_eq!(calc.current_corridor().await, Err(RatesError::InvalidCorridor(dec!(2))));
    }

    #[tokio::test]
    async fn test_flat_feeds_use_median_gap() {
        let store = Arc::new(MemoryStore::default());
        let pair = CurrencyPair::new(Currency::usd(), Currency::rub());
        seed(&store, &pair, RateType::ExternalMarket, [dec!(90); 3], last_day()).await;
        seed(&store, &pair, RateType::CardNetwork, [dec!(91.25); 3], last_day()).await;
        let calc = calculator(store, vec![]);
        calc.set_corridor(dec!(0.5)).await.unwrap();

        let correction = calc.daily_correction(&pair, 2, 2, last_day()).await.unwrap();

        assert_eq!(correction, dec!(1.25));
    }

    #[tokio::test]
    async fn test_negative_candidates_clamp_to_zero() {
        let store = Arc::new(MemoryStore::default());
        let pair = CurrencyPair::new(Currency::usd(), Currency::rub());
        seed(&store, &pair, RateType::ExternalMarket, [dec!(90); 3], last_day()).await;
        seed(&store, &pair, RateType::CardNetwork, [dec!(89); 3], last_day()).await;
        let calc = calculator(store, vec![]);
        calc.set_corridor(dec!(0.5)).await.unwrap();

        let candidates = calc.daily_candidates(&pair, 2, 2, last_day()).await.unwrap();
        assert!(!candidates.is_empty());
        assert!(candidates.iter().all(|c| *c < Decimal::ZERO));

        let correction = calc.daily_correction(&pair, 2, 2, last_day()).await.unwrap();

        assert_eq!(correction, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_missing_history() {
        let store = Arc::new(MemoryStore::default());
        let pair = CurrencyPair::new(Currency::usd(), Currency::rub());
        seed(&store, &pair, RateType::ExternalMarket, [dec!(90); 3], last_day()).await;
        let calc = calculator(store, vec![]);
        calc.set_corridor(dec!(0.5)).await.unwrap();

        let err = calc.daily_correction(&pair, 2, 2, last_day()).await.unwrap_err();

        assert!(matches!(
            err,
            RatesError::InsufficientHistory { rate_type: RateType::CardNetwork, found: 0, .. }
        ));
    }

    #[tokio::test]
    async fn test_recalculation_pairs() {
        let calc = calculator(Arc::new(MemoryStore::default()), vec![Currency::usd(), Currency::eur()]);

        let codes: Vec<String> = calc.recalculation_pairs().iter().map(|p| p.code()).collect();

        assert_eq!(
            codes,
            vec!["EURRUB", "EURUSD", "RUBEUR", "RUBUSD", "USDEUR", "USDRUB"]
        );
    }

    #[tokio::test]
    async fn test_recompute_all_is_all_or_nothing() {
        let store = Arc::new(MemoryStore::default());
        let usd_rub = CurrencyPair::new(Currency::usd(), Currency::rub());
        for pair in [usd_rub.clone(), usd_rub.inverse()] {
            seed(&store, &pair, RateType::ExternalMarket, [dec!(1); 3], last_day()).await;
            seed(&store, &pair, RateType::CardNetwork, [dec!(1.5); 3], last_day()).await;
        }
        let calc = calculator(store.clone(), vec![Currency::usd()]);
        calc.set_corridor(dec!(0.5)).await.unwrap();

        // USDEUR has no history, so the whole run fails.
        assert!(calc.recompute_all(last_day()).await.is_err());
        assert_eq!(store.snapshot_count(), 0);

        let calc = CorridorCalculator {
            validator: Arc::new(CurrencyValidator::new([Currency::usd(), Currency::rub()])),
            ..calc
        };
        let snapshots = calc.recompute_all(last_day()).await.unwrap();

        assert_eq!(snapshots.len(), 2);
        assert_eq!(store.snapshot_count(), 2);
        let latest = calc.latest_correction(&usd_rub).await.unwrap().unwrap();
        assert_eq!(latest.value, dec!(0.5));
    }
}
