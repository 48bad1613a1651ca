//! Incremental weighted-mean ingestion for the card-network feed.

use std::sync::Arc;

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use ratekeeper_common::{
    to_precise, CurrencyPair, CurrencyValidator, RateObservation, RateType, RatesError, Result,
    Timestamp, CARD_NETWORK_SOURCE,
};
use ratekeeper_store::{RateQuery, RateStore};

/// One inbound card-network rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardRateUpdate {
    pub pair: CurrencyPair,
    pub rate: Decimal,
    pub volume: Decimal,
    /// Upstream tag as received; stored observations use the normalized tag.
    pub source: String,
    pub created_at: Timestamp,
}

/// Folds each update into the running aggregate for its pair.
///
/// Merges of the same pair are serialized so two concurrent updates cannot
/// read the same previous aggregate. Different pairs merge in parallel.
pub struct StreamingMerger {
    store: Arc<dyn RateStore>,
    validator: Arc<CurrencyValidator>,
    pair_locks: DashMap<CurrencyPair, Arc<Mutex<()>>>,
}

impl StreamingMerger {
    pub fn new(store: Arc<dyn RateStore>, validator: Arc<CurrencyValidator>) -> Self {
        Self {
            store,
            validator,
            pair_locks: DashMap::new(),
        }
    }

    /// Merge an update and append the new aggregate.
    ///
    /// `merged = (prev_rate * prev_volume + rate * volume) / (prev_volume + volume)`,
    /// with `(0, 0)` as the starting aggregate. Only the direct pair is written.
    #[instrument(skip(self, update), fields(pair = %update.pair, source = %update.source))]
    pub async fn merge(&self, update: CardRateUpdate) -> Result<RateObservation> {
        self.validator.check(&update.pair.from, &update.pair.to)?;
        if update.pair.is_identity() {
            return Err(RatesError::UnknownPair(update.pair.code()));
        }
        if update.rate <= Decimal::ZERO {
            return Err(RatesError::InvalidMessage(format!(
                "non-positive rate {} for {}",
                update.rate, update.pair
            )));
        }
        if update.volume < Decimal::ZERO {
            return Err(RatesError::InvalidVolume(update.volume));
        }

        let lock = self.pair_locks.entry(update.pair.clone()).or_default().clone();
        let _guard = lock.lock().await;

        let query = RateQuery::new(RateType::CardNetwork, update.pair.clone());
        let (prev_rate, prev_volume) = match self.store.latest(&query).await? {
            Some(prev) => (prev.rate, prev.volume),
            None => (Decimal::ZERO, Decimal::ZERO),
        };

        let volume = prev_volume
            .checked_add(update.volume)
            .ok_or(RatesError::InvalidVolume(update.volume))?;
        if volume <= Decimal::ZERO {
            return Err(RatesError::InvalidVolume(volume));
        }
        let weighted = prev_rate
            .checked_mul(prev_volume)
            .zip(update.rate.checked_mul(update.volume))
            .and_then(|(prev, next)| prev.checked_add(next))
            .and_then(|total| total.checked_div(volume))
            .ok_or_else(|| {
                RatesError::InvalidMessage(format!(
                    "weighted rate for {} leaves the decimal range",
                    update.pair
                ))
            })?;
        let rate = to_precise(weighted);

        let observation = RateObservation::new(update.pair, RateType::CardNetwork, CARD_NETWORK_SOURCE, rate)
            .with_volume(volume)
            .at(update.created_at);

        self.store.insert(observation.clone()).await?;

        debug!(
            merged_rate = %observation.rate,
            merged_volume = %observation.volume,
            "Merged card network rate"
        );

        Ok(observation)
    }
}
