//! Pull-based rate feeds and batch ingestion.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use ratekeeper_common::{
    now, to_precise, Currency, CurrencyPair, CurrencyValidator, RateObservation, RateType,
    RateTypeRegistry, Result, Timestamp, PRECISION_DP,
};
use ratekeeper_store::RateStore;

/// Smallest rate representable after [`to_precise`].
const MIN_FEED_RATE: Decimal = Decimal::from_parts(1, 0, 0, false, PRECISION_DP);

/// A rate as normalized by a feed adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedRate {
    pub from: Currency,
    pub to: Currency,
    pub rate: Decimal,
    /// Upstream tag, e.g. the issuing central bank.
    pub source: String,
    #[serde(default)]
    pub volume: Option<Decimal>,
    /// Observation time; defaults to ingestion time.
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

impl FeedRate {
    /// Create a new feed rate.
    pub fn new(from: Currency, to: Currency, rate: Decimal, source: impl Into<String>) -> Self {
        Self {
            from,
            to,
            rate,
            source: source.into(),
            volume: None,
            created_at: None,
        }
    }
}

/// An upstream source polled for rates.
///
/// Adapters own every quirk of their upstream format and hand back
/// normalized rates.
#[async_trait]
pub trait FeedAdapter: Send + Sync {
    /// Get the adapter name.
    fn name(&self) -> &str;

    /// Rate type every fetched rate is stored under.
    fn rate_type(&self) -> RateType;

    /// Fetch the current batch.
    async fn fetch(&self) -> Result<Vec<FeedRate>>;
}

/// Writes feed batches, both directions of every pair, in one bulk insert.
pub struct BatchIngestor {
    store: Arc<dyn RateStore>,
    validator: Arc<CurrencyValidator>,
    registry: RateTypeRegistry,
}

impl BatchIngestor {
    pub fn new(
        store: Arc<dyn RateStore>,
        validator: Arc<CurrencyValidator>,
        registry: RateTypeRegistry,
    ) -> Self {
        Self {
            store,
            validator,
            registry,
        }
    }

    /// Store a batch and return the number of observations written.
    ///
    /// Unsupported, reflexive, non-positive and sub-precision entries are
    /// skipped with a warning. The inverse rate is `to_precise(1 / rate)`.
    #[instrument(skip(self, rates), fields(rate_type = %rate_type, batch = rates.len()))]
    pub async fn ingest(&self, rate_type: RateType, rates: Vec<FeedRate>) -> Result<usize> {
        self.registry.namespace(rate_type)?;

        let batch_time = now();
        let mut observations = Vec::with_capacity(rates.len() * 2);

        for feed_rate in rates {
            if let Err(e) = self.validator.check(&feed_rate.from, &feed_rate.to) {
                warn!(error = %e, source = %feed_rate.source, "Skipping unsupported feed rate");
                continue;
            }
            if feed_rate.from == feed_rate.to {
                warn!(currency = %feed_rate.from, "Skipping reflexive feed rate");
                continue;
            }
            if feed_rate.rate <= Decimal::ZERO {
                warn!(
                    from = %feed_rate.from,
                    to = %feed_rate.to,
                    rate = %feed_rate.rate,
                    "Skipping non-positive feed rate"
                );
                continue;
            }
            let inverse_rate = (feed_rate.rate >= MIN_FEED_RATE)
                .then(|| Decimal::ONE.checked_div(feed_rate.rate))
                .flatten();
            let Some(inverse_rate) = inverse_rate else {
                warn!(
                    from = %feed_rate.from,
                    to = %feed_rate.to,
                    rate = %feed_rate.rate,
                    "Skipping feed rate below precision"
                );
                continue;
            };

            let pair = CurrencyPair::new(feed_rate.from, feed_rate.to);
            let source = feed_rate.source.trim().to_uppercase();
            let volume = feed_rate.volume.unwrap_or(Decimal::ONE);
            let created_at = feed_rate.created_at.unwrap_or(batch_time);

            let inverse = RateObservation::new(
                pair.inverse(),
                rate_type,
                source.clone(),
                to_precise(inverse_rate),
            )
            .with_volume(volume)
            .at(created_at);
            let direct = RateObservation::new(pair, rate_type, source, feed_rate.rate)
                .with_volume(volume)
                .at(created_at);

            observations.push(direct);
            observations.push(inverse);
        }

        let written = observations.len();
        if written > 0 {
            self.store.insert_many(observations).await?;
        }

        info!(written, "Ingested feed batch");
        Ok(written)
    }

    /// Fetch from an adapter and ingest the result.
    pub async fn poll(&self, adapter: &dyn FeedAdapter) -> Result<usize> {
        let rates = adapter.fetch().await?;
        self.ingest(adapter.rate_type(), rates).await
    }
}

/// Feed returning a fixed batch, for tests.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockFeed {
    name: String,
    rate_type: RateType,
    rates: parking_lot::Mutex<Vec<FeedRate>>,
    failure: parking_lot::Mutex<Option<ratekeeper_common::RatesError>>,
    delay: std::time::Duration,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockFeed {
    /// Create a new mock feed.
    pub fn new(name: impl Into<String>, rate_type: RateType) -> Self {
        Self {
            name: name.into(),
            rate_type,
            rates: parking_lot::Mutex::new(Vec::new()),
            failure: parking_lot::Mutex::new(None),
            delay: std::time::Duration::ZERO,
        }
    }

    /// Respond only after `delay`.
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Replace the batch returned by `fetch`.
    pub fn set_rates(&self, rates: Vec<FeedRate>) {
        *self.rates.lock() = rates;
    }

    /// Make every `fetch` fail with `error`.
    pub fn fail_with(&self, error: ratekeeper_common::RatesError) {
        *self.failure.lock() = Some(error);
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl FeedAdapter for MockFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn rate_type(&self) -> RateType {
        self.rate_type
    }

    async fn fetch(&self) -> Result<Vec<FeedRate>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failure = self.failure.lock().clone();
        if let Some(error) = failure {
            return Err(error);
        }
        Ok(self.rates.lock().clone())
    }
}
