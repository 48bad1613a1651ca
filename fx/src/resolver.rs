//! Rate lookup with central-bank fallback and daily bucketing.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{debug, instrument, warn};

use ratekeeper_common::{
    beginning_of_day, end_of_day, trailing_days, AsOf, Currency, CurrencyPair, CurrencyValidator,
    RateObservation, RateType, RateTypeRegistry, RatesError, Result,
};
use ratekeeper_store::{RateQuery, RateStore};

/// Resolves the observation that answers "rate for X as of D".
pub struct RateResolver {
    store: Arc<dyn RateStore>,
    validator: Arc<CurrencyValidator>,
    registry: RateTypeRegistry,
    central_bank_sources: HashSet<String>,
}

impl RateResolver {
    pub fn new(
        store: Arc<dyn RateStore>,
        validator: Arc<CurrencyValidator>,
        registry: RateTypeRegistry,
    ) -> Self {
        Self {
            store,
            validator,
            registry,
            central_bank_sources: HashSet::new(),
        }
    }

    /// Known central-bank discriminators. Unknown ones are still queried.
    pub fn with_central_bank_sources<S: AsRef<str>>(mut self, sources: &[S]) -> Self {
        self.central_bank_sources = sources
            .iter()
            .map(|s| s.as_ref().trim().to_uppercase())
            .collect();
        self
    }

    /// Resolve the most recent observation for `from -> to`.
    ///
    /// `from == to` short-circuits to a synthetic rate of 1 without touching
    /// the store. A central-bank miss falls back to the external-market feed
    /// without a source filter.
    #[instrument(skip(self), fields(from = %from, to = %to))]
    pub async fn resolve(
        &self,
        rate_type: RateType,
        from: &Currency,
        to: &Currency,
        as_of: AsOf,
        source: Option<&str>,
    ) -> Result<RateObservation> {
        self.validator.check(from, to)?;

        if from == to {
            return Ok(RateObservation::identity(from, rate_type));
        }

        self.registry.namespace(rate_type)?;
        let pair = CurrencyPair::new(from.clone(), to.clone());

        let mut query = RateQuery::new(rate_type, pair.clone());
        if let AsOf::At(at) = as_of {
            query = query.until(end_of_day(at.date_naive()));
        }

        if rate_type == RateType::CentralBank {
            match source.map(|s| s.trim().to_uppercase()).filter(|s| !s.is_empty()) {
                Some(source) => {
                    if !self.central_bank_sources.contains(&source) {
                        warn!(source = %source, "Unrecognized central bank source");
                    }
                    query = query.with_source(source);
                }
                None => debug!("No central bank source given, querying all banks"),
            }
        }

        if let Some(observation) = self.store.latest(&query).await? {
            return Ok(observation);
        }

        if rate_type == RateType::CentralBank && self.registry.is_enabled(RateType::ExternalMarket) {
            debug!(pair = %pair, "No central bank rate, falling back to external market");
            let fallback = RateQuery {
                rate_type: RateType::ExternalMarket,
                source: None,
                ..query
            };
            if let Some(observation) = self.store.latest(&fallback).await? {
                return Ok(observation);
            }
        }

        Err(RatesError::RateNotFound { rate_type, pair })
    }

    /// [`resolve`](Self::resolve) pinned to the end of a calendar day.
    pub async fn resolve_as_of_date(
        &self,
        rate_type: RateType,
        from: &Currency,
        to: &Currency,
        date: NaiveDate,
        source: Option<&str>,
    ) -> Result<RateObservation> {
        self.resolve(rate_type, from, to, AsOf::At(end_of_day(date)), source)
            .await
    }

    /// Last rate of each of the `days` calendar days ending at `last_day`, oldest first.
    ///
    /// Every day must have at least one observation; a gap fails with
    /// [`RatesError::InsufficientHistory`].
    pub async fn daily_series(
        &self,
        rate_type: RateType,
        pair: &CurrencyPair,
        last_day: NaiveDate,
        days: usize,
    ) -> Result<Vec<Decimal>> {
        let calendar = trailing_days(last_day, days);
        let Some(first_day) = calendar.first().copied() else {
            return Ok(Vec::new());
        };

        let observations = self
            .store
            .range(
                rate_type,
                pair,
                beginning_of_day(first_day),
                end_of_day(last_day),
            )
            .await?;

        // Oldest first, so later observations overwrite earlier ones of the same day.
        let mut buckets: BTreeMap<NaiveDate, Decimal> = BTreeMap::new();
        for observation in observations {
            buckets.insert(observation.created_at.date_naive(), observation.rate);
        }

        calendar
            .iter()
            .map(|day| {
                buckets
                    .get(day)
                    .copied()
                    .ok_or_else(|| RatesError::InsufficientHistory {
                        rate_type,
                        pair: pair.clone(),
                        required: days,
                        found: buckets.len(),
                    })
            })
            .collect()
    }
}
