//! Rate engine: resolution plus correction.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, instrument};

use ratekeeper_common::{now, to_precise, CorrectionRule, RateObservation, RatesError, Result};

use crate::exchange::{ExchangeRequest, ExchangeResult, RateRequest};
use crate::resolver::RateResolver;
use crate::rules::CorrectionRuleEngine;

/// Combines the resolver with the correction rule engine.
pub struct RateEngine {
    resolver: Arc<RateResolver>,
    rules: Arc<CorrectionRuleEngine>,
}

impl RateEngine {
    /// Create a new rate engine.
    pub fn new(resolver: Arc<RateResolver>, rules: Arc<CorrectionRuleEngine>) -> Self {
        Self { resolver, rules }
    }

    /// Resolve the raw observation for a request, without correction.
    pub async fn raw_rate(&self, request: &RateRequest) -> Result<RateObservation> {
        self.resolver
            .resolve(
                request.rate_type,
                &request.from,
                &request.to,
                request.as_of,
                request.source.as_deref(),
            )
            .await
    }

    /// Resolve a rate and apply the effective rule for the requested direction.
    ///
    /// A missing rule leaves the raw rate untouched.
    #[instrument(skip(self, request), fields(
        rate_type = %request.rate_type,
        direction = %request.direction,
        pair = %request.pair()
    ))]
    pub async fn get_rate(&self, request: &RateRequest) -> Result<RateObservation> {
        let (observation, _) = self.corrected(request).await?;
        Ok(observation)
    }

    /// Exchange an amount at the corrected rate.
    #[instrument(skip(self, request), fields(
        rate_type = %request.rate.rate_type,
        direction = %request.rate.direction,
        pair = %request.rate.pair(),
        amount = %request.amount
    ))]
    pub async fn exchange(&self, request: &ExchangeRequest) -> Result<ExchangeResult> {
        if request.amount <= Decimal::ZERO {
            return Err(RatesError::InvalidAmount(request.amount));
        }

        let original = self.raw_rate(&request.rate).await?;
        let original_rate = original.rate;
        let (corrected, rule) = self.apply_rule(&request.rate, original).await?;

        let exchanged_amount = request
            .amount
            .checked_mul(corrected.rate)
            .map(to_precise)
            .ok_or(RatesError::InvalidAmount(request.amount))?;

        let correction_percent = rule
            .map(|rule| rule.value_for(&corrected.pair.code()))
            .unwrap_or(Decimal::ZERO);

        let result = ExchangeResult {
            pair: corrected.pair,
            rate_type: request.rate.rate_type,
            direction: request.rate.direction,
            original_rate,
            exchange_rate: corrected.rate,
            correction_percent,
            amount: request.amount,
            exchanged_amount,
            executed_at: now(),
        };

        info!(
            original_rate = %result.original_rate,
            exchange_rate = %result.exchange_rate,
            exchanged_amount = %result.exchanged_amount,
            "Exchange completed"
        );

        Ok(result)
    }

    async fn corrected(
        &self,
        request: &RateRequest,
    ) -> Result<(RateObservation, Option<CorrectionRule>)> {
        let observation = self.raw_rate(request).await?;
        self.apply_rule(request, observation).await
    }

    async fn apply_rule(
        &self,
        request: &RateRequest,
        mut observation: RateObservation,
    ) -> Result<(RateObservation, Option<CorrectionRule>)> {
        let rule = self
            .rules
            .applicable_rule(request.rate_type, request.direction, request.merchant.as_ref())
            .await?;

        if let Some(rule) = &rule {
            rule.apply(&mut observation, request.direction)?;
        }

        Ok((observation, rule))
    }
}
