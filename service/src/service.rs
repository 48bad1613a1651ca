//! Request facade over the rate engine, rules and corridor.

use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use ratekeeper_common::{
    now, CorrectionCorridor, CorrectionRule, CorrectionSnapshot, Currency, CurrencyValidator,
    MerchantId, RateObservation, RateTypeRegistry, RatesError, Result, TriggerKind,
};
use ratekeeper_fx::{
    BatchIngestor, CorrectionRuleEngine, CorridorCalculator, ExchangeRequest, ExchangeResult,
    NewCorrectionRule, RateEngine, RateRequest, RateResolver, StreamingMerger,
};
use ratekeeper_store::Stores;

use crate::config::ServiceConfig;
use crate::consumer::{CardRateConsumer, RetryPolicy};
use crate::metrics::ServiceMetrics;
use crate::poller::FeedPoller;
use crate::recalculation::Recalculator;
use crate::scheduler::{ArmOutcome, TriggerScheduler};
use crate::state::ServiceState;

/// A rate lookup as received from callers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetRateRequest {
    pub from: String,
    pub to: String,
    pub rate_type: String,
    pub exchange_direction: String,
    /// Central-bank discriminator.
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub merchant_id: String,
    /// Required by the by-date variants.
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

/// An exchange as received from callers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeAmountRequest {
    #[serde(flatten)]
    pub rate: GetRateRequest,
    pub amount: Decimal,
}

/// A rule lookup as received from callers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetCorrectionRuleRequest {
    pub rate_type: String,
    pub exchange_direction: String,
    #[serde(default)]
    pub merchant_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Common,
    Merchant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum When {
    Current,
    ByDate,
}

/// The service surface: every call is a thin pass-through to the engines.
pub struct RatesService {
    registry: RateTypeRegistry,
    validator: Arc<CurrencyValidator>,
    engine: Arc<RateEngine>,
    rules: Arc<CorrectionRuleEngine>,
    corridor: Arc<CorridorCalculator>,
    recalculator: Arc<Recalculator>,
    scheduler: Arc<TriggerScheduler>,
    merger: Arc<StreamingMerger>,
    ingestor: Arc<BatchIngestor>,
    retry: RetryPolicy,
    metrics: Arc<ServiceMetrics>,
    state: Arc<RwLock<ServiceState>>,
}

impl RatesService {
    /// Wire every component over `stores`.
    pub fn new(config: &ServiceConfig, stores: Stores) -> Result<Self> {
        config.validate().map_err(RatesError::Configuration)?;

        let registry = config.registry()?;
        let validator = Arc::new(config.validator());
        let metrics = Arc::new(ServiceMetrics::new());

        let resolver = Arc::new(
            RateResolver::new(stores.rates.clone(), validator.clone(), registry.clone())
                .with_central_bank_sources(&config.central_bank_sources),
        );
        let rules = Arc::new(CorrectionRuleEngine::new(
            stores.rules.clone(),
            validator.clone(),
            registry.clone(),
        ));
        let corridor = Arc::new(CorridorCalculator::new(
            resolver.clone(),
            stores.corridors.clone(),
            stores.corrections.clone(),
            validator.clone(),
            config.corridor(),
        ));
        let recalculator = Arc::new(Recalculator::new(corridor.clone(), metrics.clone()));
        let scheduler = Arc::new(TriggerScheduler::new(
            stores.triggers.clone(),
            recalculator.clone(),
        ));

        Ok(Self {
            engine: Arc::new(RateEngine::new(resolver, rules.clone())),
            merger: Arc::new(StreamingMerger::new(stores.rates.clone(), validator.clone())),
            ingestor: Arc::new(BatchIngestor::new(
                stores.rates,
                validator.clone(),
                registry.clone(),
            )),
            registry,
            validator,
            rules,
            corridor,
            recalculator,
            scheduler,
            retry: RetryPolicy::from(&config.retry),
            metrics,
            state: Arc::new(RwLock::new(ServiceState::Starting)),
        })
    }

    /// Restore armed triggers and start accepting requests.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        if self
            .scheduler
            .restore(TriggerKind::CardNetworkRecalculation)
            .await?
        {
            info!("Pending recalculation trigger restored");
        }
        self.transition(ServiceState::Running);
        Ok(())
    }

    /// Stop accepting requests and drop pending timers.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        self.transition(ServiceState::ShuttingDown);
        self.scheduler.shutdown();
        self.transition(ServiceState::Stopped);
        Ok(())
    }

    /// Get the current service state.
    pub fn state(&self) -> ServiceState {
        *self.state.read()
    }

    /// Check if the service is accepting requests.
    pub fn is_accepting_requests(&self) -> bool {
        self.state().accepts_requests()
    }

    pub fn metrics(&self) -> Arc<ServiceMetrics> {
        self.metrics.clone()
    }

    pub fn scheduler(&self) -> Arc<TriggerScheduler> {
        self.scheduler.clone()
    }

    /// Consumer for the card-network broker queue.
    pub fn card_rate_consumer(&self) -> CardRateConsumer {
        CardRateConsumer::new(
            self.merger.clone(),
            self.validator.clone(),
            self.scheduler.clone(),
            self.retry.clone(),
            self.metrics.clone(),
        )
    }

    /// Poller feeding the batch ingestor; adapters are registered by the caller.
    pub fn feed_poller(&self, config: &ServiceConfig) -> FeedPoller {
        FeedPoller::new(self.ingestor.clone(), config.feeds.clone(), self.metrics.clone())
    }

    // --- Rates ---

    pub async fn get_rate_current_common(&self, request: &GetRateRequest) -> Result<RateObservation> {
        self.get_rate(request, Scope::Common, When::Current).await
    }

    pub async fn get_rate_current_for_merchant(
        &self,
        request: &GetRateRequest,
    ) -> Result<RateObservation> {
        self.get_rate(request, Scope::Merchant, When::Current).await
    }

    pub async fn get_rate_by_date_common(&self, request: &GetRateRequest) -> Result<RateObservation> {
        self.get_rate(request, Scope::Common, When::ByDate).await
    }

    pub async fn get_rate_by_date_for_merchant(
        &self,
        request: &GetRateRequest,
    ) -> Result<RateObservation> {
        self.get_rate(request, Scope::Merchant, When::ByDate).await
    }

    // --- Exchange ---

    pub async fn exchange_current_common(&self, request: &ExchangeAmountRequest) -> Result<ExchangeResult> {
        self.exchange(request, Scope::Common, When::Current).await
    }

    pub async fn exchange_current_for_merchant(
        &self,
        request: &ExchangeAmountRequest,
    ) -> Result<ExchangeResult> {
        self.exchange(request, Scope::Merchant, When::Current).await
    }

    pub async fn exchange_by_date_common(&self, request: &ExchangeAmountRequest) -> Result<ExchangeResult> {
        self.exchange(request, Scope::Common, When::ByDate).await
    }

    pub async fn exchange_by_date_for_merchant(
        &self,
        request: &ExchangeAmountRequest,
    ) -> Result<ExchangeResult> {
        self.exchange(request, Scope::Merchant, When::ByDate).await
    }

    // --- Correction rules ---

    /// Add a global rule; any merchant in the request is ignored.
    pub async fn add_common_correction_rule(&self, request: NewCorrectionRule) -> Result<CorrectionRule> {
        self.ensure_accepting()?;
        let rule = self
            .rules
            .add_rule(NewCorrectionRule {
                merchant_id: String::new(),
                ..request
            })
            .await?;
        self.metrics.rule_added();
        Ok(rule)
    }

    /// Add a rule scoped to the request's merchant.
    pub async fn add_merchant_correction_rule(&self, request: NewCorrectionRule) -> Result<CorrectionRule> {
        self.ensure_accepting()?;
        require_merchant(&request.merchant_id)?;
        let rule = self.rules.add_rule(request).await?;
        self.metrics.rule_added();
        Ok(rule)
    }

    /// Effective global rule; a missing rule is an error here.
    pub async fn get_common_correction_rule(
        &self,
        request: &GetCorrectionRuleRequest,
    ) -> Result<CorrectionRule> {
        self.get_rule(request, Scope::Common).await
    }

    /// Effective rule for the request's merchant, falling back to global.
    pub async fn get_merchant_correction_rule(
        &self,
        request: &GetCorrectionRuleRequest,
    ) -> Result<CorrectionRule> {
        self.get_rule(request, Scope::Merchant).await
    }

    // --- Corridor and recalculation ---

    pub async fn set_correction_corridor(&self, value: Decimal) -> Result<CorrectionCorridor> {
        self.ensure_accepting()?;
        self.corridor.set_corridor(value).await
    }

    pub async fn get_correction_corridor(&self) -> Result<Decimal> {
        self.ensure_accepting()?;
        self.corridor.current_corridor().await
    }

    /// Latest stored correction for a six-letter pair code.
    pub async fn get_latest_correction(&self, pair: &str) -> Result<Option<CorrectionSnapshot>> {
        self.ensure_accepting()?;
        let pair = self.validator.parse_pair(pair)?;
        self.corridor.latest_correction(&pair).await
    }

    /// Recompute every pair as of today. Concurrent calls fail with
    /// [`RatesError::RecalculationInProgress`].
    pub async fn recompute_now(&self) -> Result<Vec<CorrectionSnapshot>> {
        self.ensure_accepting()?;
        self.recalculator.run(now().date_naive()).await
    }

    /// Arm the end-of-day recalculation trigger.
    pub async fn request_recalculation(&self) -> Result<ArmOutcome> {
        self.ensure_accepting()?;
        self.scheduler
            .arm_end_of_day(TriggerKind::CardNetworkRecalculation)
            .await
    }

    // --- Private methods ---

    async fn get_rate(&self, request: &GetRateRequest, scope: Scope, when: When) -> Result<RateObservation> {
        self.ensure_accepting()?;
        let rate_request = self.rate_request(request, scope, when)?;
        let observation = self.engine.get_rate(&rate_request).await?;
        self.metrics.rate_served();
        Ok(observation)
    }

    async fn exchange(
        &self,
        request: &ExchangeAmountRequest,
        scope: Scope,
        when: When,
    ) -> Result<ExchangeResult> {
        self.ensure_accepting()?;
        let rate_request = self.rate_request(&request.rate, scope, when)?;
        let result = self
            .engine
            .exchange(&ExchangeRequest::new(rate_request, request.amount))
            .await?;
        self.metrics.exchange_completed();
        Ok(result)
    }

    async fn get_rule(&self, request: &GetCorrectionRuleRequest, scope: Scope) -> Result<CorrectionRule> {
        self.ensure_accepting()?;
        let rate_type = self.registry.parse(&request.rate_type)?;
        let direction = request.exchange_direction.parse()?;
        let merchant = match scope {
            Scope::Common => None,
            Scope::Merchant => Some(require_merchant(&request.merchant_id)?),
        };
        self.rules
            .lookup_rule(rate_type, direction, merchant.as_ref())
            .await
    }

    fn rate_request(&self, request: &GetRateRequest, scope: Scope, when: When) -> Result<RateRequest> {
        let rate_type = self.registry.parse(&request.rate_type)?;
        let direction = request.exchange_direction.parse()?;

        let mut rate_request = RateRequest::new(
            rate_type,
            direction,
            Currency::new(request.from.as_str()),
            Currency::new(request.to.as_str()),
        );

        if !request.source.trim().is_empty() {
            rate_request = rate_request.from_source(request.source.trim());
        }
        if scope == Scope::Merchant {
            rate_request = rate_request.for_merchant(require_merchant(&request.merchant_id)?);
        }
        if when == When::ByDate {
            let date = request
                .date
                .ok_or_else(|| RatesError::InvalidMessage("date is required".to_string()))?;
            rate_request = rate_request.on_date(date);
        }

        Ok(rate_request)
    }

    fn ensure_accepting(&self) -> Result<()> {
        if !self.is_accepting_requests() {
            return Err(RatesError::ServiceUnavailable {
                retry_after_ms: 1000,
            });
        }
        Ok(())
    }

    fn transition(&self, next: ServiceState) {
        let mut state = self.state.write();
        if state.can_transition_to(next) {
            info!(from = %*state, to = %next, "Service state changed");
            *state = next;
        } else {
            warn!(from = %*state, to = %next, "Ignoring invalid state transition");
        }
    }
}

fn require_merchant(merchant_id: &str) -> Result<MerchantId> {
    MerchantId::parse_optional(merchant_id)
        .ok_or_else(|| RatesError::InvalidMessage("merchant_id is required".to_string()))
}
