//! Request facade and card-network consumer over the in-memory store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_test::{assert_err, assert_ok};

use ratekeeper_common::{
    now, trailing_days, CurrencyPair, RateObservation, RateType, RateTypeRegistry,
    RatesError, Result, RuleScope, Timestamp, TriggerKind,
};
use ratekeeper_fx::NewCorrectionRule;
use ratekeeper_service::{
    ArmOutcome, Delivery, Disposition, ExchangeAmountRequest, GetCorrectionRuleRequest,
    GetRateRequest, RatesService, ServiceConfig, ServiceState,
};
use ratekeeper_store::{MemoryStore, RateQuery, RateStore, Stores};

/// Rate store that fails the first inserts and can stall range reads.
struct FlakyRates {
    inner: Arc<MemoryStore>,
    failing_inserts: AtomicUsize,
    range_delay: Duration,
}

impl FlakyRates {
    fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failing_inserts: AtomicUsize::new(0),
            range_delay: Duration::ZERO,
        }
    }

    fn failing(self, inserts: usize) -> Self {
        self.failing_inserts.store(inserts, Ordering::SeqCst);
        self
    }

    fn stalling(mut self, delay: Duration) -> Self {
        self.range_delay = delay;
        self
    }
}

#[async_trait]
impl RateStore for FlakyRates {
    async fn insert(&self, observation: RateObservation) -> Result<()> {
        let remaining = self.failing_inserts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_inserts.store(remaining - 1, Ordering::SeqCst);
            return Err(RatesError::Storage("connection reset".to_string()));
        }
        self.inner.insert(observation).await
    }

    async fn insert_many(&self, observations: Vec<RateObservation>) -> Result<()> {
        self.inner.insert_many(observations).await
    }

    async fn latest(&self, query: &RateQuery) -> Result<Option<RateObservation>> {
        self.inner.latest(query).await
    }

    async fn range(
        &self,
        rate_type: RateType,
        pair: &CurrencyPair,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<RateObservation>> {
        if !self.range_delay.is_zero() {
            tokio::time::sleep(self.range_delay).await;
        }
        self.inner.range(rate_type, pair, from, to).await
    }
}

fn config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.currencies.supported = vec!["USD".into(), "EUR".into(), "RUB".into()];
    config.currencies.base = vec!["EUR".into()];
    config.central_bank_sources = vec!["CBRF".into()];
    config.correction.bollinger_days = 2;
    config.correction.bollinger_period = 2;
    config.retry.max_attempts = 3;
    config.retry.base_backoff = Duration::from_millis(100);
    config.retry.max_backoff = Duration::from_secs(2);
    config
}

fn memory() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new(RateTypeRegistry::all()))
}

fn stores_with(memory: &Arc<MemoryStore>, rates: FlakyRates) -> Stores {
    Stores {
        rates: Arc::new(rates),
        ..Stores::shared(memory.clone())
    }
}

async fn running(stores: Stores) -> RatesService {
    let service = RatesService::new(&config(), stores).unwrap();
    service.start().await.unwrap();
    service
}

fn pair(code: &str) -> CurrencyPair {
    CurrencyPair::parse(code).unwrap()
}

fn usd_eur_request(direction: &str) -> GetRateRequest {
    GetRateRequest {
        from: "USD".into(),
        to: "EUR".into(),
        rate_type: "external-market".into(),
        exchange_direction: direction.into(),
        ..Default::default()
    }
}

fn rule(direction: &str, common: Decimal, merchant: &str) -> NewCorrectionRule {
    NewCorrectionRule {
        rate_type: "external-market".into(),
        exchange_direction: direction.into(),
        common_correction: common,
        pair_correction: BTreeMap::new(),
        merchant_id: merchant.into(),
    }
}

async fn seed(store: &MemoryStore, rate_type: RateType, code: &str, rate: Decimal) {
    let observation = RateObservation::new(pair(code), rate_type, "SEED", rate);
    store.insert(observation).await.unwrap();
}

fn noon(day: NaiveDate) -> Timestamp {
    Utc.from_utc_datetime(&day.and_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap()))
}

/// Three days of observations ending today for every EUR pair.
async fn seed_recent_history(store: &MemoryStore) {
    let days = trailing_days(now().date_naive(), 3);

    for (i, day) in days.into_iter().enumerate() {
        let step = Decimal::from(i as u32);
        let rows = [
            (RateType::ExternalMarket, "EURRUB", dec!(100) + step),
            (RateType::CardNetwork, "EURRUB", dec!(100) + step * dec!(2)),
            (RateType::ExternalMarket, "RUBEUR", dec!(0.01)),
            (RateType::CardNetwork, "RUBEUR", dec!(0.01)),
            (RateType::ExternalMarket, "EURUSD", dec!(1.1)),
            (RateType::CardNetwork, "EURUSD", dec!(1.1)),
            (RateType::ExternalMarket, "USDEUR", dec!(0.9)),
            (RateType::CardNetwork, "USDEUR", dec!(0.9)),
        ];
        for (rate_type, code, rate) in rows {
            let observation = RateObservation::new(pair(code), rate_type, "SEED", rate).at(noon(day));
            store.insert(observation).await.unwrap();
        }
    }
}

// --- Facade ---

#[tokio::test]
async fn test_requests_rejected_until_started() {
    let service = RatesService::new(&config(), Stores::shared(memory())).unwrap();
    assert_eq!(service.state(), ServiceState::Starting);

    let err = service
        .get_rate_current_common(&usd_eur_request("buy"))
        .await
        .unwrap_err();
    assert_eq!(err, RatesError::ServiceUnavailable { retry_after_ms: 1000 });
    assert!(err.is_retryable());

    service.start().await.unwrap();
    assert!(service.is_accepting_requests());

    service.stop().await.unwrap();
    assert_eq!(service.state(), ServiceState::Stopped);
    assert_err!(service.get_correction_corridor().await);
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let mut config = config();
    config.currencies.base = vec!["JPY".into()];
    let err = RatesService::new(&config, Stores::shared(memory())).err().unwrap();
    assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
}

#[tokio::test]
async fn test_rates_follow_global_and_merchant_rules() {
    let store = memory();
    seed(&store, RateType::ExternalMarket, "USDEUR", dec!(0.89)).await;
    let service = running(Stores::shared(store.clone())).await;

    let raw = assert_ok!(service.get_rate_current_common(&usd_eur_request("sell")).await);
    assert_eq!(raw.rate, dec!(0.89));

    let global = assert_ok!(service.add_common_correction_rule(rule("sell", dec!(1), "m-1")).await);
    assert_eq!(global.scope, RuleScope::Global);
    assert_ok!(service.add_merchant_correction_rule(rule("sell", dec!(3), "m-1")).await);

    let common = assert_ok!(service.get_rate_current_common(&usd_eur_request("sell")).await);
    assert_eq!(common.rate, dec!(0.89899));

    let mut merchant = usd_eur_request("sell");
    merchant.merchant_id = "m-1".into();
    let corrected = assert_ok!(service.get_rate_current_for_merchant(&merchant).await);
    assert_eq!(corrected.rate, dec!(0.917526));

    merchant.merchant_id = "m-2".into();
    let fallback = assert_ok!(service.get_rate_current_for_merchant(&merchant).await);
    assert_eq!(fallback.rate, dec!(0.89899));

    assert_eq!(service.metrics().snapshot().rates_served, 4);
    assert_eq!(service.metrics().snapshot().rules_added, 2);
}

#[tokio::test]
async fn test_merchant_variants_require_merchant() {
    let store = memory();
    seed(&store, RateType::ExternalMarket, "USDEUR", dec!(0.89)).await;
    let service = running(Stores::shared(store)).await;

    let err = service
        .get_rate_current_for_merchant(&usd_eur_request("buy"))
        .await
        .unwrap_err();
    assert!(matches!(err, RatesError::InvalidMessage(_)));

    let err = service
        .add_merchant_correction_rule(rule("buy", dec!(1), "  "))
        .await
        .unwrap_err();
    assert!(matches!(err, RatesError::InvalidMessage(_)));
}

#[tokio::test]
async fn test_rate_by_date() {
    let store = memory();
    let day = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
    for (date, rate) in [(day, dec!(0.91)), (day.succ_opt().unwrap(), dec!(0.95))] {
        let observation =
            RateObservation::new(pair("USDEUR"), RateType::ExternalMarket, "SEED", rate).at(noon(date));
        store.insert(observation).await.unwrap();
    }
    let service = running(Stores::shared(store)).await;

    let mut request = usd_eur_request("buy");
    let err = service.get_rate_by_date_common(&request).await.unwrap_err();
    assert!(matches!(err, RatesError::InvalidMessage(_)));

    request.date = Some(day);
    let observation = assert_ok!(service.get_rate_by_date_common(&request).await);
    assert_eq!(observation.rate, dec!(0.91));

    let latest = assert_ok!(service.get_rate_current_common(&request).await);
    assert_eq!(latest.rate, dec!(0.95));
}

#[tokio::test]
async fn test_exchange() {
    let store = memory();
    seed(&store, RateType::ExternalMarket, "USDEUR", dec!(0.89)).await;
    let service = running(Stores::shared(store)).await;

    let request = ExchangeAmountRequest {
        rate: usd_eur_request("buy"),
        amount: dec!(100),
    };
    let result = assert_ok!(service.exchange_current_common(&request).await);
    assert_eq!(result.original_rate, dec!(0.89));
    assert_eq!(result.exchanged_amount, dec!(89));
    assert_eq!(result.correction_percent, Decimal::ZERO);

    let zero = ExchangeAmountRequest {
        amount: Decimal::ZERO,
        ..request
    };
    let err = service.exchange_current_common(&zero).await.unwrap_err();
    assert_eq!(err, RatesError::InvalidAmount(Decimal::ZERO));

    assert_eq!(service.metrics().snapshot().exchanges, 1);
}

#[tokio::test]
async fn test_exchange_request_from_json() {
    let request: ExchangeAmountRequest = serde_json::from_str(
        r#"{"from":"USD","to":"EUR","rate_type":"external-market","exchange_direction":"buy","amount":"12.5"}"#,
    )
    .unwrap();
    assert_eq!(request.rate.from, "USD");
    assert_eq!(request.rate.merchant_id, "");
    assert_eq!(request.amount, dec!(12.5));
}

#[tokio::test]
async fn test_rule_lookup_is_hard_error() {
    let service = running(Stores::shared(memory())).await;
    let request = GetCorrectionRuleRequest {
        rate_type: "external-market".into(),
        exchange_direction: "buy".into(),
        merchant_id: String::new(),
    };

    let err = service.get_common_correction_rule(&request).await.unwrap_err();
    assert_eq!(err.error_code(), "RULE_NOT_FOUND");

    assert_ok!(service.add_common_correction_rule(rule("buy", dec!(2), "")).await);
    let found = assert_ok!(service.get_common_correction_rule(&request).await);
    assert_eq!(found.common_correction, dec!(2));

    let merchant = GetCorrectionRuleRequest {
        merchant_id: "m-7".into(),
        ..request
    };
    let fallback = assert_ok!(service.get_merchant_correction_rule(&merchant).await);
    assert_eq!(fallback.id, found.id);
}

#[tokio::test]
async fn test_corridor_roundtrip() {
    let service = running(Stores::shared(memory())).await;

    assert_eq!(
        service.get_correction_corridor().await.unwrap_err(),
        RatesError::CorridorNotSet
    );
    assert_err!(service.set_correction_corridor(dec!(-1)).await);
    assert_ok!(service.set_correction_corridor(dec!(0.5)).await);
    assert_eq!(service.get_correction_corridor().await.unwrap(), dec!(0.5));
}

#[tokio::test]
async fn test_recompute_now_stores_snapshots() {
    let store = memory();
    seed_recent_history(&store).await;
    let service = running(Stores::shared(store.clone())).await;
    service.set_correction_corridor(dec!(0.5)).await.unwrap();

    let snapshots = assert_ok!(service.recompute_now().await);
    assert_eq!(snapshots.len(), 4);
    assert_eq!(store.snapshot_count(), 4);

    let latest = assert_ok!(service.get_latest_correction("EURRUB").await).unwrap();
    assert!(latest.value > Decimal::ZERO);
    let inverse = assert_ok!(service.get_latest_correction("RUBEUR").await).unwrap();
    assert_eq!(inverse.value, Decimal::ZERO);

    assert_eq!(
        service.get_latest_correction("EURJPY").await.unwrap_err(),
        RatesError::UnknownPair("EURJPY".to_string())
    );
    assert_eq!(service.metrics().snapshot().recalculations, 1);
}

#[tokio::test]
async fn test_recompute_now_is_single_flight() {
    let store = memory();
    seed_recent_history(&store).await;
    let rates = FlakyRates::new(store.clone()).stalling(Duration::from_millis(50));
    let service = running(stores_with(&store, rates)).await;
    service.set_correction_corridor(dec!(0.5)).await.unwrap();

    let (first, second) = tokio::join!(service.recompute_now(), service.recompute_now());
    assert_ok!(first);
    assert_eq!(second.unwrap_err(), RatesError::RecalculationInProgress);
    assert_eq!(store.snapshot_count(), 4);
}

#[tokio::test]
async fn test_request_recalculation_arms_once() {
    let service = running(Stores::shared(memory())).await;

    assert_eq!(service.request_recalculation().await.unwrap(), ArmOutcome::Armed);
    assert_eq!(service.request_recalculation().await.unwrap(), ArmOutcome::AlreadyArmed);
    assert!(service
        .scheduler()
        .is_active(TriggerKind::CardNetworkRecalculation)
        .await
        .unwrap());

    service.stop().await.unwrap();
}

// --- Card-network consumer ---

fn rate_message(pair: &str, rate: &str, volume: &str) -> Delivery {
    Delivery::new(format!(
        r#"{{"kind":"rate","pair":"{}","rate":"{}","volume":"{}","source":"visa"}}"#,
        pair, rate, volume
    ))
}

#[tokio::test]
async fn test_consumer_merges_rates() {
    let store = memory();
    let service = running(Stores::shared(store.clone())).await;
    let consumer = service.card_rate_consumer();

    assert_eq!(consumer.handle(&rate_message("USDEUR", "0.8", "1")).await, Disposition::Ack);
    assert_eq!(consumer.handle(&rate_message("USDEUR", "0.9", "1")).await, Disposition::Ack);

    let latest = store
        .latest(&RateQuery::new(RateType::CardNetwork, pair("USDEUR")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.rate, dec!(0.85));
    assert_eq!(latest.volume, dec!(2));

    let metrics = service.metrics().snapshot();
    assert_eq!(metrics.messages_received, 2);
    assert_eq!(metrics.messages_merged, 2);
}

#[tokio::test]
async fn test_consumer_dead_letters_bad_messages() {
    let store = memory();
    let service = running(Stores::shared(store.clone())).await;
    let consumer = service.card_rate_consumer();

    let garbage = consumer.handle(&Delivery::new("not json")).await;
    assert!(matches!(garbage, Disposition::DeadLetter { .. }));

    let unsupported = consumer.handle(&rate_message("USDJPY", "150", "1")).await;
    assert!(matches!(unsupported, Disposition::DeadLetter { .. }));

    let negative = consumer.handle(&rate_message("USDEUR", "-1", "1")).await;
    assert!(matches!(negative, Disposition::DeadLetter { .. }));

    assert_eq!(store.observation_count(RateType::CardNetwork), 0);
    assert_eq!(service.metrics().snapshot().messages_dead_lettered, 3);
}

#[tokio::test]
async fn test_consumer_retries_storage_failures() {
    let store = memory();
    let rates = FlakyRates::new(store.clone()).failing(2);
    let service = running(stores_with(&store, rates)).await;
    let consumer = service.card_rate_consumer();

    let first = rate_message("EURRUB", "100", "3");
    assert_eq!(
        consumer.handle(&first).await,
        Disposition::Retry {
            after: Duration::from_millis(500)
        }
    );

    let second = first.redelivered();
    assert!(matches!(consumer.handle(&second).await, Disposition::Retry { .. }));

    assert_eq!(consumer.handle(&second.redelivered()).await, Disposition::Ack);
    assert_eq!(store.observation_count(RateType::CardNetwork), 1);
    assert_eq!(service.metrics().snapshot().messages_retried, 2);
}

#[tokio::test]
async fn test_consumer_gives_up_after_max_attempts() {
    let store = memory();
    let rates = FlakyRates::new(store.clone()).failing(10);
    let service = running(stores_with(&store, rates)).await;
    let consumer = service.card_rate_consumer();

    let mut delivery = rate_message("EURRUB", "100", "1");
    while delivery.attempt < 3 {
        assert!(matches!(consumer.handle(&delivery).await, Disposition::Retry { .. }));
        delivery = delivery.redelivered();
    }

    match consumer.handle(&delivery).await {
        Disposition::DeadLetter { reason } => assert!(reason.contains("connection reset")),
        other => panic!("expected dead letter, got {:?}", other),
    }
}

#[tokio::test]
async fn test_consumer_requests_recalculation() {
    let service = running(Stores::shared(memory())).await;
    let consumer = service.card_rate_consumer();

    let delivery = Delivery::new(r#"{"kind":"recalculate"}"#);
    assert_eq!(consumer.handle(&delivery).await, Disposition::Ack);
    assert_eq!(consumer.handle(&delivery).await, Disposition::Ack);
    assert!(service
        .scheduler()
        .is_active(TriggerKind::CardNetworkRecalculation)
        .await
        .unwrap());

    service.stop().await.unwrap();
}

#[tokio::test]
async fn test_metrics_exposition() {
    let service = running(Stores::shared(memory())).await;
    service.card_rate_consumer().handle(&Delivery::new("{}")).await;

    let text = service.metrics().to_prometheus();
    assert!(text.contains("ratekeeper_messages_dead_lettered 1"));
    assert!(text.contains("ratekeeper_messages_merged 0"));
}
