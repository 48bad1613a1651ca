//! Card-network message consumer with at-least-once redelivery.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};

use ratekeeper_common::{now, CurrencyValidator, RatesError, Result, Timestamp, TriggerKind};
use ratekeeper_fx::{CardRateUpdate, StreamingMerger};

use crate::config::RetryConfig;
use crate::metrics::ServiceMetrics;
use crate::scheduler::TriggerScheduler;

/// Exponential redelivery backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Backoff before redelivering after failed attempt `attempt` (1-based):
    /// `min(base * 2^(attempt - 1), max)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_backoff
            .checked_mul(1u32 << exponent)
            .map_or(self.max_backoff, |backoff| backoff.min(self.max_backoff))
    }

    /// Whether another delivery is allowed after `attempt`.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_backoff: config.base_backoff,
            max_backoff: config.max_backoff,
        }
    }
}

/// A broker delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub payload: Vec<u8>,
    /// Delivery count, starting at 1.
    pub attempt: u32,
}

impl Delivery {
    /// Create a first delivery.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            attempt: 1,
        }
    }

    /// Same payload, next attempt.
    pub fn redelivered(&self) -> Self {
        Self {
            payload: self.payload.clone(),
            attempt: self.attempt + 1,
        }
    }
}

/// What the broker should do with a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Processed; remove from the queue.
    Ack,
    /// Redeliver after `after`.
    Retry { after: Duration },
    /// Give up; park in the dead-letter queue.
    DeadLetter { reason: String },
}

/// One card-network rate as published on the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardRateMessage {
    /// Six-letter pair code.
    pub pair: String,
    pub rate: Decimal,
    #[serde(default)]
    pub volume: Option<Decimal>,
    pub source: String,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

/// Payloads accepted by [`CardRateConsumer`], tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CardNetworkMessage {
    /// A rate to merge.
    Rate(CardRateMessage),
    /// Ask for an end-of-day correction recalculation.
    Recalculate,
}

/// Turns broker deliveries into merges and recalculation requests.
pub struct CardRateConsumer {
    merger: Arc<StreamingMerger>,
    validator: Arc<CurrencyValidator>,
    scheduler: Arc<TriggerScheduler>,
    retry: RetryPolicy,
    metrics: Arc<ServiceMetrics>,
}

impl CardRateConsumer {
    pub fn new(
        merger: Arc<StreamingMerger>,
        validator: Arc<CurrencyValidator>,
        scheduler: Arc<TriggerScheduler>,
        retry: RetryPolicy,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            merger,
            validator,
            scheduler,
            retry,
            metrics,
        }
    }

    /// Process one delivery.
    ///
    /// Retryable failures are redelivered until the attempt budget runs
    /// out; anything else is dead-lettered since redelivery cannot help.
    #[instrument(skip(self, delivery), fields(attempt = delivery.attempt))]
    pub async fn handle(&self, delivery: &Delivery) -> Disposition {
        self.metrics.message_received();

        let result = match serde_json::from_slice::<CardNetworkMessage>(&delivery.payload) {
            Ok(message) => self.process(message).await,
            Err(e) => Err(RatesError::InvalidMessage(e.to_string())),
        };

        match result {
            Ok(()) => Disposition::Ack,
            Err(e) if e.is_retryable() && self.retry.allows_retry(delivery.attempt) => {
                let hint = Duration::from_millis(e.retry_after_ms().unwrap_or(0));
                let after = self.retry.backoff(delivery.attempt).max(hint).min(self.retry.max_backoff);
                self.metrics.message_retried();
                warn!(error = %e, retry_after_ms = after.as_millis() as u64, "Card network message will be redelivered");
                Disposition::Retry { after }
            }
            Err(e) => {
                self.metrics.message_dead_lettered();
                error!(
                    alert = true,
                    error = %e,
                    error_code = e.error_code(),
                    "Card network message dead-lettered"
                );
                Disposition::DeadLetter {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn process(&self, message: CardNetworkMessage) -> Result<()> {
        match message {
            CardNetworkMessage::Rate(message) => {
                let update = CardRateUpdate {
                    pair: self.validator.parse_pair(&message.pair)?,
                    rate: message.rate,
                    volume: message.volume.unwrap_or(Decimal::ONE),
                    source: message.source,
                    created_at: message.created_at.unwrap_or_else(now),
                };
                self.merger.merge(update).await?;
                self.metrics.message_merged();
                Ok(())
            }
            CardNetworkMessage::Recalculate => {
                let outcome = self
                    .scheduler
                    .arm_end_of_day(TriggerKind::CardNetworkRecalculation)
                    .await?;
                debug!(outcome = ?outcome, "Recalculation requested");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(3),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = policy();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff(4), Duration::from_secs(3));
        assert_eq!(policy.backoff(60), Duration::from_secs(3));
    }

    #[test]
    fn test_retry_budget() {
        let policy = policy();
        assert!(policy.allows_retry(4));
        assert!(!policy.allows_retry(5));
    }

    #[test]
    fn test_message_decoding() {
        let rate: CardNetworkMessage = serde_json::from_str(
            r#"{"kind":"rate","pair":"USDEUR","rate":"0.9","source":"visa"}"#,
        )
        .unwrap();
        match rate {
            CardNetworkMessage::Rate(message) => {
                assert_eq!(message.pair, "USDEUR");
                assert_eq!(message.volume, None);
                assert_eq!(message.created_at, None);
            }
            other => panic!("unexpected message {:?}", other),
        }

        let recalc: CardNetworkMessage = serde_json::from_str(r#"{"kind":"recalculate"}"#).unwrap();
        assert_eq!(recalc, CardNetworkMessage::Recalculate);
    }

    #[test]
    fn test_redelivery_increments_attempt() {
        let delivery = Delivery::new(b"{}".to_vec());
        assert_eq!(delivery.attempt, 1);
        assert_eq!(delivery.redelivered().redelivered().attempt, 3);
    }
}
