//! Storage traits.

use std::sync::Arc;

use async_trait::async_trait;
use ratekeeper_common::{
    CorrectionCorridor, CorrectionRule, CorrectionSnapshot, CurrencyPair, DelayedTrigger,
    ExchangeDirection, RateObservation, RateType, Result, Timestamp, TriggerKind,
};

/// Filter for a single-observation lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct RateQuery {
    pub rate_type: RateType,
    pub pair: CurrencyPair,
    /// Exact source tag, when set.
    pub source: Option<String>,
    /// Inclusive upper bound on `created_at`, when set.
    pub until: Option<Timestamp>,
}

impl RateQuery {
    pub fn new(rate_type: RateType, pair: CurrencyPair) -> Self {
        Self {
            rate_type,
            pair,
            source: None,
            until: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn until(mut self, until: Timestamp) -> Self {
        self.until = Some(until);
        self
    }
}

/// Append-only collection of rate observations.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Append one observation.
    async fn insert(&self, observation: RateObservation) -> Result<()>;

    /// Append a batch; either every observation is stored or none is.
    async fn insert_many(&self, observations: Vec<RateObservation>) -> Result<()>;

    /// Most recent observation matching `query`.
    ///
    /// Without `until` this is the most recently inserted match. With
    /// `until` it is the match with the greatest `created_at <= until`,
    /// later insertion winning ties.
    async fn latest(&self, query: &RateQuery) -> Result<Option<RateObservation>>;

    /// Observations of a pair with `from <= created_at <= to`, oldest first.
    async fn range(
        &self,
        rate_type: RateType,
        pair: &CurrencyPair,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<RateObservation>>;
}

/// Append-only collection of correction rules.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn insert_rule(&self, rule: CorrectionRule) -> Result<()>;

    /// Rules with this exact rate type and direction, in insertion order.
    async fn rules_for(
        &self,
        rate_type: RateType,
        direction: ExchangeDirection,
    ) -> Result<Vec<CorrectionRule>>;
}

/// Append-only stream of corridor widths.
#[async_trait]
pub trait CorridorStore: Send + Sync {
    async fn insert_corridor(&self, corridor: CorrectionCorridor) -> Result<()>;

    async fn latest_corridor(&self) -> Result<Option<CorrectionCorridor>>;
}

/// Per-pair correction snapshots written by recalculation runs.
#[async_trait]
pub trait CorrectionStore: Send + Sync {
    /// Store a full run; either every snapshot is stored or none is.
    async fn insert_snapshots(&self, snapshots: Vec<CorrectionSnapshot>) -> Result<()>;

    async fn latest_snapshot(&self, pair: &CurrencyPair) -> Result<Option<CorrectionSnapshot>>;
}

/// One mutable flag per trigger kind.
#[async_trait]
pub trait TriggerStore: Send + Sync {
    /// Current state; a kind never written is idle.
    async fn trigger(&self, kind: TriggerKind) -> Result<DelayedTrigger>;

    async fn set_active(&self, kind: TriggerKind, active: bool) -> Result<()>;
}

/// Handles to every store a service needs.
#[derive(Clone)]
pub struct Stores {
    pub rates: Arc<dyn RateStore>,
    pub rules: Arc<dyn RuleStore>,
    pub corridors: Arc<dyn CorridorStore>,
    pub corrections: Arc<dyn CorrectionStore>,
    pub triggers: Arc<dyn TriggerStore>,
}

impl Stores {
    /// Serve every concern from one backend.
    pub fn shared<S>(backend: Arc<S>) -> Self
    where
        S: RateStore + RuleStore + CorridorStore + CorrectionStore + TriggerStore + 'static,
    {
        Self {
            rates: backend.clone(),
            rules: backend.clone(),
            corridors: backend.clone(),
            corrections: backend.clone(),
            triggers: backend,
        }
    }
}
