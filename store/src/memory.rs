//! In-memory storage backend.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use ratekeeper_common::{
    CorrectionCorridor, CorrectionRule, CorrectionSnapshot, CurrencyPair, DelayedTrigger,
    ExchangeDirection, Namespace, RateObservation, RateType, RateTypeRegistry, Result,
    Timestamp, TriggerKind,
};

use crate::traits::{CorrectionStore, CorridorStore, RateQuery, RateStore, RuleStore, TriggerStore};

/// Thread-safe in-memory store. Each namespace is a vector in insertion
/// order, so the vector index is the insertion tie-breaker.
pub struct MemoryStore {
    registry: RateTypeRegistry,
    rates: RwLock<HashMap<Namespace, Vec<RateObservation>>>,
    rules: RwLock<Vec<CorrectionRule>>,
    corridors: RwLock<Vec<CorrectionCorridor>>,
    snapshots: RwLock<Vec<CorrectionSnapshot>>,
    triggers: DashMap<TriggerKind, bool>,
}

impl MemoryStore {
    /// Create a store with one empty namespace per enabled rate type.
    pub fn new(registry: RateTypeRegistry) -> Self {
        let rates = registry.namespaces().map(|ns| (ns, Vec::new())).collect();
        Self {
            registry,
            rates: RwLock::new(rates),
            rules: RwLock::new(Vec::new()),
            corridors: RwLock::new(Vec::new()),
            snapshots: RwLock::new(Vec::new()),
            triggers: DashMap::new(),
        }
    }

    /// Number of observations stored under a rate type.
    pub fn observation_count(&self, rate_type: RateType) -> usize {
        self.registry
            .namespace(rate_type)
            .ok()
            .and_then(|ns| self.rates.read().get(&ns).map(Vec::len))
            .unwrap_or(0)
    }

    /// Number of snapshots written across all runs.
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.read().len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(RateTypeRegistry::all())
    }
}

#[async_trait]
impl RateStore for MemoryStore {
    async fn insert(&self, observation: RateObservation) -> Result<()> {
        self.insert_many(vec![observation]).await
    }

    async fn insert_many(&self, observations: Vec<RateObservation>) -> Result<()> {
        // Resolve every namespace first so a bad entry rejects the whole batch.
        let targets = observations
            .iter()
            .map(|o| self.registry.namespace(o.rate_type))
            .collect::<Result<Vec<_>>>()?;

        let mut rates = self.rates.write();
        for (ns, observation) in targets.into_iter().zip(observations) {
            debug!(namespace = %ns, pair = %observation.pair, rate = %observation.rate, "Stored observation");
            rates.entry(ns).or_default().push(observation);
        }
        Ok(())
    }

    async fn latest(&self, query: &RateQuery) -> Result<Option<RateObservation>> {
        let ns = self.registry.namespace(query.rate_type)?;
        let rates = self.rates.read();
        let Some(observations) = rates.get(&ns) else {
            return Ok(None);
        };

        let matches = observations.iter().enumerate().filter(|(_, o)| {
            o.pair == query.pair
                && query.source.as_ref().map_or(true, |s| &o.source == s)
                && query.until.map_or(true, |until| o.created_at <= until)
        });

        let found = match query.until {
            None => matches.last(),
            Some(_) => matches.max_by_key(|(seq, o)| (o.created_at, *seq)),
        };
        Ok(found.map(|(_, o)| o.clone()))
    }

    async fn range(
        &self,
        rate_type: RateType,
        pair: &CurrencyPair,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<RateObservation>> {
        let ns = self.registry.namespace(rate_type)?;
        let rates = self.rates.read();
        let mut found: Vec<(usize, RateObservation)> = rates
            .get(&ns)
            .map(|observations| {
                observations
                    .iter()
                    .enumerate()
                    .filter(|(_, o)| &o.pair == pair && o.created_at >= from && o.created_at <= to)
                    .map(|(seq, o)| (seq, o.clone()))
                    .collect()
            })
            .unwrap_or_default();
        found.sort_by_key(|(seq, o)| (o.created_at, *seq));
        Ok(found.into_iter().map(|(_, o)| o).collect())
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn insert_rule(&self, rule: CorrectionRule) -> Result<()> {
        self.registry.namespace(rule.rate_type)?;
        self.rules.write().push(rule);
        Ok(())
    }

    async fn rules_for(
        &self,
        rate_type: RateType,
        direction: ExchangeDirection,
    ) -> Result<Vec<CorrectionRule>> {
        Ok(self
            .rules
            .read()
            .iter()
            .filter(|r| r.rate_type == rate_type && r.direction == direction)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CorridorStore for MemoryStore {
    async fn insert_corridor(&self, corridor: CorrectionCorridor) -> Result<()> {
        self.corridors.write().push(corridor);
        Ok(())
    }

    async fn latest_corridor(&self) -> Result<Option<CorrectionCorridor>> {
        Ok(self.corridors.read().last().cloned())
    }
}

#[async_trait]
impl CorrectionStore for MemoryStore {
    async fn insert_snapshots(&self, snapshots: Vec<CorrectionSnapshot>) -> Result<()> {
        self.snapshots.write().extend(snapshots);
        Ok(())
    }

    async fn latest_snapshot(&self, pair: &CurrencyPair) -> Result<Option<CorrectionSnapshot>> {
        Ok(self
            .snapshots
            .read()
            .iter()
            .rev()
            .find(|s| &s.pair == pair)
            .cloned())
    }
}

#[async_trait]
impl TriggerStore for MemoryStore {
    async fn trigger(&self, kind: TriggerKind) -> Result<DelayedTrigger> {
        let active = self.triggers.get(&kind).map(|a| *a).unwrap_or(false);
        Ok(DelayedTrigger { kind, active })
    }

    async fn set_active(&self, kind: TriggerKind, active: bool) -> Result<()> {
        self.triggers.insert(kind, active);
        Ok(())
    }
}
