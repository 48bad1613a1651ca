//! Operational counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Service counters.
pub struct ServiceMetrics {
    /// Rate lookups answered.
    pub rates_served: AtomicU64,
    /// Exchanges computed.
    pub exchanges: AtomicU64,
    /// Correction rules appended.
    pub rules_added: AtomicU64,
    /// Card-network messages received.
    pub messages_received: AtomicU64,
    /// Card-network rates merged.
    pub messages_merged: AtomicU64,
    /// Messages handed back for redelivery.
    pub messages_retried: AtomicU64,
    /// Messages given up on.
    pub messages_dead_lettered: AtomicU64,
    /// Successful feed polls.
    pub feed_polls: AtomicU64,
    /// Failed feed polls.
    pub feed_failures: AtomicU64,
    /// Observations written by feed polls.
    pub observations_ingested: AtomicU64,
    /// Completed recalculation runs.
    pub recalculations: AtomicU64,
    /// Aborted recalculation runs.
    pub recalculation_failures: AtomicU64,
}

impl ServiceMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            rates_served: AtomicU64::new(0),
            exchanges: AtomicU64::new(0),
            rules_added: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_merged: AtomicU64::new(0),
            messages_retried: AtomicU64::new(0),
            messages_dead_lettered: AtomicU64::new(0),
            feed_polls: AtomicU64::new(0),
            feed_failures: AtomicU64::new(0),
            observations_ingested: AtomicU64::new(0),
            recalculations: AtomicU64::new(0),
            recalculation_failures: AtomicU64::new(0),
        }
    }

    pub fn rate_served(&self) {
        self.rates_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn exchange_completed(&self) {
        self.exchanges.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rule_added(&self) {
        self.rules_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_merged(&self) {
        self.messages_merged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_retried(&self) {
        self.messages_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_dead_lettered(&self) {
        self.messages_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful poll that wrote `written` observations.
    pub fn feed_polled(&self, written: usize) {
        self.feed_polls.fetch_add(1, Ordering::Relaxed);
        self.observations_ingested
            .fetch_add(written as u64, Ordering::Relaxed);
    }

    pub fn feed_failed(&self) {
        self.feed_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn recalculation_completed(&self) {
        self.recalculations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn recalculation_failed(&self) {
        self.recalculation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rates_served: self.rates_served.load(Ordering::Relaxed),
            exchanges: self.exchanges.load(Ordering::Relaxed),
            rules_added: self.rules_added.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_merged: self.messages_merged.load(Ordering::Relaxed),
            messages_retried: self.messages_retried.load(Ordering::Relaxed),
            messages_dead_lettered: self.messages_dead_lettered.load(Ordering::Relaxed),
            feed_polls: self.feed_polls.load(Ordering::Relaxed),
            feed_failures: self.feed_failures.load(Ordering::Relaxed),
            observations_ingested: self.observations_ingested.load(Ordering::Relaxed),
            recalculations: self.recalculations.load(Ordering::Relaxed),
            recalculation_failures: self.recalculation_failures.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let counters = [
            ("rates_served", "Rate lookups answered", snapshot.rates_served),
            ("exchanges", "Exchanges computed", snapshot.exchanges),
            ("rules_added", "Correction rules appended", snapshot.rules_added),
            ("messages_received", "Card network messages received", snapshot.messages_received),
            ("messages_merged", "Card network rates merged", snapshot.messages_merged),
            ("messages_retried", "Messages returned for redelivery", snapshot.messages_retried),
            ("messages_dead_lettered", "Messages dead-lettered", snapshot.messages_dead_lettered),
            ("feed_polls", "Successful feed polls", snapshot.feed_polls),
            ("feed_failures", "Failed feed polls", snapshot.feed_failures),
            ("observations_ingested", "Observations written by feed polls", snapshot.observations_ingested),
            ("recalculations", "Completed correction recalculations", snapshot.recalculations),
            ("recalculation_failures", "Aborted correction recalculations", snapshot.recalculation_failures),
        ];

        counters
            .iter()
            .map(|(name, help, value)| {
                format!(
                    "# HELP ratekeeper_{name} {help}\n# TYPE ratekeeper_{name} counter\nratekeeper_{name} {value}\n"
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub rates_served: u64,
    pub exchanges: u64,
    pub rules_added: u64,
    pub messages_received: u64,
    pub messages_merged: u64,
    pub messages_retried: u64,
    pub messages_dead_lettered: u64,
    pub feed_polls: u64,
    pub feed_failures: u64,
    pub observations_ingested: u64,
    pub recalculations: u64,
    pub recalculation_failures: u64,
}
