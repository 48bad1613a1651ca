//! Fixed-interval polling of pull-based feeds.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{error, info, instrument};

use ratekeeper_common::{RatesError, Result};
use ratekeeper_fx::{BatchIngestor, FeedAdapter};

use crate::config::FeedConfig;
use crate::metrics::ServiceMetrics;

/// Polls every registered adapter on its own interval.
pub struct FeedPoller {
    ingestor: Arc<BatchIngestor>,
    adapters: Vec<Arc<dyn FeedAdapter>>,
    config: FeedConfig,
    metrics: Arc<ServiceMetrics>,
}

impl FeedPoller {
    /// Create a poller with no adapters.
    pub fn new(ingestor: Arc<BatchIngestor>, config: FeedConfig, metrics: Arc<ServiceMetrics>) -> Self {
        Self {
            ingestor,
            adapters: Vec::new(),
            config,
            metrics,
        }
    }

    /// Register an adapter.
    pub fn with_adapter(mut self, adapter: Arc<dyn FeedAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    /// Fetch once, bounded by the configured timeout, and ingest the batch.
    #[instrument(skip(self, adapter), fields(adapter = adapter.name()))]
    pub async fn poll_once(&self, adapter: &dyn FeedAdapter) -> Result<usize> {
        let rates = timeout(self.config.fetch_timeout, adapter.fetch())
            .await
            .map_err(|_| {
                RatesError::Timeout(format!(
                    "feed {} gave no answer within {:?}",
                    adapter.name(),
                    self.config.fetch_timeout
                ))
            })??;

        self.ingestor.ingest(adapter.rate_type(), rates).await
    }

    /// Poll every adapter once; failures are reported and counted, not returned.
    pub async fn poll_all(&self) -> usize {
        let mut written = 0;
        for adapter in &self.adapters {
            written += self.poll_reported(adapter.as_ref()).await;
        }
        written
    }

    /// Start one polling loop per adapter.
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        info!(
            adapters = self.adapters.len(),
            interval_secs = self.config.poll_interval.as_secs(),
            "Starting feed polling"
        );

        self.adapters
            .iter()
            .cloned()
            .map(|adapter| {
                let poller = self.clone();
                tokio::spawn(async move { poller.run_adapter_loop(adapter).await })
            })
            .collect()
    }

    async fn run_adapter_loop(&self, adapter: Arc<dyn FeedAdapter>) {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.poll_reported(adapter.as_ref()).await;
        }
    }

    async fn poll_reported(&self, adapter: &dyn FeedAdapter) -> usize {
        match self.poll_once(adapter).await {
            Ok(written) => {
                self.metrics.feed_polled(written);
                written
            }
            Err(e) => {
                self.metrics.feed_failed();
                error!(
                    alert = true,
                    adapter = adapter.name(),
                    error = %e,
                    "Feed poll failed"
                );
                0
            }
        }
    }
}
