//! Single-flight correction recalculation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::Mutex;
use tracing::{error, info};

use ratekeeper_common::{CorrectionSnapshot, RatesError, Result, TriggerKind};
use ratekeeper_fx::CorridorCalculator;

use crate::metrics::ServiceMetrics;
use crate::scheduler::TriggerJob;

/// Runs [`CorridorCalculator::recompute_all`] at most once at a time.
pub struct Recalculator {
    corridor: Arc<CorridorCalculator>,
    running: Mutex<()>,
    metrics: Arc<ServiceMetrics>,
}

impl Recalculator {
    pub fn new(corridor: Arc<CorridorCalculator>, metrics: Arc<ServiceMetrics>) -> Self {
        Self {
            corridor,
            running: Mutex::new(()),
            metrics,
        }
    }

    /// Recompute every pair as of `as_of`.
    ///
    /// Fails with [`RatesError::RecalculationInProgress`] while another run is executing.
    pub async fn run(&self, as_of: NaiveDate) -> Result<Vec<CorrectionSnapshot>> {
        let _running = self
            .running
            .try_lock()
            .map_err(|_| RatesError::RecalculationInProgress)?;

        match self.corridor.recompute_all(as_of).await {
            Ok(snapshots) => {
                self.metrics.recalculation_completed();
                Ok(snapshots)
            }
            Err(e) => {
                self.metrics.recalculation_failed();
                error!(alert = true, as_of = %as_of, error = %e, "Correction recalculation aborted");
                Err(e)
            }
        }
    }

    /// Whether a run is executing right now.
    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }
}

#[async_trait]
impl TriggerJob for Recalculator {
    async fn fire(&self, kind: TriggerKind, day: NaiveDate) -> Result<()> {
        let snapshots = self.run(day).await?;
        info!(trigger = kind.as_str(), pairs = snapshots.len(), "Triggered recalculation done");
        Ok(())
    }
}
