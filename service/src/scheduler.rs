//! One-shot delayed triggers with a persisted armed flag.
//!
//! A trigger moves `idle -> armed -> fired -> idle`. Arming sets the
//! stored flag before the timer starts, so callers see it immediately;
//! the flag is cleared once the job has run. An arm that arrives while
//! the job runs is queued and fires again at the next end of day.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use ratekeeper_common::{now, until_end_of_day, DurationExt, Result, TriggerKind};
use ratekeeper_store::TriggerStore;

/// Work run when a trigger fires.
#[async_trait]
pub trait TriggerJob: Send + Sync {
    /// Run for the calendar day the trigger was armed on.
    async fn fire(&self, kind: TriggerKind, day: NaiveDate) -> Result<()>;
}

/// Result of an arm request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmOutcome {
    /// A new timer was started.
    Armed,
    /// The trigger was already armed; the pending timer stays.
    AlreadyArmed,
    /// The job is running; it fires once more at the end of the day.
    Queued,
}

/// Schedules trigger jobs and tracks their armed flag.
pub struct TriggerScheduler {
    store: Arc<dyn TriggerStore>,
    job: Arc<dyn TriggerJob>,
    arming: Arc<Mutex<()>>,
    pending: Arc<DashMap<TriggerKind, JoinHandle<()>>>,
    /// Kinds whose job is running, with whether another run was requested.
    firing: Arc<DashMap<TriggerKind, bool>>,
}

impl TriggerScheduler {
    /// Create a new scheduler.
    pub fn new(store: Arc<dyn TriggerStore>, job: Arc<dyn TriggerJob>) -> Self {
        Self {
            store,
            job,
            arming: Arc::new(Mutex::new(())),
            pending: Arc::new(DashMap::new()),
            firing: Arc::new(DashMap::new()),
        }
    }

    /// Arm `kind` to fire after `delay` for `day`.
    #[instrument(skip(self), fields(trigger = kind.as_str()))]
    pub async fn arm(&self, kind: TriggerKind, delay: Duration, day: NaiveDate) -> Result<ArmOutcome> {
        let _arming = self.arming.lock().await;

        if self.store.trigger(kind).await?.active {
            if let Some(mut rerun) = self.firing.get_mut(&kind) {
                *rerun = true;
                info!("Trigger job running, another run queued");
                return Ok(ArmOutcome::Queued);
            }
            debug!("Trigger already armed");
            return Ok(ArmOutcome::AlreadyArmed);
        }

        self.store.set_active(kind, true).await?;
        self.spawn_fire(kind, delay, day);

        info!(delay_secs = delay.num_seconds(), day = %day, "Trigger armed");
        Ok(ArmOutcome::Armed)
    }

    /// Arm `kind` to fire at the end of the current UTC day.
    pub async fn arm_end_of_day(&self, kind: TriggerKind) -> Result<ArmOutcome> {
        let at = now();
        self.arm(kind, until_end_of_day(at), at.date_naive()).await
    }

    /// Clear the armed flag and drop any pending timer.
    pub async fn release(&self, kind: TriggerKind) -> Result<()> {
        let _arming = self.arming.lock().await;
        self.store.set_active(kind, false).await?;
        if let Some((_, handle)) = self.pending.remove(&kind) {
            handle.abort();
        }
        self.firing.remove(&kind);
        info!(trigger = kind.as_str(), "Trigger released");
        Ok(())
    }

    /// Whether `kind` is currently armed.
    pub async fn is_active(&self, kind: TriggerKind) -> Result<bool> {
        Ok(self.store.trigger(kind).await?.active)
    }

    /// Re-schedule a trigger left armed by a previous process.
    ///
    /// Returns `true` when a timer was started.
    pub async fn restore(&self, kind: TriggerKind) -> Result<bool> {
        let _arming = self.arming.lock().await;

        if !self.store.trigger(kind).await?.active {
            return Ok(false);
        }
        let timer_running = self
            .pending
            .get(&kind)
            .map_or(false, |handle| !handle.is_finished());
        if timer_running {
            return Ok(false);
        }

        let at = now();
        self.spawn_fire(kind, until_end_of_day(at), at.date_naive());
        warn!(trigger = kind.as_str(), "Restored armed trigger, firing at end of day");
        Ok(true)
    }

    /// Abort pending timers. Armed flags stay set for [`restore`](Self::restore).
    pub fn shutdown(&self) {
        let kinds: Vec<TriggerKind> = self.pending.iter().map(|entry| *entry.key()).collect();
        for kind in kinds {
            if let Some((_, handle)) = self.pending.remove(&kind) {
                handle.abort();
                debug!(trigger = kind.as_str(), "Pending trigger aborted");
            }
        }
        self.firing.clear();
    }

    fn spawn_fire(&self, kind: TriggerKind, delay: Duration, day: NaiveDate) {
        let store = self.store.clone();
        let job = self.job.clone();
        let arming = self.arming.clone();
        let pending = self.pending.clone();
        let firing = self.firing.clone();

        let handle = tokio::spawn(async move {
            let (mut delay, mut day) = (delay, day);
            loop {
                tokio::time::sleep(delay.as_std()).await;
                firing.insert(kind, false);
                info!(trigger = kind.as_str(), day = %day, "Trigger fired");

                if let Err(e) = job.fire(kind, day).await {
                    error!(
                        alert = true,
                        trigger = kind.as_str(),
                        error = %e,
                        "Triggered job failed"
                    );
                }

                // Completion and release happen under the arming lock, so an
                // arm either sees the run as in progress or sees it released.
                let _arming = arming.lock().await;
                let rerun = firing.remove(&kind).map_or(false, |(_, rerun)| rerun);
                if rerun {
                    let at = now();
                    delay = until_end_of_day(at);
                    day = at.date_naive();
                    info!(trigger = kind.as_str(), day = %day, "Queued trigger re-armed");
                    continue;
                }

                pending.remove(&kind);
                if let Err(e) = store.set_active(kind, false).await {
                    error!(
                        alert = true,
                        trigger = kind.as_str(),
                        error = %e,
                        "Failed to release trigger"
                    );
                }
                break;
            }
        });

        self.pending.insert(kind, handle);
    }
}
