//! Ratekeeper Service
//!
//! Hosts the rate engine behind a request facade and drives the background
//! work around it: feed polling, the card-network consumer and the
//! end-of-day correction trigger.

pub mod config;
pub mod consumer;
pub mod metrics;
pub mod poller;
pub mod recalculation;
pub mod scheduler;
pub mod service;
pub mod state;

pub use config::ServiceConfig;
pub use consumer::{CardNetworkMessage, CardRateConsumer, CardRateMessage, Delivery, Disposition, RetryPolicy};
pub use metrics::{MetricsSnapshot, ServiceMetrics};
pub use poller::FeedPoller;
pub use recalculation::Recalculator;
pub use scheduler::{ArmOutcome, TriggerJob, TriggerScheduler};
pub use service::{ExchangeAmountRequest, GetCorrectionRuleRequest, GetRateRequest, RatesService};
pub use state::ServiceState;
