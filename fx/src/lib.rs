//! Ratekeeper FX
//!
//! Rate resolution, correction rules and the statistical correction model.
//!
//! # Features
//!
//! - Latest / as-of-date lookups with central-bank to external-market fallback
//! - Merchant and global correction rules with per-pair overrides
//! - Incremental weighted-mean merging of the card-network feed
//! - Bollinger-Bands based correction corridor between two feeds
//!
//! # Example
//!
//! ```rust,ignore
//! use ratekeeper_fx::{RateEngine, RateRequest};
//! use ratekeeper_common::{Currency, ExchangeDirection, RateType};
//!
//! let request = RateRequest::new(
//!     RateType::CentralBank,
//!     ExchangeDirection::Buy,
//!     Currency::usd(),
//!     Currency::rub(),
//! )
//! .from_source("CBRF");
//!
//! let rate = engine.get_rate(&request).await?;
//! ```

pub mod bollinger;
pub mod corridor;
pub mod engine;
pub mod exchange;
pub mod merger;
pub mod provider;
pub mod resolver;
pub mod rules;

pub use bollinger::{Band, BollingerBands};
pub use corridor::{CorridorCalculator, CorridorConfig};
pub use engine::RateEngine;
pub use exchange::{ExchangeRequest, ExchangeResult, RateRequest};
pub use merger::{CardRateUpdate, StreamingMerger};
pub use provider::{BatchIngestor, FeedAdapter, FeedRate};
pub use resolver::RateResolver;
pub use rules::{CorrectionRuleEngine, NewCorrectionRule};

#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockFeed;
