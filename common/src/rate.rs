//! Rate observations and the enums that classify them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::currency::{Currency, CurrencyPair};
use crate::error::{RatesError, Result};
use crate::precision::to_precise;

/// Source tag of synthetic `from == to` observations.
pub const IDENTITY_SOURCE: &str = "IDENTITY";

/// Normalized source tag of card-network observations.
pub const CARD_NETWORK_SOURCE: &str = "CARDNET";

/// Origin category of a rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RateType {
    /// Commercial market-data providers.
    ExternalMarket,
    /// National central banks, discriminated by source.
    CentralBank,
    /// Card-network push feed.
    CardNetwork,
    /// Internally predicted rate.
    InternalPrediction,
    /// Rates derived from stock quotes.
    StockDerived,
}

impl RateType {
    /// All rate types, in declaration order.
    pub const ALL: [RateType; 5] = [
        RateType::ExternalMarket,
        RateType::CentralBank,
        RateType::CardNetwork,
        RateType::InternalPrediction,
        RateType::StockDerived,
    ];

    /// Stable wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RateType::ExternalMarket => "external-market",
            RateType::CentralBank => "central-bank",
            RateType::CardNetwork => "card-network",
            RateType::InternalPrediction => "internal-prediction",
            RateType::StockDerived => "stock-derived",
        }
    }
}

impl fmt::Display for RateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RateType {
    type Err = RatesError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        RateType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| RatesError::InvalidRateType(s.to_string()))
    }
}

/// Direction of an exchange, from the merchant's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeDirection {
    Buy,
    Sell,
}

impl ExchangeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeDirection::Buy => "buy",
            ExchangeDirection::Sell => "sell",
        }
    }
}

impl fmt::Display for ExchangeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeDirection {
    type Err = RatesError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(ExchangeDirection::Buy),
            "sell" => Ok(ExchangeDirection::Sell),
            _ => Err(RatesError::InvalidDirection(s.to_string())),
        }
    }
}

/// Point in time a lookup is evaluated at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AsOf {
    /// Most recently inserted observation, no time bound.
    #[default]
    Latest,
    /// Latest observation created on or before the end of this instant's UTC day.
    At(DateTime<Utc>),
}

/// A single rate observation. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateObservation {
    /// Unique observation ID.
    pub id: Uuid,
    /// Pair the rate converts.
    pub pair: CurrencyPair,
    /// Origin category.
    pub rate_type: RateType,
    /// Short origin tag, e.g. the specific central bank.
    pub source: String,
    /// Units of `pair.to` per unit of `pair.from`.
    pub rate: Decimal,
    /// Non-negative weight used by streaming merges.
    pub volume: Decimal,
    /// When the rate was observed.
    pub created_at: DateTime<Utc>,
}

impl RateObservation {
    /// Create an observation stamped now, with unit volume and a precision-normalized rate.
    pub fn new(
        pair: CurrencyPair,
        rate_type: RateType,
        source: impl Into<String>,
        rate: Decimal,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            pair,
            rate_type,
            source: source.into(),
            rate: to_precise(rate),
            volume: Decimal::ONE,
            created_at: Utc::now(),
        }
    }

    /// Synthetic rate of 1 for `currency` against itself.
    pub fn identity(currency: &Currency, rate_type: RateType) -> Self {
        Self::new(
            CurrencyPair::new(currency.clone(), currency.clone()),
            rate_type,
            IDENTITY_SOURCE,
            Decimal::ONE,
        )
    }

    /// Set the accumulated volume.
    pub fn with_volume(mut self, volume: Decimal) -> Self {
        self.volume = volume;
        self
    }

    /// Set the observation time.
    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}
