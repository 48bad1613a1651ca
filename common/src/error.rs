//! Error types for Ratekeeper.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{CurrencyPair, PairSide, RateType};

/// Main error type for rate resolution, correction and ingestion.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RatesError {
    /// One side of a requested pair is not in the supported set.
    #[error("Unsupported {side} currency: {currency}")]
    UnsupportedCurrency { side: PairSide, currency: String },

    /// No observation matched the lookup, fallback included.
    #[error("Rate not found for {pair} ({rate_type})")]
    RateNotFound {
        rate_type: RateType,
        pair: CurrencyPair,
    },

    /// Exchange amount must be strictly positive.
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// Rate type is unknown or not enabled.
    #[error("Invalid rate type: {0}")]
    InvalidRateType(String),

    /// Exchange direction is neither buy nor sell.
    #[error("Invalid exchange direction: {0}")]
    InvalidDirection(String),

    /// Correction percent outside [0, 100].
    #[error("Invalid correction percent: {0}")]
    InvalidPercent(Decimal),

    /// Malformed pair code or pair with an unsupported currency.
    #[error("Unknown currency pair: {0}")]
    UnknownPair(String),

    /// Corridor width outside [0, 1].
    #[error("Invalid correction corridor: {0}")]
    InvalidCorridor(Decimal),

    /// No corridor width has been stored yet.
    #[error("Correction corridor is not set")]
    CorridorNotSet,

    /// The daily series has gaps or is too short.
    #[error("Insufficient history for {pair} ({rate_type}): required {required} days, found {found}")]
    InsufficientHistory {
        rate_type: RateType,
        pair: CurrencyPair,
        required: usize,
        found: usize,
    },

    /// Bollinger output length does not match the requested number of days.
    #[error("Invalid band length: expected {expected}, got {actual}")]
    InvalidBandLength { expected: usize, actual: usize },

    /// Bollinger period must be at least 2.
    #[error("Invalid Bollinger period: {0}")]
    InvalidPeriod(usize),

    /// No correction rule matched the lookup.
    #[error("Correction rule not found for {rate_type}/{direction} (merchant: {merchant})")]
    RuleNotFound {
        rate_type: RateType,
        direction: String,
        merchant: String,
    },

    /// Accumulated weight of a merged observation is not positive.
    #[error("Invalid volume: {0}")]
    InvalidVolume(Decimal),

    /// Undecodable or malformed inbound message.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// A recalculation run is already executing.
    #[error("Recalculation already in progress")]
    RecalculationInProgress,

    /// Storage backend failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Service is not accepting requests.
    #[error("Service unavailable, retry after {retry_after_ms}ms")]
    ServiceUnavailable { retry_after_ms: u64 },

    /// Feed fetch exceeded its deadline.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RatesError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RatesError::Storage(_) | RatesError::Timeout(_) | RatesError::ServiceUnavailable { .. }
        )
    }

    /// Get suggested retry delay in milliseconds.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            RatesError::Storage(_) => Some(500),
            RatesError::Timeout(_) => Some(1000),
            RatesError::ServiceUnavailable { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }

    /// Get error code for the API layer.
    pub fn error_code(&self) -> &'static str {
        match self {
            RatesError::UnsupportedCurrency { side: PairSide::From, .. } => {
                "UNSUPPORTED_FROM_CURRENCY"
            }
            RatesError::UnsupportedCurrency { side: PairSide::To, .. } => {
                "UNSUPPORTED_TO_CURRENCY"
            }
            RatesError::RateNotFound { .. } => "RATE_NOT_FOUND",
            RatesError::InvalidAmount(_) => "INVALID_AMOUNT",
            RatesError::InvalidRateType(_) => "INVALID_RATE_TYPE",
            RatesError::InvalidDirection(_) => "INVALID_DIRECTION",
            RatesError::InvalidPercent(_) => "INVALID_PERCENT",
            RatesError::UnknownPair(_) => "UNKNOWN_PAIR",
            RatesError::InvalidCorridor(_) => "INVALID_CORRIDOR",
            RatesError::CorridorNotSet => "CORRIDOR_NOT_SET",
            RatesError::InsufficientHistory { .. } => "INSUFFICIENT_HISTORY",
            RatesError::InvalidBandLength { .. } => "INVALID_BAND_LENGTH",
            RatesError::InvalidPeriod(_) => "INVALID_PERIOD",
            RatesError::RuleNotFound { .. } => "RULE_NOT_FOUND",
            RatesError::InvalidVolume(_) => "INVALID_VOLUME",
            RatesError::InvalidMessage(_) => "INVALID_MESSAGE",
            RatesError::RecalculationInProgress => "RECALCULATION_IN_PROGRESS",
            RatesError::Storage(_) => "STORAGE_ERROR",
            RatesError::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            RatesError::Timeout(_) => "TIMEOUT",
            RatesError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }
}

/// Result type alias for Ratekeeper operations.
pub type Result<T> = std::result::Result<T, RatesError>;
