//! Service configuration.

use std::str::FromStr;
use std::time::Duration;

use ratekeeper_common::{Currency, CurrencyValidator, RateType, RateTypeRegistry, Result};
use ratekeeper_fx::CorridorConfig;

/// Supported currencies and the recalculation matrix.
#[derive(Debug, Clone)]
pub struct CurrencyConfig {
    /// Every currency the service answers for.
    pub supported: Vec<String>,
    /// Currencies paired with every supported currency on recalculation.
    pub base: Vec<String>,
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        Self {
            supported: to_strings(&[
                "USD", "EUR", "RUB", "CAD", "AUD", "GBP", "JPY", "SGD", "KZT", "HKD", "PHP", "PLN",
                "ZAR", "CHF",
            ]),
            base: to_strings(&["USD", "EUR", "RUB", "GBP"]),
        }
    }
}

/// Bollinger window sizes for the correction corridor.
#[derive(Debug, Clone)]
pub struct CorrectionConfig {
    /// Bands compared per pair.
    pub bollinger_days: usize,
    /// Window length of each band.
    pub bollinger_period: usize,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            bollinger_days: 7,
            bollinger_period: 21,
        }
    }
}

/// Pull-based feed polling.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Interval between polls of one adapter.
    pub poll_interval: Duration,
    /// Upper bound on a single fetch.
    pub fetch_timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3600),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

/// Redelivery policy for broker messages.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Deliveries before a message is dead-lettered.
    pub max_attempts: u32,
    /// Backoff after the first failed delivery.
    pub base_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Main service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Currency configuration.
    pub currencies: CurrencyConfig,
    /// Rate types with a storage namespace.
    pub enabled_rate_types: Vec<String>,
    /// Recognized central-bank source tags.
    pub central_bank_sources: Vec<String>,
    /// Correction corridor configuration.
    pub correction: CorrectionConfig,
    /// Feed polling configuration.
    pub feeds: FeedConfig,
    /// Message redelivery configuration.
    pub retry: RetryConfig,
    /// PostgreSQL URL; the in-memory store is used when absent.
    pub database_url: Option<String>,
    /// Connection pool size.
    pub database_max_connections: u32,
    /// Log level.
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            currencies: CurrencyConfig::default(),
            enabled_rate_types: RateType::ALL.iter().map(|t| t.as_str().to_string()).collect(),
            central_bank_sources: to_strings(&["CBRF", "CBEU", "CBCA", "CBPL", "CBAU"]),
            correction: CorrectionConfig::default(),
            feeds: FeedConfig::default(),
            retry: RetryConfig::default(),
            database_url: None,
            database_max_connections: 10,
            log_level: "info".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(list) = env_list("RATES_SUPPORTED_CURRENCIES") {
            config.currencies.supported = list;
        }
        if let Some(list) = env_list("RATES_BASE_CURRENCIES") {
            config.currencies.base = list;
        }
        if let Some(list) = env_list("RATES_ENABLED_TYPES") {
            config.enabled_rate_types = list;
        }
        if let Some(list) = env_list("RATES_CENTRAL_BANK_SOURCES") {
            config.central_bank_sources = list;
        }

        if let Some(days) = env_parse("RATES_BOLLINGER_DAYS") {
            config.correction.bollinger_days = days;
        }
        if let Some(period) = env_parse("RATES_BOLLINGER_PERIOD") {
            config.correction.bollinger_period = period;
        }

        if let Some(secs) = env_parse("RATES_POLL_INTERVAL_SECS") {
            config.feeds.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse("RATES_FEED_TIMEOUT_SECS") {
            config.feeds.fetch_timeout = Duration::from_secs(secs);
        }

        if let Some(attempts) = env_parse("RATES_RETRY_MAX_ATTEMPTS") {
            config.retry.max_attempts = attempts;
        }
        if let Some(ms) = env_parse("RATES_RETRY_BACKOFF_MS") {
            config.retry.base_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse("RATES_RETRY_MAX_BACKOFF_MS") {
            config.retry.max_backoff = Duration::from_millis(ms);
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.trim().is_empty() {
                config.database_url = Some(url);
            }
        }
        if let Some(max) = env_parse("RATES_DATABASE_MAX_CONNECTIONS") {
            config.database_max_connections = max;
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.currencies.supported.is_empty() {
            return Err("Supported currency set cannot be empty".to_string());
        }

        for code in self.currencies.supported.iter().chain(&self.currencies.base) {
            if !Currency::new(code.as_str()).is_well_formed() {
                return Err(format!("Malformed currency code: {}", code));
            }
        }

        let validator = self.validator();
        if let Some(base) = self
            .currencies
            .base
            .iter()
            .find(|code| !validator.is_supported(&Currency::new(code.as_str())))
        {
            return Err(format!("Base currency {} is not supported", base));
        }

        self.registry().map_err(|e| e.to_string())?;

        if self.correction.bollinger_days < 1 {
            return Err("Bollinger days must be at least 1".to_string());
        }
        if self.correction.bollinger_period < 2 {
            return Err("Bollinger period must be at least 2".to_string());
        }

        if self.feeds.poll_interval.is_zero() {
            return Err("Poll interval cannot be 0".to_string());
        }
        if self.feeds.fetch_timeout.is_zero() {
            return Err("Feed timeout cannot be 0".to_string());
        }

        if self.retry.max_attempts == 0 {
            return Err("Retry attempts cannot be 0".to_string());
        }
        if self.retry.base_backoff.is_zero() {
            return Err("Retry backoff cannot be 0".to_string());
        }
        if self.retry.base_backoff > self.retry.max_backoff {
            return Err("Retry backoff cannot exceed max backoff".to_string());
        }

        if self.database_url.is_some() && self.database_max_connections == 0 {
            return Err("Database pool size cannot be 0".to_string());
        }

        Ok(())
    }

    /// Namespace registry for the enabled rate types.
    pub fn registry(&self) -> Result<RateTypeRegistry> {
        RateTypeRegistry::from_names(&self.enabled_rate_types)
    }

    /// Validator over the supported currency set.
    pub fn validator(&self) -> CurrencyValidator {
        CurrencyValidator::new(
            self.currencies
                .supported
                .iter()
                .map(|code| Currency::new(code.as_str())),
        )
    }

    /// Corridor calculator settings.
    pub fn corridor(&self) -> CorridorConfig {
        CorridorConfig {
            days: self.correction.bollinger_days,
            period: self.correction.bollinger_period,
            base_currencies: self
                .currencies
                .base
                .iter()
                .map(|code| Currency::new(code.as_str()))
                .collect(),
        }
    }
}

/// Split a comma-separated list, dropping blanks.
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_list(name: &str) -> Option<Vec<String>> {
    std::env::var(name).ok().map(|value| parse_list(&value))
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.trim().parse().ok())
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
