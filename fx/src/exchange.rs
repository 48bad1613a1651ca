//! Rate and exchange request/result types.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use ratekeeper_common::{
    end_of_day, AsOf, Currency, CurrencyPair, ExchangeDirection, MerchantId, RateType,
};

/// A typed request for a (possibly corrected) rate.
#[derive(Debug, Clone, PartialEq)]
pub struct RateRequest {
    pub rate_type: RateType,
    pub direction: ExchangeDirection,
    pub from: Currency,
    pub to: Currency,
    /// Caller whose merchant rules take priority, if any.
    pub merchant: Option<MerchantId>,
    pub as_of: AsOf,
    /// Central-bank discriminator.
    pub source: Option<String>,
}

impl RateRequest {
    /// Create a new request for the latest rate with global rules.
    pub fn new(
        rate_type: RateType,
        direction: ExchangeDirection,
        from: Currency,
        to: Currency,
    ) -> Self {
        Self {
            rate_type,
            direction,
            from,
            to,
            merchant: None,
            as_of: AsOf::Latest,
            source: None,
        }
    }

    /// Apply this merchant's rules.
    pub fn for_merchant(mut self, merchant: MerchantId) -> Self {
        self.merchant = Some(merchant);
        self
    }

    /// Evaluate as of the end of a calendar day.
    pub fn on_date(mut self, date: NaiveDate) -> Self {
        self.as_of = AsOf::At(end_of_day(date));
        self
    }

    /// Filter central-bank lookups by source.
    pub fn from_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Get the currency pair.
    pub fn pair(&self) -> CurrencyPair {
        CurrencyPair::new(self.from.clone(), self.to.clone())
    }
}

/// A request to exchange an amount of `rate.from` into `rate.to`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeRequest {
    pub rate: RateRequest,
    pub amount: Decimal,
}

impl ExchangeRequest {
    /// Create a new exchange request.
    pub fn new(rate: RateRequest, amount: Decimal) -> Self {
        Self { rate, amount }
    }
}

/// Outcome of an exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeResult {
    pub pair: CurrencyPair,
    pub rate_type: RateType,
    pub direction: ExchangeDirection,
    /// Resolved rate before any correction.
    pub original_rate: Decimal,
    /// Rate after the effective correction rule.
    pub exchange_rate: Decimal,
    /// Percent the rule applied to this pair, zero without a rule.
    pub correction_percent: Decimal,
    pub amount: Decimal,
    pub exchanged_amount: Decimal,
    pub executed_at: DateTime<Utc>,
}
