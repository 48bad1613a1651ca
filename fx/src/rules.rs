//! Correction rule lookup and registration.

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use ratekeeper_common::{
    CorrectionRule, CurrencyValidator, ExchangeDirection, MerchantId, RateType, RateTypeRegistry,
    RatesError, Result, RuleScope,
};
use ratekeeper_store::RuleStore;

/// Unvalidated input for [`CorrectionRuleEngine::add_rule`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewCorrectionRule {
    pub rate_type: String,
    pub exchange_direction: String,
    #[serde(default)]
    pub common_correction: Decimal,
    #[serde(default)]
    pub pair_correction: BTreeMap<String, Decimal>,
    /// Empty for a global rule.
    #[serde(default)]
    pub merchant_id: String,
}

/// Resolves and appends percent-based correction rules.
pub struct CorrectionRuleEngine {
    store: Arc<dyn RuleStore>,
    validator: Arc<CurrencyValidator>,
    registry: RateTypeRegistry,
}

impl CorrectionRuleEngine {
    pub fn new(
        store: Arc<dyn RuleStore>,
        validator: Arc<CurrencyValidator>,
        registry: RateTypeRegistry,
    ) -> Self {
        Self {
            store,
            validator,
            registry,
        }
    }

    /// Effective rule for `(rate_type, direction, merchant)`.
    ///
    /// Merchant-scoped rules outrank global ones; within a tier the newest
    /// rule wins, insertion order breaking ties.
    #[instrument(skip(self), fields(rate_type = %rate_type, direction = %direction))]
    pub async fn lookup_rule(
        &self,
        rate_type: RateType,
        direction: ExchangeDirection,
        merchant: Option<&MerchantId>,
    ) -> Result<CorrectionRule> {
        let candidates = self.store.rules_for(rate_type, direction).await?;

        let merchant_rule = merchant.and_then(|id| {
            newest(&candidates, |scope| matches!(scope, RuleScope::Merchant(m) if m == id))
        });

        merchant_rule
            .or_else(|| newest(&candidates, RuleScope::is_global))
            .cloned()
            .ok_or_else(|| RatesError::RuleNotFound {
                rate_type,
                direction: direction.to_string(),
                merchant: merchant.map(|m| m.to_string()).unwrap_or_default(),
            })
    }

    /// Like [`lookup_rule`](Self::lookup_rule), with a missing rule reported as `None`.
    pub async fn applicable_rule(
        &self,
        rate_type: RateType,
        direction: ExchangeDirection,
        merchant: Option<&MerchantId>,
    ) -> Result<Option<CorrectionRule>> {
        match self.lookup_rule(rate_type, direction, merchant).await {
            Ok(rule) => Ok(Some(rule)),
            Err(e @ RatesError::RuleNotFound { .. }) => {
                debug!(error = %e, "No correction rule, using raw rate");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Validate and append a new rule. Nothing is stored when any check fails.
    #[instrument(skip(self, request), fields(rate_type = %request.rate_type, merchant = %request.merchant_id))]
    pub async fn add_rule(&self, request: NewCorrectionRule) -> Result<CorrectionRule> {
        let rate_type = self.registry.parse(&request.rate_type)?;
        let direction: ExchangeDirection = request.exchange_direction.parse()?;
        check_percent(request.common_correction)?;

        let mut pair_correction = BTreeMap::new();
        for (code, pct) in &request.pair_correction {
            let pair = self.validator.parse_pair(code.trim())?;
            check_percent(*pct)?;
            pair_correction.insert(pair.code(), *pct);
        }

        let scope = RuleScope::for_merchant(MerchantId::parse_optional(&request.merchant_id));
        let rule = CorrectionRule::new(
            rate_type,
            direction,
            scope,
            request.common_correction,
            pair_correction,
        );

        self.store.insert_rule(rule.clone()).await?;

        info!(
            rule_id = %rule.id,
            scope = %rule.scope,
            common_correction = %rule.common_correction,
            pair_overrides = rule.pair_correction.len(),
            "Added correction rule"
        );

        Ok(rule)
    }
}

fn check_percent(pct: Decimal) -> Result<()> {
    if pct < Decimal::ZERO || pct > Decimal::ONE_HUNDRED {
        return Err(RatesError::InvalidPercent(pct));
    }
    Ok(())
}

fn newest<'a>(
    rules: &'a [CorrectionRule],
    in_scope: impl Fn(&RuleScope) -> bool,
) -> Option<&'a CorrectionRule> {
    rules
        .iter()
        .enumerate()
        .filter(|(_, rule)| in_scope(&rule.scope))
        .max_by_key(|(seq, rule)| (rule.created_at, *seq))
        .map(|(_, rule)| rule)
}
