//! Per-stage cost estimation.

use crate::config::EngineConfig;
use crate::providers::ProviderMetadata;
use serde_json::Value;
use std::collections::HashMap;

/// Prices provider calls in USD per 1k tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct CostModel {
    pricing: HashMap<String, f64>,
    default_price_per_1k: f64,
}

impl CostModel {
    /// Creates a model from explicit prices.
    #[must_use]
    pub fn new(pricing: HashMap<String, f64>, default_price_per_1k: f64) -> Self {
        Self {
            pricing,
            default_price_per_1k,
        }
    }

    /// Creates a model from the engine config.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.pricing.clone(), config.default_price_per_1k)
    }

    /// Returns the price for a provider.
    #[must_use]
    pub fn price_per_1k(&self, provider: &str) -> f64 {
        self.pricing
            .get(provider)
            .copied()
            .unwrap_or(self.default_price_per_1k)
    }

    /// Estimates the cost of one call. Never negative.
    ///
    /// Uses the reported token count when present, else payload chars / 4.
    #[must_use]
    pub fn estimate(&self, provider: &str, metadata: Option<&ProviderMetadata>, payload: &Value) -> f64 {
        let tokens = metadata
            .and_then(|m| m.tokens_used)
            .map_or_else(|| estimate_tokens(payload), u64::from);
        #[allow(clippy::cast_precision_loss)]
        let cost = tokens as f64 / 1000.0 * self.price_per_1k(provider);
        cost.max(0.0)
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

fn estimate_tokens(payload: &Value) -> u64 {
    let chars = match payload {
        Value::String(s) => s.chars().count(),
        Value::Null => 0,
        other => other.to_string().chars().count(),
    };
    u64::try_from(chars / 4).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_reported_tokens_and_provider_price() {
        let model = CostModel::new(HashMap::from([("anthropic".to_string(), 0.015)]), 0.002);
        let metadata = ProviderMetadata {
            tokens_used: Some(2000),
            ..ProviderMetadata::default()
        };

        assert!(approx(model.estimate("anthropic", Some(&metadata), &Value::Null), 0.03));
        assert!(approx(model.estimate("groq", Some(&metadata), &Value::Null), 0.004));
    }

    #[test]
    fn test_estimates_tokens_from_payload() {
        let model = CostModel::new(HashMap::new(), 1.0);
        let payload = Value::String("a".repeat(4000));
        assert!(approx(model.estimate("x", None, &payload), 1.0));
        assert!(approx(model.estimate("x", None, &Value::Null), 0.0));
    }

    #[test]
    fn test_negative_price_clamped() {
        let model = CostModel::new(HashMap::new(), -1.0);
        assert!(approx(model.estimate("x", None, &Value::String("abcd".into())), 0.0));
    }
}
