//! Model-aware pricing in integer nanodollars.
//!
//! Prices are USD per million tokens, matched against the model name by
//! substring (e.g. "sonnet" matches "claude-sonnet-4-5-20250929"). Config
//! overrides are consulted before the built-in table, and unknown models fall
//! back to sonnet rates so they are never charged zero.

use crate::domain::models::{ModelPrice, PricingConfig};

/// Known model pricing table (costs in USD per million tokens).
const PRICING_TABLE: &[(&str, ModelPrice)] = &[
    (
        "opus",
        ModelPrice { input_per_million: 15.0, output_per_million: 75.0 },
    ),
    (
        "sonnet",
        ModelPrice { input_per_million: 3.0, output_per_million: 15.0 },
    ),
    (
        "haiku",
        ModelPrice { input_per_million: 0.80, output_per_million: 4.0 },
    ),
];

const FALLBACK_PRICE: ModelPrice = ModelPrice {
    input_per_million: 3.0,
    output_per_million: 15.0,
};

/// Nanodollars per USD-per-million-tokens per token.
const NANOS_PER_MILLION_RATE: f64 = 1_000.0;

/// Rough prompt size heuristic used for pre-call estimates.
const CHARS_PER_TOKEN: usize = 4;

/// Price lookup with configured overrides.
#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    /// Lowercased pattern and price, longest pattern first.
    overrides: Vec<(String, ModelPrice)>,
}

impl PricingTable {
    pub fn new(config: &PricingConfig) -> Self {
        let mut overrides: Vec<(String, ModelPrice)> = config
            .overrides
            .iter()
            .map(|(pattern, price)| (pattern.to_lowercase(), *price))
            .collect();
        overrides.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self { overrides }
    }

    /// Price for a model by name or alias.
    pub fn price_for(&self, model: &str) -> ModelPrice {
        let model_lower = model.to_lowercase();
        self.overrides
            .iter()
            .find(|(pattern, _)| model_lower.contains(pattern.as_str()))
            .map(|(_, price)| *price)
            .or_else(|| {
                PRICING_TABLE
                    .iter()
                    .find(|(name, _)| model_lower.contains(name))
                    .map(|(_, price)| *price)
            })
            .unwrap_or(FALLBACK_PRICE)
    }

    /// Actual cost of a completed call.
    pub fn cost_nanos(&self, model: &str, input_tokens: u64, output_tokens: u64) -> i64 {
        let price = self.price_for(model);
        let nanos = (input_tokens as f64 * price.input_per_million
            + output_tokens as f64 * price.output_per_million)
            * NANOS_PER_MILLION_RATE;
        nanos.round() as i64
    }

    /// Worst-case cost of a call that has not been made yet: the prompt's
    /// estimated token count plus the full output allowance.
    pub fn estimate_call_nanos(&self, model: &str, prompt_chars: usize, max_tokens: u32) -> i64 {
        let input_tokens = prompt_chars.div_ceil(CHARS_PER_TOKEN) as u64;
        self.cost_nanos(model, input_tokens, u64::from(max_tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::usd_to_nanos;
    use std::collections::HashMap;

    #[test]
    fn test_builtin_substring_match() {
        let table = PricingTable::default();
        assert_eq!(table.price_for("claude-opus-4-1").output_per_million, 75.0);
        assert_eq!(table.price_for("Claude-Haiku-4-5").input_per_million, 0.80);
    }

    #[test]
    fn test_unknown_model_uses_fallback() {
        let table = PricingTable::default();
        assert_eq!(table.price_for("mystery-model"), FALLBACK_PRICE);
        assert!(table.cost_nanos("mystery-model", 1, 0) > 0);
    }

    #[test]
    fn test_cost_in_nanos() {
        let table = PricingTable::default();
        // 1M sonnet input tokens = $3
        assert_eq!(table.cost_nanos("sonnet", 1_000_000, 0), usd_to_nanos(3.0));
        // 1k haiku output tokens = $0.004
        assert_eq!(table.cost_nanos("haiku", 0, 1_000), 4_000_000);
    }

    #[test]
    fn test_override_wins_over_builtin() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "sonnet-cheap".to_string(),
            ModelPrice { input_per_million: 0.0, output_per_million: 1.0 },
        );
        let table = PricingTable::new(&PricingConfig { overrides });
        assert_eq!(table.price_for("claude-sonnet-cheap").output_per_million, 1.0);
        assert_eq!(table.price_for("claude-sonnet-4-5").output_per_million, 15.0);
    }

    #[test]
    fn test_estimate_includes_full_output_allowance() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "mock".to_string(),
            ModelPrice { input_per_million: 0.0, output_per_million: 20.0 },
        );
        let table = PricingTable::new(&PricingConfig { overrides });
        assert_eq!(table.estimate_call_nanos("mock-model", 4_000, 1_000), usd_to_nanos(0.02));
    }
}
