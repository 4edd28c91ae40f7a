//! Model pricing and cost normalization.
//!
//! Every provider prices a call the same way: the total token count is split
//! 75% input / 25% output, each share is priced per thousand tokens, and the
//! sum is rounded to 6 decimal places. Models missing from a provider's table
//! are priced as the table's fallback model.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Share of the total token count treated as input tokens.
pub const INPUT_SHARE: f64 = 0.75;
/// Share of the total token count treated as output tokens.
pub const OUTPUT_SHARE: f64 = 0.25;

/// Round a USD amount to 6 decimal places.
pub fn round_usd(amount: f64) -> f64 {
    (amount * 1_000_000.0).round() / 1_000_000.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub model: String,
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
    pub currency: String,
}

impl ModelPricing {
    pub fn new(model: &str, input: f64, output: f64) -> Self {
        Self {
            model: model.into(),
            input_cost_per_1k: input,
            output_cost_per_1k: output,
            currency: "USD".into(),
        }
    }

    /// Price `total_tokens` with the fixed input/output split.
    pub fn calculate_cost(&self, total_tokens: u64) -> CostEstimate {
        let t = total_tokens as f64;
        let ic = INPUT_SHARE * t / 1000.0 * self.input_cost_per_1k;
        let oc = OUTPUT_SHARE * t / 1000.0 * self.output_cost_per_1k;
        CostEstimate {
            model: self.model.clone(),
            total_tokens,
            input_cost: ic,
            output_cost: oc,
            total_cost: round_usd(ic + oc),
            currency: self.currency.clone(),
            fallback_used: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    /// Model whose prices were applied (the fallback model when `fallback_used`).
    pub model: String,
    pub total_tokens: u64,
    pub input_cost: f64,
    pub output_cost: f64,
    /// Rounded total; this is the figure recorded in the ledger.
    pub total_cost: f64,
    pub currency: String,
    pub fallback_used: bool,
}

impl CostEstimate {
    pub fn format(&self) -> String {
        format!("{} {:.6}", self.currency, self.total_cost)
    }
}

/// Per-provider price table with a designated fallback model.
#[derive(Debug, Clone)]
pub struct PriceTable {
    entries: HashMap<String, ModelPricing>,
    fallback: ModelPricing,
}

impl PriceTable {
    /// Create a table whose fallback model is `fallback`.
    pub fn new(fallback: ModelPricing) -> Self {
        let mut entries = HashMap::new();
        entries.insert(fallback.model.clone(), fallback.clone());
        Self { entries, fallback }
    }

    pub fn insert(&mut self, pricing: ModelPricing) {
        if pricing.model == self.fallback.model {
            self.fallback = pricing.clone();
        }
        self.entries.insert(pricing.model.clone(), pricing);
    }

    pub fn with(mut self, pricing: ModelPricing) -> Self {
        self.insert(pricing);
        self
    }

    pub fn get(&self, model: &str) -> Option<&ModelPricing> {
        self.entries.get(model)
    }

    pub fn fallback(&self) -> &ModelPricing {
        &self.fallback
    }

    pub fn contains(&self, model: &str) -> bool {
        self.entries.contains_key(model)
    }

    /// Cost breakdown for `total_tokens` on `model`, falling back to the
    /// fallback model's prices when `model` is not in the table.
    pub fn estimate(&self, total_tokens: u64, model: &str) -> CostEstimate {
        match self.entries.get(model) {
            Some(pricing) => pricing.calculate_cost(total_tokens),
            None => {
                tracing::warn!(
                    model = %model,
                    fallback = %self.fallback.model,
                    "no pricing for model, using fallback pricing"
                );
                let mut estimate = self.fallback.calculate_cost(total_tokens);
                estimate.fallback_used = true;
                estimate
            }
        }
    }

    pub fn calculate_cost(&self, total_tokens: u64, model: &str) -> f64 {
        self.estimate(total_tokens, model).total_cost
    }
}
