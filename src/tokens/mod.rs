//! Token 计数与成本归一化模块：统一各厂商的 Token 估算与价格计算。
//!
//! # Token Counting and Cost Normalization Module
//!
//! Cost figures recorded in the ledger must be comparable across vendors, so
//! every provider prices through the same [`PriceTable`] policy.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`TokenCounter`] | Trait for token estimation when a vendor omits usage |
//! | [`WhitespaceCounter`] | Word-count heuristic (prompt words + output words) |
//! | [`ModelPricing`] | Per-thousand-token input/output prices for one model |
//! | [`PriceTable`] | A provider's prices with a designated fallback model |
//! | [`CostEstimate`] | Cost breakdown for one call |
//!
//! ## Example
//!
//! ```rust
//! use prompt_engine::tokens::{ModelPricing, PriceTable};
//!
//! let table = PriceTable::new(ModelPricing::new("gpt-4", 0.03, 0.06));
//! assert_eq!(table.calculate_cost(1000, "gpt-4"), 0.0375);
//! // unknown models are priced as the fallback model
//! assert_eq!(table.calculate_cost(1000, "gpt-unknown"), 0.0375);
//! ```

mod counter;
mod pricing;

pub use counter::{TokenCounter, WhitespaceCounter};
pub use pricing::{round_usd, CostEstimate, ModelPricing, PriceTable, INPUT_SHARE, OUTPUT_SHARE};
