//! Feature engineering and target construction
//!
//! - `normalize`: split/dividend adjustment of raw bars
//! - `indicators`: causal rolling indicators (SMA, EMA, RSI, MACD, Bollinger, ATR)
//! - `builder`: the feature matrix (auxiliary joins, macro as-of merge, indicators)
//! - `target`: forward-return classification labels
//!
//! Everything here is a pure function of its inputs.

mod builder;
pub mod indicators;
mod normalize;
mod target;

pub use builder::{build_features, merge_macro, PRICE_COLUMN};
pub use normalize::normalize_prices;
pub use target::build_target;
