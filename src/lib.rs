//! Stock Trend Predictor
//!
//! Predicts whether a listed stock will move by at least a threshold after a
//! horizon of business days, using gradient-boosted trees over technical,
//! cross-market and macroeconomic features.
//!
//! ## Architecture
//!
//! ```text
//! Market data (prices, macro) → Storage (SQLite) → Features → Target → Trainer
//!                                      ↑                                  ↓
//!                                Notifier ← Predictions ← Stored models ←─┘
//! ```

pub mod config;
pub mod error;
pub mod features;
pub mod frame;
pub mod market_data;
pub mod ml;
pub mod notify;
pub mod storage;
pub mod types;
pub mod workflow;
