//! End-to-end workflows over storage, features and training
//!
//! - `data`: load stored series, label and split feature matrices
//! - `train`: train one ticker/direction and save a new model version
//! - `predict`: score stored models, batch predictions, model re-evaluation
//! - `evaluate`: bulk evaluation of the market list on a worker pool
//! - `backtest`: train/test split at explicit dates
//! - `market_list`: evaluation universe from the exchange listing

mod backtest;
mod data;
mod evaluate;
mod market_list;
mod predict;
mod train;
#[cfg(test)]
mod tests;

pub use backtest::{backtest, BacktestReport, BacktestRequest};
pub use data::{feature_tickers_for, labelled_dataset, load_market_data, MarketData};
pub use evaluate::{bulk_evaluate, BulkOptions, BulkSummary, DataSources};
pub use market_list::{load_market_list, parse_market_list, DOMESTIC_SEGMENTS};
pub use predict::{
    evaluate_model, predict_all, predict_ticker, ModelEvaluation, PredictAllSummary,
    PredictionResult,
};
pub use train::{search_plan, train_ticker, TrainOptions, TrainReport};
