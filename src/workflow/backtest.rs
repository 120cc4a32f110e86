//! Fixed-date backtest: train up to one date, score from a later one

use super::data::{feature_tickers_for, load_market_data};
use super::train::search_plan;
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::features::build_target;
use crate::ml::{train_and_evaluate, Dataset, SearchMethod, TrainingOutcome};
use crate::storage::Database;
use crate::types::Direction;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct BacktestRequest {
    pub ticker: String,
    /// Overrides the registered feature tickers when set
    pub feature_tickers: Option<Vec<String>>,
    pub train_end: NaiveDate,
    pub test_start: NaiveDate,
    pub tune: bool,
    pub direction: Direction,
    pub threshold: f64,
    pub horizon: usize,
}

#[derive(Debug, Clone)]
pub struct BacktestReport {
    pub train_rows: usize,
    pub test_rows: usize,
    pub test_period: (NaiveDate, NaiveDate),
    pub outcome: TrainingOutcome,
}

pub async fn backtest(
    db: &Database,
    config: &Config,
    request: &BacktestRequest,
) -> Result<BacktestReport> {
    let feature_tickers = match &request.feature_tickers {
        Some(t) => t.clone(),
        None => feature_tickers_for(db, &request.ticker).await?,
    };
    let data = load_market_data(db, &request.ticker, &feature_tickers).await?;
    if data.target.is_empty() {
        return Err(PipelineError::Data(format!(
            "{}: no stored prices",
            request.ticker
        )));
    }
    info!(
        "🧪 Backtest {} {} (H={}, θ={:.2}%): train <= {}, test >= {}",
        request.ticker,
        request.direction,
        request.horizon,
        request.threshold * 100.0,
        request.train_end,
        request.test_start
    );

    let method = if request.tune {
        SearchMethod::Random
    } else {
        SearchMethod::None
    };
    let plan = search_plan(config, method, false);
    let cfg = Arc::new(config.clone());
    let req = request.clone();

    tokio::task::spawn_blocking(move || -> Result<BacktestReport> {
        let features = data.build_features(&cfg)?;
        let (labelled, label) = build_target(
            &features,
            req.horizon,
            req.threshold,
            req.direction.as_str(),
        )?;
        let names = features.column_names().to_vec();
        let dataset = Dataset::by_dates(&labelled, &names, &label, req.train_end, req.test_start)?;
        let test_period = match (dataset.test_dates.first(), dataset.test_dates.last()) {
            (Some(s), Some(e)) => (*s, *e),
            _ => {
                return Err(PipelineError::Data(
                    "no labelled rows on or after the test start".into(),
                ))
            }
        };
        let outcome = train_and_evaluate(&dataset, &plan)?;
        Ok(BacktestReport {
            train_rows: dataset.x_train.len(),
            test_rows: dataset.x_test.len(),
            test_period,
            outcome,
        })
    })
    .await?
}
