//! Train, evaluate and optionally persist one ticker/direction model

use super::data::{feature_tickers_for, labelled_dataset, load_market_data};
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::ml::{train_and_evaluate, SearchMethod, SearchPlan, TrainingOutcome};
use crate::storage::{Database, NewTrainedModel};
use crate::types::{model_name, Direction};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub search_method: SearchMethod,
    /// Use the reduced search budgets
    pub test_mode: bool,
    pub save: bool,
}

impl TrainOptions {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            search_method: config.training.search_method.parse()?,
            test_mode: false,
            save: true,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TrainReport {
    pub ticker: String,
    pub direction: Direction,
    pub model_name: String,
    /// Assigned version when the model was saved
    pub version: Option<i64>,
    pub feature_names: Vec<String>,
    pub rows: usize,
    pub period: Option<(NaiveDate, NaiveDate)>,
    pub outcome: TrainingOutcome,
}

pub fn search_plan(config: &Config, method: SearchMethod, test_mode: bool) -> SearchPlan {
    SearchPlan::from_config(
        method,
        &config.training.search,
        config.training.cv_splits,
        config.training.seed,
        test_mode,
    )
}

pub async fn train_ticker(
    db: &Database,
    config: &Config,
    ticker: &str,
    direction: Direction,
    options: &TrainOptions,
) -> Result<TrainReport> {
    let feature_tickers = feature_tickers_for(db, ticker).await?;
    let data = load_market_data(db, ticker, &feature_tickers).await?;
    if data.target.is_empty() {
        return Err(PipelineError::Data(format!("{}: no stored prices", ticker)));
    }

    let name = model_name(config.target.horizon, direction, config.target.threshold);
    info!("🏋️ Training {} for {}", name, ticker);

    let plan = search_plan(config, options.search_method, options.test_mode);
    let cfg = Arc::new(config.clone());
    let (dataset, outcome) = tokio::task::spawn_blocking(move || -> Result<_> {
        let features = data.build_features(&cfg)?;
        if features.is_empty() {
            return Err(PipelineError::Data(
                "no complete feature rows; history too short".into(),
            ));
        }
        let (dataset, _label) = labelled_dataset(&features, &cfg, direction)?;
        let outcome = train_and_evaluate(&dataset, &plan)?;
        Ok((dataset, outcome))
    })
    .await??;

    let m = &outcome.metrics;
    info!(
        "📊 {} {}: accuracy {:.4} precision {:.4} recall {:.4} F1 {:.4} AUC {}",
        ticker,
        name,
        m.accuracy,
        m.precision,
        m.recall,
        m.f1_score,
        m.roc_auc.map(|v| format!("{:.4}", v)).unwrap_or_else(|| "n/a".into())
    );
    info!("Confusion matrix:\n{}", outcome.confusion);
    for (feature, importance) in outcome
        .model
        .ranked_importances(&dataset.feature_names)
        .iter()
        .take(5)
    {
        info!("  {:<28} {:.4}", feature, importance);
    }

    let period = match (dataset.train_dates.first(), dataset.test_dates.last()) {
        (Some(start), Some(end)) => Some((*start, *end)),
        _ => None,
    };

    let version = if options.save {
        let record = NewTrainedModel {
            ticker: ticker.to_string(),
            model_name: name.clone(),
            feature_list: dataset.feature_names.clone(),
            hyperparameters: outcome.hyperparameters()?,
            performance_metrics: outcome.metrics.clone(),
            model_blob: outcome.model.to_bytes()?,
            scaler_blob: serde_json::to_vec(&outcome.scaler)?,
            notes: period.map(|(s, e)| {
                format!(
                    "trained on {}..{}, search {}",
                    s, e, options.search_method
                )
            }),
        };
        Some(db.save_model(&record).await?)
    } else {
        None
    };

    Ok(TrainReport {
        ticker: ticker.to_string(),
        direction,
        model_name: name,
        version,
        feature_names: dataset.feature_names.clone(),
        rows: dataset.len(),
        period,
        outcome,
    })
}
