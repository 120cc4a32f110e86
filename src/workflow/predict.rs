//! Scoring with stored models
//!
//! - `predict_ticker`: probability for the newest feature row
//! - `predict_all`: every target ticker in both directions, stored and exported
//! - `evaluate_model`: re-score a stored model on the held-out tail

use super::data::{feature_tickers_for, load_market_data, MarketData};
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::features::build_target;
use crate::frame::Frame;
use crate::ml::{self, ClassificationMetrics, ConfusionMatrix, GradientBoostedClassifier, StandardScaler};
use crate::storage::{Database, NewPrediction, TrainedModelRecord};
use crate::types::{add_business_days, model_name, Direction};
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub ticker: String,
    pub direction: Direction,
    pub probability: f64,
    pub model_name: String,
    pub model_version: i64,
    /// Date of the newest feature row
    pub base_date: NaiveDate,
    /// `base_date` plus the horizon in business days
    pub target_date: NaiveDate,
}

impl PredictionResult {
    fn to_new_prediction(&self) -> NewPrediction {
        NewPrediction {
            ticker: self.ticker.clone(),
            direction: self.direction,
            target_date: self.target_date,
            probability: self.probability,
            model_name: self.model_name.clone(),
            model_version: self.model_version,
        }
    }
}

/// A stored model decoded and ready to score rows
struct LoadedModel {
    record: TrainedModelRecord,
    model: GradientBoostedClassifier,
    scaler: StandardScaler,
}

impl LoadedModel {
    async fn load(
        db: &Database,
        ticker: &str,
        name: &str,
        version: Option<i64>,
    ) -> Result<Self> {
        let record = db.load_model(ticker, name, version).await?.ok_or_else(|| {
            PipelineError::Data(match version {
                Some(v) => format!("{}: no model {} version {}", ticker, name, v),
                None => format!("{}: no model {}", ticker, name),
            })
        })?;
        let model = GradientBoostedClassifier::from_bytes(&record.model_blob)?;
        let scaler: StandardScaler = serde_json::from_slice(&record.scaler_blob)?;
        info!(
            "Loaded {} {} version {}",
            ticker, record.model_name, record.version
        );
        Ok(Self {
            record,
            model,
            scaler,
        })
    }

    /// Rows of `frame` restricted to the stored feature list, in stored order
    fn feature_rows(&self, frame: &Frame) -> Result<Vec<Vec<f64>>> {
        let missing: Vec<&str> = self
            .record
            .feature_list
            .iter()
            .filter(|f| !frame.has_column(f))
            .map(|f| f.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::Data(format!(
                "{}: features missing from current data: {}",
                self.record.ticker,
                missing.join(", ")
            )));
        }
        frame.to_rows(&self.record.feature_list)
    }

    fn score(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        let scaled = self.scaler.transform(rows)?;
        self.model.predict_proba(&scaled)
    }
}

async fn features_for(db: &Database, config: &Config, ticker: &str) -> Result<Frame> {
    let feature_tickers = feature_tickers_for(db, ticker).await?;
    let data: MarketData = load_market_data(db, ticker, &feature_tickers).await?;
    if data.target.is_empty() {
        return Err(PipelineError::Data(format!("{}: no stored prices", ticker)));
    }
    let features = data.build_features(config)?;
    if features.is_empty() {
        return Err(PipelineError::Data(format!(
            "{}: no complete feature rows",
            ticker
        )));
    }
    Ok(features)
}

pub async fn predict_ticker(
    db: &Database,
    config: &Config,
    ticker: &str,
    direction: Direction,
    version: Option<i64>,
) -> Result<PredictionResult> {
    let name = model_name(config.target.horizon, direction, config.target.threshold);
    let loaded = LoadedModel::load(db, ticker, &name, version).await?;
    let features = features_for(db, config, ticker).await?;

    let last = features.len() - 1;
    let latest = features.slice(last..features.len());
    let base_date = latest.index()[0];
    let probability = loaded.score(&loaded.feature_rows(&latest)?)?[0];

    Ok(PredictionResult {
        ticker: ticker.to_string(),
        direction,
        probability,
        model_name: name,
        model_version: loaded.record.version,
        base_date,
        target_date: add_business_days(base_date, config.target.horizon),
    })
}

#[derive(Debug, Clone, Default)]
pub struct PredictAllSummary {
    pub results: Vec<PredictionResult>,
    pub failures: Vec<(String, Direction, String)>,
    pub csv_path: Option<PathBuf>,
}

/// Predict every registered target ticker in both directions.
///
/// A failing unit is logged and skipped. Successful results are stored in one
/// transaction and written to `predictions_<timestamp>.csv` under `output_dir`.
pub async fn predict_all(
    db: &Database,
    config: &Config,
    output_dir: &Path,
) -> Result<PredictAllSummary> {
    let targets = db.list_target_tickers().await?;
    let mut summary = PredictAllSummary::default();
    if targets.is_empty() {
        warn!("No target tickers registered");
        return Ok(summary);
    }
    info!("🔮 Predicting {} tickers", targets.len());

    for target in &targets {
        for direction in Direction::ALL {
            match predict_ticker(db, config, &target.ticker_symbol, direction, None).await {
                Ok(result) => {
                    info!(
                        "{} {}: {:.2}% by {}",
                        result.ticker,
                        direction,
                        result.probability * 100.0,
                        result.target_date
                    );
                    summary.results.push(result);
                }
                Err(e) => {
                    error!("❌ {} {}: {}", target.ticker_symbol, direction, e);
                    summary
                        .failures
                        .push((target.ticker_symbol.clone(), direction, e.to_string()));
                }
            }
        }
    }

    if summary.results.is_empty() {
        return Ok(summary);
    }
    let rows: Vec<NewPrediction> = summary
        .results
        .iter()
        .map(PredictionResult::to_new_prediction)
        .collect();
    db.save_predictions(&rows).await?;
    summary.csv_path = Some(write_csv(&summary.results, output_dir)?);
    Ok(summary)
}

fn write_csv(results: &[PredictionResult], output_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(format!(
        "predictions_{}.csv",
        Local::now().format("%Y-%m-%d_%H%M%S")
    ));
    let mut writer = csv::Writer::from_path(&path)?;
    for result in results {
        writer.serialize(result)?;
    }
    writer.flush()?;
    info!("💾 Wrote {} predictions to {}", results.len(), path.display());
    Ok(path)
}

#[derive(Debug, Clone)]
pub struct ModelEvaluation {
    pub model_name: String,
    pub version: i64,
    pub stored_metrics: ClassificationMetrics,
    pub metrics: ClassificationMetrics,
    pub confusion: ConfusionMatrix,
    pub test_rows: usize,
    /// Feature importances, highest first
    pub importances: Vec<(String, f64)>,
}

/// Re-score a stored model on the most recent `test_size` share of labelled rows
pub async fn evaluate_model(
    db: &Database,
    config: &Config,
    ticker: &str,
    direction: Direction,
    version: Option<i64>,
) -> Result<ModelEvaluation> {
    let name = model_name(config.target.horizon, direction, config.target.threshold);
    let loaded = LoadedModel::load(db, ticker, &name, version).await?;
    let features = features_for(db, config, ticker).await?;

    let (labelled, label) = build_target(
        &features,
        config.target.horizon,
        config.target.threshold,
        direction.as_str(),
    )?;
    let labelled = labelled.drop_rows_missing(&label)?;
    let train_len = (labelled.len() as f64 * (1.0 - config.training.test_size)) as usize;
    let test = labelled.slice(train_len..labelled.len());
    if test.is_empty() {
        return Err(PipelineError::Data(format!(
            "{}: no rows left for evaluation",
            ticker
        )));
    }

    let y: Vec<f64> = test.require(&label)?.iter().flatten().copied().collect();
    let proba = loaded.score(&loaded.feature_rows(&test)?)?;
    let (metrics, confusion) = ml::metrics::evaluate(&y, &proba);

    let importances = loaded.model.ranked_importances(&loaded.record.feature_list);

    Ok(ModelEvaluation {
        model_name: name,
        version: loaded.record.version,
        stored_metrics: loaded.record.performance_metrics.clone(),
        metrics,
        confusion,
        test_rows: test.len(),
        importances,
    })
}
