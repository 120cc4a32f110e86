//! Dataset preparation and the train/evaluate cycle

use super::gbdt::{BoostingParams, GradientBoostedClassifier};
use super::metrics::{self, ClassificationMetrics, ConfusionMatrix};
use super::scaler::StandardScaler;
use super::search::{search, SearchPlan};
use crate::error::{PipelineError, Result};
use crate::frame::Frame;
use chrono::{Months, NaiveDate};
use tracing::info;

/// Dense train/test matrices with their feature names and date spans
#[derive(Debug, Clone)]
pub struct Dataset {
    pub feature_names: Vec<String>,
    pub x_train: Vec<Vec<f64>>,
    pub y_train: Vec<f64>,
    pub x_test: Vec<Vec<f64>>,
    pub y_test: Vec<f64>,
    pub train_dates: Vec<NaiveDate>,
    pub test_dates: Vec<NaiveDate>,
}

impl Dataset {
    /// Chronological split of the last `training_years` of labelled rows.
    ///
    /// `labelled` must hold every feature column plus `label_column`; rows
    /// without a label are dropped first. The earliest `1 - test_size` share
    /// trains, the rest tests.
    pub fn chronological(
        labelled: &Frame,
        feature_names: &[String],
        label_column: &str,
        training_years: u32,
        test_size: f64,
    ) -> Result<Self> {
        if !(test_size > 0.0 && test_size < 1.0) {
            return Err(PipelineError::Config(format!(
                "test_size must be in (0, 1), got {}",
                test_size
            )));
        }
        let rows = labelled.drop_rows_missing(label_column)?;
        let Some(latest) = rows.index().last().copied() else {
            return Err(PipelineError::Data("no labelled rows".into()));
        };
        let start = latest
            .checked_sub_months(Months::new(12 * training_years))
            .unwrap_or(NaiveDate::MIN);
        let window = rows.filter_dates(|d| d >= start);

        let train_len = (window.len() as f64 * (1.0 - test_size)) as usize;
        Self::from_parts(
            &window.slice(0..train_len),
            &window.slice(train_len..window.len()),
            feature_names,
            label_column,
        )
    }

    /// Split at explicit dates: train on rows `<= train_end`, test on rows
    /// `>= test_start`.
    pub fn by_dates(
        labelled: &Frame,
        feature_names: &[String],
        label_column: &str,
        train_end: NaiveDate,
        test_start: NaiveDate,
    ) -> Result<Self> {
        if test_start <= train_end {
            return Err(PipelineError::Config(format!(
                "test start {} must be after train end {}",
                test_start, train_end
            )));
        }
        let rows = labelled.drop_rows_missing(label_column)?;
        Self::from_parts(
            &rows.filter_dates(|d| d <= train_end),
            &rows.filter_dates(|d| d >= test_start),
            feature_names,
            label_column,
        )
    }

    fn from_parts(
        train: &Frame,
        test: &Frame,
        feature_names: &[String],
        label_column: &str,
    ) -> Result<Self> {
        let labels = |f: &Frame| -> Result<Vec<f64>> {
            Ok(f.require(label_column)?.iter().flatten().copied().collect())
        };
        Ok(Self {
            feature_names: feature_names.to_vec(),
            x_train: train.to_rows(feature_names)?,
            y_train: labels(train)?,
            x_test: test.to_rows(feature_names)?,
            y_test: labels(test)?,
            train_dates: train.index().to_vec(),
            test_dates: test.index().to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.x_train.len() + self.x_test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn positives(&self) -> usize {
        self.y_train.iter().filter(|v| **v == 1.0).count()
    }

    /// True when the training labels contain both classes
    pub fn has_both_classes(&self) -> bool {
        let pos = self.positives();
        pos > 0 && pos < self.y_train.len()
    }

    pub fn train_period(&self) -> Option<(NaiveDate, NaiveDate)> {
        Some((*self.train_dates.first()?, *self.train_dates.last()?))
    }
}

/// Everything produced by one training run
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub model: GradientBoostedClassifier,
    pub scaler: StandardScaler,
    pub params: BoostingParams,
    pub scale_pos_weight: f64,
    pub cv_score: Option<f64>,
    pub metrics: ClassificationMetrics,
    pub confusion: ConfusionMatrix,
}

impl TrainingOutcome {
    /// Hyperparameters as stored alongside the model
    pub fn hyperparameters(&self) -> Result<serde_json::Value> {
        let mut value = serde_json::to_value(&self.params)?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "scale_pos_weight".to_string(),
                serde_json::json!(self.scale_pos_weight),
            );
        }
        Ok(value)
    }
}

/// Fit the scaler on training rows, search hyperparameters with time-ordered
/// folds, refit on the full training split and score the test split.
pub fn train_and_evaluate(dataset: &Dataset, plan: &SearchPlan) -> Result<TrainingOutcome> {
    if dataset.x_train.is_empty() {
        return Err(PipelineError::Data("empty training split".into()));
    }
    if dataset.x_test.is_empty() {
        return Err(PipelineError::Data("empty test split".into()));
    }
    if !dataset.has_both_classes() {
        return Err(PipelineError::Data(
            "training labels contain a single class".into(),
        ));
    }

    let scaler = StandardScaler::fit(&dataset.x_train)?;
    let x_train = scaler.transform(&dataset.x_train)?;
    let x_test = scaler.transform(&dataset.x_test)?;

    let pos = dataset.positives();
    let neg = dataset.y_train.len() - pos;
    let scale_pos_weight = neg as f64 / pos as f64;
    info!(
        "Training on {} rows ({} positive, scale_pos_weight {:.3}), testing on {}",
        x_train.len(),
        pos,
        scale_pos_weight,
        x_test.len()
    );

    let outcome = search(&x_train, &dataset.y_train, plan, scale_pos_weight)?;
    if let Some(score) = outcome.best_score {
        info!("Best CV ROC-AUC {:.4} with {:?}", score, outcome.best);
    }

    let model = GradientBoostedClassifier::fit(
        &x_train,
        &dataset.y_train,
        &outcome.best,
        scale_pos_weight,
        plan.seed,
    )?;
    let proba = model.predict_proba(&x_test)?;
    let (metrics, confusion) = metrics::evaluate(&dataset.y_test, &proba);

    Ok(TrainingOutcome {
        model,
        scaler,
        params: outcome.best,
        scale_pos_weight,
        cv_score: outcome.best_score,
        metrics,
        confusion,
    })
}
