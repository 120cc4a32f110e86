//! Model training
//!
//! - `gbdt`: boosted-tree binary classifier, serializable as an opaque blob
//! - `scaler`: standardization fitted on training rows
//! - `search`: time-series folds and hyperparameter search
//! - `metrics`: accuracy, precision, recall, F1, ROC-AUC
//! - `trainer`: dataset splits and the train/evaluate cycle

mod gbdt;
pub mod metrics;
mod scaler;
mod search;
mod trainer;
#[cfg(test)]
mod tests;

pub use gbdt::{BoostingParams, GradientBoostedClassifier};
pub use metrics::{ClassificationMetrics, ConfusionMatrix};
pub use scaler::StandardScaler;
pub use search::{cross_val_score, search, SearchMethod, SearchOutcome, SearchPlan, TimeSeriesSplit};
pub use trainer::{train_and_evaluate, Dataset, TrainingOutcome};
