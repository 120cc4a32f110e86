//! Time-ordered cross validation and hyperparameter search
//!
//! Candidates are scored by mean validation ROC-AUC across expanding-window
//! folds. Trials run in parallel; the best is chosen once all have finished.

use super::gbdt::{BoostingParams, GradientBoostedClassifier};
use super::metrics::roc_auc;
use crate::config::{GridConfig, SearchConfig};
use crate::error::{PipelineError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use tracing::{info, warn};

/// Expanding-window splits; folds are never shuffled
#[derive(Debug, Clone, Copy)]
pub struct TimeSeriesSplit {
    pub n_splits: usize,
}

impl TimeSeriesSplit {
    pub fn new(n_splits: usize) -> Self {
        Self { n_splits }
    }

    /// `(train, validation)` index ranges for `n` rows.
    ///
    /// Each validation block has `n / (n_splits + 1)` rows and directly
    /// follows its training range.
    pub fn split(&self, n: usize) -> Result<Vec<(Range<usize>, Range<usize>)>> {
        if self.n_splits < 2 {
            return Err(PipelineError::Config("n_splits must be >= 2".into()));
        }
        let fold = n / (self.n_splits + 1);
        if fold == 0 {
            return Err(PipelineError::Data(format!(
                "{} rows is too few for {} time-series folds",
                n, self.n_splits
            )));
        }
        let first = n - self.n_splits * fold;
        Ok((0..self.n_splits)
            .map(|k| {
                let start = first + k * fold;
                (0..start, start..start + fold)
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMethod {
    /// Library defaults, no search
    None,
    /// Exhaustive over the configured grids
    Grid,
    /// Uniform sampling over moderate ranges
    Random,
    /// Log-scaled sampling over wide ranges including depth and regularisation
    Broad,
}

impl SearchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMethod::None => "none",
            SearchMethod::Grid => "grid",
            SearchMethod::Random => "random",
            SearchMethod::Broad => "broad",
        }
    }
}

impl fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMethod {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(SearchMethod::None),
            "grid" => Ok(SearchMethod::Grid),
            "random" => Ok(SearchMethod::Random),
            "broad" => Ok(SearchMethod::Broad),
            other => Err(PipelineError::Config(format!(
                "unknown search method '{}' (none, grid, random, broad)",
                other
            ))),
        }
    }
}

/// What to search and how many folds to score with
#[derive(Debug, Clone)]
pub struct SearchPlan {
    pub method: SearchMethod,
    pub grid: GridConfig,
    pub iterations: usize,
    pub cv_splits: usize,
    pub seed: u64,
}

impl SearchPlan {
    /// Resolve budgets from settings, using the reduced ones in test mode
    pub fn from_config(
        method: SearchMethod,
        search: &SearchConfig,
        cv_splits: usize,
        seed: u64,
        test_mode: bool,
    ) -> Self {
        let (grid, iterations) = match (method, test_mode) {
            (SearchMethod::Broad, false) => (search.grid.clone(), search.broad_trials),
            (SearchMethod::Broad, true) => (search.grid_test.clone(), search.broad_trials_test),
            (_, false) => (search.grid.clone(), search.random_iter),
            (_, true) => (search.grid_test.clone(), search.random_iter_test),
        };
        Self {
            method,
            grid,
            iterations,
            cv_splits,
            seed,
        }
    }

    pub fn candidates(&self) -> Vec<BoostingParams> {
        match self.method {
            SearchMethod::None => vec![BoostingParams::default()],
            SearchMethod::Grid => grid_candidates(&self.grid),
            SearchMethod::Random => {
                let mut rng = StdRng::seed_from_u64(self.seed);
                (0..self.iterations.max(1))
                    .map(|_| BoostingParams {
                        n_estimators: rng.random_range(100..1000),
                        learning_rate: rng.random_range(0.01..0.21),
                        num_leaves: rng.random_range(20..100),
                        reg_alpha: rng.random_range(0.0..1.0),
                        reg_lambda: rng.random_range(0.0..1.0),
                        ..Default::default()
                    })
                    .collect()
            }
            SearchMethod::Broad => {
                let mut rng = StdRng::seed_from_u64(self.seed);
                (0..self.iterations.max(1))
                    .map(|_| BoostingParams {
                        n_estimators: rng.random_range(100..=2000),
                        learning_rate: log_uniform(&mut rng, 0.01, 0.3),
                        num_leaves: rng.random_range(20..=300),
                        max_depth: Some(rng.random_range(3..=12)),
                        reg_alpha: log_uniform(&mut rng, 1e-8, 10.0),
                        reg_lambda: log_uniform(&mut rng, 1e-8, 10.0),
                        ..Default::default()
                    })
                    .collect()
            }
        }
    }
}

fn log_uniform(rng: &mut StdRng, low: f64, high: f64) -> f64 {
    rng.random_range(low.ln()..high.ln()).exp()
}

fn grid_candidates(grid: &GridConfig) -> Vec<BoostingParams> {
    let mut out = Vec::new();
    for &n_estimators in &grid.n_estimators {
        for &learning_rate in &grid.learning_rate {
            for &num_leaves in &grid.num_leaves {
                out.push(BoostingParams {
                    n_estimators,
                    learning_rate,
                    num_leaves,
                    ..Default::default()
                });
            }
        }
    }
    if out.is_empty() {
        out.push(BoostingParams::default());
    }
    out
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub best: BoostingParams,
    /// Mean validation ROC-AUC of the winner, if any fold was scorable
    pub best_score: Option<f64>,
    pub trials: usize,
}

/// Mean validation ROC-AUC for one candidate; single-class folds are skipped
pub fn cross_val_score(
    x: &[Vec<f64>],
    y: &[f64],
    params: &BoostingParams,
    folds: &[(Range<usize>, Range<usize>)],
    scale_pos_weight: f64,
    seed: u64,
) -> Result<Option<f64>> {
    let mut scores = Vec::with_capacity(folds.len());
    for (train, valid) in folds {
        let y_train = &y[train.clone()];
        if y_train.iter().all(|v| *v == y_train[0]) {
            continue;
        }
        let model =
            GradientBoostedClassifier::fit(&x[train.clone()], y_train, params, scale_pos_weight, seed)?;
        let proba = model.predict_proba(&x[valid.clone()])?;
        if let Some(auc) = roc_auc(&y[valid.clone()], &proba) {
            scores.push(auc);
        }
    }
    if scores.is_empty() {
        return Ok(None);
    }
    Ok(Some(scores.iter().sum::<f64>() / scores.len() as f64))
}

/// Score every candidate of `plan` and return the best one
pub fn search(
    x: &[Vec<f64>],
    y: &[f64],
    plan: &SearchPlan,
    scale_pos_weight: f64,
) -> Result<SearchOutcome> {
    let candidates = plan.candidates();
    if plan.method == SearchMethod::None {
        return Ok(SearchOutcome {
            best: candidates.into_iter().next().unwrap_or_default(),
            best_score: None,
            trials: 0,
        });
    }

    let folds = TimeSeriesSplit::new(plan.cv_splits).split(x.len())?;
    info!(
        "🔍 {} search: {} candidates x {} folds",
        plan.method,
        candidates.len(),
        folds.len()
    );

    let scores: Vec<Result<Option<f64>>> = candidates
        .par_iter()
        .map(|params| cross_val_score(x, y, params, &folds, scale_pos_weight, plan.seed))
        .collect();

    let mut best: Option<(usize, f64)> = None;
    for (i, score) in scores.into_iter().enumerate() {
        match score {
            Ok(Some(s)) => {
                if best.map_or(true, |(_, b)| s > b) {
                    best = Some((i, s));
                }
            }
            Ok(None) => {}
            Err(e) => warn!("trial {} failed: {}", i, e),
        }
    }

    let trials = candidates.len();
    match best {
        Some((i, score)) => Ok(SearchOutcome {
            best: candidates[i].clone(),
            best_score: Some(score),
            trials,
        }),
        None => {
            warn!("no trial produced a validation score, using defaults");
            Ok(SearchOutcome {
                best: BoostingParams::default(),
                best_score: None,
                trials,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_series_split_is_chronological() {
        let folds = TimeSeriesSplit::new(3).split(100).unwrap();
        assert_eq!(folds.len(), 3);
        assert_eq!(folds[0], (0..25, 25..50));
        assert_eq!(folds[1], (0..50, 50..75));
        assert_eq!(folds[2], (0..75, 75..100));
        for (train, valid) in &folds {
            assert_eq!(train.end, valid.start);
        }
    }

    #[test]
    fn test_time_series_split_uneven() {
        let folds = TimeSeriesSplit::new(3).split(10).unwrap();
        assert_eq!(folds[0], (0..4, 4..6));
        assert_eq!(folds[2], (0..8, 8..10));
        assert!(TimeSeriesSplit::new(3).split(3).is_err());
    }

    #[test]
    fn test_search_method_parse() {
        assert_eq!("grid".parse::<SearchMethod>().unwrap(), SearchMethod::Grid);
        assert!(matches!(
            "optuna".parse::<SearchMethod>().unwrap_err(),
            PipelineError::Config(_)
        ));
    }

    #[test]
    fn test_grid_candidates_product() {
        let plan = SearchPlan::from_config(
            SearchMethod::Grid,
            &SearchConfig::default(),
            3,
            42,
            false,
        );
        assert_eq!(plan.candidates().len(), 3 * 3 * 4);
    }

    #[test]
    fn test_random_candidates_are_seeded() {
        let plan = SearchPlan::from_config(
            SearchMethod::Random,
            &SearchConfig::default(),
            3,
            42,
            true,
        );
        let a = plan.candidates();
        let b = plan.candidates();
        assert_eq!(a, b);
        assert_eq!(a.len(), SearchConfig::default().random_iter_test);
        for p in &a {
            assert!((100..1000).contains(&p.n_estimators));
            assert!(p.validate().is_ok());
        }
    }

    #[test]
    fn test_broad_candidates_in_range() {
        let plan = SearchPlan::from_config(
            SearchMethod::Broad,
            &SearchConfig::default(),
            3,
            1,
            true,
        );
        for p in plan.candidates() {
            assert!(p.learning_rate >= 0.01 && p.learning_rate <= 0.3);
            assert!(matches!(p.max_depth, Some(d) if (3..=12).contains(&d)));
        }
    }
}
