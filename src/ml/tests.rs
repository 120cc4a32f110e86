//! Integration tests for the training module

use super::*;
use crate::config::{FeatureConfig, SearchConfig};
use crate::error::PipelineError;
use crate::features::{build_features, build_target};
use crate::frame::Frame;
use crate::types::{add_business_days, Bar, MacroPanel, PriceSeries};
use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn separable(n: usize, seed: u64) -> (Vec<Vec<f64>>, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut x = Vec::with_capacity(n);
    let mut y = Vec::with_capacity(n);
    for _ in 0..n {
        let signal: f64 = rng.random();
        let noise: f64 = rng.random();
        x.push(vec![signal, noise]);
        y.push(if signal > 0.6 { 1.0 } else { 0.0 });
    }
    (x, y)
}

fn small_params() -> BoostingParams {
    BoostingParams {
        n_estimators: 30,
        num_leaves: 4,
        min_child_samples: 5,
        ..Default::default()
    }
}

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2018, 1, 1).unwrap()
}

fn labelled_frame(n: usize) -> Frame {
    let dates: Vec<NaiveDate> = (0..n).map(|i| add_business_days(start(), i)).collect();
    Frame::new(dates)
        .with_column("f", (0..n).map(|i| Some(i as f64)).collect())
        .unwrap()
        .with_column(
            "label",
            (0..n)
                .map(|i| if i + 5 >= n { None } else { Some((i % 2) as f64) })
                .collect(),
        )
        .unwrap()
}

#[test]
fn test_learns_separable_problem() {
    let (x, y) = separable(400, 1);
    let (x_test, y_test) = separable(200, 2);
    let model = GradientBoostedClassifier::fit(&x, &y, &small_params(), 1.0, 42).unwrap();
    let proba = model.predict_proba(&x_test).unwrap();
    let auc = metrics::roc_auc(&y_test, &proba).unwrap();
    assert!(auc > 0.9, "auc {}", auc);
    let importances = model.feature_importances();
    assert!(importances[0] > importances[1]);
}

#[test]
fn test_fit_is_deterministic_per_seed() {
    let (x, y) = separable(200, 3);
    let params = BoostingParams {
        subsample: 0.7,
        ..small_params()
    };
    let a = GradientBoostedClassifier::fit(&x, &y, &params, 1.0, 9).unwrap();
    let b = GradientBoostedClassifier::fit(&x, &y, &params, 1.0, 9).unwrap();
    assert_eq!(a.predict_proba(&x).unwrap(), b.predict_proba(&x).unwrap());
}

#[test]
fn test_blob_restores_same_probabilities() {
    let (x, y) = separable(200, 4);
    let model = GradientBoostedClassifier::fit(&x, &y, &small_params(), 2.0, 1).unwrap();
    let restored = GradientBoostedClassifier::from_bytes(&model.to_bytes().unwrap()).unwrap();
    assert_eq!(
        model.predict_proba(&x).unwrap(),
        restored.predict_proba(&x).unwrap()
    );
    assert_eq!(restored.params(), model.params());
    assert_eq!(restored.scale_pos_weight(), 2.0);
}

#[test]
fn test_predict_rejects_wrong_width() {
    let (x, y) = separable(50, 5);
    let model = GradientBoostedClassifier::fit(&x, &y, &small_params(), 1.0, 1).unwrap();
    assert!(model.predict_one(&[0.5]).is_err());
}

#[test]
fn test_chronological_split() {
    let frame = labelled_frame(105);
    let names = vec!["f".to_string()];
    let ds = Dataset::chronological(&frame, &names, "label", 5, 0.2).unwrap();
    assert_eq!(ds.x_train.len(), 80);
    assert_eq!(ds.x_test.len(), 20);
    assert!(ds.train_dates.last().unwrap() < ds.test_dates.first().unwrap());
    // unlabelled trailing rows never reach either split
    assert_eq!(ds.x_test.last().unwrap()[0], 99.0);
}

#[test]
fn test_training_window_limits_history() {
    // roughly four years of business days, one-year window
    let frame = labelled_frame(1040);
    let names = vec!["f".to_string()];
    let ds = Dataset::chronological(&frame, &names, "label", 1, 0.2).unwrap();
    let (first, _) = ds.train_period().unwrap();
    let last = *ds.test_dates.last().unwrap();
    assert!((last - first).num_days() <= 366);
    assert!(ds.len() < 300);
}

#[test]
fn test_split_by_dates() {
    let frame = labelled_frame(100);
    let names = vec!["f".to_string()];
    let train_end = add_business_days(start(), 59);
    let test_start = add_business_days(start(), 70);
    let ds = Dataset::by_dates(&frame, &names, "label", train_end, test_start).unwrap();
    assert_eq!(ds.x_train.len(), 60);
    assert_eq!(ds.x_test.len(), 25);
    assert!(Dataset::by_dates(&frame, &names, "label", test_start, train_end).is_err());
}

#[test]
fn test_single_class_training_rejected() {
    let frame = labelled_frame(50)
        .with_column("label", vec![Some(0.0); 50])
        .unwrap();
    let names = vec!["f".to_string()];
    let ds = Dataset::chronological(&frame, &names, "label", 5, 0.2).unwrap();
    assert!(!ds.has_both_classes());
    let plan = SearchPlan::from_config(SearchMethod::None, &SearchConfig::default(), 3, 42, true);
    assert!(matches!(
        train_and_evaluate(&ds, &plan).unwrap_err(),
        PipelineError::Data(_)
    ));
}

#[test]
fn test_cross_val_score_skips_single_class_folds() {
    let x: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64]).collect();
    let y = vec![0.0; 40];
    let folds = TimeSeriesSplit::new(3).split(40).unwrap();
    let score = cross_val_score(&x, &y, &small_params(), &folds, 1.0, 1).unwrap();
    assert_eq!(score, None);
}

#[test]
fn test_full_pipeline_trains_and_scores() {
    let n = 600;
    let bars: Vec<Bar> = (0..n)
        .map(|i| {
            let p = 100.0 + 10.0 * ((i as f64) * 0.15).sin() + 0.05 * i as f64;
            Bar {
                date: add_business_days(start(), i),
                open: p,
                high: p * 1.01,
                low: p * 0.99,
                close: p,
                adj_close: Some(p),
                volume: 10_000.0 + (i % 13) as f64 * 100.0,
            }
        })
        .collect();
    let series = PriceSeries::new("7203.T", bars).unwrap();
    let features =
        build_features(&series, &[], &MacroPanel::new(), &FeatureConfig::default()).unwrap();
    let (labelled, label) = build_target(&features, 10, 0.03, "up").unwrap();
    let names = features.column_names().to_vec();

    let ds = Dataset::chronological(&labelled, &names, &label, 5, 0.2).unwrap();
    assert!(ds.has_both_classes());

    let plan = SearchPlan::from_config(SearchMethod::Grid, &SearchConfig::default(), 3, 42, true);
    let outcome = train_and_evaluate(&ds, &plan).unwrap();
    assert_eq!(outcome.scaler.n_features(), names.len());
    assert_eq!(outcome.model.n_features(), names.len());
    assert!((0.0..=1.0).contains(&outcome.metrics.accuracy));
    assert!(outcome.cv_score.is_some());
    let hyper = outcome.hyperparameters().unwrap();
    assert!(hyper.get("scale_pos_weight").is_some());
    assert_eq!(hyper["n_estimators"], serde_json::json!(outcome.params.n_estimators));
}
