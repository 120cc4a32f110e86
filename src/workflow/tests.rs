use super::*;
use crate::config::Config;
use crate::error::PipelineError;
use crate::ml::SearchMethod;
use crate::storage::{Database, EvaluationStatus, MarketListEntry};
use crate::types::{add_business_days, Bar, Direction};
use chrono::NaiveDate;
use tempfile::TempDir;

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2019, 1, 1).unwrap()
}

fn wave(n: usize, phase: f64) -> Vec<Bar> {
    (0..n)
        .map(|i| {
            let p = 100.0 + 10.0 * ((i as f64) * 0.15 + phase).sin() + 0.05 * i as f64;
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
        .collect()
}

async fn setup() -> (TempDir, Database, Config) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trend.db");
    let mut config = Config::default();
    config.database.path = path.to_str().unwrap().to_string();
    config.batch.common_features = Vec::new();
    config.batch.workers = 2;
    let db = Database::connect(&config.database.path).await.unwrap();
    db.migrate().await.unwrap();
    (dir, db, config)
}

async fn seeded() -> (TempDir, Database, Config) {
    let (dir, db, config) = setup().await;
    db.upsert_bars("7203.T", &wave(600, 0.0)).await.unwrap();
    db.upsert_bars("^N225", &wave(600, 1.3)).await.unwrap();
    db.upsert_target_ticker("7203.T", &["^N225".to_string()])
        .await
        .unwrap();
    (dir, db, config)
}

fn quick() -> TrainOptions {
    TrainOptions {
        search_method: SearchMethod::None,
        test_mode: true,
        save: true,
    }
}

#[tokio::test]
async fn test_train_saves_incrementing_versions() {
    let (_dir, db, config) = seeded().await;

    let first = train_ticker(&db, &config, "7203.T", Direction::Up, &quick())
        .await
        .unwrap();
    assert_eq!(first.model_name, "GBDT_10d_up_3pct");
    assert_eq!(first.version, Some(1));
    assert!(first.feature_names.iter().any(|f| f.starts_with("n225_return_")));
    assert!(first.rows >= 100);

    let second = train_ticker(&db, &config, "7203.T", Direction::Up, &quick())
        .await
        .unwrap();
    assert_eq!(second.version, Some(2));

    let dry = TrainOptions {
        save: false,
        ..quick()
    };
    let unsaved = train_ticker(&db, &config, "7203.T", Direction::Up, &dry)
        .await
        .unwrap();
    assert_eq!(unsaved.version, None);
    assert_eq!(db.list_models(Some("7203.T")).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_train_without_prices_is_data_error() {
    let (_dir, db, config) = setup().await;
    let err = train_ticker(&db, &config, "9999.T", Direction::Up, &quick())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Data(_)));
}

#[tokio::test]
async fn test_predict_targets_horizon_business_days_ahead() {
    let (_dir, db, config) = seeded().await;
    train_ticker(&db, &config, "7203.T", Direction::Down, &quick())
        .await
        .unwrap();

    let result = predict_ticker(&db, &config, "7203.T", Direction::Down, None)
        .await
        .unwrap();
    assert_eq!(result.model_version, 1);
    assert_eq!(result.model_name, "GBDT_10d_down_3pct");
    assert!((0.0..=1.0).contains(&result.probability));
    assert_eq!(result.base_date, add_business_days(start(), 599));
    assert_eq!(result.target_date, add_business_days(result.base_date, 10));
}

#[tokio::test]
async fn test_predict_without_model_is_data_error() {
    let (_dir, db, config) = seeded().await;
    let err = predict_ticker(&db, &config, "7203.T", Direction::Up, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Data(_)));

    train_ticker(&db, &config, "7203.T", Direction::Up, &quick())
        .await
        .unwrap();
    let err = predict_ticker(&db, &config, "7203.T", Direction::Up, Some(7))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Data(_)));
}

#[tokio::test]
async fn test_predict_all_stores_and_exports() {
    let (dir, db, config) = seeded().await;
    for direction in Direction::ALL {
        train_ticker(&db, &config, "7203.T", direction, &quick())
            .await
            .unwrap();
    }
    let out = dir.path().join("out");

    let summary = predict_all(&db, &config, &out).await.unwrap();
    assert_eq!(summary.results.len(), 2);
    assert!(summary.failures.is_empty());

    let csv_path = summary.csv_path.unwrap();
    assert!(csv_path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("predictions_"));
    let text = std::fs::read_to_string(&csv_path).unwrap();
    assert_eq!(text.lines().count(), 3);
    assert!(text.lines().next().unwrap().contains("probability"));

    let stored = db.list_predictions(Some("7203.T")).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(db.pending_predictions().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_predict_all_collects_failures() {
    let (dir, db, config) = seeded().await;
    train_ticker(&db, &config, "7203.T", Direction::Up, &quick())
        .await
        .unwrap();

    let summary = predict_all(&db, &config, dir.path()).await.unwrap();
    assert_eq!(summary.results.len(), 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].1, Direction::Down);
}

#[tokio::test]
async fn test_evaluate_model_rescores_tail() {
    let (_dir, db, config) = seeded().await;
    train_ticker(&db, &config, "7203.T", Direction::Up, &quick())
        .await
        .unwrap();

    let eval = evaluate_model(&db, &config, "7203.T", Direction::Up, None)
        .await
        .unwrap();
    assert_eq!(eval.version, 1);
    assert!(eval.test_rows > 0);
    assert_eq!(eval.confusion.total(), eval.test_rows);
    assert!(!eval.importances.is_empty());
    assert!(eval
        .importances
        .windows(2)
        .all(|w| w[0].1 >= w[1].1));
}

#[tokio::test]
async fn test_backtest_splits_on_dates() {
    let (_dir, db, config) = seeded().await;
    let train_end = add_business_days(start(), 400);
    let test_start = add_business_days(start(), 420);
    let request = BacktestRequest {
        ticker: "7203.T".to_string(),
        feature_tickers: Some(Vec::new()),
        train_end,
        test_start,
        tune: false,
        direction: Direction::Up,
        threshold: 0.03,
        horizon: 10,
    };

    let report = backtest(&db, &config, &request).await.unwrap();
    assert!(report.train_rows > 0);
    assert!(report.test_rows > 0);
    assert!(report.test_period.0 >= test_start);
    assert!(report.test_period.1 <= add_business_days(start(), 589));
}

#[test]
fn test_market_list_keeps_domestic_equities() {
    let csv = "\
日付,コード,銘柄名,市場・商品区分,33業種区分
20240301,7203,トヨタ自動車,プライム（内国株式）,輸送用機器
20240301,1305,ETF,ETF・ETN,-
20240301,4385,メルカリ,グロース（内国株式）,-
";
    let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let entries = parse_market_list(csv.as_bytes(), day).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].ticker_symbol, "7203.T");
    assert_eq!(entries[0].industry.as_deref(), Some("輸送用機器"));
    assert_eq!(entries[1].ticker_symbol, "4385.T");
    assert_eq!(entries[1].industry, None);
    assert_eq!(entries[1].load_date, day);
}

#[tokio::test]
async fn test_load_market_list_records_names() {
    let (dir, db, _config) = setup().await;
    let path = dir.path().join("listing.csv");
    std::fs::write(
        &path,
        "コード,銘柄名,市場・商品区分,33業種区分\n6758,ソニーグループ,プライム（内国株式）,電気機器\n",
    )
    .unwrap();
    let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

    assert_eq!(load_market_list(&db, &path, day).await.unwrap(), 1);
    let info = db.get_stock_info("6758.T").await.unwrap().unwrap();
    assert_eq!(info.company_name.as_deref(), Some("ソニーグループ"));
}

#[tokio::test]
async fn test_bulk_evaluate_skips_short_history_and_completed_tickers() {
    let (_dir, db, config) = setup().await;
    db.upsert_bars("GOOD.T", &wave(600, 0.0)).await.unwrap();
    db.upsert_bars("SHORT.T", &wave(150, 0.0)).await.unwrap();
    let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let entries: Vec<MarketListEntry> = ["GOOD.T", "SHORT.T"]
        .iter()
        .map(|t| MarketListEntry {
            ticker_symbol: t.to_string(),
            company_name: None,
            market_segment: None,
            industry: None,
            load_date: day,
        })
        .collect();
    db.replace_market_list(&entries).await.unwrap();
    let options = BulkOptions {
        fresh: false,
        test_mode: true,
        search_method: SearchMethod::None,
    };

    let first = bulk_evaluate(&config, &options, None).await.unwrap();
    assert_eq!(first.listed, 2);
    assert_eq!(first.evaluated, 2);
    assert_eq!(first.counts.success, 2);
    assert_eq!(first.counts.skipped, 1);
    assert_eq!(first.counts.failed, 0);
    assert!(first.cleaned_up.is_empty());

    let logged = db.evaluation_counts(&first.run_id).await.unwrap();
    assert_eq!(logged.total(), 3);
    let completed = db.completed_tickers().await.unwrap();
    assert!(completed.contains("GOOD.T"));
    assert!(!completed.contains("SHORT.T"));

    let second = bulk_evaluate(&config, &options, None).await.unwrap();
    assert_eq!(second.already_completed, 1);
    assert_eq!(second.evaluated, 1);
    assert_eq!(second.counts.skipped, 1);
    assert_eq!(second.counts.success, 0);

    let fresh = BulkOptions {
        fresh: true,
        ..options
    };
    let third = bulk_evaluate(&config, &fresh, None).await.unwrap();
    assert_eq!(third.evaluated, 2);
    assert_eq!(db.table_count("performance_log").await.unwrap(), 3);
}

#[tokio::test]
async fn test_bulk_evaluate_records_status_per_direction() {
    let (_dir, db, mut config) = setup().await;
    config.batch.workers = 1;
    db.upsert_bars("GOOD.T", &wave(600, 0.0)).await.unwrap();
    db.replace_market_list(&[MarketListEntry {
        ticker_symbol: "GOOD.T".to_string(),
        company_name: None,
        market_segment: None,
        industry: None,
        load_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
    }])
    .await
    .unwrap();
    let options = BulkOptions {
        fresh: true,
        test_mode: true,
        search_method: SearchMethod::None,
    };

    let summary = bulk_evaluate(&config, &options, None).await.unwrap();
    assert_eq!(summary.counts.success, 2);
    let counts = db.evaluation_counts(&summary.run_id).await.unwrap();
    assert_eq!(counts.success, 2);
    assert_eq!(EvaluationStatus::Success.as_str(), "success");
}

#[tokio::test]
async fn test_bulk_evaluate_bounds_every_step_by_deadline() {
    let (_dir, db, mut config) = setup().await;
    config.batch.workers = 1;
    config.batch.unit_deadline_secs = 0;
    db.upsert_bars("GOOD.T", &wave(600, 0.0)).await.unwrap();
    db.replace_market_list(&[MarketListEntry {
        ticker_symbol: "GOOD.T".to_string(),
        company_name: None,
        market_segment: None,
        industry: None,
        load_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
    }])
    .await
    .unwrap();
    let options = BulkOptions {
        fresh: true,
        test_mode: true,
        search_method: SearchMethod::None,
    };

    let summary = bulk_evaluate(&config, &options, None).await.unwrap();
    assert_eq!(summary.counts.success, 0);
    assert!(summary.counts.failed >= 1);
    assert!(db.completed_tickers().await.unwrap().is_empty());
}
