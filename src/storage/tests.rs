use super::*;
use crate::ml::ClassificationMetrics;
use crate::types::{Bar, Direction};
use chrono::NaiveDate;
use tempfile::TempDir;

async fn fresh_db() -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trend.db");
    let db = Database::connect(path.to_str().unwrap()).await.unwrap();
    db.migrate().await.unwrap();
    (dir, db)
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

fn bar(d: u32, close: f64) -> Bar {
    Bar {
        date: day(d),
        open: close - 1.0,
        high: close + 1.0,
        low: close - 2.0,
        close,
        adj_close: Some(close),
        volume: 1000.0,
    }
}

fn new_model(ticker: &str, name: &str, accuracy: f64) -> NewTrainedModel {
    NewTrainedModel {
        ticker: ticker.to_string(),
        model_name: name.to_string(),
        feature_list: vec!["RSI_14".to_string(), "SMA_5".to_string()],
        hyperparameters: serde_json::json!({"n_estimators": 100}),
        performance_metrics: ClassificationMetrics {
            accuracy,
            precision: 0.5,
            recall: 0.4,
            f1_score: 0.44,
            roc_auc: Some(0.6),
        },
        model_blob: vec![1, 2, 3],
        scaler_blob: vec![4, 5],
        notes: None,
    }
}

#[tokio::test]
async fn test_migrate_is_idempotent() {
    let (_dir, db) = fresh_db().await;
    assert_eq!(db.schema_version().await.unwrap(), migrations::latest_version());
    assert!(db.migrate().await.unwrap().is_empty());
    db.ensure_current().await.unwrap();
    for table in migrations::TABLES {
        assert_eq!(db.table_count(table).await.unwrap(), 0);
    }
}

#[tokio::test]
async fn test_ensure_current_rejects_unmigrated_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("trend.db");
    let path = path.to_str().unwrap();
    let err = Database::open(path).await.err().unwrap();
    assert!(err.is_config());

    let db = Database::connect(path).await.unwrap();
    db.migrate().await.unwrap();
    db.close().await;
    Database::open(path).await.unwrap();
}

#[tokio::test]
async fn test_table_count_rejects_unknown_table() {
    let (_dir, db) = fresh_db().await;
    assert!(db.table_count("sqlite_master; DROP TABLE x").await.is_err());
}

#[tokio::test]
async fn test_price_upsert_and_reload() {
    let (_dir, db) = fresh_db().await;
    db.upsert_bars("7203.T", &[bar(1, 10.0), bar(4, 11.0)]).await.unwrap();
    // Same date again overwrites
    db.upsert_bars("7203.T", &[bar(4, 12.0), bar(5, 13.0)]).await.unwrap();

    let series = db.load_prices("7203.T").await.unwrap();
    assert_eq!(series.len(), 3);
    assert_eq!(series.bars()[1].close, 12.0);
    assert_eq!(db.last_trade_date("7203.T").await.unwrap(), Some(day(5)));
    assert_eq!(db.price_row_count("7203.T").await.unwrap(), 3);
    assert_eq!(db.last_trade_date("6758.T").await.unwrap(), None);
    assert!(db.load_prices("6758.T").await.unwrap().is_empty());

    assert_eq!(db.tickers_with_prices().await.unwrap(), vec!["7203.T"]);
    db.delete_prices(&["7203.T".to_string()]).await.unwrap();
    assert_eq!(db.price_row_count("7203.T").await.unwrap(), 0);
}

#[tokio::test]
async fn test_missing_adjusted_close_survives_storage() {
    let (_dir, db) = fresh_db().await;
    let mut b = bar(1, 10.0);
    b.adj_close = None;
    db.upsert_bars("^VIX", &[b]).await.unwrap();
    let series = db.load_prices("^VIX").await.unwrap();
    assert_eq!(series.bars()[0].adj_close, None);
}

#[tokio::test]
async fn test_macro_panel_roundtrip() {
    let (_dir, db) = fresh_db().await;
    db.upsert_macro("cpi", &[(day(1), 300.0), (day(1), 301.0)])
        .await
        .unwrap();
    db.upsert_macro("unemployment_rate", &[(day(1), 4.0)])
        .await
        .unwrap();
    let panel = db.load_macro_panel().await.unwrap();
    assert_eq!(panel.as_of("cpi", day(20)), Some(301.0));
    assert_eq!(panel.indicators().count(), 2);
}

#[tokio::test]
async fn test_model_versions_increment() {
    let (_dir, db) = fresh_db().await;
    let name = "GBDT_10d_up_3pct";
    assert_eq!(db.save_model(&new_model("7203.T", name, 0.6)).await.unwrap(), 1);
    assert_eq!(db.save_model(&new_model("7203.T", name, 0.7)).await.unwrap(), 2);
    // Versions are per (ticker, model name)
    assert_eq!(db.save_model(&new_model("6758.T", name, 0.5)).await.unwrap(), 1);

    let first = db.load_model("7203.T", name, Some(1)).await.unwrap().unwrap();
    assert_eq!(first.performance_metrics.accuracy, 0.6);
    assert_eq!(first.feature_list, vec!["RSI_14", "SMA_5"]);
    assert_eq!(first.model_blob, vec![1, 2, 3]);
    assert!(!first.notification_sent);

    let latest = db.load_model("7203.T", name, None).await.unwrap().unwrap();
    assert_eq!(latest.version, 2);
    assert_eq!(latest.performance_metrics.accuracy, 0.7);

    assert!(db.load_model("7203.T", name, Some(9)).await.unwrap().is_none());
    assert_eq!(db.list_models(Some("7203.T")).await.unwrap().len(), 2);
    assert_eq!(db.list_models(None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_concurrent_saves_get_distinct_versions() {
    let (_dir, db) = fresh_db().await;
    let name = "GBDT_10d_down_3pct";
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let db = db.clone();
            tokio::spawn(async move { db.save_model(&new_model("7203.T", name, 0.5)).await })
        })
        .collect();
    let mut versions = Vec::new();
    for h in handles {
        versions.push(h.await.unwrap().unwrap());
    }
    versions.sort();
    assert_eq!(versions, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_save_predictions_rejects_bad_probability() {
    let (_dir, db) = fresh_db().await;
    let bad = NewPrediction {
        ticker: "7203.T".to_string(),
        direction: Direction::Up,
        target_date: day(15),
        probability: 1.5,
        model_name: "GBDT_10d_up_3pct".to_string(),
        model_version: 1,
    };
    assert!(db.save_predictions(&[bad]).await.is_err());
    assert!(db.list_predictions(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_pending_and_mark_notified() {
    let (_dir, db) = fresh_db().await;
    db.upsert_stock_info(&StockInfo {
        ticker_symbol: "7203.T".to_string(),
        company_name: Some("Toyota".to_string()),
        market_segment: None,
        industry: None,
    })
    .await
    .unwrap();
    db.save_model(&new_model("7203.T", "GBDT_10d_up_3pct", 0.6))
        .await
        .unwrap();
    let ids = db
        .save_predictions(&[
            NewPrediction {
                ticker: "7203.T".to_string(),
                direction: Direction::Up,
                target_date: day(15),
                probability: 0.7,
                model_name: "GBDT_10d_up_3pct".to_string(),
                model_version: 1,
            },
            NewPrediction {
                ticker: "9984.T".to_string(),
                direction: Direction::Down,
                target_date: day(15),
                probability: 0.2,
                model_name: "GBDT_10d_down_3pct".to_string(),
                model_version: 1,
            },
        ])
        .await
        .unwrap();
    assert_eq!(ids.len(), 2);

    let models = db.pending_models().await.unwrap();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].company_name.as_deref(), Some("Toyota"));
    let predictions = db.pending_predictions().await.unwrap();
    assert_eq!(predictions.len(), 2);
    // No stock_info row, still pending
    assert_eq!(predictions[1].company_name, None);

    let model_ids: Vec<i64> = models.iter().map(|m| m.id).collect();
    db.mark_notified(&model_ids, &ids).await.unwrap();
    assert!(db.pending_models().await.unwrap().is_empty());
    assert!(db.pending_predictions().await.unwrap().is_empty());
    assert!(db.list_predictions(Some("7203.T")).await.unwrap()[0].notification_sent);
}

#[tokio::test]
async fn test_target_ticker_registry() {
    let (_dir, db) = fresh_db().await;
    db.upsert_target_ticker("7203.T", &["^N225".to_string(), "JPY=X".to_string()])
        .await
        .unwrap();
    db.upsert_target_ticker("7203.T", &["^N225".to_string()])
        .await
        .unwrap();
    let t = db.get_target_ticker("7203.T").await.unwrap().unwrap();
    assert_eq!(t.feature_tickers(), vec!["^N225"]);
    assert_eq!(db.list_target_tickers().await.unwrap().len(), 1);
    assert!(db.remove_target_ticker("7203.T").await.unwrap());
    assert!(!db.remove_target_ticker("7203.T").await.unwrap());
}

#[tokio::test]
async fn test_stock_info_keeps_known_fields() {
    let (_dir, db) = fresh_db().await;
    db.upsert_stock_info(&StockInfo {
        ticker_symbol: "7203.T".to_string(),
        company_name: Some("Toyota".to_string()),
        market_segment: Some("Prime".to_string()),
        industry: None,
    })
    .await
    .unwrap();
    db.upsert_stock_info(&StockInfo {
        ticker_symbol: "7203.T".to_string(),
        company_name: None,
        market_segment: None,
        industry: Some("Transportation".to_string()),
    })
    .await
    .unwrap();
    let info = db.get_stock_info("7203.T").await.unwrap().unwrap();
    assert_eq!(info.company_name.as_deref(), Some("Toyota"));
    assert_eq!(info.industry.as_deref(), Some("Transportation"));
}

#[tokio::test]
async fn test_market_list_replaced_wholesale() {
    let (_dir, db) = fresh_db().await;
    let entry = |t: &str| MarketListEntry {
        ticker_symbol: t.to_string(),
        company_name: None,
        market_segment: None,
        industry: None,
        load_date: day(1),
    };
    db.replace_market_list(&[entry("1301.T"), entry("7203.T")])
        .await
        .unwrap();
    db.replace_market_list(&[entry("9984.T")]).await.unwrap();
    let list = db.market_list().await.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].ticker_symbol, "9984.T");
}

#[tokio::test]
async fn test_completed_tickers_need_both_directions() {
    let (_dir, db) = fresh_db().await;
    let ok = |t: &str, d: &str| EvaluationRecord::new("run-1", t, d, EvaluationStatus::Success);
    db.log_evaluation(&ok("7203.T", "up")).await.unwrap();
    db.log_evaluation(&ok("7203.T", "down")).await.unwrap();
    db.log_evaluation(&ok("6758.T", "up")).await.unwrap();
    db.log_evaluation(
        &EvaluationRecord::new("run-1", "6758.T", "down", EvaluationStatus::Failed)
            .with_error("boom"),
    )
    .await
    .unwrap();

    let done = db.completed_tickers().await.unwrap();
    assert!(done.contains("7203.T"));
    assert!(!done.contains("6758.T"));

    let counts = db.evaluation_counts("run-1").await.unwrap();
    assert_eq!(counts.success, 3);
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.total(), 4);

    assert_eq!(db.clear_evaluations().await.unwrap(), 4);
    assert!(db.completed_tickers().await.unwrap().is_empty());
}
