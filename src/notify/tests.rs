use super::*;
use crate::error::PipelineError;
use crate::ml::ClassificationMetrics;
use crate::storage::{NewPrediction, NewTrainedModel, StockInfo};
use crate::types::Direction;
use chrono::NaiveDate;
use tempfile::TempDir;

async fn seeded_db() -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notify.db");
    let db = Database::connect(path.to_str().unwrap()).await.unwrap();
    db.migrate().await.unwrap();
    db.upsert_stock_info(&StockInfo {
        ticker_symbol: "7203.T".to_string(),
        company_name: Some("Toyota <Motor>".to_string()),
        market_segment: None,
        industry: None,
    })
    .await
    .unwrap();
    db.save_model(&NewTrainedModel {
        ticker: "7203.T".to_string(),
        model_name: "GBDT_10d_up_3pct".to_string(),
        feature_list: vec!["RSI_14".to_string()],
        hyperparameters: serde_json::json!({"num_leaves": 31}),
        performance_metrics: ClassificationMetrics {
            accuracy: 0.6,
            precision: 0.5,
            recall: 0.5,
            f1_score: 0.5,
            roc_auc: Some(0.62),
        },
        model_blob: vec![0],
        scaler_blob: vec![0],
        notes: None,
    })
    .await
    .unwrap();
    db.save_predictions(&[NewPrediction {
        ticker: "7203.T".to_string(),
        direction: Direction::Up,
        target_date: NaiveDate::from_ymd_opt(2024, 5, 17).unwrap(),
        probability: 0.71,
        model_name: "GBDT_10d_up_3pct".to_string(),
        model_version: 1,
    }])
    .await
    .unwrap();
    (dir, db)
}

fn channel_ok(times: usize) -> Box<dyn NotificationChannel> {
    let mut mock = MockNotificationChannel::new();
    mock.expect_name().return_const("mock".to_string());
    mock.expect_deliver()
        .times(times)
        .returning(|report| {
            assert_eq!(report.models.len(), 1);
            assert_eq!(report.predictions.len(), 1);
            Ok(())
        });
    Box::new(mock)
}

fn channel_failing() -> Box<dyn NotificationChannel> {
    let mut mock = MockNotificationChannel::new();
    mock.expect_name().return_const("broken".to_string());
    mock.expect_deliver()
        .times(1)
        .returning(|_| Err(PipelineError::ExternalService("relay down".into())));
    Box::new(mock)
}

#[tokio::test]
async fn test_successful_delivery_flags_everything_once() {
    let (_dir, db) = seeded_db().await;
    let service = NotificationService::new(Some(channel_ok(1)), vec![channel_ok(1)]);

    let outcome = service.send_pending(&db).await.unwrap();
    assert_eq!(
        outcome,
        NotifyOutcome::Flagged {
            models: 1,
            predictions: 1
        }
    );
    // Second run finds nothing; the mocks would panic on a second delivery
    assert_eq!(
        service.send_pending(&db).await.unwrap(),
        NotifyOutcome::NothingPending
    );
}

#[tokio::test]
async fn test_failed_channel_leaves_rows_pending() {
    let (_dir, db) = seeded_db().await;
    let service = NotificationService::new(None, vec![channel_ok(1), channel_failing()]);

    let outcome = service.send_pending(&db).await.unwrap();
    match outcome {
        NotifyOutcome::Withheld { reason } => assert!(reason.contains("relay down")),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(db.pending_models().await.unwrap().len(), 1);
    assert_eq!(db.pending_predictions().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_sink_skips_channels() {
    let (_dir, db) = seeded_db().await;
    let service = NotificationService::new(Some(channel_failing()), vec![channel_ok(0)]);

    let outcome = service.send_pending(&db).await.unwrap();
    assert!(matches!(outcome, NotifyOutcome::Withheld { .. }));
    assert_eq!(db.pending_predictions().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_no_message_channel_never_flags() {
    let (_dir, db) = seeded_db().await;
    let service = NotificationService::new(Some(channel_ok(0)), Vec::new());

    let outcome = service.send_pending(&db).await.unwrap();
    assert!(matches!(outcome, NotifyOutcome::Withheld { .. }));
    assert_eq!(db.pending_models().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_report_rendering() {
    let (_dir, db) = seeded_db().await;
    let report = NotificationReport {
        models: db.pending_models().await.unwrap(),
        predictions: db.pending_predictions().await.unwrap(),
    };

    let model_rows = report.model_rows();
    let model_row = &model_rows[0];
    assert_eq!(model_row.len(), MODEL_HEADER.len());
    assert_eq!(model_row[5], "up");
    assert_eq!(model_row[6], "0.6200");
    let prediction_rows = report.prediction_rows();
    let prediction_row = &prediction_rows[0];
    assert_eq!(prediction_row.len(), PREDICTION_HEADER.len());
    assert_eq!(prediction_row[3], "2024-05-17");

    let html = report.to_html();
    assert!(html.contains("Toyota &lt;Motor&gt;"));
    let messages = report.to_chat_messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("71.0%"));
}

#[tokio::test]
async fn test_chat_messages_split_under_limit() {
    let (_dir, db) = seeded_db().await;
    let one = db.pending_predictions().await.unwrap().remove(0);
    let report = NotificationReport {
        models: Vec::new(),
        predictions: vec![one; 300],
    };
    let messages = report.to_chat_messages();
    assert!(messages.len() > 1);
    assert!(messages.iter().all(|m| m.len() <= 4000));
}
