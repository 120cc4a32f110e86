//! Prediction results and the notification backlog

use super::Database;
use crate::error::{PipelineError, Result};
use crate::ml::ClassificationMetrics;
use crate::types::Direction;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::Row;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewPrediction {
    pub ticker: String,
    pub direction: Direction,
    pub target_date: NaiveDate,
    pub probability: f64,
    pub model_name: String,
    pub model_version: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PredictionRecord {
    pub id: i64,
    pub ticker_symbol: String,
    pub direction: String,
    pub target_date: NaiveDate,
    pub probability: f64,
    pub model_name: String,
    pub model_version: i64,
    pub created_at: DateTime<Utc>,
    pub notification_sent: bool,
}

/// Model awaiting notification, with the company name when known
#[derive(Debug, Clone)]
pub struct PendingModel {
    pub id: i64,
    pub ticker: String,
    pub company_name: Option<String>,
    pub model_name: String,
    pub version: i64,
    pub metrics: ClassificationMetrics,
    pub hyperparameters: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PendingPrediction {
    pub id: i64,
    pub ticker: String,
    pub company_name: Option<String>,
    pub direction: String,
    pub target_date: NaiveDate,
    pub probability: f64,
    pub model_version: i64,
    pub created_at: DateTime<Utc>,
}

impl Database {
    /// Store a batch of predictions atomically; returns their row ids
    pub async fn save_predictions(&self, predictions: &[NewPrediction]) -> Result<Vec<i64>> {
        let mut tx = self.pool().begin().await?;
        let now = Utc::now();
        let mut ids = Vec::with_capacity(predictions.len());
        for p in predictions {
            if !(0.0..=1.0).contains(&p.probability) {
                return Err(PipelineError::Data(format!(
                    "{}: probability {} outside [0, 1]",
                    p.ticker, p.probability
                )));
            }
            let result = sqlx::query(
                r#"INSERT INTO prediction_results
                    (ticker_symbol, direction, target_date, probability, model_name,
                     model_version, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(&p.ticker)
            .bind(p.direction.as_str())
            .bind(p.target_date)
            .bind(p.probability)
            .bind(&p.model_name)
            .bind(p.model_version)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            ids.push(result.last_insert_rowid());
        }
        tx.commit().await?;
        Ok(ids)
    }

    pub async fn list_predictions(&self, ticker: Option<&str>) -> Result<Vec<PredictionRecord>> {
        let rows = sqlx::query_as::<_, PredictionRecord>(
            r#"SELECT id, ticker_symbol, direction, target_date, probability, model_name,
                      model_version, created_at, notification_sent
               FROM prediction_results
               WHERE (?1 IS NULL OR ticker_symbol = ?1)
               ORDER BY created_at DESC, id DESC"#,
        )
        .bind(ticker)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    pub async fn pending_models(&self) -> Result<Vec<PendingModel>> {
        let rows = sqlx::query(
            r#"SELECT tm.id, tm.ticker_symbol, si.company_name, tm.model_name, tm.model_version,
                      tm.performance_metrics, tm.hyperparameters, tm.created_at
               FROM trained_models tm
               LEFT JOIN stock_info si ON si.ticker_symbol = tm.ticker_symbol
               WHERE tm.notification_sent = 0
               ORDER BY tm.id"#,
        )
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                let metrics: String = row.try_get("performance_metrics")?;
                let hyperparameters: String = row.try_get("hyperparameters")?;
                Ok(PendingModel {
                    id: row.try_get("id")?,
                    ticker: row.try_get("ticker_symbol")?,
                    company_name: row.try_get("company_name")?,
                    model_name: row.try_get("model_name")?,
                    version: row.try_get("model_version")?,
                    metrics: serde_json::from_str(&metrics)?,
                    hyperparameters: serde_json::from_str(&hyperparameters)?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    pub async fn pending_predictions(&self) -> Result<Vec<PendingPrediction>> {
        let rows = sqlx::query(
            r#"SELECT pr.id, pr.ticker_symbol, si.company_name, pr.direction, pr.target_date,
                      pr.probability, pr.model_version, pr.created_at
               FROM prediction_results pr
               LEFT JOIN stock_info si ON si.ticker_symbol = pr.ticker_symbol
               WHERE pr.notification_sent = 0
               ORDER BY pr.id"#,
        )
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(PendingPrediction {
                    id: row.try_get("id")?,
                    ticker: row.try_get("ticker_symbol")?,
                    company_name: row.try_get("company_name")?,
                    direction: row.try_get("direction")?,
                    target_date: row.try_get("target_date")?,
                    probability: row.try_get("probability")?,
                    model_version: row.try_get("model_version")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    /// Flag models and predictions as notified; all or nothing
    pub async fn mark_notified(&self, model_ids: &[i64], prediction_ids: &[i64]) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        for id in model_ids {
            sqlx::query("UPDATE trained_models SET notification_sent = 1 WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        for id in prediction_ids {
            sqlx::query("UPDATE prediction_results SET notification_sent = 1 WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
