//! Trained model records (append-only, versioned per ticker and model name)

use super::Database;
use crate::error::Result;
use crate::ml::ClassificationMetrics;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::info;

/// A model about to be persisted; the version is assigned on save
#[derive(Debug, Clone)]
pub struct NewTrainedModel {
    pub ticker: String,
    pub model_name: String,
    pub feature_list: Vec<String>,
    pub hyperparameters: serde_json::Value,
    pub performance_metrics: ClassificationMetrics,
    pub model_blob: Vec<u8>,
    pub scaler_blob: Vec<u8>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainedModelRecord {
    pub id: i64,
    pub ticker: String,
    pub model_name: String,
    pub version: i64,
    pub feature_list: Vec<String>,
    pub hyperparameters: serde_json::Value,
    pub performance_metrics: ClassificationMetrics,
    pub model_blob: Vec<u8>,
    pub scaler_blob: Vec<u8>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub notification_sent: bool,
}

/// Listing row without the blobs
#[derive(Debug, Clone)]
pub struct ModelSummary {
    pub id: i64,
    pub ticker: String,
    pub model_name: String,
    pub version: i64,
    pub performance_metrics: ClassificationMetrics,
    pub created_at: DateTime<Utc>,
}

impl TrainedModelRecord {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        let feature_list: String = row.try_get("feature_list")?;
        let hyperparameters: String = row.try_get("hyperparameters")?;
        let metrics: String = row.try_get("performance_metrics")?;
        Ok(Self {
            id: row.try_get("id")?,
            ticker: row.try_get("ticker_symbol")?,
            model_name: row.try_get("model_name")?,
            version: row.try_get("model_version")?,
            feature_list: serde_json::from_str(&feature_list)?,
            hyperparameters: serde_json::from_str(&hyperparameters)?,
            performance_metrics: serde_json::from_str(&metrics)?,
            model_blob: row.try_get("model_blob")?,
            scaler_blob: row.try_get("scaler_blob")?,
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
            notification_sent: row.try_get("notification_sent")?,
        })
    }
}

impl Database {
    /// Persist a new model version and return it.
    ///
    /// The version is `max(existing) + 1` for the (ticker, model name) pair,
    /// computed inside the insert so concurrent writers cannot reuse it.
    pub async fn save_model(&self, model: &NewTrainedModel) -> Result<i64> {
        let feature_list = serde_json::to_string(&model.feature_list)?;
        let hyperparameters = serde_json::to_string(&model.hyperparameters)?;
        let metrics = serde_json::to_string(&model.performance_metrics)?;

        let mut tx = self.pool().begin().await?;
        let version: i64 = sqlx::query_scalar(
            r#"INSERT INTO trained_models
                (ticker_symbol, model_name, model_version, feature_list, hyperparameters,
                 performance_metrics, model_blob, scaler_blob, notes, created_at)
            SELECT ?, ?, COALESCE(MAX(model_version), 0) + 1, ?, ?, ?, ?, ?, ?, ?
            FROM trained_models
            WHERE ticker_symbol = ? AND model_name = ?
            RETURNING model_version"#,
        )
        .bind(&model.ticker)
        .bind(&model.model_name)
        .bind(&feature_list)
        .bind(&hyperparameters)
        .bind(&metrics)
        .bind(&model.model_blob)
        .bind(&model.scaler_blob)
        .bind(&model.notes)
        .bind(Utc::now())
        .bind(&model.ticker)
        .bind(&model.model_name)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(
            "💾 Saved {} {} version {}",
            model.ticker, model.model_name, version
        );
        Ok(version)
    }

    /// A specific version, or the latest when `version` is `None`
    pub async fn load_model(
        &self,
        ticker: &str,
        model_name: &str,
        version: Option<i64>,
    ) -> Result<Option<TrainedModelRecord>> {
        let row = match version {
            Some(v) => {
                sqlx::query(
                    r#"SELECT * FROM trained_models
                       WHERE ticker_symbol = ? AND model_name = ? AND model_version = ?"#,
                )
                .bind(ticker)
                .bind(model_name)
                .bind(v)
                .fetch_optional(self.pool())
                .await?
            }
            None => {
                sqlx::query(
                    r#"SELECT * FROM trained_models
                       WHERE ticker_symbol = ? AND model_name = ?
                       ORDER BY model_version DESC LIMIT 1"#,
                )
                .bind(ticker)
                .bind(model_name)
                .fetch_optional(self.pool())
                .await?
            }
        };
        row.as_ref().map(TrainedModelRecord::from_row).transpose()
    }

    pub async fn list_models(&self, ticker: Option<&str>) -> Result<Vec<ModelSummary>> {
        let rows = sqlx::query(
            r#"SELECT id, ticker_symbol, model_name, model_version, performance_metrics, created_at
               FROM trained_models
               WHERE (?1 IS NULL OR ticker_symbol = ?1)
               ORDER BY ticker_symbol, model_name, model_version DESC"#,
        )
        .bind(ticker)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                let metrics: String = row.try_get("performance_metrics")?;
                Ok(ModelSummary {
                    id: row.try_get("id")?,
                    ticker: row.try_get("ticker_symbol")?,
                    model_name: row.try_get("model_name")?,
                    version: row.try_get("model_version")?,
                    performance_metrics: serde_json::from_str(&metrics)?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}
