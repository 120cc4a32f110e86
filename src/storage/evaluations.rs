//! Bulk evaluation log

use super::Database;
use crate::error::{PipelineError, Result};
use crate::ml::ClassificationMetrics;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvaluationStatus {
    Success,
    Skipped,
    Failed,
}

impl EvaluationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationStatus::Success => "success",
            EvaluationStatus::Skipped => "skipped",
            EvaluationStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvaluationStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "success" => Ok(EvaluationStatus::Success),
            "skipped" => Ok(EvaluationStatus::Skipped),
            "failed" => Ok(EvaluationStatus::Failed),
            other => Err(PipelineError::Data(format!(
                "unknown evaluation status '{}'",
                other
            ))),
        }
    }
}

/// One (ticker, direction) outcome of a batch run
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRecord {
    pub run_id: String,
    pub ticker: String,
    /// "up", "down", or "n/a" when the ticker was skipped before training
    pub direction: String,
    pub evaluated_at: DateTime<Utc>,
    pub status: EvaluationStatus,
    pub metrics: Option<ClassificationMetrics>,
    pub cv_score: Option<f64>,
    pub training_rows: Option<i64>,
    pub features: Vec<String>,
    pub training_period: Option<(NaiveDate, NaiveDate)>,
    pub error_message: Option<String>,
}

impl EvaluationRecord {
    pub fn new(run_id: &str, ticker: &str, direction: &str, status: EvaluationStatus) -> Self {
        Self {
            run_id: run_id.to_string(),
            ticker: ticker.to_string(),
            direction: direction.to_string(),
            evaluated_at: Utc::now(),
            status,
            metrics: None,
            cv_score: None,
            training_rows: None,
            features: Vec::new(),
            training_period: None,
            error_message: None,
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: EvaluationStatus) {
        match status {
            EvaluationStatus::Success => self.success += 1,
            EvaluationStatus::Skipped => self.skipped += 1,
            EvaluationStatus::Failed => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: StatusCounts) {
        self.success += other.success;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }

    pub fn total(&self) -> usize {
        self.success + self.skipped + self.failed
    }
}

impl Database {
    pub async fn log_evaluation(&self, record: &EvaluationRecord) -> Result<()> {
        let m = record.metrics.as_ref();
        let features = if record.features.is_empty() {
            None
        } else {
            Some(record.features.join(","))
        };
        sqlx::query(
            r#"INSERT INTO performance_log
                (run_id, ticker_symbol, direction, evaluated_at, status, accuracy,
                 precision_score, recall_score, f1_score, roc_auc, cv_score, training_rows,
                 features, training_period_start, training_period_end, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&record.run_id)
        .bind(&record.ticker)
        .bind(&record.direction)
        .bind(record.evaluated_at)
        .bind(record.status.as_str())
        .bind(m.map(|m| m.accuracy))
        .bind(m.map(|m| m.precision))
        .bind(m.map(|m| m.recall))
        .bind(m.map(|m| m.f1_score))
        .bind(m.and_then(|m| m.roc_auc))
        .bind(record.cv_score)
        .bind(record.training_rows)
        .bind(features)
        .bind(record.training_period.map(|(s, _)| s))
        .bind(record.training_period.map(|(_, e)| e))
        .bind(&record.error_message)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Tickers evaluated successfully in both directions, across all runs
    pub async fn completed_tickers(&self) -> Result<HashSet<String>> {
        let tickers: Vec<String> = sqlx::query_scalar(
            r#"SELECT ticker_symbol FROM performance_log
               WHERE status = 'success'
               GROUP BY ticker_symbol
               HAVING COUNT(DISTINCT direction) = 2"#,
        )
        .fetch_all(self.pool())
        .await?;
        Ok(tickers.into_iter().collect())
    }

    pub async fn clear_evaluations(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM performance_log")
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn evaluation_counts(&self, run_id: &str) -> Result<StatusCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM performance_log WHERE run_id = ? GROUP BY status",
        )
        .bind(run_id)
        .fetch_all(self.pool())
        .await?;
        let mut counts = StatusCounts::default();
        for (status, n) in rows {
            let n = n as usize;
            match status.parse::<EvaluationStatus>()? {
                EvaluationStatus::Success => counts.success += n,
                EvaluationStatus::Skipped => counts.skipped += n,
                EvaluationStatus::Failed => counts.failed += n,
            }
        }
        Ok(counts)
    }
}
