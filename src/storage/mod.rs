//! SQLite persistence
//!
//! One [`Database`] wraps a connection pool. Repository methods live in the
//! submodules, one per table family. The schema is declared statically in
//! [`migrations`] and checked at start-up with [`Database::ensure_current`].

mod evaluations;
pub mod migrations;
mod models;
mod predictions;
mod prices;
mod tickers;
#[cfg(test)]
mod tests;

pub use evaluations::{EvaluationRecord, EvaluationStatus, StatusCounts};
pub use models::{ModelSummary, NewTrainedModel, TrainedModelRecord};
pub use predictions::{NewPrediction, PendingModel, PendingPrediction, PredictionRecord};
pub use tickers::{MarketListEntry, StockInfo, TargetTicker};

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database file without checking the schema
    pub async fn connect(path: &str) -> Result<Self> {
        Self::connect_with(path, 5).await
    }

    /// Open with a bounded pool size; batch workers use one connection each
    pub async fn connect_with(path: &str, max_connections: u32) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30))
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;
        debug!("Opened database {}", path);
        Ok(Self { pool })
    }

    /// Open and refuse to continue on an out-of-date schema
    pub async fn open(path: &str) -> Result<Self> {
        let db = Self::connect(path).await?;
        db.ensure_current().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Row count of a known table, for diagnostics
    pub async fn table_count(&self, table: &str) -> Result<i64> {
        if !migrations::TABLES.contains(&table) {
            return Err(crate::error::PipelineError::Config(format!(
                "unknown table '{}'",
                table
            )));
        }
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
