//! Versioned schema migrations
//!
//! Migrations are append-only: a released entry is never edited, a schema
//! change is a new entry with the next version. Each migration runs in its
//! own transaction together with its `schema_migrations` row.

use super::Database;
use crate::error::{PipelineError, Result};
use chrono::Utc;
use tracing::info;

pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub statements: &'static [&'static str],
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "base tables",
        statements: &[
            r#"CREATE TABLE daily_stock_prices (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticker_symbol TEXT NOT NULL,
                trade_date TEXT NOT NULL,
                open_price REAL NOT NULL,
                high_price REAL NOT NULL,
                low_price REAL NOT NULL,
                close_price REAL NOT NULL,
                adj_close_price REAL,
                volume REAL NOT NULL DEFAULT 0,
                UNIQUE (ticker_symbol, trade_date)
            )"#,
            r#"CREATE TABLE macro_economic_indicators (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                indicator_name TEXT NOT NULL,
                indicator_date TEXT NOT NULL,
                value REAL NOT NULL,
                UNIQUE (indicator_name, indicator_date)
            )"#,
            r#"CREATE TABLE stock_info (
                ticker_symbol TEXT PRIMARY KEY,
                company_name TEXT,
                market_segment TEXT,
                industry TEXT,
                updated_at TEXT NOT NULL
            )"#,
            r#"CREATE TABLE target_tickers (
                ticker_symbol TEXT PRIMARY KEY,
                features TEXT NOT NULL DEFAULT '',
                added_at TEXT NOT NULL
            )"#,
            r#"CREATE TABLE market_list (
                ticker_symbol TEXT PRIMARY KEY,
                company_name TEXT,
                market_segment TEXT,
                industry TEXT,
                load_date TEXT NOT NULL
            )"#,
            r#"CREATE TABLE trained_models (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticker_symbol TEXT NOT NULL,
                model_name TEXT NOT NULL,
                model_version INTEGER NOT NULL,
                feature_list TEXT NOT NULL,
                hyperparameters TEXT NOT NULL,
                performance_metrics TEXT NOT NULL,
                model_blob BLOB NOT NULL,
                scaler_blob BLOB NOT NULL,
                notes TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (ticker_symbol, model_name, model_version)
            )"#,
            r#"CREATE TABLE prediction_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticker_symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                target_date TEXT NOT NULL,
                probability REAL NOT NULL,
                model_name TEXT NOT NULL,
                model_version INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )"#,
            r#"CREATE TABLE performance_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                ticker_symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                evaluated_at TEXT NOT NULL,
                status TEXT NOT NULL,
                accuracy REAL,
                precision_score REAL,
                recall_score REAL,
                f1_score REAL,
                roc_auc REAL,
                cv_score REAL,
                training_rows INTEGER,
                features TEXT,
                training_period_start TEXT,
                training_period_end TEXT,
                error_message TEXT
            )"#,
        ],
    },
    Migration {
        version: 2,
        name: "notification flags",
        statements: &[
            "ALTER TABLE trained_models ADD COLUMN notification_sent INTEGER NOT NULL DEFAULT 0",
            "ALTER TABLE prediction_results ADD COLUMN notification_sent INTEGER NOT NULL DEFAULT 0",
        ],
    },
    Migration {
        version: 3,
        name: "lookup indexes",
        statements: &[
            "CREATE INDEX idx_trained_models_pending ON trained_models (notification_sent)",
            "CREATE INDEX idx_prediction_results_pending ON prediction_results (notification_sent)",
            "CREATE INDEX idx_performance_log_ticker ON performance_log (ticker_symbol, status)",
        ],
    },
];

/// Tables the application reads and writes
pub const TABLES: &[&str] = &[
    "daily_stock_prices",
    "macro_economic_indicators",
    "stock_info",
    "target_tickers",
    "market_list",
    "trained_models",
    "prediction_results",
    "performance_log",
];

pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

impl Database {
    async fn ensure_migrations_table(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            )",
        )
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Highest applied migration version, 0 for a fresh database
    pub async fn schema_version(&self) -> Result<i64> {
        self.ensure_migrations_table().await?;
        let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
            .fetch_one(self.pool())
            .await?;
        Ok(version.unwrap_or(0))
    }

    /// Apply every pending migration; returns the versions applied
    pub async fn migrate(&self) -> Result<Vec<i64>> {
        let current = self.schema_version().await?;
        let mut applied = Vec::new();
        for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
            let mut tx = self.pool().begin().await?;
            for statement in migration.statements {
                sqlx::query(statement).execute(&mut *tx).await?;
            }
            sqlx::query("INSERT INTO schema_migrations (version, name, applied_at) VALUES (?, ?, ?)")
                .bind(migration.version)
                .bind(migration.name)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            info!("📦 Applied migration {} ({})", migration.version, migration.name);
            applied.push(migration.version);
        }
        Ok(applied)
    }

    /// Fail unless every declared migration has been applied
    pub async fn ensure_current(&self) -> Result<()> {
        let current = self.schema_version().await?;
        let latest = latest_version();
        if current < latest {
            return Err(PipelineError::Config(format!(
                "database schema is at version {}, expected {}; run the `migrate` command",
                current, latest
            )));
        }
        if current > latest {
            return Err(PipelineError::Config(format!(
                "database schema version {} is newer than this build ({})",
                current, latest
            )));
        }
        Ok(())
    }
}
