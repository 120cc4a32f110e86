//! Ticker registries: prediction targets, company info, evaluation universe

use super::Database;
use crate::error::Result;
use chrono::{DateTime, NaiveDate, Utc};

/// A ticker scheduled for prediction with its auxiliary feature tickers
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct TargetTicker {
    pub ticker_symbol: String,
    /// Comma-separated auxiliary tickers
    pub features: String,
    pub added_at: DateTime<Utc>,
}

impl TargetTicker {
    pub fn feature_tickers(&self) -> Vec<String> {
        split_features(&self.features)
    }
}

pub(crate) fn split_features(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct StockInfo {
    pub ticker_symbol: String,
    pub company_name: Option<String>,
    pub market_segment: Option<String>,
    pub industry: Option<String>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct MarketListEntry {
    pub ticker_symbol: String,
    pub company_name: Option<String>,
    pub market_segment: Option<String>,
    pub industry: Option<String>,
    pub load_date: NaiveDate,
}

impl Database {
    pub async fn list_target_tickers(&self) -> Result<Vec<TargetTicker>> {
        let rows = sqlx::query_as::<_, TargetTicker>(
            "SELECT ticker_symbol, features, added_at FROM target_tickers ORDER BY ticker_symbol",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    pub async fn get_target_ticker(&self, ticker: &str) -> Result<Option<TargetTicker>> {
        let row = sqlx::query_as::<_, TargetTicker>(
            "SELECT ticker_symbol, features, added_at FROM target_tickers WHERE ticker_symbol = ?",
        )
        .bind(ticker)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    /// Add a target ticker or replace its feature list
    pub async fn upsert_target_ticker(&self, ticker: &str, features: &[String]) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO target_tickers (ticker_symbol, features, added_at) VALUES (?, ?, ?)
            ON CONFLICT (ticker_symbol) DO UPDATE SET features = excluded.features"#,
        )
        .bind(ticker)
        .bind(features.join(","))
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Returns false when the ticker was not registered
    pub async fn remove_target_ticker(&self, ticker: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM target_tickers WHERE ticker_symbol = ?")
            .bind(ticker)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn upsert_stock_info(&self, info: &StockInfo) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO stock_info (ticker_symbol, company_name, market_segment, industry, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (ticker_symbol) DO UPDATE SET
                company_name = COALESCE(excluded.company_name, stock_info.company_name),
                market_segment = COALESCE(excluded.market_segment, stock_info.market_segment),
                industry = COALESCE(excluded.industry, stock_info.industry),
                updated_at = excluded.updated_at"#,
        )
        .bind(&info.ticker_symbol)
        .bind(&info.company_name)
        .bind(&info.market_segment)
        .bind(&info.industry)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_stock_info(&self, ticker: &str) -> Result<Option<StockInfo>> {
        let row = sqlx::query_as::<_, StockInfo>(
            r#"SELECT ticker_symbol, company_name, market_segment, industry
               FROM stock_info WHERE ticker_symbol = ?"#,
        )
        .bind(ticker)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    /// Replace the evaluation universe in one transaction
    pub async fn replace_market_list(&self, entries: &[MarketListEntry]) -> Result<u64> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM market_list").execute(&mut *tx).await?;
        let mut inserted = 0;
        for e in entries {
            inserted += sqlx::query(
                r#"INSERT INTO market_list
                    (ticker_symbol, company_name, market_segment, industry, load_date)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT (ticker_symbol) DO NOTHING"#,
            )
            .bind(&e.ticker_symbol)
            .bind(&e.company_name)
            .bind(&e.market_segment)
            .bind(&e.industry)
            .bind(e.load_date)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn market_list(&self) -> Result<Vec<MarketListEntry>> {
        let rows = sqlx::query_as::<_, MarketListEntry>(
            r#"SELECT ticker_symbol, company_name, market_segment, industry, load_date
               FROM market_list ORDER BY ticker_symbol"#,
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }
}
