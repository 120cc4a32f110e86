//! Daily prices and macro indicators

use super::Database;
use crate::error::Result;
use crate::types::{Bar, MacroPanel, PriceSeries};
use chrono::NaiveDate;
use sqlx::Row;

impl Database {
    /// Insert or update bars keyed on (ticker, date) in one transaction
    pub async fn upsert_bars(&self, ticker: &str, bars: &[Bar]) -> Result<u64> {
        let mut tx = self.pool().begin().await?;
        let mut written = 0;
        for bar in bars {
            let result = sqlx::query(
                r#"INSERT INTO daily_stock_prices
                    (ticker_symbol, trade_date, open_price, high_price, low_price,
                     close_price, adj_close_price, volume)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (ticker_symbol, trade_date) DO UPDATE SET
                    open_price = excluded.open_price,
                    high_price = excluded.high_price,
                    low_price = excluded.low_price,
                    close_price = excluded.close_price,
                    adj_close_price = excluded.adj_close_price,
                    volume = excluded.volume"#,
            )
            .bind(ticker)
            .bind(bar.date)
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(bar.adj_close)
            .bind(bar.volume)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }

    /// All stored bars for `ticker`, oldest first; empty if none
    pub async fn load_prices(&self, ticker: &str) -> Result<PriceSeries> {
        let rows = sqlx::query(
            r#"SELECT trade_date, open_price, high_price, low_price, close_price,
                      adj_close_price, volume
               FROM daily_stock_prices
               WHERE ticker_symbol = ?
               ORDER BY trade_date ASC"#,
        )
        .bind(ticker)
        .fetch_all(self.pool())
        .await?;

        let bars = rows
            .iter()
            .map(|row| {
                Ok(Bar {
                    date: row.try_get("trade_date")?,
                    open: row.try_get("open_price")?,
                    high: row.try_get("high_price")?,
                    low: row.try_get("low_price")?,
                    close: row.try_get("close_price")?,
                    adj_close: row.try_get("adj_close_price")?,
                    volume: row.try_get("volume")?,
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;

        PriceSeries::new(ticker, bars)
    }

    pub async fn last_trade_date(&self, ticker: &str) -> Result<Option<NaiveDate>> {
        let date: Option<NaiveDate> = sqlx::query_scalar(
            "SELECT MAX(trade_date) FROM daily_stock_prices WHERE ticker_symbol = ?",
        )
        .bind(ticker)
        .fetch_one(self.pool())
        .await?;
        Ok(date)
    }

    pub async fn price_row_count(&self, ticker: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM daily_stock_prices WHERE ticker_symbol = ?")
                .bind(ticker)
                .fetch_one(self.pool())
                .await?;
        Ok(count)
    }

    /// Distinct tickers that have at least one stored bar
    pub async fn tickers_with_prices(&self) -> Result<Vec<String>> {
        let tickers: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT ticker_symbol FROM daily_stock_prices ORDER BY ticker_symbol",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(tickers)
    }

    pub async fn delete_prices(&self, tickers: &[String]) -> Result<u64> {
        let mut tx = self.pool().begin().await?;
        let mut deleted = 0;
        for ticker in tickers {
            deleted += sqlx::query("DELETE FROM daily_stock_prices WHERE ticker_symbol = ?")
                .bind(ticker)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(deleted)
    }

    /// Insert or update observations keyed on (indicator, date)
    pub async fn upsert_macro(
        &self,
        indicator: &str,
        observations: &[(NaiveDate, f64)],
    ) -> Result<u64> {
        let mut tx = self.pool().begin().await?;
        let mut written = 0;
        for (date, value) in observations {
            written += sqlx::query(
                r#"INSERT INTO macro_economic_indicators (indicator_name, indicator_date, value)
                VALUES (?, ?, ?)
                ON CONFLICT (indicator_name, indicator_date) DO UPDATE SET value = excluded.value"#,
            )
            .bind(indicator)
            .bind(date)
            .bind(value)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }

    pub async fn load_macro_panel(&self) -> Result<MacroPanel> {
        let rows = sqlx::query(
            r#"SELECT indicator_name, indicator_date, value
               FROM macro_economic_indicators
               ORDER BY indicator_name, indicator_date"#,
        )
        .fetch_all(self.pool())
        .await?;

        let mut panel = MacroPanel::new();
        for row in rows {
            let name: String = row.try_get("indicator_name")?;
            let date: NaiveDate = row.try_get("indicator_date")?;
            let value: f64 = row.try_get("value")?;
            panel.insert(&name, date, value);
        }
        Ok(panel)
    }
}
