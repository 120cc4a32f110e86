//! Market and macroeconomic data ingestion
//!
//! - `yahoo`: daily OHLCV with adjusted close
//! - `fred`: economic series at native frequency
//! - `quality`: checks run on every fetched batch before it is stored
//!
//! Fetches are incremental: a ticker with stored bars is re-fetched from its
//! newest date minus `lookback_days`, an unknown ticker from `history_years` ago.

mod fred;
pub mod quality;
mod yahoo;

pub use fred::FredClient;
pub use yahoo::YahooClient;

use crate::config::{MacroDataConfig, MarketDataConfig};
use crate::error::{PipelineError, Result};
use crate::storage::Database;
use crate::types::Bar;
use async_trait::async_trait;
use chrono::{Duration, Months, NaiveDate};
use tracing::{error, info, warn};

/// Source of daily bars
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Bars dated in `[start, end)`
    async fn fetch_daily(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<Bar>>;
}

/// Source of macroeconomic observations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MacroFeed: Send + Sync {
    async fn fetch_series(&self, series_id: &str, start: NaiveDate) -> Result<Vec<(NaiveDate, f64)>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub updated: Vec<String>,
    pub empty: Vec<String>,
    pub failed: Vec<String>,
    pub rows: u64,
}

/// First date to request for a ticker given its newest stored bar
pub fn fetch_start(last_stored: Option<NaiveDate>, today: NaiveDate, cfg: &MarketDataConfig) -> NaiveDate {
    match last_stored {
        Some(last) => last - Duration::days(cfg.lookback_days.max(0)),
        None => today
            .checked_sub_months(Months::new(12 * cfg.history_years.max(1) as u32))
            .unwrap_or(today),
    }
}

/// Fetch, check and store bars for each ticker.
///
/// A failure on one ticker is logged and recorded; the rest still run.
pub async fn update_prices(
    db: &Database,
    feed: &dyn PriceFeed,
    cfg: &MarketDataConfig,
    tickers: &[String],
    today: NaiveDate,
) -> Result<UpdateSummary> {
    let mut summary = UpdateSummary::default();
    let end = today + Duration::days(1);

    for (i, ticker) in tickers.iter().enumerate() {
        if i > 0 && cfg.request_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(cfg.request_delay_ms)).await;
        }
        let last = db.last_trade_date(ticker).await?;
        let start = fetch_start(last, today, cfg);
        info!("📥 {}: fetching from {}", ticker, start);

        let bars = match feed.fetch_daily(ticker, start, end).await {
            Ok(bars) => bars,
            Err(e) => {
                error!("❌ {}: fetch failed: {}", ticker, e);
                summary.failed.push(ticker.clone());
                continue;
            }
        };
        let bars = match quality::check_bars(ticker, bars, cfg.max_daily_move) {
            Ok(bars) => bars,
            Err(e) => {
                error!("❌ {}: rejected: {}", ticker, e);
                summary.failed.push(ticker.clone());
                continue;
            }
        };
        if bars.is_empty() {
            warn!("⚠️ {}: no data returned", ticker);
            summary.empty.push(ticker.clone());
            continue;
        }
        let written = db.upsert_bars(ticker, &bars).await?;
        info!("✅ {}: stored {} bars", ticker, written);
        summary.rows += written;
        summary.updated.push(ticker.clone());
    }
    Ok(summary)
}

/// Fetch every configured series and store it under its indicator name
pub async fn update_macro(
    db: &Database,
    feed: &dyn MacroFeed,
    cfg: &MacroDataConfig,
) -> Result<UpdateSummary> {
    let start = NaiveDate::parse_from_str(&cfg.start_date, "%Y-%m-%d").map_err(|e| {
        PipelineError::Config(format!(
            "macro_data.start_date '{}' is not a date: {}",
            cfg.start_date, e
        ))
    })?;
    let mut summary = UpdateSummary::default();
    for (series_id, name) in &cfg.series {
        match feed.fetch_series(series_id, start).await {
            Ok(obs) if obs.is_empty() => {
                warn!("⚠️ {} ({}): no observations", name, series_id);
                summary.empty.push(name.clone());
            }
            Ok(obs) => {
                let written = db.upsert_macro(name, &obs).await?;
                info!("✅ {} ({}): stored {} observations", name, series_id, written);
                summary.rows += written;
                summary.updated.push(name.clone());
            }
            Err(e) => {
                error!("❌ {} ({}): fetch failed: {}", name, series_id, e);
                summary.failed.push(name.clone());
            }
        }
    }
    Ok(summary)
}
