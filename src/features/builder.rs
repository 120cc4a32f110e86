//! Feature matrix assembly
//!
//! Order of operations:
//! 1. auxiliary closes joined onto the target calendar
//! 2. auxiliary-derived levels/returns
//! 3. macro as-of join, forward fill of auxiliary and macro columns
//! 4. target returns, moving averages, volume change, calendar fields
//! 5. RSI, MACD, Bollinger bands, ATR
//! 6. intermediate columns dropped, close renamed to `adj_close_price`
//! 7. non-finite cells nulled, incomplete rows dropped

use super::indicators;
use super::normalize::normalize_prices;
use crate::config::FeatureConfig;
use crate::error::Result;
use crate::frame::Frame;
use crate::types::{MacroPanel, PriceSeries};
use chrono::Datelike;
use tracing::{debug, warn};

/// Name of the adjusted close column in the finished matrix
pub const PRICE_COLUMN: &str = "adj_close_price";

/// Build the feature matrix for `target`.
///
/// `target` may be raw; it is normalized first. An empty target yields an
/// empty frame.
pub fn build_features(
    target: &PriceSeries,
    auxiliaries: &[PriceSeries],
    macro_panel: &MacroPanel,
    config: &FeatureConfig,
) -> Result<Frame> {
    if target.is_empty() {
        return Ok(Frame::default());
    }
    let prices = normalize_prices(target)?;
    let mut frame = base_frame(&prices)?;

    let mut carried = Vec::new();
    let mut intermediates = Vec::new();

    for aux in auxiliaries {
        if aux.is_empty() {
            warn!("auxiliary series {} is empty, skipping", aux.ticker());
            continue;
        }
        let safe = aux.ticker().replace('^', "");
        let join_column = format!("{}_close", safe);
        let aligned = frame.align(&aux.dates(), &aux.closes());
        frame.set_column(&join_column, aligned.clone())?;
        intermediates.push(join_column);

        let prefix = safe.to_lowercase();
        if config.volatility_tickers.iter().any(|t| t == aux.ticker()) {
            let name = format!("{}_price", prefix);
            frame.set_column(&name, aligned)?;
            carried.push(name);
        } else {
            for &lag in &config.lag_days {
                let name = format!("{}_return_{}d", prefix, lag);
                frame.set_column(&name, indicators::pct_change(&aligned, lag))?;
                carried.push(name);
            }
        }
    }

    let mut frame = merge_macro(&frame, macro_panel)?;
    carried.extend(macro_panel.indicators().map(|s| s.to_string()));
    frame.forward_fill(&carried);

    add_price_features(&mut frame, config)?;
    add_indicators(&mut frame, config)?;

    for name in &intermediates {
        frame.drop_column(name);
    }
    frame.rename_column("close", PRICE_COLUMN)?;
    frame.replace_non_finite();

    let clean = frame.drop_incomplete_rows();
    debug!(
        "{}: {} feature rows ({} dropped), {} columns",
        target.ticker(),
        clean.len(),
        frame.len() - clean.len(),
        clean.column_names().len()
    );
    Ok(clean)
}

/// As-of join of every macro indicator onto the frame's calendar.
///
/// The value on date `t` is the newest observation dated `<= t`; dates
/// before the first observation stay null. Merging the same panel twice
/// gives the same frame.
pub fn merge_macro(frame: &Frame, macro_panel: &MacroPanel) -> Result<Frame> {
    let mut out = frame.clone();
    for indicator in macro_panel.indicators() {
        let values = frame
            .index()
            .iter()
            .map(|d| macro_panel.as_of(indicator, *d))
            .collect();
        out.set_column(indicator, values)?;
    }
    Ok(out)
}

fn base_frame(prices: &PriceSeries) -> Result<Frame> {
    let bars = prices.bars();
    Frame::new(prices.dates())
        .with_column("open", bars.iter().map(|b| Some(b.open)).collect())?
        .with_column("high", bars.iter().map(|b| Some(b.high)).collect())?
        .with_column("low", bars.iter().map(|b| Some(b.low)).collect())?
        .with_column("close", bars.iter().map(|b| Some(b.close)).collect())?
        .with_column("volume", bars.iter().map(|b| Some(b.volume)).collect())
}

fn add_price_features(frame: &mut Frame, config: &FeatureConfig) -> Result<()> {
    let close = frame.require("close")?.to_vec();
    let volume = frame.require("volume")?.to_vec();

    for &lag in &config.lag_days {
        frame.set_column(
            &format!("return_{}d", lag),
            indicators::pct_change(&close, lag),
        )?;
    }

    for &period in &config.ma_periods {
        let sma = indicators::sma(&close, period);
        let ratio = close
            .iter()
            .zip(&sma)
            .map(|(c, s)| Some(((*c)? - (*s)?) / (*s)?))
            .collect();
        frame.set_column(&format!("SMA_{}", period), sma)?;
        frame.set_column(&format!("SMA_diff_ratio_{}", period), ratio)?;
    }

    frame.set_column("volume_change", indicators::pct_change(&volume, 1))?;

    let dates = frame.index().to_vec();
    frame.set_column(
        "day_of_week",
        dates
            .iter()
            .map(|d| Some(d.weekday().num_days_from_monday() as f64))
            .collect(),
    )?;
    frame.set_column("month", dates.iter().map(|d| Some(d.month() as f64)).collect())?;
    frame.set_column("year", dates.iter().map(|d| Some(d.year() as f64)).collect())?;
    Ok(())
}

fn add_indicators(frame: &mut Frame, config: &FeatureConfig) -> Result<()> {
    let high = frame.require("high")?.to_vec();
    let low = frame.require("low")?.to_vec();
    let close = frame.require("close")?.to_vec();

    frame.set_column(
        &format!("RSI_{}", config.rsi_period),
        indicators::rsi(&close, config.rsi_period),
    )?;

    let suffix = format!(
        "{}_{}_{}",
        config.macd_fast, config.macd_slow, config.macd_signal
    );
    let macd = indicators::macd(&close, config.macd_fast, config.macd_slow, config.macd_signal);
    frame.set_column(&format!("MACD_{}", suffix), macd.line)?;
    frame.set_column(&format!("MACDh_{}", suffix), macd.histogram)?;
    frame.set_column(&format!("MACDs_{}", suffix), macd.signal)?;

    let suffix = format!("{}_{:.1}", config.bollinger_period, config.bollinger_std);
    let bands = indicators::bollinger(&close, config.bollinger_period, config.bollinger_std);
    frame.set_column(&format!("BBL_{}", suffix), bands.lower)?;
    frame.set_column(&format!("BBM_{}", suffix), bands.middle)?;
    frame.set_column(&format!("BBU_{}", suffix), bands.upper)?;
    frame.set_column(&format!("BBB_{}", suffix), bands.bandwidth)?;
    frame.set_column(&format!("BBP_{}", suffix), bands.percent)?;

    frame.set_column(
        &format!("ATR_{}", config.atr_period),
        indicators::atr(&high, &low, &close, config.atr_period),
    )?;
    Ok(())
}
