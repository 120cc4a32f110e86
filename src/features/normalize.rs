//! Split/dividend adjustment of raw OHLC bars

use crate::error::{PipelineError, Result};
use crate::types::{Bar, PriceSeries};
use tracing::warn;

/// Rescale open/high/low by `adj_close / close` and replace close with the
/// adjusted close. Volume is untouched.
///
/// A series without any adjusted close is passed through unscaled (degraded
/// mode, logged). A series with adjusted closes on only some rows is
/// rejected, as is a zero raw close on an adjusted row.
pub fn normalize_prices(series: &PriceSeries) -> Result<PriceSeries> {
    let bars = series.bars();
    let adjusted = bars.iter().filter(|b| b.adj_close.is_some()).count();

    if adjusted == 0 {
        if !bars.is_empty() {
            warn!(
                "{}: no adjusted close available, using raw prices",
                series.ticker()
            );
        }
        return Ok(series.clone());
    }

    if adjusted < bars.len() {
        let first_gap = bars
            .iter()
            .find(|b| b.adj_close.is_none())
            .map(|b| b.date.to_string())
            .unwrap_or_default();
        return Err(PipelineError::Data(format!(
            "{}: adjusted close missing on {} of {} rows (first {})",
            series.ticker(),
            bars.len() - adjusted,
            bars.len(),
            first_gap
        )));
    }

    let normalized = bars
        .iter()
        .map(|bar| {
            let adj = bar.adj_close.unwrap_or(bar.close);
            if bar.close == 0.0 {
                return Err(PipelineError::Data(format!(
                    "{}: zero close on {}",
                    series.ticker(),
                    bar.date
                )));
            }
            let ratio = adj / bar.close;
            Ok(Bar {
                date: bar.date,
                open: bar.open * ratio,
                high: bar.high * ratio,
                low: bar.low * ratio,
                close: adj,
                adj_close: Some(adj),
                volume: bar.volume,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    PriceSeries::new(series.ticker(), normalized)
}
