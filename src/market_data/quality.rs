//! Data-quality gates applied to freshly fetched bars

use crate::error::{PipelineError, Result};
use crate::types::Bar;
use tracing::warn;

/// Clean a fetched batch before it is stored.
///
/// Rows with a non-finite open/high/low/close are dropped and duplicate dates
/// keep the last row. A batch whose adjusted close is missing on every row is
/// rejected; isolated gaps and daily moves above `max_daily_move` are logged.
pub fn check_bars(ticker: &str, bars: Vec<Bar>, max_daily_move: f64) -> Result<Vec<Bar>> {
    let fetched = bars.len();
    let mut clean: Vec<Bar> = bars
        .into_iter()
        .filter(|b| [b.open, b.high, b.low, b.close].iter().all(|v| v.is_finite()))
        .map(|mut b| {
            if !b.volume.is_finite() {
                b.volume = 0.0;
            }
            if b.adj_close.is_some_and(|v| !v.is_finite()) {
                b.adj_close = None;
            }
            b
        })
        .collect();
    clean.sort_by_key(|b| b.date);
    clean.dedup_by(|later, earlier| {
        if later.date == earlier.date {
            std::mem::swap(later, earlier);
            true
        } else {
            false
        }
    });

    if clean.len() < fetched {
        warn!(
            "⚠️ {}: dropped {} incomplete or duplicate rows",
            ticker,
            fetched - clean.len()
        );
    }
    if clean.is_empty() {
        return Ok(clean);
    }

    let missing = clean.iter().filter(|b| b.adj_close.is_none()).count();
    if missing == clean.len() {
        return Err(PipelineError::Data(format!(
            "{}: adjusted close missing on every row",
            ticker
        )));
    }
    if missing > 0 {
        warn!("⚠️ {}: adjusted close missing on {} rows", ticker, missing);
    }

    let mut previous: Option<f64> = None;
    for bar in &clean {
        if let Some(adj) = bar.adj_close {
            if let Some(prev) = previous {
                if prev != 0.0 {
                    let change = (adj / prev - 1.0).abs();
                    if change > max_daily_move {
                        warn!(
                            "⚠️ {}: {:.1}% move on {}, possible split",
                            ticker,
                            change * 100.0,
                            bar.date
                        );
                    }
                }
            }
            previous = Some(adj);
        }
    }
    Ok(clean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(day: u32, close: f64, adj: Option<f64>) -> Bar {
        Bar {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            adj_close: adj,
            volume: 10.0,
        }
    }

    #[test]
    fn test_all_missing_adjusted_close_rejected() {
        let bars = vec![bar(2, 10.0, None), bar(3, 11.0, None)];
        assert!(check_bars("X", bars, 0.5).is_err());
    }

    #[test]
    fn test_partial_gaps_and_big_moves_pass() {
        let bars = vec![bar(2, 10.0, Some(10.0)), bar(3, 30.0, None), bar(4, 30.0, Some(30.0))];
        let clean = check_bars("X", bars, 0.5).unwrap();
        assert_eq!(clean.len(), 3);
    }

    #[test]
    fn test_drops_non_finite_and_duplicates() {
        let bars = vec![
            bar(2, 10.0, Some(10.0)),
            bar(3, f64::NAN, Some(10.0)),
            bar(4, 11.0, Some(11.0)),
            bar(4, 12.0, Some(12.0)),
        ];
        let clean = check_bars("X", bars, 0.5).unwrap();
        assert_eq!(clean.len(), 2);
        assert_eq!(clean[1].close, 12.0);
    }

    #[test]
    fn test_empty_batch_is_ok() {
        assert!(check_bars("X", Vec::new(), 0.5).unwrap().is_empty());
    }
}
