//! Forward-return classification labels

use super::builder::PRICE_COLUMN;
use crate::error::{PipelineError, Result};
use crate::frame::Frame;
use crate::types::{threshold_pct, Direction};

/// Attach `target_return_<H>d` and a 0/1 label column to `frame`.
///
/// The label is 1 when the forward return over `horizon` rows is `>= threshold`
/// (up) or `<= -threshold` (down). The last `horizon` rows have no forward
/// price and keep a null return and label; callers drop them before training.
///
/// Returns the new frame and the label column name,
/// `target_<H>d_<direction>_<pct>pct`.
pub fn build_target(
    frame: &Frame,
    horizon: usize,
    threshold: f64,
    direction: &str,
) -> Result<(Frame, String)> {
    let direction: Direction = direction.parse()?;
    if horizon == 0 {
        return Err(PipelineError::Config("horizon must be > 0".into()));
    }
    if !(threshold.is_finite() && threshold > 0.0) {
        return Err(PipelineError::Config(format!(
            "threshold must be > 0, got {}",
            threshold
        )));
    }

    let prices = frame.require(PRICE_COLUMN)?;
    let returns = forward_returns(prices, horizon);
    let labels = returns
        .iter()
        .map(|r| {
            r.map(|r| {
                let hit = match direction {
                    Direction::Up => r >= threshold,
                    Direction::Down => r <= -threshold,
                };
                if hit {
                    1.0
                } else {
                    0.0
                }
            })
        })
        .collect();

    let label_column = format!(
        "target_{}d_{}_{}pct",
        horizon,
        direction,
        threshold_pct(threshold)
    );
    let out = frame
        .clone()
        .with_column(&format!("target_return_{}d", horizon), returns)?
        .with_column(&label_column, labels)?;
    Ok((out, label_column))
}

fn forward_returns(prices: &[Option<f64>], horizon: usize) -> Vec<Option<f64>> {
    (0..prices.len())
        .map(|i| {
            let now = prices[i]?;
            let later = (*prices.get(i + horizon)?)?;
            let ret = (later - now) / now;
            ret.is_finite().then_some(ret)
        })
        .collect()
}
