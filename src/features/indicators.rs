//! Causal technical indicators over nullable daily series
//!
//! Every function returns a vector aligned with its input; position `i`
//! only ever depends on inputs at positions `<= i`. Positions without
//! enough history are `None`.

use crate::frame::forward_filled;

/// Percentage change over `periods` rows; gaps are padded forward first
pub fn pct_change(values: &[Option<f64>], periods: usize) -> Vec<Option<f64>> {
    let padded = forward_filled(values);
    (0..padded.len())
        .map(|i| {
            if i < periods {
                return None;
            }
            match (padded[i], padded[i - periods]) {
                (Some(cur), Some(prev)) => Some(cur / prev - 1.0),
                _ => None,
            }
        })
        .collect()
}

/// Simple moving average; a window containing a null yields null
pub fn sma(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    rolling(values, window, |w| w.iter().sum::<f64>() / w.len() as f64)
}

/// Rolling population standard deviation
pub fn rolling_std(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    rolling(values, window, |w| {
        let mean = w.iter().sum::<f64>() / w.len() as f64;
        let var = w.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / w.len() as f64;
        var.sqrt()
    })
}

fn rolling(
    values: &[Option<f64>],
    window: usize,
    f: impl Fn(&[f64]) -> f64,
) -> Vec<Option<f64>> {
    let mut buf = Vec::with_capacity(window);
    (0..values.len())
        .map(|i| {
            if window == 0 || i + 1 < window {
                return None;
            }
            buf.clear();
            for v in &values[i + 1 - window..=i] {
                buf.push((*v)?);
            }
            Some(f(&buf))
        })
        .collect()
}

/// Exponential smoothing seeded with the mean of the first `period` values.
///
/// `alpha` is the weight of the newest value. Nulls after the seed yield null
/// and leave the running state untouched.
fn smoothed(values: &[Option<f64>], period: usize, alpha: f64) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 {
        return out;
    }
    let Some(start) = values.iter().position(|v| v.is_some()) else {
        return out;
    };
    let seed_end = start + period;
    if seed_end > values.len() {
        return out;
    }
    let seed: Option<Vec<f64>> = values[start..seed_end].iter().copied().collect();
    let Some(seed) = seed else {
        return out;
    };
    let mut state = seed.iter().sum::<f64>() / period as f64;
    out[seed_end - 1] = Some(state);
    for i in seed_end..values.len() {
        if let Some(v) = values[i] {
            state += alpha * (v - state);
            out[i] = Some(state);
        }
    }
    out
}

/// EMA with multiplier 2/(n+1)
pub fn ema(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    smoothed(values, period, 2.0 / (period as f64 + 1.0))
}

/// Wilder's moving average (alpha 1/n)
pub fn wilder(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    smoothed(values, period, 1.0 / period as f64)
}

/// Relative strength index in [0, 100] using Wilder smoothing.
///
/// Zero average loss gives 100; a window with no movement at all gives 50.
pub fn rsi(closes: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let n = closes.len();
    let mut gains = vec![None; n];
    let mut losses = vec![None; n];
    for i in 1..n {
        if let (Some(cur), Some(prev)) = (closes[i], closes[i - 1]) {
            let change = cur - prev;
            gains[i] = Some(change.max(0.0));
            losses[i] = Some((-change).max(0.0));
        }
    }
    let avg_gain = wilder(&gains, period);
    let avg_loss = wilder(&losses, period);
    avg_gain
        .iter()
        .zip(&avg_loss)
        .map(|(g, l)| match (g, l) {
            (Some(g), Some(l)) => {
                if *l == 0.0 {
                    Some(if *g == 0.0 { 50.0 } else { 100.0 })
                } else {
                    let rs = g / l;
                    Some(100.0 - 100.0 / (1.0 + rs))
                }
            }
            _ => None,
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct Macd {
    pub line: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
    pub histogram: Vec<Option<f64>>,
}

pub fn macd(closes: &[Option<f64>], fast: usize, slow: usize, signal: usize) -> Macd {
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);
    let line: Vec<Option<f64>> = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| Some((*f)? - (*s)?))
        .collect();
    let signal_line = ema(&line, signal);
    let histogram = line
        .iter()
        .zip(&signal_line)
        .map(|(l, s)| Some((*l)? - (*s)?))
        .collect();
    Macd {
        line,
        signal: signal_line,
        histogram,
    }
}

#[derive(Debug, Clone)]
pub struct Bollinger {
    pub lower: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub upper: Vec<Option<f64>>,
    /// (upper - lower) / middle, in percent
    pub bandwidth: Vec<Option<f64>>,
    /// (close - lower) / (upper - lower)
    pub percent: Vec<Option<f64>>,
}

pub fn bollinger(closes: &[Option<f64>], period: usize, num_std: f64) -> Bollinger {
    let middle = sma(closes, period);
    let std = rolling_std(closes, period);
    let n = closes.len();
    let mut lower = vec![None; n];
    let mut upper = vec![None; n];
    let mut bandwidth = vec![None; n];
    let mut percent = vec![None; n];
    for i in 0..n {
        if let (Some(mid), Some(sd), Some(close)) = (middle[i], std[i], closes[i]) {
            let lo = mid - num_std * sd;
            let hi = mid + num_std * sd;
            lower[i] = Some(lo);
            upper[i] = Some(hi);
            // zero-width bands and zero means surface as non-finite
            bandwidth[i] = Some((hi - lo) / mid * 100.0);
            percent[i] = Some((close - lo) / (hi - lo));
        }
    }
    Bollinger {
        lower,
        middle,
        upper,
        bandwidth,
        percent,
    }
}

/// Average true range with Wilder smoothing
pub fn atr(
    highs: &[Option<f64>],
    lows: &[Option<f64>],
    closes: &[Option<f64>],
    period: usize,
) -> Vec<Option<f64>> {
    let n = closes.len();
    let mut true_range = vec![None; n];
    for i in 0..n {
        let (Some(h), Some(l)) = (highs[i], lows[i]) else {
            continue;
        };
        let range = h - l;
        true_range[i] = Some(match i.checked_sub(1).and_then(|p| closes[p]) {
            Some(prev) => range.max((h - prev).abs()).max((l - prev).abs()),
            None => range,
        });
    }
    wilder(&true_range, period)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().map(|v| Some(*v)).collect()
    }

    #[test]
    fn test_sma_of_last_five() {
        let prices: Vec<f64> = (100..200).map(|v| v as f64).collect();
        let out = sma(&series(&prices), 5);
        assert!(out[3].is_none());
        assert_eq!(out[4], Some(102.0));
        assert_eq!(out[99], Some(197.0));
    }

    #[test]
    fn test_sma_null_window() {
        let out = sma(&[Some(1.0), None, Some(3.0), Some(5.0)], 2);
        assert_eq!(out, vec![None, None, None, Some(4.0)]);
    }

    #[test]
    fn test_pct_change_pads_gaps() {
        let out = pct_change(&[Some(100.0), None, Some(110.0)], 1);
        assert_eq!(out[0], None);
        assert_eq!(out[1], Some(0.0));
        assert!((out[2].unwrap() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_rsi_monotonic_increase_is_100() {
        let prices: Vec<f64> = (0..40).map(|v| 50.0 + v as f64).collect();
        let out = rsi(&series(&prices), 14);
        assert!(out[13].is_none());
        for v in out.iter().skip(14) {
            assert_eq!(*v, Some(100.0));
        }
    }

    #[test]
    fn test_rsi_monotonic_decrease_is_0() {
        let prices: Vec<f64> = (0..40).map(|v| 100.0 - v as f64).collect();
        let out = rsi(&series(&prices), 14);
        assert_eq!(out[39], Some(0.0));
    }

    #[test]
    fn test_rsi_flat_is_neutral() {
        let out = rsi(&series(&[10.0; 30]), 14);
        assert_eq!(out[29], Some(50.0));
    }

    #[test]
    fn test_rsi_within_bounds() {
        let prices: Vec<f64> = (0..200)
            .map(|i| 100.0 + 10.0 * ((i as f64) * 0.3).sin())
            .collect();
        for v in rsi(&series(&prices), 14).into_iter().flatten() {
            assert!((0.0..=100.0).contains(&v));
        }
    }

    #[test]
    fn test_ema_constant_series() {
        let out = ema(&series(&[5.0; 30]), 12);
        assert!(out[10].is_none());
        assert_eq!(out[11], Some(5.0));
        assert_eq!(out[29], Some(5.0));
    }

    #[test]
    fn test_ema_seed_is_sma() {
        let out = ema(&series(&[1.0, 2.0, 3.0, 4.0]), 3);
        assert_eq!(out[2], Some(2.0));
        // 2 + 0.5 * (4 - 2)
        assert_eq!(out[3], Some(3.0));
    }

    #[test]
    fn test_macd_trending_up_is_positive() {
        let prices: Vec<f64> = (0..80).map(|v| 100.0 + v as f64).collect();
        let m = macd(&series(&prices), 12, 26, 9);
        assert!(m.line[24].is_none());
        assert!(m.line[25].unwrap() > 0.0);
        assert!(m.signal[32].is_none());
        assert!(m.signal[33].is_some());
        assert!(m.histogram[79].is_some());
    }

    #[test]
    fn test_bollinger_is_symmetric() {
        let prices: Vec<f64> = (0..30).map(|i| 100.0 + (i % 3) as f64).collect();
        let b = bollinger(&series(&prices), 20, 2.0);
        let (lo, mid, hi) = (b.lower[29].unwrap(), b.middle[29].unwrap(), b.upper[29].unwrap());
        assert!(((hi - mid) - (mid - lo)).abs() < 1e-9);
        let pct = b.percent[29].unwrap();
        assert!((0.0..=1.0).contains(&pct));
    }

    #[test]
    fn test_atr_constant_range() {
        let n = 30;
        let highs = series(&vec![11.0; n]);
        let lows = series(&vec![9.0; n]);
        let closes = series(&vec![10.0; n]);
        let out = atr(&highs, &lows, &closes, 14);
        assert!(out[12].is_none());
        assert_eq!(out[13], Some(2.0));
        assert_eq!(out[29], Some(2.0));
    }
}
