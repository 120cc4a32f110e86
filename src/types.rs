//! Core data types shared across the pipeline

use crate::error::{PipelineError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// One daily OHLCV bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Split/dividend adjusted close, when the source provides one
    pub adj_close: Option<f64>,
    pub volume: f64,
}

/// Daily bars for one ticker, strictly increasing by date
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    ticker: String,
    bars: Vec<Bar>,
}

impl PriceSeries {
    /// Build a series; dates must be unique and strictly increasing
    pub fn new(ticker: impl Into<String>, bars: Vec<Bar>) -> Result<Self> {
        let ticker = ticker.into();
        if let Some(w) = bars.windows(2).find(|w| w[1].date <= w[0].date) {
            return Err(PipelineError::Data(format!(
                "{}: dates not strictly increasing at {} -> {}",
                ticker, w[0].date, w[1].date
            )));
        }
        Ok(Self { ticker, bars })
    }

    pub fn empty(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            bars: Vec::new(),
        }
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.bars.iter().map(|b| b.date).collect()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.bars.first().map(|b| b.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.bars.last().map(|b| b.date)
    }

    /// Adjusted close, falling back to the raw close
    pub fn closes(&self) -> Vec<Option<f64>> {
        self.bars
            .iter()
            .map(|b| Some(b.adj_close.unwrap_or(b.close)))
            .collect()
    }
}

/// Sparse macroeconomic indicators at native frequency
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MacroPanel {
    series: BTreeMap<String, Vec<(NaiveDate, f64)>>,
}

impl MacroPanel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an observation; later inserts for the same date win
    pub fn insert(&mut self, indicator: &str, date: NaiveDate, value: f64) {
        let obs = self.series.entry(indicator.to_string()).or_default();
        match obs.binary_search_by_key(&date, |(d, _)| *d) {
            Ok(i) => obs[i].1 = value,
            Err(i) => obs.insert(i, (date, value)),
        }
    }

    pub fn indicators(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(|k| k.as_str())
    }

    pub fn observations(&self, indicator: &str) -> &[(NaiveDate, f64)] {
        self.series.get(indicator).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.series.values().all(|v| v.is_empty())
    }

    /// Latest observation dated on or before `date`
    pub fn as_of(&self, indicator: &str, date: NaiveDate) -> Option<f64> {
        let obs = self.observations(indicator);
        let idx = obs.partition_point(|(d, _)| *d <= date);
        if idx == 0 {
            None
        } else {
            Some(obs[idx - 1].1)
        }
    }
}

/// Direction of the predicted move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Up, Direction::Down];

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            other => Err(PipelineError::Config(format!(
                "direction must be 'up' or 'down', got '{}'",
                other
            ))),
        }
    }
}

/// Threshold expressed as whole percent, used in column and model names
pub fn threshold_pct(threshold: f64) -> i64 {
    (threshold * 100.0).round() as i64
}

/// Stored model name for a horizon/direction/threshold combination
pub fn model_name(horizon: usize, direction: Direction, threshold: f64) -> String {
    format!(
        "GBDT_{}d_{}_{}pct",
        horizon,
        direction,
        threshold_pct(threshold)
    )
}

/// Add `days` business days (Mon-Fri) to `date`
pub fn add_business_days(date: NaiveDate, days: usize) -> NaiveDate {
    use chrono::{Datelike, Weekday};
    let mut current = date;
    let mut remaining = days;
    while remaining > 0 {
        current = match current.succ_opt() {
            Some(next) => next,
            None => break,
        };
        if !matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
            remaining -= 1;
        }
    }
    current
}
