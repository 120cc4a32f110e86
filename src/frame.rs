//! Date-indexed table of named numeric columns
//!
//! `Frame` is the feature matrix: one row per date, columns in insertion
//! order, cells nullable. Every transformation returns a new value or mutates
//! a frame the caller owns; nothing is shared.

use crate::error::{PipelineError, Result};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::ops::Range;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    index: Vec<NaiveDate>,
    names: Vec<String>,
    columns: Vec<Vec<Option<f64>>>,
}

impl Frame {
    /// Empty frame over the given (strictly increasing) dates
    pub fn new(index: Vec<NaiveDate>) -> Self {
        Self {
            index,
            names: Vec::new(),
            columns: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index(&self) -> &[NaiveDate] {
        &self.index
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.position(name).map(|i| self.columns[i].as_slice())
    }

    /// Column lookup that fails with a data error naming the column
    pub fn require(&self, name: &str) -> Result<&[Option<f64>]> {
        self.column(name)
            .ok_or_else(|| PipelineError::Data(format!("missing column '{}'", name)))
    }

    /// Insert or replace a column; replacing keeps its position
    pub fn set_column(&mut self, name: &str, values: Vec<Option<f64>>) -> Result<()> {
        if values.len() != self.index.len() {
            return Err(PipelineError::Data(format!(
                "column '{}' has {} values for {} rows",
                name,
                values.len(),
                self.index.len()
            )));
        }
        match self.position(name) {
            Some(i) => self.columns[i] = values,
            None => {
                self.names.push(name.to_string());
                self.columns.push(values);
            }
        }
        Ok(())
    }

    pub fn with_column(mut self, name: &str, values: Vec<Option<f64>>) -> Result<Self> {
        self.set_column(name, values)?;
        Ok(self)
    }

    pub fn drop_column(&mut self, name: &str) {
        if let Some(i) = self.position(name) {
            self.names.remove(i);
            self.columns.remove(i);
        }
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<()> {
        if !self.has_column(from) {
            return Err(PipelineError::Data(format!("missing column '{}'", from)));
        }
        if from == to {
            return Ok(());
        }
        self.drop_column(to);
        if let Some(i) = self.position(from) {
            self.names[i] = to.to_string();
        }
        Ok(())
    }

    /// Align a dated series onto this frame's index (left join on date)
    pub fn align(&self, dates: &[NaiveDate], values: &[Option<f64>]) -> Vec<Option<f64>> {
        let lookup: HashMap<NaiveDate, Option<f64>> =
            dates.iter().copied().zip(values.iter().copied()).collect();
        self.index
            .iter()
            .map(|d| lookup.get(d).copied().flatten())
            .collect()
    }

    /// Carry the last non-null value forward; leading nulls stay null
    pub fn forward_fill(&mut self, names: &[String]) {
        for name in names {
            if let Some(i) = self.position(name) {
                self.columns[i] = forward_filled(&self.columns[i]);
            }
        }
    }

    /// NaN and infinities become null
    pub fn replace_non_finite(&mut self) {
        for col in &mut self.columns {
            for cell in col.iter_mut() {
                if matches!(cell, Some(v) if !v.is_finite()) {
                    *cell = None;
                }
            }
        }
    }

    /// Keep only rows where every column has a value
    pub fn drop_incomplete_rows(&self) -> Frame {
        self.keep_rows(|i| self.columns.iter().all(|c| c[i].is_some()))
    }

    /// Keep only rows where `name` has a value
    pub fn drop_rows_missing(&self, name: &str) -> Result<Frame> {
        let col = self.require(name)?;
        Ok(self.keep_rows(|i| col[i].is_some()))
    }

    /// Keep rows whose date satisfies `pred`
    pub fn filter_dates(&self, pred: impl Fn(NaiveDate) -> bool) -> Frame {
        self.keep_rows(|i| pred(self.index[i]))
    }

    pub fn slice(&self, range: Range<usize>) -> Frame {
        let range = range.start.min(self.len())..range.end.min(self.len());
        Frame {
            index: self.index[range.clone()].to_vec(),
            names: self.names.clone(),
            columns: self
                .columns
                .iter()
                .map(|c| c[range.clone()].to_vec())
                .collect(),
        }
    }

    /// Subset of columns in the requested order
    pub fn select(&self, names: &[String]) -> Result<Frame> {
        let mut out = Frame::new(self.index.clone());
        for name in names {
            let values = self.require(name)?.to_vec();
            out.names.push(name.clone());
            out.columns.push(values);
        }
        Ok(out)
    }

    /// Dense row-major matrix of the requested columns; a null is an error
    pub fn to_rows(&self, names: &[String]) -> Result<Vec<Vec<f64>>> {
        let cols = names
            .iter()
            .map(|n| self.require(n))
            .collect::<Result<Vec<_>>>()?;
        (0..self.len())
            .map(|i| {
                cols.iter()
                    .zip(names)
                    .map(|(c, n)| {
                        c[i].ok_or_else(|| {
                            PipelineError::Data(format!(
                                "null '{}' on {}",
                                n, self.index[i]
                            ))
                        })
                    })
                    .collect()
            })
            .collect()
    }

    fn keep_rows(&self, keep: impl Fn(usize) -> bool) -> Frame {
        let rows: Vec<usize> = (0..self.len()).filter(|&i| keep(i)).collect();
        Frame {
            index: rows.iter().map(|&i| self.index[i]).collect(),
            names: self.names.clone(),
            columns: self
                .columns
                .iter()
                .map(|c| rows.iter().map(|&i| c[i]).collect())
                .collect(),
        }
    }
}

pub(crate) fn forward_filled(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut last = None;
    values
        .iter()
        .map(|v| {
            if v.is_some() {
                last = *v;
            }
            last
        })
        .collect()
}
