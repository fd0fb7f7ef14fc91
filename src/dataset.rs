//! In-memory tabular value produced by parsing and consumed by the
//! synthesizer.
//!
//! A [`Dataset`] owns an ordered list of unique column names and a list of
//! rows. Every row carries exactly one [`Value`] per column; the
//! constructor pads short rows with nulls and rejects rows that are wider
//! than the header.

use std::collections::HashSet;

use crate::{
    data::Value,
    error::{Error, Result},
};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// Value-level classification of one column, before any storage type is
/// chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Temporal,
    Numeric,
    Text,
    /// No non-missing value was seen.
    Empty,
}

impl Dataset {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if !seen.insert(column.as_str()) {
                return Err(Error::Parse(format!("Duplicate column name '{column}'")));
            }
        }
        let width = columns.len();
        let mut normalized = Vec::with_capacity(rows.len());
        for (idx, mut row) in rows.into_iter().enumerate() {
            if row.len() > width {
                return Err(Error::Parse(format!(
                    "Row {} has {} field(s) but the header declares {}",
                    idx + 1,
                    row.len(),
                    width
                )));
            }
            row.resize(width, Value::Null);
            normalized.push(row);
        }
        Ok(Self {
            columns,
            rows: normalized,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = &Value> {
        self.rows.iter().map(move |row| &row[idx])
    }

    pub fn column_kind(&self, idx: usize) -> ValueKind {
        let mut kind = ValueKind::Empty;
        for value in self.column_values(idx).filter(|v| !v.is_missing()) {
            let observed = if value.is_temporal() {
                ValueKind::Temporal
            } else if value.is_numeric() {
                ValueKind::Numeric
            } else {
                return ValueKind::Text;
            };
            kind = match kind {
                ValueKind::Empty => observed,
                current if current == observed => current,
                _ => return ValueKind::Text,
            };
        }
        kind
    }

    /// Replaces the values of one column, keeping row count fixed.
    pub fn replace_column(&mut self, idx: usize, values: Vec<Value>) {
        debug_assert_eq!(values.len(), self.rows.len());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row[idx] = value;
        }
    }

    pub fn head(&self, limit: usize) -> &[Vec<Value>] {
        &self.rows[..self.rows.len().min(limit)]
    }
}
