// =============================================================================
// FeatureFrame — immutable, ordered feature matrix for one cycle
// =============================================================================
//
// One row per closed primary bar (warmup rows already dropped), one column per
// schema feature, in schema order. The frame is built once per cycle and never
// mutated; strategies and the ensemble read the same snapshot.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::errors::FeatureError;

#[derive(Debug, Clone)]
pub struct FeatureFrame {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    timestamps: Vec<DateTime<Utc>>,
    rows: Vec<Vec<f64>>,
}

impl FeatureFrame {
    /// Assemble a frame, enforcing rectangular shape.
    pub fn new(
        columns: Vec<String>,
        timestamps: Vec<DateTime<Utc>>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self, FeatureError> {
        if timestamps.len() != rows.len() {
            return Err(FeatureError::SchemaMismatch(format!(
                "{} timestamps for {} rows",
                timestamps.len(),
                rows.len()
            )));
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(FeatureError::SchemaMismatch(format!(
                    "row {i} has {} values for {} columns",
                    row.len(),
                    columns.len()
                )));
            }
        }

        let index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i))
            .collect();

        Ok(Self {
            columns,
            index,
            timestamps,
            rows,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn row(&self, idx: usize) -> Option<FeatureRow<'_>> {
        if idx < self.rows.len() {
            Some(FeatureRow { frame: self, idx })
        } else {
            None
        }
    }

    /// The most recent row — the decision row for the current cycle.
    pub fn latest(&self) -> Option<FeatureRow<'_>> {
        self.rows.len().checked_sub(1).and_then(|i| self.row(i))
    }

    pub fn value(&self, row: usize, column: &str) -> Option<f64> {
        let col = *self.index.get(column)?;
        self.rows.get(row).map(|r| r[col])
    }
}

/// A borrowed view of one frame row with by-name access.
#[derive(Debug, Clone, Copy)]
pub struct FeatureRow<'a> {
    frame: &'a FeatureFrame,
    idx: usize,
}

impl<'a> FeatureRow<'a> {
    pub fn get(&self, column: &str) -> Option<f64> {
        self.frame.value(self.idx, column)
    }

    /// All values in schema column order.
    pub fn values(&self) -> &'a [f64] {
        &self.frame.rows[self.idx]
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.frame.timestamps[self.idx]
    }

    pub fn index(&self) -> usize {
        self.idx
    }
}
