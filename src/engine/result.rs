//! Closed result model produced by units.
//!
//! Every unit returns one `ResultValue`. The variant set matches the merge
//! rules in `aggregate`; adding a kind means adding its merge rule there.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::ResultKind;

/// Row label -> column label -> value.
pub type Table = BTreeMap<String, BTreeMap<String, f64>>;

/// Bucket label -> count.
pub type Histogram = BTreeMap<String, u64>;

/// Row label -> column label -> count.
pub type Matrix = BTreeMap<String, BTreeMap<String, u64>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ResultValue {
    Scalar(f64),
    Table(Table),
    Histogram(Histogram),
    Matrix(Matrix),
    SampleList(Vec<String>),
    /// Never aggregated numerically; only recorded in the error ledger.
    Error(String),
}

impl ResultValue {
    /// The aggregation kind, or `None` for errors.
    pub fn kind(&self) -> Option<ResultKind> {
        match self {
            Self::Scalar(_) => Some(ResultKind::Scalar),
            Self::Table(_) => Some(ResultKind::Table),
            Self::Histogram(_) => Some(ResultKind::Histogram),
            Self::Matrix(_) => Some(ResultKind::Matrix),
            Self::SampleList(_) => Some(ResultKind::SampleList),
            Self::Error(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn empty_sample_list() -> Self {
        Self::SampleList(Vec::new())
    }

    /// Histogram with a single bucket.
    pub fn single_bucket(label: impl Into<String>, count: u64) -> Self {
        let mut buckets = Histogram::new();
        buckets.insert(label.into(), count);
        Self::Histogram(buckets)
    }
}

/// One unit's output for one sample (or for the whole dataset when
/// `sample_id` is `None`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitResult {
    pub unit: String,
    pub sample_id: Option<String>,
    pub value: ResultValue,
}

impl UnitResult {
    pub fn for_sample(unit: &str, sample_id: &str, value: ResultValue) -> Self {
        Self {
            unit: unit.to_string(),
            sample_id: Some(sample_id.to_string()),
            value,
        }
    }

    pub fn for_dataset(unit: &str, value: ResultValue) -> Self {
        Self {
            unit: unit.to_string(),
            sample_id: None,
            value,
        }
    }
}

/// One entry of the error ledger.
///
/// Field order gives the ledger its sort order, which keeps the payload
/// identical across runs whatever order the workers finished in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub unit: String,
    pub sample_id: Option<String>,
    pub message: String,
}

/// Increment `matrix[row][col]` by `n`.
pub fn matrix_add(matrix: &mut Matrix, row: &str, col: &str, n: u64) {
    *matrix
        .entry(row.to_string())
        .or_default()
        .entry(col.to_string())
        .or_insert(0) += n;
}
