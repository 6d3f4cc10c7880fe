//! Result aggregator.
//!
//! Folds the unordered result stream into one accumulator per unit. Every
//! merge rule is associative and commutative, so the finalized distributions
//! are identical whatever order the workers delivered results in:
//!
//! | kind        | merge                                                        |
//! |-------------|--------------------------------------------------------------|
//! | scalar      | count, sum, min, max; the sum is taken over sorted values     |
//! | table       | cell-wise sum (sorted per cell)                               |
//! | histogram   | bucket-wise add                                               |
//! | matrix      | element-wise add                                              |
//! | sample_list | set union; capped at finalize to the first ids in order       |
//!
//! Error results, results of undeclared units and results whose kind differs
//! from the unit's declared kind go to the error ledger instead.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::result::{Histogram, LedgerEntry, Matrix, ResultValue, Table, UnitResult};
use super::summary::{Summary, Thresholds};
use crate::models::ResultKind;

// ═══════════════════════════════════════════
// Distribution (frozen view)
// ═══════════════════════════════════════════

/// Dataset-level view of one unit's merged results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Distribution {
    Scalar {
        count: u64,
        sum: f64,
        mean: Option<f64>,
        min: Option<f64>,
        max: Option<f64>,
    },
    Table {
        rows: Table,
    },
    Histogram {
        buckets: Histogram,
    },
    Matrix {
        cells: Matrix,
    },
    SampleList {
        /// Distinct sample ids reported, before the cap.
        count: u64,
        samples: Vec<String>,
        truncated: bool,
    },
}

impl Distribution {
    pub fn kind(&self) -> ResultKind {
        match self {
            Self::Scalar { .. } => ResultKind::Scalar,
            Self::Table { .. } => ResultKind::Table,
            Self::Histogram { .. } => ResultKind::Histogram,
            Self::Matrix { .. } => ResultKind::Matrix,
            Self::SampleList { .. } => ResultKind::SampleList,
        }
    }

    /// Sample-list size; 0 for other kinds.
    pub fn listed_count(&self) -> u64 {
        match self {
            Self::SampleList { count, .. } => *count,
            _ => 0,
        }
    }

    /// Sum of one table column across rows; 0 for other kinds.
    pub fn column_total(&self, column: &str) -> f64 {
        match self {
            Self::Table { rows } => rows.values().filter_map(|r| r.get(column)).sum(),
            _ => 0.0,
        }
    }
}

/// Sum that does not depend on the order values were added in. `None` when
/// the sum leaves the finite range.
fn ordered_sum(values: &[f64]) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let sum: f64 = sorted.iter().sum();
    sum.is_finite().then_some(sum)
}

/// `ordered_sum`, pinned to the largest finite value of the right sign on
/// overflow. The overflow itself is reported by `Aggregator::finalize`.
fn saturating_sum(values: &[f64]) -> f64 {
    ordered_sum(values).unwrap_or_else(|| {
        if values.iter().sum::<f64>() < 0.0 {
            f64::MIN
        } else {
            f64::MAX
        }
    })
}

/// First non-finite cell of a table, as `row/column`.
fn non_finite_cell(rows: &Table) -> Option<(String, f64)> {
    rows.iter().find_map(|(row, columns)| {
        columns
            .iter()
            .find(|(_, v)| !v.is_finite())
            .map(|(column, v)| (format!("{row}/{column}"), *v))
    })
}

// ═══════════════════════════════════════════
// Accumulators
// ═══════════════════════════════════════════

#[derive(Debug, Clone)]
enum Accumulator {
    Scalar(Vec<f64>),
    Table(BTreeMap<String, BTreeMap<String, Vec<f64>>>),
    Histogram(Histogram),
    Matrix(Matrix),
    SampleList(BTreeSet<String>),
}

impl Accumulator {
    fn for_kind(kind: ResultKind) -> Self {
        match kind {
            ResultKind::Scalar => Self::Scalar(Vec::new()),
            ResultKind::Table => Self::Table(BTreeMap::new()),
            ResultKind::Histogram => Self::Histogram(Histogram::new()),
            ResultKind::Matrix => Self::Matrix(Matrix::new()),
            ResultKind::SampleList => Self::SampleList(BTreeSet::new()),
        }
    }

    fn kind(&self) -> ResultKind {
        match self {
            Self::Scalar(_) => ResultKind::Scalar,
            Self::Table(_) => ResultKind::Table,
            Self::Histogram(_) => ResultKind::Histogram,
            Self::Matrix(_) => ResultKind::Matrix,
            Self::SampleList(_) => ResultKind::SampleList,
        }
    }

    /// Merge one value. Returns the value back when its kind does not match.
    fn merge(&mut self, value: ResultValue) -> Result<(), ResultValue> {
        match (self, value) {
            (Self::Scalar(values), ResultValue::Scalar(v)) => values.push(v),
            (Self::Table(cells), ResultValue::Table(rows)) => {
                for (row, columns) in rows {
                    let target = cells.entry(row).or_default();
                    for (column, v) in columns {
                        target.entry(column).or_default().push(v);
                    }
                }
            }
            (Self::Histogram(buckets), ResultValue::Histogram(incoming)) => {
                for (bucket, n) in incoming {
                    let count = buckets.entry(bucket).or_insert(0);
                    *count = count.saturating_add(n);
                }
            }
            (Self::Matrix(cells), ResultValue::Matrix(incoming)) => {
                for (row, columns) in incoming {
                    let target = cells.entry(row).or_default();
                    for (column, n) in columns {
                        let count = target.entry(column).or_insert(0);
                        *count = count.saturating_add(n);
                    }
                }
            }
            (Self::SampleList(ids), ResultValue::SampleList(incoming)) => ids.extend(incoming),
            (_, other) => return Err(other),
        }
        Ok(())
    }

    fn freeze(&self, sample_list_cap: usize) -> Distribution {
        match self {
            Self::Scalar(values) => {
                let count = values.len() as u64;
                let sum = saturating_sum(values);
                Distribution::Scalar {
                    count,
                    sum,
                    mean: (count > 0).then(|| sum / count as f64),
                    min: values.iter().copied().min_by(f64::total_cmp),
                    max: values.iter().copied().max_by(f64::total_cmp),
                }
            }
            Self::Table(cells) => Distribution::Table {
                rows: cells
                    .iter()
                    .map(|(row, columns)| {
                        let columns = columns
                            .iter()
                            .map(|(column, values)| (column.clone(), saturating_sum(values)))
                            .collect();
                        (row.clone(), columns)
                    })
                    .collect(),
            },
            Self::Histogram(buckets) => Distribution::Histogram {
                buckets: buckets.clone(),
            },
            Self::Matrix(cells) => Distribution::Matrix {
                cells: cells.clone(),
            },
            Self::SampleList(ids) => Distribution::SampleList {
                count: ids.len() as u64,
                samples: ids.iter().take(sample_list_cap).cloned().collect(),
                truncated: ids.len() > sample_list_cap,
            },
        }
    }

    /// Sums that left the finite range, named for the ledger.
    fn overflows(&self) -> Vec<String> {
        match self {
            Self::Scalar(values) if ordered_sum(values).is_none() => vec!["scalar sum".to_string()],
            Self::Table(cells) => cells
                .iter()
                .flat_map(|(row, columns)| {
                    columns
                        .iter()
                        .filter(|(_, values)| ordered_sum(values).is_none())
                        .map(move |(column, _)| format!("{row}/{column}"))
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

// ═══════════════════════════════════════════
// Aggregator
// ═══════════════════════════════════════════

/// Output of `Aggregator::finalize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub distributions: BTreeMap<String, Distribution>,
    /// Sorted.
    pub ledger: Vec<LedgerEntry>,
    pub summary: Summary,
    pub results_folded: u64,
}

pub struct Aggregator {
    accumulators: BTreeMap<String, Accumulator>,
    ledger: Vec<LedgerEntry>,
    sample_list_cap: usize,
    folded: u64,
}

impl Aggregator {
    pub fn new(sample_list_cap: usize) -> Self {
        Self {
            accumulators: BTreeMap::new(),
            ledger: Vec::new(),
            sample_list_cap: sample_list_cap.max(1),
            folded: 0,
        }
    }

    /// Declare a unit and the kind it produces. Declared units always get a
    /// distribution, even if every one of their runs failed.
    pub fn declare(&mut self, unit: &str, kind: ResultKind) {
        self.accumulators
            .entry(unit.to_string())
            .or_insert_with(|| Accumulator::for_kind(kind));
    }

    pub fn fold(&mut self, result: UnitResult) {
        self.folded += 1;
        let UnitResult { unit, sample_id, value } = result;

        if let ResultValue::Table(rows) = &value {
            if let Some((cell, v)) = non_finite_cell(rows) {
                let message = format!("non-finite table cell {cell} = {v}");
                self.ledger.push(LedgerEntry { unit, sample_id, message });
                return;
            }
        }
        let message = match value {
            ResultValue::Error(message) => message,
            ResultValue::Scalar(v) if !v.is_finite() => format!("non-finite scalar result {v}"),
            value => match self.accumulators.get_mut(&unit) {
                None => "result from undeclared unit".to_string(),
                Some(acc) => match acc.merge(value) {
                    Ok(()) => return,
                    Err(rejected) => format!(
                        "unit declared {} but returned {}",
                        acc.kind(),
                        rejected.kind().map_or("error", |k| k.as_str())
                    ),
                },
            },
        };
        self.ledger.push(LedgerEntry { unit, sample_id, message });
    }

    /// Record a ledger entry that did not come from a unit result.
    pub fn record(&mut self, entry: LedgerEntry) {
        self.ledger.push(entry);
    }

    pub fn results_folded(&self) -> u64 {
        self.folded
    }

    /// Current distributions, for dataset-level units.
    pub fn snapshot(&self) -> BTreeMap<String, Distribution> {
        self.accumulators
            .iter()
            .map(|(unit, acc)| (unit.clone(), acc.freeze(self.sample_list_cap)))
            .collect()
    }

    /// Freeze every distribution, sort the ledger and evaluate thresholds.
    pub fn finalize(mut self, thresholds: &Thresholds, sample_count: usize) -> Aggregate {
        for (unit, acc) in &self.accumulators {
            for cell in acc.overflows() {
                tracing::warn!(unit = %unit, cell = %cell, "Aggregated sum overflowed");
                self.ledger.push(LedgerEntry {
                    unit: unit.clone(),
                    sample_id: None,
                    message: format!("{cell} overflows; saturated"),
                });
            }
        }
        let distributions = self.snapshot();
        self.ledger.sort();
        let summary = thresholds.evaluate(&distributions, self.ledger.len(), sample_count);
        Aggregate {
            distributions,
            ledger: self.ledger,
            summary,
            results_folded: self.folded,
        }
    }
}
