//! Summary level and health score derived from the finalized distributions.
//!
//! Rules read the distributions of the built-in units by name. A rule whose
//! unit did not run is skipped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::aggregate::Distribution;
use crate::models::{Split, SummaryLevel};
use crate::units::checks::{self, bbox_columns};
use crate::units::features;

/// Health-score penalty weights per finding.
const CORRUPT_WEIGHT: f64 = 6.0;
const MISSING_WEIGHT: f64 = 1.0;
const ZERO_AREA_WEIGHT: f64 = 3.0;
const INVERTED_WEIGHT: f64 = 4.0;
const OUT_OF_BOUNDS_WEIGHT: f64 = 1.0;
/// Penalties are normalised per this many images.
const IMAGES_PER_PENALTY_UNIT: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Warn when the fraction of samples without an annotation file exceeds this.
    pub missing_annotation_warn_ratio: f64,
    /// Fail when it exceeds this.
    pub missing_annotation_fail_ratio: f64,
    /// Fail at this many corrupt images. 0 disables the rule.
    pub corrupt_fail_count: u64,
    /// Warn at this many zero-area or inverted boxes. 0 disables the rule.
    pub invalid_box_warn_count: u64,
    /// Warn at this many out-of-bounds boxes. 0 disables the rule.
    pub out_of_bounds_warn_count: u64,
    /// Leaked file names fail the run instead of warning.
    pub fail_on_split_leakage: bool,
    /// Fail if any class has zero objects in a known split.
    pub fail_on_class_missing_from_split: bool,
    /// Warn when the error ledger is not empty.
    pub warn_on_errors: bool,
    pub health_warn_below: f64,
    pub health_fail_below: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            missing_annotation_warn_ratio: 0.0,
            missing_annotation_fail_ratio: 0.5,
            corrupt_fail_count: 1,
            invalid_box_warn_count: 1,
            out_of_bounds_warn_count: 1,
            fail_on_split_leakage: false,
            fail_on_class_missing_from_split: true,
            warn_on_errors: true,
            health_warn_below: 80.0,
            health_fail_below: 50.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdFinding {
    pub rule: String,
    pub level: SummaryLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub level: SummaryLevel,
    /// 0 to 100; 0 when no images were scanned.
    pub health_score: u8,
    pub findings: Vec<ThresholdFinding>,
}

/// Counts the health score is computed from.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct IssueCounts {
    corrupt: f64,
    missing: f64,
    zero_area: f64,
    inverted: f64,
    out_of_bounds: f64,
}

impl IssueCounts {
    fn tally(distributions: &BTreeMap<String, Distribution>) -> Self {
        let listed = |unit: &str| distributions.get(unit).map_or(0, Distribution::listed_count) as f64;
        let column = |name: &str| {
            distributions
                .get(checks::BBOX_SANITY)
                .map_or(0.0, |d| d.column_total(name))
        };
        Self {
            corrupt: listed(checks::CORRUPT_IMAGE),
            missing: listed(checks::MISSING_ANNOTATION),
            zero_area: column(bbox_columns::ZERO_AREA),
            inverted: column(bbox_columns::INVERTED),
            out_of_bounds: column(bbox_columns::OUT_OF_BOUNDS),
        }
    }
}

/// 100 minus weighted issue penalties normalised per ten images, clamped
/// and rounded.
fn health_score(counts: IssueCounts, sample_count: usize) -> u8 {
    if sample_count == 0 {
        return 0;
    }
    let penalty = counts.corrupt * CORRUPT_WEIGHT
        + counts.missing * MISSING_WEIGHT
        + counts.zero_area * ZERO_AREA_WEIGHT
        + counts.inverted * INVERTED_WEIGHT
        + counts.out_of_bounds * OUT_OF_BOUNDS_WEIGHT;
    let base = (sample_count as f64 / IMAGES_PER_PENALTY_UNIT).max(1.0);
    (100.0 - penalty / base).clamp(0.0, 100.0).round() as u8
}

impl Thresholds {
    pub fn evaluate(
        &self,
        distributions: &BTreeMap<String, Distribution>,
        ledger_len: usize,
        sample_count: usize,
    ) -> Summary {
        let counts = IssueCounts::tally(distributions);
        let score = health_score(counts, sample_count);
        let mut findings = Vec::new();
        let mut flag = |rule: &str, level: SummaryLevel, message: String| {
            findings.push(ThresholdFinding {
                rule: rule.to_string(),
                level,
                message,
            });
        };

        if distributions.contains_key(checks::MISSING_ANNOTATION) && sample_count > 0 {
            let ratio = counts.missing / sample_count as f64;
            let message = format!("{} of {sample_count} samples have no annotation file", counts.missing);
            if ratio > self.missing_annotation_fail_ratio {
                flag("missing_annotation_ratio", SummaryLevel::Fail, message);
            } else if ratio > self.missing_annotation_warn_ratio {
                flag("missing_annotation_ratio", SummaryLevel::Warn, message);
            }
        }

        if self.corrupt_fail_count > 0 && counts.corrupt >= self.corrupt_fail_count as f64 {
            flag(
                "corrupt_images",
                SummaryLevel::Fail,
                format!("{} corrupt images", counts.corrupt),
            );
        }

        let invalid = counts.zero_area + counts.inverted;
        if self.invalid_box_warn_count > 0 && invalid >= self.invalid_box_warn_count as f64 {
            flag(
                "invalid_boxes",
                SummaryLevel::Warn,
                format!("{} zero-area and {} inverted boxes", counts.zero_area, counts.inverted),
            );
        }

        if self.out_of_bounds_warn_count > 0
            && counts.out_of_bounds >= self.out_of_bounds_warn_count as f64
        {
            flag(
                "out_of_bounds_boxes",
                SummaryLevel::Warn,
                format!("{} boxes extend past the image", counts.out_of_bounds),
            );
        }

        if let Some(leak) = distributions.get(checks::SPLIT_LEAKAGE) {
            if leak.listed_count() > 0 {
                let level = if self.fail_on_split_leakage {
                    SummaryLevel::Fail
                } else {
                    SummaryLevel::Warn
                };
                flag(
                    "split_leakage",
                    level,
                    format!("{} samples share a file name across splits", leak.listed_count()),
                );
            }
        }

        if self.fail_on_class_missing_from_split {
            if let Some(Distribution::Matrix { cells }) = distributions.get(features::SPLIT_CLASS_COVERAGE) {
                for (split, labels) in cells {
                    if split == Split::Unknown.as_str() {
                        continue;
                    }
                    for (label, n) in labels {
                        if *n == 0 {
                            flag(
                                "class_missing_from_split",
                                SummaryLevel::Fail,
                                format!("class {label} has no objects in split {split}"),
                            );
                        }
                    }
                }
            }
        }

        if self.warn_on_errors && ledger_len > 0 {
            flag(
                "error_ledger",
                SummaryLevel::Warn,
                format!("{ledger_len} errors recorded"),
            );
        }

        if sample_count > 0 {
            let score_f = f64::from(score);
            if score_f < self.health_fail_below {
                flag("health_score", SummaryLevel::Fail, format!("health score {score}"));
            } else if score_f < self.health_warn_below {
                flag("health_score", SummaryLevel::Warn, format!("health score {score}"));
            }
        }

        let level = findings
            .iter()
            .map(|f| f.level)
            .max()
            .unwrap_or(SummaryLevel::Pass);
        Summary {
            level,
            health_score: score,
            findings,
        }
    }
}
