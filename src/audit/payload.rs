//! The audit's output document.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::CacheStats;
use crate::engine::{Aggregate, Distribution, ExecutionStats, LedgerEntry, Summary};
use crate::models::{
    AuditState, CacheAccess, ExitStatus, ResultKind, Sample, Split, UnitCost, UnitKind, UnitScope,
};
use crate::units::{DiscoveryReport, UnitDescriptor};

/// One row of the ordered sample index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleIndexEntry {
    pub id: String,
    pub split: Split,
    pub annotation_missing: bool,
    pub annotation_unreadable: bool,
    pub objects: usize,
    /// Ledger entries naming this sample.
    pub errors: usize,
}

impl SampleIndexEntry {
    /// Index rows in scan order.
    pub fn index(samples: &[Sample], ledger: &[LedgerEntry]) -> Vec<Self> {
        let mut errors: HashMap<&str, usize> = HashMap::new();
        for entry in ledger {
            if let Some(id) = &entry.sample_id {
                *errors.entry(id.as_str()).or_default() += 1;
            }
        }
        samples
            .iter()
            .map(|s| Self {
                id: s.id.clone(),
                split: s.split,
                annotation_missing: s.annotation.is_missing(),
                annotation_unreadable: s.annotation.is_unreadable(),
                objects: s.objects().len(),
                errors: errors.get(s.id.as_str()).copied().unwrap_or(0),
            })
            .collect()
    }
}

/// A resolved unit as it ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitInfo {
    pub name: String,
    pub version: String,
    pub kind: UnitKind,
    pub scope: UnitScope,
    pub cost: UnitCost,
    pub access: CacheAccess,
    pub result_kind: ResultKind,
}

impl From<&UnitDescriptor> for UnitInfo {
    fn from(d: &UnitDescriptor) -> Self {
        Self {
            name: d.name.clone(),
            version: d.version.clone(),
            kind: d.kind,
            scope: d.scope,
            cost: d.cost,
            access: d.access,
            result_kind: d.result_kind,
        }
    }
}

/// Facts about the run itself. Differs between runs even on an unchanged
/// dataset (ids, clocks, cache counters).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub app_version: String,
    pub root: PathBuf,
    /// Execution order.
    pub units: Vec<UnitInfo>,
    pub discovery: DiscoveryReport,
    pub cache: CacheStats,
    pub execution: ExecutionStats,
}

/// Final, immutable result of one audit run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditPayload {
    samples: Vec<SampleIndexEntry>,
    distributions: BTreeMap<String, Distribution>,
    ledger: Vec<LedgerEntry>,
    summary: Summary,
    /// Execution stopped before every planned run completed.
    partial: bool,
    metadata: RunMetadata,
}

impl AuditPayload {
    pub(crate) fn new(
        samples: Vec<SampleIndexEntry>,
        aggregate: Aggregate,
        metadata: RunMetadata,
    ) -> Self {
        Self {
            samples,
            distributions: aggregate.distributions,
            ledger: aggregate.ledger,
            summary: aggregate.summary,
            partial: metadata.execution.is_partial(),
            metadata,
        }
    }

    pub fn samples(&self) -> &[SampleIndexEntry] {
        &self.samples
    }

    pub fn distributions(&self) -> &BTreeMap<String, Distribution> {
        &self.distributions
    }

    pub fn distribution(&self, unit: &str) -> Option<&Distribution> {
        self.distributions.get(unit)
    }

    pub fn ledger(&self) -> &[LedgerEntry] {
        &self.ledger
    }

    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    pub fn is_partial(&self) -> bool {
        self.partial
    }

    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }
}

/// What `Auditor::run` returns for a run that got past resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditOutcome {
    pub status: ExitStatus,
    pub state: AuditState,
    #[serde(flatten)]
    pub payload: AuditPayload,
    /// Artifact written by the report builder.
    pub report_path: Option<PathBuf>,
    pub report_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnnotationState;

    fn sample(id: &str, annotation: AnnotationState) -> Sample {
        Sample {
            id: id.into(),
            image_path: PathBuf::from(id),
            split: Split::Val,
            annotation,
            size_bytes: 0,
            modified: None,
        }
    }

    #[test]
    fn index_keeps_scan_order_and_counts_errors() {
        let samples = vec![
            sample("b.png", AnnotationState::Missing),
            sample(
                "a.png",
                AnnotationState::Unreadable {
                    source: PathBuf::from("a.json"),
                    reason: "bad".into(),
                },
            ),
        ];
        let ledger = vec![
            LedgerEntry {
                unit: "scan".into(),
                sample_id: Some("a.png".into()),
                message: "annotation unreadable".into(),
            },
            LedgerEntry {
                unit: "cooccurrence".into(),
                sample_id: None,
                message: "boom".into(),
            },
        ];

        let index = SampleIndexEntry::index(&samples, &ledger);
        assert_eq!(index[0].id, "b.png");
        assert!(index[0].annotation_missing);
        assert_eq!(index[0].errors, 0);
        assert!(index[1].annotation_unreadable);
        assert_eq!(index[1].errors, 1);
    }

    #[test]
    fn unit_info_mirrors_descriptor() {
        let d = UnitDescriptor::new("dupes", UnitKind::Feature, ResultKind::Histogram)
            .heavy()
            .reads_cache();
        let info = UnitInfo::from(&d);
        assert_eq!(info.cost, UnitCost::Heavy);
        assert_eq!(info.access, CacheAccess::ReadsCache);
        assert_eq!(info.scope, UnitScope::PerSample);
    }
}
