//! Core checks. They run before every feature unit.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::traits::{Unit, UnitContext, UnitDescriptor, UnitInput};
use super::{UnitError, UnitOptions};
use crate::cache::CacheError;
use crate::engine::result::{ResultValue, Table};
use crate::models::{ResultKind, Split, UnitKind};

pub const MISSING_ANNOTATION: &str = "missing_annotation";
pub const CORRUPT_IMAGE: &str = "corrupt_image";
pub const BBOX_SANITY: &str = "bbox_sanity";
pub const SPLIT_LEAKAGE: &str = "split_leakage";
pub const OVERLAP: &str = "overlap";

/// Column names of the `bbox_sanity` table.
pub mod bbox_columns {
    pub const ZERO_AREA: &str = "zero_area";
    pub const INVERTED: &str = "inverted";
    pub const OUT_OF_BOUNDS: &str = "out_of_bounds";
    pub const TOTAL: &str = "total";
}

/// Column names of the `overlap` table.
pub mod overlap_columns {
    pub const SAME_LABEL: &str = "same_label_pairs";
    pub const CROSS_LABEL: &str = "cross_label_pairs";
    pub const MAX_IOU: &str = "max_iou";
}

pub fn builtin(options: &UnitOptions) -> Vec<Arc<dyn Unit>> {
    vec![
        Arc::new(MissingAnnotation::default()),
        Arc::new(CorruptImage::default()),
        Arc::new(BboxSanity::default()),
        Arc::new(SplitLeakage::default()),
        Arc::new(Overlap::new(
            options.overlap_same_label_iou,
            options.overlap_cross_label_iou,
        )),
    ]
}

fn listed(hit: bool, sample_id: &str) -> ResultValue {
    if hit {
        ResultValue::SampleList(vec![sample_id.to_string()])
    } else {
        ResultValue::empty_sample_list()
    }
}

// ═══════════════════════════════════════════
// missing_annotation
// ═══════════════════════════════════════════

/// Samples with no annotation file at all. An empty annotation file is not
/// missing.
pub struct MissingAnnotation {
    descriptor: UnitDescriptor,
}

impl Default for MissingAnnotation {
    fn default() -> Self {
        Self {
            descriptor: UnitDescriptor::new(MISSING_ANNOTATION, UnitKind::Check, ResultKind::SampleList),
        }
    }
}

impl Unit for MissingAnnotation {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    fn run(&self, input: UnitInput<'_>, _ctx: &UnitContext<'_>) -> Result<ResultValue, UnitError> {
        let sample = input.sample()?;
        Ok(listed(sample.annotation.is_missing(), &sample.id))
    }
}

// ═══════════════════════════════════════════
// corrupt_image
// ═══════════════════════════════════════════

/// Samples whose image does not fully decode.
pub struct CorruptImage {
    descriptor: UnitDescriptor,
}

impl Default for CorruptImage {
    fn default() -> Self {
        Self {
            descriptor: UnitDescriptor::new(CORRUPT_IMAGE, UnitKind::Check, ResultKind::SampleList)
                .reads_cache(),
        }
    }
}

impl Unit for CorruptImage {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    fn run(&self, input: UnitInput<'_>, ctx: &UnitContext<'_>) -> Result<ResultValue, UnitError> {
        let sample = input.sample()?;
        match ctx.cache()?.integrity(sample) {
            Ok(()) => Ok(listed(false, &sample.id)),
            Err(CacheError::Unavailable { .. }) => Ok(listed(true, &sample.id)),
            Err(e) => Err(e.into()),
        }
    }
}

// ═══════════════════════════════════════════
// bbox_sanity
// ═══════════════════════════════════════════

/// Per-label counts of degenerate boxes.
///
/// Out-of-bounds needs the image dimensions; when those are unavailable
/// (the image is corrupt, which `corrupt_image` reports) the column is left
/// at zero instead of failing the sample twice.
pub struct BboxSanity {
    descriptor: UnitDescriptor,
}

impl Default for BboxSanity {
    fn default() -> Self {
        Self {
            descriptor: UnitDescriptor::new(BBOX_SANITY, UnitKind::Check, ResultKind::Table)
                .reads_cache(),
        }
    }
}

impl Unit for BboxSanity {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    fn run(&self, input: UnitInput<'_>, ctx: &UnitContext<'_>) -> Result<ResultValue, UnitError> {
        use bbox_columns::*;

        let sample = input.sample()?;
        let objects = sample.objects();
        let mut table = Table::new();
        if objects.is_empty() {
            return Ok(ResultValue::Table(table));
        }

        let dims = ctx.cache()?.dimensions(sample).ok();
        for object in objects {
            let row = table.entry(object.label.clone()).or_insert_with(|| {
                [ZERO_AREA, INVERTED, OUT_OF_BOUNDS, TOTAL]
                    .into_iter()
                    .map(|c| (c.to_string(), 0.0))
                    .collect()
            });
            let mut bump = |column: &str| {
                if let Some(v) = row.get_mut(column) {
                    *v += 1.0;
                }
            };
            bump(TOTAL);
            if object.bbox.is_zero_area() {
                bump(ZERO_AREA);
            }
            if object.bbox.is_inverted() {
                bump(INVERTED);
            }
            if dims.is_some_and(|d| !object.bbox.is_within(d)) {
                bump(OUT_OF_BOUNDS);
            }
        }
        Ok(ResultValue::Table(table))
    }
}

// ═══════════════════════════════════════════
// split_leakage
// ═══════════════════════════════════════════

/// Samples whose file name appears in more than one known split.
pub struct SplitLeakage {
    descriptor: UnitDescriptor,
}

impl Default for SplitLeakage {
    fn default() -> Self {
        Self {
            descriptor: UnitDescriptor::new(SPLIT_LEAKAGE, UnitKind::Check, ResultKind::SampleList)
                .dataset_level(),
        }
    }
}

impl Unit for SplitLeakage {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    fn run(&self, input: UnitInput<'_>, _ctx: &UnitContext<'_>) -> Result<ResultValue, UnitError> {
        let samples = input.samples()?;

        let mut splits_by_name: BTreeMap<&str, BTreeSet<Split>> = BTreeMap::new();
        for sample in samples.iter().filter(|s| s.split != Split::Unknown) {
            splits_by_name
                .entry(sample.file_name())
                .or_default()
                .insert(sample.split);
        }

        let leaked = samples
            .iter()
            .filter(|s| {
                s.split != Split::Unknown
                    && splits_by_name
                        .get(s.file_name())
                        .is_some_and(|splits| splits.len() > 1)
            })
            .map(|s| s.id.clone())
            .collect();
        Ok(ResultValue::SampleList(leaked))
    }
}

// ═══════════════════════════════════════════
// overlap
// ═══════════════════════════════════════════

/// Pairs of boxes within one image that cover nearly the same region.
///
/// Same-label pairs at or above `same_label_iou` usually mean a box was
/// annotated twice; different-label pairs at or above `cross_label_iou`
/// usually mean one of the two labels is wrong. The table has one row per
/// offending sample, so merging never mixes samples.
pub struct Overlap {
    descriptor: UnitDescriptor,
    same_label_iou: f64,
    cross_label_iou: f64,
}

impl Overlap {
    pub fn new(same_label_iou: f64, cross_label_iou: f64) -> Self {
        Self {
            descriptor: UnitDescriptor::new(OVERLAP, UnitKind::Check, ResultKind::Table).heavy(),
            same_label_iou,
            cross_label_iou,
        }
    }
}

impl Default for Overlap {
    fn default() -> Self {
        let options = UnitOptions::default();
        Self::new(options.overlap_same_label_iou, options.overlap_cross_label_iou)
    }
}

impl Unit for Overlap {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    fn run(&self, input: UnitInput<'_>, _ctx: &UnitContext<'_>) -> Result<ResultValue, UnitError> {
        use overlap_columns::*;

        let sample = input.sample()?;
        let objects = sample.objects();
        let (mut same, mut cross, mut max_iou) = (0u32, 0u32, 0.0f64);
        for (i, a) in objects.iter().enumerate() {
            for b in &objects[i + 1..] {
                let iou = a.bbox.iou(&b.bbox);
                let (threshold, counter) = if a.label == b.label {
                    (self.same_label_iou, &mut same)
                } else {
                    (self.cross_label_iou, &mut cross)
                };
                if iou >= threshold {
                    *counter += 1;
                    max_iou = max_iou.max(iou);
                }
            }
        }

        let mut table = Table::new();
        if same + cross > 0 {
            table.insert(
                sample.id.clone(),
                [
                    (SAME_LABEL.to_string(), f64::from(same)),
                    (CROSS_LABEL.to_string(), f64::from(cross)),
                    (MAX_IOU.to_string(), max_iou),
                ]
                .into_iter()
                .collect(),
            );
        }
        Ok(ResultValue::Table(table))
    }
}
