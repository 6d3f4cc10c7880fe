//! Built-in feature units.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::traits::{Unit, UnitContext, UnitDescriptor, UnitInput};
use super::{UnitError, UnitOptions};
use crate::cache::{facts, CacheError};
use crate::engine::result::{matrix_add, Histogram, Matrix, ResultValue};
use crate::models::{ResultKind, UnitKind};

pub const CLASS_COUNTS: &str = "class_counts";
pub const OBJECTS_PER_IMAGE: &str = "objects_per_image";
pub const BBOX_SIZE_BUCKETS: &str = "bbox_size_buckets";
pub const COOCCURRENCE: &str = "cooccurrence";
pub const SPLIT_CLASS_COVERAGE: &str = "split_class_coverage";
pub const DUPLICATE_IMAGES: &str = "duplicate_images";

/// Relative-area bucket edges for `bbox_size_buckets`.
const TINY_MAX: f64 = 0.01;
const SMALL_MAX: f64 = 0.1;
const MEDIUM_MAX: f64 = 0.3;

pub fn builtin(options: &UnitOptions) -> Vec<Arc<dyn Unit>> {
    vec![
        Arc::new(ClassCounts::default()),
        Arc::new(ObjectsPerImage::default()),
        Arc::new(BboxSizeBuckets::default()),
        Arc::new(Cooccurrence::default()),
        Arc::new(SplitClassCoverage::default()),
        Arc::new(DuplicateImages::new(options.duplicate_max_distance)),
    ]
}

macro_rules! feature_unit {
    ($ty:ident, $descriptor:expr) => {
        pub struct $ty {
            descriptor: UnitDescriptor,
        }

        impl Default for $ty {
            fn default() -> Self {
                Self { descriptor: $descriptor }
            }
        }
    };
}

feature_unit!(
    ClassCounts,
    UnitDescriptor::new(CLASS_COUNTS, UnitKind::Feature, ResultKind::Histogram)
);
feature_unit!(
    ObjectsPerImage,
    UnitDescriptor::new(OBJECTS_PER_IMAGE, UnitKind::Feature, ResultKind::Scalar)
);
feature_unit!(
    BboxSizeBuckets,
    UnitDescriptor::new(BBOX_SIZE_BUCKETS, UnitKind::Feature, ResultKind::Histogram).reads_cache()
);
feature_unit!(
    Cooccurrence,
    UnitDescriptor::new(COOCCURRENCE, UnitKind::Feature, ResultKind::Matrix).dataset_level()
);
feature_unit!(
    SplitClassCoverage,
    UnitDescriptor::new(SPLIT_CLASS_COVERAGE, UnitKind::Feature, ResultKind::Matrix).dataset_level()
);

/// Objects per label.
impl Unit for ClassCounts {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    fn run(&self, input: UnitInput<'_>, _ctx: &UnitContext<'_>) -> Result<ResultValue, UnitError> {
        let mut counts = Histogram::new();
        for object in input.sample()?.objects() {
            *counts.entry(object.label.clone()).or_insert(0) += 1;
        }
        Ok(ResultValue::Histogram(counts))
    }
}

impl Unit for ObjectsPerImage {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    fn run(&self, input: UnitInput<'_>, _ctx: &UnitContext<'_>) -> Result<ResultValue, UnitError> {
        Ok(ResultValue::Scalar(input.sample()?.objects().len() as f64))
    }
}

/// Box area relative to the image: tiny, small, medium or large.
/// Zero-area and inverted boxes are left to `bbox_sanity`.
impl Unit for BboxSizeBuckets {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    fn run(&self, input: UnitInput<'_>, ctx: &UnitContext<'_>) -> Result<ResultValue, UnitError> {
        let sample = input.sample()?;
        let mut buckets = Histogram::new();
        if sample.objects().is_empty() {
            return Ok(ResultValue::Histogram(buckets));
        }

        let image_area = ctx.cache()?.dimensions(sample)?.area();
        if image_area <= 0.0 {
            return Err(UnitError::Failed(format!("{} has zero pixel area", sample.id)));
        }
        for object in sample.objects() {
            if object.bbox.is_inverted() || object.bbox.is_zero_area() {
                continue;
            }
            let area = object.bbox.area();
            let relative = area / image_area;
            let bucket = if relative < TINY_MAX {
                "tiny"
            } else if relative < SMALL_MAX {
                "small"
            } else if relative < MEDIUM_MAX {
                "medium"
            } else {
                "large"
            };
            *buckets.entry(bucket.to_string()).or_insert(0) += 1;
        }
        Ok(ResultValue::Histogram(buckets))
    }
}

/// Images in which two labels appear together. The diagonal counts images
/// containing the label at all.
impl Unit for Cooccurrence {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    fn run(&self, input: UnitInput<'_>, _ctx: &UnitContext<'_>) -> Result<ResultValue, UnitError> {
        let mut matrix = Matrix::new();
        for sample in input.samples()? {
            let labels: BTreeSet<&str> = sample.objects().iter().map(|o| o.label.as_str()).collect();
            for a in &labels {
                for b in &labels {
                    matrix_add(&mut matrix, a, b, 1);
                }
            }
        }
        Ok(ResultValue::Matrix(matrix))
    }
}

/// Object count per (split, label). Every label seen anywhere gets a cell in
/// every populated split, so absent classes show up as zeros.
impl Unit for SplitClassCoverage {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    fn run(&self, input: UnitInput<'_>, _ctx: &UnitContext<'_>) -> Result<ResultValue, UnitError> {
        let samples = input.samples()?;
        let labels: BTreeSet<&str> = samples
            .iter()
            .flat_map(|s| s.objects().iter().map(|o| o.label.as_str()))
            .collect();

        let mut matrix = Matrix::new();
        for sample in samples {
            let split = sample.split.as_str();
            for label in &labels {
                matrix_add(&mut matrix, split, label, 0);
            }
            for object in sample.objects() {
                matrix_add(&mut matrix, split, &object.label, 1);
            }
        }
        Ok(ResultValue::Matrix(matrix))
    }
}

// ═══════════════════════════════════════════
// duplicate_images
// ═══════════════════════════════════════════

/// Near-duplicate image pairs: every pair of the (sampled) subset whose
/// perceptual hashes differ in at most `max_distance` bits. Row is the
/// earlier sample in scan order, column the later one, the cell holds the
/// distance. Images that do not decode are skipped; `corrupt_image`
/// reports them.
pub struct DuplicateImages {
    descriptor: UnitDescriptor,
    max_distance: u32,
}

impl DuplicateImages {
    pub fn new(max_distance: u32) -> Self {
        Self {
            descriptor: UnitDescriptor::new(DUPLICATE_IMAGES, UnitKind::Feature, ResultKind::Matrix)
                .dataset_level()
                .heavy()
                .reads_cache(),
            max_distance,
        }
    }
}

impl Default for DuplicateImages {
    fn default() -> Self {
        Self::new(UnitOptions::default().duplicate_max_distance)
    }
}

impl Unit for DuplicateImages {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    fn run(&self, input: UnitInput<'_>, ctx: &UnitContext<'_>) -> Result<ResultValue, UnitError> {
        let cache = ctx.cache()?;
        let mut hashes = Vec::new();
        for sample in input.samples()? {
            let encoded = match cache.perceptual_hash(sample) {
                Ok(encoded) => encoded,
                Err(CacheError::Unavailable { .. }) => continue,
                Err(e) => return Err(e.into()),
            };
            match facts::decode_perceptual_hash(&encoded) {
                Some(hash) => hashes.push((sample.id.as_str(), hash)),
                None => tracing::warn!(sample = %sample.id, "Cached perceptual hash does not decode"),
            }
        }

        let mut pairs = Matrix::new();
        for (i, (a, hash_a)) in hashes.iter().enumerate() {
            for (b, hash_b) in &hashes[i + 1..] {
                if let Some(distance) = facts::hash_distance(hash_a, hash_b) {
                    if distance <= self.max_distance {
                        matrix_add(&mut pairs, a, b, u64::from(distance));
                    }
                }
            }
        }
        tracing::debug!(
            hashed = hashes.len(),
            pairs = pairs.values().map(|row| row.len()).sum::<usize>(),
            "Duplicate scan finished"
        );
        Ok(ResultValue::Matrix(pairs))
    }
}
