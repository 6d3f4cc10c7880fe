use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use super::enums::Split;

// ═══════════════════════════════════════════
// Geometry
// ═══════════════════════════════════════════

/// Pixel dimensions of a decoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> f64 {
        f64::from(self.width) * f64::from(self.height)
    }
}

/// Axis-aligned box in absolute pixel coordinates (xyxy).
/// Values are kept as parsed: an inverted box stays inverted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl BoundingBox {
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self { x_min, y_min, x_max, y_max }
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    /// Signed area; negative for inverted boxes.
    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn is_zero_area(&self) -> bool {
        self.width() == 0.0 || self.height() == 0.0
    }

    pub fn is_inverted(&self) -> bool {
        self.width() < 0.0 || self.height() < 0.0
    }

    pub fn is_within(&self, dims: Dimensions) -> bool {
        self.x_min >= 0.0
            && self.y_min >= 0.0
            && self.x_max <= f64::from(dims.width)
            && self.y_max <= f64::from(dims.height)
    }

    /// Intersection over union. Inverted or empty boxes contribute no area,
    /// so any pair involving one scores 0.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let clipped = |b: &BoundingBox| b.width().max(0.0) * b.height().max(0.0);
        let inter_w = (self.x_max.min(other.x_max) - self.x_min.max(other.x_min)).max(0.0);
        let inter_h = (self.y_max.min(other.y_max) - self.y_min.max(other.y_min)).max(0.0);
        let inter = inter_w * inter_h;
        let union = clipped(self) + clipped(other) - inter;
        if union > 0.0 && union.is_finite() {
            inter / union
        } else {
            0.0
        }
    }
}

/// One labelled object inside an annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub label: String,
    pub bbox: BoundingBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

// ═══════════════════════════════════════════
// Annotation state
// ═══════════════════════════════════════════

/// What the scanner found for an image's annotation.
///
/// `Present` with zero objects (an empty label file) and `Missing` (no label
/// file at all) are different findings and must never be merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AnnotationState {
    Present {
        source: PathBuf,
        objects: Vec<ObjectRecord>,
    },
    Missing,
    Unreadable {
        source: PathBuf,
        reason: String,
    },
}

impl AnnotationState {
    /// Objects of a readable annotation; empty for missing or unreadable ones.
    pub fn objects(&self) -> &[ObjectRecord] {
        match self {
            Self::Present { objects, .. } => objects,
            Self::Missing | Self::Unreadable { .. } => &[],
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    pub fn is_unreadable(&self) -> bool {
        matches!(self, Self::Unreadable { .. })
    }
}

// ═══════════════════════════════════════════
// Sample
// ═══════════════════════════════════════════

/// One image plus its normalized annotation.
///
/// `id` is the root-relative path with `/` separators, so it is stable across
/// runs and unique within a dataset. Dimensions and decode status are not
/// stored here: they are lazily computed facts read through the metadata cache.
#[derive(Debug, Clone)]
pub struct Sample {
    pub id: String,
    pub image_path: PathBuf,
    pub split: Split,
    pub annotation: AnnotationState,
    pub size_bytes: u64,
    pub modified: Option<SystemTime>,
}

impl Sample {
    pub fn file_name(&self) -> &str {
        self.image_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.id)
    }

    pub fn objects(&self) -> &[ObjectRecord] {
        self.annotation.objects()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_area_and_inverted_are_distinct() {
        let flat = BoundingBox::new(10.0, 10.0, 10.0, 20.0);
        assert!(flat.is_zero_area());
        assert!(!flat.is_inverted());

        let inverted = BoundingBox::new(20.0, 10.0, 10.0, 20.0);
        assert!(inverted.is_inverted());
        assert!(!inverted.is_zero_area());
    }

    #[test]
    fn iou_of_overlapping_disjoint_and_inverted_boxes() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(a.iou(&a), 1.0);
        assert_eq!(a.iou(&BoundingBox::new(5.0, 0.0, 15.0, 10.0)), 50.0 / 150.0);
        assert_eq!(a.iou(&BoundingBox::new(20.0, 20.0, 30.0, 30.0)), 0.0);
        assert_eq!(a.iou(&BoundingBox::new(10.0, 10.0, 0.0, 0.0)), 0.0);
    }

    #[test]
    fn bbox_bounds_check() {
        let dims = Dimensions::new(100, 50);
        assert!(BoundingBox::new(0.0, 0.0, 100.0, 50.0).is_within(dims));
        assert!(!BoundingBox::new(-1.0, 0.0, 10.0, 10.0).is_within(dims));
        assert!(!BoundingBox::new(0.0, 0.0, 10.0, 51.0).is_within(dims));
    }

    #[test]
    fn missing_and_empty_annotations_differ() {
        let empty = AnnotationState::Present {
            source: PathBuf::from("a.txt"),
            objects: vec![],
        };
        assert!(!empty.is_missing());
        assert!(empty.objects().is_empty());
        assert!(AnnotationState::Missing.is_missing());
        assert_ne!(empty, AnnotationState::Missing);
    }

    #[test]
    fn unreadable_annotation_exposes_no_objects() {
        let state = AnnotationState::Unreadable {
            source: PathBuf::from("a.json"),
            reason: "expected value".into(),
        };
        assert!(state.is_unreadable());
        assert!(state.objects().is_empty());
    }

    #[test]
    fn annotation_state_serializes_with_tag() {
        let json = serde_json::to_value(AnnotationState::Missing).unwrap();
        assert_eq!(json["state"], "missing");
    }
}
