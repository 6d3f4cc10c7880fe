//! Annotation format parsers.
//!
//! Parsers turn one annotation file into normalized `ObjectRecord`s with
//! absolute xyxy boxes. The scanner picks a per-image parser by file
//! extension; a COCO file at the dataset root covers many images at once
//! and is loaded into a `CocoIndex` up front.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::ParseError;
use crate::models::{BoundingBox, Dimensions, ObjectRecord};

pub trait AnnotationParser: Send + Sync {
    fn name(&self) -> &'static str;

    /// Extensions (without dot) this parser claims, in priority order.
    fn extensions(&self) -> &[&'static str];

    /// Whether `parse` needs the image dimensions (normalized formats).
    fn needs_dimensions(&self) -> bool {
        false
    }

    fn parse(
        &self,
        path: &Path,
        dimensions: Option<Dimensions>,
    ) -> Result<Vec<ObjectRecord>, ParseError>;
}

// ═══════════════════════════════════════════
// YOLO
// ═══════════════════════════════════════════

/// YOLO text labels: `class cx cy w h [confidence]`, coordinates normalized
/// to the image size. Blank lines are ignored; any other line that does not
/// parse makes the whole file unreadable.
#[derive(Debug, Clone, Default)]
pub struct YoloParser {
    class_names: Vec<String>,
}

impl YoloParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_class_names(class_names: Vec<String>) -> Self {
        Self { class_names }
    }

    /// Read `classes.txt` (one name per line) from the dataset root, if present.
    pub fn from_root(root: &Path) -> Self {
        let path = root.join("classes.txt");
        match std::fs::read_to_string(&path) {
            Ok(raw) => Self::with_class_names(
                raw.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(String::from)
                    .collect(),
            ),
            Err(_) => Self::new(),
        }
    }

    fn label_for(&self, token: &str) -> String {
        token
            .parse::<usize>()
            .ok()
            .and_then(|idx| self.class_names.get(idx))
            .cloned()
            .unwrap_or_else(|| token.to_string())
    }
}

impl AnnotationParser for YoloParser {
    fn name(&self) -> &'static str {
        "yolo"
    }

    fn extensions(&self) -> &[&'static str] {
        &["txt"]
    }

    fn needs_dimensions(&self) -> bool {
        true
    }

    fn parse(
        &self,
        path: &Path,
        dimensions: Option<Dimensions>,
    ) -> Result<Vec<ObjectRecord>, ParseError> {
        let dims = dimensions
            .ok_or_else(|| ParseError::DimensionsUnavailable(path.display().to_string()))?;
        let (w, h) = (f64::from(dims.width), f64::from(dims.height));
        let raw = std::fs::read_to_string(path)?;

        let mut objects = Vec::new();
        for (i, line) in raw.lines().enumerate() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.is_empty() {
                continue;
            }
            if parts.len() != 5 && parts.len() != 6 {
                return Err(ParseError::Malformed {
                    line: i + 1,
                    reason: format!("expected 5 or 6 fields, found {}", parts.len()),
                });
            }
            let mut values = [0.0f64; 5];
            for (slot, token) in values.iter_mut().zip(&parts[1..]) {
                *slot = token.parse().map_err(|_| ParseError::Malformed {
                    line: i + 1,
                    reason: format!("not a number: {token}"),
                })?;
            }
            let [cx, cy, bw, bh, _] = values;
            let confidence = if parts.len() == 6 { Some(values[4]) } else { None };

            objects.push(ObjectRecord {
                label: self.label_for(parts[0]),
                bbox: BoundingBox::new(
                    (cx - bw / 2.0) * w,
                    (cy - bh / 2.0) * h,
                    (cx + bw / 2.0) * w,
                    (cy + bh / 2.0) * h,
                ),
                confidence,
            });
        }
        Ok(objects)
    }
}

// ═══════════════════════════════════════════
// JSON
// ═══════════════════════════════════════════

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonAnnotation {
    Wrapped { objects: Vec<JsonObject> },
    Bare(Vec<JsonObject>),
}

#[derive(Debug, Deserialize)]
struct JsonObject {
    label: String,
    bbox: [f64; 4],
    #[serde(default)]
    confidence: Option<f64>,
}

/// Per-image JSON: `{"objects": [{"label", "bbox": [x0, y0, x1, y1], "confidence"?}]}`
/// or a bare array of the same objects. Boxes are absolute xyxy.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

impl AnnotationParser for JsonParser {
    fn name(&self) -> &'static str {
        "json"
    }

    fn extensions(&self) -> &[&'static str] {
        &["json"]
    }

    fn parse(
        &self,
        path: &Path,
        _dimensions: Option<Dimensions>,
    ) -> Result<Vec<ObjectRecord>, ParseError> {
        let raw = std::fs::read_to_string(path)?;
        let parsed: JsonAnnotation = serde_json::from_str(&raw)?;
        let objects = match parsed {
            JsonAnnotation::Wrapped { objects } | JsonAnnotation::Bare(objects) => objects,
        };
        Ok(objects
            .into_iter()
            .map(|o| ObjectRecord {
                label: o.label,
                bbox: BoundingBox::new(o.bbox[0], o.bbox[1], o.bbox[2], o.bbox[3]),
                confidence: o.confidence,
            })
            .collect())
    }
}

// ═══════════════════════════════════════════
// COCO
// ═══════════════════════════════════════════

/// Where a COCO file is looked for, relative to the dataset root.
pub const COCO_CANDIDATES: &[&str] = &[
    "annotations.json",
    "instances.json",
    "coco.json",
    "annotations/instances_train.json",
    "annotations/instances_val.json",
    "annotations/instances_test.json",
];

#[derive(Debug, Deserialize)]
struct CocoFile {
    #[serde(default)]
    images: Vec<CocoImage>,
    #[serde(default)]
    annotations: Vec<CocoAnnotation>,
    #[serde(default)]
    categories: Vec<CocoCategory>,
}

#[derive(Debug, Deserialize)]
struct CocoImage {
    id: u64,
    file_name: String,
}

#[derive(Debug, Deserialize)]
struct CocoAnnotation {
    image_id: u64,
    category_id: u64,
    /// `[x, y, width, height]`. Segmentation-only records have none.
    #[serde(default)]
    bbox: Option<[f64; 4]>,
    #[serde(default)]
    score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CocoCategory {
    id: u64,
    name: String,
}

/// Objects of every image listed in one or more COCO files, keyed by the
/// image's `file_name`.
///
/// An image listed without annotations maps to an empty list: it is
/// annotated, with nothing in it.
#[derive(Debug, Clone, Default)]
pub struct CocoIndex {
    by_file: HashMap<String, (PathBuf, Vec<ObjectRecord>)>,
    /// Base name -> full `file_name` keys with that base name.
    by_base: HashMap<String, Vec<String>>,
}

fn normalize_file_name(name: &str) -> String {
    name.replace('\\', "/").trim_start_matches("./").to_string()
}

impl CocoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one COCO file into the index. Annotations pointing at an
    /// unlisted image are dropped; an unknown category keeps its id as label.
    pub fn load(&mut self, path: &Path) -> Result<usize, ParseError> {
        let raw = std::fs::read_to_string(path)?;
        let coco: CocoFile = serde_json::from_str(&raw)?;

        let categories: HashMap<u64, &str> =
            coco.categories.iter().map(|c| (c.id, c.name.as_str())).collect();
        let mut objects: HashMap<u64, Vec<ObjectRecord>> =
            coco.images.iter().map(|img| (img.id, Vec::new())).collect();

        let mut orphans = 0usize;
        for ann in &coco.annotations {
            let Some([x, y, w, h]) = ann.bbox else {
                continue;
            };
            let Some(list) = objects.get_mut(&ann.image_id) else {
                orphans += 1;
                continue;
            };
            list.push(ObjectRecord {
                label: categories
                    .get(&ann.category_id)
                    .map(|name| name.to_string())
                    .unwrap_or_else(|| ann.category_id.to_string()),
                bbox: BoundingBox::new(x, y, x + w, y + h),
                confidence: ann.score,
            });
        }
        if orphans > 0 {
            tracing::debug!(path = %path.display(), orphans, "COCO annotations without an image");
        }

        let images = coco.images.len();
        for image in coco.images {
            let key = normalize_file_name(&image.file_name);
            let records = objects.remove(&image.id).unwrap_or_default();
            let base = key.rsplit('/').next().unwrap_or(&key).to_string();
            match self.by_file.get_mut(&key) {
                Some((_, existing)) => existing.extend(records),
                None => {
                    self.by_base.entry(base).or_default().push(key.clone());
                    self.by_file.insert(key, (path.to_path_buf(), records));
                }
            }
        }
        Ok(images)
    }

    pub fn is_empty(&self) -> bool {
        self.by_file.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_file.len()
    }

    /// The COCO file and objects for the image with this sample id. An exact
    /// `file_name` match wins; otherwise a `file_name` the id ends with, so
    /// `images/a.png` finds an entry written as `a.png`.
    pub fn lookup(&self, sample_id: &str) -> Option<(&Path, &[ObjectRecord])> {
        let key = self.by_file.get_key_value(sample_id).map(|(k, _)| k.as_str()).or_else(|| {
            let base = sample_id.rsplit('/').next()?;
            self.by_base
                .get(base)?
                .iter()
                .find(|k| Path::new(sample_id).ends_with(k.as_str()))
                .map(String::as_str)
        })?;
        self.by_file
            .get(key)
            .map(|(source, objects)| (source.as_path(), objects.as_slice()))
    }
}

/// The parsers used when the caller does not supply its own.
pub fn default_parsers(root: &Path) -> Vec<Box<dyn AnnotationParser>> {
    vec![Box::new(YoloParser::from_root(root)), Box::new(JsonParser)]
}
