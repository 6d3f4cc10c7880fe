use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::layout::{self, SplitManifest};
use super::parsers::{default_parsers, AnnotationParser, CocoIndex, COCO_CANDIDATES};
use super::ScanError;
use crate::cache::{facts, CacheError, Fingerprint, MetadataCache};
use crate::models::{AnnotationState, ObjectRecord, Sample};

/// A problem found while scanning. Recorded in the error ledger; never
/// fails the scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanFinding {
    /// `None` for dataset-wide problems such as an unreadable COCO file.
    pub sample_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ScanReport {
    /// Samples in lexicographic id order.
    pub samples: Vec<Sample>,
    pub findings: Vec<ScanFinding>,
}

/// Walks a dataset root and produces the ordered sample sequence.
pub struct DatasetScanner {
    parsers: Vec<Box<dyn AnnotationParser>>,
    manifest: Option<SplitManifest>,
    skip_dirs: Vec<PathBuf>,
}

impl DatasetScanner {
    /// Scanner with the default parsers (YOLO with `classes.txt` names from
    /// `root`, then per-image JSON).
    pub fn for_root(root: &Path) -> Self {
        Self::with_parsers(default_parsers(root))
    }

    pub fn with_parsers(parsers: Vec<Box<dyn AnnotationParser>>) -> Self {
        Self {
            parsers,
            manifest: None,
            skip_dirs: Vec::new(),
        }
    }

    pub fn with_manifest(mut self, manifest: SplitManifest) -> Self {
        self.manifest = Some(manifest);
        self
    }

    /// Never descend into `dir` (e.g. a cache directory inside the dataset).
    pub fn skip_dir(mut self, dir: PathBuf) -> Self {
        self.skip_dirs.push(dir);
        self
    }

    /// Scan `root`. Fails only when the root is missing, not a directory, or
    /// contains no images. Annotations are parsed through the cache so a
    /// persisted run skips re-parsing unchanged files.
    pub fn scan(&self, root: &Path, cache: &MetadataCache) -> Result<ScanReport, ScanError> {
        if !root.exists() {
            return Err(ScanError::RootMissing(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(ScanError::NotADirectory(root.to_path_buf()));
        }

        let images = layout::walk_images(root, &self.skip_dirs)?;
        if images.is_empty() {
            return Err(ScanError::NoImages(root.to_path_buf()));
        }

        let mut samples = Vec::with_capacity(images.len());
        let mut findings = Vec::new();
        let coco = Self::load_coco(root, &mut findings);

        for image_path in images {
            let id = layout::sample_id(root, &image_path);
            let (size_bytes, modified) = match std::fs::metadata(&image_path) {
                Ok(meta) => (meta.len(), meta.modified().ok()),
                Err(e) => {
                    findings.push(ScanFinding {
                        sample_id: Some(id.clone()),
                        message: format!("image metadata unreadable: {e}"),
                    });
                    (0, None)
                }
            };
            cache.register_sample(&id, Fingerprint::of(&image_path, size_bytes, modified));

            let split = self
                .manifest
                .as_ref()
                .and_then(|m| m.split_for(&id))
                .unwrap_or_else(|| layout::split_from_path(root, &image_path));

            let mut sample = Sample {
                id,
                image_path,
                split,
                annotation: AnnotationState::Missing,
                size_bytes,
                modified,
            };
            sample.annotation = match coco.lookup(&sample.id) {
                Some((source, objects)) => AnnotationState::Present {
                    source: source.to_path_buf(),
                    objects: objects.to_vec(),
                },
                None => self.load_annotation(&sample, cache),
            };

            if let AnnotationState::Unreadable { source, reason } = &sample.annotation {
                tracing::debug!(sample = %sample.id, source = %source.display(), "Annotation unreadable");
                findings.push(ScanFinding {
                    sample_id: Some(sample.id.clone()),
                    message: format!("annotation unreadable ({}): {reason}", source.display()),
                });
            }
            samples.push(sample);
        }

        tracing::info!(
            root = %root.display(),
            samples = samples.len(),
            findings = findings.len(),
            "Dataset scanned"
        );
        Ok(ScanReport { samples, findings })
    }

    /// Every COCO file present at the root, merged. Images it lists take
    /// their annotations from it; the rest fall back to per-image files.
    fn load_coco(root: &Path, findings: &mut Vec<ScanFinding>) -> CocoIndex {
        let mut index = CocoIndex::new();
        for candidate in COCO_CANDIDATES {
            let path = root.join(candidate);
            if !path.is_file() {
                continue;
            }
            match index.load(&path) {
                Ok(images) => tracing::info!(path = %path.display(), images, "COCO annotations loaded"),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "COCO file unreadable");
                    findings.push(ScanFinding {
                        sample_id: None,
                        message: format!("COCO file unreadable ({}): {e}", path.display()),
                    });
                }
            }
        }
        index
    }

    /// First annotation file whose stem matches the image, searched by
    /// directory priority then parser priority.
    fn find_annotation(&self, image: &Path) -> Option<(PathBuf, &dyn AnnotationParser)> {
        let stem = image.file_stem()?.to_str()?;
        for dir in layout::annotation_dirs(image) {
            for parser in &self.parsers {
                for ext in parser.extensions() {
                    let candidate = dir.join(format!("{stem}.{ext}"));
                    if candidate.is_file() {
                        return Some((candidate, parser.as_ref()));
                    }
                }
            }
        }
        None
    }

    fn load_annotation(&self, sample: &Sample, cache: &MetadataCache) -> AnnotationState {
        let Some((source, parser)) = self.find_annotation(&sample.image_path) else {
            return AnnotationState::Missing;
        };

        // Persisted facts are keyed by the image fingerprint; the annotation
        // file's own fingerprint goes into the fact name so edited labels are
        // re-parsed.
        let fact = match std::fs::metadata(&source) {
            Ok(meta) => format!(
                "{}:{}",
                facts::ANNOTATION,
                Fingerprint::of(&source, meta.len(), meta.modified().ok()).as_str()
            ),
            Err(_) => facts::ANNOTATION.to_string(),
        };
        let parsed: Result<Vec<ObjectRecord>, CacheError> =
            cache.get_or_compute_as(&sample.id, &fact, || {
                let dimensions = if parser.needs_dimensions() {
                    Some(cache.dimensions(sample).map_err(|e| e.to_string())?)
                } else {
                    None
                };
                parser
                    .parse(&source, dimensions)
                    .map_err(|e| format!("{} parser: {e}", parser.name()))
            });

        match parsed {
            Ok(objects) => AnnotationState::Present { source, objects },
            Err(CacheError::Unavailable { reason, .. }) | Err(CacheError::Decode { reason, .. }) => {
                AnnotationState::Unreadable { source, reason }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BoundingBox, Split};

    fn write_png(path: &Path, w: u32, h: u32) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        image::RgbImage::from_pixel(w, h, image::Rgb([40, 80, 120]))
            .save(path)
            .unwrap();
    }

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn missing_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("absent");
        let err = DatasetScanner::for_root(&root)
            .scan(&root, &MetadataCache::new())
            .unwrap_err();
        assert!(matches!(err, ScanError::RootMissing(_)));
    }

    #[test]
    fn root_without_images_fails() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("readme.txt"), "hello");
        let err = DatasetScanner::for_root(dir.path())
            .scan(dir.path(), &MetadataCache::new())
            .unwrap_err();
        assert!(matches!(err, ScanError::NoImages(_)));
    }

    #[test]
    fn distinguishes_missing_empty_unreadable_and_present() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_png(&root.join("a.png"), 10, 10);
        write_png(&root.join("b.png"), 10, 10);
        write_png(&root.join("c.png"), 10, 10);
        write_png(&root.join("d.png"), 10, 10);
        write(&root.join("b.txt"), "");
        write(&root.join("c.json"), "{ broken");
        write(&root.join("d.json"), r#"{"objects": [{"label": "cat", "bbox": [0, 0, 5, 5]}]}"#);

        let cache = MetadataCache::new();
        let report = DatasetScanner::for_root(root).scan(root, &cache).unwrap();
        let by_id = |id: &str| report.samples.iter().find(|s| s.id == id).unwrap();

        assert!(by_id("a.png").annotation.is_missing());
        assert!(matches!(
            &by_id("b.png").annotation,
            AnnotationState::Present { objects, .. } if objects.is_empty()
        ));
        assert!(by_id("c.png").annotation.is_unreadable());
        assert_eq!(by_id("d.png").objects()[0].label, "cat");

        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].sample_id.as_deref(), Some("c.png"));
    }

    #[test]
    fn order_is_deterministic_and_lexicographic() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for name in ["z.png", "m.png", "a.png"] {
            write_png(&root.join("train").join(name), 2, 2);
        }
        let scanner = DatasetScanner::for_root(root);
        let first: Vec<String> = scanner
            .scan(root, &MetadataCache::new())
            .unwrap()
            .samples
            .into_iter()
            .map(|s| s.id)
            .collect();
        let second: Vec<String> = scanner
            .scan(root, &MetadataCache::new())
            .unwrap()
            .samples
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(first, vec!["train/a.png", "train/m.png", "train/z.png"]);
        assert_eq!(first, second);
    }

    #[test]
    fn yolo_labels_in_sibling_dir_use_cached_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_png(&root.join("train/images/a.png"), 100, 50);
        write(&root.join("train/labels/a.txt"), "0 0.5 0.5 1.0 1.0\n");
        write(&root.join("classes.txt"), "cat\n");

        let cache = MetadataCache::new();
        let report = DatasetScanner::for_root(root).scan(root, &cache).unwrap();
        let sample = &report.samples[0];

        assert_eq!(sample.split, Split::Train);
        assert_eq!(sample.objects()[0].label, "cat");
        assert_eq!(sample.objects()[0].bbox.x_max, 100.0);
        assert!(cache.get(&sample.id, facts::DIMENSIONS).is_some());
    }

    #[test]
    fn coco_file_at_root_annotates_listed_images() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_png(&root.join("images/a.png"), 20, 20);
        write_png(&root.join("images/b.png"), 20, 20);
        write_png(&root.join("images/c.png"), 20, 20);
        write(&root.join("images/c.json"), r#"[{"label": "dog", "bbox": [0, 0, 2, 2]}]"#);
        write(
            &root.join("annotations.json"),
            r#"{
                "images": [{"id": 1, "file_name": "a.png"}, {"id": 2, "file_name": "b.png"}],
                "annotations": [
                    {"id": 1, "image_id": 1, "category_id": 3, "bbox": [2, 2, 4, 6]},
                    {"id": 2, "image_id": 1, "category_id": 3, "bbox": [10, 10, 5, 5]}
                ],
                "categories": [{"id": 3, "name": "cat"}]
            }"#,
        );

        let report = DatasetScanner::for_root(root)
            .scan(root, &MetadataCache::new())
            .unwrap();
        let by_id = |id: &str| report.samples.iter().find(|s| s.id == id).unwrap();

        let a = by_id("images/a.png");
        assert_eq!(a.objects().len(), 2);
        assert!(a.objects().iter().all(|o| o.label == "cat"));
        assert_eq!(a.objects()[0].bbox, BoundingBox::new(2.0, 2.0, 6.0, 8.0));
        assert!(matches!(
            &by_id("images/b.png").annotation,
            AnnotationState::Present { objects, source } if objects.is_empty() && source.ends_with("annotations.json")
        ));
        // Not listed in the COCO file: per-image labels still apply.
        assert_eq!(by_id("images/c.png").objects()[0].label, "dog");
        assert!(report.findings.is_empty());
    }

    #[test]
    fn unreadable_coco_file_is_a_dataset_finding() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_png(&root.join("a.png"), 4, 4);
        write(&root.join("instances.json"), "{ truncated");

        let report = DatasetScanner::for_root(root)
            .scan(root, &MetadataCache::new())
            .unwrap();
        assert!(report.samples[0].annotation.is_missing());
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].sample_id, None);
    }

    #[test]
    fn manifest_split_overrides_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_png(&root.join("train/a.png"), 2, 2);

        let manifest = SplitManifest::from_entries([("train/a.png".to_string(), Split::Test)]);
        let report = DatasetScanner::for_root(root)
            .with_manifest(manifest)
            .scan(root, &MetadataCache::new())
            .unwrap();
        assert_eq!(report.samples[0].split, Split::Test);
    }

    #[test]
    fn records_size_and_registers_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_png(&root.join("a.png"), 3, 3);

        let report = DatasetScanner::for_root(root)
            .scan(root, &MetadataCache::new())
            .unwrap();
        let expected = std::fs::metadata(root.join("a.png")).unwrap().len();
        assert_eq!(report.samples[0].size_bytes, expected);
        assert!(report.samples[0].modified.is_some());
    }
}
