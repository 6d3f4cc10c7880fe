//! Directory layout conventions: which files are images, where their
//! annotations live and which split they belong to.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use super::ScanError;
use crate::models::Split;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tif", "tiff"];

/// Directory names searched for annotation files, in priority order.
pub const ANNOTATION_DIRS: &[&str] = &["labels", "annotations", "Annotations", "label", "annotation"];

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// Root-relative path with `/` separators; the stable sample id.
pub fn sample_id(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Collect every image under `root`, sorted lexicographically by sample id.
///
/// Hidden entries and `skip` directories are not descended into. An
/// unreadable subdirectory is logged and skipped; only an unreadable root is
/// an error.
pub fn walk_images(root: &Path, skip: &[PathBuf]) -> Result<Vec<PathBuf>, ScanError> {
    let mut images = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    let mut first = true;

    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if first => return Err(ScanError::Io(e)),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                continue;
            }
        };
        first = false;

        for entry in entries.flatten() {
            let path = entry.path();
            if is_hidden(&path) {
                continue;
            }
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                if !skip.iter().any(|s| s == &path) {
                    pending.push(path);
                }
            } else if file_type.is_file() && is_image(&path) {
                images.push(path);
            }
        }
    }

    images.sort_by_cached_key(|p| sample_id(root, p));
    Ok(images)
}

/// Split from directory naming: the component closest to the file wins,
/// so `train/images/val/x.jpg` is `val`.
pub fn split_from_path(root: &Path, path: &Path) -> Split {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.parent()
        .map(|parent| {
            parent
                .components()
                .rev()
                .filter_map(|c| match c {
                    Component::Normal(part) => part.to_str().and_then(Split::from_dir_name),
                    _ => None,
                })
                .next()
                .unwrap_or(Split::Unknown)
        })
        .unwrap_or(Split::Unknown)
}

/// Directories that may hold the annotation of `image`, in search order:
/// the image's own directory, annotation dirs inside it, annotation dirs next
/// to it, and (for `images/<split>/x.jpg` layouts) `<ann>/<split>` next to the
/// `images` directory. Only existing directories are returned.
pub fn annotation_dirs(image: &Path) -> Vec<PathBuf> {
    let Some(dir) = image.parent() else {
        return Vec::new();
    };
    let mut dirs = vec![dir.to_path_buf()];

    for name in ANNOTATION_DIRS {
        dirs.push(dir.join(name));
    }
    if let Some(parent) = dir.parent() {
        for name in ANNOTATION_DIRS {
            dirs.push(parent.join(name));
        }
        // dataset/images/train/x.jpg -> dataset/labels/train/x.txt
        if parent.file_name().and_then(|n| n.to_str()) == Some("images") {
            if let (Some(grand), Some(split_dir)) = (parent.parent(), dir.file_name()) {
                for name in ANNOTATION_DIRS {
                    dirs.push(grand.join(name).join(split_dir));
                }
            }
        }
    }

    let mut seen = std::collections::HashSet::new();
    dirs.retain(|d| d.is_dir() && seen.insert(d.clone()));
    dirs
}

// ═══════════════════════════════════════════
// Split manifest
// ═══════════════════════════════════════════

/// Explicit split assignment: JSON object mapping root-relative image path
/// to split name. Entries here override directory naming.
#[derive(Debug, Clone, Default)]
pub struct SplitManifest {
    entries: BTreeMap<String, Split>,
}

impl SplitManifest {
    pub fn from_file(path: &Path) -> Result<Self, ScanError> {
        let raw = std::fs::read_to_string(path)?;
        let entries: BTreeMap<String, Split> =
            serde_json::from_str(&raw).map_err(|e| ScanError::Manifest {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(Self { entries })
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (String, Split)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn split_for(&self, sample_id: &str) -> Option<Split> {
        self.entries.get(sample_id).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
