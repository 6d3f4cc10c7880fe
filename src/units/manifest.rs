//! Units declared by JSON manifests in an extension directory.
//!
//! ```json
//! { "name": "allowed_labels", "version": "1", "template": "label_allowlist",
//!   "labels": ["cat", "dog"] }
//! { "name": "too_small", "version": "2", "kind": "check",
//!   "template": "min_dimensions", "min_width": 64, "min_height": 64 }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use super::registry::{Candidate, UnitSource};
use super::traits::{Unit, UnitContext, UnitDescriptor, UnitInput};
use super::UnitError;
use crate::cache::CacheError;
use crate::engine::result::ResultValue;
use crate::models::{ResultKind, UnitKind};

#[derive(Debug, Deserialize)]
struct UnitManifest {
    name: String,
    #[serde(default)]
    version: String,
    #[serde(default = "default_kind")]
    kind: UnitKind,
    #[serde(flatten)]
    template: Template,
}

fn default_kind() -> UnitKind {
    UnitKind::Feature
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "template", rename_all = "snake_case")]
enum Template {
    LabelAllowlist { labels: Vec<String> },
    MinDimensions { min_width: u32, min_height: u32 },
}

impl UnitManifest {
    fn into_unit(self) -> Arc<dyn Unit> {
        let descriptor = UnitDescriptor::new(&self.name, self.kind, ResultKind::SampleList)
            .version(&self.version);
        let descriptor = match self.template {
            Template::MinDimensions { .. } => descriptor.reads_cache(),
            Template::LabelAllowlist { .. } => descriptor,
        };
        Arc::new(TemplateUnit {
            descriptor,
            template: self.template,
        })
    }
}

/// Reads `*.json` manifests from one directory, in file-name order.
pub struct ManifestSource {
    dir: PathBuf,
}

impl ManifestSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn load(path: &Path) -> Result<Arc<dyn Unit>, String> {
        let raw = std::fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
        let manifest: UnitManifest =
            serde_json::from_str(&raw).map_err(|e| format!("{}: {e}", path.display()))?;
        Ok(manifest.into_unit())
    }
}

impl UnitSource for ManifestSource {
    fn label(&self) -> String {
        format!("manifests:{}", self.dir.display())
    }

    fn candidates(&self) -> Vec<Candidate> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => return vec![Err(format!("{}: {e}", self.dir.display()))],
        };
        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == "json"))
            .collect();
        paths.sort();
        paths.iter().map(|p| Self::load(p)).collect()
    }
}

// ═══════════════════════════════════════════
// Template units
// ═══════════════════════════════════════════

struct TemplateUnit {
    descriptor: UnitDescriptor,
    template: Template,
}

impl Unit for TemplateUnit {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    fn run(&self, input: UnitInput<'_>, ctx: &UnitContext<'_>) -> Result<ResultValue, UnitError> {
        let sample = input.sample()?;
        let hit = match &self.template {
            Template::LabelAllowlist { labels } => sample
                .objects()
                .iter()
                .any(|o| !labels.iter().any(|l| l == &o.label)),
            Template::MinDimensions { min_width, min_height } => {
                match ctx.cache()?.dimensions(sample) {
                    Ok(d) => d.width < *min_width || d.height < *min_height,
                    Err(CacheError::Unavailable { .. }) => false,
                    Err(e) => return Err(e.into()),
                }
            }
        };
        Ok(if hit {
            ResultValue::SampleList(vec![sample.id.clone()])
        } else {
            ResultValue::empty_sample_list()
        })
    }
}
