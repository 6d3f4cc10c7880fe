use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::scheduler::SamplingPolicy;
use crate::engine::summary::Thresholds;
use crate::units::UnitOptions;

/// Application-level constants
pub const APP_NAME: &str = "cvaudit";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Upper bound for the worker count when none is configured.
pub const MAX_DEFAULT_WORKERS: usize = 8;

/// Default number of sample ids kept per sample-list distribution.
pub const DEFAULT_SAMPLE_LIST_CAP: usize = 100;

/// Default grace period for in-flight work after cancellation.
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 2_000;

/// Name of the persisted cache file inside the cache directory.
pub const CACHE_FILE_NAME: &str = "facts.json";

/// Env var consulted before `RUST_LOG`.
pub const LOG_ENV_VAR: &str = "CVAUDIT_LOG";

/// Log filter used when neither `CVAUDIT_LOG` nor `RUST_LOG` is set.
pub fn default_log_filter() -> &'static str {
    if cfg!(debug_assertions) {
        "cvaudit=debug,warn"
    } else {
        "cvaudit=info,warn"
    }
}

/// Directory used for persistent fact caching when none is configured.
/// Falls back to a hidden directory under the working directory on systems
/// without a user cache dir.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join(APP_NAME))
        .unwrap_or_else(|| PathBuf::from(".cvaudit_cache"))
}

/// Worker count bounded by the machine's available parallelism.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(1, MAX_DEFAULT_WORKERS)
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

// ═══════════════════════════════════════════════════════════
// AuditConfig
// ═══════════════════════════════════════════════════════════

/// Everything one audit run needs to know. Every field has a default so a
/// config file only has to name what it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Dataset root to scan.
    pub root: PathBuf,
    /// Allow-list of unit names. `None` runs every registered unit.
    pub enabled: Option<Vec<String>>,
    /// Deny-list of unit names. Wins over `enabled`.
    pub disabled: Vec<String>,
    /// Worker pool size. 0 = available parallelism, capped at `MAX_DEFAULT_WORKERS`.
    pub workers: usize,
    /// Max samples handed to each heavy unit. `None` = no limit.
    pub sample_limit: Option<usize>,
    /// How heavy units pick their bounded subset.
    pub sampling: SamplingPolicy,
    /// Global deadline for the execution phase.
    pub deadline_ms: Option<u64>,
    /// How long in-flight work may keep running once cancelled.
    pub grace_period_ms: u64,
    /// Load and save computed facts across runs.
    pub persist_cache: bool,
    /// Where persisted facts live. `None` = `default_cache_dir()`.
    pub cache_dir: Option<PathBuf>,
    /// Directory of unit manifests to discover.
    pub extension_dir: Option<PathBuf>,
    /// Explicit split manifest (JSON map of relative path to split).
    pub split_manifest: Option<PathBuf>,
    /// Max sample ids retained per sample-list distribution.
    pub sample_list_cap: usize,
    /// Where the report builder writes its artifact. `None` = no report.
    pub report_path: Option<PathBuf>,
    pub thresholds: Thresholds,
    /// Thresholds of the built-in units.
    pub units: UnitOptions,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            enabled: None,
            disabled: Vec::new(),
            workers: 0,
            sample_limit: None,
            sampling: SamplingPolicy::default(),
            deadline_ms: None,
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            persist_cache: false,
            cache_dir: None,
            extension_dir: None,
            split_manifest: None,
            sample_list_cap: DEFAULT_SAMPLE_LIST_CAP,
            report_path: None,
            thresholds: Thresholds::default(),
            units: UnitOptions::default(),
        }
    }
}

impl AuditConfig {
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load a JSON config file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_limit == Some(0) {
            return Err(ConfigError::Invalid(
                "sample_limit must be at least 1 when set".into(),
            ));
        }
        if self.sample_list_cap == 0 {
            return Err(ConfigError::Invalid("sample_list_cap must be at least 1".into()));
        }
        for (name, iou) in [
            ("overlap_same_label_iou", self.units.overlap_same_label_iou),
            ("overlap_cross_label_iou", self.units.overlap_cross_label_iou),
        ] {
            if !(iou > 0.0 && iou <= 1.0) {
                return Err(ConfigError::Invalid(format!("{name} must be in (0, 1], got {iou}")));
            }
        }
        if let Some(enabled) = &self.enabled {
            if enabled.iter().any(|n| n.trim().is_empty()) {
                return Err(ConfigError::Invalid("enabled contains an empty unit name".into()));
            }
        }
        Ok(())
    }

    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            default_worker_count()
        } else {
            self.workers
        }
    }

    pub fn effective_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_dir)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}
