//! Check and feature units, and the registry that holds them.

pub mod checks;
pub mod features;
pub mod manifest;
pub mod registry;
pub mod traits;

pub use manifest::ManifestSource;
pub use registry::{BuiltinSource, DiscoveryReport, DiscoveryWarning, UnitRegistry, UnitSource};
pub use traits::{DistributionSnapshot, Unit, UnitContext, UnitDescriptor, UnitInput};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheError;
use crate::models::UnitScope;

pub const DEFAULT_DUPLICATE_MAX_DISTANCE: u32 = 8;
pub const DEFAULT_OVERLAP_SAME_LABEL_IOU: f64 = 0.9;
pub const DEFAULT_OVERLAP_CROSS_LABEL_IOU: f64 = 0.8;

/// Thresholds of the built-in units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitOptions {
    /// Max Hamming distance between two perceptual hashes still reported
    /// as duplicates.
    pub duplicate_max_distance: u32,
    pub overlap_same_label_iou: f64,
    pub overlap_cross_label_iou: f64,
}

impl Default for UnitOptions {
    fn default() -> Self {
        Self {
            duplicate_max_distance: DEFAULT_DUPLICATE_MAX_DISTANCE,
            overlap_same_label_iou: DEFAULT_OVERLAP_SAME_LABEL_IOU,
            overlap_cross_label_iou: DEFAULT_OVERLAP_CROSS_LABEL_IOU,
        }
    }
}

/// Failure inside one unit run. Always recovered into the error ledger.
#[derive(Error, Debug)]
pub enum UnitError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Unit {0} did not declare cache access")]
    CacheNotDeclared(String),

    #[error("Unit expects {0} input")]
    WrongInput(UnitScope),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Duplicate unit: {0}")]
    DuplicateUnit(String),

    #[error("Invalid unit name: {0:?}")]
    InvalidName(String),

    #[error("Unit {0} has no version")]
    MissingVersion(String),

    #[error("Unknown unit: {0}")]
    UnknownUnit(String),
}
