//! The unit plugin contract.
//!
//! A unit is a named, versioned piece of analysis that runs against one
//! sample or against the whole dataset and returns one `ResultValue`. Its
//! descriptor declares everything the registry and scheduler need to know
//! before it ever runs: scope, cost, cache access and result kind.

use std::collections::BTreeMap;

use super::UnitError;
use crate::cache::MetadataCache;
use crate::engine::aggregate::Distribution;
use crate::engine::result::ResultValue;
use crate::models::{CacheAccess, ResultKind, Sample, UnitCost, UnitKind, UnitScope};

pub const DEFAULT_UNIT_VERSION: &str = "1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitDescriptor {
    pub name: String,
    pub version: String,
    pub kind: UnitKind,
    pub scope: UnitScope,
    pub cost: UnitCost,
    pub access: CacheAccess,
    pub result_kind: ResultKind,
}

impl UnitDescriptor {
    /// Light, read-only, per-sample unit at version 1.
    pub fn new(name: &str, kind: UnitKind, result_kind: ResultKind) -> Self {
        Self {
            name: name.to_string(),
            version: DEFAULT_UNIT_VERSION.to_string(),
            kind,
            scope: UnitScope::PerSample,
            cost: UnitCost::Light,
            access: CacheAccess::ReadOnly,
            result_kind,
        }
    }

    pub fn version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn dataset_level(mut self) -> Self {
        self.scope = UnitScope::Dataset;
        self
    }

    pub fn heavy(mut self) -> Self {
        self.cost = UnitCost::Heavy;
        self
    }

    pub fn reads_cache(mut self) -> Self {
        self.access = CacheAccess::ReadsCache;
        self
    }
}

/// Snapshot of per-sample distributions handed to dataset-level units.
pub type DistributionSnapshot = BTreeMap<String, Distribution>;

/// What a unit runs against.
#[derive(Debug, Clone, Copy)]
pub enum UnitInput<'a> {
    Sample(&'a Sample),
    Dataset {
        /// Every sample the unit may see, in scan order (already limited for
        /// heavy units).
        samples: &'a [Sample],
        /// Distributions folded from the per-sample phase.
        upstream: &'a DistributionSnapshot,
    },
}

impl<'a> UnitInput<'a> {
    pub fn sample(&self) -> Result<&'a Sample, UnitError> {
        match *self {
            Self::Sample(sample) => Ok(sample),
            Self::Dataset { .. } => Err(UnitError::WrongInput(UnitScope::PerSample)),
        }
    }

    pub fn samples(&self) -> Result<&'a [Sample], UnitError> {
        match *self {
            Self::Dataset { samples, .. } => Ok(samples),
            Self::Sample(_) => Err(UnitError::WrongInput(UnitScope::Dataset)),
        }
    }
}

/// Per-run context. The cache handle is only present for units that
/// declared `CacheAccess::ReadsCache`.
pub struct UnitContext<'a> {
    unit: &'a str,
    cache: Option<&'a MetadataCache>,
}

impl<'a> UnitContext<'a> {
    pub fn new(descriptor: &'a UnitDescriptor, cache: &'a MetadataCache) -> Self {
        let cache = match descriptor.access {
            CacheAccess::ReadsCache => Some(cache),
            CacheAccess::ReadOnly => None,
        };
        Self {
            unit: &descriptor.name,
            cache,
        }
    }

    /// Context without any cache access.
    pub fn detached(unit: &'a str) -> Self {
        Self { unit, cache: None }
    }

    pub fn cache(&self) -> Result<&'a MetadataCache, UnitError> {
        self.cache
            .ok_or_else(|| UnitError::CacheNotDeclared(self.unit.to_string()))
    }
}

/// A check or feature. Implementations must not touch shared state outside
/// the metadata cache.
pub trait Unit: Send + Sync {
    fn descriptor(&self) -> &UnitDescriptor;

    fn run(&self, input: UnitInput<'_>, ctx: &UnitContext<'_>) -> Result<ResultValue, UnitError>;

    fn name(&self) -> &str {
        &self.descriptor().name
    }
}
