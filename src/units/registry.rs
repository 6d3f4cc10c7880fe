//! Plugin registry: validation at registration, discovery from sources and
//! allow/deny resolution into an execution order.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::checks;
use super::features;
use super::traits::Unit;
use super::{RegistryError, UnitOptions};
use crate::models::UnitKind;

static UNIT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("unit name pattern is valid"));

// ═══════════════════════════════════════════
// Sources
// ═══════════════════════════════════════════

/// One candidate produced by a source: a unit, or the reason the item could
/// not be turned into one.
pub type Candidate = Result<Arc<dyn Unit>, String>;

/// Somewhere units can be discovered from.
pub trait UnitSource {
    /// Label used in discovery warnings.
    fn label(&self) -> String;

    fn candidates(&self) -> Vec<Candidate>;
}

/// The units shipped with the crate: core checks, then features.
#[derive(Debug, Clone, Default)]
pub struct BuiltinSource {
    options: UnitOptions,
}

impl BuiltinSource {
    pub fn new(options: UnitOptions) -> Self {
        Self { options }
    }
}

impl UnitSource for BuiltinSource {
    fn label(&self) -> String {
        "builtin".to_string()
    }

    fn candidates(&self) -> Vec<Candidate> {
        checks::builtin(&self.options)
            .into_iter()
            .chain(features::builtin(&self.options))
            .map(Ok)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryWarning {
    pub source: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub registered: usize,
    pub warnings: Vec<DiscoveryWarning>,
}

// ═══════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════

/// Ordered, named collection of units.
///
/// Names are unique. An explicit `register` of a taken name is rejected and
/// also poisons `resolve`, so a shadowing attempt can never go unnoticed.
/// Discovery treats the same conflict as a skipped item with a warning.
#[derive(Default)]
pub struct UnitRegistry {
    units: Vec<Arc<dyn Unit>>,
    names: HashSet<String>,
    conflicts: Vec<String>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in unit.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.discover(&[&BuiltinSource::default()]);
        registry
    }

    fn validate(&self, unit: &dyn Unit) -> Result<(), RegistryError> {
        let d = unit.descriptor();
        if !UNIT_NAME.is_match(&d.name) {
            return Err(RegistryError::InvalidName(d.name.clone()));
        }
        if d.version.trim().is_empty() {
            return Err(RegistryError::MissingVersion(d.name.clone()));
        }
        if self.names.contains(&d.name) {
            return Err(RegistryError::DuplicateUnit(d.name.clone()));
        }
        Ok(())
    }

    fn admit(&mut self, unit: Arc<dyn Unit>) {
        self.names.insert(unit.name().to_string());
        self.units.push(unit);
    }

    pub fn register(&mut self, unit: Arc<dyn Unit>) -> Result<(), RegistryError> {
        match self.validate(unit.as_ref()) {
            Ok(()) => {
                tracing::debug!(unit = unit.name(), "Unit registered");
                self.admit(unit);
                Ok(())
            }
            Err(e) => {
                if let RegistryError::DuplicateUnit(name) = &e {
                    self.conflicts.push(name.clone());
                }
                Err(e)
            }
        }
    }

    /// Admit every valid candidate of every source. Invalid items are skipped
    /// with a warning; discovery itself never fails.
    pub fn discover(&mut self, sources: &[&dyn UnitSource]) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        for source in sources {
            let label = source.label();
            for candidate in source.candidates() {
                let outcome = candidate.and_then(|unit| {
                    self.validate(unit.as_ref()).map_err(|e| e.to_string())?;
                    Ok(unit)
                });
                match outcome {
                    Ok(unit) => {
                        self.admit(unit);
                        report.registered += 1;
                    }
                    Err(message) => {
                        tracing::warn!(source = %label, reason = %message, "Skipping unit");
                        report.warnings.push(DiscoveryWarning {
                            source: label.clone(),
                            message,
                        });
                    }
                }
            }
        }
        tracing::info!(
            registered = report.registered,
            skipped = report.warnings.len(),
            "Unit discovery complete"
        );
        report
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Unit>> {
        self.units.iter().find(|u| u.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.units.iter().map(|u| u.name()).collect()
    }

    /// Units to execute: the allow-list (every unit when `None`) minus the
    /// deny-list, checks first then features, each in registration order.
    /// Naming an unregistered unit in either list is an error.
    pub fn resolve(
        &self,
        enabled: Option<&[String]>,
        disabled: &[String],
    ) -> Result<Vec<Arc<dyn Unit>>, RegistryError> {
        if let Some(name) = self.conflicts.first() {
            return Err(RegistryError::DuplicateUnit(name.clone()));
        }
        for name in enabled.unwrap_or_default().iter().chain(disabled) {
            if !self.names.contains(name) {
                return Err(RegistryError::UnknownUnit(name.clone()));
            }
        }

        let selected = |unit: &&Arc<dyn Unit>| {
            let name = unit.name();
            let allowed = enabled.map_or(true, |list| list.iter().any(|n| n == name));
            allowed && !disabled.iter().any(|n| n == name)
        };
        let of_kind = |kind: UnitKind| {
            self.units
                .iter()
                .filter(selected)
                .filter(move |u| u.descriptor().kind == kind)
                .cloned()
        };

        Ok(of_kind(UnitKind::Check).chain(of_kind(UnitKind::Feature)).collect())
    }
}
