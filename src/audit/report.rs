//! Report builders turn a finished payload into an artifact on disk.
//!
//! A builder failure never fails the audit: the orchestrator logs it and
//! downgrades the run to partial success.

use std::path::{Path, PathBuf};

use thiserror::Error;

use super::payload::AuditPayload;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("I/O error writing report: {0}")]
    Io(#[from] std::io::Error),

    #[error("Report serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Report target rejected: {0}")]
    Rejected(String),
}

pub trait ReportBuilder: Send + Sync {
    fn name(&self) -> &str;

    /// Write the report for `payload` at `target` and return the path of
    /// the artifact actually written.
    fn build(&self, payload: &AuditPayload, target: &Path) -> Result<PathBuf, ReportError>;
}

/// Writes the payload as pretty-printed JSON.
pub struct JsonReportBuilder;

impl ReportBuilder for JsonReportBuilder {
    fn name(&self) -> &str {
        "json"
    }

    fn build(&self, payload: &AuditPayload, target: &Path) -> Result<PathBuf, ReportError> {
        if target.is_dir() {
            return Err(ReportError::Rejected(format!(
                "{} is a directory",
                target.display()
            )));
        }
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(payload)?;
        let tmp = target.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, target)?;
        tracing::info!(builder = self.name(), path = %target.display(), "Report written");
        Ok(target.to_path_buf())
    }
}
