//! Audit orchestration: one entry point that scans, resolves units, executes
//! them, folds their results and hands the frozen payload to a report
//! builder.
//!
//! ```text
//! Idle -> Scanning -> Executing -> Aggregating -> Done
//!            |            |
//!            +------------+------> Failed   (scan root or unit resolution)
//! ```

pub mod orchestrator;
pub mod payload;
pub mod report;

pub use orchestrator::Auditor;
pub use payload::{AuditOutcome, AuditPayload, RunMetadata, SampleIndexEntry, UnitInfo};
pub use report::{JsonReportBuilder, ReportBuilder, ReportError};

use thiserror::Error;

use crate::config::ConfigError;
use crate::models::AuditState;
use crate::scan::ScanError;
use crate::units::RegistryError;

/// Fatal audit failures. Everything else ends up in the error ledger.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Scan failed: {0}")]
    Scan(#[from] ScanError),

    #[error("Unit resolution failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("Audit can only start from idle, current state is {0}")]
    NotIdle(AuditState),
}
