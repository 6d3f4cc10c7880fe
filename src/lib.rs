pub mod audit;
pub mod cache;
pub mod config;
pub mod engine;
pub mod models;
pub mod scan;
pub mod units;

use tracing_subscriber::EnvFilter;

pub use audit::{AuditError, AuditOutcome, AuditPayload, Auditor};
pub use config::AuditConfig;

/// Install the global subscriber. The filter comes from `CVAUDIT_LOG`, then
/// `RUST_LOG`, then `config::default_log_filter()`. Safe to call twice.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(config::LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
