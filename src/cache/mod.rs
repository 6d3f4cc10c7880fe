//! Metadata cache: lazily computed, expensive per-image facts.
//!
//! One `MetadataCache` instance lives for one audit run and is shared by the
//! scanner, every worker and the aggregator. Facts are computed at most once
//! per `(sample_id, fact)` (single-flight); failures are remembered as an
//! `unavailable` sentinel instead of being retried. With persistence enabled
//! the facts survive the run, keyed by a file fingerprint.

pub mod facts;
pub mod persist;
pub mod store;

pub use persist::{Fingerprint, PersistError};
pub use store::{CacheKey, CacheStats, FactValue, MetadataCache};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("Fact '{fact}' unavailable for {sample_id}: {reason}")]
    Unavailable {
        sample_id: String,
        fact: String,
        reason: String,
    },

    #[error("Fact '{fact}' for {sample_id} has an unexpected shape: {reason}")]
    Decode {
        sample_id: String,
        fact: String,
        reason: String,
    },
}
