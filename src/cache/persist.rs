//! Fingerprint-keyed fact store persisted between runs.
//!
//! File layout (JSON):
//! ```text
//! { "version": 1, "app_version": "0.1.0",
//!   "entries": { "<fingerprint>": { "<fact>": {"status": "ready", "value": ...} } } }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::store::FactValue;
use crate::config::APP_VERSION;

/// Bump when the on-disk layout or a fact's encoding changes.
const STORE_VERSION: u32 = 1;

pub type PersistedFacts = HashMap<Fingerprint, BTreeMap<String, FactValue>>;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid cache file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Identity of a file's content for caching purposes: path, size and
/// modification time, hashed. Any change to one of them invalidates every
/// persisted fact of that file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(path: &Path, size_bytes: u64, modified: Option<SystemTime>) -> Self {
        let mtime_nanos = modified
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);

        let mut hasher = Sha256::new();
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(size_bytes.to_le_bytes());
        hasher.update([0u8]);
        hasher.update(mtime_nanos.to_le_bytes());
        let digest = hasher.finalize();
        Self(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    app_version: String,
    entries: BTreeMap<Fingerprint, BTreeMap<String, FactValue>>,
}

/// Load the persisted store. A missing file or a file written by another
/// store version is treated as empty.
pub fn load(path: &Path) -> Result<PersistedFacts, PersistError> {
    if !path.exists() {
        return Ok(PersistedFacts::new());
    }
    let raw = std::fs::read_to_string(path)?;
    let file: StoreFile = serde_json::from_str(&raw)?;
    if file.version != STORE_VERSION {
        tracing::warn!(
            path = %path.display(),
            found = file.version,
            expected = STORE_VERSION,
            "Ignoring persisted facts from another store version"
        );
        return Ok(PersistedFacts::new());
    }
    Ok(file.entries.into_iter().collect())
}

/// Write the store via a temp file + rename so a crash never leaves a
/// half-written cache behind.
pub fn save(path: &Path, facts: &PersistedFacts) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = StoreFile {
        version: STORE_VERSION,
        app_version: APP_VERSION.to_string(),
        entries: facts
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    };
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(&file)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
