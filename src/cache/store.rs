use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, RwLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::persist::{self, Fingerprint, PersistError, PersistedFacts};
use super::CacheError;

// ═══════════════════════════════════════════
// Types
// ═══════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub sample_id: String,
    pub fact: String,
}

impl CacheKey {
    pub fn new(sample_id: &str, fact: &str) -> Self {
        Self {
            sample_id: sample_id.to_string(),
            fact: fact.to_string(),
        }
    }
}

/// A resolved fact. `Unavailable` is the sentinel stored when the
/// computation failed; it is served to later callers instead of recomputing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum FactValue {
    Ready(serde_json::Value),
    Unavailable(String),
}

/// Counters exposed in the audit payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups answered by an already resolved (or in-flight) entry.
    pub hits: u64,
    /// Lookups that had to resolve the entry themselves.
    pub misses: u64,
    /// Times a compute function actually ran.
    pub computations: u64,
    /// Entries restored from the persisted store instead of computed.
    pub restored: u64,
    /// Entries currently stored as unavailable.
    pub unavailable: u64,
}

type Slot = Arc<OnceLock<FactValue>>;

// ═══════════════════════════════════════════
// MetadataCache
// ═══════════════════════════════════════════

/// Single-flight fact cache.
///
/// Each key owns a `OnceLock` slot. The map lock is only held to find or
/// create the slot; the computation itself runs inside `OnceLock::get_or_init`,
/// so concurrent callers for the same key block on the one in-flight
/// computation while callers for other keys proceed.
///
/// A compute function must not request its own key (it would wait on itself).
pub struct MetadataCache {
    slots: Mutex<HashMap<CacheKey, Slot>>,
    fingerprints: RwLock<HashMap<String, Fingerprint>>,
    persisted: Mutex<PersistedFacts>,
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
    restored: AtomicU64,
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataCache {
    /// In-memory cache scoped to one run.
    pub fn new() -> Self {
        Self::with_persisted(PersistedFacts::new())
    }

    fn with_persisted(persisted: PersistedFacts) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            fingerprints: RwLock::new(HashMap::new()),
            persisted: Mutex::new(persisted),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            computations: AtomicU64::new(0),
            restored: AtomicU64::new(0),
        }
    }

    /// Cache seeded from a persisted store. A missing or outdated file yields
    /// an empty cache; only an unreadable file is an error.
    pub fn load(path: &Path) -> Result<Self, PersistError> {
        let persisted = persist::load(path)?;
        tracing::debug!(
            path = %path.display(),
            fingerprints = persisted.len(),
            "Loaded persisted facts"
        );
        Ok(Self::with_persisted(persisted))
    }

    /// Associate a sample id with the fingerprint of its file so facts can be
    /// restored from and saved to the persisted store.
    pub fn register_sample(&self, sample_id: &str, fingerprint: Fingerprint) {
        let mut map = match self.fingerprints.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.insert(sample_id.to_string(), fingerprint);
    }

    fn fingerprint_of(&self, sample_id: &str) -> Option<Fingerprint> {
        let map = match self.fingerprints.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.get(sample_id).cloned()
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<CacheKey, Slot>> {
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_persisted(&self) -> MutexGuard<'_, PersistedFacts> {
        match self.persisted.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn slot(&self, key: &CacheKey) -> Slot {
        let mut slots = self.lock_slots();
        slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceLock::new()))
            .clone()
    }

    /// Take a persisted value for this key, if the sample's fingerprint has one.
    fn restore(&self, key: &CacheKey) -> Option<FactValue> {
        let fingerprint = self.fingerprint_of(&key.sample_id)?;
        let mut persisted = self.lock_persisted();
        let facts = persisted.get_mut(&fingerprint)?;
        facts.remove(&key.fact)
    }

    /// Resolve a fact, computing it at most once.
    ///
    /// Concurrent callers for the same key all receive the result of the
    /// single computation, including its failure.
    pub fn get_or_compute<F>(
        &self,
        sample_id: &str,
        fact: &str,
        compute: F,
    ) -> Result<serde_json::Value, CacheError>
    where
        F: FnOnce() -> Result<serde_json::Value, String>,
    {
        let key = CacheKey::new(sample_id, fact);
        let slot = self.slot(&key);

        let mut resolved_here = false;
        let value = slot.get_or_init(|| {
            resolved_here = true;
            if let Some(restored) = self.restore(&key) {
                self.restored.fetch_add(1, Ordering::Relaxed);
                return restored;
            }
            self.computations.fetch_add(1, Ordering::Relaxed);
            match compute() {
                Ok(value) => FactValue::Ready(value),
                Err(reason) => {
                    tracing::debug!(
                        sample = sample_id,
                        fact = fact,
                        reason = %reason,
                        "Fact unavailable"
                    );
                    FactValue::Unavailable(reason)
                }
            }
        });

        if resolved_here {
            self.misses.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }

        match value {
            FactValue::Ready(v) => Ok(v.clone()),
            FactValue::Unavailable(reason) => Err(CacheError::Unavailable {
                sample_id: sample_id.to_string(),
                fact: fact.to_string(),
                reason: reason.clone(),
            }),
        }
    }

    /// Typed wrapper over `get_or_compute`: values are stored as JSON so they
    /// can be persisted, and decoded back on every read.
    pub fn get_or_compute_as<T, F, E>(
        &self,
        sample_id: &str,
        fact: &str,
        compute: F,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, E>,
        E: std::fmt::Display,
    {
        let value = self.get_or_compute(sample_id, fact, || {
            let typed = compute().map_err(|e| e.to_string())?;
            serde_json::to_value(typed).map_err(|e| e.to_string())
        })?;
        serde_json::from_value(value).map_err(|e| CacheError::Decode {
            sample_id: sample_id.to_string(),
            fact: fact.to_string(),
            reason: e.to_string(),
        })
    }

    /// Peek at a resolved fact without computing it.
    pub fn get(&self, sample_id: &str, fact: &str) -> Option<FactValue> {
        let slots = self.lock_slots();
        slots
            .get(&CacheKey::new(sample_id, fact))
            .and_then(|slot| slot.get().cloned())
    }

    /// Drop an entry (resolved or not). The next lookup recomputes it.
    /// Returns true if an entry existed.
    pub fn invalidate(&self, sample_id: &str, fact: &str) -> bool {
        let key = CacheKey::new(sample_id, fact);
        let removed = self.lock_slots().remove(&key).is_some();
        if let Some(fingerprint) = self.fingerprint_of(sample_id) {
            if let Some(facts) = self.lock_persisted().get_mut(&fingerprint) {
                facts.remove(fact);
            }
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let unavailable = self
            .lock_slots()
            .values()
            .filter(|slot| matches!(slot.get(), Some(FactValue::Unavailable(_))))
            .count() as u64;
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            restored: self.restored.load(Ordering::Relaxed),
            unavailable,
        }
    }

    /// Write every resolved fact of a registered sample to the persisted
    /// store, together with untouched persisted facts of samples seen this run.
    /// Facts of files no longer in the dataset are dropped, and so are
    /// versioned facts (`name:version`) nobody asked for this run: their
    /// input changed and the old version can never be looked up again.
    pub fn save(&self, path: &Path) -> Result<usize, PersistError> {
        let fingerprints = match self.fingerprints.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        let slots = self.lock_slots();
        let mut out = PersistedFacts::new();
        {
            let persisted = self.lock_persisted();
            for (sample_id, fingerprint) in &fingerprints {
                let Some(facts) = persisted.get(fingerprint) else {
                    continue;
                };
                let kept = facts
                    .iter()
                    .filter(|(fact, _)| {
                        !is_versioned(fact) || slots.contains_key(&CacheKey::new(sample_id, fact))
                    })
                    .map(|(fact, value)| (fact.clone(), value.clone()))
                    .collect();
                out.insert(fingerprint.clone(), kept);
            }
        }
        for (key, slot) in slots.iter() {
            let (Some(fingerprint), Some(value)) = (fingerprints.get(&key.sample_id), slot.get())
            else {
                continue;
            };
            out.entry(fingerprint.clone())
                .or_default()
                .insert(key.fact.clone(), value.clone());
        }
        drop(slots);

        let written = out.values().map(|facts| facts.len()).sum();
        persist::save(path, &out)?;
        tracing::debug!(path = %path.display(), facts = written, "Saved persisted facts");
        Ok(written)
    }
}

fn is_versioned(fact: &str) -> bool {
    fact.contains(':')
}
