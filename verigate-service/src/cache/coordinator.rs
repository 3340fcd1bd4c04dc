// Cache Coordinator
// Best-effort restore/persist around a configuration run

use crate::cache::entry::CacheEntry;
use crate::cache::key::{CacheKey, LockfileHash, DEFAULT_KEY_PREFIX};
use crate::cache::store::CacheStore;
use crate::execution::matrix::TargetConfiguration;

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of looking a key up in the store
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(CacheEntry),
    Miss,
    /// Store failed; treated as a miss
    Unavailable(String),
    /// Caching turned off
    Disabled,
}

impl CacheLookup {
    pub fn into_entry(self) -> Option<CacheEntry> {
        match self {
            CacheLookup::Hit(entry) => Some(entry),
            _ => None,
        }
    }

    pub fn status(&self) -> CacheStatus {
        match self {
            CacheLookup::Hit(_) => CacheStatus::Hit,
            CacheLookup::Miss => CacheStatus::Miss,
            CacheLookup::Unavailable(_) => CacheStatus::Unavailable,
            CacheLookup::Disabled => CacheStatus::Disabled,
        }
    }
}

/// Outcome of a persist attempt
#[derive(Debug, Clone, PartialEq)]
pub enum CachePersistOutcome {
    Saved,
    /// Store failed; the run is unaffected
    Failed(String),
    Disabled,
}

/// Summary of cache behaviour for one configuration, for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    Hit,
    Miss,
    Unavailable,
    Disabled,
}

/// Computes keys and talks to the (optional) store
///
/// Never fails a run: store errors are logged and reported as
/// [`CacheLookup::Unavailable`] or [`CachePersistOutcome::Failed`].
#[derive(Clone)]
pub struct CacheCoordinator {
    store: Option<Arc<dyn CacheStore>>,
    prefix: String,
}

impl CacheCoordinator {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store: Some(store),
            prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    /// Coordinator that never hits and never saves
    pub fn disabled() -> Self {
        Self {
            store: None,
            prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn compute_key(
        &self,
        config: &TargetConfiguration,
        toolchain_version: &str,
        lockfile_hash: &LockfileHash,
    ) -> CacheKey {
        CacheKey::compute(&self.prefix, config, toolchain_version, lockfile_hash)
    }

    /// Look `key` up, classifying the result
    pub async fn lookup(&self, key: &CacheKey) -> CacheLookup {
        let Some(store) = &self.store else {
            return CacheLookup::Disabled;
        };

        match store.load(key).await {
            Ok(Some(entry)) => {
                debug!("Cache hit for {}", key);
                CacheLookup::Hit(entry)
            }
            Ok(None) => {
                debug!("Cache miss for {}", key);
                CacheLookup::Miss
            }
            Err(e) => {
                warn!("Cache restore for {} failed, continuing cold: {}", key, e);
                CacheLookup::Unavailable(e.to_string())
            }
        }
    }

    /// Restore the entry for `key`; any failure is simply absent
    pub async fn restore(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.lookup(key).await.into_entry()
    }

    /// Store `entry` under `key`
    pub async fn persist(&self, key: &CacheKey, entry: CacheEntry) -> CachePersistOutcome {
        let Some(store) = &self.store else {
            return CachePersistOutcome::Disabled;
        };

        let entry = entry.stamped(key);
        match store.save(&entry).await {
            Ok(()) => {
                debug!("Persisted cache entry {}", key);
                CachePersistOutcome::Saved
            }
            Err(e) => {
                warn!("Cache persist for {} failed: {}", key, e);
                CachePersistOutcome::Failed(e.to_string())
            }
        }
    }
}
