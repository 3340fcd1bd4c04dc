// Cache Stores
// Backends that hold cache entries between runs

use crate::cache::entry::CacheEntry;
use crate::cache::key::CacheKey;
use crate::error::CacheError;

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Storage backend for cache entries
///
/// Writers to the same key race; the last completed save wins.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    /// Load the entry stored under `key`, if any
    async fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Save `entry` under its own key
    async fn save(&self, entry: &CacheEntry) -> Result<(), CacheError>;

    /// All stored entries, ordered by key
    async fn list(&self) -> Result<Vec<CacheEntry>, CacheError>;

    /// Remove one entry; returns whether it existed
    async fn remove(&self, key: &CacheKey) -> Result<bool, CacheError>;

    /// Remove every entry; returns how many were removed
    async fn clear(&self) -> Result<usize, CacheError>;
}

/// Default on-disk cache location (`~/.verigate/cache`)
pub fn default_cache_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".verigate")
        .join("cache")
}

const ENTRY_EXTENSION: &str = "json";

/// One JSON file per key inside a directory
pub struct FsCacheStore {
    root: PathBuf,
    tmp_counter: AtomicU64,
}

impl FsCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tmp_counter: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root
            .join(format!("{}.{}", sanitize(key.as_str()), ENTRY_EXTENSION))
    }

    async fn read_entry(&self, path: &Path) -> Result<Option<CacheEntry>, CacheError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(path, e)),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CacheError::Corrupt {
                key: path.display().to_string(),
                message: e.to_string(),
            })
    }

    async fn entry_paths(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::io(&self.root, e)),
        };

        let mut paths = Vec::new();
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| CacheError::io(&self.root, e))?
        {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXTENSION) {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

/// Keys contain target triples and hex; anything else becomes `_`
fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait::async_trait]
impl CacheStore for FsCacheStore {
    async fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.entry_path(key);
        debug!("Looking up cache entry {}", path.display());
        self.read_entry(&path).await
    }

    async fn save(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| CacheError::io(&self.root, e))?;

        let bytes = serde_json::to_vec_pretty(entry).map_err(|e| CacheError::Corrupt {
            key: entry.key.to_string(),
            message: e.to_string(),
        })?;

        // Write-then-rename so readers never observe a partial entry
        let path = self.entry_path(&entry.key);
        let tmp = path.with_extension(format!(
            "tmp-{}-{}",
            std::process::id(),
            self.tmp_counter.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| CacheError::io(&tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(CacheError::io(&path, e));
        }

        debug!("Saved cache entry {}", path.display());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let mut entries = Vec::new();
        for path in self.entry_paths().await? {
            match self.read_entry(&path).await {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                // One unreadable file must not hide the rest
                Err(e) => warn!("Skipping cache entry {}: {}", path.display(), e),
            }
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let path = self.entry_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::io(&path, e)),
        }
    }

    async fn clear(&self) -> Result<usize, CacheError> {
        let paths = self.entry_paths().await?;
        for path in &paths {
            tokio::fs::remove_file(path)
                .await
                .map_err(|e| CacheError::io(path, e))?;
        }
        Ok(paths.len())
    }
}

/// In-process store, used for dry runs and tests
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<BTreeMap<CacheKey, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CacheStore for MemoryCacheStore {
    async fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn save(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        self.entries
            .write()
            .await
            .insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<CacheEntry>, CacheError> {
        Ok(self.entries.read().await.values().cloned().collect())
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn clear(&self) -> Result<usize, CacheError> {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(key: &str) -> CacheEntry {
        let mut entry = CacheEntry::new(CacheKey::from_raw(key));
        entry.record("target:x86_64-unknown-linux-gnu");
        entry
    }

    #[tokio::test]
    async fn test_fs_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FsCacheStore::new(dir.path().join("cache"));

        let key = CacheKey::from_raw("cargo-x86_64-unknown-linux-gnu-0011223344556677");
        assert!(store.load(&key).await.unwrap().is_none());

        store.save(&entry(key.as_str())).await.unwrap();
        let loaded = store.load(&key).await.unwrap().unwrap();
        assert!(loaded.is_registered("target:x86_64-unknown-linux-gnu"));
    }

    #[tokio::test]
    async fn test_fs_store_last_writer_wins() {
        let dir = TempDir::new().unwrap();
        let store = FsCacheStore::new(dir.path());
        let key = CacheKey::from_raw("k");

        let mut first = CacheEntry::new(key.clone());
        first.payload = vec![1];
        let mut second = CacheEntry::new(key.clone());
        second.payload = vec![2];

        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();
        assert_eq!(store.load(&key).await.unwrap().unwrap().payload, vec![2]);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fs_store_list_remove_clear() {
        let dir = TempDir::new().unwrap();
        let store = FsCacheStore::new(dir.path());

        store.save(&entry("b")).await.unwrap();
        store.save(&entry("a")).await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let keys: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.key.to_string())
            .collect();
        assert_eq!(keys, vec!["a", "b"]);

        assert!(store.remove(&CacheKey::from_raw("a")).await.unwrap());
        assert!(!store.remove(&CacheKey::from_raw("a")).await.unwrap());
        assert_eq!(store.clear().await.unwrap(), 1);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fs_store_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FsCacheStore::new(dir.path().join("does-not-exist"));
        assert!(store.list().await.unwrap().is_empty());
        assert_eq!(store.clear().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fs_store_corrupt_entry() {
        let dir = TempDir::new().unwrap();
        let store = FsCacheStore::new(dir.path());
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();

        let err = store.load(&CacheKey::from_raw("bad")).await.unwrap_err();
        assert!(matches!(err, CacheError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_fs_store_list_skips_corrupt_entries() {
        let dir = TempDir::new().unwrap();
        let store = FsCacheStore::new(dir.path());
        store.save(&entry("good")).await.unwrap();
        std::fs::write(dir.path().join("half-written.json"), "{").unwrap();

        let entries = store.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key.as_str(), "good");
        assert_eq!(store.clear().await.unwrap(), 2);
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("cargo-x86_64-unknown-linux-gnu-ab"), "cargo-x86_64-unknown-linux-gnu-ab");
        assert_eq!(sanitize("../etc/passwd"), ".._etc_passwd");
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryCacheStore::new();
        store.save(&entry("k")).await.unwrap();
        assert!(store.load(&CacheKey::from_raw("k")).await.unwrap().is_some());
        assert_eq!(store.clear().await.unwrap(), 1);
        assert!(store.load(&CacheKey::from_raw("k")).await.unwrap().is_none());
    }
}
