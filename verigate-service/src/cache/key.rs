// Cache Keys
// A key is a pure function of the configuration and the dependency inputs

use crate::error::CacheError;
use crate::execution::matrix::TargetConfiguration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;
use std::path::Path;
use tracing::debug;

/// Prefix used when a workflow does not configure one
pub const DEFAULT_KEY_PREFIX: &str = "cargo";

/// Number of digest bytes kept in the printed key
const KEY_DIGEST_BYTES: usize = 8;

/// SHA-256 of a lock file's contents, hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockfileHash(String);

impl LockfileHash {
    pub fn of_bytes(contents: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(contents)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockfileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash a lock file; a missing file hashes as empty input
pub fn hash_lockfile(path: &Path) -> Result<LockfileHash, CacheError> {
    match std::fs::read(path) {
        Ok(contents) => {
            debug!("Hashed lockfile {} ({} bytes)", path.display(), contents.len());
            Ok(LockfileHash::of_bytes(&contents))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("No lockfile at {}, hashing as empty", path.display());
            Ok(LockfileHash::of_bytes(&[]))
        }
        Err(e) => Err(CacheError::io(path, e)),
    }
}

/// Identifier under which a configuration's build state is stored
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for `config`
    pub fn compute(
        prefix: &str,
        config: &TargetConfiguration,
        toolchain_version: &str,
        lockfile_hash: &LockfileHash,
    ) -> Self {
        let mut hasher = Sha256::new();
        // NUL separators keep ("ab", "c") and ("a", "bc") apart
        for part in [
            config.name(),
            config.host(),
            config.target(),
            toolchain_version.trim(),
            lockfile_hash.as_str(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        let digest = hasher.finalize();

        Self(format!(
            "{}-{}-{}",
            prefix,
            config.target(),
            hex::encode(&digest[..KEY_DIGEST_BYTES])
        ))
    }

    /// Wrap an existing key string (e.g. read back from a store)
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::matrix::TargetDescriptor;
    use tempfile::TempDir;

    fn config(target: &str) -> TargetConfiguration {
        TargetConfiguration::from(&TargetDescriptor::new(target, "ubuntu-latest"))
    }

    #[test]
    fn key_is_deterministic() {
        let lock = LockfileHash::of_bytes(b"[[package]]\nname = \"serde\"");
        let a = CacheKey::compute("cargo", &config("x86_64-unknown-linux-gnu"), "1.80.0", &lock);
        let b = CacheKey::compute("cargo", &config("x86_64-unknown-linux-gnu"), "1.80.0", &lock);
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("cargo-x86_64-unknown-linux-gnu-"));
        assert_eq!(
            a.as_str().len(),
            "cargo-x86_64-unknown-linux-gnu-".len() + KEY_DIGEST_BYTES * 2
        );
    }

    #[test]
    fn key_changes_with_lockfile() {
        let c = config("x86_64-unknown-linux-gnu");
        let a = CacheKey::compute("cargo", &c, "1.80.0", &LockfileHash::of_bytes(b"v1"));
        let b = CacheKey::compute("cargo", &c, "1.80.0", &LockfileHash::of_bytes(b"v2"));
        assert_ne!(a, b);
    }

    #[test]
    fn key_changes_with_toolchain_and_target() {
        let lock = LockfileHash::of_bytes(b"lock");
        let base = CacheKey::compute("cargo", &config("x86_64-unknown-linux-gnu"), "1.80.0", &lock);
        let newer = CacheKey::compute("cargo", &config("x86_64-unknown-linux-gnu"), "1.81.0", &lock);
        let other = CacheKey::compute("cargo", &config("aarch64-apple-darwin"), "1.80.0", &lock);
        assert_ne!(base, newer);
        assert_ne!(base, other);
    }

    #[test]
    fn key_differs_per_configuration() {
        let lock = LockfileHash::of_bytes(b"lock");
        let a = TargetConfiguration::from(&TargetDescriptor::new("aarch64-apple-darwin", "macos-14"));
        let b = TargetConfiguration::from(&TargetDescriptor::new("aarch64-apple-darwin", "macos-15"));
        assert_ne!(
            CacheKey::compute("cargo", &a, "1.80.0", &lock),
            CacheKey::compute("cargo", &b, "1.80.0", &lock)
        );

        let mut named = TargetDescriptor::new("aarch64-apple-darwin", "macos-14");
        named.name = Some("apple-nightly".to_string());
        let named = TargetConfiguration::from(&named);
        assert_ne!(
            CacheKey::compute("cargo", &a, "1.80.0", &lock),
            CacheKey::compute("cargo", &named, "1.80.0", &lock)
        );
    }

    #[test]
    fn hash_lockfile_reads_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Cargo.lock");
        std::fs::write(&path, b"version = 3").unwrap();

        let hash = hash_lockfile(&path).unwrap();
        assert_eq!(hash, LockfileHash::of_bytes(b"version = 3"));
        assert_eq!(hash.as_str().len(), 64);
    }

    #[test]
    fn missing_lockfile_hashes_as_empty() {
        let dir = TempDir::new().unwrap();
        let hash = hash_lockfile(&dir.path().join("Cargo.lock")).unwrap();
        assert_eq!(hash, LockfileHash::of_bytes(&[]));
    }
}
