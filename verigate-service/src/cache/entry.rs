// Cache Entries
// Opaque build state plus the set of tools already installed under a key

use crate::cache::key::CacheKey;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    /// Tool installs already performed under this key (e.g. `target:<triple>`)
    #[serde(default)]
    pub registered: BTreeSet<String>,
    /// Opaque state blob
    #[serde(default, with = "hex_payload")]
    pub payload: Vec<u8>,
    /// When the entry was last saved; `None` until persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn new(key: CacheKey) -> Self {
        Self {
            key,
            registered: BTreeSet::new(),
            payload: Vec::new(),
            saved_at: None,
        }
    }

    pub fn is_registered(&self, tool: &str) -> bool {
        self.registered.contains(tool)
    }

    pub fn record(&mut self, tool: impl Into<String>) {
        self.registered.insert(tool.into());
    }

    /// Re-key the entry and stamp the save time
    pub fn stamped(mut self, key: &CacheKey) -> Self {
        self.key = key.clone();
        self.saved_at = Some(Utc::now());
        self
    }
}

mod hex_payload {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_query() {
        let mut entry = CacheEntry::new(CacheKey::from_raw("cargo-x-1"));
        assert!(!entry.is_registered("target:x"));
        entry.record("target:x");
        assert!(entry.is_registered("target:x"));
    }

    #[test]
    fn test_stamped_rekeys() {
        let entry = CacheEntry::new(CacheKey::from_raw("old")).stamped(&CacheKey::from_raw("new"));
        assert_eq!(entry.key.as_str(), "new");
        let saved = entry.saved_at.unwrap();
        assert!(Utc::now().signed_duration_since(saved).num_seconds() < 60);
    }

    #[test]
    fn test_payload_is_hex_in_json() {
        let mut entry = CacheEntry::new(CacheKey::from_raw("k"));
        entry.payload = vec![0xde, 0xad];
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"payload\":\"dead\""));

        let back: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_saved_at_is_rfc3339() {
        let entry = CacheEntry::new(CacheKey::from_raw("k")).stamped(&CacheKey::from_raw("k"));
        let json = serde_json::to_value(&entry).unwrap();
        let saved = json["saved_at"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(saved).is_ok());

        let unsaved: CacheEntry = serde_json::from_str(r#"{"key":"k"}"#).unwrap();
        assert_eq!(unsaved.saved_at, None);
    }
}
