//! # Query Cache
//!
//! Content-addressed file cache for plugin query results. Every entry is
//! one JSON file under the cache directory, named by the hex SHA-256 of the
//! normalized query fingerprint, carrying the raw result bytes plus
//! creation and expiry timestamps (RFC3339).
//!
//! Expiry is lazy: `get` checks `expires_at` on read and removes the stale
//! file best-effort, reporting a miss rather than an error. A disabled
//! cache returns the [`CacheError::Disabled`] sentinel from both `get` and
//! `set`; callers check [`CacheStore::is_enabled`] first and treat every
//! cache failure as non-fatal to the query.
//!
//! The size bound is soft: when a write pushes the directory over
//! `max_size_mb`, oldest entries (by modification time) are evicted until
//! it fits again. Concurrent writes for the same key are last-writer-wins,
//! which is acceptable for idempotent query results.

use crate::config::CacheSettings;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use finfocus_plugin_sdk::models::{EstimateOverrides, ResourceDescriptor};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

/// Cache store failures.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The cache is disabled; both `get` and `set` refuse to run
    #[error("cache is disabled")]
    Disabled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Normalized fingerprint of one plugin query.
///
/// Normalization keeps cache keys stable across cosmetic differences:
/// operation and provider are lower-cased and trimmed, filter keys are
/// sorted, pagination is lower-cased, overrides serialize with sorted keys.
#[derive(Debug, Clone)]
pub struct QueryFingerprint {
    operation: String,
    provider: String,
    resource_type: String,
    resource_id: String,
    filters: BTreeMap<String, String>,
    pagination: Option<String>,
    date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    overrides: Option<String>,
}

impl QueryFingerprint {
    /// Fingerprint for an operation over one resource.
    pub fn new(operation: &str, resource: &ResourceDescriptor) -> Self {
        Self {
            operation: operation.trim().to_lowercase(),
            provider: resource.provider.trim().to_lowercase(),
            resource_type: resource.resource_type.trim().to_string(),
            resource_id: resource.id.trim().to_string(),
            filters: BTreeMap::new(),
            pagination: None,
            date_range: None,
            overrides: None,
        }
    }

    /// Add a filter; keys are naturally sorted by the map.
    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    /// Canonicalize and attach pagination/sort-order state.
    pub fn with_pagination(mut self, pagination: impl AsRef<str>) -> Self {
        self.pagination = Some(pagination.as_ref().trim().to_lowercase());
        self
    }

    /// Attach a date range.
    pub fn with_date_range(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.date_range = Some((from, to));
        self
    }

    /// Attach estimate overrides, serialized with sorted keys.
    pub fn with_overrides(mut self, overrides: &EstimateOverrides) -> Self {
        let sorted: BTreeMap<&String, &serde_json::Value> = overrides.properties.iter().collect();
        self.overrides = serde_json::to_string(&sorted).ok();
        self
    }

    /// The normalized key string the entry file name derives from.
    pub fn key(&self) -> String {
        let filters = self
            .filters
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        let date_range = self
            .date_range
            .map(|(from, to)| format!("{}..{}", from.to_rfc3339(), to.to_rfc3339()))
            .unwrap_or_default();
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.operation,
            self.provider,
            self.resource_type,
            self.resource_id,
            filters,
            self.pagination.as_deref().unwrap_or_default(),
            date_range,
            self.overrides.as_deref().unwrap_or_default(),
        )
    }
}

/// One persisted cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The normalized key the entry was stored under
    pub key: String,
    /// Raw result bytes
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    /// When the entry was written
    pub created_at: DateTime<Utc>,
    /// When the entry stops being served
    pub expires_at: DateTime<Utc>,
    /// TTL the entry was written with
    pub ttl_seconds: u64,
}

mod base64_bytes {
    use super::{Engine, BASE64};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// File-per-entry cache store.
#[derive(Debug, Clone)]
pub struct CacheStore {
    settings: CacheSettings,
}

impl CacheStore {
    pub fn new(settings: CacheSettings) -> Self {
        Self { settings }
    }

    /// Whether queries should consult this store at all.
    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// TTL stamped onto new entries.
    pub fn ttl(&self) -> std::time::Duration {
        self.settings.ttl
    }

    /// The file an entry for `key` lives in.
    pub fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.settings.dir.join(format!("{}.json", hex::encode(digest)))
    }

    /// Look up a key. Expired or unreadable entries count as misses and are
    /// removed best-effort.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        if !self.settings.enabled {
            return Err(CacheError::Disabled);
        }
        let path = self.entry_path(key);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let entry: CacheEntry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "removing unparseable cache entry");
                let _ = tokio::fs::remove_file(&path).await;
                return Ok(None);
            }
        };
        if Utc::now() > entry.expires_at {
            debug!(key, "cache entry expired");
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        }
        Ok(Some(entry.data))
    }

    /// Write an entry, truncating any prior entry for the key.
    pub async fn set(&self, key: &str, data: &[u8]) -> Result<(), CacheError> {
        if !self.settings.enabled {
            return Err(CacheError::Disabled);
        }
        tokio::fs::create_dir_all(&self.settings.dir).await?;

        let now = Utc::now();
        let ttl = self.settings.ttl;
        let entry = CacheEntry {
            key: key.to_string(),
            data: data.to_vec(),
            created_at: now,
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(1)),
            ttl_seconds: ttl.as_secs(),
        };
        let payload = serde_json::to_vec_pretty(&entry)?;

        let mut temp = tempfile::NamedTempFile::new_in(&self.settings.dir)?;
        temp.write_all(&payload)?;
        temp.flush()?;
        temp.persist(self.entry_path(key))
            .map_err(|err| CacheError::Io(err.error))?;

        self.enforce_size_bound().await;
        Ok(())
    }

    /// Oldest-first eviction down to the soft size bound. Failures are
    /// logged and swallowed; the write that triggered this already landed.
    async fn enforce_size_bound(&self) {
        if self.settings.max_size_mb == 0 {
            return;
        }
        let max_bytes = self.settings.max_size_mb * 1024 * 1024;
        let mut entries: Vec<(PathBuf, u64, std::time::SystemTime)> = Vec::new();
        let mut total: u64 = 0;

        let mut dir = match tokio::fs::read_dir(&self.settings.dir).await {
            Ok(dir) => dir,
            Err(err) => {
                warn!(error = %err, "cache size check failed to read directory");
                return;
            }
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            let Ok(meta) = entry.metadata().await else { continue };
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            total += meta.len();
            entries.push((entry.path(), meta.len(), modified));
        }
        if total <= max_bytes {
            return;
        }

        entries.sort_by_key(|(_, _, modified)| *modified);
        for (path, len, _) in entries {
            if total <= max_bytes {
                break;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    total = total.saturating_sub(len);
                    debug!(path = %path.display(), "evicted cache entry over size bound");
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to evict cache entry");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn settings(dir: &std::path::Path) -> CacheSettings {
        CacheSettings::new(dir)
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(settings(dir.path()));
        assert_ok!(store.set("projected|aws|k", b"payload").await);
        let got = assert_ok!(store.get("projected|aws|k").await);
        assert_eq!(got.as_deref(), Some(b"payload".as_ref()));
    }

    #[tokio::test]
    async fn entry_file_name_is_sha256_of_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(settings(dir.path()));
        let key = "projected|aws|aws:rds:Instance|db-1||||";
        store.set(key, b"x").await.unwrap();

        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        assert!(dir.path().join(format!("{digest}.json")).exists());
    }

    #[tokio::test]
    async fn expired_entries_miss_and_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path());
        s.ttl = Duration::from_millis(20);
        let store = CacheStore::new(s);

        store.set("k", b"v").await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.get("k").await.unwrap().is_none());
        assert!(!store.entry_path("k").exists());
    }

    #[tokio::test]
    async fn disabled_store_returns_the_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(settings(dir.path()).disabled());
        assert!(!store.is_enabled());
        let err = assert_err!(store.get("k").await);
        assert!(matches!(err, CacheError::Disabled));
        let err = assert_err!(store.set("k", b"v").await);
        assert!(matches!(err, CacheError::Disabled));
    }

    #[tokio::test]
    async fn unparseable_entries_count_as_misses() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(settings(dir.path()));
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(store.entry_path("k"), b"not json").unwrap();

        assert!(store.get("k").await.unwrap().is_none());
        assert!(!store.entry_path("k").exists());
    }

    #[tokio::test]
    async fn timestamps_serialize_as_rfc3339() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(settings(dir.path()));
        store.set("k", b"v").await.unwrap();

        let raw = std::fs::read_to_string(store.entry_path("k")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let created = value["created_at"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(created).is_ok());
        assert_eq!(value["ttl_seconds"].as_u64().unwrap(), 3600);
    }

    #[test]
    fn fingerprints_normalize_case_and_order() {
        let resource = ResourceDescriptor::new("I-1", "aws:ec2:Instance");
        let a = QueryFingerprint::new(" Projected ", &resource)
            .with_filter("zone", "a")
            .with_filter("account", "prod")
            .with_pagination("PageSize=100");
        let b = QueryFingerprint::new("projected", &resource)
            .with_filter("account", "prod")
            .with_filter("zone", "a")
            .with_pagination("pagesize=100");
        assert_eq!(a.key(), b.key());
        assert!(a.key().starts_with("projected|aws|aws:ec2:Instance|I-1|account=prod,zone=a|"));
    }

    #[test]
    fn fingerprint_overrides_are_key_order_independent() {
        let resource = ResourceDescriptor::new("i-1", "aws:ec2:Instance");
        let mut first = EstimateOverrides::default();
        first.properties.insert("b".into(), serde_json::json!(2));
        first.properties.insert("a".into(), serde_json::json!(1));
        let mut second = EstimateOverrides::default();
        second.properties.insert("a".into(), serde_json::json!(1));
        second.properties.insert("b".into(), serde_json::json!(2));

        let a = QueryFingerprint::new("estimate", &resource).with_overrides(&first);
        let b = QueryFingerprint::new("estimate", &resource).with_overrides(&second);
        assert_eq!(a.key(), b.key());
    }

    #[tokio::test]
    async fn oversized_cache_evicts_oldest_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path());
        s.max_size_mb = 1;
        let store = CacheStore::new(s);

        let big = vec![0u8; 700 * 1024];
        store.set("first", &big).await.unwrap();
        // Distinct mtimes so eviction order is well defined.
        tokio::time::sleep(Duration::from_millis(30)).await;
        store.set("second", &big).await.unwrap();

        assert!(!store.entry_path("first").exists(), "oldest entry should be evicted");
        assert!(store.entry_path("second").exists());
    }
}
