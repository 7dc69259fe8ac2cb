//! Filesystem cache for fetched pages and derived provider results.
//!
//! The [`CacheStore`] keeps one JSON file per entry under
//! `<root>/<category>/<fingerprint>.json`. Categories have independent TTLs;
//! expired entries are evicted lazily when read.
//!
//! **Rules:**
//! - Empty payloads (`null`, `false`, `""`, `[]`, `{}`) are never stored
//! - Producer errors propagate and are never stored
//! - Storage failures degrade to a miss (read) or a pass-through (write)
//! - Writes go to a temp file first and are renamed into place

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;
use winelens_shared::{CacheConfig, Result};

/// Raw fetched page text, keyed by entity and URL. Never expires.
pub const CATEGORY_HTML: &str = "html";
/// Search provider results.
pub const CATEGORY_SEARCH: &str = "search";
/// Summarization provider results.
pub const CATEGORY_SUMMARY: &str = "summary";

/// One persisted cache record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub category: String,
    pub fingerprint: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
}

impl CacheEntry {
    /// Whether the entry has outlived its TTL at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_seconds {
            Some(ttl) => {
                let age = now.signed_duration_since(self.created_at);
                age.num_milliseconds() >= (ttl as i64).saturating_mul(1000)
            }
            None => false,
        }
    }
}

type KeyLock = Arc<tokio::sync::Mutex<()>>;

/// Category-partitioned JSON file cache.
pub struct CacheStore {
    root: PathBuf,
    enabled: bool,
    ttls: HashMap<String, Duration>,
    /// Per-fingerprint locks so concurrent async misses run the producer once.
    in_flight: Mutex<HashMap<String, Weak<tokio::sync::Mutex<()>>>>,
}

impl CacheStore {
    /// Create a store rooted at `root` with per-category TTLs.
    pub fn new(root: impl Into<PathBuf>, ttls: HashMap<String, Duration>) -> Self {
        Self {
            root: root.into(),
            enabled: true,
            ttls,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// A store that never reads or writes; every call runs the producer.
    pub fn disabled() -> Self {
        Self {
            root: PathBuf::new(),
            enabled: false,
            ttls: HashMap::new(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Build a store from the `[cache]` config section.
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        if !config.enabled {
            debug!("cache disabled by configuration");
            return Ok(Self::disabled());
        }

        let ttls = config
            .ttl_secs
            .iter()
            .map(|(category, secs)| (category.clone(), Duration::from_secs(*secs)))
            .collect();

        Ok(Self::new(config.resolved_dir()?, ttls))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic storage key for `(category, key)`.
    pub fn fingerprint(category: &str, key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(category.as_bytes());
        hasher.update([0u8]);
        hasher.update(key.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    // -----------------------------------------------------------------------
    // Read-through operations
    // -----------------------------------------------------------------------

    /// Return the cached value for `(category, key)`, or run `producer` and
    /// cache its result when non-empty.
    ///
    /// Concurrent misses on the same key within this store wait for the first
    /// producer instead of running their own.
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        category: &str,
        key: &str,
        producer: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        if !self.enabled {
            return producer().await;
        }

        let fingerprint = Self::fingerprint(category, key);
        if let Some(hit) = self.read_async(category, &fingerprint).await {
            return Ok(hit);
        }

        let lock = self.key_lock(&fingerprint);
        let _guard = lock.lock().await;

        // Another task may have filled the entry while we waited
        if let Some(hit) = self.read_async(category, &fingerprint).await {
            return Ok(hit);
        }

        let value = producer().await?;
        self.write_async(category, &fingerprint, &value).await;
        Ok(value)
    }

    /// Blocking form of [`get_or_fetch`](Self::get_or_fetch). Misses are not
    /// coalesced, so `producer` must be idempotent.
    pub fn get_or_fetch_blocking<T, E, F>(
        &self,
        category: &str,
        key: &str,
        producer: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> std::result::Result<T, E>,
    {
        if !self.enabled {
            return producer();
        }

        let fingerprint = Self::fingerprint(category, key);
        let path = self.entry_path(category, &fingerprint);

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(category, path = %path.display(), error = %e, "cache read failed");
                None
            }
        };
        if let Some(bytes) = bytes {
            match self.decode::<T>(category, &bytes) {
                Decoded::Hit(value) => return Ok(value),
                Decoded::Expired => remove_quietly(&path),
                Decoded::Miss => {}
            }
        }

        let value = producer()?;
        if let Some((tmp, contents)) = self.encode(category, &fingerprint, &value) {
            if let Err(e) = write_atomic_blocking(&path, &tmp, &contents) {
                warn!(category, path = %path.display(), error = %e, "cache write failed");
            }
        }
        Ok(value)
    }

    /// Remove every entry in a category. Missing categories are not an error.
    pub async fn clear_category(&self, category: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let dir = self.root.join(category);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(winelens_shared::WineLensError::io(dir, e)),
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn entry_path(&self, category: &str, fingerprint: &str) -> PathBuf {
        self.root.join(category).join(format!("{fingerprint}.json"))
    }

    fn key_lock(&self, fingerprint: &str) -> KeyLock {
        let mut map = match self.in_flight.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(lock) = map.get(fingerprint).and_then(Weak::upgrade) {
            return lock;
        }

        map.retain(|_, weak| weak.strong_count() > 0);
        let lock: KeyLock = Arc::new(tokio::sync::Mutex::new(()));
        map.insert(fingerprint.to_string(), Arc::downgrade(&lock));
        lock
    }

    async fn read_async<T: DeserializeOwned>(&self, category: &str, fingerprint: &str) -> Option<T> {
        let path = self.entry_path(category, fingerprint);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(category, path = %path.display(), error = %e, "cache read failed");
                return None;
            }
        };

        match self.decode(category, &bytes) {
            Decoded::Hit(value) => Some(value),
            Decoded::Expired => {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    debug!(path = %path.display(), error = %e, "failed to evict expired entry");
                }
                None
            }
            Decoded::Miss => None,
        }
    }

    async fn write_async<T: Serialize>(&self, category: &str, fingerprint: &str, value: &T) {
        let Some((tmp, contents)) = self.encode(category, fingerprint, value) else {
            return;
        };
        let path = self.entry_path(category, fingerprint);

        let result = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&tmp, &contents).await?;
            tokio::fs::rename(&tmp, &path).await
        }
        .await;

        if let Err(e) = result {
            warn!(category, path = %path.display(), error = %e, "cache write failed");
            let _ = tokio::fs::remove_file(&tmp).await;
        } else {
            debug!(category, fingerprint, "cached entry");
        }
    }

    fn decode<T: DeserializeOwned>(&self, category: &str, bytes: &[u8]) -> Decoded<T> {
        let entry: CacheEntry = match serde_json::from_slice(bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(category, error = %e, "corrupt cache entry, treating as miss");
                return Decoded::Miss;
            }
        };

        if entry.is_expired(Utc::now()) {
            debug!(category, fingerprint = %entry.fingerprint, "cache entry expired");
            return Decoded::Expired;
        }

        match serde_json::from_value(entry.payload) {
            Ok(value) => {
                debug!(category, fingerprint = %entry.fingerprint, "cache hit");
                Decoded::Hit(value)
            }
            Err(e) => {
                warn!(category, error = %e, "cached payload has unexpected shape");
                Decoded::Miss
            }
        }
    }

    /// Serialize an entry for writing, or `None` when the value must not be cached.
    fn encode<T: Serialize>(
        &self,
        category: &str,
        fingerprint: &str,
        value: &T,
    ) -> Option<(PathBuf, Vec<u8>)> {
        let payload = match serde_json::to_value(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(category, error = %e, "value is not serializable, skipping cache");
                return None;
            }
        };

        if is_empty_payload(&payload) {
            debug!(category, "empty result, not cached");
            return None;
        }

        let entry = CacheEntry {
            category: category.to_string(),
            fingerprint: fingerprint.to_string(),
            payload,
            created_at: Utc::now(),
            ttl_seconds: self.ttls.get(category).map(Duration::as_secs),
        };

        let contents = match serde_json::to_vec(&entry) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(category, error = %e, "failed to encode cache entry");
                return None;
            }
        };

        let tmp = self
            .root
            .join(category)
            .join(format!("{fingerprint}.{}.tmp", Uuid::now_v7()));
        Some((tmp, contents))
    }
}

enum Decoded<T> {
    Hit(T),
    Expired,
    Miss,
}

/// `null`, `false`, `""`, `[]` and `{}` count as "no result".
pub fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Number(_) => false,
    }
}

fn write_atomic_blocking(path: &Path, tmp: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(tmp, contents)?;
    std::fs::rename(tmp, path).inspect_err(|_| remove_quietly(tmp))
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        debug!(path = %path.display(), error = %e, "failed to remove cache file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tempfile::TempDir;

    /// Store rooted in a fresh temp dir, removed when the guard drops.
    fn test_store(ttls: &[(&str, u64)]) -> (TempDir, CacheStore) {
        let dir = TempDir::new().unwrap();
        let ttls = ttls
            .iter()
            .map(|(c, s)| (c.to_string(), Duration::from_secs(*s)))
            .collect();
        let store = CacheStore::new(dir.path().join("cache"), ttls);
        (dir, store)
    }

    #[test]
    fn fingerprint_is_stable_and_category_scoped() {
        let a = CacheStore::fingerprint("summary", "opus one");
        assert_eq!(a, CacheStore::fingerprint("summary", "opus one"));
        assert_eq!(a.len(), 64);
        assert_ne!(a, CacheStore::fingerprint("search", "opus one"));
    }

    #[test]
    fn empty_payloads() {
        assert!(is_empty_payload(&Value::Null));
        assert!(is_empty_payload(&serde_json::json!(false)));
        assert!(is_empty_payload(&serde_json::json!("")));
        assert!(is_empty_payload(&serde_json::json!([])));
        assert!(is_empty_payload(&serde_json::json!({})));
        assert!(!is_empty_payload(&serde_json::json!(0)));
        assert!(!is_empty_payload(&serde_json::json!(["x"])));
    }

    #[tokio::test]
    async fn producer_runs_once_across_reads() {
        let (_dir, store) = test_store(&[("summary", 3600)]);
        let calls = AtomicUsize::new(0);

        for _ in 0..5 {
            let value: std::result::Result<String, String> = store
                .get_or_fetch("summary", "opus one", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("profile".to_string())
                })
                .await;
            assert_eq!(value.unwrap(), "profile");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_misses_are_coalesced() {
        let (_dir, store) = test_store(&[]);
        let store = Arc::new(store);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                store
                    .get_or_fetch("html", "wine(https://example.com)", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, String>(vec!["page text".to_string()])
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), vec!["page text".to_string()]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_results_are_not_cached() {
        let (_dir, store) = test_store(&[]);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: std::result::Result<Vec<String>, String> = store
                .get_or_fetch("search", "unknown wine", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Vec::new())
                })
                .await;
            assert!(value.unwrap().is_empty());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn producer_errors_propagate_and_are_not_cached() {
        let (_dir, store) = test_store(&[]);

        let first: std::result::Result<String, String> = store
            .get_or_fetch("summary", "k", || async { Err("provider down".to_string()) })
            .await;
        assert_eq!(first.unwrap_err(), "provider down");

        let second: std::result::Result<String, String> = store
            .get_or_fetch("summary", "k", || async { Ok("recovered".to_string()) })
            .await;
        assert_eq!(second.unwrap(), "recovered");
    }

    #[tokio::test]
    async fn expired_entries_are_evicted() {
        let (_dir, store) = test_store(&[("summary", 0)]);
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let _: std::result::Result<String, String> = store
                .get_or_fetch("summary", "k", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("v".to_string())
                })
                .await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn disabled_store_always_produces() {
        let store = CacheStore::disabled();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let _: std::result::Result<String, String> = store
                .get_or_fetch("summary", "k", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("v".to_string())
                })
                .await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!store.is_enabled());
    }

    #[test]
    fn blocking_form_hits_after_first_write() {
        let (_dir, store) = test_store(&[]);
        let mut calls = 0;

        for _ in 0..3 {
            let value: std::result::Result<u32, String> =
                store.get_or_fetch_blocking("search", "k", || {
                    calls += 1;
                    Ok(42)
                });
            assert_eq!(value.unwrap(), 42);
        }

        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_miss() {
        let (_dir, store) = test_store(&[]);
        let fp = CacheStore::fingerprint("summary", "k");
        let path = store.entry_path("summary", &fp);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"not json").unwrap();

        let value: std::result::Result<String, String> = store
            .get_or_fetch("summary", "k", || async { Ok("fresh".to_string()) })
            .await;
        assert_eq!(value.unwrap(), "fresh");
    }

    #[tokio::test]
    async fn clear_category_removes_entries() {
        let (_dir, store) = test_store(&[]);
        let _: std::result::Result<String, String> = store
            .get_or_fetch("search", "k", || async { Ok("v".to_string()) })
            .await;
        assert!(store.root().join("search").exists());

        store.clear_category("search").await.unwrap();
        assert!(!store.root().join("search").exists());
        store.clear_category("never-used").await.unwrap();
    }

    #[test]
    fn from_config_respects_switch() {
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        assert!(!CacheStore::from_config(&config).unwrap().is_enabled());
    }
}
