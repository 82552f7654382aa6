//! Bounded TTL + LRU caches for search results and context bundles.
//!
//! Values are stored as `serde_json::Value` so the cache tier stays agnostic
//! of the retrieval types layered above it. Keys are sha256 fingerprints that
//! always include the monotonic index fingerprint, so a successful index run
//! invalidates every prior key without touching the map.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::errors::IndexError;

/// Default entry lifetime.
pub const CACHE_TTL_MS: i64 = 60_000;
/// Default entry cap per cache.
pub const CACHE_CAP: usize = 100;

pub const SEARCH_CACHE_FILE: &str = ".augment-search-cache.json";
pub const CONTEXT_CACHE_FILE: &str = ".augment-context-cache.json";

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Entry {
    value: serde_json::Value,
    inserted_at_ms: i64,
    last_access_ms: i64,
}

/// One TTL+LRU map. Interior mutability so the tier can be shared behind an
/// `Arc` without a write lock around the whole tier.
#[derive(Debug)]
pub struct TtlLruCache {
    entries: Mutex<HashMap<String, Entry>>,
    ttl_ms: i64,
    cap: usize,
}

impl TtlLruCache {
    pub fn new(ttl_ms: i64, cap: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl_ms,
            cap,
        }
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let now = Utc::now().timestamp_millis();
        let mut map = self.entries.lock().expect("cache lock");
        match map.get_mut(key) {
            Some(entry) if now - entry.inserted_at_ms <= self.ttl_ms => {
                entry.last_access_ms = now;
                Some(entry.value.clone())
            }
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, value: serde_json::Value) {
        let now = Utc::now().timestamp_millis();
        let mut map = self.entries.lock().expect("cache lock");
        if map.len() >= self.cap && !map.contains_key(&key) {
            // Evict the least recently used entry.
            if let Some(oldest) = map
                .iter()
                .min_by_key(|(_, e)| e.last_access_ms)
                .map(|(k, _)| k.clone())
            {
                map.remove(&oldest);
            }
        }
        map.insert(
            key,
            Entry {
                value,
                inserted_at_ms: now,
                last_access_ms: now,
            },
        );
    }

    pub fn clear(&self) {
        self.entries.lock().expect("cache lock").clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> HashMap<String, Entry> {
        self.entries.lock().expect("cache lock").clone()
    }

    fn restore(&self, loaded: HashMap<String, Entry>) {
        let now = Utc::now().timestamp_millis();
        let mut map = self.entries.lock().expect("cache lock");
        for (k, e) in loaded {
            if now - e.inserted_at_ms <= self.ttl_ms {
                map.insert(k, e);
            }
        }
    }
}

/// Search + context caches with shared persistence policy.
#[derive(Debug)]
pub struct CacheTier {
    root: PathBuf,
    pub search: TtlLruCache,
    pub context: TtlLruCache,
    persist_search: bool,
    persist_context: bool,
}

impl CacheTier {
    pub fn new(root: &Path, persist_search: bool, persist_context: bool) -> Self {
        let tier = Self {
            root: root.to_path_buf(),
            search: TtlLruCache::new(CACHE_TTL_MS, CACHE_CAP),
            context: TtlLruCache::new(CACHE_TTL_MS, CACHE_CAP),
            persist_search,
            persist_context,
        };
        if persist_search {
            tier.load_one(&tier.search, SEARCH_CACHE_FILE);
        }
        if persist_context {
            tier.load_one(&tier.context, CONTEXT_CACHE_FILE);
        }
        tier
    }

    /// Drop all entries and remove any persisted cache files.
    pub fn invalidate_all(&self) {
        self.search.clear();
        self.context.clear();
        for file in [SEARCH_CACHE_FILE, CONTEXT_CACHE_FILE] {
            let path = self.root.join(file);
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(file, error = %e, "failed to remove persisted cache");
                }
            }
        }
    }

    /// Write enabled caches to disk. Called on graceful shutdown and after a
    /// successful index run.
    pub fn flush_to_disk(&self) -> Result<(), IndexError> {
        if self.persist_search {
            self.save_one(&self.search, SEARCH_CACHE_FILE)?;
        }
        if self.persist_context {
            self.save_one(&self.context, CONTEXT_CACHE_FILE)?;
        }
        Ok(())
    }

    fn save_one(&self, cache: &TtlLruCache, file: &str) -> Result<(), IndexError> {
        let path = self.root.join(file);
        let tmp = self.root.join(format!("{file}.tmp"));
        let data = serde_json::to_vec(&cache.snapshot())?;
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &path)?;
        debug!(file, entries = cache.len(), "cache persisted");
        Ok(())
    }

    fn load_one(&self, cache: &TtlLruCache, file: &str) {
        let path = self.root.join(file);
        let Ok(bytes) = std::fs::read(&path) else {
            return;
        };
        match serde_json::from_slice::<HashMap<String, Entry>>(&bytes) {
            Ok(loaded) => {
                cache.restore(loaded);
                debug!(file, entries = cache.len(), "cache loaded from disk");
            }
            Err(e) => warn!(file, error = %e, "ignoring unreadable persisted cache"),
        }
    }
}

/// Stable cache key: sha256 over the parts plus the index fingerprint.
pub fn cache_key(parts: &[&str], fingerprint: u64) -> String {
    let mut hasher = Sha256::new();
    for p in parts {
        hasher.update(p.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(fingerprint.to_le_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn get_put_round_trip() {
        let cache = TtlLruCache::new(CACHE_TTL_MS, 10);
        cache.put("k".into(), json!([1, 2, 3]));
        assert_eq!(cache.get("k"), Some(json!([1, 2, 3])));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn ttl_expiry_drops_entry() {
        let cache = TtlLruCache::new(0, 10);
        cache.put("k".into(), json!(1));
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn lru_eviction_at_cap() {
        let cache = TtlLruCache::new(CACHE_TTL_MS, 2);
        cache.put("a".into(), json!(1));
        std::thread::sleep(std::time::Duration::from_millis(2));
        cache.put("b".into(), json!(2));
        std::thread::sleep(std::time::Duration::from_millis(2));
        cache.get("a");
        cache.put("c".into(), json!(3));
        assert!(cache.get("a").is_some(), "recently used survives");
        assert!(cache.get("b").is_none(), "least recently used evicted");
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn fingerprint_changes_key() {
        let a = cache_key(&["query", "5"], 1);
        let b = cache_key(&["query", "5"], 2);
        assert_ne!(a, b);
        assert_eq!(a, cache_key(&["query", "5"], 1));
    }

    #[test]
    fn persistence_round_trip() {
        let ws = TempDir::new().unwrap();
        let tier = CacheTier::new(ws.path(), true, false);
        tier.search.put("k".into(), json!("v"));
        tier.flush_to_disk().unwrap();

        let reloaded = CacheTier::new(ws.path(), true, false);
        assert_eq!(reloaded.search.get("k"), Some(json!("v")));
    }

    #[test]
    fn invalidate_removes_files() {
        let ws = TempDir::new().unwrap();
        let tier = CacheTier::new(ws.path(), true, true);
        tier.search.put("k".into(), json!("v"));
        tier.flush_to_disk().unwrap();
        tier.invalidate_all();
        assert!(tier.search.is_empty());
        assert!(!ws.path().join(SEARCH_CACHE_FILE).exists());
    }
}
