//! Indexing and watcher configuration from environment variables.

/// Tunables for the indexing orchestrator and cache tier.
#[derive(Clone, Debug)]
pub struct IndexingConfig {
    /// Files per engine call.
    pub batch_size: usize,
    /// Run full-workspace indexing on a background task.
    pub use_worker: bool,
    /// Persist the search cache to disk across runs.
    pub persist_search_cache: bool,
    /// Persist the context-bundle cache to disk across runs.
    pub persist_context_cache: bool,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            use_worker: false,
            persist_search_cache: false,
            persist_context_cache: false,
        }
    }
}

impl IndexingConfig {
    /// Recognized vars: CE_INDEX_BATCH_SIZE, CE_INDEX_USE_WORKER,
    /// CE_PERSIST_SEARCH_CACHE, CE_PERSIST_CONTEXT_CACHE.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_size: env_usize("CE_INDEX_BATCH_SIZE").unwrap_or(defaults.batch_size).max(1),
            use_worker: env_bool("CE_INDEX_USE_WORKER").unwrap_or(defaults.use_worker),
            persist_search_cache: env_bool("CE_PERSIST_SEARCH_CACHE")
                .unwrap_or(defaults.persist_search_cache),
            persist_context_cache: env_bool("CE_PERSIST_CONTEXT_CACHE")
                .unwrap_or(defaults.persist_context_cache),
        }
    }
}

/// Watcher debounce and deletion-reindex policy.
#[derive(Clone, Debug)]
pub struct WatcherConfig {
    /// Event coalescing window in milliseconds.
    pub debounce_ms: u64,
    /// Maximum upserts per flushed batch.
    pub batch_size: usize,
    /// Schedule a full reindex when deletions are observed.
    pub reindex_on_delete: bool,
    /// Extra debounce before a deletion-triggered reindex.
    pub reindex_debounce_ms: u64,
    /// Minimum spacing between deletion-triggered reindexes.
    pub reindex_cooldown_ms: u64,
    /// Deletions within one window that trigger an immediate reindex.
    pub delete_burst_threshold: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            batch_size: 50,
            reindex_on_delete: true,
            reindex_debounce_ms: 2_000,
            reindex_cooldown_ms: 60_000,
            delete_burst_threshold: 10,
        }
    }
}

impl WatcherConfig {
    /// Recognized vars: CE_WATCHER_REINDEX_ON_DELETE,
    /// CE_WATCHER_REINDEX_DEBOUNCE_MS, CE_WATCHER_REINDEX_COOLDOWN_MS,
    /// CE_WATCHER_DELETE_BURST_THRESHOLD.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            debounce_ms: defaults.debounce_ms,
            batch_size: defaults.batch_size,
            reindex_on_delete: env_bool("CE_WATCHER_REINDEX_ON_DELETE")
                .unwrap_or(defaults.reindex_on_delete),
            reindex_debounce_ms: env_u64("CE_WATCHER_REINDEX_DEBOUNCE_MS")
                .unwrap_or(defaults.reindex_debounce_ms),
            reindex_cooldown_ms: env_u64("CE_WATCHER_REINDEX_COOLDOWN_MS")
                .unwrap_or(defaults.reindex_cooldown_ms),
            delete_burst_threshold: env_usize("CE_WATCHER_DELETE_BURST_THRESHOLD")
                .unwrap_or(defaults.delete_burst_threshold),
        }
    }
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|s| s.eq_ignore_ascii_case("true") || s == "1")
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
