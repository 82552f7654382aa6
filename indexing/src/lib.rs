//! Durable workspace indexing: orchestrator, watcher, and cache tier.
//!
//! The orchestrator owns the engine handle, the cache tier, the monotonic
//! index fingerprint, and the status snapshot. The watcher feeds coalesced
//! change batches back into it. Nothing outside this crate mutates index
//! state directly.

pub mod cache;
pub mod config;
pub mod errors;
pub mod fingerprint;
pub mod orchestrator;
pub mod status;
pub mod watcher;

pub use cache::{CacheTier, TtlLruCache, cache_key};
pub use config::{IndexingConfig, WatcherConfig};
pub use errors::{FileError, IndexError};
pub use orchestrator::{IndexEvent, IndexReport, Indexer, STATE_FILE};
pub use status::{IndexState, IndexStatus};
pub use watcher::{ChangeKind, FsChange, WatcherHandle, spawn as spawn_watcher};
