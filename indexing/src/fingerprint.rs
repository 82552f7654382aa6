//! Monotonic index fingerprint, persisted next to the engine state.
//!
//! Bumped only on successful index runs; every cache key embeds the current
//! value, so a bump invalidates all previously cached results at once.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::IndexError;

pub const FINGERPRINT_FILE: &str = ".augment-index-fingerprint.json";

#[derive(Serialize, Deserialize)]
struct Persisted {
    fingerprint: u64,
}

/// Process-local counter backed by a JSON file in the workspace root.
#[derive(Debug)]
pub struct IndexFingerprint {
    path: PathBuf,
    value: AtomicU64,
}

impl IndexFingerprint {
    pub fn load(workspace_root: &Path) -> Self {
        let path = workspace_root.join(FINGERPRINT_FILE);
        let value = std::fs::read(&path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<Persisted>(&bytes).ok())
            .map(|p| p.fingerprint)
            .unwrap_or(0);
        Self {
            path,
            value: AtomicU64::new(value),
        }
    }

    pub fn current(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Increment and persist. The new value is returned even when the write
    /// fails; callers still get cache invalidation for the process lifetime.
    pub fn bump(&self) -> u64 {
        let next = self.value.fetch_add(1, Ordering::SeqCst) + 1;
        if let Err(e) = self.persist(next) {
            warn!(error = %e, "failed to persist index fingerprint");
        }
        next
    }

    fn persist(&self, value: u64) -> Result<(), IndexError> {
        let tmp = self.path.with_extension("json.tmp");
        let data = serde_json::to_vec(&Persisted { fingerprint: value })?;
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn bump_is_monotonic_and_persisted() {
        let ws = TempDir::new().unwrap();
        let fp = IndexFingerprint::load(ws.path());
        assert_eq!(fp.current(), 0);
        assert_eq!(fp.bump(), 1);
        assert_eq!(fp.bump(), 2);

        let reloaded = IndexFingerprint::load(ws.path());
        assert_eq!(reloaded.current(), 2);
    }
}
