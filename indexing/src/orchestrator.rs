//! Indexing orchestrator: discover → read → classify → batch → engine.
//!
//! Batches are applied in submission order and only the final batch waits for
//! engine-side completion, so a finished run guarantees visibility to
//! subsequent searches. A failed batch falls back to per-file insertion so
//! one poison file cannot reject its neighbors; per-file failures are
//! collected, never raised.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use engine_client::{EngineClient, FileBlob};
use workspace_fs::{IgnoreSet, discover_files, looks_binary, resolve_workspace_path};

use crate::cache::CacheTier;
use crate::config::IndexingConfig;
use crate::errors::{FileError, IndexError};
use crate::fingerprint::IndexFingerprint;
use crate::status::{IndexState, IndexStatus};

/// Engine-owned index snapshot, rewritten only after a successful run.
pub const STATE_FILE: &str = ".augment-context-state.json";

/// Outcome of one indexing operation.
#[derive(Clone, Debug, Serialize)]
pub struct IndexReport {
    pub files_indexed: usize,
    pub files_skipped_binary: usize,
    pub batches: usize,
    pub duration_ms: u64,
    pub errors: Vec<FileError>,
}

/// Progress messages emitted by the background-worker mode.
#[derive(Clone, Debug)]
pub enum IndexEvent {
    Started { total: usize },
    Progress { indexed: usize, total: usize },
    Completed(IndexReport),
    Failed(String),
}

/// Per-workspace indexing service. Owns the engine handle, the cache tier,
/// the fingerprint, and the status snapshot.
pub struct Indexer {
    root: PathBuf,
    cfg: IndexingConfig,
    engine: EngineClient,
    ignore: IgnoreSet,
    status: Mutex<IndexStatus>,
    indexed_paths: Mutex<HashSet<String>>,
    in_flight: AtomicBool,
    pub caches: CacheTier,
    fingerprint: IndexFingerprint,
}

impl Indexer {
    pub fn new(workspace_root: &Path, cfg: IndexingConfig, engine: EngineClient) -> Self {
        let caches = CacheTier::new(
            workspace_root,
            cfg.persist_search_cache,
            cfg.persist_context_cache,
        );
        Self {
            root: workspace_root.to_path_buf(),
            ignore: IgnoreSet::load(workspace_root),
            status: Mutex::new(IndexStatus::new(
                workspace_root.to_string_lossy().to_string(),
            )),
            indexed_paths: Mutex::new(HashSet::new()),
            in_flight: AtomicBool::new(false),
            caches,
            fingerprint: IndexFingerprint::load(workspace_root),
            engine,
            cfg,
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.root
    }

    pub fn engine(&self) -> &EngineClient {
        &self.engine
    }

    pub fn config(&self) -> &IndexingConfig {
        &self.cfg
    }

    /// Current fingerprint for cache key construction.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint.current()
    }

    /// Status snapshot with staleness recomputed.
    pub fn status(&self) -> IndexStatus {
        let mut snap = self.status.lock().expect("status lock").clone();
        snap.refresh_staleness(Utc::now());
        snap
    }

    /// Probe the engine and record reachability on the status.
    pub async fn probe_engine(&self) -> bool {
        let ok = self.engine.health().await;
        self.status.lock().expect("status lock").engine_reachable = Some(ok);
        ok
    }

    /// Full workspace re-index.
    pub async fn index_workspace(&self) -> Result<IndexReport, IndexError> {
        self.index_workspace_inner(None).await
    }

    /// Full re-index on a background task; progress arrives on the channel.
    pub fn index_workspace_background(
        self: &std::sync::Arc<Self>,
    ) -> mpsc::UnboundedReceiver<IndexEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let this = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            match this.index_workspace_inner(Some(&tx)).await {
                Ok(report) => {
                    let _ = tx.send(IndexEvent::Completed(report));
                }
                Err(e) => {
                    let _ = tx.send(IndexEvent::Failed(e.to_string()));
                }
            }
        });
        rx
    }

    async fn index_workspace_inner(
        &self,
        progress: Option<&mpsc::UnboundedSender<IndexEvent>>,
    ) -> Result<IndexReport, IndexError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(IndexError::Busy);
        }
        let t0 = Instant::now();
        self.set_state(IndexState::Indexing);

        let discovered = discover_files(&self.root, &self.ignore);
        let rels: Vec<String> = discovered.into_iter().map(|f| f.rel_path).collect();
        debug!(files = rels.len(), "index: discovery complete");
        if let Some(tx) = progress {
            let _ = tx.send(IndexEvent::Started { total: rels.len() });
        }

        let result = self.ingest(&rels, progress).await;
        self.in_flight.store(false, Ordering::SeqCst);

        match result {
            Ok(mut report) => {
                {
                    let mut set = self.indexed_paths.lock().expect("paths lock");
                    set.clear();
                    set.extend(rels);
                }
                self.finalize_success(&mut report, t0).await;
                Ok(report)
            }
            Err(e) => {
                self.set_error(&e);
                Err(e)
            }
        }
    }

    /// Incremental indexing of specific workspace-relative paths.
    pub async fn index_files(&self, rel_paths: &[String]) -> Result<IndexReport, IndexError> {
        let t0 = Instant::now();
        self.set_state(IndexState::Indexing);
        match self.ingest(rel_paths, None).await {
            Ok(mut report) => {
                {
                    let mut set = self.indexed_paths.lock().expect("paths lock");
                    set.extend(rel_paths.iter().cloned());
                }
                self.finalize_success(&mut report, t0).await;
                Ok(report)
            }
            Err(e) => {
                self.set_error(&e);
                Err(e)
            }
        }
    }

    /// Delete persisted state and caches; engine-side index is dropped too.
    pub async fn clear_index(&self) -> Result<(), IndexError> {
        self.engine.clear().await?;
        let state_path = self.root.join(STATE_FILE);
        if state_path.exists() {
            std::fs::remove_file(&state_path)?;
        }
        self.caches.invalidate_all();
        self.fingerprint.bump();
        self.indexed_paths.lock().expect("paths lock").clear();

        let mut status = self.status.lock().expect("status lock");
        status.status = IndexState::Idle;
        status.last_indexed = None;
        status.file_count = 0;
        status.last_error = None;
        info!("index cleared");
        Ok(())
    }

    /// `clear_index` followed by a full `index_workspace`.
    pub async fn reindex_workspace(&self) -> Result<IndexReport, IndexError> {
        self.clear_index().await?;
        self.index_workspace().await
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    async fn ingest(
        &self,
        rel_paths: &[String],
        progress: Option<&mpsc::UnboundedSender<IndexEvent>>,
    ) -> Result<IndexReport, IndexError> {
        let t0 = Instant::now();
        let mut errors: Vec<FileError> = Vec::new();
        let mut skipped_binary = 0usize;
        let mut blobs: Vec<FileBlob> = Vec::new();

        for rel in rel_paths {
            match self.read_one(rel) {
                Ok(Some(blob)) => blobs.push(blob),
                Ok(None) => skipped_binary += 1,
                Err(e) => errors.push(FileError {
                    path: rel.clone(),
                    error: e.to_string(),
                }),
            }
        }

        let batch_size = self.cfg.batch_size.max(1);
        let total_batches = blobs.len().div_ceil(batch_size);
        let mut indexed = 0usize;

        for (i, chunk) in blobs.chunks(batch_size).enumerate() {
            let is_last = i + 1 == total_batches;
            match self.engine.add_to_index(chunk, is_last).await {
                Ok(()) => indexed += chunk.len(),
                Err(batch_err) => {
                    warn!(
                        batch = i,
                        error = %batch_err,
                        "index: batch failed, falling back to per-file insertion"
                    );
                    for blob in chunk {
                        match self.engine.add_to_index(std::slice::from_ref(blob), is_last).await {
                            Ok(()) => indexed += 1,
                            Err(e) => errors.push(FileError {
                                path: blob.path.clone(),
                                error: e.to_string(),
                            }),
                        }
                    }
                }
            }
            if let Some(tx) = progress {
                let _ = tx.send(IndexEvent::Progress {
                    indexed,
                    total: blobs.len(),
                });
            }
        }

        Ok(IndexReport {
            files_indexed: indexed,
            files_skipped_binary: skipped_binary,
            batches: total_batches,
            duration_ms: t0.elapsed().as_millis() as u64,
            errors,
        })
    }

    /// Read one file under policy. `Ok(None)` means binary content skipped.
    fn read_one(&self, rel: &str) -> Result<Option<FileBlob>, IndexError> {
        let full = resolve_workspace_path(&self.root, rel)?;
        workspace_fs::check_readable_size(&full)?;
        let bytes = std::fs::read(&full)?;
        if looks_binary(&bytes) {
            return Ok(None);
        }
        Ok(Some(FileBlob {
            path: rel.to_string(),
            content: String::from_utf8_lossy(&bytes).into_owned(),
        }))
    }

    async fn finalize_success(&self, report: &mut IndexReport, t0: Instant) {
        // Engine snapshot is rewritten only on success.
        match self.engine.state_snapshot().await {
            Ok(snapshot) => {
                if let Err(e) = self.persist_state(&snapshot) {
                    warn!(error = %e, "failed to persist engine state");
                }
            }
            Err(e) => warn!(error = %e, "engine state snapshot unavailable"),
        }

        let fp = self.fingerprint.bump();
        self.caches.search.clear();
        self.caches.context.clear();
        if let Err(e) = self.caches.flush_to_disk() {
            warn!(error = %e, "failed to flush caches");
        }

        let file_count = self.indexed_paths.lock().expect("paths lock").len();
        {
            let mut status = self.status.lock().expect("status lock");
            status.status = IndexState::Idle;
            status.last_indexed = Some(Utc::now());
            status.file_count = file_count;
            status.last_error = None;
        }
        report.duration_ms = t0.elapsed().as_millis() as u64;
        info!(
            files = report.files_indexed,
            skipped_binary = report.files_skipped_binary,
            batches = report.batches,
            errors = report.errors.len(),
            fingerprint = fp,
            duration_ms = report.duration_ms,
            "index run complete"
        );
    }

    fn persist_state(&self, snapshot: &serde_json::Value) -> Result<(), IndexError> {
        let path = self.root.join(STATE_FILE);
        let tmp = self.root.join(format!("{STATE_FILE}.tmp"));
        std::fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn set_state(&self, state: IndexState) {
        self.status.lock().expect("status lock").status = state;
    }

    fn set_error(&self, e: &IndexError) {
        let mut status = self.status.lock().expect("status lock");
        status.status = IndexState::Error;
        status.last_error = Some(e.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(ws: &TempDir, rel: &str, content: &str) {
        let path = ws.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn indexer(ws: &TempDir) -> Indexer {
        Indexer::new(ws.path(), IndexingConfig::default(), EngineClient::fixed())
    }

    #[tokio::test]
    async fn full_index_updates_status_and_state_file() {
        let ws = TempDir::new().unwrap();
        touch(&ws, "src/auth/login.ts", "const WHALE_CONST_42 = 1;\n");
        touch(&ws, "README.md", "# readme\n");

        let idx = indexer(&ws);
        let report = idx.index_workspace().await.unwrap();
        assert_eq!(report.files_indexed, 2);
        assert!(report.errors.is_empty());

        let status = idx.status();
        assert_eq!(status.status, IndexState::Idle);
        assert_eq!(status.file_count, 2);
        assert!(!status.is_stale);
        assert!(ws.path().join(STATE_FILE).exists());
    }

    #[tokio::test]
    async fn binary_files_are_skipped_not_errors() {
        let ws = TempDir::new().unwrap();
        touch(&ws, "ok.md", "text");
        let bin = ws.path().join("blob.json");
        std::fs::write(&bin, b"\x00\x01\x02binary").unwrap();

        let idx = indexer(&ws);
        let report = idx.index_workspace().await.unwrap();
        assert_eq!(report.files_indexed, 1);
        assert_eq!(report.files_skipped_binary, 1);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn fingerprint_bumps_on_success() {
        let ws = TempDir::new().unwrap();
        touch(&ws, "a.md", "x");
        let idx = indexer(&ws);
        let before = idx.fingerprint();
        idx.index_workspace().await.unwrap();
        assert!(idx.fingerprint() > before);
    }

    #[tokio::test]
    async fn clear_index_resets_everything() {
        let ws = TempDir::new().unwrap();
        touch(&ws, "a.md", "x");
        let idx = indexer(&ws);
        idx.index_workspace().await.unwrap();
        idx.clear_index().await.unwrap();

        let status = idx.status();
        assert_eq!(status.file_count, 0);
        assert!(status.last_indexed.is_none());
        assert!(status.is_stale);
        assert!(!ws.path().join(STATE_FILE).exists());
    }

    #[tokio::test]
    async fn incremental_index_extends_file_count() {
        let ws = TempDir::new().unwrap();
        touch(&ws, "a.md", "x");
        let idx = indexer(&ws);
        idx.index_workspace().await.unwrap();

        touch(&ws, "b.md", "y");
        let report = idx.index_files(&["b.md".to_string()]).await.unwrap();
        assert_eq!(report.files_indexed, 1);
        assert_eq!(idx.status().file_count, 2);
    }

    #[tokio::test]
    async fn per_file_errors_are_collected() {
        let ws = TempDir::new().unwrap();
        touch(&ws, "a.md", "x");
        let idx = indexer(&ws);
        let report = idx
            .index_files(&["a.md".to_string(), "missing.md".to_string()])
            .await
            .unwrap();
        assert_eq!(report.files_indexed, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].path, "missing.md");
    }
}
