//! File-system watcher with debounced batching.
//!
//! Events are coalesced by path into a pending set; a debounce timer flushes
//! the batch. Adds and changes go to incremental indexing; deletions follow
//! the reindex policy: an extra debounce, a cooldown between reindexes, and
//! a burst threshold that fires immediately.
//!
//! The notify wiring is separated from the batcher loop so the loop can be
//! driven directly in tests.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, Instant, sleep_until};
use tracing::{debug, info, warn};

use workspace_fs::{IgnoreSet, is_indexable_name};

use crate::config::WatcherConfig;
use crate::errors::IndexError;
use crate::orchestrator::Indexer;

/// One classified change delivered to the batcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FsChange {
    pub rel_path: String,
    pub kind: ChangeKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Upsert,
    Delete,
}

/// Running watcher; dropping the handle or calling [`WatcherHandle::stop`]
/// shuts the loop down.
pub struct WatcherHandle {
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl WatcherHandle {
    pub fn stop(self) {
        let _ = self.shutdown.send(true);
        self.task.abort();
    }
}

/// Start watching the indexer's workspace root.
pub fn spawn(indexer: Arc<Indexer>, cfg: WatcherConfig) -> Result<WatcherHandle, IndexError> {
    let root = indexer.workspace_root().to_path_buf();
    let ignore = IgnoreSet::load(&root);
    let (tx, rx) = mpsc::unbounded_channel::<FsChange>();

    let event_root = root.clone();
    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        match res {
            Ok(event) => {
                for change in classify_event(&event_root, &ignore, &event) {
                    let _ = tx.send(change);
                }
            }
            Err(e) => warn!(error = %e, "watcher event error"),
        }
    })
    .map_err(|e| IndexError::Watcher(e.to_string()))?;

    watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|e| IndexError::Watcher(e.to_string()))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        // Keep the notify watcher alive for the lifetime of the loop.
        let _watcher = watcher;
        batcher_loop(rx, indexer, cfg, shutdown_rx).await;
    });

    info!(root = %root.display(), "workspace watcher started");
    Ok(WatcherHandle {
        shutdown: shutdown_tx,
        task,
    })
}

/// Map a raw notify event onto workspace-relative classified changes.
pub fn classify_event(root: &Path, ignore: &IgnoreSet, event: &Event) -> Vec<FsChange> {
    let kind = match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => ChangeKind::Upsert,
        EventKind::Remove(_) => ChangeKind::Delete,
        _ => return Vec::new(),
    };

    let mut out = Vec::new();
    for path in &event.paths {
        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };
        let rel = rel.to_string_lossy().replace('\\', "/");
        if rel.is_empty() {
            continue;
        }
        let basename = rel.rsplit('/').next().unwrap_or(&rel);
        if !is_indexable_name(basename) {
            continue;
        }
        if ignore.should_ignore(&rel, false) {
            continue;
        }
        out.push(FsChange {
            rel_path: rel,
            kind,
        });
    }
    out
}

/// Debounce + flush loop. Per-path last-write wins within a batch.
pub async fn batcher_loop(
    mut rx: mpsc::UnboundedReceiver<FsChange>,
    indexer: Arc<Indexer>,
    cfg: WatcherConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let far_future = || Instant::now() + Duration::from_secs(3600 * 24);
    let mut pending_upserts: HashSet<String> = HashSet::new();
    let mut pending_deletes: HashSet<String> = HashSet::new();
    let mut flush_at: Option<Instant> = None;
    let mut reindex_at: Option<Instant> = None;
    let mut last_reindex: Option<Instant> = None;

    loop {
        let flush_deadline = flush_at.unwrap_or_else(far_future);
        let reindex_deadline = reindex_at.unwrap_or_else(far_future);

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            maybe = rx.recv() => {
                let Some(change) = maybe else { break };
                match change.kind {
                    ChangeKind::Upsert => {
                        pending_deletes.remove(&change.rel_path);
                        pending_upserts.insert(change.rel_path);
                    }
                    ChangeKind::Delete => {
                        pending_upserts.remove(&change.rel_path);
                        pending_deletes.insert(change.rel_path);
                    }
                }
                flush_at = Some(Instant::now() + Duration::from_millis(cfg.debounce_ms));
            }
            _ = sleep_until(flush_deadline), if flush_at.is_some() => {
                flush_at = None;
                let upserts: Vec<String> = pending_upserts.drain().collect();
                let deletes = pending_deletes.drain().count();

                if !upserts.is_empty() {
                    for chunk in upserts.chunks(cfg.batch_size.max(1)) {
                        debug!(files = chunk.len(), "watcher: flushing upsert batch");
                        if let Err(e) = indexer.index_files(chunk).await {
                            warn!(error = %e, "watcher: incremental index failed");
                        }
                    }
                }

                if deletes > 0 && cfg.reindex_on_delete {
                    if deletes >= cfg.delete_burst_threshold {
                        debug!(deletes, "watcher: deletion burst, reindex now");
                        reindex_at = Some(Instant::now());
                    } else {
                        reindex_at = Some(
                            Instant::now() + Duration::from_millis(cfg.reindex_debounce_ms),
                        );
                    }
                }
            }
            _ = sleep_until(reindex_deadline), if reindex_at.is_some() => {
                let cooldown = Duration::from_millis(cfg.reindex_cooldown_ms);
                if let Some(last) = last_reindex {
                    let next_allowed = last + cooldown;
                    if Instant::now() < next_allowed {
                        reindex_at = Some(next_allowed);
                        continue;
                    }
                }
                reindex_at = None;
                last_reindex = Some(Instant::now());
                info!("watcher: deletion-triggered full reindex");
                if let Err(e) = indexer.reindex_workspace().await {
                    warn!(error = %e, "watcher: reindex failed");
                }
            }
        }
    }
    debug!("watcher batcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexingConfig;
    use engine_client::EngineClient;
    use tempfile::TempDir;

    fn touch(ws: &TempDir, rel: &str, content: &str) {
        let path = ws.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn upserts_flow_into_incremental_index() {
        let ws = TempDir::new().unwrap();
        touch(&ws, "src/util/new.ts", "export const PURPLE_FLAG_99 = 1;\n");

        let indexer = Arc::new(Indexer::new(
            ws.path(),
            IndexingConfig::default(),
            EngineClient::fixed(),
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cfg = WatcherConfig {
            debounce_ms: 20,
            ..WatcherConfig::default()
        };
        let task = tokio::spawn(batcher_loop(rx, Arc::clone(&indexer), cfg, shutdown_rx));

        tx.send(FsChange {
            rel_path: "src/util/new.ts".into(),
            kind: ChangeKind::Upsert,
        })
        .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let raw = indexer
            .engine()
            .search("PURPLE_FLAG_99", 4000)
            .await
            .unwrap();
        assert!(raw.contains("src/util/new.ts"));

        shutdown_tx.send(true).unwrap();
        let _ = task.await;
    }

    #[tokio::test]
    async fn last_write_wins_within_batch() {
        let ws = TempDir::new().unwrap();
        let indexer = Arc::new(Indexer::new(
            ws.path(),
            IndexingConfig::default(),
            EngineClient::fixed(),
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cfg = WatcherConfig {
            debounce_ms: 20,
            reindex_on_delete: false,
            ..WatcherConfig::default()
        };
        let task = tokio::spawn(batcher_loop(rx, Arc::clone(&indexer), cfg, shutdown_rx));

        // Upsert then delete the same path: only the delete survives, and with
        // reindex disabled nothing gets indexed.
        tx.send(FsChange {
            rel_path: "a.md".into(),
            kind: ChangeKind::Upsert,
        })
        .unwrap();
        tx.send(FsChange {
            rel_path: "a.md".into(),
            kind: ChangeKind::Delete,
        })
        .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(indexer.status().file_count, 0);

        shutdown_tx.send(true).unwrap();
        let _ = task.await;
    }

    #[test]
    fn classify_filters_non_indexable() {
        let ws = TempDir::new().unwrap();
        let ignore = IgnoreSet::builtin();
        let event = Event {
            kind: EventKind::Create(notify::event::CreateKind::File),
            paths: vec![
                ws.path().join("src/ok.rs"),
                ws.path().join("node_modules/x.js"),
                ws.path().join("image.png"),
            ],
            attrs: Default::default(),
        };
        let changes = classify_event(ws.path(), &ignore, &event);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].rel_path, "src/ok.rs");
    }
}
