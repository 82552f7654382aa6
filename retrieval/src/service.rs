//! Retrieval service: cached semantic search, file reads, LLM pass-through.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::{debug, info};

use indexing::{Indexer, cache_key};

use crate::errors::RetrievalError;
use crate::parser::parse_engine_output;
use crate::types::SearchResult;

/// Engine output sizing: roughly this many characters per requested result.
const OUTPUT_CHARS_PER_RESULT: usize = 2_000;

/// Wraps the engine's search surface with caching and result shaping.
#[derive(Clone)]
pub struct RetrievalService {
    indexer: Arc<Indexer>,
}

impl RetrievalService {
    pub fn new(indexer: Arc<Indexer>) -> Self {
        Self { indexer }
    }

    pub fn indexer(&self) -> &Arc<Indexer> {
        &self.indexer
    }

    /// Semantic search with write-through caching.
    ///
    /// Identical queries within the cache TTL never touch the engine; any
    /// successful index run invalidates prior keys via the fingerprint.
    pub async fn semantic_search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, RetrievalError> {
        let top_k = top_k.max(1);
        let fp = self.indexer.fingerprint();
        let key = cache_key(&["search", query, &top_k.to_string()], fp);

        if let Some(value) = self.indexer.caches.search.get(&key) {
            let cached: Vec<SearchResult> = serde_json::from_value(value)?;
            debug!(query_len = query.len(), hits = cached.len(), "search cache hit");
            return Ok(cached);
        }

        let t0 = Instant::now();
        let raw = self
            .indexer
            .engine()
            .search(query, top_k * OUTPUT_CHARS_PER_RESULT)
            .await?;
        let mut results = parse_engine_output(&raw, top_k);
        results.truncate(top_k);
        // Descending relevance; stable sort keeps engine order on ties.
        results.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));

        info!(
            query_len = query.len(),
            hits = results.len(),
            latency_ms = t0.elapsed().as_millis() as u64,
            "semantic search completed"
        );

        self.indexer
            .caches
            .search
            .put(key, serde_json::to_value(&results)?);
        Ok(results)
    }

    /// Machine-readable search payload with workspace and index metadata.
    pub async fn codebase_retrieval(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<serde_json::Value, RetrievalError> {
        let results = self.semantic_search(query, top_k).await?;
        let status = self.indexer.status();
        Ok(json!({
            "workspace": status.workspace,
            "index": {
                "last_indexed": status.last_indexed,
                "file_count": status.file_count,
                "is_stale": status.is_stale,
            },
            "query": query,
            "results": results,
        }))
    }

    /// Thin pass-through to the external LLM collaborator.
    pub async fn search_and_ask(
        &self,
        context: &str,
        prompt: &str,
    ) -> Result<String, RetrievalError> {
        Ok(self.indexer.engine().search_and_ask(context, prompt).await?)
    }

    /// Read a workspace file, optionally slicing a 1-based inclusive range.
    pub async fn get_file(
        &self,
        rel_path: &str,
        line_range: Option<(usize, usize)>,
    ) -> Result<String, RetrievalError> {
        let full = workspace_fs::resolve_workspace_path(self.indexer.workspace_root(), rel_path)?;
        workspace_fs::check_readable_size(&full)?;
        let content = std::fs::read_to_string(&full)?;

        match line_range {
            None => Ok(content),
            Some((start, end)) => {
                let lines: Vec<&str> = content.lines().collect();
                if start == 0 || end < start || end > lines.len() {
                    return Err(RetrievalError::InvalidRange {
                        path: rel_path.to_string(),
                        start,
                        end,
                        lines: lines.len(),
                    });
                }
                Ok(lines[start - 1..end].join("\n"))
            }
        }
    }
}
