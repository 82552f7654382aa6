//! Engine client with enum dispatch: HTTP for real deployments, a fixed
//! in-process engine for tests and offline smoke runs.
//!
//! No `async-trait` and no boxed trait objects; callers hold an
//! [`EngineClient`] and dispatch is a plain `match`.

use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::errors::EngineError;

/// One file handed to the engine for indexing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileBlob {
    pub path: String,
    pub content: String,
}

/// Client over the external context engine.
pub enum EngineClient {
    Http(HttpEngine),
    Fixed(FixedEngine),
}

impl EngineClient {
    /// HTTP client for the configured endpoint. Validates the offline policy.
    pub fn from_config(cfg: EngineConfig) -> Result<Self, EngineError> {
        cfg.validate()?;
        Ok(Self::Http(HttpEngine::new(cfg)?))
    }

    /// In-process engine with substring search. Used by tests and as the
    /// fallback when no endpoint is configured in offline mode.
    pub fn fixed() -> Self {
        Self::Fixed(FixedEngine::default())
    }

    /// Add one batch of files to the index.
    ///
    /// `wait_for_indexing` should be true on the final batch only, so a
    /// completed upload guarantees visibility to subsequent searches.
    pub async fn add_to_index(
        &self,
        files: &[FileBlob],
        wait_for_indexing: bool,
    ) -> Result<(), EngineError> {
        match self {
            Self::Http(h) => h.add_to_index(files, wait_for_indexing).await,
            Self::Fixed(f) => f.add_to_index(files),
        }
    }

    /// Drop all engine-side index state.
    pub async fn clear(&self) -> Result<(), EngineError> {
        match self {
            Self::Http(h) => h.clear().await,
            Self::Fixed(f) => f.clear(),
        }
    }

    /// Raw formatted search output; parsing happens in the retrieval layer.
    pub async fn search(
        &self,
        query: &str,
        max_output_length: usize,
    ) -> Result<String, EngineError> {
        let t0 = Instant::now();
        let out = match self {
            Self::Http(h) => h.search(query, max_output_length).await,
            Self::Fixed(f) => f.search(query, max_output_length),
        };
        if out.is_ok() {
            debug!(
                query_len = query.len(),
                latency_ms = t0.elapsed().as_millis() as u64,
                "engine search completed"
            );
        }
        out
    }

    /// `searchAndAsk(context, prompt) -> text` LLM contract.
    pub async fn search_and_ask(&self, context: &str, prompt: &str) -> Result<String, EngineError> {
        let t0 = Instant::now();
        let out = match self {
            Self::Http(h) => h.search_and_ask(context, prompt).await,
            Self::Fixed(f) => f.search_and_ask(context, prompt),
        };
        if out.is_ok() {
            info!(
                prompt_len = prompt.len(),
                context_len = context.len(),
                latency_ms = t0.elapsed().as_millis() as u64,
                "search_and_ask completed"
            );
        }
        out
    }

    /// Engine-owned index snapshot, persisted by the indexing layer.
    pub async fn state_snapshot(&self) -> Result<serde_json::Value, EngineError> {
        match self {
            Self::Http(h) => h.state_snapshot().await,
            Self::Fixed(f) => Ok(f.state_snapshot()),
        }
    }

    /// Cheap reachability probe. Never errors; logs the failure instead.
    pub async fn health(&self) -> bool {
        match self {
            Self::Http(h) => h.health().await,
            Self::Fixed(_) => true,
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP engine
// ---------------------------------------------------------------------------

/// Thin reqwest wrapper; one client, bearer auth, bounded timeouts.
pub struct HttpEngine {
    cfg: EngineConfig,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: String,
}

#[derive(Deserialize)]
struct AskResponse {
    text: String,
}

impl HttpEngine {
    fn new(cfg: EngineConfig) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .map_err(|e| EngineError::Config(e.to_string()))?;
        Ok(Self { cfg, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.cfg.api_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.cfg.api_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn add_to_index(
        &self,
        files: &[FileBlob],
        wait_for_indexing: bool,
    ) -> Result<(), EngineError> {
        let body = json!({ "files": files, "wait_for_indexing": wait_for_indexing });
        let resp = self
            .authorize(self.http.post(self.url("index/batch")))
            .json(&body)
            .send()
            .await?;
        resp.error_for_status()?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), EngineError> {
        let resp = self
            .authorize(self.http.post(self.url("index/clear")))
            .send()
            .await?;
        resp.error_for_status()?;
        Ok(())
    }

    async fn search(&self, query: &str, max_output_length: usize) -> Result<String, EngineError> {
        let body = json!({ "query": query, "max_output_length": max_output_length });
        let resp = self
            .authorize(self.http.post(self.url("search")))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let parsed: SearchResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::InvalidResponse(e.to_string()))?;
        Ok(parsed.result)
    }

    async fn search_and_ask(&self, context: &str, prompt: &str) -> Result<String, EngineError> {
        let body = json!({ "context": context, "prompt": prompt });
        let resp = self
            .authorize(self.http.post(self.url("ask")))
            .timeout(Duration::from_secs(self.cfg.llm_timeout_secs))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::Timeout(self.cfg.llm_timeout_secs)
                } else {
                    EngineError::from(e)
                }
            })?
            .error_for_status()?;
        let parsed: AskResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::InvalidResponse(e.to_string()))?;
        Ok(parsed.text)
    }

    async fn state_snapshot(&self) -> Result<serde_json::Value, EngineError> {
        let resp = self
            .authorize(self.http.get(self.url("state")))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn health(&self) -> bool {
        match self
            .authorize(self.http.get(self.url("health")))
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(error = %e, "engine health probe failed");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Fixed engine
// ---------------------------------------------------------------------------

/// In-memory engine: substring matching over ingested files, canned LLM
/// answers. Deterministic on purpose.
#[derive(Default)]
pub struct FixedEngine {
    files: RwLock<BTreeMap<String, String>>,
    canned_answers: Mutex<Vec<String>>,
}

impl FixedEngine {
    fn add_to_index(&self, files: &[FileBlob]) -> Result<(), EngineError> {
        let mut map = self.files.write().expect("fixed engine lock");
        for f in files {
            map.insert(f.path.clone(), f.content.clone());
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), EngineError> {
        self.files.write().expect("fixed engine lock").clear();
        Ok(())
    }

    /// Formats hits the way the real engine does: `Path:` header, `Lines:`
    /// extent, then content. Matching is case-insensitive substring.
    fn search(&self, query: &str, max_output_length: usize) -> Result<String, EngineError> {
        let needle = query.to_lowercase();
        let map = self.files.read().expect("fixed engine lock");
        let mut out = String::new();

        for (path, content) in map.iter() {
            if !content.to_lowercase().contains(&needle) && !path.to_lowercase().contains(&needle)
            {
                continue;
            }
            let (snippet, start, end) = excerpt_around_match(content, &needle);
            out.push_str(&format!("Path: {path}\n"));
            out.push_str(&format!("Lines: {start}-{end}\n"));
            out.push_str(&snippet);
            out.push_str("\n\n");
            if out.len() >= max_output_length {
                let mut cut = max_output_length.min(out.len());
                while cut > 0 && !out.is_char_boundary(cut) {
                    cut -= 1;
                }
                out.truncate(cut);
                break;
            }
        }
        Ok(out)
    }

    fn search_and_ask(&self, _context: &str, prompt: &str) -> Result<String, EngineError> {
        let mut canned = self.canned_answers.lock().expect("fixed engine lock");
        if let Some(answer) = canned.pop() {
            return Ok(answer);
        }
        Ok(format!("fixed-engine: no model configured ({} chars asked)", prompt.len()))
    }

    fn state_snapshot(&self) -> serde_json::Value {
        let map = self.files.read().expect("fixed engine lock");
        json!({ "engine": "fixed", "file_count": map.len() })
    }

    /// Queue an answer returned (LIFO) by the next `search_and_ask`.
    pub fn push_canned_answer(&self, answer: impl Into<String>) {
        self.canned_answers
            .lock()
            .expect("fixed engine lock")
            .push(answer.into());
    }
}

/// Up to 12 lines around the first matching line, with 1-based extents.
fn excerpt_around_match(content: &str, needle: &str) -> (String, usize, usize) {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return (String::new(), 1, 1);
    }
    let hit = lines
        .iter()
        .position(|l| l.to_lowercase().contains(needle))
        .unwrap_or(0);
    let start = hit.saturating_sub(3);
    let end = (hit + 8).min(lines.len() - 1);
    (lines[start..=end].join("\n"), start + 1, end + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_engine_round_trip() {
        let engine = EngineClient::fixed();
        engine
            .add_to_index(
                &[FileBlob {
                    path: "src/auth/login.ts".into(),
                    content: "const WHALE_CONST_42 = 1;\n".into(),
                }],
                true,
            )
            .await
            .unwrap();

        let raw = engine.search("WHALE_CONST_42", 4000).await.unwrap();
        assert!(raw.contains("Path: src/auth/login.ts"));
        assert!(raw.contains("WHALE_CONST_42"));
    }

    #[tokio::test]
    async fn fixed_engine_canned_answers() {
        let engine = EngineClient::fixed();
        if let EngineClient::Fixed(f) = &engine {
            f.push_canned_answer("hello");
        }
        let out = engine.search_and_ask("ctx", "prompt").await.unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn fixed_engine_clear_empties_results() {
        let engine = EngineClient::fixed();
        engine
            .add_to_index(
                &[FileBlob {
                    path: "a.rs".into(),
                    content: "needle".into(),
                }],
                true,
            )
            .await
            .unwrap();
        engine.clear().await.unwrap();
        let raw = engine.search("needle", 4000).await.unwrap();
        assert!(raw.is_empty());
    }
}
