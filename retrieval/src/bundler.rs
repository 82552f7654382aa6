//! Context bundler: deterministic assembly of a token-budgeted bundle.
//!
//! Pipeline: search wide (3× max_files) → relevance filter → group by path →
//! sort and cap → even budget split with a 100-token per-file floor → smart
//! snippet extraction → optional related-file discovery → hints.
//!
//! `metadata.total_tokens ≤ token_budget` always holds; `truncated` is set
//! only when content was dropped for budget reasons.

use std::collections::BTreeMap;
use std::time::Instant;

use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

use indexing::cache_key;

use crate::errors::RetrievalError;
use crate::service::RetrievalService;
use crate::snippet::{detect_code_type, smart_extract};
use crate::types::{
    BundleMetadata, BundleOptions, ContextBundle, FileContext, SearchResult, Snippet,
    estimate_tokens,
};

/// Files whose budget share falls below this are dropped (and flagged).
const MIN_FILE_TOKENS: usize = 100;
/// Related siblings kept per file.
const MAX_RELATED: usize = 3;

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?:from\s+|import\s+|require\()\s*["'](\.{1,2}/[A-Za-z0-9_\-./]+)["']"#)
            .expect("valid regex")
    })
}

/// Assembles context bundles on top of the retrieval service.
#[derive(Clone)]
pub struct ContextBundler {
    svc: RetrievalService,
}

impl ContextBundler {
    pub fn new(svc: RetrievalService) -> Self {
        Self { svc }
    }

    pub fn service(&self) -> &RetrievalService {
        &self.svc
    }

    /// Build a bundle for `query`. `extra_hints` (e.g. matching memory
    /// records) are appended to the generated hints verbatim.
    pub async fn build(
        &self,
        query: &str,
        opts: BundleOptions,
        extra_hints: &[String],
    ) -> Result<ContextBundle, RetrievalError> {
        let opts = opts.clamped();
        let indexer = self.svc.indexer();
        let fp = indexer.fingerprint();
        let opts_key = serde_json::to_string(&opts)?;
        let key = cache_key(&["context", query, &opts_key], fp);

        if extra_hints.is_empty() {
            if let Some(value) = indexer.caches.context.get(&key) {
                debug!(query_len = query.len(), "context cache hit");
                return Ok(serde_json::from_value(value)?);
            }
        }

        let t0 = Instant::now();
        let results = self.svc.semantic_search(query, opts.max_files * 3).await?;
        let search_time_ms = t0.elapsed().as_millis() as u64;

        let kept: Vec<&SearchResult> = results
            .iter()
            .filter(|r| r.relevance >= opts.min_relevance)
            .collect();

        // Group by path, preserving first-appearance order for ties.
        let mut order: Vec<String> = Vec::new();
        let mut groups: BTreeMap<String, Vec<&SearchResult>> = BTreeMap::new();
        for r in &kept {
            if !groups.contains_key(&r.path) {
                order.push(r.path.clone());
            }
            groups.entry(r.path.clone()).or_default().push(*r);
        }
        let matched_files = order.len();

        let mut ranked: Vec<(String, f32)> = order
            .into_iter()
            .map(|path| {
                let rel = groups[&path]
                    .iter()
                    .map(|r| r.relevance)
                    .fold(0.0f32, f32::max);
                (path, rel)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        let selected: Vec<(String, f32)> = ranked.into_iter().take(opts.max_files).collect();

        let mut truncated = false;
        let mut used_tokens = 0usize;
        let mut files_out: Vec<FileContext> = Vec::new();

        for (i, (path, file_rel)) in selected.iter().enumerate() {
            let files_remaining = selected.len() - i;
            let remaining = opts.token_budget.saturating_sub(used_tokens);
            let per_file = remaining / files_remaining;
            if per_file < MIN_FILE_TOKENS {
                truncated = true;
                break;
            }

            let members = &groups[path];
            let mut file_used = 0usize;
            let mut snippets: Vec<Snippet> = Vec::new();
            for (j, member) in members.iter().enumerate() {
                let left = per_file.saturating_sub(file_used);
                let share = left / (members.len() - j);
                if share == 0 {
                    truncated = true;
                    break;
                }
                let (text, cut) = smart_extract(&member.content, share);
                let tokens = estimate_tokens(&text);
                if tokens > left {
                    truncated = true;
                    continue;
                }
                if cut {
                    truncated = true;
                }
                file_used += tokens;
                snippets.push(Snippet {
                    code_type: detect_code_type(&member.content),
                    text,
                    lines: member.line_range,
                    relevance: member.relevance,
                    token_count: tokens,
                });
            }
            if snippets.is_empty() {
                continue;
            }
            used_tokens += file_used;

            let related = if opts.include_related {
                self.related_files(path, &selected).await
            } else {
                Vec::new()
            };

            files_out.push(FileContext {
                path: path.clone(),
                relevance: *file_rel,
                snippets,
                related_files: related,
            });
        }

        let total_files = files_out.len();
        let total_snippets = files_out.iter().map(|f| f.snippets.len()).sum();
        let mut hints = build_hints(&files_out, matched_files);
        hints.extend(extra_hints.iter().cloned());

        let summary = if opts.include_summaries {
            build_summary(query, &files_out, used_tokens)
        } else {
            format!("{} files for \"{query}\"", files_out.len())
        };

        let bundle = ContextBundle {
            summary,
            query: query.to_string(),
            files: files_out,
            hints,
            metadata: BundleMetadata {
                total_files,
                total_snippets,
                total_tokens: used_tokens,
                token_budget: opts.token_budget,
                truncated,
                search_time_ms,
            },
        };

        if extra_hints.is_empty() {
            indexer
                .caches
                .context
                .put(key, serde_json::to_value(&bundle)?);
        }
        Ok(bundle)
    }

    /// Relative imports of `path` that exist on disk and are not already in
    /// the selected set; first three win.
    async fn related_files(&self, path: &str, selected: &[(String, f32)]) -> Vec<String> {
        let Ok(source) = self.svc.get_file(path, None).await else {
            return Vec::new();
        };
        let dir = match path.rsplit_once('/') {
            Some((d, _)) => d.to_string(),
            None => String::new(),
        };

        let mut out = Vec::new();
        for cap in import_re().captures_iter(&source) {
            if out.len() >= MAX_RELATED {
                break;
            }
            let raw = &cap[1];
            let Some(joined) = join_relative(&dir, raw) else {
                continue;
            };
            for candidate in candidate_paths(&joined) {
                if selected.iter().any(|(p, _)| *p == candidate)
                    || out.contains(&candidate)
                {
                    continue;
                }
                if self.svc.get_file(&candidate, None).await.is_ok() {
                    out.push(candidate);
                    break;
                }
            }
        }
        out
    }
}

/// Lexically join a relative import onto a directory; `None` when the import
/// climbs out of the workspace.
fn join_relative(dir: &str, import: &str) -> Option<String> {
    let mut parts: Vec<&str> = if dir.is_empty() {
        Vec::new()
    } else {
        dir.split('/').collect()
    };
    for seg in import.split('/') {
        match seg {
            "." | "" => {}
            ".." => {
                parts.pop()?;
            }
            s => parts.push(s),
        }
    }
    Some(parts.join("/"))
}

fn candidate_paths(base: &str) -> Vec<String> {
    let mut out = vec![base.to_string()];
    if !base.rsplit('/').next().is_some_and(|s| s.contains('.')) {
        for ext in ["ts", "tsx", "js", "jsx", "rs", "py"] {
            out.push(format!("{base}.{ext}"));
        }
        out.push(format!("{base}/index.ts"));
        out.push(format!("{base}/mod.rs"));
    }
    out
}

fn build_hints(files: &[FileContext], matched_files: usize) -> Vec<String> {
    let mut hints = Vec::new();

    // File-type histogram.
    let mut ext_counts: BTreeMap<String, usize> = BTreeMap::new();
    for f in files {
        let ext = f
            .path
            .rsplit('.')
            .next()
            .unwrap_or("other")
            .to_string();
        *ext_counts.entry(ext).or_default() += 1;
    }
    if !ext_counts.is_empty() {
        let parts: Vec<String> = ext_counts
            .iter()
            .map(|(ext, n)| format!("{n} .{ext}"))
            .collect();
        hints.push(format!("file types: {}", parts.join(", ")));
    }

    // Code-type histogram.
    let mut kind_counts: BTreeMap<String, usize> = BTreeMap::new();
    for snippet in files.iter().flat_map(|f| &f.snippets) {
        let label = format!("{:?}", snippet.code_type).to_lowercase();
        *kind_counts.entry(label).or_default() += 1;
    }
    if !kind_counts.is_empty() {
        let parts: Vec<String> = kind_counts
            .iter()
            .map(|(kind, n)| format!("{kind}: {n}"))
            .collect();
        hints.push(format!("code shapes: {}", parts.join(", ")));
    }

    // Related-files roll-up.
    let related: Vec<&String> = files.iter().flat_map(|f| &f.related_files).collect();
    if !related.is_empty() {
        let names: Vec<&str> = related.iter().map(|s| s.as_str()).collect();
        hints.push(format!("related files: {}", names.join(", ")));
    }

    // Coverage.
    hints.push(format!(
        "showing {} of {} matched files",
        files.len(),
        matched_files
    ));

    // High-relevance highlights.
    for f in files.iter().filter(|f| f.relevance >= 0.8) {
        hints.push(format!("high relevance: {} ({:.2})", f.path, f.relevance));
    }

    hints
}

fn build_summary(query: &str, files: &[FileContext], tokens: usize) -> String {
    let names: Vec<&str> = files.iter().take(3).map(|f| f.path.as_str()).collect();
    let snippets: usize = files.iter().map(|f| f.snippets.len()).sum();
    format!(
        "Context for \"{query}\": {} files, {snippets} snippets, ~{tokens} tokens. Top: {}",
        files.len(),
        names.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_client::{EngineClient, FileBlob};
    use indexing::{Indexer, IndexingConfig};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn bundler_with(files: &[(&str, &str)]) -> (TempDir, ContextBundler) {
        let ws = TempDir::new().unwrap();
        for (rel, content) in files {
            let path = ws.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        let engine = EngineClient::fixed();
        engine
            .add_to_index(
                &files
                    .iter()
                    .map(|(p, c)| FileBlob {
                        path: p.to_string(),
                        content: c.to_string(),
                    })
                    .collect::<Vec<_>>(),
                true,
            )
            .await
            .unwrap();
        let indexer = Arc::new(Indexer::new(ws.path(), IndexingConfig::default(), engine));
        (ws, ContextBundler::new(RetrievalService::new(indexer)))
    }

    #[tokio::test]
    async fn bundle_respects_budget() {
        let big_body: String = (0..400)
            .map(|i| format!("let alpha_filler_{i} = {i};\n"))
            .collect();
        let (_ws, bundler) = bundler_with(&[
            ("src/a.rs", &format!("fn alpha() {{}}\n{big_body}")),
            ("src/b.rs", &format!("fn alpha_two() {{}}\n{big_body}")),
        ])
        .await;

        let opts = BundleOptions {
            token_budget: 300,
            ..Default::default()
        };
        let bundle = bundler.build("alpha", opts, &[]).await.unwrap();
        assert!(bundle.metadata.total_tokens <= bundle.metadata.token_budget);
        assert!(!bundle.files.is_empty());
    }

    #[tokio::test]
    async fn truncation_flag_set_only_on_budget_cut() {
        let (_ws, bundler) = bundler_with(&[("src/a.rs", "fn alpha() {}\n")]).await;
        let bundle = bundler
            .build("alpha", BundleOptions::default(), &[])
            .await
            .unwrap();
        assert!(!bundle.metadata.truncated);
        assert!(bundle.metadata.total_tokens <= bundle.metadata.token_budget);
    }

    #[tokio::test]
    async fn min_relevance_filters_results() {
        let (_ws, bundler) = bundler_with(&[
            ("src/a.rs", "fn alpha() {}\n"),
            ("src/b.rs", "fn alpha_helper() {}\n"),
            ("src/c.rs", "fn alpha_other() {}\n"),
        ])
        .await;
        let opts = BundleOptions {
            min_relevance: 0.99,
            ..Default::default()
        };
        let bundle = bundler.build("alpha", opts, &[]).await.unwrap();
        assert!(bundle.files.len() <= 1);
    }

    #[tokio::test]
    async fn hints_include_coverage_and_types() {
        let (_ws, bundler) = bundler_with(&[("src/a.rs", "fn alpha() {}\n")]).await;
        let bundle = bundler
            .build("alpha", BundleOptions::default(), &[])
            .await
            .unwrap();
        assert!(bundle.hints.iter().any(|h| h.contains("matched files")));
        assert!(bundle.hints.iter().any(|h| h.starts_with("file types:")));
    }

    #[tokio::test]
    async fn extra_hints_are_appended() {
        let (_ws, bundler) = bundler_with(&[("src/a.rs", "fn alpha() {}\n")]).await;
        let bundle = bundler
            .build(
                "alpha",
                BundleOptions::default(),
                &["memory: prefers tabs".to_string()],
            )
            .await
            .unwrap();
        assert!(bundle.hints.iter().any(|h| h == "memory: prefers tabs"));
    }

    #[test]
    fn join_relative_handles_dots() {
        assert_eq!(join_relative("src/app", "./util"), Some("src/app/util".into()));
        assert_eq!(join_relative("src/app", "../lib/x"), Some("src/lib/x".into()));
        assert_eq!(join_relative("", "../escape"), None);
    }
}
