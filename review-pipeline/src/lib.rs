//! Review pipeline: deterministic preflight → invariants → static analyzers
//! → optional two-pass LLM → merged findings and a gated verdict.
//!
//! 1) **Preflight** — parse the unified diff, compute risk score 1..5,
//!    hotspots, and pattern findings. Always runs, no LLM.
//! 2) **Invariants** — YAML-declared rules evaluated against changed text.
//! 3) **Static analysis** — bounded subprocess adapters, normalized output.
//! 4) **LLM review** — opt-in, gated by `risk_score ≥ risk_threshold`,
//!    structural pass plus an optional detailed pass.
//! 5) **Merge & verdict** — dedup by stable id, severity/confidence policy,
//!    deterministic `should_fail`/`fail_reasons`.
//!
//! Per-stage timings land in `stats.timings_ms`; per-item failures are
//! collected as warnings in `metadata`, never raised.

pub mod analyzers;
pub mod errors;
pub mod gitio;
pub mod invariants;
pub mod llm;
pub mod merge;
pub mod parser;
pub mod preflight;
pub mod render;
pub mod types;

use std::time::Instant;

use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use retrieval::RetrievalService;

pub use analyzers::{AnalyzerOptions, AnalyzerOutcome, StaticAnalyzer, default_analyzers};
pub use errors::ReviewError;
pub use gitio::{capture_git_diff, capture_ref_range};
pub use invariants::{INVARIANTS_FILE, InvariantsEngine, InvariantsReport};
pub use merge::{Verdict, compute_verdict, merge_findings};
pub use parser::{DiffHunk, DiffLine, FileDiff, parse_unified_diff};
pub use preflight::{PreflightReport, preflight};
pub use render::{to_markdown, to_sarif};
pub use types::{
    Classification, Finding, FindingPriority, FindingSource, Hotspot, ReviewOptions, ReviewResult,
    ReviewStats, Severity, stable_finding_id,
};

/// Runs the full pipeline for one workspace.
pub struct ReviewRunner {
    retrieval: RetrievalService,
}

impl ReviewRunner {
    pub fn new(retrieval: RetrievalService) -> Self {
        Self { retrieval }
    }

    pub fn retrieval(&self) -> &RetrievalService {
        &self.retrieval
    }

    /// Review a unified diff supplied by the caller.
    pub async fn review_diff(
        &self,
        diff_text: &str,
        opts: &ReviewOptions,
    ) -> Result<ReviewResult, ReviewError> {
        let run_id = Uuid::new_v4().to_string();
        let t0 = Instant::now();
        let mut stats = ReviewStats::default();
        let mut warnings: Vec<String> = Vec::new();
        let mut all_findings: Vec<Finding> = Vec::new();

        // ---------------------------
        // Stage 1: parse + preflight
        // ---------------------------
        let t_parse = Instant::now();
        let files = parse_unified_diff(diff_text);
        stats
            .timings_ms
            .insert("diff_parse".into(), t_parse.elapsed().as_millis() as u64);

        let t_pre = Instant::now();
        let pre = preflight(&files);
        stats
            .timings_ms
            .insert("preflight".into(), t_pre.elapsed().as_millis() as u64);
        stats.files_changed = files.len();
        stats.lines_added = pre.lines_added;
        stats.lines_removed = pre.lines_removed;
        stats.deterministic_checks_executed = pre.checks_executed;
        debug!(run_id, risk = pre.risk_score, files = files.len(), "preflight done");
        all_findings.extend(pre.findings.iter().cloned());

        // ---------------------------
        // Stage 2: invariants
        // ---------------------------
        let t_inv = Instant::now();
        let engine = InvariantsEngine::load(self.retrieval.indexer().workspace_root())?;
        if !engine.is_empty() {
            let report = engine.evaluate(&files, opts.changed_lines_only);
            stats.invariants_executed = Some(report.executed);
            warnings.extend(report.warnings);
            all_findings.extend(report.findings);
        }
        stats
            .timings_ms
            .insert("invariants".into(), t_inv.elapsed().as_millis() as u64);

        // ---------------------------
        // Stage 3: static analyzers
        // ---------------------------
        if opts.static_analysis {
            let t_static = Instant::now();
            let root = self.retrieval.indexer().workspace_root().to_path_buf();
            let changed: Vec<String> = files
                .iter()
                .filter(|f| !f.is_deleted && !f.is_binary)
                .map(|f| f.path.clone())
                .collect();
            let analyzer_opts = AnalyzerOptions {
                timeout_secs: opts.analyzer_timeout_secs,
                ..Default::default()
            };
            let mut executed = 0usize;
            for analyzer in default_analyzers(&root) {
                let outcome = analyzer.run(&root, &changed, &analyzer_opts).await;
                executed += 1;
                warnings.extend(outcome.warnings);
                all_findings.extend(outcome.findings);
            }
            stats.static_analyzers_executed = Some(executed);
            stats
                .timings_ms
                .insert("static".into(), t_static.elapsed().as_millis() as u64);
        }

        // ---------------------------
        // Stage 4: LLM (gated)
        // ---------------------------
        if opts.llm_enabled && (pre.risk_score >= opts.risk_threshold || opts.llm_force) {
            match llm::run_llm_review(&self.retrieval, diff_text, &files, opts).await {
                Ok(outcome) => {
                    stats.llm_passes_executed = Some(outcome.passes);
                    stats.llm_findings_added = Some(outcome.findings.len());
                    stats
                        .timings_ms
                        .insert("llm_structural".into(), outcome.structural_ms);
                    if let Some(ms) = outcome.detailed_ms {
                        stats.timings_ms.insert("llm_detailed".into(), ms);
                    }
                    all_findings.extend(outcome.findings);
                }
                Err(e) => {
                    // The deterministic verdict still stands without the LLM.
                    warnings.push(format!("llm review skipped: {e}"));
                }
            }
        }

        // ---------------------------
        // Stage 5: merge + verdict
        // ---------------------------
        let findings = merge_findings(all_findings, opts);
        let verdict = compute_verdict(&findings, opts);
        stats.duration_ms = t0.elapsed().as_millis() as u64;

        let blocking = verdict.fail_reasons.len();
        let summary = format!(
            "{} finding(s) ({blocking} blocking) across {} changed file(s); risk {}/5",
            findings.len(),
            stats.files_changed,
            pre.risk_score
        );
        info!(
            run_id,
            findings = findings.len(),
            should_fail = verdict.should_fail,
            duration_ms = stats.duration_ms,
            "review complete"
        );

        Ok(ReviewResult {
            run_id,
            risk_score: pre.risk_score,
            classification: pre.classification,
            hotspots: pre.hotspots,
            summary,
            findings,
            should_fail: verdict.should_fail,
            fail_reasons: verdict.fail_reasons,
            stats,
            metadata: json!({
                "workspace": self.retrieval.indexer().status().workspace,
                "warnings": warnings,
            }),
        })
    }

    /// Capture a local `git diff` and review it.
    pub async fn review_git(
        &self,
        base_ref: Option<&str>,
        opts: &ReviewOptions,
    ) -> Result<ReviewResult, ReviewError> {
        let root = self.retrieval.indexer().workspace_root().to_path_buf();
        let diff = gitio::capture_git_diff(&root, base_ref).await?;
        self.review_diff(&diff, opts).await
    }

    /// Invariants only, for the `check_invariants` tool.
    pub fn check_invariants(
        &self,
        diff_text: &str,
        changed_lines_only: bool,
    ) -> Result<InvariantsReport, ReviewError> {
        let files = parse_unified_diff(diff_text);
        let engine = InvariantsEngine::load(self.retrieval.indexer().workspace_root())?;
        Ok(engine.evaluate(&files, changed_lines_only))
    }

    /// Static analyzers only, for the `run_static_analysis` tool.
    pub async fn run_static_analysis(
        &self,
        changed_files: &[String],
        timeout_secs: u64,
    ) -> Vec<AnalyzerOutcome> {
        let root = self.retrieval.indexer().workspace_root().to_path_buf();
        let opts = AnalyzerOptions {
            timeout_secs,
            ..Default::default()
        };
        let mut out = Vec::new();
        for analyzer in default_analyzers(&root) {
            out.push(analyzer.run(&root, changed_files, &opts).await);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_client::EngineClient;
    use indexing::{Indexer, IndexingConfig};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn runner(ws: &TempDir) -> ReviewRunner {
        let indexer = Arc::new(Indexer::new(
            ws.path(),
            IndexingConfig::default(),
            EngineClient::fixed(),
        ));
        ReviewRunner::new(RetrievalService::new(indexer))
    }

    const SECRET_DIFF: &str = "\
--- a/src/api/auth.ts
+++ b/src/api/auth.ts
@@ -1,2 +1,3 @@
 import { api } from './api';
+const secret = \"my-super-secret-key-12345\";
 export const login = () => {};
";

    #[tokio::test]
    async fn invariant_gate_fails_review() {
        let ws = TempDir::new().unwrap();
        std::fs::write(
            ws.path().join(INVARIANTS_FILE),
            "security:\n  - id: SEC\n    severity: HIGH\n    action: deny\n    pattern: \"secret\\\\s*=\\\\s*[\\\"'][^\\\"']+[\\\"']\"\n",
        )
        .unwrap();

        let runner = runner(&ws);
        let opts = ReviewOptions {
            fail_on_severity: Severity::High,
            static_analysis: false,
            ..Default::default()
        };
        let result = runner.review_diff(SECRET_DIFF, &opts).await.unwrap();

        assert!(result.findings.iter().any(|f| f.severity >= Severity::High));
        assert!(result.should_fail);
        assert!(!result.fail_reasons.is_empty());
        assert!(result.stats.invariants_executed.is_some());
    }

    #[tokio::test]
    async fn clean_diff_passes() {
        let ws = TempDir::new().unwrap();
        let runner = runner(&ws);
        let diff = "--- a/src/a.rs\n+++ b/src/a.rs\n@@ -1 +1 @@\n-let x = 1;\n+let x = 2;\n";
        let opts = ReviewOptions {
            static_analysis: false,
            ..Default::default()
        };
        let result = runner.review_diff(diff, &opts).await.unwrap();
        assert!(!result.should_fail);
        assert_eq!(result.risk_score, 1);
        assert_eq!(result.stats.files_changed, 1);
        assert!(result.stats.timings_ms.contains_key("preflight"));
    }

    #[tokio::test]
    async fn llm_gate_respects_risk_threshold() {
        let ws = TempDir::new().unwrap();
        let runner = runner(&ws);
        if let EngineClient::Fixed(f) = runner.retrieval().indexer().engine() {
            f.push_canned_answer("FILE: src/a.rs\nTITLE: Looks off\nBODY: suspicious\n");
            f.push_canned_answer("FILE: src/a.rs\nTITLE: Second pass\nBODY: still odd\n");
        }
        // Trivial diff, risk 1 < threshold 3: no LLM pass.
        let diff = "--- a/src/a.rs\n+++ b/src/a.rs\n@@ -1 +1 @@\n-a\n+b\n";
        let opts = ReviewOptions {
            llm_enabled: true,
            static_analysis: false,
            ..Default::default()
        };
        let result = runner.review_diff(diff, &opts).await.unwrap();
        assert!(result.stats.llm_passes_executed.is_none());

        // Forced: both passes run.
        let forced = ReviewOptions {
            llm_enabled: true,
            llm_force: true,
            static_analysis: false,
            ..Default::default()
        };
        let result = runner.review_diff(diff, &forced).await.unwrap();
        assert_eq!(result.stats.llm_passes_executed, Some(2));
        assert!(result.stats.timings_ms.contains_key("llm_structural"));
    }

    #[tokio::test]
    async fn check_invariants_only_path() {
        let ws = TempDir::new().unwrap();
        std::fs::write(
            ws.path().join(INVARIANTS_FILE),
            "style:\n  - id: T1\n    action: warn\n    pattern: \"TODO\"\n",
        )
        .unwrap();
        let runner = runner(&ws);
        let diff = "--- a/a.rs\n+++ b/a.rs\n@@ -1 +1 @@\n-x\n+// TODO fix\n";
        let report = runner.check_invariants(diff, true).unwrap();
        assert_eq!(report.findings.len(), 1);
        assert!(report.findings[0].advisory);
    }
}
