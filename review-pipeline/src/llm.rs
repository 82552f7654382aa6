//! LLM review orchestrator: two-pass (structural, then detailed), gated by
//! risk threshold upstream. Model output is parsed from strict field blocks
//! and validated; malformed blocks are dropped, never guessed at.

use std::sync::OnceLock;
use std::time::Instant;

use regex::Regex;
use tracing::{debug, info};

use retrieval::{RetrievalService, estimate_tokens};

use crate::errors::ReviewError;
use crate::parser::FileDiff;
use crate::types::{Finding, FindingSource, ReviewOptions, Severity};

pub struct LlmReviewOutcome {
    pub findings: Vec<Finding>,
    pub structural_ms: u64,
    pub detailed_ms: Option<u64>,
    pub passes: usize,
}

const STRUCTURAL_PROMPT: &str = "Review this diff for defects. Report each finding as a block:\n\
FILE: <path>\nLINES: <start>-<end>\nSEVERITY: CRITICAL|HIGH|MEDIUM|LOW|INFO\n\
CATEGORY: <one word>\nCONFIDENCE: <0..1>\nTITLE: <one line>\nBODY: <why it is a defect>\n\
SUGGESTION: <optional fix>\n\nFocus on structure: wrong wiring, missing error paths, \
API misuse. Only report findings on changed lines. No prose outside blocks.";

const DETAILED_PROMPT: &str = "Deep-dive the diff using the seed findings below. Confirm, refute, \
or refine them, and look for adjacent defects the structural pass missed. Same block format. \
No prose outside blocks.\n\nSeed findings:\n";

/// Run the opt-in LLM passes. The caller has already applied the risk gate.
pub async fn run_llm_review(
    retrieval: &RetrievalService,
    diff_text: &str,
    files: &[FileDiff],
    opts: &ReviewOptions,
) -> Result<LlmReviewOutcome, ReviewError> {
    let context = build_context(retrieval, diff_text, files, opts).await;

    let t0 = Instant::now();
    let structural_raw = retrieval.search_and_ask(&context, STRUCTURAL_PROMPT).await?;
    let structural_ms = t0.elapsed().as_millis() as u64;
    let mut findings = parse_llm_findings(&structural_raw, FindingSource::LlmStructural);
    debug!(findings = findings.len(), structural_ms, "llm structural pass done");

    let mut detailed_ms = None;
    let mut passes = 1;
    if opts.two_pass {
        let seeds = findings
            .iter()
            .map(|f| format!("- {} at {}:{} ({})", f.title, f.file_path, f.line_start, f.severity))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!("{DETAILED_PROMPT}{seeds}");

        let t1 = Instant::now();
        let detailed_raw = retrieval.search_and_ask(&context, &prompt).await?;
        detailed_ms = Some(t1.elapsed().as_millis() as u64);
        passes = 2;
        let detailed = parse_llm_findings(&detailed_raw, FindingSource::LlmDetailed);
        debug!(findings = detailed.len(), "llm detailed pass done");
        findings.extend(detailed);
    }

    info!(total = findings.len(), passes, "llm review complete");
    Ok(LlmReviewOutcome {
        findings,
        structural_ms,
        detailed_ms,
        passes,
    })
}

/// Diff plus small per-file context for the top changed files, kept under
/// the token budget with half reserved for the diff itself.
async fn build_context(
    retrieval: &RetrievalService,
    diff_text: &str,
    files: &[FileDiff],
    opts: &ReviewOptions,
) -> String {
    let budget = opts.token_budget.max(500);
    let diff_budget_chars = budget / 2 * 4;
    let mut context = String::from("Diff under review:\n");
    if diff_text.len() > diff_budget_chars {
        let mut cut = diff_budget_chars.min(diff_text.len());
        while cut > 0 && !diff_text.is_char_boundary(cut) {
            cut -= 1;
        }
        context.push_str(&diff_text[..cut]);
        context.push_str("\n… (diff truncated)\n");
    } else {
        context.push_str(diff_text);
    }

    let mut remaining = budget.saturating_sub(estimate_tokens(&context));
    for file in files.iter().take(opts.max_context_files) {
        if remaining < 200 {
            break;
        }
        let Ok(content) = retrieval.get_file(&file.path, None).await else {
            continue;
        };
        let head: String = content.lines().take(80).collect::<Vec<_>>().join("\n");
        let cost = estimate_tokens(&head) + 16;
        if cost > remaining {
            continue;
        }
        remaining -= cost;
        context.push_str(&format!("\nCurrent contents of {} (head):\n{head}\n", file.path));
    }
    context
}

fn field_re(name: &str) -> Regex {
    Regex::new(&format!(r"(?mi)^{name}:\s*(.+)$")).expect("valid regex")
}

fn think_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"))
}

/// Parse model output into findings. Invalid blocks are dropped.
pub fn parse_llm_findings(raw: &str, source: FindingSource) -> Vec<Finding> {
    let cleaned = think_re().replace_all(raw, "");
    let mut out = Vec::new();

    for block in split_blocks(&cleaned) {
        let Some(file) = capture(&block, "FILE") else {
            continue;
        };
        let Some(title) = capture(&block, "TITLE") else {
            continue;
        };
        let body = capture(&block, "BODY").unwrap_or_else(|| title.clone());

        let (line_start, line_end) = capture(&block, "LINES")
            .and_then(|s| parse_lines(&s))
            .unwrap_or((1, 1));
        let severity = capture(&block, "SEVERITY")
            .and_then(|s| Severity::parse(&s))
            .unwrap_or(Severity::Medium);
        let category = capture(&block, "CATEGORY").unwrap_or_else(|| "review".into());
        let confidence = capture(&block, "CONFIDENCE")
            .and_then(|s| s.parse::<f32>().ok())
            .unwrap_or(0.6);

        let mut finding = Finding::new(
            format!("llm:{}", slug(&title)),
            category,
            severity,
            confidence,
            file,
            line_start,
            line_end,
            title,
            body,
            source.clone(),
        );
        finding.suggestion = capture(&block, "SUGGESTION");
        out.push(finding);
    }
    out
}

fn split_blocks(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    for line in s.lines() {
        if line.trim_start().starts_with("FILE:") && !cur.trim().is_empty() {
            out.push(std::mem::take(&mut cur));
        }
        cur.push_str(line);
        cur.push('\n');
    }
    if !cur.trim().is_empty() {
        out.push(cur);
    }
    out
}

fn capture(block: &str, name: &str) -> Option<String> {
    field_re(name)
        .captures(block)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_lines(s: &str) -> Option<(usize, usize)> {
    match s.split_once('-') {
        Some((a, b)) => {
            let start = a.trim().parse().ok()?;
            let end = b.trim().parse().ok()?;
            (start > 0 && end >= start).then_some((start, end))
        }
        None => {
            let line = s.trim().parse().ok()?;
            (line > 0).then_some((line, line))
        }
    }
}

fn slug(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .take(6)
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "<think>musing about the diff</think>\n\
FILE: src/auth.ts\nLINES: 10-12\nSEVERITY: HIGH\nCATEGORY: security\nCONFIDENCE: 0.85\n\
TITLE: Token logged in plaintext\nBODY: The token ends up in logs.\nSUGGESTION: Redact it.\n\
\n\
FILE: src/db.ts\nLINES: 4\nTITLE: Missing await\nBODY: Promise discarded.\n\
\n\
LINES: 1-2\nTITLE: no file, dropped\n";

    #[test]
    fn parses_valid_blocks_and_drops_invalid() {
        let findings = parse_llm_findings(RAW, FindingSource::LlmStructural);
        assert_eq!(findings.len(), 2);

        assert_eq!(findings[0].file_path, "src/auth.ts");
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(findings[0].line_start, 10);
        assert_eq!(findings[0].line_end, 12);
        assert!((findings[0].confidence - 0.85).abs() < 1e-6);
        assert_eq!(findings[0].suggestion.as_deref(), Some("Redact it."));

        // Defaults fill the sparse block.
        assert_eq!(findings[1].severity, Severity::Medium);
        assert_eq!(findings[1].line_start, 4);
    }

    #[test]
    fn think_sections_are_stripped() {
        let raw = "<think>FILE: fake.ts\nTITLE: not real</think>\nFILE: real.ts\nTITLE: Real one\n";
        let findings = parse_llm_findings(raw, FindingSource::LlmDetailed);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].file_path, "real.ts");
    }

    #[test]
    fn slug_is_stable() {
        assert_eq!(slug("Token logged in plaintext!"), "token-logged-in-plaintext");
    }
}
