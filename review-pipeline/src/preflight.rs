//! Deterministic risk preflight. Always executed, no LLM.
//!
//! Risk score 1..5 from lines touched, critical-path hotspot matches, and
//! high-risk patterns in added lines; classification maps from the score.

use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use tracing::debug;

use crate::parser::FileDiff;
use crate::types::{Classification, Finding, FindingSource, Hotspot, Severity};

/// Glob list marking critical-path files.
pub const DEFAULT_HOTSPOT_GLOBS: &[&str] = &[
    "**/auth/**",
    "**/security/**",
    "**/crypto/**",
    "**/*password*",
    "**/*secret*",
    "**/payment/**",
    "**/billing/**",
    "**/migrations/**",
    "**/api/**",
];

/// `(rule id, pattern, severity, title)` scanned against added lines.
const HIGH_RISK_PATTERNS: &[(&str, &str, Severity, &str)] = &[
    ("PRE-EVAL", r"\beval\s*\(", Severity::High, "dynamic code evaluation"),
    ("PRE-EXEC", r"\bexec\s*\(", Severity::High, "dynamic process execution"),
    (
        "PRE-SECRET",
        r#"(?i)(password|secret|api_key|token)\s*[:=]\s*["'][^"']+["']"#,
        Severity::High,
        "hardcoded credential",
    ),
    (
        "PRE-WEAK-HASH",
        r"\b(md5|sha1)\s*\(",
        Severity::Medium,
        "weak hash function",
    ),
    (
        "PRE-SQL",
        r"(?i)\b(drop\s+table|truncate\s+table)\b",
        Severity::High,
        "destructive SQL statement",
    ),
    (
        "PRE-INSECURE-URL",
        r"\bhttp://",
        Severity::Low,
        "insecure http url",
    ),
];

pub struct PreflightReport {
    pub risk_score: u8,
    pub classification: Classification,
    pub hotspots: Vec<Hotspot>,
    pub findings: Vec<Finding>,
    pub lines_added: usize,
    pub lines_removed: usize,
    /// Distinct deterministic check families that ran.
    pub checks_executed: usize,
}

fn hotspot_set(globs: &[&str]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for g in globs {
        if let Ok(glob) = Glob::new(g) {
            builder.add(glob);
        }
    }
    builder.build().unwrap_or_else(|_| GlobSet::empty())
}

/// Run the preflight over parsed file diffs.
pub fn preflight(files: &[FileDiff]) -> PreflightReport {
    let hotspot_globs = hotspot_set(DEFAULT_HOTSPOT_GLOBS);
    let patterns: Vec<(&str, Regex, Severity, &str)> = HIGH_RISK_PATTERNS
        .iter()
        .filter_map(|(id, pat, sev, title)| {
            Regex::new(pat).ok().map(|re| (*id, re, *sev, *title))
        })
        .collect();

    let lines_added: usize = files.iter().map(FileDiff::added_count).sum();
    let lines_removed: usize = files.iter().map(FileDiff::removed_count).sum();
    let touched = lines_added + lines_removed;

    let mut hotspots = Vec::new();
    for file in files {
        if hotspot_globs.is_match(&file.path) {
            hotspots.push(Hotspot {
                file: file.path.clone(),
                reason: "critical-path location".to_string(),
            });
        }
    }

    let mut findings = Vec::new();
    for file in files {
        for (line, content) in file.added_lines() {
            for (id, re, severity, title) in &patterns {
                if *id == "PRE-INSECURE-URL"
                    && (content.contains("localhost") || content.contains("127.0.0.1"))
                {
                    continue;
                }
                if re.is_match(content) {
                    let mut f = Finding::new(
                        *id,
                        "preflight",
                        *severity,
                        0.7,
                        &file.path,
                        line,
                        line,
                        *title,
                        format!("added line matches high-risk pattern `{id}`"),
                        FindingSource::Preflight,
                    );
                    f.code_snippet = Some(content.trim().to_string());
                    findings.push(f);
                }
            }
        }
    }

    let mut score: u8 = 1;
    if touched > 100 {
        score += 1;
    }
    if touched > 500 {
        score += 1;
    }
    if !hotspots.is_empty() {
        score += 1;
    }
    if findings
        .iter()
        .any(|f| f.severity >= Severity::High)
    {
        score += 1;
    }
    let risk_score = score.clamp(1, 5);

    debug!(
        files = files.len(),
        lines_added,
        lines_removed,
        hotspots = hotspots.len(),
        pattern_hits = findings.len(),
        risk_score,
        "preflight complete"
    );

    PreflightReport {
        risk_score,
        classification: Classification::from_risk(risk_score),
        hotspots,
        findings,
        lines_added,
        lines_removed,
        // Size, hotspot, and pattern families always run.
        checks_executed: 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_unified_diff;

    fn diff_for(path: &str, added: &[&str]) -> Vec<FileDiff> {
        let body: String = added.iter().map(|l| format!("+{l}\n")).collect();
        parse_unified_diff(&format!(
            "--- a/{path}\n+++ b/{path}\n@@ -1,0 +1,{} @@\n{body}",
            added.len()
        ))
    }

    #[test]
    fn small_clean_diff_is_trivial() {
        let files = diff_for("src/util.rs", &["let x = 1;"]);
        let report = preflight(&files);
        assert_eq!(report.risk_score, 1);
        assert_eq!(report.classification, Classification::Trivial);
        assert!(report.hotspots.is_empty());
    }

    #[test]
    fn hotspot_path_raises_risk() {
        let files = diff_for("src/auth/login.ts", &["let x = 1;"]);
        let report = preflight(&files);
        assert_eq!(report.hotspots.len(), 1);
        assert!(report.risk_score >= 2);
    }

    #[test]
    fn hardcoded_secret_produces_finding() {
        let files = diff_for("src/api/auth.ts", &[r#"const secret = "my-super-secret-key-12345";"#]);
        let report = preflight(&files);
        let hit = report
            .findings
            .iter()
            .find(|f| f.rule_id == "PRE-SECRET")
            .expect("secret pattern finding");
        assert_eq!(hit.severity, Severity::High);
        assert_eq!(hit.line_start, 1);
        assert!(report.risk_score >= 3);
    }

    #[test]
    fn large_diffs_raise_risk() {
        let lines: Vec<String> = (0..600).map(|i| format!("let v{i} = {i};")).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let files = diff_for("src/big.rs", &refs);
        let report = preflight(&files);
        assert!(report.risk_score >= 3);
    }
}
