//! Presentation projections of a review result: Markdown and SARIF.
//! Derived views only; the in-memory result stays authoritative.

use serde_json::json;

use crate::types::{ReviewResult, Severity};

/// Markdown report for chat/PR surfaces.
pub fn to_markdown(result: &ReviewResult) -> String {
    let mut md = String::new();
    md.push_str(&format!(
        "## Review {} — risk {}/5 ({:?})\n\n",
        result.run_id, result.risk_score, result.classification
    ));
    md.push_str(&format!("{}\n\n", result.summary));

    if result.should_fail {
        md.push_str("**Verdict: FAIL**\n\n");
        for reason in &result.fail_reasons {
            md.push_str(&format!("- {reason}\n"));
        }
        md.push('\n');
    } else {
        md.push_str("**Verdict: pass**\n\n");
    }

    if !result.hotspots.is_empty() {
        md.push_str("### Hotspots\n\n");
        for h in &result.hotspots {
            md.push_str(&format!("- `{}` — {}\n", h.file, h.reason));
        }
        md.push('\n');
    }

    if !result.findings.is_empty() {
        md.push_str("### Findings\n\n");
        for f in &result.findings {
            md.push_str(&format!(
                "- **[{}]** `{}:{}` {} — {} _(source: {}, confidence {:.2})_\n",
                f.severity, f.file_path, f.line_start, f.title, f.description, f.source,
                f.confidence
            ));
            if let Some(suggestion) = &f.suggestion {
                md.push_str(&format!("  - suggestion: {suggestion}\n"));
            }
        }
        md.push('\n');
    }

    md.push_str(&format!(
        "_{} files, +{}/−{} lines, {} ms_\n",
        result.stats.files_changed,
        result.stats.lines_added,
        result.stats.lines_removed,
        result.stats.duration_ms
    ));
    md
}

/// SARIF 2.1.0 projection.
pub fn to_sarif(result: &ReviewResult) -> serde_json::Value {
    let results: Vec<serde_json::Value> = result
        .findings
        .iter()
        .map(|f| {
            json!({
                "ruleId": f.rule_id,
                "level": sarif_level(f.severity),
                "message": { "text": format!("{}: {}", f.title, f.description) },
                "partialFingerprints": { "stableId": f.id },
                "properties": {
                    "confidence": f.confidence,
                    "source": f.source.to_string(),
                },
                "locations": [{
                    "physicalLocation": {
                        "artifactLocation": { "uri": f.file_path },
                        "region": {
                            "startLine": f.line_start,
                            "endLine": f.line_end,
                        }
                    }
                }]
            })
        })
        .collect();

    json!({
        "$schema": "https://raw.githubusercontent.com/oasis-tcs/sarif-spec/master/Schemata/sarif-schema-2.1.0.json",
        "version": "2.1.0",
        "runs": [{
            "tool": {
                "driver": {
                    "name": "context-daemon-review",
                    "informationUri": "https://example.invalid/context-daemon",
                    "rules": [],
                }
            },
            "results": results,
            "properties": {
                "runId": result.run_id,
                "riskScore": result.risk_score,
                "shouldFail": result.should_fail,
            }
        }]
    })
}

fn sarif_level(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical | Severity::High => "error",
        Severity::Medium => "warning",
        Severity::Low | Severity::Info => "note",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        Classification, Finding, FindingSource, ReviewStats,
    };

    fn result_with_finding() -> ReviewResult {
        let finding = Finding::new(
            "SEC-001",
            "security",
            Severity::High,
            0.9,
            "src/auth.ts",
            3,
            3,
            "hardcoded secret",
            "a secret literal was added",
            FindingSource::Invariant,
        );
        ReviewResult {
            run_id: "run-1".into(),
            risk_score: 4,
            classification: Classification::Risky,
            hotspots: Vec::new(),
            summary: "1 finding".into(),
            findings: vec![finding],
            should_fail: true,
            fail_reasons: vec!["HIGH SEC-001 at src/auth.ts:3".into()],
            stats: ReviewStats::default(),
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn markdown_contains_verdict_and_finding() {
        let md = to_markdown(&result_with_finding());
        assert!(md.contains("Verdict: FAIL"));
        assert!(md.contains("hardcoded secret"));
        assert!(md.contains("src/auth.ts:3"));
    }

    #[test]
    fn sarif_shape_is_valid() {
        let sarif = to_sarif(&result_with_finding());
        assert_eq!(sarif["version"], "2.1.0");
        let results = sarif["runs"][0]["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["level"], "error");
        assert_eq!(
            results[0]["locations"][0]["physicalLocation"]["region"]["startLine"],
            3
        );
    }
}
