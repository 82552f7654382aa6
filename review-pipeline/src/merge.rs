//! Finding merger and verdict.
//!
//! Dedup key is the stable finding id (file + line range + normalized rule).
//! On collision the highest severity wins and confidences sum, capped at
//! 1.0. Ordering is deterministic; advisory findings never fail a run.

use std::collections::HashMap;

use tracing::debug;

use crate::types::{Finding, ReviewOptions};

/// Merge, filter, and cap findings from all sources.
pub fn merge_findings(all: Vec<Finding>, opts: &ReviewOptions) -> Vec<Finding> {
    let mut by_id: HashMap<String, Finding> = HashMap::new();
    for finding in all {
        match by_id.get_mut(&finding.id) {
            None => {
                by_id.insert(finding.id.clone(), finding);
            }
            Some(existing) => {
                existing.confidence = (existing.confidence + finding.confidence).min(1.0);
                if finding.severity > existing.severity {
                    existing.severity = finding.severity;
                    existing.priority = finding.severity.into();
                }
                // Advisory only if every colliding source said advisory.
                existing.advisory = existing.advisory && finding.advisory;
                if existing.suggestion.is_none() {
                    existing.suggestion = finding.suggestion;
                }
            }
        }
    }

    let mut merged: Vec<Finding> = by_id
        .into_values()
        .filter(|f| f.confidence >= opts.confidence_threshold)
        .collect();

    merged.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then(b.confidence.total_cmp(&a.confidence))
            .then(a.line_start.cmp(&b.line_start))
            .then(a.source.rank().cmp(&b.source.rank()))
            .then(a.id.cmp(&b.id))
    });
    if merged.len() > opts.max_findings {
        debug!(
            dropped = merged.len() - opts.max_findings,
            "finding cap applied"
        );
        merged.truncate(opts.max_findings);
    }
    merged
}

pub struct Verdict {
    pub should_fail: bool,
    pub fail_reasons: Vec<String>,
}

/// Deterministic gate over merged findings.
///
/// A finding fails the run when it is not advisory, not allowlisted, and
/// either its severity reaches `fail_on_severity` or its rule id is in
/// `fail_on_invariant_ids`.
pub fn compute_verdict(findings: &[Finding], opts: &ReviewOptions) -> Verdict {
    let mut fail_reasons = Vec::new();
    for f in findings {
        if f.advisory {
            continue;
        }
        if opts.allowlist_finding_ids.contains(&f.id)
            || opts.allowlist_finding_ids.contains(&f.rule_id)
        {
            continue;
        }
        let severity_gate = f.severity >= opts.fail_on_severity;
        let invariant_gate = opts.fail_on_invariant_ids.contains(&f.rule_id);
        if severity_gate || invariant_gate {
            fail_reasons.push(format!(
                "{} {} at {}:{} — {} [{}]",
                f.severity, f.rule_id, f.file_path, f.line_start, f.title, f.id
            ));
        }
    }
    Verdict {
        should_fail: !fail_reasons.is_empty(),
        fail_reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FindingSource, Severity};

    fn finding(rule: &str, file: &str, line: usize, sev: Severity, conf: f32) -> Finding {
        Finding::new(
            rule,
            "test",
            sev,
            conf,
            file,
            line,
            line,
            format!("{rule} title"),
            "desc",
            FindingSource::Preflight,
        )
    }

    fn opts() -> ReviewOptions {
        ReviewOptions::default()
    }

    #[test]
    fn dedup_is_idempotent_and_sums_confidence() {
        let f = finding("R1", "a.rs", 3, Severity::Medium, 0.6);
        let merged = merge_findings(vec![f.clone(), f.clone()], &opts());
        assert_eq!(merged.len(), 1);
        assert!((merged[0].confidence - 1.0).abs() < 1e-6 || merged[0].confidence <= 1.0);

        let again = merge_findings(merged.clone(), &opts());
        assert_eq!(again.len(), merged.len());
    }

    #[test]
    fn collision_keeps_highest_severity() {
        let mut low = finding("R1", "a.rs", 3, Severity::Low, 0.5);
        low.source = FindingSource::LlmStructural;
        let high = finding("R1", "a.rs", 3, Severity::High, 0.5);
        let merged = merge_findings(vec![low, high], &opts());
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].severity, Severity::High);
    }

    #[test]
    fn confidence_threshold_filters() {
        let weak = finding("R1", "a.rs", 1, Severity::High, 0.2);
        let strong = finding("R2", "a.rs", 2, Severity::Low, 0.9);
        let merged = merge_findings(vec![weak, strong], &opts());
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].rule_id, "R2");
        assert!(merged.iter().all(|f| f.confidence >= 0.55));
    }

    #[test]
    fn ordering_is_severity_then_confidence_then_line() {
        let a = finding("A", "a.rs", 9, Severity::High, 0.8);
        let b = finding("B", "a.rs", 1, Severity::Critical, 0.6);
        let c = finding("C", "a.rs", 5, Severity::High, 0.9);
        let merged = merge_findings(vec![a, b, c], &opts());
        let rules: Vec<&str> = merged.iter().map(|f| f.rule_id.as_str()).collect();
        assert_eq!(rules, vec!["B", "C", "A"]);
    }

    #[test]
    fn verdict_monotone_in_threshold() {
        let findings = vec![finding("R1", "a.rs", 1, Severity::High, 0.9)];

        let strict = ReviewOptions {
            fail_on_severity: Severity::Critical,
            ..opts()
        };
        assert!(!compute_verdict(&findings, &strict).should_fail);

        let lower = ReviewOptions {
            fail_on_severity: Severity::High,
            ..opts()
        };
        let verdict = compute_verdict(&findings, &lower);
        assert!(verdict.should_fail);
        assert_eq!(verdict.fail_reasons.len(), 1);
    }

    #[test]
    fn invariant_ids_and_allowlist_interact() {
        let findings = vec![finding("SEC-001", "a.rs", 1, Severity::Medium, 0.9)];

        let by_id = ReviewOptions {
            fail_on_invariant_ids: vec!["SEC-001".into()],
            ..opts()
        };
        assert!(compute_verdict(&findings, &by_id).should_fail);

        let allowlisted = ReviewOptions {
            fail_on_invariant_ids: vec!["SEC-001".into()],
            allowlist_finding_ids: vec!["SEC-001".into()],
            ..opts()
        };
        assert!(!compute_verdict(&findings, &allowlisted).should_fail);
    }

    #[test]
    fn advisory_findings_never_fail() {
        let mut f = finding("STYLE-1", "a.rs", 1, Severity::Critical, 0.9);
        f.advisory = true;
        assert!(!compute_verdict(&[f], &opts()).should_fail);
    }
}
