//! Findings, verdicts, and review options.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Normalized severity, ordered so `Critical` compares greatest.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CRITICAL" => Some(Self::Critical),
            "HIGH" | "ERROR" => Some(Self::High),
            "MEDIUM" | "WARNING" | "WARN" => Some(Self::Medium),
            "LOW" => Some(Self::Low),
            "INFO" | "NOTE" | "HINT" => Some(Self::Info),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
            Self::Info => "INFO",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FindingPriority {
    P0,
    P1,
    P2,
    P3,
}

impl From<Severity> for FindingPriority {
    fn from(s: Severity) -> Self {
        match s {
            Severity::Critical => Self::P0,
            Severity::High => Self::P1,
            Severity::Medium => Self::P2,
            Severity::Low | Severity::Info => Self::P3,
        }
    }
}

/// Where a finding came from; serialized as `preflight`, `invariant`,
/// `static:<analyzer>`, `llm:structural`, `llm:detailed`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FindingSource {
    Preflight,
    Invariant,
    Static(String),
    LlmStructural,
    LlmDetailed,
}

impl FindingSource {
    /// Merge determinism: lower ranks win ordering ties.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Preflight => 0,
            Self::Invariant => 1,
            Self::Static(_) => 2,
            Self::LlmStructural => 3,
            Self::LlmDetailed => 4,
        }
    }
}

impl fmt::Display for FindingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preflight => f.write_str("preflight"),
            Self::Invariant => f.write_str("invariant"),
            Self::Static(name) => write!(f, "static:{name}"),
            Self::LlmStructural => f.write_str("llm:structural"),
            Self::LlmDetailed => f.write_str("llm:detailed"),
        }
    }
}

impl Serialize for FindingSource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FindingSource {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "preflight" => Self::Preflight,
            "invariant" => Self::Invariant,
            "llm:structural" => Self::LlmStructural,
            "llm:detailed" => Self::LlmDetailed,
            other => match other.strip_prefix("static:") {
                Some(name) => Self::Static(name.to_string()),
                None => Self::Static(other.to_string()),
            },
        })
    }
}

/// One reviewable issue.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Finding {
    /// Stable hash of `(file, line_range, rule)`.
    pub id: String,
    /// Rule identifier behind the hash (invariant id, analyzer rule, …).
    pub rule_id: String,
    pub category: String,
    pub severity: Severity,
    pub priority: FindingPriority,
    pub confidence: f32,
    pub file_path: String,
    pub line_start: usize,
    pub line_end: usize,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_snippet: Option<String>,
    pub source: FindingSource,
    /// True for `warn`-action invariants; never contributes to the verdict.
    #[serde(default)]
    pub advisory: bool,
}

impl Finding {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rule_id: impl Into<String>,
        category: impl Into<String>,
        severity: Severity,
        confidence: f32,
        file_path: impl Into<String>,
        line_start: usize,
        line_end: usize,
        title: impl Into<String>,
        description: impl Into<String>,
        source: FindingSource,
    ) -> Self {
        let rule_id = rule_id.into();
        let file_path = file_path.into();
        let id = stable_finding_id(&file_path, line_start, line_end, &rule_id);
        Self {
            id,
            rule_id,
            category: category.into(),
            severity,
            priority: severity.into(),
            confidence: confidence.clamp(0.0, 1.0),
            file_path,
            line_start,
            line_end,
            title: title.into(),
            description: description.into(),
            suggestion: None,
            code_snippet: None,
            source,
            advisory: false,
        }
    }
}

/// Stable id: 16 hex chars of sha256 over the dedup key.
pub fn stable_finding_id(file: &str, start: usize, end: usize, rule: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file.as_bytes());
    hasher.update([0]);
    hasher.update(start.to_le_bytes());
    hasher.update(end.to_le_bytes());
    hasher.update(rule.to_lowercase().as_bytes());
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Trivial,
    Routine,
    Risky,
    Critical,
}

impl Classification {
    pub fn from_risk(score: u8) -> Self {
        match score {
            0 | 1 => Self::Trivial,
            2 => Self::Routine,
            3 | 4 => Self::Risky,
            _ => Self::Critical,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Hotspot {
    pub file: String,
    pub reason: String,
}

/// Knobs for one review run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReviewOptions {
    #[serde(default = "default_true")]
    pub changed_lines_only: bool,
    /// LLM passes are opt-in.
    #[serde(default)]
    pub llm_enabled: bool,
    #[serde(default)]
    pub llm_force: bool,
    #[serde(default = "default_true")]
    pub two_pass: bool,
    #[serde(default = "default_risk_threshold")]
    pub risk_threshold: u8,
    #[serde(default = "default_max_context_files")]
    pub max_context_files: usize,
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_max_findings")]
    pub max_findings: usize,
    #[serde(default = "default_fail_on_severity")]
    pub fail_on_severity: Severity,
    #[serde(default)]
    pub fail_on_invariant_ids: Vec<String>,
    #[serde(default)]
    pub allowlist_finding_ids: Vec<String>,
    #[serde(default = "default_true")]
    pub static_analysis: bool,
    #[serde(default = "default_analyzer_timeout")]
    pub analyzer_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_risk_threshold() -> u8 {
    3
}
fn default_max_context_files() -> usize {
    5
}
fn default_token_budget() -> usize {
    8_000
}
fn default_confidence_threshold() -> f32 {
    0.55
}
fn default_max_findings() -> usize {
    20
}
fn default_fail_on_severity() -> Severity {
    Severity::Critical
}
fn default_analyzer_timeout() -> u64 {
    60
}

impl Default for ReviewOptions {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults deserialize")
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReviewStats {
    pub files_changed: usize,
    pub lines_added: usize,
    pub lines_removed: usize,
    pub duration_ms: u64,
    pub deterministic_checks_executed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invariants_executed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_analyzers_executed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_passes_executed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_findings_added: Option<usize>,
    pub timings_ms: BTreeMap<String, u64>,
}

/// Complete result of one review run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReviewResult {
    pub run_id: String,
    pub risk_score: u8,
    pub classification: Classification,
    pub hotspots: Vec<Hotspot>,
    pub summary: String,
    pub findings: Vec<Finding>,
    pub should_fail: bool,
    pub fail_reasons: Vec<String>,
    pub stats: ReviewStats,
    pub metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Low > Severity::Info);
    }

    #[test]
    fn source_round_trips_through_serde() {
        for src in [
            FindingSource::Preflight,
            FindingSource::Invariant,
            FindingSource::Static("tsc".into()),
            FindingSource::LlmStructural,
            FindingSource::LlmDetailed,
        ] {
            let json = serde_json::to_string(&src).unwrap();
            let back: FindingSource = serde_json::from_str(&json).unwrap();
            assert_eq!(src, back);
        }
    }

    #[test]
    fn stable_id_depends_on_inputs() {
        let a = stable_finding_id("a.rs", 1, 2, "SEC-1");
        assert_eq!(a, stable_finding_id("a.rs", 1, 2, "sec-1"), "rule id case-folded");
        assert_ne!(a, stable_finding_id("a.rs", 1, 3, "SEC-1"));
        assert_ne!(a, stable_finding_id("b.rs", 1, 2, "SEC-1"));
    }

    #[test]
    fn classification_mapping() {
        assert_eq!(Classification::from_risk(1), Classification::Trivial);
        assert_eq!(Classification::from_risk(2), Classification::Routine);
        assert_eq!(Classification::from_risk(4), Classification::Risky);
        assert_eq!(Classification::from_risk(5), Classification::Critical);
    }
}
