//! Static analyzer adapters.
//!
//! Contract per analyzer: `run(changed_files, opts) → {findings, duration,
//! warnings}` with a bounded timeout and a per-analyzer finding cap.
//! Analyzer failures (missing binary, timeout) are warnings on the outcome,
//! never errors — one broken tool must not sink the review.
//!
//! Built-ins: a type-check adapter driving the workspace's own checker as a
//! subprocess, and a pattern-rule adapter scanning changed files in-process.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::types::{Finding, FindingSource, Severity};

#[derive(Clone, Debug)]
pub struct AnalyzerOptions {
    pub timeout_secs: u64,
    pub max_findings: usize,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            max_findings: 20,
        }
    }
}

#[derive(Debug)]
pub struct AnalyzerOutcome {
    pub name: String,
    pub findings: Vec<Finding>,
    pub duration_ms: u64,
    pub warnings: Vec<String>,
}

/// Enum dispatch over the built-in adapters.
pub enum StaticAnalyzer {
    TypeCheck {
        name: String,
        command: Vec<String>,
    },
    PatternRules,
}

impl StaticAnalyzer {
    pub fn name(&self) -> &str {
        match self {
            Self::TypeCheck { name, .. } => name,
            Self::PatternRules => "pattern-rules",
        }
    }

    pub async fn run(
        &self,
        workspace_root: &Path,
        changed_files: &[String],
        opts: &AnalyzerOptions,
    ) -> AnalyzerOutcome {
        let t0 = Instant::now();
        let mut outcome = match self {
            Self::TypeCheck { name, command } => {
                run_type_check(workspace_root, name, command, opts).await
            }
            Self::PatternRules => run_pattern_rules(workspace_root, changed_files, opts),
        };
        outcome.duration_ms = t0.elapsed().as_millis() as u64;
        debug!(
            analyzer = outcome.name,
            findings = outcome.findings.len(),
            warnings = outcome.warnings.len(),
            duration_ms = outcome.duration_ms,
            "analyzer finished"
        );
        outcome
    }
}

/// Pick analyzers for the workspace: the project's own type checker when one
/// is recognizable, plus the pattern-rule adapter.
pub fn default_analyzers(workspace_root: &Path) -> Vec<StaticAnalyzer> {
    let mut out = Vec::new();
    if workspace_root.join("tsconfig.json").exists() {
        out.push(StaticAnalyzer::TypeCheck {
            name: "tsc".into(),
            command: vec![
                "npx".into(),
                "tsc".into(),
                "--noEmit".into(),
                "--pretty".into(),
                "false".into(),
            ],
        });
    } else if workspace_root.join("Cargo.toml").exists() {
        out.push(StaticAnalyzer::TypeCheck {
            name: "cargo-check".into(),
            command: vec![
                "cargo".into(),
                "check".into(),
                "--message-format=short".into(),
            ],
        });
    }
    out.push(StaticAnalyzer::PatternRules);
    out
}

async fn run_type_check(
    root: &Path,
    name: &str,
    command: &[String],
    opts: &AnalyzerOptions,
) -> AnalyzerOutcome {
    let mut outcome = AnalyzerOutcome {
        name: name.to_string(),
        findings: Vec::new(),
        duration_ms: 0,
        warnings: Vec::new(),
    };
    let Some((program, args)) = command.split_first() else {
        outcome.warnings.push("empty analyzer command".into());
        return outcome;
    };

    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args)
        .current_dir(root)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let result = tokio::time::timeout(Duration::from_secs(opts.timeout_secs), async {
        cmd.output().await
    })
    .await;

    let output = match result {
        Err(_) => {
            outcome
                .warnings
                .push(format!("{name} timed out after {} s", opts.timeout_secs));
            return outcome;
        }
        Ok(Err(e)) => {
            outcome.warnings.push(format!("{name} failed to start: {e}"));
            return outcome;
        }
        Ok(Ok(out)) => out,
    };

    let text = format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    outcome.findings = parse_diagnostics(name, &text, opts.max_findings);
    outcome
}

fn diagnostic_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Matches `path(12,3): message`, `path:12:3: message`, `path:12 message`.
    RE.get_or_init(|| {
        Regex::new(r"^(?P<file>[^\s:(]+)[:(](?P<line>\d+)[,:)]?\d*\)?:?\s*(?P<msg>.+)$")
            .expect("valid regex")
    })
}

/// Normalize checker output into findings, mapping raw severities through
/// the adapter's table.
fn parse_diagnostics(analyzer: &str, text: &str, cap: usize) -> Vec<Finding> {
    let mut out = Vec::new();
    for line in text.lines() {
        if out.len() >= cap {
            warn!(analyzer, cap, "finding cap reached; remaining diagnostics dropped");
            break;
        }
        let Some(caps) = diagnostic_re().captures(line.trim()) else {
            continue;
        };
        let msg = caps.name("msg").map(|m| m.as_str()).unwrap_or_default();
        let severity = map_severity(msg);
        // Pure notes are dropped; the checker's summary lines match the
        // regex but carry no location-worthy diagnostic.
        if !msg.contains("error") && !msg.contains("warning") {
            continue;
        }
        let file = caps.name("file").map(|m| m.as_str()).unwrap_or_default();
        let line_no: usize = caps
            .name("line")
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(1);
        out.push(Finding::new(
            format!("{analyzer}-diagnostic"),
            "static-analysis",
            severity,
            0.9,
            file,
            line_no,
            line_no,
            first_sentence(msg),
            msg,
            FindingSource::Static(analyzer.to_string()),
        ));
    }
    out
}

/// Per-adapter severity table: checker wording → normalized severity.
fn map_severity(message: &str) -> Severity {
    let lower = message.to_lowercase();
    if lower.contains("error") {
        Severity::High
    } else if lower.contains("warning") {
        Severity::Medium
    } else {
        Severity::Info
    }
}

fn first_sentence(msg: &str) -> String {
    let trimmed = msg.trim();
    let end = trimmed.find(['.', ';']).unwrap_or(trimmed.len());
    trimmed[..end.min(100)].to_string()
}

/// `(rule id, pattern, severity, title)` applied to changed file contents.
const PATTERN_RULES: &[(&str, &str, Severity, &str)] = &[
    ("PAT-DEBUGGER", r"^\s*debugger\s*;", Severity::Medium, "debugger statement"),
    ("PAT-CONSOLE", r"console\.(log|debug)\(", Severity::Low, "console logging left in"),
    (
        "PAT-EMPTY-CATCH",
        r"catch\s*(\([^)]*\))?\s*\{\s*\}",
        Severity::Medium,
        "empty catch block",
    ),
    ("PAT-UNWRAP", r"\.unwrap\(\)", Severity::Low, "unwrap on fallible value"),
    ("PAT-FIXME", r"\bFIXME\b", Severity::Info, "unresolved FIXME"),
];

fn run_pattern_rules(
    root: &Path,
    changed_files: &[String],
    opts: &AnalyzerOptions,
) -> AnalyzerOutcome {
    let mut outcome = AnalyzerOutcome {
        name: "pattern-rules".into(),
        findings: Vec::new(),
        duration_ms: 0,
        warnings: Vec::new(),
    };
    let rules: Vec<(&str, Regex, Severity, &str)> = PATTERN_RULES
        .iter()
        .filter_map(|(id, pat, sev, title)| Regex::new(pat).ok().map(|re| (*id, re, *sev, *title)))
        .collect();

    'files: for rel in changed_files {
        let path: PathBuf = root.join(rel);
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        for (idx, line) in content.lines().enumerate() {
            for (id, re, severity, title) in &rules {
                if !re.is_match(line) {
                    continue;
                }
                if outcome.findings.len() >= opts.max_findings {
                    break 'files;
                }
                let mut f = Finding::new(
                    *id,
                    "static-analysis",
                    *severity,
                    0.8,
                    rel.clone(),
                    idx + 1,
                    idx + 1,
                    *title,
                    format!("pattern rule `{id}` matched"),
                    FindingSource::Static("pattern-rules".into()),
                );
                f.code_snippet = Some(line.trim().to_string());
                outcome.findings.push(f);
            }
        }
    }
    outcome
}
