//! Versioned plan history: append-only jsonl per plan, structural diff,
//! rollback. In-memory cache bounded to 50 histories × 20 versions (LRU);
//! older versions stay on disk.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::PlanError;
use crate::model::{Plan, Step};
use crate::store::PLANS_DIR;

const HISTORY_SUBDIR: &str = "history";
/// Versions kept in memory per plan.
const MEM_VERSIONS: usize = 20;
/// Histories kept in memory.
const MEM_HISTORIES: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Modified,
    Refined,
    RolledBack,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub change_type: ChangeType,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_snapshot: Option<Plan>,
}

/// One changed field with before/after values.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldChange {
    pub name: String,
    pub from: serde_json::Value,
    pub to: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepDiff {
    pub step_number: u32,
    pub fields: Vec<FieldChange>,
}

/// Structural difference between two plan versions.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PlanDiff {
    pub steps_added: Vec<u32>,
    pub steps_removed: Vec<u32>,
    pub steps_modified: Vec<StepDiff>,
    pub scope_changes: Vec<FieldChange>,
    pub architecture_changes: Vec<FieldChange>,
    pub files_added: Vec<String>,
    pub files_removed: Vec<String>,
}

impl PlanDiff {
    pub fn is_empty(&self) -> bool {
        self.steps_added.is_empty()
            && self.steps_removed.is_empty()
            && self.steps_modified.is_empty()
            && self.scope_changes.is_empty()
            && self.architecture_changes.is_empty()
            && self.files_added.is_empty()
            && self.files_removed.is_empty()
    }
}

struct CachedHistory {
    entries: VecDeque<HistoryEntry>,
    last_version: u32,
    last_access: u64,
}

/// History service shared behind the composition root.
pub struct PlanHistoryService {
    dir: PathBuf,
    cache: Mutex<HashMap<String, CachedHistory>>,
    tick: std::sync::atomic::AtomicU64,
}

impl PlanHistoryService {
    pub fn new(workspace_root: &Path) -> Self {
        Self {
            dir: workspace_root.join(PLANS_DIR).join(HISTORY_SUBDIR),
            cache: Mutex::new(HashMap::new()),
            tick: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Assign the next dense version to `plan` and append a history entry
    /// with a full snapshot.
    pub fn record(
        &self,
        plan: &mut Plan,
        change_type: ChangeType,
        description: impl Into<String>,
    ) -> Result<u32, PlanError> {
        let last = self.last_version(&plan.id)?;
        let version = last + 1;
        plan.version = version;
        plan.updated_at = Utc::now();

        let entry = HistoryEntry {
            version,
            timestamp: plan.updated_at,
            change_type,
            description: description.into(),
            plan_snapshot: Some(plan.clone()),
        };
        self.append_to_disk(&plan.id, &entry)?;
        self.push_to_cache(&plan.id, entry);
        debug!(plan_id = %plan.id, version, ?change_type, "history entry recorded");
        Ok(version)
    }

    /// Entry metadata (no snapshots), newest first.
    pub fn entries(&self, plan_id: &str) -> Result<Vec<HistoryEntry>, PlanError> {
        let mut all = self.load_all(plan_id)?;
        for e in &mut all {
            e.plan_snapshot = None;
        }
        all.reverse();
        Ok(all)
    }

    /// Snapshot of one version, from memory when cached, else disk.
    pub fn snapshot_at(&self, plan_id: &str, version: u32) -> Result<Plan, PlanError> {
        {
            let mut cache = self.cache.lock().expect("history lock");
            if let Some(hist) = cache.get_mut(plan_id) {
                hist.last_access = self.next_tick();
                if let Some(entry) = hist.entries.iter().find(|e| e.version == version) {
                    if let Some(plan) = &entry.plan_snapshot {
                        return Ok(plan.clone());
                    }
                }
            }
        }
        let all = self.load_all(plan_id)?;
        all.into_iter()
            .find(|e| e.version == version)
            .and_then(|e| e.plan_snapshot)
            .ok_or(PlanError::VersionNotFound(version))
    }

    /// Structural diff between two versions of the same plan.
    pub fn compare(&self, plan_id: &str, from: u32, to: u32) -> Result<PlanDiff, PlanError> {
        let a = self.snapshot_at(plan_id, from)?;
        let b = self.snapshot_at(plan_id, to)?;
        Ok(diff_plans(&a, &b))
    }

    /// Append a `rolled_back` entry whose snapshot equals `version`'s, under
    /// a fresh version number. The caller replaces the active plan with the
    /// returned one.
    pub fn rollback(
        &self,
        plan_id: &str,
        version: u32,
        reason: Option<&str>,
    ) -> Result<Plan, PlanError> {
        let mut snapshot = self.snapshot_at(plan_id, version)?;
        let description = reason
            .map(str::to_string)
            .unwrap_or_else(|| format!("rollback to version {version}"));
        let new_version = self.record(&mut snapshot, ChangeType::RolledBack, description)?;
        info!(plan_id, from = version, to = new_version, "plan rolled back");
        Ok(snapshot)
    }

    // ------------------------------------------------------------------

    fn last_version(&self, plan_id: &str) -> Result<u32, PlanError> {
        {
            let cache = self.cache.lock().expect("history lock");
            if let Some(hist) = cache.get(plan_id) {
                return Ok(hist.last_version);
            }
        }
        Ok(self.load_all(plan_id)?.last().map(|e| e.version).unwrap_or(0))
    }

    fn history_path(&self, plan_id: &str) -> PathBuf {
        self.dir.join(format!("{plan_id}.jsonl"))
    }

    fn append_to_disk(&self, plan_id: &str, entry: &HistoryEntry) -> Result<(), PlanError> {
        std::fs::create_dir_all(&self.dir)?;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.history_path(plan_id))?;
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }

    fn load_all(&self, plan_id: &str) -> Result<Vec<HistoryEntry>, PlanError> {
        let path = self.history_path(plan_id);
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            out.push(serde_json::from_str(line)?);
        }
        Ok(out)
    }

    fn push_to_cache(&self, plan_id: &str, entry: HistoryEntry) {
        let mut cache = self.cache.lock().expect("history lock");
        let tick = self.next_tick();
        let version = entry.version;

        if !cache.contains_key(plan_id) && cache.len() >= MEM_HISTORIES {
            if let Some(oldest) = cache
                .iter()
                .min_by_key(|(_, h)| h.last_access)
                .map(|(k, _)| k.clone())
            {
                cache.remove(&oldest);
            }
        }
        let hist = cache.entry(plan_id.to_string()).or_insert(CachedHistory {
            entries: VecDeque::new(),
            last_version: 0,
            last_access: tick,
        });
        hist.entries.push_back(entry);
        while hist.entries.len() > MEM_VERSIONS {
            hist.entries.pop_front();
        }
        hist.last_version = version;
        hist.last_access = tick;
    }

    fn next_tick(&self) -> u64 {
        self.tick
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// diffing
// ---------------------------------------------------------------------------

fn diff_plans(a: &Plan, b: &Plan) -> PlanDiff {
    let mut diff = PlanDiff::default();

    let nums = |p: &Plan| -> Vec<u32> { p.steps.iter().map(|s| s.step_number).collect() };
    let a_nums = nums(a);
    let b_nums = nums(b);
    diff.steps_added = b_nums
        .iter()
        .filter(|n| !a_nums.contains(n))
        .copied()
        .collect();
    diff.steps_removed = a_nums
        .iter()
        .filter(|n| !b_nums.contains(n))
        .copied()
        .collect();

    for sb in &b.steps {
        let Some(sa) = a.steps.iter().find(|s| s.step_number == sb.step_number) else {
            continue;
        };
        let fields = diff_steps(sa, sb);
        if !fields.is_empty() {
            diff.steps_modified.push(StepDiff {
                step_number: sb.step_number,
                fields,
            });
        }
    }

    push_change(&mut diff.scope_changes, "included", &a.scope.included, &b.scope.included);
    push_change(&mut diff.scope_changes, "excluded", &a.scope.excluded, &b.scope.excluded);
    push_change(
        &mut diff.scope_changes,
        "assumptions",
        &a.scope.assumptions,
        &b.scope.assumptions,
    );
    push_change(
        &mut diff.scope_changes,
        "constraints",
        &a.scope.constraints,
        &b.scope.constraints,
    );
    push_change(
        &mut diff.architecture_changes,
        "notes",
        &a.architecture.notes,
        &b.architecture.notes,
    );
    push_change(
        &mut diff.architecture_changes,
        "patterns",
        &a.architecture.patterns,
        &b.architecture.patterns,
    );

    let a_files = a.affected_files();
    let b_files = b.affected_files();
    diff.files_added = b_files
        .iter()
        .filter(|f| !a_files.contains(f))
        .cloned()
        .collect();
    diff.files_removed = a_files
        .iter()
        .filter(|f| !b_files.contains(f))
        .cloned()
        .collect();

    diff
}

fn diff_steps(a: &Step, b: &Step) -> Vec<FieldChange> {
    let mut out = Vec::new();
    push_change(&mut out, "title", &a.title, &b.title);
    push_change(&mut out, "description", &a.description, &b.description);
    push_change(&mut out, "files_to_modify", &a.files_to_modify, &b.files_to_modify);
    push_change(&mut out, "files_to_create", &a.files_to_create, &b.files_to_create);
    push_change(&mut out, "files_to_delete", &a.files_to_delete, &b.files_to_delete);
    push_change(&mut out, "depends_on", &a.depends_on, &b.depends_on);
    push_change(&mut out, "priority", &a.priority, &b.priority);
    push_change(&mut out, "estimated_effort", &a.estimated_effort, &b.estimated_effort);
    push_change(
        &mut out,
        "acceptance_criteria",
        &a.acceptance_criteria,
        &b.acceptance_criteria,
    );
    out
}

fn push_change<T: Serialize + PartialEq>(out: &mut Vec<FieldChange>, name: &str, a: &T, b: &T) {
    if a != b {
        out.push(FieldChange {
            name: name.to_string(),
            from: serde_json::to_value(a).unwrap_or(serde_json::Value::Null),
            to: serde_json::to_value(b).unwrap_or(serde_json::Value::Null),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Plan, Priority, Step};
    use tempfile::TempDir;

    fn step(n: u32, title: &str, deps: &[u32]) -> Step {
        Step {
            step_number: n,
            id: String::new(),
            title: title.into(),
            description: String::new(),
            files_to_modify: Vec::new(),
            files_to_create: Vec::new(),
            files_to_delete: Vec::new(),
            depends_on: deps.to_vec(),
            blocks: Vec::new(),
            can_parallel_with: Vec::new(),
            priority: Priority::Medium,
            estimated_effort: String::new(),
            acceptance_criteria: Vec::new(),
        }
    }

    fn plan_with_steps(id: &str, steps: Vec<Step>) -> Plan {
        let mut plan = Plan::new(id.into(), "goal".into());
        plan.steps = steps;
        plan.validate().unwrap();
        plan
    }

    #[test]
    fn versions_are_dense_and_increasing() {
        let ws = TempDir::new().unwrap();
        let svc = PlanHistoryService::new(ws.path());
        let mut plan = plan_with_steps("p1", vec![step(1, "a", &[])]);

        assert_eq!(svc.record(&mut plan, ChangeType::Created, "created").unwrap(), 1);
        assert_eq!(svc.record(&mut plan, ChangeType::Modified, "edit").unwrap(), 2);
        assert_eq!(plan.version, 2);

        let entries = svc.entries("p1").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].version, 2, "newest first");
    }

    #[test]
    fn compare_same_version_is_empty() {
        let ws = TempDir::new().unwrap();
        let svc = PlanHistoryService::new(ws.path());
        let mut plan = plan_with_steps("p1", vec![step(1, "a", &[])]);
        svc.record(&mut plan, ChangeType::Created, "created").unwrap();

        let diff = svc.compare("p1", 1, 1).unwrap();
        assert!(diff.is_empty());
    }

    #[test]
    fn compare_detects_added_and_modified_steps() {
        let ws = TempDir::new().unwrap();
        let svc = PlanHistoryService::new(ws.path());
        let mut plan = plan_with_steps("p1", vec![step(1, "a", &[])]);
        svc.record(&mut plan, ChangeType::Created, "created").unwrap();

        plan.steps[0].title = "a renamed".into();
        plan.steps.push(step(2, "b", &[1]));
        plan.validate().unwrap();
        svc.record(&mut plan, ChangeType::Modified, "edit").unwrap();

        let diff = svc.compare("p1", 1, 2).unwrap();
        assert_eq!(diff.steps_added, vec![2]);
        assert!(diff.steps_removed.is_empty());
        assert_eq!(diff.steps_modified.len(), 1);
        assert_eq!(diff.steps_modified[0].fields[0].name, "title");
    }

    #[test]
    fn rollback_round_trip_is_empty_diff() {
        let ws = TempDir::new().unwrap();
        let svc = PlanHistoryService::new(ws.path());
        let mut plan = plan_with_steps("p1", vec![step(1, "a", &[])]);
        svc.record(&mut plan, ChangeType::Created, "created").unwrap();

        plan.steps[0].title = "changed".into();
        svc.record(&mut plan, ChangeType::Modified, "edit").unwrap();

        let restored = svc.rollback("p1", 1, None).unwrap();
        assert_eq!(restored.version, 3);
        assert_eq!(restored.steps[0].title, "a");

        let diff = svc.compare("p1", 1, 3).unwrap();
        assert!(diff.is_empty(), "rollback target equals original");
    }

    #[test]
    fn snapshots_survive_cache_window() {
        let ws = TempDir::new().unwrap();
        let svc = PlanHistoryService::new(ws.path());
        let mut plan = plan_with_steps("p1", vec![step(1, "a", &[])]);
        for i in 0..(MEM_VERSIONS + 5) {
            plan.steps[0].description = format!("rev {i}");
            svc.record(&mut plan, ChangeType::Modified, "edit").unwrap();
        }
        // Version 1 fell out of the memory window but loads from disk.
        let old = svc.snapshot_at("p1", 1).unwrap();
        assert_eq!(old.steps[0].description, "rev 0");
    }
}
