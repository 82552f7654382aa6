//! Durable plan store under `.augment-plans/`.
//!
//! Each plan persists as `plan_<id>.json` next to an `index.json` of
//! summaries. All writes go through temp-file + rename.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::PlanError;
use crate::model::Plan;

pub const PLANS_DIR: &str = ".augment-plans";
const INDEX_FILE: &str = "index.json";

/// Summary row kept in `index.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: String,
    pub files_affected_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Filter for [`PlanStore::list`].
#[derive(Clone, Debug, Default)]
pub struct ListFilter {
    pub status: Option<String>,
    pub tags: Vec<String>,
    pub limit: Option<usize>,
}

/// File-backed plan persistence.
#[derive(Clone, Debug)]
pub struct PlanStore {
    dir: PathBuf,
}

impl PlanStore {
    pub fn new(workspace_root: &Path) -> Self {
        Self {
            dir: workspace_root.join(PLANS_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a plan. `name` defaults to the plan id; duplicates are
    /// rejected unless `overwrite`.
    pub fn save(
        &self,
        plan: &Plan,
        name: Option<&str>,
        tags: Vec<String>,
        overwrite: bool,
    ) -> Result<PlanSummary, PlanError> {
        std::fs::create_dir_all(&self.dir)?;
        let mut index = self.load_index()?;
        let existing = index.iter().position(|s| s.id == plan.id);
        if existing.is_some() && !overwrite {
            return Err(PlanError::DuplicatePlan(plan.id.clone()));
        }

        let summary = PlanSummary {
            id: plan.id.clone(),
            name: name.unwrap_or(&plan.id).to_string(),
            tags,
            status: "saved".to_string(),
            files_affected_count: plan.affected_files().len(),
            created_at: plan.created_at,
            updated_at: plan.updated_at,
        };

        write_atomic(&self.plan_path(&plan.id), &serde_json::to_vec_pretty(plan)?)?;
        match existing {
            Some(i) => index[i] = summary.clone(),
            None => index.push(summary.clone()),
        }
        self.write_index(&index)?;
        info!(plan_id = %plan.id, version = plan.version, "plan saved");
        Ok(summary)
    }

    /// Load by id, falling back to the index name.
    pub fn load(&self, id_or_name: &str) -> Result<Plan, PlanError> {
        let index = self.load_index()?;
        let id = index
            .iter()
            .find(|s| s.id == id_or_name || s.name == id_or_name)
            .map(|s| s.id.clone())
            .ok_or_else(|| PlanError::PlanNotFound(id_or_name.to_string()))?;

        let bytes = std::fs::read(self.plan_path(&id))
            .map_err(|_| PlanError::PlanNotFound(id.clone()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn list(&self, filter: &ListFilter) -> Result<Vec<PlanSummary>, PlanError> {
        let mut index = self.load_index()?;
        if let Some(status) = &filter.status {
            index.retain(|s| &s.status == status);
        }
        if !filter.tags.is_empty() {
            index.retain(|s| filter.tags.iter().all(|t| s.tags.contains(t)));
        }
        index.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        if let Some(limit) = filter.limit {
            index.truncate(limit);
        }
        Ok(index)
    }

    pub fn delete(&self, id: &str) -> Result<(), PlanError> {
        let mut index = self.load_index()?;
        let before = index.len();
        index.retain(|s| s.id != id);
        if index.len() == before {
            return Err(PlanError::PlanNotFound(id.to_string()));
        }
        let path = self.plan_path(id);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        self.write_index(&index)?;
        debug!(plan_id = id, "plan deleted");
        Ok(())
    }

    fn plan_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("plan_{id}.json"))
    }

    fn load_index(&self) -> Result<Vec<PlanSummary>, PlanError> {
        let path = self.dir.join(INDEX_FILE);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_index(&self, index: &[PlanSummary]) -> Result<(), PlanError> {
        write_atomic(
            &self.dir.join(INDEX_FILE),
            &serde_json::to_vec_pretty(index)?,
        )
    }
}

/// Temp-file + rename so readers never observe a torn write.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<(), PlanError> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_plan(id: &str) -> Plan {
        let mut plan = Plan::new(id.to_string(), "test goal".into());
        plan.steps = vec![crate::model::Step {
            step_number: 1,
            id: String::new(),
            title: "only step".into(),
            description: String::new(),
            files_to_modify: vec!["src/a.rs".into()],
            files_to_create: Vec::new(),
            files_to_delete: Vec::new(),
            depends_on: Vec::new(),
            blocks: Vec::new(),
            can_parallel_with: Vec::new(),
            priority: Default::default(),
            estimated_effort: String::new(),
            acceptance_criteria: Vec::new(),
        }];
        plan.validate().unwrap();
        plan
    }

    #[test]
    fn save_load_round_trip() {
        let ws = TempDir::new().unwrap();
        let store = PlanStore::new(ws.path());
        let plan = sample_plan("p1");
        store.save(&plan, Some("my plan"), vec!["auth".into()], false).unwrap();

        let loaded = store.load("p1").unwrap();
        assert_eq!(loaded.goal, "test goal");
        let by_name = store.load("my plan").unwrap();
        assert_eq!(by_name.id, "p1");
    }

    #[test]
    fn duplicate_rejected_without_overwrite() {
        let ws = TempDir::new().unwrap();
        let store = PlanStore::new(ws.path());
        let plan = sample_plan("p1");
        store.save(&plan, None, Vec::new(), false).unwrap();
        assert!(matches!(
            store.save(&plan, None, Vec::new(), false),
            Err(PlanError::DuplicatePlan(_))
        ));
        store.save(&plan, None, Vec::new(), true).unwrap();
    }

    #[test]
    fn list_filters_by_tag_and_limit() {
        let ws = TempDir::new().unwrap();
        let store = PlanStore::new(ws.path());
        store
            .save(&sample_plan("p1"), None, vec!["auth".into()], false)
            .unwrap();
        store
            .save(&sample_plan("p2"), None, vec!["db".into()], false)
            .unwrap();

        let filtered = store
            .list(&ListFilter {
                tags: vec!["auth".into()],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "p1");

        let limited = store
            .list(&ListFilter {
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn delete_removes_file_and_row() {
        let ws = TempDir::new().unwrap();
        let store = PlanStore::new(ws.path());
        store.save(&sample_plan("p1"), None, Vec::new(), false).unwrap();
        store.delete("p1").unwrap();
        assert!(matches!(store.load("p1"), Err(PlanError::PlanNotFound(_))));
        assert!(matches!(store.delete("p1"), Err(PlanError::PlanNotFound(_))));
    }
}
