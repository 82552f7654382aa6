//! Plan and step data model.
//!
//! A plan is an acyclic DAG of numbered steps plus scope, architecture notes,
//! risks, and acceptance criteria. The dependency graph is always derived
//! from `depends_on`, never hand-authored; `blocks` is recomputed as its
//! transpose during validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::PlanError;
use crate::graph::DependencyGraph;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Scope {
    #[serde(default)]
    pub included: Vec<String>,
    #[serde(default)]
    pub excluded: Vec<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Architecture {
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub diagrams: Vec<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

/// One unit of plan execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Step {
    /// Unique within the plan, starting at 1.
    pub step_number: u32,
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub files_to_modify: Vec<String>,
    #[serde(default)]
    pub files_to_create: Vec<String>,
    #[serde(default)]
    pub files_to_delete: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<u32>,
    /// Transpose of `depends_on`; recomputed, never trusted from input.
    #[serde(default)]
    pub blocks: Vec<u32>,
    #[serde(default)]
    pub can_parallel_with: Vec<u32>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub estimated_effort: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub goal: String,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub mvp_features: Vec<String>,
    #[serde(default)]
    pub nice_to_have_features: Vec<String>,
    #[serde(default)]
    pub architecture: Architecture,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub milestones: Vec<String>,
    pub steps: Vec<Step>,
    /// Derived from `depends_on` by [`Plan::validate`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_graph: Option<DependencyGraph>,
    #[serde(default)]
    pub testing_strategy: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub confidence_score: f32,
    #[serde(default)]
    pub questions_for_clarification: Vec<String>,
    #[serde(default)]
    pub context_files: Vec<String>,
    #[serde(default)]
    pub codebase_insights: Vec<String>,
}

impl Plan {
    /// Minimal plan skeleton; callers fill goal and steps before validating.
    pub fn new(id: String, goal: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            version: 1,
            created_at: now,
            updated_at: now,
            goal,
            scope: Scope::default(),
            mvp_features: Vec::new(),
            nice_to_have_features: Vec::new(),
            architecture: Architecture::default(),
            risks: Vec::new(),
            milestones: Vec::new(),
            steps: Vec::new(),
            dependency_graph: None,
            testing_strategy: String::new(),
            acceptance_criteria: Vec::new(),
            confidence_score: 0.0,
            questions_for_clarification: Vec::new(),
            context_files: Vec::new(),
            codebase_insights: Vec::new(),
        }
    }

    /// Validate invariants, recompute `blocks`, and derive the graph.
    ///
    /// Checks: step numbers unique and ≥ 1, every reference in `depends_on` /
    /// `can_parallel_with` names an existing step, and the dependency
    /// relation is acyclic.
    pub fn validate(&mut self) -> Result<(), PlanError> {
        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if step.step_number == 0 {
                return Err(PlanError::Invalid(format!(
                    "step \"{}\" has step_number 0; numbering starts at 1",
                    step.title
                )));
            }
            if !seen.insert(step.step_number) {
                return Err(PlanError::Invalid(format!(
                    "duplicate step_number {}",
                    step.step_number
                )));
            }
        }
        for step in &self.steps {
            for dep in step.depends_on.iter().chain(&step.can_parallel_with) {
                if !seen.contains(dep) {
                    return Err(PlanError::Invalid(format!(
                        "step {} references unknown step {dep}",
                        step.step_number
                    )));
                }
            }
        }

        // Recompute blocks as the transpose of depends_on.
        let mut blocks: std::collections::HashMap<u32, Vec<u32>> = std::collections::HashMap::new();
        for step in &self.steps {
            for dep in &step.depends_on {
                blocks.entry(*dep).or_default().push(step.step_number);
            }
        }
        for step in &mut self.steps {
            let mut b = blocks.remove(&step.step_number).unwrap_or_default();
            b.sort_unstable();
            step.blocks = b;
            if step.id.is_empty() {
                step.id = format!("step-{}", step.step_number);
            }
        }

        let graph = DependencyGraph::derive(&self.steps)?;
        self.dependency_graph = Some(graph);
        Ok(())
    }

    /// Union of every file effect declared by the steps.
    pub fn affected_files(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .steps
            .iter()
            .flat_map(|s| {
                s.files_to_modify
                    .iter()
                    .chain(&s.files_to_create)
                    .chain(&s.files_to_delete)
                    .cloned()
            })
            .collect();
        out.sort();
        out.dedup();
        out
    }

    pub fn step(&self, number: u32) -> Result<&Step, PlanError> {
        self.steps
            .iter()
            .find(|s| s.step_number == number)
            .ok_or(PlanError::StepNotFound(number))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn step(n: u32, deps: &[u32]) -> Step {
        Step {
            step_number: n,
            id: String::new(),
            title: format!("step {n}"),
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

    #[test]
    fn validate_recomputes_blocks() {
        let mut plan = Plan::new("p1".into(), "goal".into());
        plan.steps = vec![step(1, &[]), step(2, &[1]), step(3, &[1])];
        plan.validate().unwrap();
        assert_eq!(plan.steps[0].blocks, vec![2, 3]);
        assert!(plan.dependency_graph.is_some());
    }

    #[test]
    fn validate_rejects_duplicates_and_unknown_refs() {
        let mut plan = Plan::new("p1".into(), "goal".into());
        plan.steps = vec![step(1, &[]), step(1, &[])];
        assert!(matches!(plan.validate(), Err(PlanError::Invalid(_))));

        let mut plan = Plan::new("p2".into(), "goal".into());
        plan.steps = vec![step(1, &[9])];
        assert!(matches!(plan.validate(), Err(PlanError::Invalid(_))));
    }

    #[test]
    fn validate_rejects_cycles() {
        let mut plan = Plan::new("p1".into(), "goal".into());
        plan.steps = vec![step(1, &[2]), step(2, &[1])];
        assert!(matches!(plan.validate(), Err(PlanError::Cycle(_))));
    }
}
