//! LLM-backed plan generation and refinement via `search_and_ask`.
//!
//! The model is asked for strict JSON; parsing is lenient about surrounding
//! prose but strict about the resulting structure, which is validated (and
//! its graph derived) before anything is returned.

use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use retrieval::{BundleOptions, ContextBundler};

use crate::errors::PlanError;
use crate::model::{Architecture, Plan, Scope, Step};

/// Shape requested from the model. Everything defaults so a sparse answer
/// still parses; steps are the only hard requirement.
#[derive(Debug, Deserialize)]
struct PlanDraft {
    #[serde(default)]
    goal: String,
    #[serde(default)]
    scope: Scope,
    #[serde(default)]
    mvp_features: Vec<String>,
    #[serde(default)]
    nice_to_have_features: Vec<String>,
    #[serde(default)]
    architecture: Architecture,
    #[serde(default)]
    risks: Vec<String>,
    #[serde(default)]
    milestones: Vec<String>,
    steps: Vec<Step>,
    #[serde(default)]
    testing_strategy: String,
    #[serde(default)]
    acceptance_criteria: Vec<String>,
    #[serde(default)]
    confidence_score: f32,
    #[serde(default)]
    questions_for_clarification: Vec<String>,
}

/// Generates and refines plans with workspace context.
pub struct PlanGenerator {
    bundler: ContextBundler,
}

impl PlanGenerator {
    pub fn new(bundler: ContextBundler) -> Self {
        Self { bundler }
    }

    /// Create a new plan for `goal`, grounded in a context bundle.
    pub async fn create_plan(
        &self,
        goal: &str,
        constraints: &[String],
    ) -> Result<Plan, PlanError> {
        let bundle = self
            .bundler
            .build(goal, BundleOptions::default(), &[])
            .await?;
        let context = format!(
            "{}\n\nRelevant files:\n{}",
            bundle.summary,
            bundle
                .files
                .iter()
                .map(|f| format!("- {}", f.path))
                .collect::<Vec<_>>()
                .join("\n")
        );

        let mut prompt = format!(
            "Create an implementation plan for: {goal}\n\n{PLAN_SCHEMA_PROMPT}"
        );
        if !constraints.is_empty() {
            prompt.push_str(&format!("\nConstraints:\n- {}", constraints.join("\n- ")));
        }

        let text = self.bundler_ask(&context, &prompt).await?;
        let draft = parse_plan_draft(&text)?;

        let mut plan = Plan::new(Uuid::new_v4().to_string(), goal.to_string());
        apply_draft(&mut plan, draft);
        plan.context_files = bundle.files.iter().map(|f| f.path.clone()).collect();
        plan.validate()?;
        info!(plan_id = %plan.id, steps = plan.steps.len(), "plan created");
        Ok(plan)
    }

    /// Produce a refined copy of `current` incorporating `feedback`. The id
    /// and creation time are preserved; version bookkeeping is the history
    /// service's job.
    pub async fn refine_plan(&self, current: &Plan, feedback: &str) -> Result<Plan, PlanError> {
        let context = serde_json::to_string_pretty(current)?;
        let prompt = format!(
            "Refine the plan above based on this feedback: {feedback}\n\n{PLAN_SCHEMA_PROMPT}"
        );
        let text = self.bundler_ask(&context, &prompt).await?;
        let draft = parse_plan_draft(&text)?;

        let mut plan = current.clone();
        apply_draft(&mut plan, draft);
        plan.validate()?;
        debug!(plan_id = %plan.id, "plan refined");
        Ok(plan)
    }

    async fn bundler_ask(&self, context: &str, prompt: &str) -> Result<String, PlanError> {
        Ok(self.bundler_service().search_and_ask(context, prompt).await?)
    }

    fn bundler_service(&self) -> &retrieval::RetrievalService {
        self.bundler.service()
    }
}

const PLAN_SCHEMA_PROMPT: &str = "Respond with ONLY a JSON object: \
{\"goal\": string, \"scope\": {\"included\": [string], \"excluded\": [string], \
\"assumptions\": [string], \"constraints\": [string]}, \"mvp_features\": [string], \
\"nice_to_have_features\": [string], \"architecture\": {\"notes\": string, \
\"patterns\": [string], \"diagrams\": [string]}, \"risks\": [string], \
\"milestones\": [string], \"steps\": [{\"step_number\": int >= 1, \"title\": string, \
\"description\": string, \"files_to_modify\": [string], \"files_to_create\": [string], \
\"files_to_delete\": [string], \"depends_on\": [int], \"priority\": \
\"critical\"|\"high\"|\"medium\"|\"low\", \"estimated_effort\": string, \
\"acceptance_criteria\": [string]}], \"testing_strategy\": string, \
\"acceptance_criteria\": [string], \"confidence_score\": number 0..1, \
\"questions_for_clarification\": [string]}. \
Dependencies must be acyclic and reference existing step numbers.";

fn apply_draft(plan: &mut Plan, draft: PlanDraft) {
    if !draft.goal.trim().is_empty() {
        plan.goal = draft.goal;
    }
    plan.scope = draft.scope;
    plan.mvp_features = draft.mvp_features;
    plan.nice_to_have_features = draft.nice_to_have_features;
    plan.architecture = draft.architecture;
    plan.risks = draft.risks;
    plan.milestones = draft.milestones;
    plan.steps = draft.steps;
    plan.testing_strategy = draft.testing_strategy;
    plan.acceptance_criteria = draft.acceptance_criteria;
    plan.confidence_score = draft.confidence_score.clamp(0.0, 1.0);
    plan.questions_for_clarification = draft.questions_for_clarification;
}

fn parse_plan_draft(text: &str) -> Result<PlanDraft, PlanError> {
    if let Ok(draft) = serde_json::from_str::<PlanDraft>(text) {
        return Ok(draft);
    }
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Ok(draft) = serde_json::from_str::<PlanDraft>(&text[start..=end]) {
                return Ok(draft);
            }
        }
    }
    Err(PlanError::InvalidPlanResponse(
        text.chars().take(120).collect::<String>(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_client::EngineClient;
    use indexing::{Indexer, IndexingConfig};
    use retrieval::RetrievalService;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn generator_with_answer(ws: &TempDir, answer: &str) -> PlanGenerator {
        let engine = EngineClient::fixed();
        if let EngineClient::Fixed(f) = &engine {
            f.push_canned_answer(answer);
        }
        let indexer = Arc::new(Indexer::new(ws.path(), IndexingConfig::default(), engine));
        PlanGenerator::new(ContextBundler::new(RetrievalService::new(indexer)))
    }

    const DRAFT: &str = r#"Sure, here is the plan:
{"goal": "add login", "steps": [
  {"step_number": 1, "title": "schema", "description": "d", "depends_on": []},
  {"step_number": 2, "title": "handler", "description": "d", "depends_on": [1]}
], "risks": ["auth"], "confidence_score": 0.8}"#;

    #[tokio::test]
    async fn create_plan_parses_and_validates() {
        let ws = TempDir::new().unwrap();
        let generator = generator_with_answer(&ws, DRAFT);
        let plan = generator.create_plan("add login", &[]).await.unwrap();
        assert_eq!(plan.goal, "add login");
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].blocks, vec![2]);
        assert!(plan.dependency_graph.is_some());
    }

    #[tokio::test]
    async fn create_plan_rejects_cyclic_draft() {
        let cyclic = r#"{"steps": [
          {"step_number": 1, "title": "a", "depends_on": [2]},
          {"step_number": 2, "title": "b", "depends_on": [1]}
        ]}"#;
        let ws = TempDir::new().unwrap();
        let generator = generator_with_answer(&ws, cyclic);
        assert!(matches!(
            generator.create_plan("goal", &[]).await,
            Err(PlanError::Cycle(_))
        ));
    }

    #[tokio::test]
    async fn unparseable_answer_is_reported() {
        let ws = TempDir::new().unwrap();
        let generator = generator_with_answer(&ws, "I cannot help with that.");
        assert!(matches!(
            generator.create_plan("goal", &[]).await,
            Err(PlanError::InvalidPlanResponse(_))
        ));
    }

    #[tokio::test]
    async fn refine_keeps_identity() {
        let ws = TempDir::new().unwrap();
        let generator = generator_with_answer(&ws, DRAFT);
        let mut current = Plan::new("keep-id".into(), "old goal".into());
        current.steps = vec![Step {
            step_number: 1,
            id: String::new(),
            title: "old".into(),
            description: String::new(),
            files_to_modify: Vec::new(),
            files_to_create: Vec::new(),
            files_to_delete: Vec::new(),
            depends_on: Vec::new(),
            blocks: Vec::new(),
            can_parallel_with: Vec::new(),
            priority: Default::default(),
            estimated_effort: String::new(),
            acceptance_criteria: Vec::new(),
        }];
        current.validate().unwrap();

        let refined = generator.refine_plan(&current, "more detail").await.unwrap();
        assert_eq!(refined.id, "keep-id");
        assert_eq!(refined.steps.len(), 2);
    }
}
