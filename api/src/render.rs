//! Presentation layer: Markdown projections of plans and bundles.
//! The authoritative types stay pure; these are derived views only.

use planner::{Plan, ProgressView, StepStatus};
use retrieval::ContextBundle;

/// `visualize_plan`: Mermaid DAG plus a step table.
pub fn plan_markdown(plan: &Plan, progress: Option<&ProgressView>) -> String {
    let mut md = String::new();
    md.push_str(&format!("# Plan: {}\n\n", plan.goal));
    md.push_str(&format!(
        "id `{}` · version {} · {} steps · confidence {:.2}\n\n",
        plan.id,
        plan.version,
        plan.steps.len(),
        plan.confidence_score
    ));

    md.push_str("```mermaid\ngraph TD\n");
    for step in &plan.steps {
        md.push_str(&format!(
            "    S{}[\"{}: {}\"]\n",
            step.step_number,
            step.step_number,
            escape_mermaid(&step.title)
        ));
    }
    for step in &plan.steps {
        for dep in &step.depends_on {
            md.push_str(&format!("    S{} --> S{}\n", dep, step.step_number));
        }
    }
    md.push_str("```\n\n");

    if let Some(graph) = &plan.dependency_graph {
        md.push_str(&format!(
            "critical path: {}\n\n",
            graph
                .critical_path
                .iter()
                .map(|n| n.to_string())
                .collect::<Vec<_>>()
                .join(" → ")
        ));
        md.push_str("parallel groups: ");
        let groups: Vec<String> = graph
            .parallel_groups
            .iter()
            .map(|g| format!("{g:?}"))
            .collect();
        md.push_str(&groups.join(", "));
        md.push_str("\n\n");
    }

    md.push_str("| # | step | status | depends on | files |\n|---|---|---|---|---|\n");
    for step in &plan.steps {
        let status = progress
            .and_then(|p| p.steps.get(&step.step_number))
            .map(|s| status_label(s.status))
            .unwrap_or("—");
        let deps = if step.depends_on.is_empty() {
            "—".to_string()
        } else {
            step.depends_on
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let files = step.files_to_modify.len()
            + step.files_to_create.len()
            + step.files_to_delete.len();
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            step.step_number, step.title, status, deps, files
        ));
    }

    if !plan.risks.is_empty() {
        md.push_str("\n**Risks**\n\n");
        for risk in &plan.risks {
            md.push_str(&format!("- {risk}\n"));
        }
    }
    md
}

/// `get_context_for_prompt` human rendering.
pub fn bundle_markdown(bundle: &ContextBundle) -> String {
    let mut md = String::new();
    md.push_str(&format!("{}\n\n", bundle.summary));
    for file in &bundle.files {
        md.push_str(&format!(
            "## {} (relevance {:.2})\n\n",
            file.path, file.relevance
        ));
        for snippet in &file.snippets {
            if let Some((start, end)) = snippet.lines {
                md.push_str(&format!("lines {start}-{end}:\n"));
            }
            md.push_str("```\n");
            md.push_str(&snippet.text);
            if !snippet.text.ends_with('\n') {
                md.push('\n');
            }
            md.push_str("```\n\n");
        }
    }
    if !bundle.hints.is_empty() {
        md.push_str("**Hints**\n\n");
        for hint in &bundle.hints {
            md.push_str(&format!("- {hint}\n"));
        }
    }
    md.push_str(&format!(
        "\n_{} tokens of {} budget{}_\n",
        bundle.metadata.total_tokens,
        bundle.metadata.token_budget,
        if bundle.metadata.truncated {
            ", truncated"
        } else {
            ""
        }
    ));
    md
}

fn status_label(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Pending => "pending",
        StepStatus::Ready => "ready",
        StepStatus::InProgress => "in progress",
        StepStatus::Completed => "completed",
        StepStatus::Failed => "failed",
        StepStatus::Skipped => "skipped",
        StepStatus::Blocked => "blocked",
    }
}

fn escape_mermaid(s: &str) -> String {
    s.replace('"', "'").replace('[', "(").replace(']', ")")
}

#[cfg(test)]
mod tests {
    use super::*;
    use planner::Step;

    #[test]
    fn plan_markdown_contains_graph_and_table() {
        let mut plan = Plan::new("p1".into(), "build feature".into());
        plan.steps = vec![
            Step {
                step_number: 1,
                id: String::new(),
                title: "schema".into(),
                description: String::new(),
                files_to_modify: vec!["db.rs".into()],
                files_to_create: Vec::new(),
                files_to_delete: Vec::new(),
                depends_on: Vec::new(),
                blocks: Vec::new(),
                can_parallel_with: Vec::new(),
                priority: Default::default(),
                estimated_effort: String::new(),
                acceptance_criteria: Vec::new(),
            },
            Step {
                step_number: 2,
                id: String::new(),
                title: "handler".into(),
                description: String::new(),
                files_to_modify: Vec::new(),
                files_to_create: Vec::new(),
                files_to_delete: Vec::new(),
                depends_on: vec![1],
                blocks: Vec::new(),
                can_parallel_with: Vec::new(),
                priority: Default::default(),
                estimated_effort: String::new(),
                acceptance_criteria: Vec::new(),
            },
        ];
        plan.validate().unwrap();

        let md = plan_markdown(&plan, None);
        assert!(md.contains("graph TD"));
        assert!(md.contains("S1 --> S2"));
        assert!(md.contains("critical path: 1 → 2"));
        assert!(md.contains("| 2 | handler |"));
    }
}
