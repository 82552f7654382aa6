//! Tool dispatcher: validate arguments, invoke the owning component, wrap
//! errors into the wire taxonomy. One entry point per request.
//!
//! Dynamic JSON stops here: every tool has a typed argument record and the
//! components only ever see typed structs.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use memories::MemoryCategory;
use planner::{ApprovalAction, ChangeType, ExecuteRequest, ListFilter};
use retrieval::BundleOptions;
use review_pipeline::{ReviewOptions, parse_unified_diff};
use review_sessions::StartReviewRequest;

use crate::errors::{AppError, AppResult};
use crate::render;
use crate::scrub;
use crate::state::AppState;

/// Catalog row returned by `tool_manifest` and capability discovery.
#[derive(Debug, serde::Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
}

/// The tool catalog. Names are part of the wire contract.
pub fn manifest() -> Vec<ToolSpec> {
    macro_rules! tool {
        ($name:literal, $desc:literal) => {
            ToolSpec {
                name: $name,
                description: $desc,
            }
        };
    }
    vec![
        tool!("index_workspace", "Index the workspace into the context engine"),
        tool!("index_status", "Current index status for the workspace"),
        tool!("reindex_workspace", "Clear and rebuild the index"),
        tool!("clear_index", "Delete persisted index state and caches"),
        tool!("tool_manifest", "List all available tools"),
        tool!("codebase_retrieval", "Semantic search returning a structured payload"),
        tool!("semantic_search", "Semantic search over the indexed workspace"),
        tool!("get_file", "Read a workspace file, optionally a line range"),
        tool!("get_context_for_prompt", "Token-budgeted context bundle for a prompt"),
        tool!("enhance_prompt", "Rewrite a prompt with workspace grounding"),
        tool!("add_memory", "Append a memory record"),
        tool!("list_memories", "List memory records, youngest first"),
        tool!("create_plan", "Generate an implementation plan for a goal"),
        tool!("refine_plan", "Refine an existing plan with feedback"),
        tool!("visualize_plan", "Markdown + Mermaid projection of a plan"),
        tool!("execute_plan", "Execute plan steps (single_step, all_ready, full_plan)"),
        tool!("save_plan", "Persist a plan document"),
        tool!("load_plan", "Load a plan by id or name"),
        tool!("list_plans", "List stored plans"),
        tool!("delete_plan", "Delete a stored plan"),
        tool!("request_approval", "Open an approval request for a plan or steps"),
        tool!("respond_approval", "Resolve a pending approval request"),
        tool!("start_step", "Mark a ready step in progress"),
        tool!("complete_step", "Complete a step and unlock dependents"),
        tool!("fail_step", "Fail a step, optionally skipping dependents"),
        tool!("view_progress", "Execution progress for a plan"),
        tool!("view_history", "Version history of a plan"),
        tool!("compare_plan_versions", "Structural diff between two versions"),
        tool!("rollback_plan", "Restore a prior plan version"),
        tool!("review_changes", "Review working-tree changes"),
        tool!("review_git_diff", "Review a git diff against a base ref"),
        tool!("review_diff", "Review a provided unified diff"),
        tool!("review_auto", "Review whatever changed most recently"),
        tool!("check_invariants", "Evaluate declared invariants against a diff"),
        tool!("run_static_analysis", "Run static analyzer adapters"),
        tool!("reactive_review_pr", "Start an asynchronous review session"),
        tool!("get_review_status", "Status of a review session"),
        tool!("pause_review", "Pause a review session between steps"),
        tool!("resume_review", "Resume a paused review session"),
        tool!("get_review_telemetry", "Detailed session telemetry"),
        tool!("scrub_secrets", "Redact secrets from text"),
        tool!("validate_content", "Validate text against size and binary rules"),
    ]
}

fn parse<T: for<'de> Deserialize<'de>>(arguments: &Value) -> AppResult<T> {
    Ok(serde_json::from_value(arguments.clone())?)
}

fn pretty(value: &impl serde::Serialize) -> AppResult<String> {
    serde_json::to_string_pretty(value).map_err(AppError::from)
}

/// Dispatch a tool call. The returned string is the text content of the
/// response.
pub async fn call_tool(state: &Arc<AppState>, name: &str, arguments: Value) -> AppResult<String> {
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
    debug!(tool = name, "dispatch");
    let result = dispatch(state, name, arguments).await;
    if result.is_err() {
        state.metrics.tool_errors_total.fetch_add(1, Ordering::Relaxed);
    }
    result
}

async fn dispatch(state: &Arc<AppState>, name: &str, arguments: Value) -> AppResult<String> {
    match name {
        // ------------------------------------------------------------------
        // indexing
        // ------------------------------------------------------------------
        "index_workspace" => {
            #[derive(Deserialize)]
            struct Args {
                #[serde(default)]
                background: Option<bool>,
            }
            let args: Args = parse(&arguments)?;
            state.metrics.index_runs_total.fetch_add(1, Ordering::Relaxed);
            let background = args
                .background
                .unwrap_or(state.indexer.config().use_worker);
            if background {
                let mut rx = state.indexer.index_workspace_background();
                tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        if let indexing::IndexEvent::Failed(e) = event {
                            warn!(error = %e, "background index failed");
                        }
                    }
                });
                Ok(json!({ "started": true, "background": true }).to_string())
            } else {
                let report = state.indexer.index_workspace().await?;
                pretty(&report)
            }
        }
        "index_status" => pretty(&state.indexer.status()),
        "reindex_workspace" => {
            state.metrics.index_runs_total.fetch_add(1, Ordering::Relaxed);
            let report = state.indexer.reindex_workspace().await?;
            pretty(&report)
        }
        "clear_index" => {
            state.indexer.clear_index().await?;
            Ok(json!({ "cleared": true }).to_string())
        }
        "tool_manifest" => pretty(&manifest()),

        // ------------------------------------------------------------------
        // retrieval
        // ------------------------------------------------------------------
        "semantic_search" => {
            #[derive(Deserialize)]
            struct Args {
                query: String,
                #[serde(default = "default_top_k")]
                top_k: usize,
            }
            let args: Args = parse(&arguments)?;
            let results = state.retrieval.semantic_search(&args.query, args.top_k).await?;
            pretty(&results)
        }
        "codebase_retrieval" => {
            #[derive(Deserialize)]
            struct Args {
                #[serde(alias = "information_request")]
                query: String,
                #[serde(default = "default_top_k")]
                top_k: usize,
            }
            let args: Args = parse(&arguments)?;
            let payload = state
                .retrieval
                .codebase_retrieval(&args.query, args.top_k)
                .await?;
            pretty(&payload)
        }
        "get_file" => {
            #[derive(Deserialize)]
            struct Args {
                path: String,
                #[serde(default)]
                start_line: Option<usize>,
                #[serde(default)]
                end_line: Option<usize>,
            }
            let args: Args = parse(&arguments)?;
            let range = match (args.start_line, args.end_line) {
                (Some(s), Some(e)) => Some((s, e)),
                (None, None) => None,
                _ => {
                    return Err(AppError::invalid_input(
                        "start_line and end_line must be provided together",
                    ));
                }
            };
            Ok(state.retrieval.get_file(&args.path, range).await?)
        }
        "get_context_for_prompt" => {
            #[derive(Deserialize)]
            struct Args {
                #[serde(alias = "query")]
                prompt: String,
                #[serde(default)]
                max_files: Option<usize>,
                #[serde(default)]
                token_budget: Option<usize>,
                #[serde(default)]
                include_related: Option<bool>,
                #[serde(default)]
                min_relevance: Option<f32>,
                #[serde(default)]
                as_json: bool,
            }
            let args: Args = parse(&arguments)?;
            let defaults = BundleOptions::default();
            let opts = BundleOptions {
                max_files: args.max_files.unwrap_or(defaults.max_files),
                token_budget: args.token_budget.unwrap_or(defaults.token_budget),
                include_related: args.include_related.unwrap_or(defaults.include_related),
                min_relevance: args.min_relevance.unwrap_or(defaults.min_relevance),
                include_summaries: defaults.include_summaries,
            };
            let memory_hints = state.memories.matching_hints(&args.prompt);
            let bundle = state.bundler.build(&args.prompt, opts, &memory_hints).await?;
            if args.as_json {
                pretty(&bundle)
            } else {
                Ok(render::bundle_markdown(&bundle))
            }
        }
        "enhance_prompt" => {
            #[derive(Deserialize)]
            struct Args {
                prompt: String,
            }
            let args: Args = parse(&arguments)?;
            let bundle = state
                .bundler
                .build(&args.prompt, BundleOptions::default(), &[])
                .await?;
            let context = render::bundle_markdown(&bundle);
            let ask = format!(
                "Rewrite this task prompt so a coding agent can act on it directly in this \
                 workspace. Keep the intent, add concrete file references from the context, \
                 and return ONLY the rewritten prompt.\n\nPrompt: {}",
                args.prompt
            );
            match state.retrieval.search_and_ask(&context, &ask).await {
                Ok(enhanced) if !enhanced.trim().is_empty() => Ok(enhanced.trim().to_string()),
                _ => Ok(format!("{}\n\nWorkspace context:\n{}", args.prompt, bundle.summary)),
            }
        }

        // ------------------------------------------------------------------
        // memory
        // ------------------------------------------------------------------
        "add_memory" => {
            #[derive(Deserialize)]
            struct Args {
                category: String,
                content: String,
                #[serde(default)]
                title: Option<String>,
            }
            let args: Args = parse(&arguments)?;
            let category = MemoryCategory::parse(&args.category)?;
            let record = state
                .memories
                .add(category, args.title.as_deref(), &args.content)?;
            pretty(&record)
        }
        "list_memories" => {
            #[derive(Deserialize)]
            struct Args {
                #[serde(default)]
                category: Option<String>,
            }
            let args: Args = parse(&arguments)?;
            let category = args
                .category
                .as_deref()
                .map(MemoryCategory::parse)
                .transpose()?;
            pretty(&state.memories.list(category)?)
        }

        // ------------------------------------------------------------------
        // planning
        // ------------------------------------------------------------------
        "create_plan" => {
            #[derive(Deserialize)]
            struct Args {
                goal: String,
                #[serde(default)]
                constraints: Vec<String>,
                #[serde(default)]
                tags: Vec<String>,
            }
            let args: Args = parse(&arguments)?;
            let mut plan = state.generator.create_plan(&args.goal, &args.constraints).await?;
            state
                .history
                .record(&mut plan, ChangeType::Created, "plan created")?;
            state.plan_store.save(&plan, Some(&args.goal), args.tags, false)?;
            state.tracker.init_plan(&plan);
            pretty(&plan)
        }
        "refine_plan" => {
            #[derive(Deserialize)]
            struct Args {
                plan_id: String,
                feedback: String,
            }
            let args: Args = parse(&arguments)?;
            let current = state.plan_store.load(&args.plan_id)?;
            let mut refined = state.generator.refine_plan(&current, &args.feedback).await?;
            state.history.record(
                &mut refined,
                ChangeType::Refined,
                format!("refined: {}", args.feedback),
            )?;
            state.plan_store.save(&refined, None, Vec::new(), true)?;
            state.tracker.init_plan(&refined);
            pretty(&refined)
        }
        "visualize_plan" => {
            #[derive(Deserialize)]
            struct Args {
                plan_id: String,
            }
            let args: Args = parse(&arguments)?;
            let plan = state.plan_store.load(&args.plan_id)?;
            let progress = state.tracker.view(&plan.id).ok();
            Ok(render::plan_markdown(&plan, progress.as_ref()))
        }
        "execute_plan" => {
            #[derive(Deserialize)]
            struct Args {
                plan_id: String,
                #[serde(flatten)]
                request: ExecuteRequest,
            }
            let args: Args = parse(&arguments)?;
            let plan = state.plan_store.load(&args.plan_id)?;
            let report = state.executor.execute(&plan, &args.request).await?;
            pretty(&report)
        }
        "save_plan" => {
            #[derive(Deserialize)]
            struct Args {
                plan: planner::Plan,
                #[serde(default)]
                name: Option<String>,
                #[serde(default)]
                tags: Vec<String>,
                #[serde(default)]
                overwrite: bool,
            }
            let mut args: Args = parse(&arguments)?;
            args.plan.validate()?;
            let change = if args.overwrite {
                ChangeType::Modified
            } else {
                ChangeType::Created
            };
            state.history.record(&mut args.plan, change, "plan saved")?;
            let summary =
                state
                    .plan_store
                    .save(&args.plan, args.name.as_deref(), args.tags, args.overwrite)?;
            state.tracker.init_plan(&args.plan);
            pretty(&summary)
        }
        "load_plan" => {
            #[derive(Deserialize)]
            struct Args {
                #[serde(alias = "name")]
                id: String,
            }
            let args: Args = parse(&arguments)?;
            pretty(&state.plan_store.load(&args.id)?)
        }
        "list_plans" => {
            #[derive(Deserialize)]
            struct Args {
                #[serde(default)]
                status: Option<String>,
                #[serde(default)]
                tags: Vec<String>,
                #[serde(default)]
                limit: Option<usize>,
            }
            let args: Args = parse(&arguments)?;
            let filter = ListFilter {
                status: args.status,
                tags: args.tags,
                limit: args.limit,
            };
            pretty(&state.plan_store.list(&filter)?)
        }
        "delete_plan" => {
            #[derive(Deserialize)]
            struct Args {
                id: String,
            }
            let args: Args = parse(&arguments)?;
            state.plan_store.delete(&args.id)?;
            Ok(json!({ "deleted": args.id }).to_string())
        }

        // ------------------------------------------------------------------
        // approval + step tracking
        // ------------------------------------------------------------------
        "request_approval" => {
            #[derive(Deserialize)]
            struct Args {
                plan_id: String,
                #[serde(default)]
                step_numbers: Option<Vec<u32>>,
            }
            let args: Args = parse(&arguments)?;
            let plan = state.plan_store.load(&args.plan_id)?;
            pretty(&state.approvals.request(&plan, args.step_numbers))
        }
        "respond_approval" => {
            #[derive(Deserialize)]
            struct Args {
                request_id: String,
                action: ApprovalAction,
                #[serde(default)]
                comments: Option<String>,
                #[serde(default = "default_actor")]
                actor: String,
            }
            let args: Args = parse(&arguments)?;
            let resolved = state.approvals.respond(
                &args.request_id,
                args.action,
                args.comments,
                &args.actor,
            )?;
            pretty(&resolved)
        }
        "start_step" => {
            let args: StepArgs = parse(&arguments)?;
            ensure_tracked(state, &args.plan_id)?;
            state.tracker.start_step(&args.plan_id, args.step_number)?;
            pretty(&state.tracker.view(&args.plan_id)?)
        }
        "complete_step" => {
            #[derive(Deserialize)]
            struct Args {
                plan_id: String,
                step_number: u32,
                #[serde(default)]
                summary: Option<String>,
            }
            let args: Args = parse(&arguments)?;
            ensure_tracked(state, &args.plan_id)?;
            let newly_ready =
                state
                    .tracker
                    .complete_step(&args.plan_id, args.step_number, args.summary)?;
            Ok(json!({
                "completed": args.step_number,
                "newly_ready": newly_ready,
            })
            .to_string())
        }
        "fail_step" => {
            #[derive(Deserialize)]
            struct Args {
                plan_id: String,
                step_number: u32,
                #[serde(default = "default_failure")]
                error: String,
                #[serde(default)]
                skip_dependents: bool,
            }
            let args: Args = parse(&arguments)?;
            ensure_tracked(state, &args.plan_id)?;
            let affected = state.tracker.fail_step(
                &args.plan_id,
                args.step_number,
                args.error,
                args.skip_dependents,
            )?;
            Ok(json!({
                "failed": args.step_number,
                "affected_dependents": affected,
            })
            .to_string())
        }
        "view_progress" => {
            #[derive(Deserialize)]
            struct Args {
                plan_id: String,
            }
            let args: Args = parse(&arguments)?;
            ensure_tracked(state, &args.plan_id)?;
            pretty(&state.tracker.view(&args.plan_id)?)
        }

        // ------------------------------------------------------------------
        // history
        // ------------------------------------------------------------------
        "view_history" => {
            #[derive(Deserialize)]
            struct Args {
                plan_id: String,
            }
            let args: Args = parse(&arguments)?;
            pretty(&state.history.entries(&args.plan_id)?)
        }
        "compare_plan_versions" => {
            #[derive(Deserialize)]
            struct Args {
                plan_id: String,
                from: u32,
                to: u32,
            }
            let args: Args = parse(&arguments)?;
            pretty(&state.history.compare(&args.plan_id, args.from, args.to)?)
        }
        "rollback_plan" => {
            #[derive(Deserialize)]
            struct Args {
                plan_id: String,
                version: u32,
                #[serde(default)]
                reason: Option<String>,
            }
            let args: Args = parse(&arguments)?;
            let restored =
                state
                    .history
                    .rollback(&args.plan_id, args.version, args.reason.as_deref())?;
            state.plan_store.save(&restored, None, Vec::new(), true)?;
            state.tracker.init_plan(&restored);
            pretty(&restored)
        }

        // ------------------------------------------------------------------
        // reviews
        // ------------------------------------------------------------------
        "review_diff" => {
            #[derive(Deserialize)]
            struct Args {
                diff: String,
                #[serde(default)]
                options: Option<ReviewOptions>,
                #[serde(default)]
                render: Option<String>,
            }
            let args: Args = parse(&arguments)?;
            let opts = args.options.unwrap_or_default();
            let result = state.reviewer.review_diff(&args.diff, &opts).await?;
            render_review(&result, args.render.as_deref())
        }
        "review_git_diff" => {
            #[derive(Deserialize)]
            struct Args {
                #[serde(default)]
                base_ref: Option<String>,
                #[serde(default)]
                options: Option<ReviewOptions>,
                #[serde(default)]
                render: Option<String>,
            }
            let args: Args = parse(&arguments)?;
            let opts = args.options.unwrap_or_default();
            let result = state
                .reviewer
                .review_git(args.base_ref.as_deref(), &opts)
                .await?;
            render_review(&result, args.render.as_deref())
        }
        "review_changes" => {
            #[derive(Deserialize)]
            struct Args {
                #[serde(default)]
                files: Vec<String>,
                #[serde(default)]
                options: Option<ReviewOptions>,
                #[serde(default)]
                render: Option<String>,
            }
            let args: Args = parse(&arguments)?;
            let opts = args.options.unwrap_or_default();
            let diff =
                review_pipeline::capture_git_diff(&state.root, Some("HEAD")).await?;
            let diff = if args.files.is_empty() {
                diff
            } else {
                parse_unified_diff(&diff)
                    .into_iter()
                    .filter(|f| args.files.contains(&f.path))
                    .map(|f| f.render())
                    .collect()
            };
            let result = state.reviewer.review_diff(&diff, &opts).await?;
            render_review(&result, args.render.as_deref())
        }
        "review_auto" => {
            #[derive(Deserialize)]
            struct Args {
                #[serde(default)]
                options: Option<ReviewOptions>,
                #[serde(default)]
                render: Option<String>,
            }
            let args: Args = parse(&arguments)?;
            let opts = args.options.unwrap_or_default();
            // Working tree first; fall back to the last commit.
            let mut diff = review_pipeline::capture_git_diff(&state.root, Some("HEAD")).await?;
            if diff.trim().is_empty() {
                diff = review_pipeline::capture_ref_range(&state.root, "HEAD~1", "HEAD").await?;
            }
            let result = state.reviewer.review_diff(&diff, &opts).await?;
            render_review(&result, args.render.as_deref())
        }
        "check_invariants" => {
            #[derive(Deserialize)]
            struct Args {
                #[serde(default)]
                diff: Option<String>,
                #[serde(default = "default_true_fn")]
                changed_lines_only: bool,
            }
            let args: Args = parse(&arguments)?;
            let diff = match args.diff {
                Some(d) => d,
                None => review_pipeline::capture_git_diff(&state.root, Some("HEAD")).await?,
            };
            let report = state.reviewer.check_invariants(&diff, args.changed_lines_only)?;
            Ok(serde_json::to_string_pretty(&json!({
                "findings": report.findings,
                "rules_executed": report.executed,
                "warnings": report.warnings,
            }))?)
        }
        "run_static_analysis" => {
            #[derive(Deserialize)]
            struct Args {
                #[serde(default)]
                files: Vec<String>,
                #[serde(default = "default_analyzer_timeout")]
                timeout_secs: u64,
            }
            let args: Args = parse(&arguments)?;
            let files = if !args.files.is_empty() {
                args.files
            } else {
                let diff =
                    review_pipeline::capture_git_diff(&state.root, Some("HEAD")).await?;
                let changed: Vec<String> = parse_unified_diff(&diff)
                    .into_iter()
                    .map(|f| f.path)
                    .collect();
                if changed.is_empty() {
                    return Err(AppError::invalid_input(
                        "no files given and no local changes to analyze",
                    ));
                }
                changed
            };
            let outcomes = state.reviewer.run_static_analysis(&files, args.timeout_secs).await;
            let rows: Vec<Value> = outcomes
                .into_iter()
                .map(|o| {
                    json!({
                        "analyzer": o.name,
                        "findings": o.findings,
                        "duration_ms": o.duration_ms,
                        "warnings": o.warnings,
                    })
                })
                .collect();
            pretty(&rows)
        }

        // ------------------------------------------------------------------
        // reactive sessions
        // ------------------------------------------------------------------
        "reactive_review_pr" => {
            let request: StartReviewRequest = parse(&arguments)?;
            state
                .metrics
                .sessions_started_total
                .fetch_add(1, Ordering::Relaxed);
            let session_id = state.sessions.start_review(request)?;
            Ok(json!({ "session_id": session_id }).to_string())
        }
        "get_review_status" => {
            let args: SessionArgs = parse(&arguments)?;
            pretty(&state.sessions.status(&args.session_id)?)
        }
        "pause_review" => {
            let args: SessionArgs = parse(&arguments)?;
            pretty(&state.sessions.pause(&args.session_id)?)
        }
        "resume_review" => {
            let args: SessionArgs = parse(&arguments)?;
            pretty(&state.sessions.resume(&args.session_id)?)
        }
        "get_review_telemetry" => {
            let args: SessionArgs = parse(&arguments)?;
            pretty(&state.sessions.telemetry(&args.session_id)?)
        }

        // ------------------------------------------------------------------
        // utilities
        // ------------------------------------------------------------------
        "scrub_secrets" => {
            #[derive(Deserialize)]
            struct Args {
                content: String,
            }
            let args: Args = parse(&arguments)?;
            pretty(&scrub::scrub_secrets(&args.content))
        }
        "validate_content" => {
            #[derive(Deserialize)]
            struct Args {
                content: String,
                #[serde(default = "default_max_bytes")]
                max_bytes: usize,
            }
            let args: Args = parse(&arguments)?;
            pretty(&scrub::validate_content(&args.content, args.max_bytes))
        }

        other => Err(AppError::invalid_input(format!("unknown tool: {other}"))),
    }
}

#[derive(Deserialize)]
struct StepArgs {
    plan_id: String,
    step_number: u32,
}

#[derive(Deserialize)]
struct SessionArgs {
    session_id: String,
}

/// Step tools work against evicted/restarted trackers by re-registering the
/// stored plan.
fn ensure_tracked(state: &Arc<AppState>, plan_id: &str) -> AppResult<()> {
    if !state.tracker.is_tracked(plan_id) {
        let plan = state.plan_store.load(plan_id)?;
        state.tracker.init_plan(&plan);
    }
    Ok(())
}

fn render_review(
    result: &review_pipeline::ReviewResult,
    render: Option<&str>,
) -> AppResult<String> {
    match render {
        Some("markdown") => Ok(review_pipeline::to_markdown(result)),
        Some("sarif") => Ok(serde_json::to_string_pretty(&review_pipeline::to_sarif(
            result,
        ))?),
        _ => serde_json::to_string_pretty(result).map_err(AppError::from),
    }
}

fn default_top_k() -> usize {
    5
}
fn default_actor() -> String {
    "agent".to_string()
}
fn default_failure() -> String {
    "step failed".to_string()
}
fn default_true_fn() -> bool {
    true
}
fn default_analyzer_timeout() -> u64 {
    60
}
fn default_max_bytes() -> usize {
    workspace_fs::MAX_FILE_SIZE as usize
}
