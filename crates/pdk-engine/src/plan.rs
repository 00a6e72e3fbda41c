// Execution plan rendering. Built from a validated pipeline: jobs in
// execution order, step inputs and environment expanded and masked,
// runtime expressions tagged, script text previewed.

use crate::condition::AggregateStatus;
use crate::filter::CompositeFilter;
use crate::runner::map_runner_image;
use once_cell::sync::Lazy;
use pdk_core::constants::{MASKED_VALUE, SCRIPT_PREVIEW_LEN};
use pdk_core::expand::{Expander, RuntimeExprMode};
use pdk_core::pipeline::{Pipeline, Provider, Step};
use pdk_core::{RunContext, VariableResolver};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// Variable names considered sensitive regardless of the secret store.
static SENSITIVE_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)SECRET|PASSWORD|TOKEN|API[_-]?KEY|PRIVATE").expect("sensitive key regex")
});

/// One step in the rendered plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepPlanNode {
    pub name: String,
    /// 1-based position within the job.
    pub index: usize,
    pub kind: String,
    pub will_run: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub inputs: HashMap<String, String>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub env: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_preview: Option<String>,
}

/// One job in the rendered plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPlanNode {
    pub id: String,
    pub name: String,
    /// 1-based execution rank.
    pub order: usize,
    pub runs_on: String,
    /// Container image the runs-on label maps to.
    pub image: String,
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    pub steps: Vec<StepPlanNode>,
}

/// The full execution plan for one pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub pipeline: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    pub provider: Provider,
    /// Jobs sorted by execution order.
    pub jobs: Vec<JobPlanNode>,
    /// Resolved pipeline variables, sensitive values masked.
    pub variables: HashMap<String, String>,
}

/// Build the plan. `order` is the execution order from the dependency
/// phase; `secret_names` are store-held names that must always mask.
pub fn build_plan(
    pipeline: &Pipeline,
    ctx: &RunContext,
    resolver: &VariableResolver,
    order: &[String],
    filter: &CompositeFilter,
    secret_names: &HashSet<String>,
    file: Option<PathBuf>,
) -> ExecutionPlan {
    let expander = Expander::new().with_runtime_mode(RuntimeExprMode::Tag);

    let mut jobs = Vec::with_capacity(pipeline.jobs.len());
    for (rank, job_id) in order.iter().enumerate() {
        let Some(job) = pipeline.job(job_id) else {
            continue;
        };

        let mut steps = Vec::with_capacity(job.steps.len());
        for (i, step) in job.steps.iter().enumerate() {
            let index = i + 1;
            let decision = filter.evaluate(step, index, job);
            steps.push(StepPlanNode {
                name: step.name.clone(),
                index,
                kind: step.kind.to_string(),
                will_run: decision.execute,
                reason: decision.reason,
                inputs: render_map(&step.with, &expander, resolver, secret_names),
                env: render_map(&step.env, &expander, resolver, secret_names),
                condition: step.condition.as_ref().map(|c| c.as_text()),
                script_preview: step.script.as_ref().map(|s| preview(s)),
            });
        }

        jobs.push(JobPlanNode {
            id: job.id.clone(),
            name: job.name.clone(),
            order: rank + 1,
            runs_on: job.runs_on.clone(),
            image: map_runner_image(&job.runs_on),
            depends_on: job.depends_on.clone(),
            condition: job.condition.as_ref().map(|c| c.as_text()),
            steps,
        });
    }

    let mut variables = HashMap::new();
    for (name, value) in &pipeline.variables {
        let rendered = expander.expand(value, resolver).unwrap_or_else(|_| value.clone());
        variables.insert(name.clone(), mask_value(name, rendered, secret_names));
    }
    for (name, value) in &ctx.variables {
        variables.insert(
            name.clone(),
            mask_value(name, value.clone(), secret_names),
        );
    }

    ExecutionPlan {
        pipeline: pipeline.name.clone(),
        file,
        provider: pipeline.provider,
        jobs,
        variables,
    }
}

fn render_map(
    map: &HashMap<String, String>,
    expander: &Expander,
    resolver: &VariableResolver,
    secret_names: &HashSet<String>,
) -> HashMap<String, String> {
    let mut out = HashMap::with_capacity(map.len());
    for (key, value) in map {
        let rendered = expander.expand(value, resolver).unwrap_or_else(|_| value.clone());
        out.insert(key.clone(), mask_value(key, rendered, secret_names));
    }
    out
}

/// Mask values keyed by a sensitive-looking name or a store-held secret.
fn mask_value(key: &str, value: String, secret_names: &HashSet<String>) -> String {
    if SENSITIVE_KEY_RE.is_match(key) || secret_names.contains(key) {
        MASKED_VALUE.to_string()
    } else {
        value
    }
}

fn preview(script: &str) -> String {
    let flat = script.replace('\n', " ");
    let trimmed = flat.trim();
    if trimmed.chars().count() <= SCRIPT_PREVIEW_LEN {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(SCRIPT_PREVIEW_LEN).collect();
        format!("{cut}...")
    }
}

/// The plan-level condition evaluation context: nothing has run yet.
pub fn plan_status() -> AggregateStatus {
    AggregateStatus::default()
}
