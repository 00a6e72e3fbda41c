// Terminal and JSON rendering: structured errors with their context and
// suggestions, pipeline listings, dry-run reports, and run summaries.

use pdk_core::{PdkError, Pipeline, PipelineResult};
use pdk_engine::{DryRunResult, ExecutionPlan};
use serde_json::json;

const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const GREEN: &str = "\x1b[32m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

fn color(enabled: bool, code: &'static str) -> &'static str {
    if enabled {
        code
    } else {
        ""
    }
}

/// Render a structured error: coloured prelude, context block, then the
/// suggestion list verbatim.
pub fn render_error(err: &PdkError, use_color: bool) -> String {
    let red = color(use_color, RED);
    let dim = color(use_color, DIM);
    let reset = color(use_color, RESET);

    let mut out = format!("{red}error[{}]{reset}: {}\n", err.code, err.message);

    if let Some(ctx) = &err.context {
        if let Some(file) = &ctx.pipeline_file {
            match ctx.line {
                Some(line) => out.push_str(&format!("  {dim}file:{reset} {}:{line}\n", file.display())),
                None => out.push_str(&format!("  {dim}file:{reset} {}\n", file.display())),
            }
        }
        if let Some(job) = &ctx.job {
            out.push_str(&format!("  {dim}job:{reset} {job}\n"));
        }
        if let Some(step) = &ctx.step {
            out.push_str(&format!("  {dim}step:{reset} {step}\n"));
        }
        if let Some(exit_code) = ctx.exit_code {
            out.push_str(&format!("  {dim}exit code:{reset} {exit_code}\n"));
        }
        if let Some(image) = &ctx.image {
            out.push_str(&format!("  {dim}image:{reset} {image}\n"));
        }
    }

    if !err.suggestions.is_empty() {
        out.push_str("\nSuggestions:\n");
        for suggestion in &err.suggestions {
            out.push_str(&format!("  - {suggestion}\n"));
        }
    }

    out
}

/// The stable `list` JSON shape.
pub fn pipeline_json(pipeline: &Pipeline, with_steps: bool) -> serde_json::Value {
    json!({
        "name": pipeline.name,
        "provider": pipeline.provider.to_string(),
        "jobs": pipeline.jobs.iter().map(|job| {
            let mut entry = json!({
                "id": job.id,
                "name": job.name,
                "runsOn": job.runs_on,
                "stepCount": job.steps.len(),
                "dependsOn": job.depends_on,
                "condition": job.condition.as_ref().map(|c| c.as_text()),
            });
            if with_steps {
                entry["steps"] = job.steps.iter().map(|step| {
                    let mut s = json!({
                        "name": step.name,
                        "type": step.kind.to_string(),
                    });
                    if let Some(script) = &step.script {
                        s["script"] = json!(script);
                    }
                    if !step.with.is_empty() {
                        s["with"] = json!(step.with);
                    }
                    s
                }).collect::<Vec<_>>().into();
            }
            entry
        }).collect::<Vec<_>>(),
    })
}

/// The stable dry-run JSON shape.
pub fn dry_run_json(pipeline: &Pipeline, result: &DryRunResult) -> serde_json::Value {
    let mut doc = pipeline_json(pipeline, false);
    doc["valid"] = json!(result.is_valid());
    doc["errors"] = result
        .errors
        .iter()
        .map(|i| json!({ "code": i.category_code(), "message": i.message, "job": i.job, "step": i.step }))
        .collect::<Vec<_>>()
        .into();
    doc["warnings"] = result
        .warnings
        .iter()
        .map(|i| json!({ "code": i.category_code(), "message": i.message, "job": i.job, "step": i.step }))
        .collect::<Vec<_>>()
        .into();
    if let Some(plan) = &result.plan {
        doc["executionPlan"] = json!({
            "jobs": plan.jobs.iter().map(|job| json!({
                "id": job.id,
                "order": job.order,
                "steps": job.steps.iter().map(|s| json!({
                    "name": s.name,
                    "index": s.index,
                    "willRun": s.will_run,
                })).collect::<Vec<_>>(),
            })).collect::<Vec<_>>(),
        });
    }
    doc
}

/// Human-readable listing.
pub fn render_pipeline(pipeline: &Pipeline) -> String {
    let mut out = format!("{} ({})\n", pipeline.name, pipeline.provider);
    for job in &pipeline.jobs {
        out.push_str(&format!(
            "  {} [{}] - {} step(s)",
            job.id,
            job.runs_on,
            job.steps.len()
        ));
        if !job.depends_on.is_empty() {
            out.push_str(&format!("  (needs: {})", job.depends_on.join(", ")));
        }
        out.push('\n');
        for (i, step) in job.steps.iter().enumerate() {
            out.push_str(&format!("    {}. {} ({})\n", i + 1, step.name, step.kind));
        }
    }
    out
}

/// Human-readable dry-run report.
pub fn render_dry_run(result: &DryRunResult, use_color: bool) -> String {
    let red = color(use_color, RED);
    let yellow = color(use_color, YELLOW);
    let green = color(use_color, GREEN);
    let dim = color(use_color, DIM);
    let reset = color(use_color, RESET);

    let mut out = String::new();

    for item in &result.errors {
        out.push_str(&format!(
            "{red}error[{}]{reset}: {}\n",
            item.code(),
            item.message
        ));
    }
    for item in &result.warnings {
        out.push_str(&format!(
            "{yellow}warning[{}]{reset}: {}\n",
            item.code(),
            item.message
        ));
    }

    for (phase, elapsed) in &result.timings {
        out.push_str(&format!(
            "{dim}phase {:<10} {:>6.1?}{reset}\n",
            phase.category(),
            elapsed
        ));
    }

    match &result.plan {
        Some(plan) => {
            out.push_str(&format!(
                "\n{green}plan:{reset} {} ({} job(s))\n",
                plan.pipeline,
                plan.jobs.len()
            ));
            out.push_str(&render_plan(plan));
        }
        None => {
            out.push_str(&format!(
                "\n{red}validation failed{reset}: {} error(s), {} warning(s)\n",
                result.errors.len(),
                result.warnings.len()
            ));
        }
    }

    out
}

/// The execution-plan tree.
pub fn render_plan(plan: &ExecutionPlan) -> String {
    let mut out = String::new();
    for job in &plan.jobs {
        out.push_str(&format!(
            "  {}. {} [{} -> {}]\n",
            job.order, job.id, job.runs_on, job.image
        ));
        for step in &job.steps {
            let marker = if step.will_run { "+" } else { "-" };
            out.push_str(&format!("     {marker} {}. {}", step.index, step.name));
            if !step.will_run {
                out.push_str(&format!(" ({})", step.reason));
            }
            if let Some(preview) = &step.script_preview {
                if !preview.is_empty() {
                    out.push_str(&format!("  `{preview}`"));
                }
            }
            out.push('\n');
        }
    }
    out
}

/// Post-run summary.
pub fn render_result(result: &PipelineResult, use_color: bool) -> String {
    let red = color(use_color, RED);
    let green = color(use_color, GREEN);
    let dim = color(use_color, DIM);
    let reset = color(use_color, RESET);

    let mut out = String::new();
    for job in &result.jobs {
        let (tag, col) = if job.skipped {
            ("skip", dim)
        } else if job.success {
            ("ok", green)
        } else {
            ("fail", red)
        };
        out.push_str(&format!(
            "{col}[{tag:>4}]{reset} {} ({:.1?})\n",
            job.name, job.duration
        ));
        for step in &job.steps {
            let (tag, col) = if step.skipped {
                ("skip", dim)
            } else if step.success {
                ("ok", green)
            } else {
                ("fail", red)
            };
            out.push_str(&format!(
                "  {col}[{tag:>4}]{reset} {} ({:.1?})",
                step.name, step.duration
            ));
            if let Some(note) = &step.note {
                out.push_str(&format!("  {dim}{note}{reset}"));
            }
            out.push('\n');
        }
    }

    let status = if result.cancelled {
        format!("{red}cancelled{reset}")
    } else if result.success {
        format!("{green}succeeded{reset}")
    } else {
        format!("{red}failed{reset}")
    };
    out.push_str(&format!(
        "\n{}: {status} in {:.1?}\n",
        result.pipeline, result.duration
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdk_core::codes;
    use pdk_core::pipeline::{Job, Provider, Step};
    use pdk_core::ErrorContext;

    #[test]
    fn test_render_error_includes_code_context_suggestions() {
        let err = PdkError::new(codes::VAR_REQUIRED, "greeting required")
            .with_context(ErrorContext::new().with_job("build").with_step("hello"))
            .with_suggestion("Define GREETING");
        let text = render_error(&err, false);
        assert!(text.contains("PDK-E-VAR-003"));
        assert!(text.contains("greeting required"));
        assert!(text.contains("job: build"));
        assert!(text.contains("step: hello"));
        assert!(text.contains("- Define GREETING"));
    }

    #[test]
    fn test_pipeline_json_shape() {
        let mut pipeline = Pipeline::new("ci", Provider::GitHub);
        let mut job = Job::new("build");
        job.depends_on.push("setup".into());
        job.steps.push(Step::script("Build", "make"));
        pipeline.jobs.push(job);

        let doc = pipeline_json(&pipeline, true);
        assert_eq!(doc["name"], "ci");
        assert_eq!(doc["jobs"][0]["id"], "build");
        assert_eq!(doc["jobs"][0]["stepCount"], 1);
        assert_eq!(doc["jobs"][0]["dependsOn"][0], "setup");
        assert_eq!(doc["jobs"][0]["steps"][0]["type"], "script");
        assert_eq!(doc["jobs"][0]["steps"][0]["script"], "make");
    }
}
