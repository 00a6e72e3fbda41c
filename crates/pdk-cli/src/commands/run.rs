// `pdk run`: validate, then execute (or just render the plan under
// --dry-run).

use super::{parse_duration_flag, parse_var_flags, AppContext};
use crate::output;
use crate::{GlobalOpts, OutputFormat, RunArgs};
use pdk_core::{PdkError, Pipeline, RunContext, RunnerMode};
use pdk_engine::{
    DryRunResult, DryRunValidator, FilterOptions, JobScheduler, SchedulerConfig,
};
use pdk_core::ports::RunnerType;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

pub async fn execute(
    args: RunArgs,
    global: &GlobalOpts,
    app: AppContext,
    cancel: CancellationToken,
) -> i32 {
    if args.watch {
        return super::watch::execute(
            args,
            pdk_core::constants::DEFAULT_DEBOUNCE_MS,
            global,
            app,
            cancel,
        )
        .await;
    }

    let prepared = match prepare(&args, global, &app) {
        Ok(prepared) => prepared,
        Err(e) => return fail(&e),
    };

    let dry_run = validate(&prepared, &app);
    if !dry_run.is_valid() {
        return render_validation_failure(&args, &prepared, dry_run);
    }

    if args.dry_run {
        match args.output {
            OutputFormat::Json => {
                let doc = output::dry_run_json(&prepared.pipeline, &dry_run);
                println!("{}", serde_json::to_string_pretty(&doc).unwrap_or_default());
            }
            OutputFormat::Text => {
                print!("{}", output::render_dry_run(&dry_run, true));
                for item in &dry_run.warnings {
                    tracing::warn!("{}: {}", item.code(), item.message);
                }
            }
        }
        return 0;
    }

    let order = dry_run
        .plan
        .as_ref()
        .map(|plan| plan.jobs.iter().map(|j| j.id.clone()).collect::<Vec<_>>());

    let scheduler = JobScheduler::new(
        std::sync::Arc::clone(&app.registry),
        std::sync::Arc::clone(&app.driver),
        std::sync::Arc::clone(&app.masker),
    )
    .with_config(SchedulerConfig::default());

    let result = scheduler
        .run_pipeline(
            &prepared.pipeline,
            &prepared.ctx,
            &prepared.filters,
            &app.resolver,
            order,
            cancel.clone(),
        )
        .await;

    match result {
        Ok(result) => {
            match args.output {
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&result).unwrap_or_default()
                    );
                }
                OutputFormat::Text => print!("{}", output::render_result(&result, true)),
            }
            if result.cancelled {
                3
            } else if result.success {
                0
            } else {
                1
            }
        }
        Err(e) => fail(&e),
    }
}

/// Everything `run` and `watch` need before execution.
pub struct Prepared {
    pub pipeline: Pipeline,
    pub file: PathBuf,
    pub ctx: RunContext,
    pub filters: FilterOptions,
}

pub fn prepare(args: &RunArgs, global: &GlobalOpts, app: &AppContext) -> Result<Prepared, PdkError> {
    let (pipeline, file) = pdk_parsers::load_pipeline(&app.workspace, global.file.as_deref())?;

    let vars = parse_var_flags(&args.vars)?;
    let timeout = args
        .timeout
        .as_deref()
        .map(parse_duration_flag)
        .transpose()?;

    let runner_mode = if args.host {
        RunnerMode::Host
    } else if args.docker {
        RunnerMode::Docker
    } else {
        RunnerMode::Auto
    };

    let mut ctx = RunContext::new(
        app.workspace.clone(),
        Default::default(),
        &app.masker,
    )
    .with_variables(vars)
    .with_runner_mode(runner_mode);
    ctx.timeout = timeout;

    app.resolver.load_from_config(&pipeline.variables);
    app.resolver.update_context(&ctx);

    let mut filters = FilterOptions {
        step_names: args.steps.clone(),
        skip_names: args.skip_steps.clone(),
        job_names: args.jobs.clone(),
        include_dependencies: !args.jobs.is_empty(),
        preview_only: args.dry_run,
        ..Default::default()
    };
    if let Some(spec) = args.step_index.as_deref() {
        filters.step_indices = pdk_engine::parse_index_spec(spec)?;
    }
    if let Some(spec) = args.step_range.as_deref() {
        filters.ranges.push(pdk_engine::parse_range_spec(spec)?);
    }

    Ok(Prepared {
        pipeline,
        file,
        ctx,
        filters,
    })
}

pub fn validate(prepared: &Prepared, app: &AppContext) -> DryRunResult {
    // Auto validates against the host set (the fallback superset);
    // only an explicit --docker narrows the check.
    let runner = match prepared.ctx.runner_mode {
        RunnerMode::Docker => RunnerType::Docker,
        _ => RunnerType::Host,
    };
    let registry_clone = std::sync::Arc::clone(&app.registry);
    let validator: std::sync::Arc<dyn pdk_core::ExecutorValidator> = registry_clone;
    DryRunValidator::new()
        .with_executor_validator(validator, runner)
        .with_secret_names(app.secret_names())
        .validate(
            &prepared.pipeline,
            &prepared.ctx,
            &prepared.filters,
            &app.resolver,
            Some(prepared.file.clone()),
        )
}

fn render_validation_failure(args: &RunArgs, prepared: &Prepared, dry_run: DryRunResult) -> i32 {
    match args.output {
        OutputFormat::Json => {
            let doc = output::dry_run_json(&prepared.pipeline, &dry_run);
            println!("{}", serde_json::to_string_pretty(&doc).unwrap_or_default());
        }
        OutputFormat::Text => {
            for item in &dry_run.errors {
                eprint!("{}", output::render_error(&item.to_pdk_error(), true));
            }
            for item in &dry_run.warnings {
                tracing::warn!("{}: {}", item.code(), item.message);
            }
        }
    }
    1
}

pub fn fail(err: &PdkError) -> i32 {
    eprint!("{}", output::render_error(err, true));
    err.exit_code()
}
