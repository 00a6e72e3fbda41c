// `pdk watch` / `pdk run --watch`: re-execute the pipeline on file
// changes. Rapid saves collapse into one run; a newer change set cancels
// the run in flight.

use super::AppContext;
use crate::{GlobalOpts, RunArgs};
use pdk_engine::{JobScheduler, SchedulerConfig};
use pdk_watch::{run_watch_loop, Action, Generation, WatchOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub async fn execute(
    args: RunArgs,
    debounce_ms: u64,
    global: &GlobalOpts,
    app: AppContext,
    cancel: CancellationToken,
) -> i32 {
    // Watch mode re-validates and re-runs per generation, so the prep
    // work happens inside the action; a broken pipeline at startup
    // still enters the loop and recovers on the next save.
    let app = Arc::new(app);
    let global = global.clone();
    let workspace = app.workspace.clone();

    let make_action = {
        let app = Arc::clone(&app);
        move |generation: &Generation| -> Action {
            let app = Arc::clone(&app);
            let args = args.clone();
            let global = global.clone();
            let label = generation.label();
            if generation.initial {
                tracing::info!(target: "watch", "startup run");
            } else {
                tracing::info!(
                    target: "watch",
                    "{} triggered by {} change(s)",
                    label,
                    generation.batch.changes.len()
                );
            }
            Box::new(move |run_cancel: CancellationToken| {
                Box::pin(async move {
                    run_once(&args, &global, &app, run_cancel).await
                })
            })
        }
    };

    let result = run_watch_loop(
        workspace,
        WatchOptions {
            debounce: Duration::from_millis(debounce_ms),
            ..Default::default()
        },
        make_action,
        cancel,
    )
    .await;

    match result {
        Ok(()) => 0,
        Err(e) => super::run::fail(&e),
    }
}

/// One watched execution. Returns success.
async fn run_once(
    args: &RunArgs,
    global: &GlobalOpts,
    app: &AppContext,
    cancel: CancellationToken,
) -> bool {
    let prepared = match super::run::prepare(args, global, app) {
        Ok(prepared) => prepared,
        Err(e) => {
            tracing::error!("{e}");
            return false;
        }
    };

    let dry_run = super::run::validate(&prepared, app);
    if !dry_run.is_valid() {
        for item in &dry_run.errors {
            tracing::error!("{}: {}", item.code(), item.message);
        }
        return false;
    }
    let order = dry_run
        .plan
        .as_ref()
        .map(|plan| plan.jobs.iter().map(|j| j.id.clone()).collect::<Vec<_>>());

    let scheduler = JobScheduler::new(
        Arc::clone(&app.registry),
        Arc::clone(&app.driver),
        Arc::clone(&app.masker),
    )
    .with_config(SchedulerConfig::default());

    match scheduler
        .run_pipeline(
            &prepared.pipeline,
            &prepared.ctx,
            &prepared.filters,
            &app.resolver,
            order,
            cancel,
        )
        .await
    {
        Ok(result) => {
            print!("{}", crate::output::render_result(&result, true));
            result.success && !result.cancelled
        }
        Err(e) => {
            tracing::error!("{e}");
            false
        }
    }
}
