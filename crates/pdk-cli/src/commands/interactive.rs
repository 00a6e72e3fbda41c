// `pdk interactive`: pick a job from the detected pipeline and run it.

use super::AppContext;
use crate::{GlobalOpts, OutputFormat, RunArgs};
use std::io::{BufRead, Write};
use tokio_util::sync::CancellationToken;

pub async fn execute(global: &GlobalOpts, app: AppContext, cancel: CancellationToken) -> i32 {
    let (pipeline, _path) =
        match pdk_parsers::load_pipeline(&app.workspace, global.file.as_deref()) {
            Ok(loaded) => loaded,
            Err(e) => return super::run::fail(&e),
        };

    println!("pipeline: {} ({})", pipeline.name, pipeline.provider);
    for (i, job) in pipeline.jobs.iter().enumerate() {
        println!(
            "  {}. {} [{}] - {} step(s)",
            i + 1,
            job.id,
            job.runs_on,
            job.steps.len()
        );
    }
    print!("run which job? (number, or 'all') ");
    let _ = std::io::stdout().flush();

    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line).is_err() {
        return 1;
    }
    let choice = line.trim();
    if choice.is_empty() || choice == "q" {
        return 0;
    }

    let jobs = if choice.eq_ignore_ascii_case("all") {
        Vec::new()
    } else {
        match choice.parse::<usize>() {
            Ok(n) if n >= 1 && n <= pipeline.jobs.len() => {
                vec![pipeline.jobs[n - 1].id.clone()]
            }
            _ => {
                eprintln!("unrecognised choice '{choice}'");
                return 1;
            }
        }
    };

    let args = RunArgs {
        dry_run: false,
        output: OutputFormat::Text,
        jobs,
        steps: Vec::new(),
        step_index: None,
        step_range: None,
        skip_steps: Vec::new(),
        vars: Vec::new(),
        host: false,
        docker: false,
        watch: false,
        workspace: Some(app.workspace.clone()),
        timeout: None,
    };
    super::run::execute(args, global, app, cancel).await
}
