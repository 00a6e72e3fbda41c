// `pdk validate`: the dry-run validation phases without execution.

use super::{parse_var_flags, AppContext};
use crate::output;
use crate::{GlobalOpts, OutputFormat, ValidateArgs};
use pdk_core::RunContext;
use pdk_engine::{DryRunValidator, FilterOptions};

pub fn execute(args: &ValidateArgs, global: &GlobalOpts, app: AppContext) -> i32 {
    let (pipeline, path) = match pdk_parsers::load_pipeline(&app.workspace, global.file.as_deref())
    {
        Ok(loaded) => loaded,
        Err(e) => return super::run::fail(&e),
    };

    let vars = match parse_var_flags(&args.vars) {
        Ok(vars) => vars,
        Err(e) => return super::run::fail(&e),
    };

    let ctx = RunContext::new(app.workspace.clone(), Default::default(), &app.masker)
        .with_variables(vars);
    app.resolver.load_from_config(&pipeline.variables);
    app.resolver.update_context(&ctx);

    let registry_clone = std::sync::Arc::clone(&app.registry);
    let validator: std::sync::Arc<dyn pdk_core::ExecutorValidator> = registry_clone;
    let result = DryRunValidator::new()
        .with_executor_validator(validator, pdk_core::RunnerType::Host)
        .with_secret_names(app.secret_names())
        .validate(
            &pipeline,
            &ctx,
            &FilterOptions::default(),
            &app.resolver,
            Some(path),
        );

    match args.output {
        OutputFormat::Json => {
            let doc = output::dry_run_json(&pipeline, &result);
            println!("{}", serde_json::to_string_pretty(&doc).unwrap_or_default());
        }
        OutputFormat::Text => {
            if result.is_valid() {
                println!(
                    "pipeline '{}' is valid ({} warning(s))",
                    pipeline.name,
                    result.warnings.len()
                );
            }
            print!("{}", output::render_dry_run(&result, true));
        }
    }

    if result.is_valid() {
        0
    } else {
        1
    }
}
