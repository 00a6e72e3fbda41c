// `pdk list`: show the pipeline's jobs and steps.

use super::AppContext;
use crate::output;
use crate::{GlobalOpts, ListArgs, OutputFormat};

pub fn execute(args: &ListArgs, global: &GlobalOpts, app: AppContext) -> i32 {
    let (pipeline, path) = match pdk_parsers::load_pipeline(&app.workspace, global.file.as_deref())
    {
        Ok(loaded) => loaded,
        Err(e) => return super::run::fail(&e),
    };

    match args.output {
        OutputFormat::Json => {
            let doc = output::pipeline_json(&pipeline, true);
            println!("{}", serde_json::to_string_pretty(&doc).unwrap_or_default());
        }
        OutputFormat::Text => {
            tracing::debug!("pipeline file: {}", path.display());
            print!("{}", output::render_pipeline(&pipeline));
        }
    }
    0
}
