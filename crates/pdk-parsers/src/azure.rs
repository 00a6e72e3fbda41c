// Azure DevOps pipeline parser. Handles the single-stage shorthand
// (top-level `jobs:`) and the full `stages:` form, flattening stages
// into the job list with stage dependencies applied.

use crate::schema::{scalar_to_string, string_map, OneOrMany};
use pdk_core::error::{codes, PdkError, PdkResult};
use pdk_core::pipeline::{Condition, Job, Pipeline, Provider, Step, StepKind};
use pdk_core::PipelineParser;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PipelineDoc {
    name: Option<String>,
    #[serde(default)]
    variables: Option<serde_yaml::Value>,
    #[serde(default)]
    stages: Vec<StageDoc>,
    #[serde(default)]
    jobs: Vec<JobDoc>,
    #[serde(default)]
    pool: Option<PoolDoc>,
    #[serde(default)]
    steps: Vec<StepDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageDoc {
    stage: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    depends_on: Option<OneOrMany<String>>,
    #[serde(default)]
    jobs: Vec<JobDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobDoc {
    job: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    depends_on: Option<OneOrMany<String>>,
    #[serde(default)]
    condition: Option<String>,
    #[serde(default)]
    pool: Option<PoolDoc>,
    #[serde(default, deserialize_with = "string_map")]
    variables: HashMap<String, String>,
    #[serde(default)]
    steps: Vec<StepDoc>,
    #[serde(default)]
    timeout_in_minutes: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", untagged)]
enum PoolDoc {
    Name(String),
    Image {
        #[serde(rename = "vmImage")]
        vm_image: String,
    },
}

impl PoolDoc {
    fn label(&self) -> String {
        match self {
            PoolDoc::Name(name) => name.clone(),
            PoolDoc::Image { vm_image } => vm_image.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepDoc {
    #[serde(default)]
    script: Option<String>,
    #[serde(default)]
    bash: Option<String>,
    #[serde(default)]
    pwsh: Option<String>,
    #[serde(default)]
    powershell: Option<String>,
    #[serde(default)]
    checkout: Option<String>,
    #[serde(default)]
    task: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    condition: Option<String>,
    #[serde(default)]
    continue_on_error: Option<bool>,
    #[serde(default, deserialize_with = "string_map")]
    env: HashMap<String, String>,
    #[serde(default, deserialize_with = "string_map")]
    inputs: HashMap<String, String>,
    #[serde(default)]
    working_directory: Option<String>,
}

/// Parser for `azure-pipelines.yml` documents.
pub struct AzureParser;

impl AzureParser {
    pub fn new() -> Self {
        Self
    }

    fn convert(&self, doc: PipelineDoc) -> PdkResult<Pipeline> {
        let mut pipeline = Pipeline::new(
            doc.name.clone().unwrap_or_else(|| "pipeline".to_string()),
            Provider::AzureDevOps,
        );
        pipeline.variables = parse_variables(doc.variables.as_ref());

        let default_pool = doc
            .pool
            .as_ref()
            .map(PoolDoc::label)
            .unwrap_or_else(|| "ubuntu-latest".to_string());

        if !doc.stages.is_empty() {
            // Flattened job ids are `<stage>.<job>`; collect them first
            // so stage-level dependencies can expand to real job ids.
            let mut jobs_per_stage: HashMap<String, Vec<String>> = HashMap::new();
            for stage in &doc.stages {
                let ids = stage
                    .jobs
                    .iter()
                    .filter_map(|j| j.job.as_ref())
                    .map(|j| format!("{}.{j}", stage.stage))
                    .collect();
                jobs_per_stage.insert(stage.stage.clone(), ids);
            }

            for stage in doc.stages {
                let stage_deps: Vec<String> = stage
                    .depends_on
                    .map(OneOrMany::into_vec)
                    .unwrap_or_default();
                for job_doc in stage.jobs {
                    let mut job = convert_job(job_doc, &default_pool, Some(&stage.stage))?;
                    // Sibling references inside the stage carry the
                    // stage prefix after flattening.
                    job.depends_on = job
                        .depends_on
                        .iter()
                        .map(|d| format!("{}.{d}", stage.stage))
                        .collect();
                    // A stage dependency means every job of that stage.
                    for dep_stage in &stage_deps {
                        if let Some(ids) = jobs_per_stage.get(dep_stage) {
                            job.depends_on.extend(ids.iter().cloned());
                        }
                    }
                    pipeline.jobs.push(job);
                }
            }
        } else if !doc.jobs.is_empty() {
            for job_doc in doc.jobs {
                pipeline
                    .jobs
                    .push(convert_job(job_doc, &default_pool, None)?);
            }
        } else if !doc.steps.is_empty() {
            // Bare steps shorthand: one implicit job.
            let mut job = Job::new("build");
            job.runs_on = default_pool;
            for (i, step_doc) in doc.steps.into_iter().enumerate() {
                job.steps.push(convert_step(step_doc, i));
            }
            pipeline.jobs.push(job);
        } else {
            return Err(PdkError::new(
                codes::PARSER_MISSING_FIELD,
                "pipeline has no stages, jobs, or steps",
            ));
        }

        Ok(pipeline)
    }
}

impl Default for AzureParser {
    fn default() -> Self {
        Self::new()
    }
}

fn convert_job(doc: JobDoc, default_pool: &str, stage: Option<&str>) -> PdkResult<Job> {
    let base_id = doc.job.clone().ok_or_else(|| {
        PdkError::new(codes::PARSER_MISSING_FIELD, "job entry is missing its `job:` id")
    })?;
    let id = match stage {
        Some(stage) => format!("{stage}.{base_id}"),
        None => base_id,
    };

    let mut job = Job::new(id);
    if let Some(name) = doc.display_name {
        job.name = name;
    }
    job.runs_on = doc
        .pool
        .as_ref()
        .map(PoolDoc::label)
        .unwrap_or_else(|| default_pool.to_string());
    job.depends_on = doc
        .depends_on
        .map(OneOrMany::into_vec)
        .unwrap_or_default();
    job.env = doc.variables;
    job.condition = doc.condition.map(parse_condition);
    job.timeout_minutes = doc.timeout_in_minutes;

    for (i, step_doc) in doc.steps.into_iter().enumerate() {
        job.steps.push(convert_step(step_doc, i));
    }
    Ok(job)
}

fn convert_step(doc: StepDoc, index: usize) -> Step {
    let (kind, script, shell) = if let Some(script) = doc.script.clone() {
        (StepKind::Script, Some(script), "bash")
    } else if let Some(script) = doc.bash.clone() {
        (StepKind::Bash, Some(script), "bash")
    } else if let Some(script) = doc.pwsh.clone().or_else(|| doc.powershell.clone()) {
        (StepKind::PowerShell, Some(script), "pwsh")
    } else if doc.checkout.is_some() {
        (StepKind::Checkout, None, "bash")
    } else if let Some(task) = doc.task.as_deref() {
        (classify_task(task), None, "bash")
    } else {
        (StepKind::Unknown, None, "bash")
    };

    let name = doc
        .display_name
        .clone()
        .or_else(|| doc.task.clone())
        .or_else(|| {
            script
                .as_deref()
                .map(|s| s.lines().next().unwrap_or(s).trim().to_string())
        })
        .unwrap_or_else(|| format!("step {}", index + 1));

    Step {
        id: doc.name,
        name,
        kind,
        script,
        shell: shell.to_string(),
        with: doc.inputs,
        env: doc.env,
        continue_on_error: doc.continue_on_error.unwrap_or(false),
        condition: doc.condition.map(parse_condition),
        working_dir: doc.working_directory,
        artifact: None,
        needs: Vec::new(),
    }
}

/// Map well-known task identifiers onto step kinds.
fn classify_task(task: &str) -> StepKind {
    let base = task.split('@').next().unwrap_or(task).to_lowercase();
    match base.as_str() {
        "npm" | "npmauthenticate" => StepKind::Npm,
        "dotnetcorecli" | "nugetcommand" => StepKind::Dotnet,
        "usepythonversion" | "pythonscript" => StepKind::Python,
        "maven" => StepKind::Maven,
        "gradle" => StepKind::Gradle,
        "docker" | "dockercompose" => StepKind::Docker,
        "publishbuildartifacts" | "publishpipelineartifact" => StepKind::UploadArtifact,
        "downloadbuildartifacts" | "downloadpipelineartifact" => StepKind::DownloadArtifact,
        "copyfiles" | "deletefiles" => StepKind::FileOperation,
        "powershell" | "pwsh" => StepKind::PowerShell,
        "bash" | "shellscript" | "cmdline" => StepKind::Script,
        _ => StepKind::Unknown,
    }
}

fn parse_condition(text: String) -> Condition {
    match text.trim().to_lowercase().as_str() {
        "always()" => Condition::Always,
        "succeeded()" | "success()" => Condition::Success,
        "failed()" | "failure()" => Condition::Failure,
        _ => Condition::Expression(text),
    }
}

/// Azure variables come as a mapping or as a `- name: / value:` list.
fn parse_variables(value: Option<&serde_yaml::Value>) -> HashMap<String, String> {
    let mut out = HashMap::new();
    match value {
        Some(serde_yaml::Value::Mapping(map)) => {
            for (key, value) in map {
                if let (Some(key), Some(value)) =
                    (key.as_str(), scalar_to_string(value))
                {
                    out.insert(key.to_string(), value);
                }
            }
        }
        Some(serde_yaml::Value::Sequence(entries)) => {
            for entry in entries {
                let name = entry.get("name").and_then(|v| v.as_str());
                let value = entry.get("value").and_then(scalar_to_string);
                if let (Some(name), Some(value)) = (name, value) {
                    out.insert(name.to_string(), value);
                }
            }
        }
        _ => {}
    }
    out
}

impl PipelineParser for AzureParser {
    fn parse(&self, text: &str) -> PdkResult<Pipeline> {
        let doc: PipelineDoc = serde_yaml::from_str(text).map_err(|e| {
            PdkError::new(codes::PARSER_INVALID_YAML, format!("invalid pipeline YAML: {e}"))
                .with_suggestion("Check indentation and key names against the pipeline schema")
        })?;
        self.convert(doc)
    }

    fn parse_file(&self, path: &Path) -> PdkResult<Pipeline> {
        let text = std::fs::read_to_string(path)
            .map_err(|_| PdkError::file_not_found(path.to_path_buf()))?;
        let mut pipeline = self.parse(&text)?;
        if pipeline.name == "pipeline" {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                pipeline.name = stem.to_string();
            }
        }
        Ok(pipeline)
    }

    fn can_parse(&self, path: &Path) -> bool {
        let text = path.to_string_lossy().replace('\\', "/");
        let file_name = text.rsplit('/').next().unwrap_or(&text);
        (file_name == "azure-pipelines.yml" || file_name == "azure-pipelines.yaml")
            || text.contains(".azure-pipelines/")
                && (text.ends_with(".yml") || text.ends_with(".yaml"))
    }
}
