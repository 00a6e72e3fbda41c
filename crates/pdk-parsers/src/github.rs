// GitHub Actions workflow parser. Maps workflow YAML onto the PDK
// pipeline IR; `uses:` actions are classified into step kinds, `run:`
// steps become script steps with a shell hint.

use crate::schema::{string_map, OneOrMany};
use pdk_core::error::{codes, PdkError, PdkResult};
use pdk_core::pipeline::{ArtifactSpec, Condition, Job, Pipeline, Provider, Step, StepKind};
use pdk_core::PipelineParser;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct WorkflowDoc {
    name: Option<String>,
    #[serde(default, deserialize_with = "string_map")]
    env: HashMap<String, String>,
    jobs: serde_yaml::Mapping,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct JobDoc {
    name: Option<String>,
    #[serde(default)]
    needs: Option<OneOrMany<String>>,
    runs_on: Option<OneOrMany<String>>,
    #[serde(default, deserialize_with = "string_map")]
    env: HashMap<String, String>,
    #[serde(rename = "if")]
    run_if: Option<String>,
    #[serde(default)]
    steps: Vec<StepDoc>,
    timeout_minutes: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct StepDoc {
    name: Option<String>,
    id: Option<String>,
    #[serde(rename = "if")]
    run_if: Option<String>,
    uses: Option<String>,
    run: Option<String>,
    shell: Option<String>,
    #[serde(default, deserialize_with = "string_map")]
    with: HashMap<String, String>,
    #[serde(default, deserialize_with = "string_map")]
    env: HashMap<String, String>,
    #[serde(default)]
    continue_on_error: bool,
    working_directory: Option<String>,
}

/// Parser for `.github/workflows/*.yml` documents.
pub struct GitHubParser;

impl GitHubParser {
    pub fn new() -> Self {
        Self
    }

    fn convert(&self, doc: WorkflowDoc) -> PdkResult<Pipeline> {
        let mut pipeline = Pipeline::new(
            doc.name.unwrap_or_else(|| "workflow".to_string()),
            Provider::GitHub,
        );
        pipeline.variables = doc.env;

        if doc.jobs.is_empty() {
            return Err(PdkError::new(
                codes::PARSER_MISSING_FIELD,
                "workflow has no jobs",
            ));
        }

        for (key, value) in doc.jobs {
            let id = key
                .as_str()
                .ok_or_else(|| {
                    PdkError::new(codes::PARSER_INVALID_STRUCTURE, "job id is not a string")
                })?
                .to_string();
            let job_doc: JobDoc = serde_yaml::from_value(value).map_err(|e| {
                PdkError::new(
                    codes::PARSER_INVALID_STRUCTURE,
                    format!("job '{id}' is malformed: {e}"),
                )
            })?;
            pipeline.jobs.push(self.convert_job(id, job_doc)?);
        }

        Ok(pipeline)
    }

    fn convert_job(&self, id: String, doc: JobDoc) -> PdkResult<Job> {
        let mut job = Job::new(id);
        if let Some(name) = doc.name {
            job.name = name;
        }
        job.runs_on = doc
            .runs_on
            .map(|r| r.first())
            .unwrap_or_default();
        job.depends_on = doc.needs.map(OneOrMany::into_vec).unwrap_or_default();
        job.env = doc.env;
        job.condition = doc.run_if.map(parse_condition);
        job.timeout_minutes = doc.timeout_minutes;

        for (i, step_doc) in doc.steps.into_iter().enumerate() {
            job.steps.push(convert_step(step_doc, i));
        }
        Ok(job)
    }
}

impl Default for GitHubParser {
    fn default() -> Self {
        Self::new()
    }
}

fn convert_step(doc: StepDoc, index: usize) -> Step {
    let kind = classify(&doc);
    let name = doc
        .name
        .clone()
        .or_else(|| doc.uses.clone())
        .or_else(|| {
            doc.run
                .as_deref()
                .map(|r| r.lines().next().unwrap_or(r).trim().to_string())
        })
        .unwrap_or_else(|| format!("step {}", index + 1));

    let artifact = matches!(kind, StepKind::UploadArtifact | StepKind::DownloadArtifact)
        .then(|| ArtifactSpec {
            name: doc.with.get("name").cloned().unwrap_or_else(|| "artifact".into()),
            path: doc.with.get("path").cloned().unwrap_or_default(),
        });

    Step {
        id: doc.id,
        name,
        kind,
        script: doc.run,
        shell: doc.shell.unwrap_or_else(|| "bash".to_string()),
        with: doc.with,
        env: doc.env,
        continue_on_error: doc.continue_on_error,
        condition: doc.run_if.map(parse_condition),
        working_dir: doc.working_directory,
        artifact,
        needs: Vec::new(),
    }
}

/// Map a step document onto the closed kind set.
fn classify(doc: &StepDoc) -> StepKind {
    if let Some(uses) = doc.uses.as_deref() {
        let action = uses.split('@').next().unwrap_or(uses).to_lowercase();
        return match action.as_str() {
            "actions/checkout" => StepKind::Checkout,
            "actions/upload-artifact" => StepKind::UploadArtifact,
            "actions/download-artifact" => StepKind::DownloadArtifact,
            "actions/setup-node" => StepKind::Npm,
            "actions/setup-dotnet" => StepKind::Dotnet,
            "actions/setup-python" => StepKind::Python,
            "actions/setup-java" => StepKind::Maven,
            _ if action.starts_with("docker/") => StepKind::Docker,
            _ => StepKind::Unknown,
        };
    }
    if doc.run.is_some() {
        return match doc.shell.as_deref() {
            Some("pwsh") | Some("powershell") => StepKind::PowerShell,
            Some("bash") => StepKind::Bash,
            _ => StepKind::Script,
        };
    }
    StepKind::Unknown
}

fn parse_condition(text: String) -> Condition {
    let body = text
        .trim()
        .trim_start_matches("${{")
        .trim_end_matches("}}")
        .trim()
        .to_lowercase();
    match body.as_str() {
        "always()" => Condition::Always,
        "success()" => Condition::Success,
        "failure()" => Condition::Failure,
        _ => Condition::Expression(text),
    }
}

impl PipelineParser for GitHubParser {
    fn parse(&self, text: &str) -> PdkResult<Pipeline> {
        let doc: WorkflowDoc = serde_yaml::from_str(text).map_err(|e| {
            PdkError::new(codes::PARSER_INVALID_YAML, format!("invalid workflow YAML: {e}"))
                .with_suggestion("Check indentation and key names against the workflow schema")
        })?;
        self.convert(doc)
    }

    fn parse_file(&self, path: &Path) -> PdkResult<Pipeline> {
        let text = std::fs::read_to_string(path)
            .map_err(|_| PdkError::file_not_found(path.to_path_buf()))?;
        let mut pipeline = self.parse(&text)?;
        if pipeline.name == "workflow" {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                pipeline.name = stem.to_string();
            }
        }
        Ok(pipeline)
    }

    fn can_parse(&self, path: &Path) -> bool {
        let text = path.to_string_lossy().replace('\\', "/");
        text.contains(".github/workflows/")
            && (text.ends_with(".yml") || text.ends_with(".yaml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORKFLOW: &str = r#"
name: CI
env:
  GLOBAL: value
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - name: Build
        run: make all
        env:
          CC: gcc
      - name: Package
        uses: actions/upload-artifact@v4
        with:
          name: dist
          path: build/
  test:
    name: Unit tests
    needs: build
    runs-on: ubuntu-22.04
    if: success()
    steps:
      - name: Test
        run: make test
        continue-on-error: true
"#;

    #[test]
    fn test_parse_workflow() {
        let pipeline = GitHubParser::new().parse(WORKFLOW).unwrap();
        assert_eq!(pipeline.name, "CI");
        assert_eq!(pipeline.provider, Provider::GitHub);
        assert_eq!(pipeline.jobs.len(), 2);
        assert_eq!(pipeline.variables.get("GLOBAL").map(String::as_str), Some("value"));

        let build = pipeline.job("build").unwrap();
        assert_eq!(build.runs_on, "ubuntu-latest");
        assert_eq!(build.steps.len(), 3);
        assert_eq!(build.steps[0].kind, StepKind::Checkout);
        assert_eq!(build.steps[1].kind, StepKind::Script);
        assert_eq!(build.steps[1].script.as_deref(), Some("make all"));
        assert_eq!(build.steps[1].env.get("CC").map(String::as_str), Some("gcc"));
        assert_eq!(build.steps[2].kind, StepKind::UploadArtifact);
        assert_eq!(
            build.steps[2].artifact.as_ref().map(|a| a.name.as_str()),
            Some("dist")
        );

        let test = pipeline.job("test").unwrap();
        assert_eq!(test.name, "Unit tests");
        assert_eq!(test.depends_on, vec!["build"]);
        assert_eq!(test.condition, Some(Condition::Success));
        assert!(test.steps[0].continue_on_error);
    }

    #[test]
    fn test_needs_list_form() {
        let yaml = r#"
jobs:
  deploy:
    runs-on: ubuntu-latest
    needs: [build, test]
    steps:
      - run: ./deploy.sh
"#;
        let pipeline = GitHubParser::new().parse(yaml).unwrap();
        assert_eq!(pipeline.job("deploy").unwrap().depends_on, vec!["build", "test"]);
    }

    #[test]
    fn test_shell_hint_classifies_kind() {
        let yaml = r#"
jobs:
  j:
    runs-on: ubuntu-latest
    steps:
      - run: Get-ChildItem
        shell: pwsh
      - run: echo hi
        shell: bash
"#;
        let pipeline = GitHubParser::new().parse(yaml).unwrap();
        let steps = &pipeline.job("j").unwrap().steps;
        assert_eq!(steps[0].kind, StepKind::PowerShell);
        assert_eq!(steps[1].kind, StepKind::Bash);
    }

    #[test]
    fn test_invalid_yaml_is_parser_error() {
        let err = GitHubParser::new().parse("jobs: [not: valid").unwrap_err();
        assert_eq!(err.code, codes::PARSER_INVALID_YAML);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_no_jobs_is_missing_field() {
        let err = GitHubParser::new().parse("name: empty\njobs: {}").unwrap_err();
        assert_eq!(err.code, codes::PARSER_MISSING_FIELD);
    }

    #[test]
    fn test_unknown_action_is_unknown_kind() {
        let yaml = r#"
jobs:
  j:
    runs-on: ubuntu-latest
    steps:
      - uses: someone/custom-action@v1
"#;
        let pipeline = GitHubParser::new().parse(yaml).unwrap();
        assert_eq!(pipeline.job("j").unwrap().steps[0].kind, StepKind::Unknown);
    }

    #[test]
    fn test_can_parse_paths() {
        let p = GitHubParser::new();
        assert!(p.can_parse(Path::new(".github/workflows/ci.yml")));
        assert!(p.can_parse(Path::new("/repo/.github/workflows/release.yaml")));
        assert!(!p.can_parse(Path::new("azure-pipelines.yml")));
    }
}
