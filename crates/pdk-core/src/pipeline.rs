// Provider-agnostic pipeline intermediate representation.
// Produced by the parsers, read-only during validation and execution.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The hosted provider a pipeline definition was authored for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provider {
    GitHub,
    AzureDevOps,
    GitLab,
    Unknown,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::GitHub => write!(f, "GitHub Actions"),
            Provider::AzureDevOps => write!(f, "Azure DevOps"),
            Provider::GitLab => write!(f, "GitLab CI"),
            Provider::Unknown => write!(f, "Unknown"),
        }
    }
}

/// The closed set of step kinds PDK knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    Checkout,
    Script,
    Docker,
    Npm,
    Dotnet,
    Python,
    Maven,
    Gradle,
    PowerShell,
    Bash,
    FileOperation,
    UploadArtifact,
    DownloadArtifact,
    Unknown,
}

impl StepKind {
    /// Kinds that carry inline script text and fail schema validation
    /// without it.
    pub fn requires_script(&self) -> bool {
        matches!(self, StepKind::Script | StepKind::Bash | StepKind::PowerShell)
    }

    /// All kinds except `Unknown`.
    pub fn known_kinds() -> &'static [StepKind] {
        &[
            StepKind::Checkout,
            StepKind::Script,
            StepKind::Docker,
            StepKind::Npm,
            StepKind::Dotnet,
            StepKind::Python,
            StepKind::Maven,
            StepKind::Gradle,
            StepKind::PowerShell,
            StepKind::Bash,
            StepKind::FileOperation,
            StepKind::UploadArtifact,
            StepKind::DownloadArtifact,
        ]
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepKind::Checkout => "checkout",
            StepKind::Script => "script",
            StepKind::Docker => "docker",
            StepKind::Npm => "npm",
            StepKind::Dotnet => "dotnet",
            StepKind::Python => "python",
            StepKind::Maven => "maven",
            StepKind::Gradle => "gradle",
            StepKind::PowerShell => "powershell",
            StepKind::Bash => "bash",
            StepKind::FileOperation => "file-operation",
            StepKind::UploadArtifact => "upload-artifact",
            StepKind::DownloadArtifact => "download-artifact",
            StepKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// When a job or step is allowed to run, relative to prior outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    /// Run regardless of prior failures or cancellation.
    Always,
    /// Run only when nothing before it has failed.
    Success,
    /// Run only when something before it has failed.
    Failure,
    /// A provider-style expression evaluated at runtime.
    Expression(String),
}

impl Condition {
    /// The raw text form, as shown in execution plans.
    pub fn as_text(&self) -> String {
        match self {
            Condition::Always => "always()".to_string(),
            Condition::Success => "success()".to_string(),
            Condition::Failure => "failure()".to_string(),
            Condition::Expression(expr) => expr.clone(),
        }
    }
}

/// An artifact a step uploads or downloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    pub name: String,
    pub path: String,
}

/// The atomic unit of execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Optional id, unique within the owning job when present.
    pub id: Option<String>,
    /// Display name shown in logs and plans.
    pub name: String,
    pub kind: StepKind,
    /// Inline script text for script-like kinds.
    pub script: Option<String>,
    /// Shell used to run the script.
    pub shell: String,
    /// Step inputs ("with" block).
    pub with: HashMap<String, String>,
    /// Step-scoped environment.
    pub env: HashMap<String, String>,
    pub continue_on_error: bool,
    pub condition: Option<Condition>,
    pub working_dir: Option<String>,
    pub artifact: Option<ArtifactSpec>,
    /// Ids of steps in the same job this step needs.
    pub needs: Vec<String>,
}

impl Step {
    /// A script step with the default shell. Most parser paths funnel
    /// through this.
    pub fn script(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            kind: StepKind::Script,
            script: Some(script.into()),
            shell: "bash".to_string(),
            with: HashMap::new(),
            env: HashMap::new(),
            continue_on_error: false,
            condition: None,
            working_dir: None,
            artifact: None,
            needs: Vec::new(),
        }
    }

    pub fn with_kind(mut self, kind: StepKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

impl Default for Step {
    fn default() -> Self {
        Self::script("", "")
    }
}

/// A set of steps executed in a single runner environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique id within the pipeline.
    pub id: String,
    /// Display name; falls back to the id when the definition omits one.
    pub name: String,
    /// Runner label, e.g. `ubuntu-latest`.
    pub runs_on: String,
    pub steps: Vec<Step>,
    /// Job-scoped environment.
    pub env: HashMap<String, String>,
    /// Ids of jobs this job depends on.
    pub depends_on: Vec<String>,
    pub condition: Option<Condition>,
    /// Optional job timeout in minutes.
    pub timeout_minutes: Option<u64>,
}

impl Job {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            runs_on: "ubuntu-latest".to_string(),
            steps: Vec::new(),
            env: HashMap::new(),
            depends_on: Vec::new(),
            condition: None,
            timeout_minutes: None,
        }
    }

    /// Find a step by id or display name (case-insensitive).
    pub fn find_step(&self, name: &str) -> Option<(usize, &Step)> {
        self.steps.iter().enumerate().find(|(_, s)| {
            s.name.eq_ignore_ascii_case(name)
                || s.id.as_deref().is_some_and(|id| id.eq_ignore_ascii_case(name))
        })
    }
}

/// The top-level parsed pipeline. Immutable after parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,
    pub provider: Provider,
    /// Jobs in declaration order; ids are unique.
    pub jobs: Vec<Job>,
    /// Pipeline-level variables.
    pub variables: HashMap<String, String>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, provider: Provider) -> Self {
        Self {
            name: name.into(),
            provider,
            jobs: Vec::new(),
            variables: HashMap::new(),
        }
    }

    /// Look up a job by id.
    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    /// Look up a job by id or display name (case-insensitive).
    pub fn find_job(&self, name: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| {
            j.id.eq_ignore_ascii_case(name) || j.name.eq_ignore_ascii_case(name)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_script() {
        assert!(StepKind::Script.requires_script());
        assert!(StepKind::Bash.requires_script());
        assert!(StepKind::PowerShell.requires_script());
        assert!(!StepKind::Checkout.requires_script());
        assert!(!StepKind::Docker.requires_script());
    }

    #[test]
    fn test_find_step_case_insensitive() {
        let mut job = Job::new("build");
        job.steps.push(Step::script("Compile", "make"));
        job.steps.push(Step::script("Test", "make test").with_id("tests"));

        assert_eq!(job.find_step("compile").map(|(i, _)| i), Some(0));
        assert_eq!(job.find_step("TESTS").map(|(i, _)| i), Some(1));
        assert!(job.find_step("deploy").is_none());
    }

    #[test]
    fn test_condition_text() {
        assert_eq!(Condition::Always.as_text(), "always()");
        assert_eq!(
            Condition::Expression("${{ env.DEPLOY == 'true' }}".into()).as_text(),
            "${{ env.DEPLOY == 'true' }}"
        );
    }
}
