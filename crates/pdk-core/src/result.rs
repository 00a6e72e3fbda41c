// Execution result records produced by the scheduler. Owned values;
// nothing here borrows into the pipeline IR.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of a single step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Captured (masked) output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// True when the step did not run (filtered or condition false).
    pub skipped: bool,
    /// Why the step was skipped, when it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl StepResult {
    pub fn success(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            success: true,
            error: None,
            duration,
            exit_code: Some(0),
            output: None,
            skipped: false,
            note: None,
        }
    }

    pub fn failure(name: impl Into<String>, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            success: false,
            error: Some(error.into()),
            duration,
            exit_code: None,
            output: None,
            skipped: false,
            note: None,
        }
    }

    /// A step that was not executed. Reported as successful so it never
    /// fails the job.
    pub fn skipped(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            success: true,
            error: None,
            duration: Duration::ZERO,
            exit_code: None,
            output: None,
            skipped: true,
            note: Some(reason.into()),
        }
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }
}

/// Outcome of a job: its own status plus every child step result, in
/// declared step order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration: Duration,
    pub steps: Vec<StepResult>,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl JobResult {
    pub fn skipped(job_id: impl Into<String>, name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            name: name.into(),
            success: true,
            error: None,
            duration: Duration::ZERO,
            steps: Vec::new(),
            skipped: true,
            note: Some(reason.into()),
        }
    }
}

/// Aggregate outcome of one pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub pipeline: String,
    pub success: bool,
    pub duration: Duration,
    /// True when the invocation was cancelled before completion.
    #[serde(default)]
    pub cancelled: bool,
    pub jobs: Vec<JobResult>,
}

impl PipelineResult {
    pub fn executed_steps(&self) -> usize {
        self.jobs
            .iter()
            .flat_map(|j| &j.steps)
            .filter(|s| !s.skipped)
            .count()
    }

    pub fn failed_jobs(&self) -> impl Iterator<Item = &JobResult> {
        self.jobs.iter().filter(|j| !j.success)
    }
}
