// External port surfaces. The engine depends on these traits only;
// concrete parsers, executors, and container drivers plug in behind them.

use crate::error::PdkResult;
use crate::pipeline::{Pipeline, Step, StepKind};
use crate::result::StepResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// The concrete environment a step executor targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunnerType {
    Host,
    Docker,
}

impl std::fmt::Display for RunnerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerType::Host => write!(f, "host"),
            RunnerType::Docker => write!(f, "docker"),
        }
    }
}

// ---------------------------------------------------------------------------
// Parser port
// ---------------------------------------------------------------------------

/// Turns provider-specific pipeline text into the provider-agnostic IR.
pub trait PipelineParser: Send + Sync {
    /// Parse pipeline text.
    fn parse(&self, text: &str) -> PdkResult<Pipeline>;

    /// Parse a pipeline file.
    fn parse_file(&self, path: &Path) -> PdkResult<Pipeline>;

    /// Whether this parser recognises the given path.
    fn can_parse(&self, path: &Path) -> bool;
}

// ---------------------------------------------------------------------------
// Step executor port
// ---------------------------------------------------------------------------

/// Everything an executor needs for one step, already expanded and ready
/// to run. Built by the step loop.
#[derive(Debug, Clone)]
pub struct StepRequest {
    /// The step with expanded script/inputs/env.
    pub step: Step,
    /// Merged, expanded environment for the process or container.
    pub env: HashMap<String, String>,
    pub working_dir: PathBuf,
    pub workspace_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    /// Container the step runs in, when the docker variant is selected.
    pub container_id: Option<String>,
}

/// An implementation that knows how to perform one step kind on one
/// runner variant.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// The step kind this executor handles.
    fn kind(&self) -> StepKind;

    /// The runner variant this executor targets.
    fn runner(&self) -> RunnerType;

    /// Human-readable executor name for plans and diagnostics.
    fn name(&self) -> &str;

    /// Run the step to completion or cancellation.
    async fn execute(&self, request: &StepRequest, cancel: CancellationToken)
        -> PdkResult<StepResult>;
}

// ---------------------------------------------------------------------------
// Executor validator port
// ---------------------------------------------------------------------------

/// Answers "can this step kind run on this runner type" without executing
/// anything. The dry-run executor phase consults this.
pub trait ExecutorValidator: Send + Sync {
    fn has_executor(&self, kind: StepKind, runner: RunnerType) -> bool;

    fn executor_name(&self, kind: StepKind, runner: RunnerType) -> Option<String>;

    fn available_step_kinds(&self, runner: RunnerType) -> Vec<StepKind>;
}

// ---------------------------------------------------------------------------
// Container driver port
// ---------------------------------------------------------------------------

/// Health report from the container driver.
#[derive(Debug, Clone, Default)]
pub struct DriverHealth {
    pub available: bool,
    pub version: Option<String>,
    pub platform: Option<String>,
    pub error: Option<String>,
}

/// The container runtime behind `docker` mode.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Probe driver availability. Never fails; unavailability is reported
    /// in the result.
    async fn health(&self) -> DriverHealth;

    /// Start a container and return its id.
    async fn start_container(
        &self,
        image: &str,
        env: &HashMap<String, String>,
        workspace: &Path,
        cancel: CancellationToken,
    ) -> PdkResult<String>;

    /// Run a command inside a container; returns the exit code.
    async fn exec(
        &self,
        container_id: &str,
        command: &str,
        shell: &str,
        cancel: CancellationToken,
    ) -> PdkResult<i32>;

    /// Collect accumulated output from a container.
    async fn collect_output(&self, container_id: &str) -> PdkResult<String>;

    /// Stop and remove a container.
    async fn stop(&self, container_id: &str) -> PdkResult<()>;
}
