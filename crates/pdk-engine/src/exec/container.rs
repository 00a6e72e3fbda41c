// Container-runner step executor. The scheduler owns the job container;
// this executor runs one step's command inside it through the driver.

use async_trait::async_trait;
use pdk_core::error::{codes, PdkError, PdkResult};
use pdk_core::pipeline::StepKind;
use pdk_core::ports::{ContainerDriver, RunnerType, StepExecutor, StepRequest};
use pdk_core::StepResult;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Runs script-like steps inside the job's container.
pub struct ContainerStepExecutor {
    kind: StepKind,
    driver: Arc<dyn ContainerDriver>,
}

impl ContainerStepExecutor {
    pub fn new(kind: StepKind, driver: Arc<dyn ContainerDriver>) -> Self {
        Self { kind, driver }
    }

    /// The command line to run inside the container.
    fn command(&self, request: &StepRequest) -> PdkResult<String> {
        if let Some(script) = request.step.script.as_deref() {
            if !script.trim().is_empty() {
                return Ok(script.to_string());
            }
        }
        // Tool kinds without script text reconstruct from inputs.
        let program = match self.kind {
            StepKind::Npm => "npm",
            StepKind::Dotnet => "dotnet",
            StepKind::Python => "python3",
            StepKind::Maven => "mvn",
            StepKind::Gradle => "gradle",
            StepKind::Checkout => {
                return Ok("git status --short || true".to_string());
            }
            _ => {
                return Err(PdkError::new(
                    codes::RUNNER_STEP_FAILED,
                    format!("step '{}' has no script text", request.step.name),
                ));
            }
        };
        let command = request
            .step
            .with
            .get("command")
            .cloned()
            .unwrap_or_default();
        Ok(format!("{program} {command}").trim().to_string())
    }
}

#[async_trait]
impl StepExecutor for ContainerStepExecutor {
    fn kind(&self) -> StepKind {
        self.kind
    }

    fn runner(&self) -> RunnerType {
        RunnerType::Docker
    }

    fn name(&self) -> &str {
        "container-exec"
    }

    async fn execute(
        &self,
        request: &StepRequest,
        cancel: CancellationToken,
    ) -> PdkResult<StepResult> {
        let container_id = request.container_id.as_deref().ok_or_else(|| {
            PdkError::new(
                codes::DOCKER_COMMAND_FAILED,
                format!(
                    "step '{}' selected the container runner but no job container is running",
                    request.step.name
                ),
            )
        })?;

        let command = self.command(request)?;
        let shell = match self.kind {
            StepKind::PowerShell => "pwsh",
            _ => request.step.shell.as_str(),
        };

        let started = Instant::now();
        let exit_code = self
            .driver
            .exec(container_id, &command, shell, cancel.clone())
            .await?;

        if cancel.is_cancelled() {
            return Err(PdkError::new(
                codes::RUNNER_CANCELLED,
                format!("step '{}' was cancelled", request.step.name),
            ));
        }

        let output = self.driver.collect_output(container_id).await.unwrap_or_default();
        let duration = started.elapsed();

        let result = if exit_code == 0 {
            StepResult::success(&request.step.name, duration)
        } else {
            StepResult::failure(
                &request.step.name,
                format!(
                    "container command exited with code {exit_code} ({})",
                    pdk_core::error::exit_code_suggestion(exit_code)
                ),
                duration,
            )
        };
        Ok(result.with_exit_code(exit_code).with_output(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdk_core::pipeline::Step;
    use pdk_core::ports::DriverHealth;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    struct FakeDriver {
        exit_code: i32,
    }

    #[async_trait]
    impl ContainerDriver for FakeDriver {
        async fn health(&self) -> DriverHealth {
            DriverHealth {
                available: true,
                ..Default::default()
            }
        }
        async fn start_container(
            &self,
            _image: &str,
            _env: &HashMap<String, String>,
            _workspace: &Path,
            _cancel: CancellationToken,
        ) -> PdkResult<String> {
            Ok("c0ffee".into())
        }
        async fn exec(
            &self,
            _container_id: &str,
            _command: &str,
            _shell: &str,
            _cancel: CancellationToken,
        ) -> PdkResult<i32> {
            Ok(self.exit_code)
        }
        async fn collect_output(&self, _container_id: &str) -> PdkResult<String> {
            Ok("container output".into())
        }
        async fn stop(&self, _container_id: &str) -> PdkResult<()> {
            Ok(())
        }
    }

    fn request(container: Option<&str>) -> StepRequest {
        StepRequest {
            step: Step::script("Build", "make"),
            env: HashMap::new(),
            working_dir: PathBuf::from("/tmp"),
            workspace_dir: PathBuf::from("/tmp"),
            artifacts_dir: PathBuf::from("/tmp/.pdk/artifacts"),
            container_id: container.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_exec_success_collects_output() {
        let exec = ContainerStepExecutor::new(
            StepKind::Script,
            Arc::new(FakeDriver { exit_code: 0 }),
        );
        let result = exec
            .execute(&request(Some("c0ffee")), CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output.as_deref(), Some("container output"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails_step() {
        let exec = ContainerStepExecutor::new(
            StepKind::Script,
            Arc::new(FakeDriver { exit_code: 127 }),
        );
        let result = exec
            .execute(&request(Some("c0ffee")), CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_missing_container_is_error() {
        let exec = ContainerStepExecutor::new(
            StepKind::Script,
            Arc::new(FakeDriver { exit_code: 0 }),
        );
        let err = exec
            .execute(&request(None), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::DOCKER_COMMAND_FAILED);
    }
}
