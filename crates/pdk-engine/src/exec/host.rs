// Host-runner step executors: scripts through the shell, tool wrappers,
// checkout, and file operations.

use crate::process::run_process;
use async_trait::async_trait;
use pdk_core::constants::CANCELLATION_GRACE_SECS;
use pdk_core::error::{codes, exit_code_suggestion, PdkError, PdkResult};
use pdk_core::pipeline::StepKind;
use pdk_core::ports::{RunnerType, StepExecutor, StepRequest};
use pdk_core::StepResult;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn grace() -> Duration {
    Duration::from_secs(CANCELLATION_GRACE_SECS)
}

/// Resolve the directory a step runs in.
fn effective_dir(request: &StepRequest) -> PathBuf {
    match request.step.working_dir.as_deref() {
        Some(dir) if !dir.trim().is_empty() => {
            let p = Path::new(dir);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                request.working_dir.join(p)
            }
        }
        _ => request.working_dir.clone(),
    }
}

/// Build a `StepResult` from a finished process.
fn result_from_process(
    name: &str,
    out: crate::process::ProcessOutput,
    started: Instant,
) -> PdkResult<StepResult> {
    let duration = started.elapsed();
    if out.cancelled {
        return Err(PdkError::new(
            codes::RUNNER_CANCELLED,
            format!("step '{name}' was cancelled"),
        ));
    }
    let mut result = if out.exit_code == 0 {
        StepResult::success(name, duration)
    } else {
        StepResult::failure(
            name,
            format!("process exited with code {}", out.exit_code),
            duration,
        )
    };
    result = result.with_exit_code(out.exit_code).with_output(out.combined());
    Ok(result)
}

// ---------------------------------------------------------------------------
// Scripts
// ---------------------------------------------------------------------------

/// Runs inline script text through the step's shell.
pub struct HostScriptExecutor {
    kind: StepKind,
}

impl HostScriptExecutor {
    pub fn new(kind: StepKind) -> Self {
        Self { kind }
    }

    fn shell_invocation(&self, shell: &str, script: &str) -> (String, Vec<String>) {
        match shell {
            "pwsh" | "powershell" => (
                shell.to_string(),
                vec!["-Command".to_string(), script.to_string()],
            ),
            "sh" => (
                "sh".to_string(),
                vec!["-ec".to_string(), script.to_string()],
            ),
            _ => (
                "bash".to_string(),
                vec!["-eo".to_string(), "pipefail".to_string(), "-c".to_string(), script.to_string()],
            ),
        }
    }
}

#[async_trait]
impl StepExecutor for HostScriptExecutor {
    fn kind(&self) -> StepKind {
        self.kind
    }

    fn runner(&self) -> RunnerType {
        RunnerType::Host
    }

    fn name(&self) -> &str {
        "host-script"
    }

    async fn execute(
        &self,
        request: &StepRequest,
        cancel: CancellationToken,
    ) -> PdkResult<StepResult> {
        let script = request.step.script.as_deref().unwrap_or_default();
        if script.trim().is_empty() {
            return Err(PdkError::new(
                codes::RUNNER_STEP_FAILED,
                format!("step '{}' has no script text", request.step.name),
            ));
        }

        let shell = match self.kind {
            StepKind::PowerShell => "pwsh",
            StepKind::Bash => "bash",
            _ => request.step.shell.as_str(),
        };
        let (program, args) = self.shell_invocation(shell, script);

        let started = Instant::now();
        let out = run_process(
            &effective_dir(request),
            &program,
            &args,
            &request.env,
            cancel,
            grace(),
        )
        .await?;

        let mut result = result_from_process(&request.step.name, out, started)?;
        if !result.success {
            if let Some(code) = result.exit_code {
                result.error = Some(format!(
                    "{} ({})",
                    result.error.as_deref().unwrap_or("process failed"),
                    exit_code_suggestion(code)
                ));
            }
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tool wrappers
// ---------------------------------------------------------------------------

/// Runs a fixed tool (npm, dotnet, ...) with arguments from the step's
/// `command`/`args` inputs or its script text.
pub struct ToolExecutor {
    kind: StepKind,
    program: &'static str,
}

impl ToolExecutor {
    pub fn new(kind: StepKind, program: &'static str) -> Self {
        Self { kind, program }
    }

    fn arguments(&self, request: &StepRequest) -> Vec<String> {
        if let Some(command) = request.step.with.get("command") {
            let mut args: Vec<String> =
                command.split_whitespace().map(str::to_string).collect();
            if let Some(extra) = request.step.with.get("args") {
                args.extend(extra.split_whitespace().map(str::to_string));
            }
            return args;
        }
        if let Some(script) = request.step.script.as_deref() {
            // Script text after the tool name, e.g. "npm ci" -> ["ci"].
            let trimmed = script.trim();
            let rest = trimmed
                .strip_prefix(self.program)
                .unwrap_or(trimmed)
                .trim();
            return rest.split_whitespace().map(str::to_string).collect();
        }
        Vec::new()
    }
}

#[async_trait]
impl StepExecutor for ToolExecutor {
    fn kind(&self) -> StepKind {
        self.kind
    }

    fn runner(&self) -> RunnerType {
        RunnerType::Host
    }

    fn name(&self) -> &str {
        self.program
    }

    async fn execute(
        &self,
        request: &StepRequest,
        cancel: CancellationToken,
    ) -> PdkResult<StepResult> {
        let args = self.arguments(request);
        let started = Instant::now();
        let out = run_process(
            &effective_dir(request),
            self.program,
            &args,
            &request.env,
            cancel,
            grace(),
        )
        .await?;
        result_from_process(&request.step.name, out, started)
    }
}

// ---------------------------------------------------------------------------
// Checkout
// ---------------------------------------------------------------------------

/// Checkout on the host: clone when a repository input is present,
/// otherwise verify the workspace is already a working copy.
pub struct CheckoutExecutor;

impl CheckoutExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CheckoutExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepExecutor for CheckoutExecutor {
    fn kind(&self) -> StepKind {
        StepKind::Checkout
    }

    fn runner(&self) -> RunnerType {
        RunnerType::Host
    }

    fn name(&self) -> &str {
        "checkout"
    }

    async fn execute(
        &self,
        request: &StepRequest,
        cancel: CancellationToken,
    ) -> PdkResult<StepResult> {
        let started = Instant::now();

        if let Some(repository) = request.step.with.get("repository") {
            let url = if repository.contains("://") || repository.contains('@') {
                repository.clone()
            } else {
                format!("https://github.com/{repository}")
            };
            let mut args = vec!["clone".to_string(), "--depth".to_string(), "1".to_string()];
            if let Some(reference) = request.step.with.get("ref") {
                args.push("--branch".to_string());
                args.push(reference.clone());
            }
            args.push(url);
            args.push(".".to_string());

            let out = run_process(
                &request.working_dir,
                "git",
                &args,
                &request.env,
                cancel,
                grace(),
            )
            .await?;
            return result_from_process(&request.step.name, out, started);
        }

        // Local run: the workspace already is the checkout.
        let result = StepResult::success(&request.step.name, started.elapsed())
            .with_output("using existing workspace checkout".to_string());
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// File operations
// ---------------------------------------------------------------------------

/// Copy / move / delete / mkdir driven by step inputs.
pub struct FileOperationExecutor;

impl FileOperationExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FileOperationExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepExecutor for FileOperationExecutor {
    fn kind(&self) -> StepKind {
        StepKind::FileOperation
    }

    fn runner(&self) -> RunnerType {
        RunnerType::Host
    }

    fn name(&self) -> &str {
        "file-operation"
    }

    async fn execute(
        &self,
        request: &StepRequest,
        _cancel: CancellationToken,
    ) -> PdkResult<StepResult> {
        let started = Instant::now();
        let dir = effective_dir(request);

        let operation = request
            .step
            .with
            .get("operation")
            .map(String::as_str)
            .unwrap_or("copy");
        let source = request.step.with.get("source").map(|s| dir.join(s));
        let target = request.step.with.get("target").map(|s| dir.join(s));

        let outcome = match (operation, source, target) {
            ("mkdir", _, Some(target)) => {
                std::fs::create_dir_all(&target).map(|_| format!("created {}", target.display()))
            }
            ("delete", Some(source), _) => {
                if source.is_dir() {
                    std::fs::remove_dir_all(&source)
                } else {
                    std::fs::remove_file(&source)
                }
                .map(|_| format!("deleted {}", source.display()))
            }
            ("copy", Some(source), Some(target)) => copy_tree(&source, &target)
                .map(|n| format!("copied {n} files to {}", target.display())),
            ("move", Some(source), Some(target)) => {
                std::fs::rename(&source, &target)
                    .map(|_| format!("moved to {}", target.display()))
            }
            (op, _, _) => {
                return Err(PdkError::new(
                    codes::RUNNER_STEP_FAILED,
                    format!(
                        "file operation '{op}' is missing required inputs (operation/source/target)"
                    ),
                ));
            }
        };

        match outcome {
            Ok(note) => {
                Ok(StepResult::success(&request.step.name, started.elapsed()).with_output(note))
            }
            Err(e) => Ok(StepResult::failure(
                &request.step.name,
                format!("file operation failed: {e}"),
                started.elapsed(),
            )),
        }
    }
}

/// Recursively copy a file or directory. Returns the file count.
pub(crate) fn copy_tree(source: &Path, target: &Path) -> std::io::Result<usize> {
    if source.is_file() {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(source, target)?;
        return Ok(1);
    }

    let mut count = 0;
    for entry in walkdir::WalkDir::new(source) {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(std::io::Error::other)?;
        let dest = target.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &dest)?;
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdk_core::pipeline::Step;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn request(step: Step, dir: &TempDir) -> StepRequest {
        StepRequest {
            step,
            env: HashMap::new(),
            working_dir: dir.path().to_path_buf(),
            workspace_dir: dir.path().to_path_buf(),
            artifacts_dir: dir.path().join(".pdk/artifacts"),
            container_id: None,
        }
    }

    #[tokio::test]
    async fn test_script_executor_success() {
        let dir = TempDir::new().unwrap();
        let step = Step::script("hello", "echo hello world");
        let exec = HostScriptExecutor::new(StepKind::Script);
        let result = exec
            .execute(&request(step, &dir), CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.exit_code, Some(0));
        assert!(result.output.unwrap().contains("hello world"));
    }

    #[tokio::test]
    async fn test_script_executor_failure_carries_exit_code() {
        let dir = TempDir::new().unwrap();
        let step = Step::script("fail", "exit 3");
        let exec = HostScriptExecutor::new(StepKind::Script);
        let result = exec
            .execute(&request(step, &dir), CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_script_executor_respects_working_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let mut step = Step::script("pwd", "pwd");
        step.working_dir = Some("sub".to_string());
        let exec = HostScriptExecutor::new(StepKind::Script);
        let result = exec
            .execute(&request(step, &dir), CancellationToken::new())
            .await
            .unwrap();
        assert!(result.output.unwrap().contains("sub"));
    }

    #[tokio::test]
    async fn test_checkout_without_repository_is_noop() {
        let dir = TempDir::new().unwrap();
        let step = Step::script("Checkout", "").with_kind(StepKind::Checkout);
        let exec = CheckoutExecutor::new();
        let result = exec
            .execute(&request(step, &dir), CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_file_operation_mkdir_and_copy() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "data").unwrap();

        let mut step = Step::script("copy", "").with_kind(StepKind::FileOperation);
        step.with.insert("operation".into(), "copy".into());
        step.with.insert("source".into(), "a.txt".into());
        step.with.insert("target".into(), "out/b.txt".into());

        let exec = FileOperationExecutor::new();
        let result = exec
            .execute(&request(step, &dir), CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out/b.txt")).unwrap(),
            "data"
        );
    }

    #[test]
    fn test_tool_executor_arguments() {
        let dir = TempDir::new().unwrap();
        let mut step = Step::script("npm install", "npm ci").with_kind(StepKind::Npm);
        let exec = ToolExecutor::new(StepKind::Npm, "npm");
        assert_eq!(exec.arguments(&request(step.clone(), &dir)), vec!["ci"]);

        step.with.insert("command".into(), "run build".into());
        assert_eq!(
            exec.arguments(&request(step, &dir)),
            vec!["run", "build"]
        );
    }
}
