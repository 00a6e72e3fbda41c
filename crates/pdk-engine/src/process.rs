// Host subprocess runner. Spawns a child, streams stdout/stderr line by
// line, and supports cooperative cancellation: SIGTERM, a bounded grace
// wait, then SIGKILL.

use pdk_core::error::{codes, PdkError, PdkResult};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Captured outcome of one subprocess.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub cancelled: bool,
}

impl ProcessOutput {
    /// Stdout and stderr interleaved as captured, stdout first.
    pub fn combined(&self) -> String {
        let mut lines = self.stdout.clone();
        lines.extend(self.stderr.clone());
        lines.join("\n")
    }
}

/// Run a program to completion or cancellation.
///
/// Output lines are traced as they arrive (the logging layer masks them)
/// and captured for the step result. On cancellation the child gets a
/// termination signal, `grace` to exit, then a hard kill.
pub async fn run_process(
    working_dir: &Path,
    program: &str,
    args: &[String],
    env: &HashMap<String, String>,
    cancel: CancellationToken,
    grace: Duration,
) -> PdkResult<ProcessOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if working_dir.is_dir() {
        cmd.current_dir(working_dir);
    }
    for (key, value) in env {
        cmd.env(key, value);
    }
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.stdin(Stdio::null());
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|e| {
        let code = if e.kind() == std::io::ErrorKind::NotFound {
            codes::RUNNER_NO_EXECUTOR
        } else {
            codes::RUNNER_STEP_FAILED
        };
        PdkError::new(code, format!("failed to start '{program}': {e}"))
            .with_suggestion(pdk_core::error::exit_code_suggestion(127))
    })?;

    let pid = child.id();

    let stdout = child.stdout.take();
    let stdout_task = tokio::spawn(async move {
        let mut lines = Vec::new();
        if let Some(stdout) = stdout {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                tracing::info!(target: "step", "{}", line);
                lines.push(line);
            }
        }
        lines
    });

    let stderr = child.stderr.take();
    let stderr_task = tokio::spawn(async move {
        let mut lines = Vec::new();
        if let Some(stderr) = stderr {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                tracing::warn!(target: "step", "{}", line);
                lines.push(line);
            }
        }
        lines
    });

    let (exit_code, cancelled) = tokio::select! {
        status = child.wait() => {
            let status = status.map_err(|e| {
                PdkError::new(codes::RUNNER_STEP_FAILED, format!("failed to wait for '{program}': {e}"))
            })?;
            (exit_status_code(&status), false)
        }
        _ = cancel.cancelled() => {
            tracing::debug!(target: "step", pid, "cancellation requested, terminating child");
            let code = terminate(&mut child, grace).await;
            (code, true)
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    Ok(ProcessOutput {
        exit_code,
        stdout,
        stderr,
        cancelled,
    })
}

/// Signal the child to stop, wait up to `grace`, then kill.
async fn terminate(child: &mut tokio::process::Child, grace: Duration) -> i32 {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        if let Some(pid) = child.id() {
            let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
        if let Ok(Ok(status)) = tokio::time::timeout(grace, child.wait()).await {
            return exit_status_code(&status);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = grace;
    }

    let _ = child.kill().await;
    child
        .wait()
        .await
        .map(|s| exit_status_code(&s))
        .unwrap_or(-1)
}

fn exit_status_code(status: &std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    // Killed by a signal: report 128 + signo the way shells do.
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn cwd() -> PathBuf {
        std::env::current_dir().unwrap()
    }

    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let out = run_process(
            &cwd(),
            "sh",
            &["-c".to_string(), "echo one; echo two".to_string()],
            &HashMap::new(),
            CancellationToken::new(),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.stdout, vec!["one", "two"]);
        assert!(!out.cancelled);
    }

    #[tokio::test]
    async fn test_nonzero_exit_reported_not_error() {
        let out = run_process(
            &cwd(),
            "sh",
            &["-c".to_string(), "exit 7".to_string()],
            &HashMap::new(),
            CancellationToken::new(),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(out.exit_code, 7);
    }

    #[tokio::test]
    async fn test_missing_program_is_structured_error() {
        let err = run_process(
            &cwd(),
            "definitely-not-a-real-binary-pdk",
            &[],
            &HashMap::new(),
            CancellationToken::new(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, codes::RUNNER_NO_EXECUTOR);
    }

    #[tokio::test]
    async fn test_environment_passed_through() {
        let mut env = HashMap::new();
        env.insert("PDK_TEST_VALUE".to_string(), "42".to_string());
        let out = run_process(
            &cwd(),
            "sh",
            &["-c".to_string(), "echo $PDK_TEST_VALUE".to_string()],
            &env,
            CancellationToken::new(),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(out.stdout, vec!["42"]);
    }

    #[tokio::test]
    async fn test_cancellation_terminates_child() {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel_clone.cancel();
        });

        let start = std::time::Instant::now();
        let out = run_process(
            &cwd(),
            "sh",
            &["-c".to_string(), "sleep 30".to_string()],
            &HashMap::new(),
            cancel,
            Duration::from_secs(2),
        )
        .await
        .unwrap();
        assert!(out.cancelled);
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
