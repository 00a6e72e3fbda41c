// Docker CLI container driver. Wraps the `docker` binary behind the
// ContainerDriver port: health probe, container lifecycle, and in-place
// command execution with the workspace bind-mounted.

use crate::process::run_process;
use async_trait::async_trait;
use pdk_core::error::{codes, PdkError, PdkResult};
use pdk_core::ports::{ContainerDriver, DriverHealth};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const CONTAINER_WORKSPACE: &str = "/workspace";

/// Container driver backed by the Docker CLI.
pub struct DockerCliDriver {
    docker_path: String,
}

impl DockerCliDriver {
    pub fn new() -> Self {
        Self {
            docker_path: "docker".to_string(),
        }
    }

    pub fn with_path(docker_path: impl Into<String>) -> Self {
        Self {
            docker_path: docker_path.into(),
        }
    }

    async fn docker(
        &self,
        args: Vec<String>,
        cancel: CancellationToken,
    ) -> PdkResult<crate::process::ProcessOutput> {
        run_process(
            Path::new("."),
            &self.docker_path,
            &args,
            &HashMap::new(),
            cancel,
            Duration::from_secs(10),
        )
        .await
    }

    fn command_error(action: &str, out: &crate::process::ProcessOutput) -> PdkError {
        PdkError::new(
            codes::DOCKER_COMMAND_FAILED,
            format!(
                "docker {action} failed with exit code {}: {}",
                out.exit_code,
                out.stderr.join(" ")
            ),
        )
        .with_suggestion("Run `pdk doctor` to check the container environment")
    }
}

impl Default for DockerCliDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerDriver for DockerCliDriver {
    async fn health(&self) -> DriverHealth {
        let args = vec![
            "version".to_string(),
            "--format".to_string(),
            "{{.Server.Version}}|{{.Server.Os}}/{{.Server.Arch}}".to_string(),
        ];
        match self.docker(args, CancellationToken::new()).await {
            Ok(out) if out.exit_code == 0 => {
                let line = out.stdout.first().cloned().unwrap_or_default();
                let (version, platform) = match line.split_once('|') {
                    Some((v, p)) => (Some(v.to_string()), Some(p.to_string())),
                    None => (Some(line), None),
                };
                DriverHealth {
                    available: true,
                    version,
                    platform,
                    error: None,
                }
            }
            Ok(out) => DriverHealth {
                available: false,
                version: None,
                platform: None,
                error: Some(out.stderr.join(" ")),
            },
            Err(e) => DriverHealth {
                available: false,
                version: None,
                platform: None,
                error: Some(e.to_string()),
            },
        }
    }

    async fn start_container(
        &self,
        image: &str,
        env: &HashMap<String, String>,
        workspace: &Path,
        cancel: CancellationToken,
    ) -> PdkResult<String> {
        let mut args = vec![
            "run".to_string(),
            "--detach".to_string(),
            "--rm".to_string(),
            "--workdir".to_string(),
            CONTAINER_WORKSPACE.to_string(),
            "--volume".to_string(),
            format!("{}:{}", workspace.display(), CONTAINER_WORKSPACE),
        ];
        for (key, value) in env {
            args.push("--env".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push("--entrypoint".to_string());
        args.push("tail".to_string());
        args.push(image.to_string());
        // Keep the container alive; steps exec into it.
        args.push("-f".to_string());
        args.push("/dev/null".to_string());

        let out = self.docker(args, cancel).await?;
        if out.exit_code != 0 {
            let stderr = out.stderr.join(" ");
            if stderr.contains("pull") || stderr.contains("manifest") {
                return Err(PdkError::new(
                    codes::DOCKER_PULL_FAILED,
                    format!("failed to pull image '{image}': {stderr}"),
                )
                .with_suggestion("Check the image name and registry connectivity"));
            }
            return Err(Self::command_error("run", &out));
        }

        let container_id = out
            .stdout
            .first()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Self::command_error("run", &out))?;
        tracing::debug!(target: "docker", container_id, image, "container started");
        Ok(container_id)
    }

    async fn exec(
        &self,
        container_id: &str,
        command: &str,
        shell: &str,
        cancel: CancellationToken,
    ) -> PdkResult<i32> {
        let (shell_bin, shell_flag) = match shell {
            "pwsh" | "powershell" => ("pwsh", "-Command"),
            "sh" => ("sh", "-ec"),
            _ => ("bash", "-ec"),
        };
        let args = vec![
            "exec".to_string(),
            container_id.to_string(),
            shell_bin.to_string(),
            shell_flag.to_string(),
            command.to_string(),
        ];
        let out = self.docker(args, cancel).await?;
        Ok(out.exit_code)
    }

    async fn collect_output(&self, container_id: &str) -> PdkResult<String> {
        let args = vec!["logs".to_string(), container_id.to_string()];
        let out = self.docker(args, CancellationToken::new()).await?;
        Ok(out.combined())
    }

    async fn stop(&self, container_id: &str) -> PdkResult<()> {
        let args = vec![
            "stop".to_string(),
            "--time".to_string(),
            "5".to_string(),
            container_id.to_string(),
        ];
        let out = self.docker(args, CancellationToken::new()).await?;
        if out.exit_code != 0 {
            tracing::warn!(
                target: "docker",
                container_id,
                "docker stop exited with {}",
                out.exit_code
            );
        }
        Ok(())
    }
}
