// Artifact executors: copy workspace files into the artifacts store and
// back out again. Artifacts live under `<workspace>/.pdk/artifacts/<name>`.

use super::host::copy_tree;
use async_trait::async_trait;
use pdk_core::error::{codes, PdkError, PdkResult};
use pdk_core::pipeline::StepKind;
use pdk_core::ports::{RunnerType, StepExecutor, StepRequest};
use pdk_core::StepResult;
use std::path::PathBuf;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Name and path for an artifact step, from the artifact descriptor or
/// the `name`/`path` inputs.
fn artifact_coordinates(request: &StepRequest) -> PdkResult<(String, PathBuf)> {
    let (name, path) = match &request.step.artifact {
        Some(spec) => (spec.name.clone(), spec.path.clone()),
        None => {
            let name = request
                .step
                .with
                .get("name")
                .cloned()
                .unwrap_or_else(|| "artifact".to_string());
            let path = request
                .step
                .with
                .get("path")
                .cloned()
                .ok_or_else(|| {
                    PdkError::new(
                        codes::RUNNER_STEP_FAILED,
                        format!("artifact step '{}' has no path input", request.step.name),
                    )
                })?;
            (name, path)
        }
    };
    let resolved = if PathBuf::from(&path).is_absolute() {
        PathBuf::from(&path)
    } else {
        request.working_dir.join(&path)
    };
    Ok((name, resolved))
}

/// Copies workspace files into the artifacts directory.
pub struct UploadArtifactExecutor;

impl UploadArtifactExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for UploadArtifactExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepExecutor for UploadArtifactExecutor {
    fn kind(&self) -> StepKind {
        StepKind::UploadArtifact
    }

    fn runner(&self) -> RunnerType {
        RunnerType::Host
    }

    fn name(&self) -> &str {
        "upload-artifact"
    }

    async fn execute(
        &self,
        request: &StepRequest,
        _cancel: CancellationToken,
    ) -> PdkResult<StepResult> {
        let started = Instant::now();
        let (name, source) = artifact_coordinates(request)?;
        let target = request.artifacts_dir.join(&name);

        if !source.exists() {
            return Ok(StepResult::failure(
                &request.step.name,
                format!("artifact path {} does not exist", source.display()),
                started.elapsed(),
            ));
        }

        match copy_tree(&source, &target) {
            Ok(count) => Ok(StepResult::success(&request.step.name, started.elapsed())
                .with_output(format!(
                    "uploaded {count} file(s) to artifact '{name}'"
                ))),
            Err(e) => Err(PdkError::new(
                pdk_core::error::codes::FILE_IO,
                format!("failed to store artifact '{name}': {e}"),
            )),
        }
    }
}

/// Copies a stored artifact back into the workspace.
pub struct DownloadArtifactExecutor;

impl DownloadArtifactExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DownloadArtifactExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepExecutor for DownloadArtifactExecutor {
    fn kind(&self) -> StepKind {
        StepKind::DownloadArtifact
    }

    fn runner(&self) -> RunnerType {
        RunnerType::Host
    }

    fn name(&self) -> &str {
        "download-artifact"
    }

    async fn execute(
        &self,
        request: &StepRequest,
        _cancel: CancellationToken,
    ) -> PdkResult<StepResult> {
        let started = Instant::now();
        let (name, target) = artifact_coordinates(request)?;
        let source = request.artifacts_dir.join(&name);

        if !source.exists() {
            return Ok(StepResult::failure(
                &request.step.name,
                format!("artifact '{name}' has not been uploaded"),
                started.elapsed(),
            ));
        }

        match copy_tree(&source, &target) {
            Ok(count) => Ok(StepResult::success(&request.step.name, started.elapsed())
                .with_output(format!(
                    "downloaded {count} file(s) from artifact '{name}'"
                ))),
            Err(e) => Err(PdkError::new(
                pdk_core::error::codes::FILE_IO,
                format!("failed to restore artifact '{name}': {e}"),
            )),
        }
    }
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
    async fn test_upload_then_download_round_trip() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("dist")).unwrap();
        std::fs::write(dir.path().join("dist/app.bin"), "binary").unwrap();

        let mut up = Step::script("upload", "").with_kind(StepKind::UploadArtifact);
        up.with.insert("name".into(), "dist".into());
        up.with.insert("path".into(), "dist".into());
        let result = UploadArtifactExecutor::new()
            .execute(&request(up, &dir), CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success, "{:?}", result.error);
        assert!(dir.path().join(".pdk/artifacts/dist/app.bin").exists());

        let mut down = Step::script("download", "").with_kind(StepKind::DownloadArtifact);
        down.with.insert("name".into(), "dist".into());
        down.with.insert("path".into(), "restored".into());
        let result = DownloadArtifactExecutor::new()
            .execute(&request(down, &dir), CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("restored/app.bin")).unwrap(),
            "binary"
        );
    }

    #[tokio::test]
    async fn test_missing_artifact_fails_step_not_run() {
        let dir = TempDir::new().unwrap();
        let mut down = Step::script("download", "").with_kind(StepKind::DownloadArtifact);
        down.with.insert("name".into(), "ghost".into());
        down.with.insert("path".into(), "out".into());
        let result = DownloadArtifactExecutor::new()
            .execute(&request(down, &dir), CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_upload_without_path_is_error() {
        let dir = TempDir::new().unwrap();
        let up = Step::script("upload", "").with_kind(StepKind::UploadArtifact);
        let err = UploadArtifactExecutor::new()
            .execute(&request(up, &dir), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::RUNNER_STEP_FAILED);
    }
}
