// Step executors and their registry. The registry is keyed by
// (step kind, runner type) and doubles as the executor-validator port
// consulted by the dry-run executor phase.

pub mod artifact;
pub mod container;
pub mod host;

use pdk_core::pipeline::StepKind;
use pdk_core::ports::{ContainerDriver, ExecutorValidator, RunnerType, StepExecutor};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of step executors keyed by (kind, runner).
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<(StepKind, RunnerType), Arc<dyn StepExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under its declared (kind, runner) key.
    pub fn register(&mut self, executor: Arc<dyn StepExecutor>) {
        self.executors
            .insert((executor.kind(), executor.runner()), executor);
    }

    /// Look up an executor. Kinds without a container variant (artifact
    /// transfers, file operations) fall back to their host executor,
    /// which works against the bind-mounted workspace.
    pub fn get(&self, kind: StepKind, runner: RunnerType) -> Option<Arc<dyn StepExecutor>> {
        self.executors
            .get(&(kind, runner))
            .or_else(|| match runner {
                RunnerType::Docker => self.executors.get(&(kind, RunnerType::Host)),
                RunnerType::Host => None,
            })
            .cloned()
    }

    /// The standard executor set: every known kind on the host runner,
    /// and container-exec variants for the script-like kinds.
    pub fn standard(driver: Arc<dyn ContainerDriver>) -> Self {
        let mut registry = Self::new();

        // Script-like kinds on the host.
        registry.register(Arc::new(host::HostScriptExecutor::new(StepKind::Script)));
        registry.register(Arc::new(host::HostScriptExecutor::new(StepKind::Bash)));
        registry.register(Arc::new(host::HostScriptExecutor::new(StepKind::PowerShell)));

        // Tool wrappers on the host.
        for (kind, program) in [
            (StepKind::Npm, "npm"),
            (StepKind::Dotnet, "dotnet"),
            (StepKind::Python, "python3"),
            (StepKind::Maven, "mvn"),
            (StepKind::Gradle, "gradle"),
            (StepKind::Docker, "docker"),
        ] {
            registry.register(Arc::new(host::ToolExecutor::new(kind, program)));
        }

        registry.register(Arc::new(host::CheckoutExecutor::new()));
        registry.register(Arc::new(host::FileOperationExecutor::new()));
        registry.register(Arc::new(artifact::UploadArtifactExecutor::new()));
        registry.register(Arc::new(artifact::DownloadArtifactExecutor::new()));

        // Container variants run through the driver.
        for kind in [
            StepKind::Script,
            StepKind::Bash,
            StepKind::PowerShell,
            StepKind::Npm,
            StepKind::Dotnet,
            StepKind::Python,
            StepKind::Maven,
            StepKind::Gradle,
            StepKind::Checkout,
        ] {
            registry.register(Arc::new(container::ContainerStepExecutor::new(
                kind,
                Arc::clone(&driver),
            )));
        }

        registry
    }
}

impl ExecutorValidator for ExecutorRegistry {
    fn has_executor(&self, kind: StepKind, runner: RunnerType) -> bool {
        self.get(kind, runner).is_some()
    }

    fn executor_name(&self, kind: StepKind, runner: RunnerType) -> Option<String> {
        self.get(kind, runner).map(|e| e.name().to_string())
    }

    fn available_step_kinds(&self, runner: RunnerType) -> Vec<StepKind> {
        let mut kinds: Vec<StepKind> = self
            .executors
            .keys()
            .filter(|(k, r)| *r == runner || self.get(*k, runner).is_some())
            .map(|(k, _)| *k)
            .collect();
        kinds.sort_by_key(|k| k.to_string());
        kinds.dedup();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pdk_core::error::PdkResult;
    use pdk_core::ports::DriverHealth;
    use std::path::Path;
    use tokio_util::sync::CancellationToken;

    struct NullDriver;

    #[async_trait]
    impl ContainerDriver for NullDriver {
        async fn health(&self) -> DriverHealth {
            DriverHealth::default()
        }
        async fn start_container(
            &self,
            _image: &str,
            _env: &HashMap<String, String>,
            _workspace: &Path,
            _cancel: CancellationToken,
        ) -> PdkResult<String> {
            Ok("null".into())
        }
        async fn exec(
            &self,
            _container_id: &str,
            _command: &str,
            _shell: &str,
            _cancel: CancellationToken,
        ) -> PdkResult<i32> {
            Ok(0)
        }
        async fn collect_output(&self, _container_id: &str) -> PdkResult<String> {
            Ok(String::new())
        }
        async fn stop(&self, _container_id: &str) -> PdkResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_standard_registry_covers_known_kinds_on_host() {
        let registry = ExecutorRegistry::standard(Arc::new(NullDriver));
        for kind in StepKind::known_kinds() {
            assert!(
                registry.has_executor(*kind, RunnerType::Host),
                "missing host executor for {kind}"
            );
        }
        assert!(!registry.has_executor(StepKind::Unknown, RunnerType::Host));
    }

    #[test]
    fn test_validator_surface() {
        let registry = ExecutorRegistry::standard(Arc::new(NullDriver));
        assert!(registry
            .executor_name(StepKind::Script, RunnerType::Host)
            .is_some());
        let kinds = registry.available_step_kinds(RunnerType::Docker);
        assert!(kinds.contains(&StepKind::Script));
        // Artifact transfers fall back to their host executors.
        assert!(kinds.contains(&StepKind::UploadArtifact));
        assert!(registry.has_executor(StepKind::FileOperation, RunnerType::Docker));
    }
}
