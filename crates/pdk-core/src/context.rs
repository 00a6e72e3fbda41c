// Per-invocation run context. Created once per `run`/`watch` invocation
// and owned by the scheduler.

use crate::masker::SecretMasker;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Log verbosity for an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Silent,
    Quiet,
    #[default]
    Normal,
    Verbose,
    Trace,
}

/// Which execution environment the user asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunnerMode {
    /// Run steps directly on this machine.
    Host,
    /// Require the container driver.
    Docker,
    /// Docker when the driver is healthy, host otherwise.
    #[default]
    Auto,
}

impl std::fmt::Display for RunnerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerMode::Host => write!(f, "host"),
            RunnerMode::Docker => write!(f, "docker"),
            RunnerMode::Auto => write!(f, "auto"),
        }
    }
}

/// Everything one invocation carries into the engine.
///
/// The secrets map is handed to the masker at construction; nothing else
/// may copy it out of this struct.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub working_dir: PathBuf,
    /// Call-supplied variable overlay (`--var`), CliArgument precedence.
    pub variables: HashMap<String, String>,
    /// Plaintext secrets for this invocation. Never logged.
    pub secrets: HashMap<String, String>,
    pub artifacts_dir: PathBuf,
    pub prefer_container: bool,
    pub runner_mode: RunnerMode,
    /// Restrict execution to a single job.
    pub job: Option<String>,
    /// Restrict execution to a single step name.
    pub step: Option<String>,
    pub log_level: LogLevel,
    /// Overall timeout applied to each step unless the job narrows it.
    pub timeout: Option<Duration>,
}

impl RunContext {
    /// Build a context rooted at `working_dir`, registering every secret
    /// value with `masker`.
    pub fn new(
        working_dir: impl Into<PathBuf>,
        secrets: HashMap<String, String>,
        masker: &Arc<SecretMasker>,
    ) -> Self {
        for value in secrets.values() {
            masker.register(value);
        }
        let working_dir = working_dir.into();
        let artifacts_dir = working_dir.join(".pdk").join("artifacts");
        Self {
            working_dir,
            variables: HashMap::new(),
            secrets,
            artifacts_dir,
            prefer_container: false,
            runner_mode: RunnerMode::Auto,
            job: None,
            step: None,
            log_level: LogLevel::Normal,
            timeout: None,
        }
    }

    pub fn with_variables(mut self, variables: HashMap<String, String>) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_runner_mode(mut self, mode: RunnerMode) -> Self {
        self.runner_mode = mode;
        self.prefer_container = mode == RunnerMode::Docker;
        self
    }

    pub fn with_job(mut self, job: impl Into<String>) -> Self {
        self.job = Some(job.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secrets_registered_at_construction() {
        let masker = Arc::new(SecretMasker::new());
        let mut secrets = HashMap::new();
        secrets.insert("API_KEY".to_string(), "abc-123-xyz".to_string());
        let _ctx = RunContext::new("/tmp/ws", secrets, &masker);
        assert_eq!(masker.mask("abc-123-xyz"), "***");
    }

    #[test]
    fn test_artifacts_dir_under_workspace() {
        let masker = Arc::new(SecretMasker::new());
        let ctx = RunContext::new("/tmp/ws", HashMap::new(), &masker);
        assert!(ctx.artifacts_dir.ends_with(".pdk/artifacts"));
    }

    #[test]
    fn test_docker_mode_prefers_container() {
        let masker = Arc::new(SecretMasker::new());
        let ctx = RunContext::new("/tmp/ws", HashMap::new(), &masker)
            .with_runner_mode(RunnerMode::Docker);
        assert!(ctx.prefer_container);
    }
}
