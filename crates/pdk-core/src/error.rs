// Structured error taxonomy with stable codes, contexts, and suggestions.
// Every failure that can reach a user carries a `PDK-{E|W}-{COMPONENT}-{NNN}`
// code so scripts and issue reports can match on it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Components that own a slice of the error-code namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Component {
    Docker,
    Parser,
    Runner,
    File,
    Net,
    Config,
    Var,
    Secret,
    Artifact,
    Unknown,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Component::Docker => "DOCKER",
            Component::Parser => "PARSER",
            Component::Runner => "RUNNER",
            Component::File => "FILE",
            Component::Net => "NET",
            Component::Config => "CONFIG",
            Component::Var => "VAR",
            Component::Secret => "SECRET",
            Component::Artifact => "ARTIFACT",
            Component::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Error vs. warning severity, encoded in the code string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

/// A stable machine-readable error code, rendered as `PDK-E-VAR-003`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorCode {
    pub severity: Severity,
    pub component: Component,
    pub number: u16,
}

impl ErrorCode {
    pub const fn error(component: Component, number: u16) -> Self {
        Self {
            severity: Severity::Error,
            component,
            number,
        }
    }

    pub const fn warning(component: Component, number: u16) -> Self {
        Self {
            severity: Severity::Warning,
            component,
            number,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sev = match self.severity {
            Severity::Error => 'E',
            Severity::Warning => 'W',
        };
        write!(f, "PDK-{}-{}-{:03}", sev, self.component, self.number)
    }
}

// ---------------------------------------------------------------------------
// Well-known codes
// ---------------------------------------------------------------------------

pub mod codes {
    use super::{Component, ErrorCode};

    // Variable subsystem
    pub const VAR_INVALID_SYNTAX: ErrorCode = ErrorCode::error(Component::Var, 1);
    pub const VAR_CIRCULAR_REFERENCE: ErrorCode = ErrorCode::error(Component::Var, 2);
    pub const VAR_REQUIRED: ErrorCode = ErrorCode::error(Component::Var, 3);
    pub const VAR_RECURSION_LIMIT: ErrorCode = ErrorCode::error(Component::Var, 4);
    pub const VAR_OUTPUT_LIMIT: ErrorCode = ErrorCode::error(Component::Var, 5);
    pub const VAR_UNDEFINED: ErrorCode = ErrorCode::warning(Component::Var, 10);

    // Parser surface
    pub const PARSER_INVALID_YAML: ErrorCode = ErrorCode::error(Component::Parser, 1);
    pub const PARSER_MISSING_FIELD: ErrorCode = ErrorCode::error(Component::Parser, 2);
    pub const PARSER_UNSUPPORTED_STEP: ErrorCode = ErrorCode::error(Component::Parser, 3);
    pub const PARSER_CIRCULAR_DEPENDENCY: ErrorCode = ErrorCode::error(Component::Parser, 4);
    pub const PARSER_INVALID_STRUCTURE: ErrorCode = ErrorCode::error(Component::Parser, 5);
    pub const PARSER_UNKNOWN_PROVIDER: ErrorCode = ErrorCode::error(Component::Parser, 6);

    // Docker / container driver
    pub const DOCKER_UNAVAILABLE: ErrorCode = ErrorCode::error(Component::Docker, 1);
    pub const DOCKER_COMMAND_FAILED: ErrorCode = ErrorCode::error(Component::Docker, 2);
    pub const DOCKER_PULL_FAILED: ErrorCode = ErrorCode::error(Component::Docker, 3);

    // Runner / scheduler
    pub const RUNNER_STEP_FAILED: ErrorCode = ErrorCode::error(Component::Runner, 1);
    pub const RUNNER_STEP_TIMEOUT: ErrorCode = ErrorCode::error(Component::Runner, 2);
    pub const RUNNER_CANCELLED: ErrorCode = ErrorCode::error(Component::Runner, 3);
    pub const RUNNER_NO_EXECUTOR: ErrorCode = ErrorCode::error(Component::Runner, 4);
    pub const RUNNER_PARALLEL_HOST: ErrorCode = ErrorCode::error(Component::Runner, 5);

    // Secret store
    pub const SECRET_INVALID_NAME: ErrorCode = ErrorCode::error(Component::Secret, 1);
    pub const SECRET_DECRYPTION_FAILED: ErrorCode = ErrorCode::error(Component::Secret, 2);
    pub const SECRET_NOT_FOUND: ErrorCode = ErrorCode::error(Component::Secret, 3);
    pub const SECRET_STORE_IO: ErrorCode = ErrorCode::error(Component::Secret, 4);

    // Files
    pub const FILE_NOT_FOUND: ErrorCode = ErrorCode::error(Component::File, 1);
    pub const FILE_IO: ErrorCode = ErrorCode::error(Component::File, 2);

    // Config
    pub const CONFIG_INVALID: ErrorCode = ErrorCode::error(Component::Config, 1);
}

// ---------------------------------------------------------------------------
// ErrorContext
// ---------------------------------------------------------------------------

/// Optional situational detail attached to a structured error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job(mut self, job: impl Into<String>) -> Self {
        self.job = Some(job.into());
        self
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.pipeline_file = Some(file.into());
        self
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }
}

// ---------------------------------------------------------------------------
// PdkError
// ---------------------------------------------------------------------------

/// The structured error carried across every PDK failure domain.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct PdkError {
    pub code: ErrorCode,
    pub message: String,
    pub context: Option<Box<ErrorContext>>,
    pub suggestions: Vec<String>,
}

pub type PdkResult<T> = Result<T, PdkError>;

impl PdkError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(Box::new(context));
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_suggestions<I, S>(mut self, suggestions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suggestions.extend(suggestions.into_iter().map(Into::into));
        self
    }

    /// The process exit code the CLI boundary maps this error to.
    ///
    /// Exit 4 is reserved for precondition failures (docker requested,
    /// driver unavailable); command or pull failures mid-execution are
    /// ordinary execution failures.
    pub fn exit_code(&self) -> i32 {
        match self.code.component {
            Component::Parser | Component::File => 2,
            _ if self.code == codes::DOCKER_UNAVAILABLE => 4,
            _ if self.code == codes::RUNNER_CANCELLED => 3,
            _ => 1,
        }
    }

    // Convenience constructors for the most common failures.

    pub fn docker_unavailable(detail: impl Into<String>) -> Self {
        Self::new(
            codes::DOCKER_UNAVAILABLE,
            format!("Docker is not available: {}", detail.into()),
        )
        .with_suggestion("Start the Docker daemon and retry")
        .with_suggestion("Use --host to run steps directly on this machine")
    }

    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self::new(
            codes::FILE_NOT_FOUND,
            format!("Pipeline file not found: {}", path.display()),
        )
        .with_context(ErrorContext::new().with_file(path))
        .with_suggestion("Check the --file path, or run from the repository root")
    }

    pub fn secret_decryption_failed(name: &str) -> Self {
        Self::new(
            codes::SECRET_DECRYPTION_FAILED,
            format!("Failed to decrypt secret '{name}'"),
        )
        .with_suggestion(format!(
            "The secret may have been encrypted on another machine; re-set it with `pdk secret set {name}`"
        ))
    }
}

/// Suggestion text for a non-zero process exit code that bubbled up
/// from a step.
pub fn exit_code_suggestion(exit_code: i32) -> String {
    match exit_code {
        1 => "The command failed; inspect the step output above".to_string(),
        2 => "The command was used incorrectly (bad arguments or syntax)".to_string(),
        126 => "The command was found but is not executable; check file permissions".to_string(),
        127 => "The command was not found; check PATH and spelling".to_string(),
        128 => "The command exited with an invalid exit argument".to_string(),
        137 => "The process was killed (OOM); increase available memory".to_string(),
        143 => "The process received SIGTERM and shut down".to_string(),
        n if n > 128 => format!("The process was killed by signal {}", n - 128),
        n => format!("The command exited with code {n}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_display_format() {
        assert_eq!(codes::VAR_REQUIRED.to_string(), "PDK-E-VAR-003");
        assert_eq!(codes::VAR_UNDEFINED.to_string(), "PDK-W-VAR-010");
        assert_eq!(codes::PARSER_CIRCULAR_DEPENDENCY.to_string(), "PDK-E-PARSER-004");
    }

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(PdkError::new(codes::PARSER_INVALID_YAML, "x").exit_code(), 2);
        assert_eq!(PdkError::new(codes::FILE_NOT_FOUND, "x").exit_code(), 2);
        assert_eq!(PdkError::new(codes::DOCKER_UNAVAILABLE, "x").exit_code(), 4);
        assert_eq!(PdkError::new(codes::RUNNER_CANCELLED, "x").exit_code(), 3);
        assert_eq!(PdkError::new(codes::VAR_REQUIRED, "x").exit_code(), 1);
        // Mid-execution docker failures are execution failures, not the
        // exit-4 precondition.
        assert_eq!(PdkError::new(codes::DOCKER_COMMAND_FAILED, "x").exit_code(), 1);
        assert_eq!(PdkError::new(codes::DOCKER_PULL_FAILED, "x").exit_code(), 1);
    }

    #[test]
    fn test_exit_code_suggestions() {
        assert!(exit_code_suggestion(127).contains("not found"));
        assert!(exit_code_suggestion(137).contains("OOM"));
        assert!(exit_code_suggestion(130).contains("signal 2"));
    }

    #[test]
    fn test_error_builder() {
        let err = PdkError::new(codes::VAR_REQUIRED, "greeting required")
            .with_context(ErrorContext::new().with_job("build").with_step("hello"))
            .with_suggestion("Define GREETING with --var GREETING=hi");
        assert_eq!(err.suggestions.len(), 1);
        let ctx = err.context.as_ref().unwrap();
        assert_eq!(ctx.job.as_deref(), Some("build"));
    }
}
