// pdk-core: Pipeline model, variable and secret subsystems, and shared
// infrastructure for PDK.
//
// Everything here is execution-free: the engine crate drives these types,
// the CLI crate renders them.

pub mod constants;
pub mod context;
pub mod error;
pub mod expand;
pub mod masker;
pub mod pipeline;
pub mod ports;
pub mod result;
pub mod secrets;
pub mod variables;

// ---------------------------------------------------------------------------
// Re-exports for convenient access
// ---------------------------------------------------------------------------

pub use context::{LogLevel, RunContext, RunnerMode};
pub use error::{codes, Component, ErrorCode, ErrorContext, PdkError, PdkResult, Severity};
pub use expand::{contains_variables, extract_names, ExpandError, Expander, RuntimeExprMode};
pub use masker::SecretMasker;
pub use pipeline::{ArtifactSpec, Condition, Job, Pipeline, Provider, Step, StepKind};
pub use ports::{
    ContainerDriver, DriverHealth, ExecutorValidator, PipelineParser, RunnerType, StepExecutor,
    StepRequest,
};
pub use result::{JobResult, PipelineResult, StepResult};
pub use secrets::{DerivedKeyCipher, SecretCipher, SecretEntry, SecretStore};
pub use variables::{VariableResolver, VariableSource};
