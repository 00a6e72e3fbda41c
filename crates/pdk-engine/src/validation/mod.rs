// Dry-run validation pipeline. Four phases in fixed order prove a
// pipeline is executable before any side effects; the result carries an
// execution plan when nothing blocked.
//
// Phase order:
//   schema -> executor -> variables -> dependency

pub mod dependency;
pub mod executor;
pub mod schema;
pub mod variables;

use crate::filter::{validate_filters, CompositeFilter, FilterOptions};
use crate::plan::{build_plan, ExecutionPlan};
use pdk_core::error::{Component, ErrorCode, PdkError, Severity};
use pdk_core::ports::{ExecutorValidator, RunnerType};
use pdk_core::{Pipeline, RunContext, VariableResolver};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The validation phase an item was produced by. Determines the
/// category prefix of its rendered code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationPhase {
    Schema,
    Executor,
    Variable,
    Dependency,
}

impl ValidationPhase {
    pub fn category(&self) -> &'static str {
        match self {
            ValidationPhase::Schema => "SCHEMA",
            ValidationPhase::Executor => "EXEC",
            ValidationPhase::Variable => "VAR",
            ValidationPhase::Dependency => "DEP",
        }
    }

    fn component(&self) -> Component {
        match self {
            ValidationPhase::Schema => Component::Parser,
            ValidationPhase::Executor => Component::Runner,
            ValidationPhase::Variable => Component::Var,
            ValidationPhase::Dependency => Component::Parser,
        }
    }
}

/// One finding from a validation phase.
#[derive(Debug, Clone)]
pub struct ValidationItem {
    pub severity: Severity,
    pub phase: ValidationPhase,
    pub number: u16,
    pub message: String,
    pub job: Option<String>,
    pub step: Option<String>,
    /// Overrides the derived PDK code when a finding owns a well-known
    /// code (e.g. circular dependencies render as PDK-E-PARSER-004).
    pub pdk_code: Option<ErrorCode>,
}

impl ValidationItem {
    pub fn error(phase: ValidationPhase, number: u16, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            phase,
            number,
            message: message.into(),
            job: None,
            step: None,
            pdk_code: None,
        }
    }

    pub fn warning(phase: ValidationPhase, number: u16, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            phase,
            number,
            message: message.into(),
            job: None,
            step: None,
            pdk_code: None,
        }
    }

    pub fn in_job(mut self, job: impl Into<String>) -> Self {
        self.job = Some(job.into());
        self
    }

    pub fn in_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    pub fn with_pdk_code(mut self, code: ErrorCode) -> Self {
        self.pdk_code = Some(code);
        self
    }

    /// Category code for JSON output, e.g. `VAR-003`.
    pub fn category_code(&self) -> String {
        format!("{}-{:03}", self.phase.category(), self.number)
    }

    /// The stable PDK error code for this finding.
    pub fn code(&self) -> ErrorCode {
        self.pdk_code.unwrap_or(ErrorCode {
            severity: self.severity,
            component: self.phase.component(),
            number: self.number,
        })
    }

    pub fn to_pdk_error(&self) -> PdkError {
        let mut err = PdkError::new(self.code(), self.message.clone());
        let mut ctx = pdk_core::ErrorContext::new();
        if let Some(ref job) = self.job {
            ctx = ctx.with_job(job.clone());
        }
        if let Some(ref step) = self.step {
            ctx = ctx.with_step(step.clone());
        }
        if self.job.is_some() || self.step.is_some() {
            err = err.with_context(ctx);
        }
        err
    }
}

/// Shared state populated by earlier phases, consumed by later ones.
#[derive(Debug, Default)]
pub struct ValidationState {
    /// Job ids in execution order (dependency phase).
    pub job_order: Vec<String>,
    /// 1-based execution rank per job id.
    pub job_ranks: HashMap<String, usize>,
    /// Step ids in execution order per job (for step-level needs).
    pub step_orders: HashMap<String, Vec<String>>,
}

/// The aggregated outcome of a dry run.
#[derive(Debug)]
pub struct DryRunResult {
    pub errors: Vec<ValidationItem>,
    pub warnings: Vec<ValidationItem>,
    /// Per-phase wall time, in phase order.
    pub timings: Vec<(ValidationPhase, Duration)>,
    /// Present only when no phase produced errors.
    pub plan: Option<ExecutionPlan>,
}

impl DryRunResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Orchestrates the four phases and plan construction.
pub struct DryRunValidator {
    executor_validator: Option<Arc<dyn ExecutorValidator>>,
    runner: RunnerType,
    /// Names held by the secret store, for plan masking.
    secret_names: HashSet<String>,
}

impl DryRunValidator {
    pub fn new() -> Self {
        Self {
            executor_validator: None,
            runner: RunnerType::Host,
            secret_names: HashSet::new(),
        }
    }

    pub fn with_executor_validator(
        mut self,
        validator: Arc<dyn ExecutorValidator>,
        runner: RunnerType,
    ) -> Self {
        self.executor_validator = Some(validator);
        self.runner = runner;
        self
    }

    pub fn with_secret_names(mut self, names: HashSet<String>) -> Self {
        self.secret_names = names;
        self
    }

    /// Run every phase. Never executes a step, touches the container
    /// driver, or writes to the artifacts directory.
    pub fn validate(
        &self,
        pipeline: &Pipeline,
        ctx: &RunContext,
        options: &FilterOptions,
        resolver: &VariableResolver,
        file: Option<PathBuf>,
    ) -> DryRunResult {
        let mut items = Vec::new();
        let mut timings = Vec::new();
        let mut state = ValidationState::default();

        let start = Instant::now();
        items.extend(schema::run(pipeline, &mut state));
        timings.push((ValidationPhase::Schema, start.elapsed()));

        // Without the port the executor phase is skipped, producing no
        // errors.
        let start = Instant::now();
        if let Some(ref validator) = self.executor_validator {
            items.extend(executor::run(pipeline, validator.as_ref(), self.runner));
        }
        timings.push((ValidationPhase::Executor, start.elapsed()));

        let start = Instant::now();
        items.extend(variables::run(pipeline, resolver, &mut state));
        timings.push((ValidationPhase::Variable, start.elapsed()));

        let start = Instant::now();
        items.extend(dependency::run(pipeline, &mut state));
        timings.push((ValidationPhase::Dependency, start.elapsed()));

        // Filter options are validated alongside the phases: zero-match
        // inclusion patterns warn, absent named-range endpoints block.
        for issue in validate_filters(options, pipeline) {
            let item = if issue.error {
                ValidationItem::error(ValidationPhase::Schema, 11, issue.message)
            } else {
                ValidationItem::warning(ValidationPhase::Schema, 10, issue.message)
            };
            items.push(item);
        }

        let (errors, warnings): (Vec<_>, Vec<_>) = items
            .into_iter()
            .partition(|i| i.severity == Severity::Error);

        let plan = if errors.is_empty() {
            let options = crate::filter::expand_include_dependencies(options, ctx, pipeline);
            let filter = CompositeFilter::build(&options, ctx);
            Some(build_plan(
                pipeline,
                ctx,
                resolver,
                &state.job_order,
                &filter,
                &self.secret_names,
                file,
            ))
        } else {
            None
        };

        DryRunResult {
            errors,
            warnings,
            timings,
            plan,
        }
    }

}

impl Default for DryRunValidator {
    fn default() -> Self {
        Self::new()
    }
}
