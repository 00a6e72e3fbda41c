// pdk-engine: The execution engine behind PDK.
//
// Architecture:
//   DryRunValidator::validate -> ExecutionPlan
//   JobScheduler::run_pipeline -> per-job step loop -> StepExecutor
//
// The engine depends only on the port traits in pdk-core; the bundled
// executors, Docker CLI driver, and registry are the default plug-ins.

pub mod condition;
pub mod docker;
pub mod exec;
pub mod filter;
pub mod fuzzy;
pub mod graph;
pub mod plan;
pub mod process;
pub mod runner;
pub mod scheduler;
pub mod validation;

// ---------------------------------------------------------------------------
// Re-exports for convenient access
// ---------------------------------------------------------------------------

pub use condition::{evaluate_condition, evaluate_expression, AggregateStatus};
pub use docker::DockerCliDriver;
pub use exec::ExecutorRegistry;
pub use filter::{
    parse_index_spec, parse_range_spec, CompositeFilter, FilterDecision, FilterOptions, RangeSpec,
};
pub use graph::{Cycle, DependencyGraph};
pub use plan::{ExecutionPlan, JobPlanNode, StepPlanNode};
pub use runner::{map_runner_image, select_runner};
pub use scheduler::{JobScheduler, SchedulerConfig};
pub use validation::{
    DryRunResult, DryRunValidator, ValidationItem, ValidationPhase, ValidationState,
};
