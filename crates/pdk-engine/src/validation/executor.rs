// Executor phase: confirm an executor exists for every (kind, runner)
// the pipeline needs, via the executor-validator port. The phase never
// touches an executor itself.

use super::{ValidationItem, ValidationPhase};
use pdk_core::pipeline::{Pipeline, StepKind};
use pdk_core::ports::{ExecutorValidator, RunnerType};

pub fn run(
    pipeline: &Pipeline,
    validator: &dyn ExecutorValidator,
    runner: RunnerType,
) -> Vec<ValidationItem> {
    let mut items = Vec::new();

    for job in &pipeline.jobs {
        for step in &job.steps {
            if step.kind == StepKind::Unknown {
                // The schema phase already reported this.
                continue;
            }
            if !validator.has_executor(step.kind, runner) {
                let supported = validator
                    .available_step_kinds(runner)
                    .iter()
                    .map(|k| k.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                items.push(
                    ValidationItem::error(
                        ValidationPhase::Executor,
                        1,
                        format!(
                            "no {runner} executor for step '{}' (kind {}); supported kinds: {supported}",
                            step.name, step.kind
                        ),
                    )
                    .in_job(&job.id)
                    .in_step(&step.name),
                );
            }
        }
    }

    items
}
