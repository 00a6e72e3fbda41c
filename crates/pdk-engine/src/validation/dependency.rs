// Dependency phase: job depends-on targets exist, no self-loops, no
// cycles; on success the execution order lands in shared state. Step
// `needs` get the same treatment within each job.

use super::{ValidationItem, ValidationPhase, ValidationState};
use crate::graph::DependencyGraph;
use pdk_core::error::codes;
use pdk_core::pipeline::{Job, Pipeline};

pub fn run(pipeline: &Pipeline, state: &mut ValidationState) -> Vec<ValidationItem> {
    let mut items = Vec::new();

    let mut graph = DependencyGraph::new();
    for job in &pipeline.jobs {
        graph.add_node(job.id.clone());
        for dep in &job.depends_on {
            graph.add_dependency(&job.id, dep);
        }
    }

    for (job_id, target) in graph.unknown_targets() {
        items.push(
            ValidationItem::error(
                ValidationPhase::Dependency,
                1,
                format!("job '{job_id}' depends on unknown job '{target}'"),
            )
            .in_job(job_id),
        );
    }

    for job_id in graph.self_loops() {
        items.push(
            ValidationItem::error(
                ValidationPhase::Dependency,
                2,
                format!("job '{job_id}' depends on itself"),
            )
            .in_job(job_id),
        );
    }

    if let Some(cycle) = graph.find_cycle() {
        items.push(
            ValidationItem::error(
                ValidationPhase::Dependency,
                3,
                format!("circular job dependency: {cycle}"),
            )
            .with_pdk_code(codes::PARSER_CIRCULAR_DEPENDENCY),
        );
    } else {
        match graph.execution_order() {
            Ok(order) => {
                state.job_ranks = order
                    .iter()
                    .enumerate()
                    .map(|(i, id)| (id.clone(), i + 1))
                    .collect();
                state.job_order = order;
            }
            Err(cycle) => {
                items.push(
                    ValidationItem::error(
                        ValidationPhase::Dependency,
                        3,
                        format!("circular job dependency: {cycle}"),
                    )
                    .with_pdk_code(codes::PARSER_CIRCULAR_DEPENDENCY),
                );
            }
        }
    }

    for job in &pipeline.jobs {
        items.extend(check_step_needs(job, state));
    }

    items
}

/// Step-level `needs` inside one job: unknown ids, self-loops, cycles,
/// and an intra-job order on success.
fn check_step_needs(job: &Job, state: &mut ValidationState) -> Vec<ValidationItem> {
    let mut items = Vec::new();

    let has_needs = job.steps.iter().any(|s| !s.needs.is_empty());
    if !has_needs {
        return items;
    }

    let mut graph = DependencyGraph::new();
    for step in &job.steps {
        let key = step
            .id
            .clone()
            .unwrap_or_else(|| step.name.clone());
        graph.add_node(key.clone());
        for need in &step.needs {
            if need.trim().is_empty() {
                continue;
            }
            graph.add_dependency(&key, need);
        }
    }

    for (step_id, target) in graph.unknown_targets() {
        items.push(
            ValidationItem::error(
                ValidationPhase::Dependency,
                4,
                format!("step '{step_id}' needs unknown step '{target}'"),
            )
            .in_job(&job.id)
            .in_step(step_id),
        );
    }

    for step_id in graph.self_loops() {
        items.push(
            ValidationItem::error(
                ValidationPhase::Dependency,
                5,
                format!("step '{step_id}' needs itself"),
            )
            .in_job(&job.id)
            .in_step(step_id),
        );
    }

    if let Some(cycle) = graph.find_cycle() {
        items.push(
            ValidationItem::error(
                ValidationPhase::Dependency,
                6,
                format!("circular step needs in job '{}': {cycle}", job.id),
            )
            .in_job(&job.id)
            .with_pdk_code(codes::PARSER_CIRCULAR_DEPENDENCY),
        );
    } else if let Ok(order) = graph.execution_order() {
        state.step_orders.insert(job.id.clone(), order);
    }

    items
}
