// Schema phase: structural completeness of every job and step.

use super::{ValidationItem, ValidationPhase, ValidationState};
use pdk_core::pipeline::{Condition, Pipeline, StepKind};

pub fn run(pipeline: &Pipeline, _state: &mut ValidationState) -> Vec<ValidationItem> {
    let mut items = Vec::new();

    for job in &pipeline.jobs {
        if job.runs_on.trim().is_empty() {
            items.push(
                ValidationItem::error(
                    ValidationPhase::Schema,
                    1,
                    format!("job '{}' has no runs-on label", job.id),
                )
                .in_job(&job.id),
            );
        }

        if job.steps.is_empty() {
            items.push(
                ValidationItem::error(
                    ValidationPhase::Schema,
                    2,
                    format!("job '{}' has no steps", job.id),
                )
                .in_job(&job.id),
            );
        }

        if let Some(Condition::Expression(expr)) = &job.condition {
            check_condition_text(expr, &job.id, None, &mut items);
        }

        for step in &job.steps {
            if step.kind == StepKind::Unknown {
                items.push(
                    ValidationItem::error(
                        ValidationPhase::Schema,
                        3,
                        format!("step '{}' has an unknown kind", step.name),
                    )
                    .in_job(&job.id)
                    .in_step(&step.name),
                );
            }

            if step.kind.requires_script()
                && step.script.as_deref().map_or(true, |s| s.trim().is_empty())
            {
                items.push(
                    ValidationItem::error(
                        ValidationPhase::Schema,
                        4,
                        format!(
                            "step '{}' is a {} step but carries no script text",
                            step.name, step.kind
                        ),
                    )
                    .in_job(&job.id)
                    .in_step(&step.name),
                );
            }

            if let Some(Condition::Expression(expr)) = &step.condition {
                check_condition_text(expr, &job.id, Some(&step.name), &mut items);
            }

            for need in &step.needs {
                if need.trim().is_empty() {
                    items.push(
                        ValidationItem::error(
                            ValidationPhase::Schema,
                            6,
                            format!("step '{}' has an empty needs entry", step.name),
                        )
                        .in_job(&job.id)
                        .in_step(&step.name),
                    );
                }
            }
        }
    }

    items
}

/// Condition expressions must have balanced parentheses and a non-empty
/// body after trimming.
fn check_condition_text(
    expr: &str,
    job: &str,
    step: Option<&str>,
    items: &mut Vec<ValidationItem>,
) {
    let body = expr
        .trim()
        .trim_start_matches("${{")
        .trim_end_matches("}}")
        .trim();

    let problem = if body.is_empty() {
        Some("condition expression is empty".to_string())
    } else if !parens_balanced(expr) {
        Some(format!("condition '{expr}' has unbalanced parentheses"))
    } else {
        None
    };

    if let Some(message) = problem {
        let mut item = ValidationItem::error(ValidationPhase::Schema, 5, message).in_job(job);
        if let Some(step) = step {
            item = item.in_step(step);
        }
        items.push(item);
    }
}

fn parens_balanced(expr: &str) -> bool {
    let mut depth = 0i32;
    let mut in_quote: Option<char> = None;
    for c in expr.chars() {
        match in_quote {
            Some(q) => {
                if c == q {
                    in_quote = None;
                }
            }
            None => match c {
                '\'' | '"' => in_quote = Some(c),
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth < 0 {
                        return false;
                    }
                }
                _ => {}
            },
        }
    }
    depth == 0
}
