// Condition evaluation for jobs and steps. Status variants are decided
// against the aggregate outcome of prior work; Expression variants go
// through a small provider-style evaluator driven by the variable
// resolver.

use pdk_core::pipeline::Condition;
use pdk_core::VariableResolver;

/// Aggregate outcome of the work that ran before the entity under
/// evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregateStatus {
    pub any_failure: bool,
    pub cancelled: bool,
}

impl AggregateStatus {
    pub fn success(&self) -> bool {
        !self.any_failure && !self.cancelled
    }
}

/// Evaluate a job or step condition. `None` behaves like `Success`.
pub fn evaluate_condition(
    condition: Option<&Condition>,
    status: AggregateStatus,
    resolver: &VariableResolver,
) -> bool {
    match condition {
        None | Some(Condition::Success) => status.success(),
        Some(Condition::Always) => true,
        Some(Condition::Failure) => status.any_failure,
        Some(Condition::Expression(expr)) => evaluate_expression(expr, status, resolver),
    }
}

/// Evaluate a provider-style expression, e.g.
/// `always() && env.DEPLOY == 'true'`.
pub fn evaluate_expression(
    expression: &str,
    status: AggregateStatus,
    resolver: &VariableResolver,
) -> bool {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return status.success();
    }

    // Strip the outer ${{ }} wrapper when present.
    let expr = if trimmed.starts_with("${{") && trimmed.ends_with("}}") {
        trimmed[3..trimmed.len() - 2].trim()
    } else {
        trimmed
    };

    let references_status = contains_status_function(expr);
    let value = eval_or(expr, status, resolver);

    // An expression without a status function is implicitly gated on
    // success of the prior work.
    if !references_status && !status.success() {
        return false;
    }
    value
}

fn contains_status_function(expr: &str) -> bool {
    let lower = expr.to_lowercase();
    ["always()", "success()", "failure()", "cancelled()"]
        .iter()
        .any(|f| lower.contains(f))
}

// Recursive descent over `||`, `&&`, `!`, comparisons, atoms. All of it
// string-based; unparseable atoms evaluate truthy on non-empty text the
// way provider expressions do.

fn eval_or(expr: &str, status: AggregateStatus, resolver: &VariableResolver) -> bool {
    split_top_level(expr, "||")
        .into_iter()
        .any(|part| eval_and(part.trim(), status, resolver))
}

fn eval_and(expr: &str, status: AggregateStatus, resolver: &VariableResolver) -> bool {
    split_top_level(expr, "&&")
        .into_iter()
        .all(|part| eval_unary(part.trim(), status, resolver))
}

fn eval_unary(expr: &str, status: AggregateStatus, resolver: &VariableResolver) -> bool {
    if let Some(rest) = expr.strip_prefix('!') {
        return !eval_unary(rest.trim(), status, resolver);
    }
    if expr.starts_with('(') && expr.ends_with(')') && balanced(expr) {
        return eval_or(&expr[1..expr.len() - 1], status, resolver);
    }
    eval_comparison(expr, status, resolver)
}

fn eval_comparison(expr: &str, status: AggregateStatus, resolver: &VariableResolver) -> bool {
    for op in ["==", "!="] {
        if let Some((lhs, rhs)) = split_once_top_level(expr, op) {
            let left = atom_value(lhs.trim(), resolver);
            let right = atom_value(rhs.trim(), resolver);
            return if op == "==" { left == right } else { left != right };
        }
    }
    eval_atom(expr, status, resolver)
}

fn eval_atom(expr: &str, status: AggregateStatus, resolver: &VariableResolver) -> bool {
    match expr.to_lowercase().as_str() {
        "always()" => true,
        "success()" => status.success(),
        "failure()" => status.any_failure,
        "cancelled()" => status.cancelled,
        "true" => true,
        "false" => false,
        _ => {
            let value = atom_value(expr, resolver);
            !value.is_empty() && value != "false" && value != "0"
        }
    }
}

/// Resolve an atom to text: quoted literal, numeric literal, or a
/// variable reference (bare, or dotted like `env.NAME` / `vars.NAME`).
fn atom_value(atom: &str, resolver: &VariableResolver) -> String {
    let atom = atom.trim();
    if (atom.starts_with('\'') && atom.ends_with('\'') && atom.len() >= 2)
        || (atom.starts_with('"') && atom.ends_with('"') && atom.len() >= 2)
    {
        return atom[1..atom.len() - 1].to_string();
    }
    if atom.parse::<f64>().is_ok() {
        return atom.to_string();
    }

    let name = atom
        .strip_prefix("env.")
        .or_else(|| atom.strip_prefix("vars."))
        .or_else(|| atom.strip_prefix("variables."))
        .or_else(|| atom.strip_prefix("secrets."))
        .unwrap_or(atom);
    resolver.resolve(name).unwrap_or_default()
}

/// Split on `sep` outside parentheses and quotes. The scan works on raw
/// bytes (the separators and delimiters are ASCII), so multi-byte UTF-8
/// in operands passes through without slicing mid-character.
fn split_top_level<'a>(expr: &'a str, sep: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_quote: Option<u8> = None;
    let bytes = expr.as_bytes();
    let sep_bytes = sep.as_bytes();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match in_quote {
            Some(q) => {
                if c == q {
                    in_quote = None;
                }
            }
            None => match c {
                b'\'' | b'"' => in_quote = Some(c),
                b'(' => depth += 1,
                b')' => depth -= 1,
                _ => {
                    if depth == 0 && bytes[i..].starts_with(sep_bytes) {
                        parts.push(&expr[start..i]);
                        i += sep_bytes.len();
                        start = i;
                        continue;
                    }
                }
            },
        }
        i += 1;
    }
    parts.push(&expr[start..]);
    parts
}

fn split_once_top_level<'a>(expr: &'a str, sep: &str) -> Option<(&'a str, &'a str)> {
    let parts = split_top_level(expr, sep);
    if parts.len() >= 2 {
        let first = parts[0];
        let rest_start = first.len() + sep.len();
        Some((first, &expr[rest_start..]))
    } else {
        None
    }
}

/// True when the leading `(` closes exactly at the end of `expr`.
fn balanced(expr: &str) -> bool {
    let mut depth = 0i32;
    for (i, c) in expr.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
                if depth == 0 && i != expr.len() - 1 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Replace every `${{ expr }}` site in `text` with its evaluated value.
/// Status functions render as `true`/`false`; other atoms render their
/// resolved text.
pub fn interpolate_runtime(
    text: &str,
    status: AggregateStatus,
    resolver: &VariableResolver,
) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 3..];
        match after.find("}}") {
            Some(end) => {
                let expr = after[..end].trim();
                if contains_status_function(expr)
                    || expr.contains("==")
                    || expr.contains("!=")
                    || expr.contains("&&")
                    || expr.contains("||")
                {
                    out.push_str(if eval_or(expr, status, resolver) {
                        "true"
                    } else {
                        "false"
                    });
                } else {
                    out.push_str(&atom_value(expr, resolver));
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdk_core::pipeline::Condition;
    use pdk_core::VariableSource;

    fn resolver(pairs: &[(&str, &str)]) -> VariableResolver {
        let vars = VariableResolver::new();
        for (name, value) in pairs {
            vars.set(*name, *value, VariableSource::Configuration);
        }
        vars
    }

    const OK: AggregateStatus = AggregateStatus {
        any_failure: false,
        cancelled: false,
    };
    const FAILED: AggregateStatus = AggregateStatus {
        any_failure: true,
        cancelled: false,
    };

    #[test]
    fn test_status_variants() {
        let vars = resolver(&[]);
        assert!(evaluate_condition(None, OK, &vars));
        assert!(!evaluate_condition(None, FAILED, &vars));
        assert!(evaluate_condition(Some(&Condition::Always), FAILED, &vars));
        assert!(!evaluate_condition(Some(&Condition::Failure), OK, &vars));
        assert!(evaluate_condition(Some(&Condition::Failure), FAILED, &vars));
        assert!(evaluate_condition(Some(&Condition::Success), OK, &vars));
        assert!(!evaluate_condition(Some(&Condition::Success), FAILED, &vars));
    }

    #[test]
    fn test_expression_status_functions() {
        let vars = resolver(&[]);
        let expr = |s: &str| Condition::Expression(s.to_string());
        assert!(evaluate_condition(Some(&expr("always()")), FAILED, &vars));
        assert!(evaluate_condition(Some(&expr("failure()")), FAILED, &vars));
        assert!(!evaluate_condition(Some(&expr("failure()")), OK, &vars));
        assert!(evaluate_condition(Some(&expr("${{ success() }}")), OK, &vars));
    }

    #[test]
    fn test_expression_comparison() {
        let vars = resolver(&[("DEPLOY", "true")]);
        assert!(evaluate_expression("env.DEPLOY == 'true'", OK, &vars));
        assert!(!evaluate_expression("env.DEPLOY == 'false'", OK, &vars));
        assert!(evaluate_expression("DEPLOY != 'false'", OK, &vars));
    }

    #[test]
    fn test_expression_implicit_success_gate() {
        let vars = resolver(&[("DEPLOY", "true")]);
        // No status function: gated on success of prior work.
        assert!(!evaluate_expression("env.DEPLOY == 'true'", FAILED, &vars));
        // Explicit always() lifts the gate.
        assert!(evaluate_expression(
            "always() && env.DEPLOY == 'true'",
            FAILED,
            &vars
        ));
    }

    #[test]
    fn test_boolean_operators() {
        let vars = resolver(&[("A", "1"), ("B", "")]);
        assert!(evaluate_expression("A == '1' || B == '1'", OK, &vars));
        assert!(!evaluate_expression("A == '1' && B == '1'", OK, &vars));
        assert!(evaluate_expression("!(B == '1')", OK, &vars));
    }

    #[test]
    fn test_truthiness_of_bare_atoms() {
        let vars = resolver(&[("SET", "yes"), ("EMPTY", ""), ("OFF", "false")]);
        assert!(evaluate_expression("SET", OK, &vars));
        assert!(!evaluate_expression("EMPTY", OK, &vars));
        assert!(!evaluate_expression("OFF", OK, &vars));
    }

    #[test]
    fn test_multibyte_operands() {
        let vars = resolver(&[("CITY", "São Paulo")]);
        assert!(evaluate_expression("env.CITY == 'São Paulo'", OK, &vars));
        assert!(!evaluate_expression("env.CITY == 'Osaka' && café == '1'", OK, &vars));
        assert_eq!(
            interpolate_runtime("deploy to ${{ env.CITY }}", OK, &vars),
            "deploy to São Paulo"
        );
    }

    #[test]
    fn test_interpolate_runtime() {
        let vars = resolver(&[("TARGET", "prod")]);
        let out = interpolate_runtime("deploy to ${{ env.TARGET }} now", OK, &vars);
        assert_eq!(out, "deploy to prod now");

        let out = interpolate_runtime("ok=${{ success() }}", OK, &vars);
        assert_eq!(out, "ok=true");
    }

    #[test]
    fn test_interpolate_leaves_plain_text() {
        let vars = resolver(&[]);
        assert_eq!(interpolate_runtime("no sites", OK, &vars), "no sites");
    }
}
