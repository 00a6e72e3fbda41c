// Variable phase: walk every interpolation site and check each
// reference against the resolver. Undefined `${NAME}` without a default
// warns; undefined `${NAME:?msg}` blocks; malformed syntax blocks.
// `${{ }}` runtime sites get a syntax check only.

use super::{ValidationItem, ValidationPhase, ValidationState};
use pdk_core::error::codes;
use pdk_core::pipeline::{Condition, Pipeline};
use pdk_core::VariableResolver;

pub fn run(
    pipeline: &Pipeline,
    resolver: &VariableResolver,
    _state: &mut ValidationState,
) -> Vec<ValidationItem> {
    let mut items = Vec::new();
    let pipeline_vars = &pipeline.variables;

    let mut check = |text: &str, site: &str, job: Option<&str>, step: Option<&str>| {
        for finding in scan_text(text) {
            let mut item = match finding {
                SiteFinding::Syntax(detail) => ValidationItem::error(
                    ValidationPhase::Variable,
                    1,
                    format!("{site}: {detail}"),
                )
                .with_pdk_code(codes::VAR_INVALID_SYNTAX),
                SiteFinding::RequiredMissing { name, message } => {
                    if resolver.contains(&name) || pipeline_vars.contains_key(&name) {
                        continue;
                    }
                    ValidationItem::error(
                        ValidationPhase::Variable,
                        3,
                        format!("{site}: required variable '{name}' is not defined: {message}"),
                    )
                    .with_pdk_code(codes::VAR_REQUIRED)
                }
                SiteFinding::Undefined { name } => {
                    if resolver.contains(&name) || pipeline_vars.contains_key(&name) {
                        continue;
                    }
                    ValidationItem::warning(
                        ValidationPhase::Variable,
                        10,
                        format!("{site}: variable '{name}' is not defined and has no default"),
                    )
                    .with_pdk_code(codes::VAR_UNDEFINED)
                }
            };
            if let Some(job) = job {
                item = item.in_job(job);
            }
            if let Some(step) = step {
                item = item.in_step(step);
            }
            items.push(item);
        }
    };

    for (name, value) in pipeline_vars {
        check(value, &format!("pipeline variable '{name}'"), None, None);
    }

    for job in &pipeline.jobs {
        for (name, value) in &job.env {
            check(
                value,
                &format!("job environment '{name}'"),
                Some(&job.id),
                None,
            );
        }
        if let Some(Condition::Expression(expr)) = &job.condition {
            check(expr, "job condition", Some(&job.id), None);
        }

        for step in &job.steps {
            for (name, value) in &step.env {
                check(
                    value,
                    &format!("step environment '{name}'"),
                    Some(&job.id),
                    Some(&step.name),
                );
            }
            for (name, value) in &step.with {
                check(
                    value,
                    &format!("step input '{name}'"),
                    Some(&job.id),
                    Some(&step.name),
                );
            }
            if let Some(script) = &step.script {
                check(script, "step script", Some(&job.id), Some(&step.name));
            }
            if let Some(Condition::Expression(expr)) = &step.condition {
                check(expr, "step condition", Some(&job.id), Some(&step.name));
            }
            if let Some(wd) = &step.working_dir {
                check(wd, "working directory", Some(&job.id), Some(&step.name));
            }
        }
    }

    items
}

enum SiteFinding {
    Syntax(String),
    Undefined { name: String },
    RequiredMissing { name: String, message: String },
}

/// Scan one text site for variable references and runtime expressions.
fn scan_text(text: &str) -> Vec<SiteFinding> {
    let mut findings = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        // Escaped reference: skip the whole group.
        if bytes[i] == b'\\' && text[i + 1..].starts_with("${") {
            match find_close(&text[i + 1..]) {
                Some(consumed) => i += 1 + consumed,
                None => i += 3,
            }
            continue;
        }

        if text[i..].starts_with("${{") {
            match text[i..].find("}}") {
                Some(end) => {
                    let expr = &text[i + 3..i + end];
                    if let Some(detail) = check_runtime_expr(expr) {
                        findings.push(SiteFinding::Syntax(detail));
                    }
                    i += end + 2;
                }
                None => {
                    findings.push(SiteFinding::Syntax(format!(
                        "unclosed runtime expression '{}'",
                        snippet(&text[i..])
                    )));
                    break;
                }
            }
            continue;
        }

        if text[i..].starts_with("${") {
            match find_close(&text[i..]) {
                Some(consumed) => {
                    let body = &text[i + 2..i + consumed - 1];
                    findings.extend(check_reference(body));
                    i += consumed;
                }
                None => {
                    findings.push(SiteFinding::Syntax(format!(
                        "unclosed variable reference '{}'",
                        snippet(&text[i..])
                    )));
                    break;
                }
            }
            continue;
        }

        // Step a whole character; a byte step would land inside
        // multi-byte UTF-8 and make the next slice panic.
        let ch = text[i..].chars().next().unwrap_or('\0');
        i += ch.len_utf8().max(1);
    }

    findings
}

/// Length of a `${...}` group including braces, honouring nesting.
/// Byte-wise scan; multi-byte UTF-8 in the body cannot trip a slice.
fn find_close(input: &str) -> Option<usize> {
    let bytes = input.as_bytes();
    let mut level = 1;
    let mut i = 2;
    while i < bytes.len() {
        if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
            level += 1;
            i += 2;
        } else if bytes[i] == b'}' {
            level -= 1;
            if level == 0 {
                return Some(i + 1);
            }
            i += 1;
        } else {
            i += 1;
        }
    }
    None
}

fn check_reference(body: &str) -> Vec<SiteFinding> {
    let (name, modifier) = if let Some(pos) = body.find(":-") {
        (&body[..pos], Some(('-', &body[pos + 2..])))
    } else if let Some(pos) = body.find(":?") {
        (&body[..pos], Some(('?', &body[pos + 2..])))
    } else {
        (body, None)
    };

    if name.is_empty() {
        return vec![SiteFinding::Syntax(format!(
            "empty variable name in '${{{body}}}'"
        ))];
    }
    if !is_valid_name(name) {
        return vec![SiteFinding::Syntax(format!("invalid variable name '{name}'"))];
    }

    match modifier {
        Some(('?', message)) => vec![SiteFinding::RequiredMissing {
            name: name.to_string(),
            message: message.to_string(),
        }],
        Some(('-', default)) => {
            // The default text may itself hold references.
            scan_text(default)
        }
        _ => vec![SiteFinding::Undefined {
            name: name.to_string(),
        }],
    }
}

/// Runtime expressions get balanced-parens and balanced-quotes checks.
fn check_runtime_expr(expr: &str) -> Option<String> {
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
                        return Some(format!("unbalanced parentheses in '{}'", expr.trim()));
                    }
                }
                _ => {}
            },
        }
    }
    if depth != 0 {
        return Some(format!("unbalanced parentheses in '{}'", expr.trim()));
    }
    if in_quote.is_some() {
        return Some(format!("unbalanced quotes in '{}'", expr.trim()));
    }
    None
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn snippet(s: &str) -> &str {
    match s.char_indices().nth(40) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdk_core::pipeline::{Job, Provider, Step};
    use pdk_core::VariableSource;

    fn pipeline_with_script(script: &str) -> Pipeline {
        let mut p = Pipeline::new("ci", Provider::GitHub);
        let mut job = Job::new("build");
        job.steps.push(Step::script("run", script));
        p.jobs.push(job);
        p
    }

    #[test]
    fn test_undefined_without_default_warns() {
        let p = pipeline_with_script("echo ${GREETING}");
        let resolver = VariableResolver::new();
        let items = run(&p, &resolver, &mut ValidationState::default());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].severity, pdk_core::Severity::Warning);
        assert_eq!(items[0].code().to_string(), "PDK-W-VAR-010");
    }

    #[test]
    fn test_undefined_with_default_is_silent() {
        let p = pipeline_with_script("echo ${GREETING:-hello}");
        let resolver = VariableResolver::new();
        let items = run(&p, &resolver, &mut ValidationState::default());
        assert!(items.is_empty());
    }

    #[test]
    fn test_required_missing_is_error_var_003() {
        let p = pipeline_with_script("echo ${GREETING:?greeting required}");
        let resolver = VariableResolver::new();
        let items = run(&p, &resolver, &mut ValidationState::default());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].severity, pdk_core::Severity::Error);
        assert_eq!(items[0].code().to_string(), "PDK-E-VAR-003");
        assert!(items[0].message.contains("greeting required"));
    }

    #[test]
    fn test_required_defined_is_silent() {
        let p = pipeline_with_script("echo ${GREETING:?needed}");
        let resolver = VariableResolver::new();
        resolver.set("GREETING", "hi", VariableSource::CliArgument);
        let items = run(&p, &resolver, &mut ValidationState::default());
        assert!(items.is_empty());
    }

    #[test]
    fn test_unclosed_reference_is_error() {
        let p = pipeline_with_script("echo ${OOPS");
        let resolver = VariableResolver::new();
        let items = run(&p, &resolver, &mut ValidationState::default());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].code().to_string(), "PDK-E-VAR-001");
    }

    #[test]
    fn test_runtime_expr_syntax_checked_only() {
        let resolver = VariableResolver::new();

        let ok = pipeline_with_script("echo ${{ github.ref == 'main' }}");
        assert!(run(&ok, &resolver, &mut ValidationState::default()).is_empty());

        let bad = pipeline_with_script("echo ${{ (a == 'b' }}");
        let items = run(&bad, &resolver, &mut ValidationState::default());
        assert_eq!(items.len(), 1);
        assert!(items[0].message.contains("unbalanced parentheses"));

        let bad_quotes = pipeline_with_script("echo ${{ a == 'b }}");
        let items = run(&bad_quotes, &resolver, &mut ValidationState::default());
        assert_eq!(items.len(), 1);
        assert!(items[0].message.contains("unbalanced quotes"));
    }

    #[test]
    fn test_pipeline_variable_counts_as_defined() {
        let mut p = pipeline_with_script("echo ${FROM_PIPELINE}");
        p.variables
            .insert("FROM_PIPELINE".to_string(), "x".to_string());
        let resolver = VariableResolver::new();
        let items = run(&p, &resolver, &mut ValidationState::default());
        assert!(items.is_empty());
    }

    #[test]
    fn test_escaped_reference_ignored() {
        let p = pipeline_with_script(r"echo \${NOT_A_REF}");
        let resolver = VariableResolver::new();
        assert!(run(&p, &resolver, &mut ValidationState::default()).is_empty());
    }

    #[test]
    fn test_multibyte_script_text_scans_cleanly() {
        let resolver = VariableResolver::new();

        let plain = pipeline_with_script(r#"echo "café naïve 日本語""#);
        assert!(run(&plain, &resolver, &mut ValidationState::default()).is_empty());

        let mixed = pipeline_with_script("echo café ${MISSING}");
        let items = run(&mixed, &resolver, &mut ValidationState::default());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].code().to_string(), "PDK-W-VAR-010");
    }

    #[test]
    fn test_sites_carry_job_and_step() {
        let p = pipeline_with_script("echo ${MISSING}");
        let resolver = VariableResolver::new();
        let items = run(&p, &resolver, &mut ValidationState::default());
        assert_eq!(items[0].job.as_deref(), Some("build"));
        assert_eq!(items[0].step.as_deref(), Some("run"));
    }
}
