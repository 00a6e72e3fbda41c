// Variable interpolation. Rewrites `${NAME}` references against the
// resolver, recursively, with cycle detection and bounded depth/output.
//
// Grammar:
//   ${NAME}           value, or empty string when undefined
//   ${NAME:-default}  value, or the (recursively expanded) default
//   ${NAME:?message}  value, or a required-variable failure
//   \${...}           literal, backslash consumed
//   ${{ expr }}       opaque runtime expression placeholder

use crate::constants::{MAX_EXPAND_DEPTH, MAX_EXPAND_OUTPUT};
use crate::error::{codes, PdkError};
use crate::variables::VariableResolver;
use std::collections::HashMap;

/// How `${{ expr }}` runtime placeholders are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimeExprMode {
    /// Leave the placeholder untouched (execution paths; the runtime
    /// context substitutes it later).
    #[default]
    Preserve,
    /// Rewrite to `<runtime:expr>` (execution-plan rendering).
    Tag,
}

/// Expansion failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExpandError {
    #[error("invalid variable syntax: {0}")]
    InvalidSyntax(String),
    #[error("required variable '{name}' is not defined: {message}")]
    Required { name: String, message: String },
    #[error("circular variable reference: {}", chain.join(" -> "))]
    CircularReference { chain: Vec<String> },
    #[error("variable expansion exceeded the recursion limit of {0}")]
    RecursionLimit(u32),
    #[error("variable expansion exceeded the output limit of {0} bytes")]
    OutputLimit(usize),
}

impl From<ExpandError> for PdkError {
    fn from(err: ExpandError) -> Self {
        let code = match &err {
            ExpandError::InvalidSyntax(_) => codes::VAR_INVALID_SYNTAX,
            ExpandError::Required { .. } => codes::VAR_REQUIRED,
            ExpandError::CircularReference { .. } => codes::VAR_CIRCULAR_REFERENCE,
            ExpandError::RecursionLimit(_) => codes::VAR_RECURSION_LIMIT,
            ExpandError::OutputLimit(_) => codes::VAR_OUTPUT_LIMIT,
        };
        let mut pdk = PdkError::new(code, err.to_string());
        if let ExpandError::Required { name, .. } = &err {
            pdk = pdk.with_suggestion(format!(
                "Define it with --var {name}=VALUE or `pdk secret set {name}`"
            ));
        }
        pdk
    }
}

/// The variable expander. Stateless apart from its limits.
#[derive(Debug, Clone)]
pub struct Expander {
    max_depth: u32,
    max_output: usize,
    runtime_mode: RuntimeExprMode,
}

impl Default for Expander {
    fn default() -> Self {
        Self::new()
    }
}

impl Expander {
    pub fn new() -> Self {
        Self {
            max_depth: MAX_EXPAND_DEPTH,
            max_output: MAX_EXPAND_OUTPUT,
            runtime_mode: RuntimeExprMode::Preserve,
        }
    }

    pub fn with_runtime_mode(mut self, mode: RuntimeExprMode) -> Self {
        self.runtime_mode = mode;
        self
    }

    #[cfg(test)]
    fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    /// Expand every variable reference in `input`.
    pub fn expand(&self, input: &str, resolver: &VariableResolver) -> Result<String, ExpandError> {
        let mut active = Vec::new();
        self.expand_inner(input, resolver, &mut active, 0)
    }

    /// Expand every value of a map, keys untouched.
    pub fn expand_map(
        &self,
        map: &HashMap<String, String>,
        resolver: &VariableResolver,
    ) -> Result<HashMap<String, String>, ExpandError> {
        let mut out = HashMap::with_capacity(map.len());
        for (key, value) in map {
            out.insert(key.clone(), self.expand(value, resolver)?);
        }
        Ok(out)
    }

    fn expand_inner(
        &self,
        input: &str,
        resolver: &VariableResolver,
        active: &mut Vec<String>,
        depth: u32,
    ) -> Result<String, ExpandError> {
        if depth >= self.max_depth {
            return Err(ExpandError::RecursionLimit(self.max_depth));
        }

        let bytes = input.as_bytes();
        let mut out = String::with_capacity(input.len());
        let mut i = 0;

        while i < bytes.len() {
            // `\${` escapes the reference; the backslash is consumed.
            if bytes[i] == b'\\' && input[i + 1..].starts_with("${") {
                let (literal, consumed) = take_braced_literal(&input[i + 1..])?;
                out.push_str(literal);
                i += 1 + consumed;
                continue;
            }

            if input[i..].starts_with("${{") {
                let (expr, consumed) = take_runtime_expr(&input[i..])?;
                match self.runtime_mode {
                    RuntimeExprMode::Preserve => out.push_str(&input[i..i + consumed]),
                    RuntimeExprMode::Tag => {
                        out.push_str("<runtime:");
                        out.push_str(expr.trim());
                        out.push('>');
                    }
                }
                i += consumed;
                continue;
            }

            if input[i..].starts_with("${") {
                let (body, consumed) = take_braced_body(&input[i..])?;
                let replacement = self.substitute(body, resolver, active, depth)?;
                out.push_str(&replacement);
                i += consumed;
            } else {
                let ch = input[i..].chars().next().unwrap_or('\0');
                out.push(ch);
                i += ch.len_utf8();
            }

            if out.len() > self.max_output {
                return Err(ExpandError::OutputLimit(self.max_output));
            }
        }

        Ok(out)
    }

    /// Resolve one `${...}` body (name plus optional modifier).
    fn substitute(
        &self,
        body: &str,
        resolver: &VariableResolver,
        active: &mut Vec<String>,
        depth: u32,
    ) -> Result<String, ExpandError> {
        let (name, modifier) = split_modifier(body);

        if name.is_empty() {
            return Err(ExpandError::InvalidSyntax(format!(
                "empty variable name in '${{{body}}}'"
            )));
        }
        if !is_valid_name(name) {
            return Err(ExpandError::InvalidSyntax(format!(
                "invalid variable name '{name}'"
            )));
        }

        if active.iter().any(|n| n == name) {
            let start = active.iter().position(|n| n == name).unwrap_or(0);
            let mut chain: Vec<String> = active[start..].to_vec();
            chain.push(name.to_string());
            return Err(ExpandError::CircularReference { chain });
        }

        let resolved = resolver.resolve(name);

        match modifier {
            None => match resolved {
                Some(value) => self.reexpand(name, &value, resolver, active, depth),
                None => Ok(String::new()),
            },
            Some(Modifier::Default(default)) => match resolved {
                Some(value) => self.reexpand(name, &value, resolver, active, depth),
                // The default text is itself subject to expansion.
                None => self.expand_inner(default, resolver, active, depth + 1),
            },
            Some(Modifier::Required(message)) => match resolved {
                Some(value) => self.reexpand(name, &value, resolver, active, depth),
                None => Err(ExpandError::Required {
                    name: name.to_string(),
                    message: message.to_string(),
                }),
            },
        }
    }

    /// Re-scan a resolved value with `name` marked active for cycle
    /// detection.
    fn reexpand(
        &self,
        name: &str,
        value: &str,
        resolver: &VariableResolver,
        active: &mut Vec<String>,
        depth: u32,
    ) -> Result<String, ExpandError> {
        if !contains_variables(value) {
            return Ok(value.to_string());
        }
        active.push(name.to_string());
        let result = self.expand_inner(value, resolver, active, depth + 1);
        active.pop();
        result
    }
}

enum Modifier<'a> {
    Default(&'a str),
    Required(&'a str),
}

/// Split `NAME`, `NAME:-default`, `NAME:?message` into name + modifier.
fn split_modifier(body: &str) -> (&str, Option<Modifier<'_>>) {
    if let Some(pos) = body.find(":-") {
        (&body[..pos], Some(Modifier::Default(&body[pos + 2..])))
    } else if let Some(pos) = body.find(":?") {
        (&body[..pos], Some(Modifier::Required(&body[pos + 2..])))
    } else if let Some(pos) = body.find(':') {
        // A bare colon behaves like an empty default.
        (&body[..pos], Some(Modifier::Default("")))
    } else {
        (body, None)
    }
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Consume `${...}` starting at the head of `input`, honouring nested
/// `${` openings in modifier text. Returns (inner body, bytes consumed).
///
/// Scans raw bytes so stepping through multi-byte UTF-8 in the body
/// never slices mid-character; the returned offsets sit on the ASCII
/// braces and are always char boundaries.
fn take_braced_body(input: &str) -> Result<(&str, usize), ExpandError> {
    debug_assert!(input.starts_with("${"));
    let mut level = 1;
    let bytes = input.as_bytes();
    let mut i = 2;
    while i < bytes.len() {
        if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
            level += 1;
            i += 2;
        } else if bytes[i] == b'}' {
            level -= 1;
            if level == 0 {
                return Ok((&input[2..i], i + 1));
            }
            i += 1;
        } else {
            i += 1;
        }
    }
    Err(ExpandError::InvalidSyntax(format!(
        "unclosed variable reference '{}'",
        truncate(input, 40)
    )))
}

/// Consume the whole `${...}` group literally (for the `\${...}` escape).
fn take_braced_literal(input: &str) -> Result<(&str, usize), ExpandError> {
    let (_, consumed) = take_braced_body(input)?;
    Ok((&input[..consumed], consumed))
}

/// Consume `${{ expr }}`. Returns (expr text, bytes consumed).
fn take_runtime_expr(input: &str) -> Result<(&str, usize), ExpandError> {
    debug_assert!(input.starts_with("${{"));
    if let Some(end) = input.find("}}") {
        Ok((&input[3..end], end + 2))
    } else {
        Err(ExpandError::InvalidSyntax(format!(
            "unclosed runtime expression '{}'",
            truncate(input, 40)
        )))
    }
}

/// Returns true when `text` contains an unescaped `${` opener.
pub fn contains_variables(text: &str) -> bool {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && text[i + 1..].starts_with("${") {
            i += 3;
            continue;
        }
        if text[i..].starts_with("${") {
            return true;
        }
        // Step a whole character; a byte step would land inside
        // multi-byte UTF-8 and make the next slice panic.
        let ch = text[i..].chars().next().unwrap_or('\0');
        i += ch.len_utf8().max(1);
    }
    false
}

/// Names referenced by `text`, in order of first appearance, deduplicated.
/// Runtime `${{ }}` expressions are not scanned.
pub fn extract_names(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && text[i + 1..].starts_with("${") {
            if let Ok((_, consumed)) = take_braced_body(&text[i + 1..]) {
                i += 1 + consumed;
                continue;
            }
            i += 1;
            continue;
        }
        if text[i..].starts_with("${{") {
            if let Ok((_, consumed)) = take_runtime_expr(&text[i..]) {
                i += consumed;
                continue;
            }
            break;
        }
        if text[i..].starts_with("${") {
            match take_braced_body(&text[i..]) {
                Ok((body, consumed)) => {
                    let (name, _) = split_modifier(body);
                    if is_valid_name(name) && !names.iter().any(|n| n == name) {
                        names.push(name.to_string());
                    }
                    i += consumed;
                }
                Err(_) => break,
            }
        } else {
            let ch = text[i..].chars().next().unwrap_or('\0');
            i += ch.len_utf8().max(1);
        }
    }
    names
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
