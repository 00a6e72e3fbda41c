// Step filter algebra. Composable predicates decide, per (step, index,
// job), whether execution proceeds, and always carry a human-readable
// reason for plans and logs.
//
// Composite precedence: job gate, then exclusions, then the inclusion
// union. With no inclusions configured every step passing the gates runs.

use crate::fuzzy;
use parking_lot::Mutex;
use pdk_core::error::{codes, PdkError, PdkResult};
use pdk_core::pipeline::{Job, Pipeline, Step};
use pdk_core::RunContext;
use std::collections::HashMap;

/// Outcome of evaluating a filter against one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDecision {
    pub execute: bool,
    pub reason: String,
}

impl FilterDecision {
    pub fn run(reason: impl Into<String>) -> Self {
        Self {
            execute: true,
            reason: reason.into(),
        }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            execute: false,
            reason: reason.into(),
        }
    }
}

/// A step-range selector, numeric or named. Both endpoints inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeSpec {
    Numeric { start: usize, end: usize },
    Named { start: String, end: String },
}

/// User-supplied step selection, assembled from CLI flags.
#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    pub step_names: Vec<String>,
    /// 1-based indices.
    pub step_indices: Vec<usize>,
    pub ranges: Vec<RangeSpec>,
    pub skip_names: Vec<String>,
    pub job_names: Vec<String>,
    pub include_dependencies: bool,
    pub preview_only: bool,
}

impl FilterOptions {
    pub fn is_empty(&self) -> bool {
        self.step_names.is_empty()
            && self.step_indices.is_empty()
            && self.ranges.is_empty()
            && self.skip_names.is_empty()
            && self.job_names.is_empty()
    }

    pub fn has_inclusions(&self) -> bool {
        !self.step_names.is_empty() || !self.step_indices.is_empty() || !self.ranges.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Spec parsing
// ---------------------------------------------------------------------------

/// Parse an index spec: `"1,3,5"`, `"2-5"`, or mixed `"1,3-5,7"`.
/// Indices are 1-based.
pub fn parse_index_spec(spec: &str) -> PdkResult<Vec<usize>> {
    let mut out = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((a, b)) = part.split_once('-') {
            let start = parse_index(a)?;
            let end = parse_index(b)?;
            if start > end {
                return Err(invalid_spec(spec, "range start exceeds end"));
            }
            out.extend(start..=end);
        } else {
            out.push(parse_index(part)?);
        }
    }
    if out.is_empty() {
        return Err(invalid_spec(spec, "no indices"));
    }
    out.sort_unstable();
    out.dedup();
    Ok(out)
}

/// Parse a range spec: numeric `a-b` or named `"A"-"B"` (quotes optional
/// when the endpoints are not numeric).
pub fn parse_range_spec(spec: &str) -> PdkResult<RangeSpec> {
    let trimmed = spec.trim();

    // Quoted named range: "Start"-"End"
    if trimmed.starts_with('"') {
        if let Some((start, rest)) = split_quoted(trimmed) {
            let rest = rest
                .strip_prefix('-')
                .ok_or_else(|| invalid_spec(spec, "expected '-' between range names"))?;
            if let Some((end, remainder)) = split_quoted(rest) {
                if !remainder.is_empty() {
                    return Err(invalid_spec(spec, "trailing text after range"));
                }
                return Ok(RangeSpec::Named {
                    start: start.to_string(),
                    end: end.to_string(),
                });
            }
        }
        return Err(invalid_spec(spec, "unterminated quote"));
    }

    if let Some((a, b)) = trimmed.split_once('-') {
        if let (Ok(start), Ok(end)) = (a.trim().parse::<usize>(), b.trim().parse::<usize>()) {
            if start == 0 || end == 0 {
                return Err(invalid_spec(spec, "indices are 1-based"));
            }
            if start > end {
                return Err(invalid_spec(spec, "range start exceeds end"));
            }
            return Ok(RangeSpec::Numeric { start, end });
        }
        return Ok(RangeSpec::Named {
            start: a.trim().to_string(),
            end: b.trim().to_string(),
        });
    }

    Err(invalid_spec(spec, "expected 'a-b'"))
}

fn split_quoted(input: &str) -> Option<(&str, &str)> {
    let rest = input.strip_prefix('"')?;
    let end = rest.find('"')?;
    Some((&rest[..end], &rest[end + 1..]))
}

fn parse_index(s: &str) -> PdkResult<usize> {
    let n: usize = s
        .trim()
        .parse()
        .map_err(|_| invalid_spec(s, "not a number"))?;
    if n == 0 {
        return Err(invalid_spec(s, "indices are 1-based"));
    }
    Ok(n)
}

fn invalid_spec(spec: &str, detail: &str) -> PdkError {
    PdkError::new(
        codes::CONFIG_INVALID,
        format!("invalid step selector '{spec}': {detail}"),
    )
    .with_suggestion("Use forms like --step-index 1,3-5 or --step-range \"Build\"-\"Test\"")
}

// ---------------------------------------------------------------------------
// Primitive filters
// ---------------------------------------------------------------------------

/// A single step filter. Index is 1-based.
pub trait StepFilter: Send + Sync {
    fn describe(&self) -> String;
    fn evaluate(&self, step: &Step, index: usize, job: &Job) -> FilterDecision;
}

/// Matches step name or id against patterns: exact (case-insensitive),
/// then substring, then fuzzy.
pub struct NameFilter {
    patterns: Vec<String>,
}

impl NameFilter {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    fn matches_step(&self, step: &Step) -> bool {
        self.patterns.iter().any(|p| {
            fuzzy::matches(p, &step.name).is_some()
                || step
                    .id
                    .as_deref()
                    .is_some_and(|id| fuzzy::matches(p, id).is_some())
        })
    }
}

impl StepFilter for NameFilter {
    fn describe(&self) -> String {
        format!("name in [{}]", self.patterns.join(", "))
    }

    fn evaluate(&self, step: &Step, _index: usize, _job: &Job) -> FilterDecision {
        if self.matches_step(step) {
            FilterDecision::run(format!("matched name pattern for '{}'", step.name))
        } else {
            FilterDecision::skip("did not match any name patterns")
        }
    }
}

/// 1-based index membership.
pub struct IndexFilter {
    indices: Vec<usize>,
}

impl IndexFilter {
    pub fn new(indices: Vec<usize>) -> Self {
        Self { indices }
    }
}

impl StepFilter for IndexFilter {
    fn describe(&self) -> String {
        format!(
            "index in [{}]",
            self.indices
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }

    fn evaluate(&self, _step: &Step, index: usize, _job: &Job) -> FilterDecision {
        if self.indices.contains(&index) {
            FilterDecision::run(format!("index {index} selected"))
        } else {
            FilterDecision::skip(format!("index {index} not in the selected set"))
        }
    }
}

/// Inclusive range, numeric or by named endpoints. Named endpoints are
/// resolved against the owning job's step names on first use and cached
/// per job.
pub struct RangeFilter {
    spec: RangeSpec,
    /// job id → resolved bounds, or None when an endpoint is absent.
    resolved: Mutex<HashMap<String, Option<(usize, usize)>>>,
}

impl RangeFilter {
    pub fn new(spec: RangeSpec) -> Self {
        Self {
            spec,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    fn bounds_for(&self, job: &Job) -> Option<(usize, usize)> {
        match &self.spec {
            RangeSpec::Numeric { start, end } => Some((*start, *end)),
            RangeSpec::Named { start, end } => {
                let mut cache = self.resolved.lock();
                *cache.entry(job.id.clone()).or_insert_with(|| {
                    let s = job.find_step(start).map(|(i, _)| i + 1);
                    let e = job.find_step(end).map(|(i, _)| i + 1);
                    match (s, e) {
                        (Some(s), Some(e)) if s <= e => Some((s, e)),
                        (Some(s), Some(e)) => Some((e, s)),
                        _ => None,
                    }
                })
            }
        }
    }
}

impl StepFilter for RangeFilter {
    fn describe(&self) -> String {
        match &self.spec {
            RangeSpec::Numeric { start, end } => format!("index in {start}-{end}"),
            RangeSpec::Named { start, end } => format!("steps \"{start}\"-\"{end}\""),
        }
    }

    fn evaluate(&self, _step: &Step, index: usize, job: &Job) -> FilterDecision {
        match self.bounds_for(job) {
            Some((start, end)) if (start..=end).contains(&index) => {
                FilterDecision::run(format!("index {index} within {start}-{end}"))
            }
            Some((start, end)) => {
                FilterDecision::skip(format!("index {index} outside {start}-{end}"))
            }
            // Unresolvable named ranges skip at execution; validation
            // reports them as errors beforehand.
            None => FilterDecision::skip(format!(
                "range {} did not resolve in job '{}'",
                self.describe(),
                job.id
            )),
        }
    }
}

/// Inverted name matching.
pub struct ExclusionFilter {
    inner: NameFilter,
}

impl ExclusionFilter {
    pub fn new(patterns: Vec<String>) -> Self {
        Self {
            inner: NameFilter::new(patterns),
        }
    }
}

impl StepFilter for ExclusionFilter {
    fn describe(&self) -> String {
        format!("skip {}", self.inner.describe())
    }

    fn evaluate(&self, step: &Step, _index: usize, _job: &Job) -> FilterDecision {
        if self.inner.matches_step(step) {
            FilterDecision::skip(format!("excluded by skip pattern for '{}'", step.name))
        } else {
            FilterDecision::run("not excluded")
        }
    }
}

/// Membership over job id or display name, case-insensitive.
pub struct JobFilter {
    names: Vec<String>,
}

impl JobFilter {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.names.iter().any(|n| {
            job.id.eq_ignore_ascii_case(n) || job.name.eq_ignore_ascii_case(n)
        })
    }
}

// ---------------------------------------------------------------------------
// Composite
// ---------------------------------------------------------------------------

/// The composed predicate the step loop consults.
pub struct CompositeFilter {
    job_filter: Option<JobFilter>,
    exclusion: Option<ExclusionFilter>,
    inclusions: Vec<Box<dyn StepFilter>>,
}

impl CompositeFilter {
    /// Build from filter options plus the run context's single-job /
    /// single-step selectors.
    pub fn build(options: &FilterOptions, ctx: &RunContext) -> Self {
        let mut job_names = options.job_names.clone();
        if let Some(ref job) = ctx.job {
            job_names.push(job.clone());
        }

        let mut step_names = options.step_names.clone();
        if let Some(ref step) = ctx.step {
            step_names.push(step.clone());
        }

        let mut inclusions: Vec<Box<dyn StepFilter>> = Vec::new();
        if !step_names.is_empty() {
            inclusions.push(Box::new(NameFilter::new(step_names)));
        }
        if !options.step_indices.is_empty() {
            inclusions.push(Box::new(IndexFilter::new(options.step_indices.clone())));
        }
        for range in &options.ranges {
            inclusions.push(Box::new(RangeFilter::new(range.clone())));
        }

        Self {
            job_filter: (!job_names.is_empty()).then(|| JobFilter::new(job_names)),
            exclusion: (!options.skip_names.is_empty())
                .then(|| ExclusionFilter::new(options.skip_names.clone())),
            inclusions,
        }
    }

    /// Whether a whole job is selected by the job gate.
    pub fn job_selected(&self, job: &Job) -> bool {
        self.job_filter.as_ref().map_or(true, |f| f.matches(job))
    }

    /// Evaluate the full precedence chain for one step.
    pub fn evaluate(&self, step: &Step, index: usize, job: &Job) -> FilterDecision {
        if let Some(ref jf) = self.job_filter {
            if !jf.matches(job) {
                return FilterDecision::skip(format!("job '{}' not selected", job.id));
            }
        }

        if let Some(ref excl) = self.exclusion {
            let decision = excl.evaluate(step, index, job);
            if !decision.execute {
                return decision;
            }
        }

        if self.inclusions.is_empty() {
            return FilterDecision::run("no step filters configured");
        }

        // Union: any matching inclusion admits the step.
        let mut last_skip = None;
        for filter in &self.inclusions {
            let decision = filter.evaluate(step, index, job);
            if decision.execute {
                return decision;
            }
            last_skip = Some(decision);
        }

        if self.inclusions.len() == 1 {
            last_skip.unwrap_or_else(|| FilterDecision::skip("did not match any step filters"))
        } else {
            FilterDecision::skip("did not match any step filters")
        }
    }
}

/// Expand a job selection with the transitive dependencies of every
/// selected job. A no-op unless `include_dependencies` is set and a job
/// filter is in play.
pub fn expand_include_dependencies(
    options: &FilterOptions,
    ctx: &RunContext,
    pipeline: &Pipeline,
) -> FilterOptions {
    let mut expanded = options.clone();
    if !options.include_dependencies {
        return expanded;
    }
    if options.job_names.is_empty() && ctx.job.is_none() {
        return expanded;
    }

    let gate = CompositeFilter::build(options, ctx);
    let mut selected: Vec<String> = pipeline
        .jobs
        .iter()
        .filter(|j| gate.job_selected(j))
        .map(|j| j.id.clone())
        .collect();

    let mut stack = selected.clone();
    while let Some(id) = stack.pop() {
        if let Some(job) = pipeline.job(&id) {
            for dep in &job.depends_on {
                if !selected.iter().any(|s| s == dep) {
                    selected.push(dep.clone());
                    stack.push(dep.clone());
                }
            }
        }
    }

    expanded.job_names = selected;
    expanded
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A problem found while validating filter options against a pipeline.
#[derive(Debug, Clone)]
pub struct FilterIssue {
    pub error: bool,
    pub message: String,
}

/// Report inclusion patterns that match nothing (warnings; execution
/// proceeds) and named ranges with absent endpoints (errors).
pub fn validate_filters(options: &FilterOptions, pipeline: &Pipeline) -> Vec<FilterIssue> {
    let mut issues = Vec::new();

    for pattern in &options.step_names {
        let matched = pipeline.jobs.iter().any(|job| {
            job.steps.iter().any(|s| {
                fuzzy::matches(pattern, &s.name).is_some()
                    || s.id
                        .as_deref()
                        .is_some_and(|id| fuzzy::matches(pattern, id).is_some())
            })
        });
        if !matched {
            issues.push(FilterIssue {
                error: false,
                message: format!("step filter '{pattern}' does not match any step"),
            });
        }
    }

    for job_name in &options.job_names {
        if pipeline.find_job(job_name).is_none() {
            issues.push(FilterIssue {
                error: false,
                message: format!("job filter '{job_name}' does not match any job"),
            });
        }
    }

    for range in &options.ranges {
        if let RangeSpec::Named { start, end } = range {
            let resolvable = pipeline.jobs.iter().any(|job| {
                job.find_step(start).is_some() && job.find_step(end).is_some()
            });
            if !resolvable {
                issues.push(FilterIssue {
                    error: true,
                    message: format!(
                        "named range \"{start}\"-\"{end}\" has endpoints absent from every job"
                    ),
                });
            }
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdk_core::pipeline::Provider;
    use pdk_core::SecretMasker;
    use std::sync::Arc;

    fn ctx() -> RunContext {
        RunContext::new("/tmp/ws", HashMap::new(), &Arc::new(SecretMasker::new()))
    }

    fn three_step_job() -> Job {
        let mut job = Job::new("build");
        job.steps.push(pdk_core::Step::script("Checkout", "git checkout"));
        job.steps.push(pdk_core::Step::script("Build", "make"));
        job.steps.push(pdk_core::Step::script("Test", "make test"));
        job
    }

    #[test]
    fn test_parse_index_spec_mixed() {
        assert_eq!(parse_index_spec("1,3-5,7").unwrap(), vec![1, 3, 4, 5, 7]);
        assert_eq!(parse_index_spec("2-5").unwrap(), vec![2, 3, 4, 5]);
        assert!(parse_index_spec("0").is_err());
        assert!(parse_index_spec("5-2").is_err());
        assert!(parse_index_spec("x").is_err());
    }

    #[test]
    fn test_parse_range_spec_forms() {
        assert_eq!(
            parse_range_spec("2-5").unwrap(),
            RangeSpec::Numeric { start: 2, end: 5 }
        );
        assert_eq!(
            parse_range_spec("\"Build\"-\"Test\"").unwrap(),
            RangeSpec::Named {
                start: "Build".into(),
                end: "Test".into()
            }
        );
        assert_eq!(
            parse_range_spec("Build-Test").unwrap(),
            RangeSpec::Named {
                start: "Build".into(),
                end: "Test".into()
            }
        );
        assert!(parse_range_spec("5").is_err());
    }

    #[test]
    fn test_name_filter_selects_by_name() {
        let job = three_step_job();
        let options = FilterOptions {
            step_names: vec!["Build".into(), "Test".into()],
            ..Default::default()
        };
        let composite = CompositeFilter::build(&options, &ctx());

        let checkout = composite.evaluate(&job.steps[0], 1, &job);
        assert!(!checkout.execute);
        assert_eq!(checkout.reason, "did not match any name patterns");

        assert!(composite.evaluate(&job.steps[1], 2, &job).execute);
        assert!(composite.evaluate(&job.steps[2], 3, &job).execute);
    }

    #[test]
    fn test_no_inclusions_runs_everything() {
        let job = three_step_job();
        let composite = CompositeFilter::build(&FilterOptions::default(), &ctx());
        for (i, step) in job.steps.iter().enumerate() {
            assert!(composite.evaluate(step, i + 1, &job).execute);
        }
    }

    #[test]
    fn test_exclusion_beats_inclusion() {
        let job = three_step_job();
        let options = FilterOptions {
            step_names: vec!["Build".into()],
            skip_names: vec!["Build".into()],
            ..Default::default()
        };
        let composite = CompositeFilter::build(&options, &ctx());
        let decision = composite.evaluate(&job.steps[1], 2, &job);
        assert!(!decision.execute);
        assert!(decision.reason.contains("excluded"));
    }

    #[test]
    fn test_job_gate() {
        let job = three_step_job();
        let options = FilterOptions {
            job_names: vec!["deploy".into()],
            ..Default::default()
        };
        let composite = CompositeFilter::build(&options, &ctx());
        assert!(!composite.job_selected(&job));
        let decision = composite.evaluate(&job.steps[0], 1, &job);
        assert!(!decision.execute);
        assert!(decision.reason.contains("not selected"));
    }

    #[test]
    fn test_index_filter_union_with_names() {
        let job = three_step_job();
        let options = FilterOptions {
            step_names: vec!["Checkout".into()],
            step_indices: vec![3],
            ..Default::default()
        };
        let composite = CompositeFilter::build(&options, &ctx());
        assert!(composite.evaluate(&job.steps[0], 1, &job).execute);
        assert!(!composite.evaluate(&job.steps[1], 2, &job).execute);
        assert!(composite.evaluate(&job.steps[2], 3, &job).execute);
    }

    #[test]
    fn test_named_range_resolution_and_cache() {
        let job = three_step_job();
        let filter = RangeFilter::new(RangeSpec::Named {
            start: "build".into(),
            end: "test".into(),
        });
        assert!(!filter.evaluate(&job.steps[0], 1, &job).execute);
        assert!(filter.evaluate(&job.steps[1], 2, &job).execute);
        assert!(filter.evaluate(&job.steps[2], 3, &job).execute);
        // Second pass hits the per-job cache.
        assert!(filter.evaluate(&job.steps[1], 2, &job).execute);
    }

    #[test]
    fn test_unresolvable_named_range_skips() {
        let job = three_step_job();
        let filter = RangeFilter::new(RangeSpec::Named {
            start: "nonexistent".into(),
            end: "test".into(),
        });
        let decision = filter.evaluate(&job.steps[1], 2, &job);
        assert!(!decision.execute);
        assert!(decision.reason.contains("did not resolve"));
    }

    #[test]
    fn test_validate_reports_zero_match_warning() {
        let mut pipeline = Pipeline::new("ci", Provider::GitHub);
        pipeline.jobs.push(three_step_job());
        let options = FilterOptions {
            step_names: vec!["nosuchstep".into()],
            ..Default::default()
        };
        let issues = validate_filters(&options, &pipeline);
        assert_eq!(issues.len(), 1);
        assert!(!issues[0].error);
    }

    #[test]
    fn test_validate_reports_absent_range_endpoint_error() {
        let mut pipeline = Pipeline::new("ci", Provider::GitHub);
        pipeline.jobs.push(three_step_job());
        let options = FilterOptions {
            ranges: vec![RangeSpec::Named {
                start: "Build".into(),
                end: "Missing".into(),
            }],
            ..Default::default()
        };
        let issues = validate_filters(&options, &pipeline);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].error);
    }

    #[test]
    fn test_include_dependencies_expands_selection() {
        let mut pipeline = Pipeline::new("ci", Provider::GitHub);
        let build = three_step_job();
        let mut deploy = Job::new("deploy");
        deploy.depends_on.push("build".to_string());
        deploy.steps.push(pdk_core::Step::script("Ship", "sh ship.sh"));
        pipeline.jobs.push(build);
        pipeline.jobs.push(deploy);

        let options = FilterOptions {
            job_names: vec!["deploy".into()],
            include_dependencies: true,
            ..Default::default()
        };
        let expanded = expand_include_dependencies(&options, &ctx(), &pipeline);
        assert!(expanded.job_names.contains(&"deploy".to_string()));
        assert!(expanded.job_names.contains(&"build".to_string()));

        // Without the flag the selection is untouched.
        let options = FilterOptions {
            job_names: vec!["deploy".into()],
            ..Default::default()
        };
        let same = expand_include_dependencies(&options, &ctx(), &pipeline);
        assert_eq!(same.job_names, vec!["deploy".to_string()]);
    }

    #[test]
    fn test_fuzzy_name_match_within_threshold() {
        let job = three_step_job();
        let options = FilterOptions {
            step_names: vec!["Biuld".into()],
            ..Default::default()
        };
        let composite = CompositeFilter::build(&options, &ctx());
        assert!(composite.evaluate(&job.steps[1], 2, &job).execute);
    }
}
