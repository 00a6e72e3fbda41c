// Job scheduler. Drives a validated pipeline to completion: dependency
// ordering, condition gating, the per-job step loop, runner selection,
// and cancellation semantics.

use crate::condition::{evaluate_condition, interpolate_runtime, AggregateStatus};
use crate::exec::ExecutorRegistry;
use crate::filter::{expand_include_dependencies, CompositeFilter, FilterOptions};
use crate::graph::DependencyGraph;
use crate::runner::{map_runner_image, select_runner};
use pdk_core::error::{codes, PdkError, PdkResult};
use pdk_core::expand::Expander;
use pdk_core::pipeline::{Job, Pipeline, Step};
use pdk_core::ports::{ContainerDriver, RunnerType, StepRequest};
use pdk_core::{
    JobResult, PipelineResult, RunContext, SecretMasker, StepResult, VariableResolver,
    VariableSource,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Execute independent jobs concurrently. Requires the docker
    /// runner; host mode forbids parallel jobs.
    pub parallel: bool,
    /// Worker-pool cap for parallel mode.
    pub max_parallel_jobs: usize,
    /// Grace period between the cancellation signal and force kill.
    pub grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            max_parallel_jobs: 4,
            grace: Duration::from_secs(pdk_core::constants::CANCELLATION_GRACE_SECS),
        }
    }
}

/// Drives jobs and steps to completion against the executor registry
/// and the container driver.
pub struct JobScheduler {
    registry: Arc<ExecutorRegistry>,
    driver: Arc<dyn ContainerDriver>,
    masker: Arc<SecretMasker>,
    config: SchedulerConfig,
}

impl JobScheduler {
    pub fn new(
        registry: Arc<ExecutorRegistry>,
        driver: Arc<dyn ContainerDriver>,
        masker: Arc<SecretMasker>,
    ) -> Self {
        Self {
            registry,
            driver,
            masker,
            config: SchedulerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the pipeline. `order_hint` carries the execution order from a
    /// prior dry run; without it the order is recomputed here.
    pub async fn run_pipeline(
        &self,
        pipeline: &Pipeline,
        ctx: &RunContext,
        options: &FilterOptions,
        resolver: &VariableResolver,
        order_hint: Option<Vec<String>>,
        cancel: CancellationToken,
    ) -> PdkResult<PipelineResult> {
        let started = Instant::now();

        let order = match order_hint {
            Some(order) if !order.is_empty() => order,
            _ => self.compute_order(pipeline)?,
        };

        let health = self.driver.health().await;
        let runner = select_runner(ctx.runner_mode, &health)?;
        if runner == RunnerType::Host {
            // One warning per run about reduced isolation.
            tracing::warn!(
                "running steps directly on the host; no container isolation is applied"
            );
        }
        if self.config.parallel && runner == RunnerType::Host {
            return Err(PdkError::new(
                codes::RUNNER_PARALLEL_HOST,
                "parallel job execution requires the docker runner",
            )
            .with_suggestion("Drop --host, or disable parallel execution"));
        }

        let options = expand_include_dependencies(options, ctx, pipeline);
        let filter = Arc::new(CompositeFilter::build(&options, ctx));

        let job_results = if self.config.parallel {
            self.run_jobs_parallel(pipeline, ctx, resolver, &order, &filter, runner, &cancel)
                .await
        } else {
            self.run_jobs_sequential(pipeline, ctx, resolver, &order, &filter, runner, &cancel)
                .await
        };

        let success = job_results.iter().all(|j| j.success);
        Ok(PipelineResult {
            pipeline: pipeline.name.clone(),
            success,
            duration: started.elapsed(),
            cancelled: cancel.is_cancelled(),
            jobs: job_results,
        })
    }

    fn compute_order(&self, pipeline: &Pipeline) -> PdkResult<Vec<String>> {
        let mut graph = DependencyGraph::new();
        for job in &pipeline.jobs {
            graph.add_node(job.id.clone());
            for dep in &job.depends_on {
                graph.add_dependency(&job.id, dep);
            }
        }
        graph.execution_order().map_err(|cycle| {
            PdkError::new(
                codes::PARSER_CIRCULAR_DEPENDENCY,
                format!("circular job dependency: {cycle}"),
            )
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_jobs_sequential(
        &self,
        pipeline: &Pipeline,
        ctx: &RunContext,
        resolver: &VariableResolver,
        order: &[String],
        filter: &Arc<CompositeFilter>,
        runner: RunnerType,
        cancel: &CancellationToken,
    ) -> Vec<JobResult> {
        let mut results: Vec<JobResult> = Vec::with_capacity(order.len());
        let mut succeeded: Vec<String> = Vec::new();
        let mut any_failure = false;

        for job_id in order {
            let Some(job) = pipeline.job(job_id) else {
                continue;
            };

            if cancel.is_cancelled() {
                results.push(JobResult::skipped(&job.id, &job.name, "run was cancelled"));
                continue;
            }

            if !filter.job_selected(job) {
                results.push(JobResult::skipped(
                    &job.id,
                    &job.name,
                    "not selected by job filter",
                ));
                continue;
            }

            let deps_ok = job.depends_on.iter().all(|d| succeeded.contains(d));
            let status = AggregateStatus {
                any_failure: any_failure || !deps_ok,
                cancelled: cancel.is_cancelled(),
            };

            if !evaluate_condition(job.condition.as_ref(), status, resolver) {
                let reason = if deps_ok {
                    "condition evaluated to false"
                } else {
                    "dependency did not succeed"
                };
                tracing::info!(job = %job.id, "skipping job ({reason})");
                results.push(JobResult::skipped(&job.id, &job.name, reason));
                continue;
            }

            let result = self
                .run_job(job, pipeline, ctx, resolver, filter, runner, cancel.clone())
                .await;

            if result.success && !result.skipped {
                succeeded.push(job.id.clone());
            }
            if !result.success {
                any_failure = true;
            }
            results.push(result);
        }

        results
    }

    /// Wave-based parallel execution: every job whose dependencies are
    /// satisfied starts concurrently, bounded by the worker-pool cap.
    #[allow(clippy::too_many_arguments)]
    async fn run_jobs_parallel(
        &self,
        pipeline: &Pipeline,
        ctx: &RunContext,
        resolver: &VariableResolver,
        order: &[String],
        filter: &Arc<CompositeFilter>,
        runner: RunnerType,
        cancel: &CancellationToken,
    ) -> Vec<JobResult> {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.config.max_parallel_jobs));
        let mut done: HashMap<String, JobResult> = HashMap::new();
        let mut succeeded: Vec<String> = Vec::new();
        let mut any_failure = false;
        let mut remaining: Vec<&str> = order.iter().map(String::as_str).collect();

        while !remaining.is_empty() {
            // This wave: jobs whose dependencies have already completed.
            let wave: Vec<&str> = remaining
                .iter()
                .copied()
                .filter(|id| {
                    pipeline
                        .job(id)
                        .map(|j| j.depends_on.iter().all(|d| done.contains_key(d)))
                        .unwrap_or(false)
                })
                .collect();
            if wave.is_empty() {
                break;
            }
            remaining.retain(|id| !wave.contains(id));

            let mut handles = Vec::with_capacity(wave.len());
            for job_id in wave {
                let Some(job) = pipeline.job(job_id) else {
                    continue;
                };

                if cancel.is_cancelled() {
                    done.insert(
                        job.id.clone(),
                        JobResult::skipped(&job.id, &job.name, "run was cancelled"),
                    );
                    continue;
                }
                if !filter.job_selected(job) {
                    done.insert(
                        job.id.clone(),
                        JobResult::skipped(&job.id, &job.name, "not selected by job filter"),
                    );
                    continue;
                }

                let deps_ok = job.depends_on.iter().all(|d| succeeded.contains(d));
                let status = AggregateStatus {
                    any_failure: any_failure || !deps_ok,
                    cancelled: cancel.is_cancelled(),
                };
                if !evaluate_condition(job.condition.as_ref(), status, resolver) {
                    let reason = if deps_ok {
                        "condition evaluated to false"
                    } else {
                        "dependency did not succeed"
                    };
                    done.insert(
                        job.id.clone(),
                        JobResult::skipped(&job.id, &job.name, reason),
                    );
                    continue;
                }

                // Each parallel job gets its own resolver fork so that
                // PDK_JOB / PDK_STEP updates cannot race.
                let job = job.clone();
                let pipeline = pipeline.clone();
                let ctx = ctx.clone();
                let job_resolver = resolver.fork();
                let filter = Arc::clone(filter);
                let cancel = cancel.clone();
                let semaphore = Arc::clone(&semaphore);
                let scheduler = self.clone_for_task();

                handles.push(tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    scheduler
                        .run_job(&job, &pipeline, &ctx, &job_resolver, &filter, runner, cancel)
                        .await
                }));
            }

            for handle in handles {
                if let Ok(result) = handle.await {
                    if result.success && !result.skipped {
                        succeeded.push(result.job_id.clone());
                    }
                    if !result.success {
                        any_failure = true;
                    }
                    done.insert(result.job_id.clone(), result);
                }
            }
        }

        // Anything never reached (cycle remnants, cancelled waves).
        for id in remaining {
            if let Some(job) = pipeline.job(id) {
                done.insert(
                    job.id.clone(),
                    JobResult::skipped(&job.id, &job.name, "dependencies never completed"),
                );
            }
        }

        order
            .iter()
            .filter_map(|id| done.remove(id))
            .collect()
    }

    fn clone_for_task(&self) -> JobScheduler {
        JobScheduler {
            registry: Arc::clone(&self.registry),
            driver: Arc::clone(&self.driver),
            masker: Arc::clone(&self.masker),
            config: self.config.clone(),
        }
    }

    /// Run one job's step loop.
    #[allow(clippy::too_many_arguments)]
    async fn run_job(
        &self,
        job: &Job,
        pipeline: &Pipeline,
        ctx: &RunContext,
        resolver: &VariableResolver,
        filter: &CompositeFilter,
        runner: RunnerType,
        cancel: CancellationToken,
    ) -> JobResult {
        let started = Instant::now();
        tracing::info!(job = %job.id, runner = %runner, "starting job");

        resolver.set("PDK_JOB", job.id.clone(), VariableSource::BuiltIn);
        resolver.set("PDK_RUNNER", runner.to_string(), VariableSource::BuiltIn);

        let expander = Expander::new();

        // Job container lifecycle (docker runner only).
        let container_id = if runner == RunnerType::Docker {
            let image = map_runner_image(&job.runs_on);
            let env = self.job_environment(job, pipeline, resolver, &expander);
            match self
                .driver
                .start_container(&image, &env, &ctx.working_dir, cancel.clone())
                .await
            {
                Ok(id) => Some(id),
                Err(e) => {
                    return JobResult {
                        job_id: job.id.clone(),
                        name: job.name.clone(),
                        success: false,
                        error: Some(self.masker.mask(&e.to_string())),
                        duration: started.elapsed(),
                        steps: Vec::new(),
                        skipped: false,
                        note: None,
                    };
                }
            }
        } else {
            None
        };

        let mut steps: Vec<StepResult> = Vec::with_capacity(job.steps.len());
        let mut job_failed = false;

        for (i, step) in job.steps.iter().enumerate() {
            let index = i + 1;
            resolver.set("PDK_STEP", step.name.clone(), VariableSource::BuiltIn);

            if cancel.is_cancelled() {
                steps.push(StepResult::skipped(&step.name, "run was cancelled"));
                continue;
            }

            let decision = filter.evaluate(step, index, job);
            if !decision.execute {
                tracing::info!(job = %job.id, step = %step.name, "skipping step ({})", decision.reason);
                steps.push(StepResult::skipped(&step.name, decision.reason));
                continue;
            }

            // After a hard failure only Failure/Always-shaped conditions
            // can re-admit a step.
            let status = AggregateStatus {
                any_failure: job_failed,
                cancelled: cancel.is_cancelled(),
            };
            if !evaluate_condition(step.condition.as_ref(), status, resolver) {
                let reason = if job_failed {
                    "previous step failed"
                } else {
                    "condition evaluated to false"
                };
                steps.push(StepResult::skipped(&step.name, reason));
                continue;
            }

            tracing::info!(job = %job.id, step = %step.name, index, "starting step");
            let result = self
                .run_step(
                    step,
                    job,
                    pipeline,
                    ctx,
                    resolver,
                    &expander,
                    runner,
                    container_id.clone(),
                    status,
                    cancel.clone(),
                )
                .await;

            if !result.success && !step.continue_on_error {
                job_failed = true;
            }
            if !result.success && step.continue_on_error {
                tracing::info!(
                    job = %job.id,
                    step = %step.name,
                    "step failed but continue-on-error is set"
                );
            }
            steps.push(result);
        }

        if let Some(id) = container_id {
            if let Err(e) = self.driver.stop(&id).await {
                tracing::warn!(job = %job.id, "failed to stop job container: {e}");
            }
        }

        // Job success: every executed step either succeeded or carries
        // continue-on-error.
        let success = steps
            .iter()
            .zip(job.steps.iter())
            .all(|(result, step)| result.success || step.continue_on_error);

        tracing::info!(
            job = %job.id,
            success,
            duration_ms = started.elapsed().as_millis() as u64,
            "job finished"
        );

        JobResult {
            job_id: job.id.clone(),
            name: job.name.clone(),
            success,
            error: steps
                .iter()
                .find(|s| !s.success)
                .and_then(|s| s.error.clone()),
            duration: started.elapsed(),
            steps,
            skipped: false,
            note: None,
        }
    }

    /// Expand, dispatch, and capture one step. Domain errors become a
    /// failed StepResult here; they never abort the job directly.
    #[allow(clippy::too_many_arguments)]
    async fn run_step(
        &self,
        step: &Step,
        job: &Job,
        pipeline: &Pipeline,
        ctx: &RunContext,
        resolver: &VariableResolver,
        expander: &Expander,
        runner: RunnerType,
        container_id: Option<String>,
        status: AggregateStatus,
        cancel: CancellationToken,
    ) -> StepResult {
        let started = Instant::now();

        let expanded = match self.expand_step(step, job, pipeline, resolver, expander, status) {
            Ok(expanded) => expanded,
            Err(e) => {
                return StepResult::failure(
                    &step.name,
                    self.masker.mask(&e.to_string()),
                    started.elapsed(),
                );
            }
        };

        let Some(executor) = self.registry.get(step.kind, runner) else {
            return StepResult::failure(
                &step.name,
                format!("no {runner} executor registered for kind {}", step.kind),
                started.elapsed(),
            );
        };

        let env = self.step_environment(&expanded, job, pipeline, resolver, expander);
        let request = StepRequest {
            step: expanded,
            env,
            working_dir: ctx.working_dir.clone(),
            workspace_dir: ctx.working_dir.clone(),
            artifacts_dir: ctx.artifacts_dir.clone(),
            container_id,
        };

        // Timeout: the tighter of the job timeout and the invocation
        // timeout, expressed as a derived token with a deadline.
        let timeout = job
            .timeout_minutes
            .map(|m| Duration::from_secs(m * 60))
            .into_iter()
            .chain(ctx.timeout)
            .min();

        let step_cancel = cancel.child_token();
        let execution = executor.execute(&request, step_cancel.clone());

        let outcome = match timeout {
            Some(limit) => {
                tokio::select! {
                    result = execution => result,
                    _ = tokio::time::sleep(limit) => {
                        step_cancel.cancel();
                        Err(PdkError::new(
                            codes::RUNNER_STEP_TIMEOUT,
                            format!(
                                "step '{}' exceeded its timeout of {}s",
                                step.name,
                                limit.as_secs()
                            ),
                        ))
                    }
                }
            }
            None => execution.await,
        };

        match outcome {
            Ok(mut result) => {
                // Everything the executor returned goes through the
                // masker before anyone can render it.
                if let Some(output) = result.output.take() {
                    result.output = Some(self.masker.mask(&output));
                }
                if let Some(error) = result.error.take() {
                    result.error = Some(self.masker.mask(&error));
                }
                result
            }
            Err(e) => {
                let mut failure = StepResult::failure(
                    &step.name,
                    self.masker.mask(&e.to_string()),
                    started.elapsed(),
                );
                if e.code == codes::RUNNER_CANCELLED {
                    failure.note = Some("cancelled".to_string());
                }
                failure
            }
        }
    }

    /// Expand the variable-bearing fields of a step.
    fn expand_step(
        &self,
        step: &Step,
        job: &Job,
        pipeline: &Pipeline,
        resolver: &VariableResolver,
        expander: &Expander,
        status: AggregateStatus,
    ) -> PdkResult<Step> {
        // Pipeline and job variables join the resolver at Configuration
        // precedence for the duration of expansion.
        for (name, value) in &pipeline.variables {
            if !resolver.contains(name) {
                resolver.set(name.clone(), value.clone(), VariableSource::Configuration);
            }
        }
        for (name, value) in &job.env {
            resolver.set(name.clone(), value.clone(), VariableSource::Configuration);
        }

        let mut expanded = step.clone();
        if let Some(script) = &step.script {
            let runtime = interpolate_runtime(script, status, resolver);
            expanded.script = Some(expander.expand(&runtime, resolver)?);
        }
        if let Some(wd) = &step.working_dir {
            expanded.working_dir = Some(expander.expand(wd, resolver)?);
        }
        expanded.env = expander.expand_map(&step.env, resolver)?;
        expanded.with = expander.expand_map(&step.with, resolver)?;
        Ok(expanded)
    }

    /// Merged environment for a step's process or container.
    fn step_environment(
        &self,
        step: &Step,
        job: &Job,
        pipeline: &Pipeline,
        resolver: &VariableResolver,
        expander: &Expander,
    ) -> HashMap<String, String> {
        let mut env = self.job_environment(job, pipeline, resolver, expander);
        for (key, value) in &step.env {
            env.insert(key.clone(), value.clone());
        }
        env
    }

    fn job_environment(
        &self,
        job: &Job,
        pipeline: &Pipeline,
        resolver: &VariableResolver,
        expander: &Expander,
    ) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = pipeline.variables.clone();
        for (key, value) in &job.env {
            let value = expander
                .expand(value, resolver)
                .unwrap_or_else(|_| value.clone());
            env.insert(key.clone(), value);
        }
        for name in ["PDK_VERSION", "PDK_WORKSPACE", "PDK_JOB", "PDK_RUNNER", "PDK_STEP"] {
            if let Some(value) = resolver.resolve(name) {
                env.insert(name.to_string(), value);
            }
        }
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pdk_core::pipeline::{Condition, Provider};
    use pdk_core::ports::DriverHealth;
    use std::path::Path;
    use tempfile::TempDir;

    /// Driver that reports unavailable; Auto mode then picks the host.
    struct OfflineDriver;

    #[async_trait]
    impl ContainerDriver for OfflineDriver {
        async fn health(&self) -> DriverHealth {
            DriverHealth {
                available: false,
                error: Some("offline".into()),
                ..Default::default()
            }
        }
        async fn start_container(
            &self,
            _image: &str,
            _env: &HashMap<String, String>,
            _workspace: &Path,
            _cancel: CancellationToken,
        ) -> PdkResult<String> {
            Err(PdkError::docker_unavailable("offline"))
        }
        async fn exec(
            &self,
            _container_id: &str,
            _command: &str,
            _shell: &str,
            _cancel: CancellationToken,
        ) -> PdkResult<i32> {
            Err(PdkError::docker_unavailable("offline"))
        }
        async fn collect_output(&self, _container_id: &str) -> PdkResult<String> {
            Ok(String::new())
        }
        async fn stop(&self, _container_id: &str) -> PdkResult<()> {
            Ok(())
        }
    }

    fn scheduler() -> (JobScheduler, Arc<SecretMasker>) {
        let driver: Arc<dyn ContainerDriver> = Arc::new(OfflineDriver);
        let registry = Arc::new(ExecutorRegistry::standard(Arc::clone(&driver)));
        let masker = Arc::new(SecretMasker::new());
        (
            JobScheduler::new(registry, driver, Arc::clone(&masker)),
            masker,
        )
    }

    fn fixture(dir: &TempDir) -> (RunContext, VariableResolver) {
        let masker = Arc::new(SecretMasker::new());
        let ctx = RunContext::new(dir.path(), HashMap::new(), &masker);
        let resolver = VariableResolver::new();
        resolver.load_builtins();
        (ctx, resolver)
    }

    fn script_job(id: &str, steps: &[(&str, &str)]) -> Job {
        let mut job = Job::new(id);
        for (name, script) in steps {
            job.steps.push(Step::script(*name, *script));
        }
        job
    }

    #[tokio::test]
    async fn test_sequential_pipeline_runs_in_dependency_order() {
        let dir = TempDir::new().unwrap();
        let (sched, _) = scheduler();
        let (ctx, resolver) = fixture(&dir);

        let mut pipeline = Pipeline::new("ci", Provider::GitHub);
        let mut second = script_job("second", &[("append", "echo second >> order.txt")]);
        second.depends_on.push("first".to_string());
        pipeline.jobs.push(second);
        pipeline
            .jobs
            .push(script_job("first", &[("append", "echo first > order.txt")]));

        let result = sched
            .run_pipeline(
                &pipeline,
                &ctx,
                &FilterOptions::default(),
                &resolver,
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.jobs[0].job_id, "first");
        assert_eq!(result.jobs[1].job_id, "second");
        let order = std::fs::read_to_string(dir.path().join("order.txt")).unwrap();
        assert_eq!(order.lines().collect::<Vec<_>>(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_failure_skips_remaining_steps_except_failure_and_always() {
        let dir = TempDir::new().unwrap();
        let (sched, _) = scheduler();
        let (ctx, resolver) = fixture(&dir);

        let mut job = script_job(
            "build",
            &[("boom", "exit 1"), ("after", "echo nope"), ("cleanup", "echo bye")],
        );
        job.steps[2].condition = Some(Condition::Always);
        let mut rescue = Step::script("rescue", "echo rescued");
        rescue.condition = Some(Condition::Failure);
        job.steps.push(rescue);

        let mut pipeline = Pipeline::new("ci", Provider::GitHub);
        pipeline.jobs.push(job);

        let result = sched
            .run_pipeline(
                &pipeline,
                &ctx,
                &FilterOptions::default(),
                &resolver,
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!result.success);
        let steps = &result.jobs[0].steps;
        assert!(!steps[0].success);
        assert!(steps[1].skipped);
        assert_eq!(steps[1].note.as_deref(), Some("previous step failed"));
        assert!(!steps[2].skipped, "always() step still runs");
        assert!(!steps[3].skipped, "failure() step still runs");
    }

    #[tokio::test]
    async fn test_continue_on_error_keeps_job_green() {
        let dir = TempDir::new().unwrap();
        let (sched, _) = scheduler();
        let (ctx, resolver) = fixture(&dir);

        let mut job = script_job("build", &[("flaky", "exit 1"), ("after", "echo ok")]);
        job.steps[0].continue_on_error = true;
        let mut pipeline = Pipeline::new("ci", Provider::GitHub);
        pipeline.jobs.push(job);

        let result = sched
            .run_pipeline(
                &pipeline,
                &ctx,
                &FilterOptions::default(),
                &resolver,
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(result.success);
        assert!(!result.jobs[0].steps[0].success);
        assert!(!result.jobs[0].steps[1].skipped);
    }

    #[tokio::test]
    async fn test_step_filter_reports_reason() {
        let dir = TempDir::new().unwrap();
        let (sched, _) = scheduler();
        let (ctx, resolver) = fixture(&dir);

        let mut pipeline = Pipeline::new("ci", Provider::GitHub);
        pipeline.jobs.push(script_job(
            "build",
            &[
                ("Checkout", "echo checkout"),
                ("Build", "echo build"),
                ("Test", "echo test"),
            ],
        ));

        let options = FilterOptions {
            step_names: vec!["Build".into(), "Test".into()],
            ..Default::default()
        };
        let result = sched
            .run_pipeline(
                &pipeline,
                &ctx,
                &options,
                &resolver,
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let steps = &result.jobs[0].steps;
        assert!(steps[0].skipped);
        assert_eq!(
            steps[0].note.as_deref(),
            Some("did not match any name patterns")
        );
        assert!(!steps[1].skipped);
        assert!(!steps[2].skipped);
    }

    #[tokio::test]
    async fn test_dependent_job_skipped_after_failure() {
        let dir = TempDir::new().unwrap();
        let (sched, _) = scheduler();
        let (ctx, resolver) = fixture(&dir);

        let mut pipeline = Pipeline::new("ci", Provider::GitHub);
        pipeline.jobs.push(script_job("build", &[("boom", "exit 1")]));
        let mut deploy = script_job("deploy", &[("ship", "echo ship")]);
        deploy.depends_on.push("build".to_string());
        pipeline.jobs.push(deploy);

        let result = sched
            .run_pipeline(
                &pipeline,
                &ctx,
                &FilterOptions::default(),
                &resolver,
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.jobs[1].skipped);
        assert_eq!(
            result.jobs[1].note.as_deref(),
            Some("dependency did not succeed")
        );
    }

    #[tokio::test]
    async fn test_docker_mode_without_driver_fails_with_exit_4() {
        let dir = TempDir::new().unwrap();
        let (sched, _) = scheduler();
        let (mut ctx, resolver) = fixture(&dir);
        ctx.runner_mode = pdk_core::RunnerMode::Docker;

        let mut pipeline = Pipeline::new("ci", Provider::GitHub);
        pipeline.jobs.push(script_job("build", &[("s", "echo hi")]));

        let err = sched
            .run_pipeline(
                &pipeline,
                &ctx,
                &FilterOptions::default(),
                &resolver,
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::DOCKER_UNAVAILABLE);
        assert_eq!(err.exit_code(), 4);
    }

    #[tokio::test]
    async fn test_parallel_mode_forbidden_on_host() {
        let dir = TempDir::new().unwrap();
        let (sched, _) = scheduler();
        let sched = sched.with_config(SchedulerConfig {
            parallel: true,
            ..Default::default()
        });
        let (ctx, resolver) = fixture(&dir);

        let mut pipeline = Pipeline::new("ci", Provider::GitHub);
        pipeline.jobs.push(script_job("build", &[("s", "echo hi")]));

        let err = sched
            .run_pipeline(
                &pipeline,
                &ctx,
                &FilterOptions::default(),
                &resolver,
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::RUNNER_PARALLEL_HOST);
    }

    #[tokio::test]
    async fn test_secret_masked_in_step_output() {
        let dir = TempDir::new().unwrap();
        let (sched, masker) = scheduler();
        masker.register("abc-123-xyz");
        let (ctx, resolver) = fixture(&dir);

        let mut pipeline = Pipeline::new("ci", Provider::GitHub);
        pipeline.jobs.push(script_job(
            "build",
            &[("leak", "echo my key is abc-123-xyz and more")],
        ));

        let result = sched
            .run_pipeline(
                &pipeline,
                &ctx,
                &FilterOptions::default(),
                &resolver,
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let output = result.jobs[0].steps[0].output.clone().unwrap();
        assert!(output.contains("my key is *** and more"));
        assert!(!output.contains("abc-123-xyz"));
    }

    #[tokio::test]
    async fn test_variable_expansion_in_scripts() {
        let dir = TempDir::new().unwrap();
        let (sched, _) = scheduler();
        let (ctx, resolver) = fixture(&dir);
        resolver.set("TARGET", "staging", VariableSource::CliArgument);

        let mut pipeline = Pipeline::new("ci", Provider::GitHub);
        pipeline.jobs.push(script_job(
            "build",
            &[("echo", "echo deploying to ${TARGET} with ${GREETING:-hello}")],
        ));

        let result = sched
            .run_pipeline(
                &pipeline,
                &ctx,
                &FilterOptions::default(),
                &resolver,
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let output = result.jobs[0].steps[0].output.clone().unwrap();
        assert!(output.contains("deploying to staging with hello"));
    }

    #[tokio::test]
    async fn test_cancellation_yields_partial_results() {
        let dir = TempDir::new().unwrap();
        let (sched, _) = scheduler();
        let (ctx, resolver) = fixture(&dir);

        let mut pipeline = Pipeline::new("ci", Provider::GitHub);
        pipeline
            .jobs
            .push(script_job("slow", &[("sleep", "sleep 30"), ("after", "echo hi")]));

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel_clone.cancel();
        });

        let result = sched
            .run_pipeline(
                &pipeline,
                &ctx,
                &FilterOptions::default(),
                &resolver,
                None,
                cancel,
            )
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.cancelled);
        let steps = &result.jobs[0].steps;
        assert!(!steps[0].success);
        assert!(steps[1].skipped);
    }
}
