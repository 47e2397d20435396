//! Workflow executor: ready-set parallel scheduling over the dependency graph.
//!
//! The `WorkflowExecutor` repeatedly computes the ready set (steps whose
//! predecessors are all satisfied), runs the whole set concurrently on a
//! `tokio::JoinSet`, waits for the batch, and repeats. Every step in a batch
//! renders its inputs from one snapshot taken before the batch is spawned,
//! so siblings never observe each other's outputs.
//!
//! # Execution flow
//!
//! 1. Validate the workflow and build the `DependencyGraph`.
//! 2. Seed the `VariableStore` with workflow variables, then caller inputs.
//! 3. Loop: ready set -> spawn workers -> join -> apply the error policy.
//! 4. An empty ready set with steps remaining is a circular dependency.
//! 5. Assemble the `ExecutionResult`, populated on failure too.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Map, Value};
use stepwise_types::config::{DEFAULT_WORKFLOW_TIMEOUT_SECS, ExecutorConfig};
use stepwise_types::workflow::{
    ErrorStrategy, ExecutionResult, ExecutionStatus, StepResult, StepStatus, WorkflowSpec,
};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::dag::DependencyGraph;
use super::definition::{WorkflowError, normalize_workflow, validate_workflow};
use super::step_runner::{StepError, StepOutcome, StepRunner};
use super::store::VariableStore;
use crate::tools::{ToolCaller, ToolContext, ToolError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a run did not complete.
#[derive(Debug, Clone, Error)]
pub enum ExecutorError {
    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("circular dependency detected among steps: {}", .0.join(", "))]
    CircularDependency(Vec<String>),

    #[error("step '{step_id}': tool not found: {tool}")]
    ToolNotFound { step_id: String, tool: String },

    #[error("step '{step_id}': invalid tool input: {message}")]
    ToolInput { step_id: String, message: String },

    #[error("step '{step_id}': tool execution failed: {message}")]
    ToolExecution { step_id: String, message: String },

    #[error("step '{step_id}': {message}")]
    Rendering { step_id: String, message: String },

    #[error("execution cancelled")]
    Cancelled,

    #[error("step '{step_id}' timed out after {after:?}")]
    StepTimeout { step_id: String, after: Duration },

    #[error("workflow timed out after {0:?}")]
    WorkflowTimeout(Duration),

    /// The step's worker stopped without producing an outcome.
    #[error("step '{step_id}' failed: {message}")]
    StepFailed { step_id: String, message: String },
}

impl From<WorkflowError> for ExecutorError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::CircularDependency(steps) => ExecutorError::CircularDependency(steps),
            other => ExecutorError::InvalidWorkflow(other.to_string()),
        }
    }
}

impl ExecutorError {
    fn from_step(step_id: &str, err: &StepError) -> Self {
        let step_id = step_id.to_string();
        match err {
            StepError::Rendering(e) => ExecutorError::Rendering {
                step_id,
                message: e.to_string(),
            },
            StepError::Tool(ToolError::NotFound(tool)) => ExecutorError::ToolNotFound {
                step_id,
                tool: tool.clone(),
            },
            StepError::Tool(ToolError::InvalidInput(message)) => ExecutorError::ToolInput {
                step_id,
                message: message.clone(),
            },
            StepError::Tool(ToolError::Execution(message)) => ExecutorError::ToolExecution {
                step_id,
                message: message.clone(),
            },
            StepError::Tool(ToolError::Cancelled) => ExecutorError::Cancelled,
            StepError::Tool(ToolError::Timeout(after)) => ExecutorError::StepTimeout {
                step_id,
                after: *after,
            },
        }
    }
}

/// A run that did not complete: the populated result plus the cause.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ExecutionFailure {
    pub result: Box<ExecutionResult>,
    #[source]
    pub error: ExecutorError,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Executor-wide limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Applied when a workflow declares no `timeout`.
    pub default_timeout: Duration,
    /// Maximum concurrently running steps per execution; 0 is unlimited.
    pub max_parallel_steps: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(DEFAULT_WORKFLOW_TIMEOUT_SECS),
            max_parallel_steps: 0,
        }
    }
}

impl From<&ExecutorConfig> for ExecutorSettings {
    fn from(config: &ExecutorConfig) -> Self {
        Self {
            default_timeout: Duration::from_secs(config.default_workflow_timeout_secs),
            max_parallel_steps: config.max_parallel_steps,
        }
    }
}

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Use this id instead of a fresh UUIDv7.
    pub execution_id: Option<Uuid>,
    /// Caller-owned cancellation signal.
    pub cancel: Option<CancellationToken>,
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RunState {
    records: Vec<StepResult>,
    /// Never dispatched again.
    settled: HashSet<String>,
    /// Unblocks dependents.
    satisfied: HashSet<String>,
    in_flight: HashSet<String>,
    /// First failure absorbed by the `continue` policy.
    first_error: Option<ExecutorError>,
}

impl RunState {
    /// Record every in-flight step as cancelled, in id order.
    fn abandon_in_flight(&mut self, reason: &str) {
        let mut ids: Vec<String> = self.in_flight.drain().collect();
        ids.sort();
        for id in ids {
            self.records
                .push(StepResult::not_run(id.clone(), StepStatus::Cancelled, reason));
            self.settled.insert(id);
        }
    }
}

/// Removes the execution from the active registry when the run ends.
struct ActiveGuard<'a> {
    active: &'a DashMap<Uuid, CancellationToken>,
    execution_id: Uuid,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.execution_id);
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Ready-set parallel scheduler.
pub struct WorkflowExecutor {
    tools: Arc<dyn ToolCaller>,
    settings: ExecutorSettings,
    /// Cancellation tokens keyed by execution id.
    active: DashMap<Uuid, CancellationToken>,
}

impl WorkflowExecutor {
    pub fn new(tools: Arc<dyn ToolCaller>) -> Self {
        Self::with_settings(tools, ExecutorSettings::default())
    }

    pub fn with_settings(tools: Arc<dyn ToolCaller>, settings: ExecutorSettings) -> Self {
        Self {
            tools,
            settings,
            active: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Ids of executions currently running on this executor.
    pub fn active_executions(&self) -> Vec<Uuid> {
        self.active.iter().map(|entry| *entry.key()).collect()
    }

    /// Cancel a running execution. Returns `false` when it is not active.
    pub fn cancel(&self, execution_id: Uuid) -> bool {
        match self.active.get(&execution_id) {
            Some(token) => {
                token.cancel();
                tracing::info!(execution_id = %execution_id, "execution cancel requested");
                true
            }
            None => false,
        }
    }

    /// Execute a workflow with caller inputs.
    pub async fn execute(
        &self,
        spec: &WorkflowSpec,
        inputs: &Map<String, Value>,
    ) -> Result<ExecutionResult, ExecutionFailure> {
        self.execute_with(spec, inputs, RunOptions::default()).await
    }

    /// Execute, stopping when `cancel` fires.
    pub async fn execute_with_cancel(
        &self,
        spec: &WorkflowSpec,
        inputs: &Map<String, Value>,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, ExecutionFailure> {
        let options = RunOptions {
            cancel: Some(cancel),
            ..RunOptions::default()
        };
        self.execute_with(spec, inputs, options).await
    }

    pub async fn execute_with(
        &self,
        spec: &WorkflowSpec,
        inputs: &Map<String, Value>,
        options: RunOptions,
    ) -> Result<ExecutionResult, ExecutionFailure> {
        let execution_id = options.execution_id.unwrap_or_else(Uuid::now_v7);
        let started = std::time::Instant::now();
        let mut result = ExecutionResult::started(execution_id);

        let mut spec = spec.clone();
        normalize_workflow(&mut spec);
        let graph = match validate_workflow(&spec).and_then(|_| DependencyGraph::build(&spec.steps))
        {
            Ok(graph) => graph,
            Err(e) => {
                let error = ExecutorError::from(e);
                tracing::error!(execution_id = %execution_id, error = %error, "workflow rejected");
                return Err(finish_failed(result, started, ExecutionStatus::Failed, error));
            }
        };

        let cancel = options.cancel.unwrap_or_default();
        self.active.insert(execution_id, cancel.clone());
        let _guard = ActiveGuard {
            active: &self.active,
            execution_id,
        };

        let store = Arc::new(VariableStore::seeded([&spec.variables, inputs]));
        let timeout = spec.timeout.unwrap_or(self.settings.default_timeout);
        let spec = Arc::new(spec);

        tracing::info!(
            execution_id = %execution_id,
            steps = spec.steps.len(),
            strategy = ?spec.error_policy.strategy,
            timeout_ms = timeout.as_millis() as u64,
            "workflow execution started"
        );

        let mut state = RunState::default();
        let outcome = tokio::time::timeout(
            timeout,
            self.run_batches(
                execution_id,
                Arc::clone(&spec),
                &graph,
                Arc::clone(&store),
                &cancel,
                &mut state,
            ),
        )
        .await;

        let outcome = match outcome {
            Ok(inner) => inner,
            Err(_elapsed) => {
                // Dropping the batch future aborted its workers.
                cancel.cancel();
                state.abandon_in_flight("workflow timed out");
                Err(ExecutorError::WorkflowTimeout(timeout))
            }
        };

        result.step_results = std::mem::take(&mut state.records);
        result.outputs = store.outputs().await;

        let error = match outcome {
            Ok(()) => state.first_error.take(),
            Err(e) => Some(e),
        };

        match error {
            None => {
                result.status = ExecutionStatus::Completed;
                stamp_end(&mut result, started);
                tracing::info!(
                    execution_id = %execution_id,
                    duration_ms = result.duration_ms,
                    outputs = result.outputs.len(),
                    "workflow execution completed"
                );
                Ok(result)
            }
            Some(error) => {
                let status = match error {
                    ExecutorError::Cancelled => ExecutionStatus::Cancelled,
                    _ => ExecutionStatus::Failed,
                };
                tracing::error!(
                    execution_id = %execution_id,
                    status = %status,
                    error = %error,
                    "workflow execution did not complete"
                );
                Err(finish_failed(result, started, status, error))
            }
        }
    }

    /// The scheduler loop. Returns `Err` for failures that stop the run.
    async fn run_batches(
        &self,
        execution_id: Uuid,
        spec: Arc<WorkflowSpec>,
        graph: &DependencyGraph,
        store: Arc<VariableStore>,
        cancel: &CancellationToken,
        state: &mut RunState,
    ) -> Result<(), ExecutorError> {
        let runner = Arc::new(StepRunner::new(
            Arc::clone(&self.tools),
            spec.error_policy.clone(),
        ));
        let semaphore = (self.settings.max_parallel_steps > 0)
            .then(|| Arc::new(Semaphore::new(self.settings.max_parallel_steps)));
        let mut batch = 0usize;

        while state.settled.len() < graph.len() {
            if cancel.is_cancelled() {
                return Err(ExecutorError::Cancelled);
            }

            let ready: Vec<String> = graph
                .ready(&state.settled, &state.satisfied)
                .into_iter()
                .map(str::to_string)
                .collect();
            if ready.is_empty() {
                return Err(ExecutorError::CircularDependency(blocked_steps(
                    graph, state,
                )));
            }

            batch += 1;
            tracing::debug!(
                execution_id = %execution_id,
                batch,
                steps = ?ready,
                "dispatching ready batch"
            );

            let snapshot = Arc::new(store.snapshot().await);
            let mut join_set = JoinSet::new();
            let mut task_steps = HashMap::new();

            for step_id in ready {
                let Some(index) = spec.steps.iter().position(|s| s.id == step_id) else {
                    continue;
                };
                let spec = Arc::clone(&spec);
                let runner = Arc::clone(&runner);
                let store = Arc::clone(&store);
                let snapshot = Arc::clone(&snapshot);
                let semaphore = semaphore.clone();
                let ctx = ToolContext::new(execution_id, step_id.clone(), cancel.child_token());

                let handle = join_set.spawn(async move {
                    let _permit = match semaphore {
                        Some(semaphore) => semaphore.acquire_owned().await.ok(),
                        None => None,
                    };
                    let step = &spec.steps[index];
                    let outcome = runner.run(step, &snapshot, &ctx).await;
                    if outcome.is_success() {
                        store.bind(&outcome.record.outputs).await;
                    }
                    outcome
                });
                task_steps.insert(handle.id(), step_id.clone());
                state.in_flight.insert(step_id);
            }

            let mut batch_error: Option<ExecutorError> = None;
            loop {
                let joined = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        join_set.abort_all();
                        state.abandon_in_flight("execution cancelled");
                        return Err(ExecutorError::Cancelled);
                    }
                    joined = join_set.join_next_with_id() => joined,
                };
                let Some(joined) = joined else {
                    break;
                };

                let outcome = match joined {
                    Ok((_, outcome)) => outcome,
                    Err(join_err) => {
                        let step_id = task_steps.get(&join_err.id()).cloned().unwrap_or_default();
                        let message = format!("worker stopped: {join_err}");
                        let record =
                            StepResult::not_run(step_id.clone(), StepStatus::Failed, &message);
                        state.in_flight.remove(&step_id);
                        state.records.push(record);
                        state.settled.insert(step_id.clone());
                        batch_error
                            .get_or_insert(ExecutorError::StepFailed { step_id, message });
                        continue;
                    }
                };

                state.in_flight.remove(outcome.step_id());
                if let Some(error) = apply_outcome(execution_id, &spec, graph, state, outcome) {
                    batch_error.get_or_insert(error);
                }
            }

            if let Some(error) = batch_error {
                return Err(error);
            }
        }

        Ok(())
    }
}

/// Fold one step outcome into the run state under the workflow's error
/// policy. Returns an error when the run must stop after this batch.
fn apply_outcome(
    execution_id: Uuid,
    spec: &WorkflowSpec,
    graph: &DependencyGraph,
    state: &mut RunState,
    outcome: StepOutcome,
) -> Option<ExecutorError> {
    let StepOutcome { mut record, error } = outcome;
    let step_id = record.id.clone();

    let Some(step_error) = error else {
        state.records.push(record);
        state.settled.insert(step_id.clone());
        state.satisfied.insert(step_id);
        return None;
    };

    let error = ExecutorError::from_step(&step_id, &step_error);
    state.settled.insert(step_id.clone());

    if step_error.is_fatal() {
        state.records.push(record);
        return Some(error);
    }

    match spec.error_policy.strategy {
        ErrorStrategy::Fail | ErrorStrategy::Retry => {
            state.records.push(record);
            Some(error)
        }
        ErrorStrategy::Continue => {
            tracing::warn!(
                execution_id = %execution_id,
                step_id = %step_id,
                error = %error,
                "step failed, continuing with independent steps"
            );
            state.records.push(record);
            for dependent in graph.transitive_dependents(&step_id) {
                if state.settled.insert(dependent.clone()) {
                    state.records.push(StepResult::not_run(
                        dependent,
                        StepStatus::Skipped,
                        format!("dependency '{step_id}' failed"),
                    ));
                }
            }
            state.first_error.get_or_insert(error);
            None
        }
        ErrorStrategy::Skip => {
            tracing::warn!(
                execution_id = %execution_id,
                step_id = %step_id,
                error = %error,
                "step failed, skipping"
            );
            record.status = StepStatus::Skipped;
            record.outputs = Map::new();
            state.records.push(record);
            state.satisfied.insert(step_id);
            None
        }
    }
}

/// Unsettled steps on a cycle, or every unsettled step if none is.
fn blocked_steps(graph: &DependencyGraph, state: &RunState) -> Vec<String> {
    let remaining: Vec<String> = graph
        .step_ids()
        .iter()
        .filter(|id| !state.settled.contains(id.as_str()))
        .cloned()
        .collect();
    let on_cycle: Vec<String> = graph
        .cycle_members()
        .into_iter()
        .filter(|id| remaining.contains(id))
        .collect();
    if on_cycle.is_empty() { remaining } else { on_cycle }
}

fn stamp_end(result: &mut ExecutionResult, started: std::time::Instant) {
    result.end_time = Some(Utc::now());
    result.duration_ms = started.elapsed().as_millis() as u64;
}

fn finish_failed(
    mut result: ExecutionResult,
    started: std::time::Instant,
    status: ExecutionStatus,
    error: ExecutorError,
) -> ExecutionFailure {
    result.status = status;
    result.error = Some(error.to_string());
    stamp_end(&mut result, started);
    ExecutionFailure {
        result: Box::new(result),
        error,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::BoxFuture;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Instant;
    use stepwise_types::workflow::{ErrorPolicy, WorkflowStep};

    /// Scripted tool surface recording when each call started and finished.
    #[derive(Default)]
    struct MockTools {
        log: Mutex<Vec<(String, Instant, Instant)>>,
    }

    impl MockTools {
        fn started(&self, step_id: &str) -> Instant {
            self.entry(step_id).1
        }

        fn finished(&self, step_id: &str) -> Instant {
            self.entry(step_id).2
        }

        fn entry(&self, step_id: &str) -> (String, Instant, Instant) {
            self.log
                .lock()
                .unwrap()
                .iter()
                .find(|(id, _, _)| id == step_id)
                .cloned()
                .unwrap()
        }
    }

    impl ToolCaller for MockTools {
        fn call_tool<'a>(
            &'a self,
            ctx: &'a ToolContext,
            name: &'a str,
            inputs: Map<String, Value>,
        ) -> BoxFuture<'a, Result<Value, ToolError>> {
            Box::pin(async move {
                let start = Instant::now();
                let result = match name {
                    "echo" => Ok(Value::Object(inputs.clone())),
                    "sleep" => {
                        let ms = inputs.get("ms").and_then(Value::as_u64).unwrap_or(50);
                        ctx.sleep(Duration::from_millis(ms)).await.map(|_| json!({ "ms": ms }))
                    }
                    "fail" => Err(ToolError::Execution("boom".to_string())),
                    other => Err(ToolError::NotFound(other.to_string())),
                };
                self.log
                    .lock()
                    .unwrap()
                    .push((ctx.step_id.clone(), start, Instant::now()));
                result
            })
        }
    }

    fn executor() -> (Arc<MockTools>, WorkflowExecutor) {
        let tools = Arc::new(MockTools::default());
        let executor = WorkflowExecutor::new(Arc::clone(&tools) as Arc<dyn ToolCaller>);
        (tools, executor)
    }

    fn workflow(steps: Vec<WorkflowStep>, strategy: ErrorStrategy) -> WorkflowSpec {
        WorkflowSpec {
            steps,
            error_policy: ErrorPolicy::with_strategy(strategy),
            ..Default::default()
        }
    }

    fn sleep_step(id: &str, ms: u64) -> WorkflowStep {
        WorkflowStep::tool(id, "sleep").with_input("ms", json!(ms))
    }

    #[tokio::test]
    async fn test_empty_workflow_completes() {
        let (_, executor) = executor();
        let result = executor
            .execute(&WorkflowSpec::default(), &Map::new())
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert!(result.step_results.is_empty());
        assert!(result.end_time.is_some());
        assert!(executor.active_executions().is_empty());
    }

    #[tokio::test]
    async fn test_step_without_outputs_leaves_run_outputs_empty() {
        let (_, executor) = executor();
        let spec = workflow(
            vec![WorkflowStep::tool("only", "echo").with_input("x", json!(1))],
            ErrorStrategy::Fail,
        );
        let result = executor.execute(&spec, &Map::new()).await.unwrap();
        assert!(result.outputs.is_empty());
        assert_eq!(result.step_results.len(), 1);
    }

    #[tokio::test]
    async fn test_chain_passes_bindings_and_seeds() {
        let (_, executor) = executor();
        let mut spec = workflow(
            vec![
                WorkflowStep::tool("a", "echo")
                    .with_input("v", json!("{{seed}}-a"))
                    .with_output("v", "t"),
                WorkflowStep::tool("b", "echo")
                    .with_input("v", json!("{{$t}}-b {{who}}"))
                    .with_output("v", "u"),
            ],
            ErrorStrategy::Fail,
        );
        spec.variables.insert("seed".into(), json!("var"));
        spec.variables.insert("who".into(), json!("nobody"));
        let mut inputs = Map::new();
        inputs.insert("who".into(), json!("caller"));

        let result = executor.execute(&spec, &inputs).await.unwrap();
        assert_eq!(result.outputs["t"], json!("var-a"));
        assert_eq!(result.outputs["u"], json!("var-a-b caller"));
        assert!(!result.outputs.contains_key("seed"));
        let ids: Vec<&str> = result.step_results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_independent_steps_run_concurrently() {
        let (tools, executor) = executor();
        let spec = workflow(
            vec![
                sleep_step("a", 80).with_output("ms", "a_data"),
                sleep_step("b", 80).with_output("ms", "b_data"),
                WorkflowStep::tool("c", "echo")
                    .with_input("both", json!("{{a_data}}+{{b_data}}"))
                    .with_output("both", "joined"),
            ],
            ErrorStrategy::Fail,
        );
        let started = Instant::now();
        let result = executor.execute(&spec, &Map::new()).await.unwrap();

        assert!(started.elapsed() < Duration::from_millis(150));
        let gap = if tools.started("a") > tools.started("b") {
            tools.started("a") - tools.started("b")
        } else {
            tools.started("b") - tools.started("a")
        };
        assert!(gap < Duration::from_millis(10));
        assert!(tools.started("c") >= tools.finished("a"));
        assert!(tools.started("c") >= tools.finished("b"));
        assert_eq!(result.step("c").unwrap().inputs["both"], json!("80+80"));
        assert_eq!(result.outputs["joined"], json!("80+80"));
    }

    #[tokio::test]
    async fn test_cycle_is_reported_after_prior_steps() {
        let (_, executor) = executor();
        let spec = workflow(
            vec![
                WorkflowStep::tool("pre", "echo"),
                WorkflowStep::tool("x", "echo").with_dependency("y").with_dependency("pre"),
                WorkflowStep::tool("y", "echo").with_dependency("x"),
            ],
            ErrorStrategy::Fail,
        );
        let failure = executor.execute(&spec, &Map::new()).await.unwrap_err();
        assert!(matches!(failure.error, ExecutorError::CircularDependency(ref ids) if ids == &["x", "y"]));
        assert!(failure.error.to_string().contains("circular"));
        assert_eq!(failure.result.status, ExecutionStatus::Failed);
        assert_eq!(failure.result.step_results.len(), 1);
        assert_eq!(failure.result.step_results[0].id, "pre");
    }

    #[tokio::test]
    async fn test_fail_policy_stops_after_batch() {
        let (_, executor) = executor();
        let spec = workflow(
            vec![
                WorkflowStep::tool("bad", "fail"),
                WorkflowStep::tool("sibling", "echo"),
                WorkflowStep::tool("later", "echo").with_dependency("sibling"),
            ],
            ErrorStrategy::Fail,
        );
        let failure = executor.execute(&spec, &Map::new()).await.unwrap_err();
        assert!(matches!(failure.error, ExecutorError::ToolExecution { ref step_id, .. } if step_id == "bad"));
        let result = failure.result;
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.step("bad").unwrap().status, StepStatus::Failed);
        assert_eq!(result.step("sibling").unwrap().status, StepStatus::Completed);
        assert!(result.step("later").is_none());
        assert!(result.error.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_continue_policy_runs_independent_steps() {
        let (_, executor) = executor();
        let spec = workflow(
            vec![
                WorkflowStep::tool("a", "fail").with_output("result", "a_out"),
                WorkflowStep::tool("b", "echo").with_input("v", json!(1)).with_output("v", "b_out"),
                WorkflowStep::tool("c", "echo").with_input("v", json!("{{a_out}}")),
                WorkflowStep::tool("d", "echo").with_dependency("c"),
            ],
            ErrorStrategy::Continue,
        );
        let failure = executor.execute(&spec, &Map::new()).await.unwrap_err();
        let result = failure.result;
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.step("a").unwrap().status, StepStatus::Failed);
        assert_eq!(result.step("b").unwrap().status, StepStatus::Completed);
        assert_eq!(result.step("c").unwrap().status, StepStatus::Skipped);
        assert_eq!(result.step("d").unwrap().status, StepStatus::Skipped);
        assert_eq!(result.outputs["b_out"], json!(1));
        assert_eq!(result.step_results.len(), 4);
    }

    #[tokio::test]
    async fn test_skip_policy_leaves_bindings_verbatim() {
        let (_, executor) = executor();
        let spec = workflow(
            vec![
                WorkflowStep::tool("a", "fail").with_output("result", "a_out"),
                WorkflowStep::tool("b", "echo")
                    .with_input("v", json!("got {{a_out}}"))
                    .with_output("v", "b_out"),
            ],
            ErrorStrategy::Skip,
        );
        let result = executor.execute(&spec, &Map::new()).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        let skipped = result.step("a").unwrap();
        assert_eq!(skipped.status, StepStatus::Skipped);
        assert!(skipped.error_message.as_deref().unwrap().contains("boom"));
        assert_eq!(result.outputs["b_out"], json!("got {{a_out}}"));
    }

    #[tokio::test]
    async fn test_unknown_tool_follows_error_policy() {
        let (_, executor) = executor();
        let steps = vec![
            WorkflowStep::tool("a", "ghost"),
            WorkflowStep::tool("b", "echo")
                .with_input("v", json!(1))
                .with_output("v", "b_out"),
            WorkflowStep::tool("c", "echo")
                .with_input("v", json!("{{b_out}}"))
                .with_output("v", "c_out"),
        ];

        let failure = executor
            .execute(&workflow(steps.clone(), ErrorStrategy::Continue), &Map::new())
            .await
            .unwrap_err();
        assert!(
            matches!(failure.error, ExecutorError::ToolNotFound { ref tool, .. } if tool == "ghost")
        );
        let result = failure.result;
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.step("a").unwrap().status, StepStatus::Failed);
        assert_eq!(result.step("b").unwrap().status, StepStatus::Completed);
        assert_eq!(result.step("c").unwrap().status, StepStatus::Completed);
        assert_eq!(result.outputs["c_out"], json!("1"));

        let result = executor
            .execute(&workflow(steps.clone(), ErrorStrategy::Skip), &Map::new())
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.step("a").unwrap().status, StepStatus::Skipped);

        let failure = executor
            .execute(&workflow(steps, ErrorStrategy::Fail), &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(failure.error, ExecutorError::ToolNotFound { .. }));
    }

    #[tokio::test]
    async fn test_invalid_workflow_rejected() {
        let (_, executor) = executor();
        let mut step = WorkflowStep::tool("a", "echo");
        step.tool = None;
        let failure = executor
            .execute(&workflow(vec![step], ErrorStrategy::Fail), &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(failure.error, ExecutorError::InvalidWorkflow(_)));
        assert_eq!(failure.result.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn test_caller_cancellation() {
        let (_, executor) = executor();
        let spec = workflow(
            vec![
                WorkflowStep::tool("quick", "echo"),
                sleep_step("long", 10_000),
            ],
            ErrorStrategy::Fail,
        );
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let failure = executor
            .execute_with_cancel(&spec, &Map::new(), token)
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(matches!(failure.error, ExecutorError::Cancelled));
        assert_eq!(failure.result.status, ExecutionStatus::Cancelled);
        assert_eq!(failure.result.step("quick").unwrap().status, StepStatus::Completed);
        assert_eq!(failure.result.step("long").unwrap().status, StepStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_by_execution_id() {
        let (_, executor) = executor();
        let executor = Arc::new(executor);
        let spec = workflow(vec![sleep_step("long", 10_000)], ErrorStrategy::Fail);
        let execution_id = Uuid::now_v7();

        let runner = Arc::clone(&executor);
        let handle = tokio::spawn(async move {
            let options = RunOptions {
                execution_id: Some(execution_id),
                cancel: None,
            };
            runner.execute_with(&spec, &Map::new(), options).await
        });

        let mut registered = false;
        for _ in 0..100 {
            if executor.active_executions().contains(&execution_id) {
                registered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(registered);
        assert!(executor.cancel(execution_id));

        let failure = handle.await.unwrap().unwrap_err();
        assert_eq!(failure.result.execution_id, execution_id);
        assert_eq!(failure.result.status, ExecutionStatus::Cancelled);
        assert!(!executor.cancel(execution_id));
    }

    #[tokio::test]
    async fn test_workflow_timeout() {
        let (_, executor) = executor();
        let mut spec = workflow(vec![sleep_step("long", 10_000)], ErrorStrategy::Continue);
        spec.timeout = Some(Duration::from_millis(30));
        let failure = executor.execute(&spec, &Map::new()).await.unwrap_err();
        assert!(matches!(failure.error, ExecutorError::WorkflowTimeout(_)));
        assert_eq!(failure.result.status, ExecutionStatus::Failed);
        assert_eq!(failure.result.step("long").unwrap().status, StepStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_bounded_parallelism() {
        let tools = Arc::new(MockTools::default());
        let executor = WorkflowExecutor::with_settings(
            Arc::clone(&tools) as Arc<dyn ToolCaller>,
            ExecutorSettings {
                max_parallel_steps: 1,
                ..ExecutorSettings::default()
            },
        );
        let spec = workflow(vec![sleep_step("a", 30), sleep_step("b", 30)], ErrorStrategy::Fail);
        executor.execute(&spec, &Map::new()).await.unwrap();

        let (first, second) = if tools.started("a") < tools.started("b") {
            ("a", "b")
        } else {
            ("b", "a")
        };
        assert!(tools.started(second) >= tools.finished(first));
    }

    #[tokio::test]
    async fn test_every_step_recorded_once() {
        let (_, executor) = executor();
        let spec = workflow(
            vec![
                WorkflowStep::tool("a", "echo").with_input("v", json!(1)).with_output("v", "x"),
                WorkflowStep::tool("b", "echo").with_input("v", json!("{{x}}")),
                WorkflowStep::tool("c", "echo").with_input("v", json!("{{x}}")),
                WorkflowStep::tool("d", "echo").with_dependency("b").with_dependency("c"),
            ],
            ErrorStrategy::Fail,
        );
        let result = executor.execute(&spec, &Map::new()).await.unwrap();
        let mut ids: Vec<&str> = result.step_results.iter().map(|r| r.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }
}
