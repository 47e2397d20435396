//! Runs a single workflow step.
//!
//! Renders the step's inputs against a bindings snapshot, dispatches on the
//! step type, applies the per-attempt timeout and retry plan, and maps the
//! result onto the step's `outputs` bindings. The runner never writes to the
//! variable store itself; the scheduler does that under the exclusive lock.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value, json};
use stepwise_types::duration::format_duration;
use stepwise_types::workflow::{ErrorPolicy, StepResult, StepStatus, StepType, WorkflowStep};
use thiserror::Error;

use super::retry::RetryPlan;
use crate::template::{LookupPolicy, TemplateError, render_map};
use crate::tools::{ToolCaller, ToolContext, ToolError, opt_duration};

/// Output key that exposes a tool's whole result.
pub const RESULT_KEY: &str = "result";

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Why a step did not complete.
#[derive(Debug, Clone, Error)]
pub enum StepError {
    #[error("rendering failed: {0}")]
    Rendering(#[from] TemplateError),

    #[error(transparent)]
    Tool(#[from] ToolError),
}

impl StepError {
    /// Failures that stop the run under every error policy. Tool errors,
    /// including an unknown tool, go through the workflow's policy instead.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StepError::Rendering(_) | StepError::Tool(ToolError::Cancelled)
        )
    }
}

// ---------------------------------------------------------------------------
// StepOutcome
// ---------------------------------------------------------------------------

/// Result of running one step: its record plus the error, if any.
///
/// On success `record.outputs` holds the bindings to write.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub record: StepResult,
    pub error: Option<StepError>,
}

impl StepOutcome {
    pub fn step_id(&self) -> &str {
        &self.record.id
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

/// Executes individual steps against a tool surface.
pub struct StepRunner {
    tools: Arc<dyn ToolCaller>,
    policy: ErrorPolicy,
}

impl StepRunner {
    pub fn new(tools: Arc<dyn ToolCaller>, policy: ErrorPolicy) -> Self {
        Self { tools, policy }
    }

    /// Run `step` with inputs rendered from `bindings`.
    pub async fn run(
        &self,
        step: &WorkflowStep,
        bindings: &Map<String, Value>,
        ctx: &ToolContext,
    ) -> StepOutcome {
        let start_time = Utc::now();
        let mut record = StepResult {
            id: step.id.clone(),
            status: StepStatus::Running,
            start_time: Some(start_time),
            end_time: None,
            inputs: Map::new(),
            outputs: Map::new(),
            attempts: 0,
            error_message: None,
        };

        let error = match render_map(&step.inputs, bindings, LookupPolicy::Flat) {
            Err(e) => Some(StepError::from(e)),
            Ok(inputs) => {
                record.inputs = inputs;
                match self.run_attempts(step, &record.inputs, ctx, &mut record.attempts).await {
                    Ok(result) => {
                        record.outputs = bind_outputs(step, &result);
                        None
                    }
                    Err(e) => Some(StepError::from(e)),
                }
            }
        };

        record.end_time = Some(Utc::now());
        record.status = match &error {
            None => StepStatus::Completed,
            Some(StepError::Tool(ToolError::Cancelled)) => StepStatus::Cancelled,
            Some(_) => StepStatus::Failed,
        };
        record.error_message = error.as_ref().map(ToString::to_string);

        match &error {
            None => tracing::debug!(
                execution_id = %ctx.execution_id,
                step_id = %step.id,
                attempts = record.attempts,
                bound = record.outputs.len(),
                "step completed"
            ),
            Some(e) => tracing::debug!(
                execution_id = %ctx.execution_id,
                step_id = %step.id,
                attempts = record.attempts,
                error = %e,
                "step failed"
            ),
        }

        StepOutcome { record, error }
    }

    async fn run_attempts(
        &self,
        step: &WorkflowStep,
        inputs: &Map<String, Value>,
        ctx: &ToolContext,
        attempts: &mut u32,
    ) -> Result<Value, ToolError> {
        let plan = RetryPlan::resolve(step, &self.policy);
        loop {
            *attempts += 1;
            let err = match self.attempt(step, inputs, ctx).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if !err.is_retryable() || *attempts >= plan.max_attempts() {
                return Err(err);
            }

            let delay = plan.delay_for(*attempts);
            tracing::warn!(
                execution_id = %ctx.execution_id,
                step_id = %step.id,
                attempt = *attempts,
                max_attempts = plan.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "step attempt failed, retrying"
            );
            ctx.sleep(delay).await?;
        }
    }

    async fn attempt(
        &self,
        step: &WorkflowStep,
        inputs: &Map<String, Value>,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError> {
        match step.timeout {
            Some(limit) => tokio::time::timeout(limit, self.invoke(step, inputs, ctx))
                .await
                .map_err(|_| ToolError::Timeout(limit))?,
            None => self.invoke(step, inputs, ctx).await,
        }
    }

    async fn invoke(
        &self,
        step: &WorkflowStep,
        inputs: &Map<String, Value>,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError> {
        match step.step_type {
            StepType::Tool => {
                let tool = step.tool.as_deref().ok_or_else(|| {
                    ToolError::InvalidInput(format!("step '{}' names no tool", step.id))
                })?;
                tracing::debug!(
                    execution_id = %ctx.execution_id,
                    step_id = %step.id,
                    tool,
                    "invoking tool"
                );
                self.tools.call_tool(ctx, tool, inputs.clone()).await
            }
            StepType::Variable => Ok(Value::Object(inputs.clone())),
            StepType::Delay => {
                let duration = opt_duration(inputs, "duration")?.ok_or_else(|| {
                    ToolError::InvalidInput("delay step requires 'duration'".to_string())
                })?;
                ctx.sleep(duration).await?;
                Ok(json!({ "slept": format_duration(duration) }))
            }
            StepType::Parallel => Ok(Value::Object(Map::new())),
            StepType::Condition | StepType::Loop => Err(ToolError::InvalidInput(format!(
                "step type '{}' is not supported",
                step.step_type
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Output binding
// ---------------------------------------------------------------------------

/// Map a step result onto variable bindings.
///
/// For each `outputs[key] = variable`: a mapping result binds its `key`
/// entry; the key `result` binds the whole value when the mapping has no such
/// entry (and always for non-mapping results). Other missing keys stay
/// unbound. A `variable` step without `outputs` binds every input key to its
/// own name.
pub fn bind_outputs(step: &WorkflowStep, result: &Value) -> Map<String, Value> {
    let mut bound = Map::new();

    if step.step_type == StepType::Variable && step.outputs.is_empty() {
        if let Value::Object(map) = result {
            bound.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        return bound;
    }

    for (key, variable) in &step.outputs {
        let value = match result {
            Value::Object(map) => map
                .get(key)
                .or_else(|| (key == RESULT_KEY).then_some(result)),
            other => (key == RESULT_KEY).then_some(other),
        };
        match value {
            Some(value) => {
                bound.insert(variable.clone(), value.clone());
            }
            None => tracing::warn!(
                step_id = %step.id,
                key = %key,
                variable = %variable,
                "tool result has no such output key; variable left unbound"
            ),
        }
    }
    bound
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::BoxFuture;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use stepwise_types::workflow::{BackoffType, ErrorStrategy, StepRetry};

    /// Echoes inputs; `flaky` fails until its counter reaches `succeed_on`.
    struct ScriptedTools {
        calls: AtomicU32,
        succeed_on: u32,
    }

    impl ScriptedTools {
        fn new(succeed_on: u32) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                succeed_on,
            })
        }
    }

    impl ToolCaller for ScriptedTools {
        fn call_tool<'a>(
            &'a self,
            ctx: &'a ToolContext,
            name: &'a str,
            inputs: Map<String, Value>,
        ) -> BoxFuture<'a, Result<Value, ToolError>> {
            Box::pin(async move {
                match name {
                    "echo" => Ok(Value::Object(inputs)),
                    "text" => Ok(json!("plain")),
                    "flaky" => {
                        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                        if n >= self.succeed_on {
                            Ok(json!({ "n": n }))
                        } else {
                            Err(ToolError::Execution(format!("attempt {n} failed")))
                        }
                    }
                    "bad_input" => Err(ToolError::InvalidInput("missing 'url'".into())),
                    "slow" => {
                        ctx.sleep(Duration::from_secs(30)).await?;
                        Ok(Value::Null)
                    }
                    other => Err(ToolError::NotFound(other.to_string())),
                }
            })
        }
    }

    fn runner(tools: Arc<ScriptedTools>, strategy: ErrorStrategy) -> StepRunner {
        let policy = ErrorPolicy {
            strategy,
            max_retries: 2,
            retry_delay: Some(Duration::from_millis(1)),
        };
        StepRunner::new(tools, policy)
    }

    fn bindings(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_renders_inputs_and_binds_outputs() {
        let step = WorkflowStep::tool("s", "echo")
            .with_input("greeting", json!("hi {{name}} {{missing}}"))
            .with_output("greeting", "g")
            .with_output("absent", "nope");
        let outcome = runner(ScriptedTools::new(1), ErrorStrategy::Fail)
            .run(&step, &bindings(json!({ "name": "Ada" })), &ToolContext::detached("s"))
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.record.status, StepStatus::Completed);
        assert_eq!(outcome.record.inputs["greeting"], json!("hi Ada {{missing}}"));
        assert_eq!(outcome.record.outputs, bindings(json!({ "g": "hi Ada {{missing}}" })));
        assert_eq!(outcome.record.attempts, 1);
    }

    #[test]
    fn test_result_key_conventions() {
        let step = WorkflowStep::tool("s", "text").with_output("result", "r");
        assert_eq!(bind_outputs(&step, &json!("plain")), bindings(json!({ "r": "plain" })));

        let whole = json!({ "status": 200 });
        assert_eq!(bind_outputs(&step, &whole), bindings(json!({ "r": { "status": 200 } })));

        let inner = json!({ "result": 7, "other": 1 });
        assert_eq!(bind_outputs(&step, &inner), bindings(json!({ "r": 7 })));

        let keyed = WorkflowStep::tool("s", "text").with_output("status", "code");
        assert!(bind_outputs(&keyed, &json!("plain")).is_empty());
    }

    #[tokio::test]
    async fn test_variable_step_binds_inputs() {
        let mut step = WorkflowStep::tool("v", "");
        step.step_type = StepType::Variable;
        step.tool = None;
        step.inputs.insert("city".into(), json!("{{home}}"));
        let outcome = runner(ScriptedTools::new(1), ErrorStrategy::Fail)
            .run(&step, &bindings(json!({ "home": "Oslo" })), &ToolContext::detached("v"))
            .await;
        assert_eq!(outcome.record.outputs, bindings(json!({ "city": "Oslo" })));
    }

    #[tokio::test]
    async fn test_delay_and_parallel_steps() {
        let mut delay = WorkflowStep::tool("d", "");
        delay.step_type = StepType::Delay;
        delay.inputs.insert("duration".into(), json!("5ms"));
        delay = delay.with_output("slept", "waited");
        let r = runner(ScriptedTools::new(1), ErrorStrategy::Fail);
        let outcome = r.run(&delay, &Map::new(), &ToolContext::detached("d")).await;
        assert_eq!(outcome.record.outputs, bindings(json!({ "waited": "5ms" })));

        let mut marker = WorkflowStep::tool("p", "");
        marker.step_type = StepType::Parallel;
        let outcome = r.run(&marker, &Map::new(), &ToolContext::detached("p")).await;
        assert!(outcome.is_success());
        assert!(outcome.record.outputs.is_empty());
    }

    #[tokio::test]
    async fn test_retry_strategy_retries_execution_errors() {
        let tools = ScriptedTools::new(3);
        let step = WorkflowStep::tool("s", "flaky").with_output("n", "n");
        let outcome = runner(Arc::clone(&tools), ErrorStrategy::Retry)
            .run(&step, &Map::new(), &ToolContext::detached("s"))
            .await;
        assert!(outcome.is_success());
        assert_eq!(outcome.record.attempts, 3);
        assert_eq!(outcome.record.outputs["n"], json!(3));
    }

    #[tokio::test]
    async fn test_retry_exhaustion_and_fail_policy_runs_once() {
        let tools = ScriptedTools::new(10);
        let step = WorkflowStep::tool("s", "flaky");
        let outcome = runner(Arc::clone(&tools), ErrorStrategy::Retry)
            .run(&step, &Map::new(), &ToolContext::detached("s"))
            .await;
        assert_eq!(outcome.record.attempts, 3);
        assert_eq!(outcome.record.status, StepStatus::Failed);
        assert!(outcome.record.error_message.unwrap().contains("attempt 3 failed"));

        let tools = ScriptedTools::new(10);
        let outcome = runner(Arc::clone(&tools), ErrorStrategy::Fail)
            .run(&step, &Map::new(), &ToolContext::detached("s"))
            .await;
        assert_eq!(outcome.record.attempts, 1);
    }

    #[tokio::test]
    async fn test_step_retry_override_and_non_retryable() {
        let mut step = WorkflowStep::tool("s", "flaky");
        step.retry = Some(StepRetry {
            enabled: true,
            max_retries: 1,
            delay: Some(Duration::from_millis(1)),
            backoff_type: BackoffType::Exponential,
            max_delay: None,
        });
        let outcome = runner(ScriptedTools::new(2), ErrorStrategy::Fail)
            .run(&step, &Map::new(), &ToolContext::detached("s"))
            .await;
        assert!(outcome.is_success());
        assert_eq!(outcome.record.attempts, 2);

        let mut bad = WorkflowStep::tool("b", "bad_input");
        bad.retry = step.retry.clone();
        let outcome = runner(ScriptedTools::new(1), ErrorStrategy::Fail)
            .run(&bad, &Map::new(), &ToolContext::detached("b"))
            .await;
        assert_eq!(outcome.record.attempts, 1);
        assert!(matches!(
            outcome.error,
            Some(StepError::Tool(ToolError::InvalidInput(_)))
        ));
    }

    #[tokio::test]
    async fn test_per_step_timeout() {
        let mut step = WorkflowStep::tool("s", "slow");
        step.timeout = Some(Duration::from_millis(20));
        let outcome = runner(ScriptedTools::new(1), ErrorStrategy::Fail)
            .run(&step, &Map::new(), &ToolContext::detached("s"))
            .await;
        assert!(matches!(
            outcome.error,
            Some(StepError::Tool(ToolError::Timeout(_)))
        ));
        assert_eq!(outcome.record.status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancellation_marks_cancelled() {
        let ctx = ToolContext::detached("s");
        ctx.cancel.cancel();
        let step = WorkflowStep::tool("s", "slow");
        let outcome = runner(ScriptedTools::new(1), ErrorStrategy::Retry)
            .run(&step, &Map::new(), &ctx)
            .await;
        assert_eq!(outcome.record.status, StepStatus::Cancelled);
        assert!(outcome.error.as_ref().is_some_and(StepError::is_fatal));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_fatal_or_retried() {
        let step = WorkflowStep::tool("s", "nope");
        let outcome = runner(ScriptedTools::new(1), ErrorStrategy::Retry)
            .run(&step, &Map::new(), &ToolContext::detached("s"))
            .await;
        assert!(matches!(
            outcome.error,
            Some(StepError::Tool(ToolError::NotFound(_)))
        ));
        assert!(!outcome.error.as_ref().is_some_and(StepError::is_fatal));
        assert_eq!(outcome.record.attempts, 1);
        assert_eq!(outcome.record.status, StepStatus::Failed);
    }
}
