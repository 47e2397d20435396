//! Plan executor: walks tasks in dependency order, steps in declared order.
//!
//! Every status transition is persisted before the next one starts, so a
//! crash or cancellation leaves a plan that `resume` can pick up. Completed
//! and skipped work is never re-run.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value, json};
use stepwise_types::plan::{Plan, PlanStatus, PlanStep, WorkStatus};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::PlannerError;
use super::status::{self, is_done};
use crate::storage::plan_store::PlanStore;
use crate::template::{LookupPolicy, render_map};
use crate::tools::{ToolCaller, ToolContext, ToolError};

/// How a single task ended.
enum TaskOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// Executes persisted plans against a tool caller.
pub struct PlanExecutor<S: PlanStore> {
    store: Arc<S>,
    tools: Arc<dyn ToolCaller>,
}

impl<S: PlanStore> PlanExecutor<S> {
    pub fn new(store: Arc<S>, tools: Arc<dyn ToolCaller>) -> Self {
        Self { store, tools }
    }

    /// Run a plan until it completes, fails, or gets stuck.
    ///
    /// A tool failure is recorded in the plan, which is returned with status
    /// `failed`; only store errors, cancellation and unsatisfiable
    /// dependencies surface as `Err`.
    pub async fn execute(&self, plan_id: &str) -> Result<Plan, PlannerError> {
        self.execute_with_cancel(plan_id, CancellationToken::new())
            .await
    }

    /// Like [`execute`](Self::execute), stopping when `cancel` fires.
    ///
    /// The interrupted step is reset to `planned` and the plan is persisted
    /// as `cancelled`.
    pub async fn execute_with_cancel(
        &self,
        plan_id: &str,
        cancel: CancellationToken,
    ) -> Result<Plan, PlannerError> {
        let plan = self.store.load(plan_id).await?;
        self.run(plan, cancel).await
    }

    /// Reset failed and interrupted work to `planned`, then execute.
    pub async fn resume(&self, plan_id: &str) -> Result<Plan, PlannerError> {
        let mut plan = self.store.load(plan_id).await?;
        let reset = reset_unfinished(&mut plan);
        tracing::info!(plan_id, reset_tasks = reset, "resuming plan");
        self.run(plan, CancellationToken::new()).await
    }

    async fn run(&self, mut plan: Plan, cancel: CancellationToken) -> Result<Plan, PlannerError> {
        let execution_id = Uuid::now_v7();
        // Clears a previous `cancelled`; `flush` derives the real status.
        plan.status = PlanStatus::Executing;
        self.flush(&mut plan).await?;
        tracing::info!(
            plan_id = %plan.id,
            %execution_id,
            tasks = plan.tasks.len(),
            "plan execution started"
        );

        loop {
            if plan.tasks.iter().any(|t| t.status == WorkStatus::Failed) {
                self.flush(&mut plan).await?;
                tracing::warn!(
                    plan_id = %plan.id,
                    completed_steps = plan.completed_steps,
                    total_steps = plan.total_steps,
                    "plan failed"
                );
                return Ok(plan);
            }

            let pending: Vec<usize> = (0..plan.tasks.len())
                .filter(|&i| !is_done(plan.tasks[i].status))
                .collect();
            if pending.is_empty() {
                self.flush(&mut plan).await?;
                tracing::info!(
                    plan_id = %plan.id,
                    total_steps = plan.total_steps,
                    "plan completed"
                );
                return Ok(plan);
            }

            let Some(index) = pending
                .iter()
                .copied()
                .find(|&i| dependencies_done(&plan, i))
            else {
                let now = Utc::now();
                let mut blocked = Vec::with_capacity(pending.len());
                for &i in &pending {
                    let task = &mut plan.tasks[i];
                    task.status = WorkStatus::Failed;
                    task.completed_at = Some(now);
                    blocked.push(task.id.clone());
                }
                self.flush(&mut plan).await?;
                tracing::error!(plan_id = %plan.id, ?blocked, "no runnable task");
                return Err(PlannerError::UnresolvableDependencies(blocked));
            };

            match self.run_task(&mut plan, index, execution_id, &cancel).await? {
                TaskOutcome::Completed | TaskOutcome::Failed => {}
                TaskOutcome::Cancelled => {
                    plan.status = PlanStatus::Cancelled;
                    self.flush(&mut plan).await?;
                    tracing::info!(plan_id = %plan.id, "plan execution cancelled");
                    return Err(PlannerError::Cancelled);
                }
            }
        }
    }

    async fn run_task(
        &self,
        plan: &mut Plan,
        index: usize,
        execution_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, PlannerError> {
        let task = &mut plan.tasks[index];
        task.status = WorkStatus::InProgress;
        task.started_at.get_or_insert_with(Utc::now);
        let task_id = task.id.clone();
        tracing::debug!(plan_id = %plan.id, task_id = %task_id, "task started");
        self.flush(plan).await?;

        for position in 0..plan.tasks[index].steps.len() {
            if is_done(plan.tasks[index].steps[position].status) {
                continue;
            }
            if cancel.is_cancelled() {
                interrupt(plan, index, position);
                return Ok(TaskOutcome::Cancelled);
            }

            let bindings = plan_bindings(plan);
            let step = &mut plan.tasks[index].steps[position];
            step.status = WorkStatus::InProgress;
            step.started_at = Some(Utc::now());
            step.error = None;
            let step_id = step.id.clone();
            self.flush(plan).await?;

            let step = &plan.tasks[index].steps[position];
            let result = self
                .run_step(step, &bindings, execution_id, cancel)
                .await;

            match result {
                Ok(output) => {
                    let task = &mut plan.tasks[index];
                    if !output.is_null() {
                        task.outputs.insert(step_id.clone(), output.clone());
                    }
                    if let Some(step) = task.step_mut(&step_id) {
                        step.status = WorkStatus::Completed;
                        step.completed_at = Some(Utc::now());
                        step.output = Some(output).filter(|v| !v.is_null());
                    }
                    tracing::debug!(
                        plan_id = %plan.id,
                        task_id = %task_id,
                        step_id = %step_id,
                        "step completed"
                    );
                    self.flush(plan).await?;
                }
                Err(ToolError::Cancelled) => {
                    interrupt(plan, index, position);
                    return Ok(TaskOutcome::Cancelled);
                }
                Err(e) => {
                    let now = Utc::now();
                    let task = &mut plan.tasks[index];
                    task.status = WorkStatus::Failed;
                    task.completed_at = Some(now);
                    if let Some(step) = task.step_mut(&step_id) {
                        step.status = WorkStatus::Failed;
                        step.completed_at = Some(now);
                        step.error = Some(e.to_string());
                    }
                    tracing::warn!(
                        plan_id = %plan.id,
                        task_id = %task_id,
                        step_id = %step_id,
                        error = %e,
                        "step failed"
                    );
                    self.flush(plan).await?;
                    return Ok(TaskOutcome::Failed);
                }
            }
        }

        let task = &mut plan.tasks[index];
        task.status = WorkStatus::Completed;
        task.completed_at = Some(Utc::now());
        tracing::debug!(plan_id = %plan.id, task_id = %task_id, "task completed");
        self.flush(plan).await?;
        Ok(TaskOutcome::Completed)
    }

    async fn run_step(
        &self,
        step: &PlanStep,
        bindings: &Map<String, Value>,
        execution_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolError> {
        let parameters = render_map(&step.parameters, bindings, LookupPolicy::Nested)
            .map_err(|e| ToolError::InvalidInput(e.to_string()))?;

        let Some(tool) = step.tool.as_deref() else {
            return Ok(json!({
                "action": step.action,
                "parameters": parameters,
                "status": "completed",
                "timestamp": Utc::now().to_rfc3339(),
            }));
        };

        tracing::debug!(step_id = %step.id, tool, "invoking tool");
        let ctx = ToolContext::new(execution_id, step.id.clone(), cancel.clone());
        ctx.run_cancellable(self.tools.call_tool(&ctx, tool, parameters))
            .await
    }

    /// Recount, derive the plan status from its tasks, and persist.
    async fn flush(&self, plan: &mut Plan) -> Result<(), PlannerError> {
        status::refresh(plan);
        self.store.save(plan).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn dependencies_done(plan: &Plan, index: usize) -> bool {
    plan.tasks[index]
        .dependencies
        .iter()
        .all(|dep| plan.task(dep).is_some_and(|t| is_done(t.status)))
}

/// Template bindings for step parameters.
///
/// Plan inputs at the top level, each task's outputs under its id, and each
/// step's output under the step id.
fn plan_bindings(plan: &Plan) -> Map<String, Value> {
    let mut bindings = plan.inputs.clone();
    for task in &plan.tasks {
        if !task.outputs.is_empty() {
            bindings.insert(task.id.clone(), Value::Object(task.outputs.clone()));
        }
        for step in &task.steps {
            if let Some(output) = &step.output {
                bindings.insert(step.id.clone(), output.clone());
            }
        }
    }
    bindings
}

/// Put an interrupted step (and its task) back to `planned`.
fn interrupt(plan: &mut Plan, index: usize, position: usize) {
    let task = &mut plan.tasks[index];
    task.status = WorkStatus::Planned;
    let step = &mut task.steps[position];
    step.status = WorkStatus::Planned;
    step.started_at = None;
    step.completed_at = None;
}

/// Reset failed or in-progress tasks and their unfinished steps. Returns how
/// many tasks were reset.
fn reset_unfinished(plan: &mut Plan) -> usize {
    let mut reset = 0;
    for task in &mut plan.tasks {
        if !matches!(task.status, WorkStatus::Failed | WorkStatus::InProgress) {
            continue;
        }
        reset += 1;
        task.status = WorkStatus::Planned;
        task.completed_at = None;
        for step in task.steps.iter_mut().filter(|s| !is_done(s.status)) {
            step.status = WorkStatus::Planned;
            step.started_at = None;
            step.completed_at = None;
            step.output = None;
            step.error = None;
        }
    }
    reset
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
