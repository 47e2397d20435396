//! Workflow domain types.
//!
//! `WorkflowSpec` is the unit of execution accepted by the executor. It is
//! written in camelCase JSON (`dependsOn`, `errorPolicy`, `maxRetries`) so
//! documents produced by the generator deserialize without translation.
//! This module also contains the execution tracking types
//! (`ExecutionResult`, `StepResult`) returned from a run.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::duration::serde_opt;

// ---------------------------------------------------------------------------
// Workflow Spec
// ---------------------------------------------------------------------------

/// A declarative workflow: named steps invoking tools, plus the policy that
/// governs failures.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpec {
    /// Ordered steps. The order is a hint; execution follows the DAG.
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    /// Initial bindings seeding the variable store.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,
    /// Failure handling for the whole run.
    #[serde(default)]
    pub error_policy: ErrorPolicy,
    /// Overall wall-clock bound for the run.
    #[serde(default, with = "serde_opt", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Descriptive metadata (author, version, tags).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<WorkflowMetadata>,
}

impl WorkflowSpec {
    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// Descriptive workflow metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkflowMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// A single unit of work: one tool invocation with one input map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    /// Unique within a workflow.
    pub id: String,
    /// Human label. Defaults to the id when omitted.
    #[serde(default)]
    pub name: String,
    /// Step kind. Defaults to `tool`.
    #[serde(rename = "type", default)]
    pub step_type: StepType,
    /// Tool name for `tool` steps (a built-in or an external tool).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Parameter name to value; string leaves may contain `{{name}}` templates.
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// Tool-output key to variable name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
    /// Explicit predecessor ids, additive to template-derived dependencies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Per-attempt time budget.
    #[serde(default, with = "serde_opt", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Per-step retry override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<StepRetry>,
}

impl WorkflowStep {
    /// Create a `tool` step with no inputs or outputs.
    pub fn tool(id: impl Into<String>, tool: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            step_type: StepType::Tool,
            tool: Some(tool.into()),
            inputs: Map::new(),
            outputs: BTreeMap::new(),
            depends_on: Vec::new(),
            timeout: None,
            retry: None,
        }
    }

    /// Builder-style helper: set an input value.
    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }

    /// Builder-style helper: bind a tool-output key to a variable.
    pub fn with_output(mut self, key: impl Into<String>, variable: impl Into<String>) -> Self {
        self.outputs.insert(key.into(), variable.into());
        self
    }

    /// Builder-style helper: add an explicit predecessor.
    pub fn with_dependency(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on.push(step_id.into());
        self
    }

    /// Display label: the name, or the id when no name was given.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// The kind of step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    #[default]
    Tool,
    Variable,
    Delay,
    Condition,
    Loop,
    Parallel,
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepType::Tool => "tool",
            StepType::Variable => "variable",
            StepType::Delay => "delay",
            StepType::Condition => "condition",
            StepType::Loop => "loop",
            StepType::Parallel => "parallel",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Error policy and retry
// ---------------------------------------------------------------------------

/// Workflow-wide failure handling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPolicy {
    #[serde(default)]
    pub strategy: ErrorStrategy,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default, with = "serde_opt", skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<Duration>,
}

fn default_max_retries() -> u32 {
    3
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self {
            strategy: ErrorStrategy::Fail,
            max_retries: default_max_retries(),
            retry_delay: None,
        }
    }
}

impl ErrorPolicy {
    /// A policy with the given strategy and default retry settings.
    pub fn with_strategy(strategy: ErrorStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }
}

/// What to do when a step fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
    /// First failure aborts the run.
    #[default]
    Fail,
    /// Record the failure; keep running steps that do not depend on it.
    Continue,
    /// Retry up to `max_retries`, then behave as `Fail`.
    Retry,
    /// Treat the failure as a completion with empty outputs.
    Skip,
}

/// Per-step retry override.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepRetry {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default, with = "serde_opt", skip_serializing_if = "Option::is_none")]
    pub delay: Option<Duration>,
    #[serde(default)]
    pub backoff_type: BackoffType,
    #[serde(default, with = "serde_opt", skip_serializing_if = "Option::is_none")]
    pub max_delay: Option<Duration>,
}

fn default_enabled() -> bool {
    true
}

/// Delay growth between retry attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    #[default]
    Fixed,
    Linear,
    Exponential,
}

// ---------------------------------------------------------------------------
// Execution status
// ---------------------------------------------------------------------------

/// Overall status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("invalid execution status: '{other}'")),
        }
    }
}

/// Status of a single step record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    /// Did not produce outputs: absorbed by the `skip` policy, or never run
    /// because a predecessor failed under `continue`.
    Skipped,
}

// ---------------------------------------------------------------------------
// Execution result
// ---------------------------------------------------------------------------

/// Outcome of one workflow execution, populated even on failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Fresh per run (UUIDv7).
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Wall-clock duration in milliseconds.
    #[serde(default)]
    pub duration_ms: u64,
    /// Final bindings written by step output mappings.
    #[serde(default)]
    pub outputs: Map<String, Value>,
    /// Per-step records in completion order.
    #[serde(default)]
    pub step_results: Vec<StepResult>,
    /// Run-level error summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    /// A fresh `Running` result with no step records.
    pub fn started(execution_id: Uuid) -> Self {
        Self {
            execution_id,
            status: ExecutionStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: 0,
            outputs: Map::new(),
            step_results: Vec::new(),
            error: None,
        }
    }

    /// Find the record for a step id.
    pub fn step(&self, step_id: &str) -> Option<&StepResult> {
        self.step_results.iter().find(|r| r.id == step_id)
    }
}

/// Record of one step's execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub id: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Rendered inputs the tool received.
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// Bindings this step wrote (variable name to value).
    #[serde(default)]
    pub outputs: Map<String, Value>,
    /// Number of attempts made (0 when the step never ran).
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StepResult {
    /// A record for a step that never ran.
    pub fn not_run(id: impl Into<String>, status: StepStatus, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status,
            start_time: Some(now),
            end_time: Some(now),
            inputs: Map::new(),
            outputs: Map::new(),
            attempts: 0,
            error_message: Some(reason.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
