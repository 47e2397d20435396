//! Workflow document parsing and validation.
//!
//! Converts JSON or YAML text into a `WorkflowSpec`, fills in defaults
//! (step names), and validates structural constraints before execution.

use std::collections::HashSet;
use std::path::Path;

use stepwise_types::workflow::{StepType, WorkflowSpec};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from parsing and validating workflow documents.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// JSON/YAML parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// A step names an explicit predecessor that does not exist.
    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    /// Steps that can never become ready because they wait on each other.
    #[error("circular dependency among steps: {}", .0.join(", "))]
    CircularDependency(Vec<String>),

    /// A step type the executor does not run.
    #[error("step '{step}' has unsupported type '{step_type}'")]
    UnsupportedStepType { step: String, step_type: StepType },

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse and validate a JSON workflow document.
pub fn parse_workflow_json(json: &str) -> Result<WorkflowSpec, WorkflowError> {
    let spec: WorkflowSpec =
        serde_json::from_str(json).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    finish(spec)
}

/// Parse and validate a YAML workflow document.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowSpec, WorkflowError> {
    let spec: WorkflowSpec =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    finish(spec)
}

/// Load a workflow file, choosing the parser by extension (`.yaml`/`.yml`
/// for YAML, anything else as JSON).
pub fn load_workflow_file(path: &Path) -> Result<WorkflowSpec, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => parse_workflow_yaml(&content),
        _ => parse_workflow_json(&content),
    }
}

/// Serialize a workflow to pretty JSON.
pub fn serialize_workflow_json(spec: &WorkflowSpec) -> Result<String, WorkflowError> {
    serde_json::to_string_pretty(spec).map_err(|e| WorkflowError::ParseError(e.to_string()))
}

fn finish(mut spec: WorkflowSpec) -> Result<WorkflowSpec, WorkflowError> {
    normalize_workflow(&mut spec);
    validate_workflow(&spec)?;
    Ok(spec)
}

/// Fill in defaults: an empty step name becomes the step id.
pub fn normalize_workflow(spec: &mut WorkflowSpec) {
    for step in &mut spec.steps {
        if step.name.trim().is_empty() {
            step.name = step.id.clone();
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a workflow.
///
/// Checks:
/// - Every step id is non-empty and unique
/// - `tool` steps name a tool
/// - `delay` steps carry `inputs.duration`
/// - `condition` and `loop` steps are rejected
/// - Every `dependsOn` entry names a step in the workflow
///
/// Cycles are not checked here; the scheduler reports them when no step is
/// ready.
pub fn validate_workflow(spec: &WorkflowSpec) -> Result<(), WorkflowError> {
    let mut seen = HashSet::new();
    for step in &spec.steps {
        if step.id.trim().is_empty() {
            return Err(WorkflowError::ValidationError(
                "step id must not be empty".to_string(),
            ));
        }
        if !seen.insert(step.id.as_str()) {
            return Err(WorkflowError::ValidationError(format!(
                "duplicate step id '{}'",
                step.id
            )));
        }

        match step.step_type {
            StepType::Tool => {
                if step.tool.as_deref().is_none_or(|t| t.trim().is_empty()) {
                    return Err(WorkflowError::ValidationError(format!(
                        "tool step '{}' must name a tool",
                        step.id
                    )));
                }
            }
            StepType::Delay => {
                if step.inputs.get("duration").is_none_or(|d| d.is_null()) {
                    return Err(WorkflowError::ValidationError(format!(
                        "delay step '{}' must set inputs.duration",
                        step.id
                    )));
                }
            }
            StepType::Variable | StepType::Parallel => {}
            StepType::Condition | StepType::Loop => {
                return Err(WorkflowError::UnsupportedStepType {
                    step: step.id.clone(),
                    step_type: step.step_type,
                });
            }
        }
    }

    for step in &spec.steps {
        for dep in &step.depends_on {
            if !seen.contains(dep.as_str()) {
                return Err(WorkflowError::UnknownDependency {
                    step: step.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
