//! Persistent planner and plan executor.
//!
//! - `prompt` -- plan prompt composition from a goal and tool catalog
//! - `planner` -- plan creation and CRUD over a `PlanStore`
//! - `status` -- progress counters and derived plan status
//! - `executor` -- sequential task walker with per-transition persistence

pub mod executor;
pub mod planner;
pub mod prompt;
pub mod status;

use stepwise_types::error::StoreError;
use stepwise_types::llm::GeneratorError;

use crate::llm::extract::ExtractError;

/// Errors from planner and plan-executor operations.
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("generation failed: {0}")]
    Generation(#[from] GeneratorError),

    #[error("could not extract plan: {0}")]
    Extraction(#[from] ExtractError),

    #[error("invalid plan document: {0}")]
    InvalidPlan(String),

    #[error("plan store error: {0}")]
    Store(#[from] StoreError),

    #[error("task '{task_id}' not found in plan '{plan_id}'")]
    TaskNotFound { plan_id: String, task_id: String },

    #[error("step '{step_id}' not found in task '{task_id}'")]
    StepNotFound { task_id: String, step_id: String },

    #[error("tasks with unresolvable dependencies: {}", .0.join(", "))]
    UnresolvableDependencies(Vec<String>),

    #[error("plan execution cancelled")]
    Cancelled,
}
