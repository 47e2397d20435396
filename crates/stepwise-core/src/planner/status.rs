//! Plan progress counters and derived status.
//!
//! `completed_steps` is always recomputed by scanning the plan, never
//! incremented, so it cannot drift from the step statuses.

use chrono::Utc;
use stepwise_types::plan::{Plan, PlanStatus, Task, WorkStatus};

/// Whether a task or step no longer blocks anything.
pub fn is_done(status: WorkStatus) -> bool {
    matches!(status, WorkStatus::Completed | WorkStatus::Skipped)
}

pub fn count_steps(plan: &Plan) -> usize {
    plan.steps().count()
}

pub fn count_completed(plan: &Plan) -> usize {
    plan.steps()
        .filter(|s| s.status == WorkStatus::Completed)
        .count()
}

/// Recompute step counters and bump `updated_at`.
pub fn refresh_progress(plan: &mut Plan) {
    plan.total_steps = count_steps(plan);
    plan.completed_steps = count_completed(plan);
    plan.updated_at = Utc::now();
}

/// Plan status implied by its tasks.
///
/// - `cancelled` stays `cancelled`
/// - every task done -> `completed`
/// - any task failed -> `failed`
/// - any task in progress -> `executing`
/// - otherwise `ready`
pub fn derive_status(plan: &Plan) -> PlanStatus {
    if plan.status == PlanStatus::Cancelled {
        return PlanStatus::Cancelled;
    }
    let tasks: &[Task] = &plan.tasks;
    if tasks.iter().all(|t| is_done(t.status)) {
        PlanStatus::Completed
    } else if tasks.iter().any(|t| t.status == WorkStatus::Failed) {
        PlanStatus::Failed
    } else if tasks.iter().any(|t| t.status == WorkStatus::InProgress) {
        PlanStatus::Executing
    } else {
        PlanStatus::Ready
    }
}

/// Refresh counters and set the derived status.
pub fn refresh(plan: &mut Plan) {
    refresh_progress(plan);
    plan.status = derive_status(plan);
}
