//! Persistent plan types.
//!
//! A `Plan` is a goal-oriented composition of tasks, each a sequential list
//! of steps. Plans are persisted as `plan.json` (snake_case) alongside a small
//! `tracking.json` carrying [`PlanTracking`] for cheap status polling.
//!
//! The `*Draft` types are the shape the LLM is asked to emit. Their JSON
//! schema is derived with `schemars` for providers that support structured
//! output.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Lifecycle status of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Draft,
    Ready,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanStatus::Draft => "draft",
            PlanStatus::Ready => "ready",
            PlanStatus::Executing => "executing",
            PlanStatus::Completed => "completed",
            PlanStatus::Failed => "failed",
            PlanStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for PlanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(PlanStatus::Draft),
            "ready" => Ok(PlanStatus::Ready),
            "executing" => Ok(PlanStatus::Executing),
            "completed" => Ok(PlanStatus::Completed),
            "failed" => Ok(PlanStatus::Failed),
            "cancelled" => Ok(PlanStatus::Cancelled),
            other => Err(format!("invalid plan status: '{other}'")),
        }
    }
}

/// Status shared by tasks and steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    #[default]
    Planned,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkStatus::Planned => "planned",
            WorkStatus::InProgress => "in_progress",
            WorkStatus::Completed => "completed",
            WorkStatus::Failed => "failed",
            WorkStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

impl FromStr for WorkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "planned" => Ok(WorkStatus::Planned),
            "in_progress" => Ok(WorkStatus::InProgress),
            "completed" => Ok(WorkStatus::Completed),
            "failed" => Ok(WorkStatus::Failed),
            "skipped" => Ok(WorkStatus::Skipped),
            other => Err(format!("invalid work status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// A persisted plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub goal: String,
    #[serde(default)]
    pub summary: String,
    pub status: PlanStatus,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub total_steps: usize,
    #[serde(default)]
    pub completed_steps: usize,
    /// Caller-supplied inputs, available to step parameter templates.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub inputs: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }

    /// Iterate every step of every task.
    pub fn steps(&self) -> impl Iterator<Item = &PlanStep> {
        self.tasks.iter().flat_map(|t| t.steps.iter())
    }

    /// The quick-read tracking record for this plan.
    pub fn tracking(&self) -> PlanTracking {
        PlanTracking {
            id: self.id.clone(),
            goal: self.goal.clone(),
            status: self.status,
            total_steps: self.total_steps,
            completed_steps: self.completed_steps,
            updated_at: self.updated_at,
        }
    }
}

/// A named group of steps executed sequentially.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub priority: String,
    /// Ids of tasks that must complete first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub status: WorkStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub outputs: Map<String, Value>,
}

impl Task {
    pub fn step(&self, step_id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn step_mut(&mut self, step_id: &str) -> Option<&mut PlanStep> {
        self.steps.iter_mut().find(|s| s.id == step_id)
    }
}

/// One action inside a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub action: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub status: WorkStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Compact status record written next to each plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanTracking {
    pub id: String,
    pub goal: String,
    pub status: PlanStatus,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Drafts (LLM output shape)
// ---------------------------------------------------------------------------

/// The plan document the LLM is asked to produce.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanDraft {
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tasks: Vec<TaskDraft>,
}

/// A task as emitted by the LLM, before ids and statuses are assigned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaskDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_string")]
    #[schemars(with = "String")]
    pub priority: String,
    /// Names or 1-based indexes of the tasks this one depends on.
    #[serde(default, deserialize_with = "lenient_string_vec")]
    #[schemars(with = "Vec<String>")]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub steps: Vec<StepDraft>,
}

/// A step as emitted by the LLM.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StepDraft {
    pub action: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

/// Accept a string, number, or null where a string is expected.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(scalar_to_string(value))
}

fn lenient_string_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .into_iter()
            .map(scalar_to_string)
            .filter(|s| !s.is_empty())
            .collect(),
        other => vec![scalar_to_string(other)],
    })
}

fn scalar_to_string(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_plan() -> Plan {
        let now = Utc::now();
        Plan {
            id: "plan-1".to_string(),
            goal: "ship it".to_string(),
            summary: "two tasks".to_string(),
            status: PlanStatus::Executing,
            tasks: vec![Task {
                id: "task_1".to_string(),
                name: "Prepare".to_string(),
                description: String::new(),
                priority: "high".to_string(),
                dependencies: vec![],
                tools: vec!["time".to_string()],
                steps: vec![PlanStep {
                    id: "step_1_1".to_string(),
                    action: "get time".to_string(),
                    description: String::new(),
                    tool: Some("time".to_string()),
                    parameters: Map::new(),
                    status: WorkStatus::Completed,
                    started_at: Some(now),
                    completed_at: Some(now),
                    output: Some(json!("12:00:00")),
                    error: None,
                }],
                status: WorkStatus::Completed,
                started_at: Some(now),
                completed_at: Some(now),
                outputs: Map::new(),
            }],
            total_steps: 1,
            completed_steps: 1,
            inputs: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// `sample_plan` moved into `status`, with a second task whose step
    /// state matches.
    fn plan_in(status: PlanStatus) -> Plan {
        let now = Utc::now();
        let mut plan = sample_plan();
        plan.status = status;
        plan.tasks[0]
            .outputs
            .insert("step_1_1".to_string(), json!("12:00:00"));

        let (work, output, error) = match status {
            PlanStatus::Ready => (WorkStatus::Planned, None, None),
            PlanStatus::Executing => (WorkStatus::InProgress, None, None),
            PlanStatus::Completed => (WorkStatus::Completed, Some(json!({ "temp": 21 })), None),
            _ => (WorkStatus::Failed, None, Some("HTTP 503".to_string())),
        };
        let started = (work != WorkStatus::Planned).then_some(now);
        let finished = matches!(work, WorkStatus::Completed | WorkStatus::Failed).then_some(now);
        let mut task = plan.tasks[0].clone();
        task.id = "task_2".to_string();
        task.dependencies = vec!["task_1".to_string()];
        task.status = work;
        task.started_at = started;
        task.completed_at = finished;
        task.outputs = Map::new();
        if let Some(output) = &output {
            task.outputs.insert("step_2_1".to_string(), output.clone());
        }
        task.steps = vec![PlanStep {
            id: "step_2_1".to_string(),
            action: "fetch weather".to_string(),
            description: "current conditions".to_string(),
            tool: Some("fetch".to_string()),
            parameters: json!({ "url": "https://wx.example/{{city}}" })
                .as_object()
                .cloned()
                .unwrap(),
            status: work,
            started_at: started,
            completed_at: finished,
            output,
            error,
        }];
        plan.tasks.push(task);
        plan.total_steps = 2;
        plan.completed_steps = if status == PlanStatus::Completed { 2 } else { 1 };
        plan.inputs.insert("city".to_string(), json!("Paris"));
        plan
    }

    #[test]
    fn test_plan_roundtrip() {
        for status in [
            PlanStatus::Ready,
            PlanStatus::Executing,
            PlanStatus::Completed,
            PlanStatus::Failed,
        ] {
            let plan = plan_in(status);
            let json = serde_json::to_string_pretty(&plan).unwrap();
            let parsed: Plan = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, plan, "{status} plan");
        }

        let failed = plan_in(PlanStatus::Failed);
        let parsed: Plan =
            serde_json::from_str(&serde_json::to_string(&failed).unwrap()).unwrap();
        assert_eq!(parsed.tasks[1].steps[0].error.as_deref(), Some("HTTP 503"));
        assert!(parsed.tasks[1].steps[0].completed_at.is_some());
    }

    #[test]
    fn test_status_literals() {
        let json = serde_json::to_value(WorkStatus::InProgress).unwrap();
        assert_eq!(json, json!("in_progress"));
        let json = serde_json::to_value(PlanStatus::Cancelled).unwrap();
        assert_eq!(json, json!("cancelled"));
        assert_eq!("in_progress".parse::<WorkStatus>().unwrap(), WorkStatus::InProgress);
        assert!("nope".parse::<PlanStatus>().is_err());
    }

    #[test]
    fn test_tracking_mirrors_plan() {
        let plan = sample_plan();
        let tracking = plan.tracking();
        assert_eq!(tracking.id, plan.id);
        assert_eq!(tracking.completed_steps, 1);
        assert_eq!(tracking.status, PlanStatus::Executing);
    }

    #[test]
    fn test_draft_accepts_numeric_priority_and_dependencies() {
        let draft: TaskDraft = serde_json::from_value(json!({
            "name": "Analyze",
            "priority": 1,
            "dependencies": [1, "Collect"],
            "steps": [{ "action": "think" }]
        }))
        .unwrap();
        assert_eq!(draft.priority, "1");
        assert_eq!(draft.dependencies, vec!["1", "Collect"]);
        assert_eq!(draft.steps[0].action, "think");
    }

    #[test]
    fn test_draft_schema_mentions_tasks() {
        let schema = schemars::schema_for!(PlanDraft);
        let value = serde_json::to_value(&schema).unwrap();
        assert!(value.to_string().contains("tasks"));
    }
}
