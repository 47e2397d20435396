//! Plan creation and plan CRUD.
//!
//! `create_plan` asks the generator for a [`PlanDraft`], first through
//! schema-constrained generation and, when the provider reports that as
//! unsupported, through plain generation plus JSON extraction. The draft is
//! then normalized into a [`Plan`]: deterministic ids (`task_i`,
//! `step_i_j`), resolved task dependencies, every status `planned`.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use stepwise_types::llm::{GenerationRequest, StructuredRequest};
use stepwise_types::plan::{
    Plan, PlanDraft, PlanStatus, PlanStep, PlanTracking, Task, TaskDraft, WorkStatus,
};
use stepwise_types::tool::ToolDescriptor;
use uuid::Uuid;

use super::PlannerError;
use super::prompt::{PLANNER_SYSTEM_PROMPT, plan_prompt};
use super::status;
use crate::llm::box_generator::BoxGenerator;
use crate::llm::extract::extract_as;
use crate::storage::plan_store::PlanStore;

const PLAN_SCHEMA_NAME: &str = "plan";
const PLAN_TEMPERATURE: f64 = 0.3;
const PLAN_MAX_TOKENS: u32 = 4000;

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

/// Turns goals into persisted plans.
pub struct Planner<S: PlanStore> {
    generator: BoxGenerator,
    store: Arc<S>,
    catalog: Vec<ToolDescriptor>,
}

impl<S: PlanStore> Planner<S> {
    pub fn new(generator: BoxGenerator, store: Arc<S>, catalog: Vec<ToolDescriptor>) -> Self {
        Self {
            generator,
            store,
            catalog,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn catalog(&self) -> &[ToolDescriptor] {
        &self.catalog
    }

    /// Generate, normalize and persist a plan for `goal`.
    pub async fn create_plan(
        &self,
        goal: &str,
        inputs: Map<String, Value>,
    ) -> Result<Plan, PlannerError> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(PlannerError::InvalidPlan("goal must not be empty".to_string()));
        }

        let draft = self.draft(goal).await?;
        let plan = build_plan(Uuid::now_v7().to_string(), goal, draft, inputs)?;
        self.store.save(&plan).await?;

        tracing::info!(
            plan_id = %plan.id,
            tasks = plan.tasks.len(),
            total_steps = plan.total_steps,
            "plan created"
        );
        Ok(plan)
    }

    async fn draft(&self, goal: &str) -> Result<PlanDraft, PlannerError> {
        let request = GenerationRequest::new(plan_prompt(goal, &self.catalog))
            .with_system(PLANNER_SYSTEM_PROMPT)
            .with_temperature(PLAN_TEMPERATURE)
            .with_max_tokens(PLAN_MAX_TOKENS);

        let schema = serde_json::to_value(schemars::schema_for!(PlanDraft))
            .map_err(|e| PlannerError::InvalidPlan(format!("plan schema: {e}")))?;
        let structured = StructuredRequest {
            request: request.clone(),
            schema_name: PLAN_SCHEMA_NAME.to_string(),
            schema,
        };

        match self.generator.generate_structured(&structured).await {
            Ok(value) => serde_json::from_value(value)
                .map_err(|e| PlannerError::InvalidPlan(e.to_string())),
            Err(e) if e.is_unsupported() => {
                tracing::debug!(
                    generator = self.generator.name(),
                    "structured generation unsupported, falling back to extraction"
                );
                let completion = self.generator.generate(&request).await?;
                Ok(extract_as::<PlanDraft>(&completion)?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Refresh counters and persist.
    pub async fn save_plan(&self, plan: &mut Plan) -> Result<(), PlannerError> {
        status::refresh_progress(plan);
        self.store.save(plan).await?;
        Ok(())
    }

    pub async fn load_plan(&self, plan_id: &str) -> Result<Plan, PlannerError> {
        Ok(self.store.load(plan_id).await?)
    }

    /// Every stored plan, newest first.
    pub async fn list_plans(&self) -> Result<Vec<Plan>, PlannerError> {
        Ok(self.store.list().await?)
    }

    pub async fn delete_plan(&self, plan_id: &str) -> Result<(), PlannerError> {
        self.store.delete(plan_id).await?;
        tracing::info!(plan_id, "plan deleted");
        Ok(())
    }

    pub async fn tracking(&self, plan_id: &str) -> Result<PlanTracking, PlannerError> {
        Ok(self.store.tracking(plan_id).await?)
    }

    /// Set a task's status, stamp its timestamps and persist.
    pub async fn update_task_status(
        &self,
        plan_id: &str,
        task_id: &str,
        new_status: WorkStatus,
    ) -> Result<Plan, PlannerError> {
        let mut plan = self.store.load(plan_id).await?;
        let task = plan
            .task_mut(task_id)
            .ok_or_else(|| PlannerError::TaskNotFound {
                plan_id: plan_id.to_string(),
                task_id: task_id.to_string(),
            })?;
        let now = Utc::now();
        task.status = new_status;
        match new_status {
            WorkStatus::InProgress => {
                task.started_at.get_or_insert(now);
            }
            WorkStatus::Completed | WorkStatus::Failed | WorkStatus::Skipped => {
                task.completed_at = Some(now);
            }
            WorkStatus::Planned => {
                task.started_at = None;
                task.completed_at = None;
            }
        }

        status::refresh(&mut plan);
        self.store.save(&plan).await?;
        tracing::debug!(plan_id, task_id, status = %new_status, "task status updated");
        Ok(plan)
    }

    /// Set a step's status (with optional output and error) and persist.
    pub async fn update_step_status(
        &self,
        plan_id: &str,
        task_id: &str,
        step_id: &str,
        new_status: WorkStatus,
        output: Option<Value>,
        error: Option<String>,
    ) -> Result<Plan, PlannerError> {
        let mut plan = self.store.load(plan_id).await?;
        let task = plan
            .task_mut(task_id)
            .ok_or_else(|| PlannerError::TaskNotFound {
                plan_id: plan_id.to_string(),
                task_id: task_id.to_string(),
            })?;
        let step = task
            .step_mut(step_id)
            .ok_or_else(|| PlannerError::StepNotFound {
                task_id: task_id.to_string(),
                step_id: step_id.to_string(),
            })?;

        let now = Utc::now();
        step.status = new_status;
        match new_status {
            WorkStatus::InProgress => {
                step.started_at.get_or_insert(now);
            }
            WorkStatus::Completed | WorkStatus::Failed | WorkStatus::Skipped => {
                step.completed_at = Some(now);
            }
            WorkStatus::Planned => {
                step.started_at = None;
                step.completed_at = None;
            }
        }
        if error.is_some() {
            step.error = error;
        }
        if let Some(output) = output.filter(|v| !v.is_null()) {
            step.output = Some(output.clone());
            task.outputs.insert(step_id.to_string(), output);
        }

        status::refresh(&mut plan);
        self.store.save(&plan).await?;
        tracing::debug!(plan_id, task_id, step_id, status = %new_status, "step status updated");
        Ok(plan)
    }
}

// ---------------------------------------------------------------------------
// Draft normalization
// ---------------------------------------------------------------------------

/// Turn an LLM draft into a `ready` plan with deterministic ids.
pub fn build_plan(
    id: String,
    goal: &str,
    draft: PlanDraft,
    inputs: Map<String, Value>,
) -> Result<Plan, PlannerError> {
    if draft.tasks.is_empty() {
        return Err(PlannerError::InvalidPlan("plan has no tasks".to_string()));
    }

    let names: Vec<String> = draft.tasks.iter().map(|t| t.name.clone()).collect();
    let tasks: Vec<Task> = draft
        .tasks
        .into_iter()
        .enumerate()
        .map(|(i, task)| build_task(i, task, &names))
        .collect();

    let now = Utc::now();
    let mut plan = Plan {
        id,
        goal: if draft.goal.trim().is_empty() {
            goal.to_string()
        } else {
            draft.goal
        },
        summary: draft.summary,
        status: PlanStatus::Ready,
        tasks,
        total_steps: 0,
        completed_steps: 0,
        inputs,
        created_at: now,
        updated_at: now,
    };
    status::refresh_progress(&mut plan);
    Ok(plan)
}

fn task_id(index: usize) -> String {
    format!("task_{}", index + 1)
}

fn build_task(index: usize, draft: TaskDraft, names: &[String]) -> Task {
    let id = task_id(index);
    let dependencies = resolve_dependencies(index, &draft.dependencies, names);
    let steps = draft
        .steps
        .into_iter()
        .enumerate()
        .map(|(j, step)| PlanStep {
            id: format!("step_{}_{}", index + 1, j + 1),
            action: step.action,
            description: step.description,
            tool: step.tool.filter(|t| !t.trim().is_empty()),
            parameters: step.parameters,
            status: WorkStatus::Planned,
            started_at: None,
            completed_at: None,
            output: None,
            error: None,
        })
        .collect();

    Task {
        name: if draft.name.trim().is_empty() {
            id.clone()
        } else {
            draft.name
        },
        id,
        description: draft.description,
        priority: draft.priority,
        dependencies,
        tools: draft.tools,
        steps,
        status: WorkStatus::Planned,
        started_at: None,
        completed_at: None,
        outputs: Map::new(),
    }
}

/// Resolve draft dependency references to task ids.
///
/// A reference may be a task id (`task_2`), a 1-based index (`2`), or a task
/// name (case-insensitive). Self references and unknown references are
/// dropped.
fn resolve_dependencies(index: usize, refs: &[String], names: &[String]) -> Vec<String> {
    let mut resolved = BTreeSet::new();
    for reference in refs {
        let reference = reference.trim();
        let target = (0..names.len())
            .find(|&i| task_id(i) == reference)
            .or_else(|| {
                reference
                    .parse::<usize>()
                    .ok()
                    .filter(|n| (1..=names.len()).contains(n))
                    .map(|n| n - 1)
            })
            .or_else(|| {
                names
                    .iter()
                    .position(|name| name.trim().eq_ignore_ascii_case(reference))
            });

        match target {
            Some(target) if target != index => {
                resolved.insert(target);
            }
            _ => tracing::warn!(
                task = %task_id(index),
                dependency = reference,
                "dropping unresolvable task dependency"
            ),
        }
    }
    resolved.into_iter().map(task_id).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::generator::Generator;
    use crate::storage::plan_store::InMemoryPlanStore;
    use serde_json::json;
    use std::sync::Mutex;
    use stepwise_types::llm::GeneratorError;

    const PLAN_TEXT: &str = r#"Sure! Here is the plan:
```json
{
  "goal": "Weather report",
  "summary": "Fetch then write",
  "tasks": [
    { "name": "Collect", "priority": 1, "tools": ["fetch"],
      "steps": [ { "action": "fetch forecast", "tool": "fetch",
                   "parameters": { "url": "https://wx.example/{{city}}" } } ] },
    { "name": "Write", "dependencies": ["collect", "Write", "Ghost"],
      "steps": [ { "action": "compose", "tool": "sequential-thinking" },
                 { "action": "review" } ] }
  ]
}
```
Good luck."#;

    /// Returns canned text; optionally supports structured output.
    struct ScriptedGenerator {
        text: String,
        structured: Option<Value>,
        structured_calls: Mutex<u32>,
    }

    impl Generator for ScriptedGenerator {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<String, GeneratorError> {
            Ok(self.text.clone())
        }

        async fn generate_structured(
            &self,
            request: &StructuredRequest,
        ) -> Result<Value, GeneratorError> {
            *self.structured_calls.lock().unwrap() += 1;
            assert_eq!(request.schema_name, "plan");
            self.structured
                .clone()
                .ok_or_else(|| GeneratorError::Unsupported("structured output".into()))
        }
    }

    fn planner(text: &str, structured: Option<Value>) -> Planner<InMemoryPlanStore> {
        let generator = BoxGenerator::new(ScriptedGenerator {
            text: text.to_string(),
            structured,
            structured_calls: Mutex::new(0),
        });
        Planner::new(generator, Arc::new(InMemoryPlanStore::new()), Vec::new())
    }

    #[tokio::test]
    async fn test_create_plan_falls_back_to_extraction() {
        let planner = planner(PLAN_TEXT, None);
        let plan = planner
            .create_plan("Weather report for Paris", Map::new())
            .await
            .unwrap();

        assert_eq!(plan.status, PlanStatus::Ready);
        assert_eq!(plan.goal, "Weather report");
        assert_eq!(plan.total_steps, 3);
        assert_eq!(plan.completed_steps, 0);
        assert_eq!(plan.tasks[0].id, "task_1");
        assert_eq!(plan.tasks[0].priority, "1");
        assert_eq!(plan.tasks[1].steps[1].id, "step_2_2");
        assert_eq!(plan.tasks[1].steps[1].tool, None);
        assert_eq!(plan.tasks[1].dependencies, vec!["task_1"]);
        assert!(plan.steps().all(|s| s.status == WorkStatus::Planned));

        let stored = planner.load_plan(&plan.id).await.unwrap();
        assert_eq!(stored, plan);
    }

    #[tokio::test]
    async fn test_create_plan_uses_structured_output() {
        let structured = json!({
            "goal": "",
            "summary": "s",
            "tasks": [ { "name": "Only", "steps": [ { "action": "a" } ] } ]
        });
        let planner = planner("not json at all", Some(structured));
        let plan = planner.create_plan("Do it", Map::new()).await.unwrap();
        assert_eq!(plan.goal, "Do it");
        assert_eq!(plan.tasks.len(), 1);
    }

    #[tokio::test]
    async fn test_create_plan_rejects_empty() {
        let planner = planner(r#"{"goal":"x","tasks":[]}"#, None);
        let err = planner.create_plan("x", Map::new()).await.unwrap_err();
        assert!(matches!(err, PlannerError::InvalidPlan(_)));

        let err = planner.create_plan("   ", Map::new()).await.unwrap_err();
        assert!(matches!(err, PlannerError::InvalidPlan(_)));

        let planner = self::planner("no plan here", None);
        let err = planner.create_plan("x", Map::new()).await.unwrap_err();
        assert!(matches!(err, PlannerError::Extraction(_)));
    }

    #[test]
    fn test_dependency_resolution_forms() {
        let names = vec!["Collect".to_string(), "Analyze".to_string(), "Report".to_string()];
        let refs = vec![
            "task_1".to_string(),
            "2".to_string(),
            "REPORT".to_string(),
            "9".to_string(),
        ];
        assert_eq!(resolve_dependencies(2, &refs, &names), vec!["task_1", "task_2"]);
    }

    #[tokio::test]
    async fn test_status_updates_persist_and_recount() {
        let planner = planner(PLAN_TEXT, None);
        let plan = planner.create_plan("w", Map::new()).await.unwrap();

        let plan = planner
            .update_task_status(&plan.id, "task_1", WorkStatus::InProgress)
            .await
            .unwrap();
        assert_eq!(plan.status, PlanStatus::Executing);
        assert!(plan.tasks[0].started_at.is_some());

        let plan = planner
            .update_step_status(
                &plan.id,
                "task_1",
                "step_1_1",
                WorkStatus::Completed,
                Some(json!({ "temp": 21 })),
                None,
            )
            .await
            .unwrap();
        assert_eq!(plan.completed_steps, 1);
        assert_eq!(plan.tasks[0].outputs["step_1_1"], json!({ "temp": 21 }));

        let tracking = planner.tracking(&plan.id).await.unwrap();
        assert_eq!(tracking.completed_steps, 1);
        assert_eq!(tracking.status, PlanStatus::Executing);

        let err = planner
            .update_step_status(&plan.id, "task_1", "step_9_9", WorkStatus::Failed, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PlannerError::StepNotFound { .. }));
        let err = planner
            .update_task_status(&plan.id, "task_7", WorkStatus::Failed)
            .await
            .unwrap_err();
        assert!(matches!(err, PlannerError::TaskNotFound { .. }));
    }

    #[tokio::test]
    async fn test_step_update_records_output_on_step_and_task() {
        let planner = planner(PLAN_TEXT, None);
        let plan = planner.create_plan("w", Map::new()).await.unwrap();

        let plan = planner
            .update_step_status(
                &plan.id,
                "task_2",
                "step_2_1",
                WorkStatus::Completed,
                Some(json!("draft text")),
                Some("slow model".to_string()),
            )
            .await
            .unwrap();
        let step = &plan.tasks[1].steps[0];
        assert_eq!(step.output, Some(json!("draft text")));
        assert_eq!(step.error.as_deref(), Some("slow model"));
        assert!(step.completed_at.is_some());
        assert_eq!(plan.tasks[1].outputs["step_2_1"], json!("draft text"));

        // A later update without output keeps what was recorded.
        let plan = planner
            .update_step_status(&plan.id, "task_2", "step_2_1", WorkStatus::Completed, None, None)
            .await
            .unwrap();
        assert_eq!(plan.tasks[1].steps[0].output, Some(json!("draft text")));

        let stored = planner.load_plan(&plan.id).await.unwrap();
        assert_eq!(stored.tasks[1].outputs["step_2_1"], json!("draft text"));
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let planner = planner(PLAN_TEXT, None);
        let a = planner.create_plan("a", Map::new()).await.unwrap();
        let b = planner.create_plan("b", Map::new()).await.unwrap();
        let listed: Vec<String> = planner
            .list_plans()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(listed.len(), 2);
        assert!(listed.contains(&a.id) && listed.contains(&b.id));

        planner.delete_plan(&a.id).await.unwrap();
        assert!(matches!(
            planner.load_plan(&a.id).await,
            Err(PlannerError::Store(_))
        ));
    }
}
