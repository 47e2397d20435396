//! Plan store trait.
//!
//! Persists plans keyed by id. Every save writes both the authoritative plan
//! document and its tracking record. The file-backed implementation lives
//! in stepwise-infra; [`InMemoryPlanStore`] keeps plans in memory.

use std::collections::HashMap;

use stepwise_types::error::StoreError;
use stepwise_types::plan::{Plan, PlanTracking};
use tokio::sync::RwLock;

/// Trait for durable plan storage.
pub trait PlanStore: Send + Sync {
    /// Persist a plan and its tracking record (create or replace).
    fn save(&self, plan: &Plan) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Load a plan by id.
    fn load(
        &self,
        plan_id: &str,
    ) -> impl std::future::Future<Output = Result<Plan, StoreError>> + Send;

    /// Load every stored plan, newest first.
    fn list(&self) -> impl std::future::Future<Output = Result<Vec<Plan>, StoreError>> + Send;

    /// Remove a plan and its tracking record.
    fn delete(
        &self,
        plan_id: &str,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Read only the tracking record.
    fn tracking(
        &self,
        plan_id: &str,
    ) -> impl std::future::Future<Output = Result<PlanTracking, StoreError>> + Send;
}

/// Non-durable plan store for tests and ephemeral engines.
#[derive(Debug, Default)]
pub struct InMemoryPlanStore {
    plans: RwLock<HashMap<String, Plan>>,
}

impl InMemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlanStore for InMemoryPlanStore {
    async fn save(&self, plan: &Plan) -> Result<(), StoreError> {
        self.plans
            .write()
            .await
            .insert(plan.id.clone(), plan.clone());
        Ok(())
    }

    async fn load(&self, plan_id: &str) -> Result<Plan, StoreError> {
        self.plans
            .read()
            .await
            .get(plan_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(plan_id.to_string()))
    }

    async fn list(&self) -> Result<Vec<Plan>, StoreError> {
        let mut plans: Vec<Plan> = self.plans.read().await.values().cloned().collect();
        plans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(plans)
    }

    async fn delete(&self, plan_id: &str) -> Result<(), StoreError> {
        self.plans
            .write()
            .await
            .remove(plan_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(plan_id.to_string()))
    }

    async fn tracking(&self, plan_id: &str) -> Result<PlanTracking, StoreError> {
        self.load(plan_id).await.map(|plan| plan.tracking())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::Map;
    use stepwise_types::plan::PlanStatus;

    fn plan(id: &str, age_secs: i64) -> Plan {
        let created = Utc::now() - Duration::seconds(age_secs);
        Plan {
            id: id.to_string(),
            goal: format!("goal {id}"),
            summary: String::new(),
            status: PlanStatus::Ready,
            tasks: Vec::new(),
            total_steps: 0,
            completed_steps: 0,
            inputs: Map::new(),
            created_at: created,
            updated_at: created,
        }
    }

    #[tokio::test]
    async fn test_save_load_list_delete() {
        let store = InMemoryPlanStore::new();
        store.save(&plan("old", 60)).await.unwrap();
        store.save(&plan("new", 0)).await.unwrap();

        assert_eq!(store.load("old").await.unwrap().goal, "goal old");
        let ids: Vec<String> = store.list().await.unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(store.tracking("new").await.unwrap().status, PlanStatus::Ready);

        store.delete("old").await.unwrap();
        assert!(matches!(store.load("old").await, Err(StoreError::NotFound(_))));
        assert!(matches!(store.delete("old").await, Err(StoreError::NotFound(_))));
    }
}
