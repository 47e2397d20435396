//! File-backed [`PlanStore`].
//!
//! Layout under the plans directory:
//!
//! ```text
//! plans/
//!   <plan-id>/
//!     plan.json       authoritative plan document
//!     tracking.json   quick-read status record
//! ```
//!
//! Both files are written to a temporary sibling and renamed into place, so
//! readers never observe a torn document.

use std::path::{Path, PathBuf};

use serde::Serialize;
use stepwise_core::storage::plan_store::PlanStore;
use stepwise_types::error::StoreError;
use stepwise_types::plan::{Plan, PlanTracking};
use uuid::Uuid;

const PLAN_FILE: &str = "plan.json";
const TRACKING_FILE: &str = "tracking.json";

/// Plans persisted as JSON files, one directory per plan.
#[derive(Debug, Clone)]
pub struct FilePlanStore {
    root: PathBuf,
}

impl FilePlanStore {
    /// Store plans under `root` (typically `{data_dir}/plans`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of one plan, after validating the id.
    pub fn plan_dir(&self, plan_id: &str) -> Result<PathBuf, StoreError> {
        validate_id(plan_id)?;
        Ok(self.root.join(plan_id))
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        path: &Path,
        plan_id: &str,
    ) -> Result<T, StoreError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(plan_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }
}

/// Plan ids become directory names: ASCII alphanumerics, `-` and `_` only.
fn validate_id(plan_id: &str) -> Result<(), StoreError> {
    let valid = !plan_id.is_empty()
        && plan_id.len() <= 128
        && plan_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidId(plan_id.to_string()))
    }
}

/// Serialize `value` next to `path` and rename it into place.
async fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let content = serde_json::to_string_pretty(value)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::now_v7().simple()));

    tokio::fs::write(&tmp, content).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

impl PlanStore for FilePlanStore {
    async fn save(&self, plan: &Plan) -> Result<(), StoreError> {
        let dir = self.plan_dir(&plan.id)?;
        tokio::fs::create_dir_all(&dir).await?;
        write_atomic(&dir.join(PLAN_FILE), plan).await?;
        write_atomic(&dir.join(TRACKING_FILE), &plan.tracking()).await?;
        tracing::debug!(
            plan_id = %plan.id,
            status = %plan.status,
            completed_steps = plan.completed_steps,
            "plan saved"
        );
        Ok(())
    }

    async fn load(&self, plan_id: &str) -> Result<Plan, StoreError> {
        let dir = self.plan_dir(plan_id)?;
        Self::read_json(&dir.join(PLAN_FILE), plan_id).await
    }

    async fn list(&self) -> Result<Vec<Plan>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut plans = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let plan_id = entry.file_name().to_string_lossy().into_owned();
            match self.load(&plan_id).await {
                Ok(plan) => plans.push(plan),
                Err(e) => tracing::warn!(plan_id, error = %e, "skipping unreadable plan"),
            }
        }
        plans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(plans)
    }

    async fn delete(&self, plan_id: &str) -> Result<(), StoreError> {
        let dir = self.plan_dir(plan_id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(plan_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn tracking(&self, plan_id: &str) -> Result<PlanTracking, StoreError> {
        let dir = self.plan_dir(plan_id)?;
        match Self::read_json(&dir.join(TRACKING_FILE), plan_id).await {
            Err(StoreError::NotFound(_)) => Ok(self.load(plan_id).await?.tracking()),
            other => other,
        }
    }
}
