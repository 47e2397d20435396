//! Tool surface: the uniform `(ctx, inputs) -> output` contract.
//!
//! Five built-ins ship with the core (`fetch`, `filesystem`, `memory`,
//! `time`, `sequential-thinking`). Each is generic over the capability it
//! needs, so tests can substitute mocks. External tools enter through the
//! [`ToolCaller`] capability and are merged into the [`registry::ToolRegistry`].
//!
//! `Tool` and `ToolCaller` return boxed futures so they can be held as trait
//! objects inside the registry.

pub mod fetch;
pub mod filesystem;
pub mod memory;
pub mod registry;
pub mod thinking;
pub mod time;

use std::future::Future;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use stepwise_types::duration::duration_from_value;
use stepwise_types::tool::ToolDescriptor;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use registry::ToolRegistry;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors a tool invocation can produce.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    /// The tool name is neither a built-in nor known to the external caller.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// Required inputs absent or ill-typed after rendering.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The tool ran and failed (IO, HTTP, generator, ...).
    #[error("{0}")]
    Execution(String),

    #[error("cancelled")]
    Cancelled,

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl ToolError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ToolError::Execution(_) | ToolError::Timeout(_))
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Per-invocation context handed to every tool.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub execution_id: Uuid,
    pub step_id: String,
    /// Fires when the caller cancels; tools doing blocking IO must honor it.
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(execution_id: Uuid, step_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            execution_id,
            step_id: step_id.into(),
            cancel,
        }
    }

    /// A context with a fresh id and a token nobody cancels.
    pub fn detached(step_id: impl Into<String>) -> Self {
        Self::new(Uuid::now_v7(), step_id, CancellationToken::new())
    }

    /// Drive `fut` to completion unless the context is cancelled first.
    pub async fn run_cancellable<T>(
        &self,
        fut: impl Future<Output = Result<T, ToolError>>,
    ) -> Result<T, ToolError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ToolError::Cancelled),
            result = fut => result,
        }
    }

    /// Sleep for `duration`, returning early with `Cancelled` on cancellation.
    pub async fn sleep(&self, duration: Duration) -> Result<(), ToolError> {
        self.run_cancellable(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A named, side-effecting callable.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Catalog entry shown to planners and generators.
    fn descriptor(&self) -> ToolDescriptor;

    fn call<'a>(
        &'a self,
        ctx: &'a ToolContext,
        inputs: Map<String, Value>,
    ) -> BoxFuture<'a, Result<Value, ToolError>>;
}

/// Name-keyed callable surface for tools the core does not implement itself.
pub trait ToolCaller: Send + Sync {
    fn call_tool<'a>(
        &'a self,
        ctx: &'a ToolContext,
        name: &'a str,
        inputs: Map<String, Value>,
    ) -> BoxFuture<'a, Result<Value, ToolError>>;

    /// Tools this caller can serve. Empty when the catalog is not known.
    fn list_tools(&self) -> Vec<ToolDescriptor> {
        Vec::new()
    }
}

// ---------------------------------------------------------------------------
// Input helpers
// ---------------------------------------------------------------------------

/// Optional string input; non-string scalars are converted to their text.
pub(crate) fn opt_str(inputs: &Map<String, Value>, key: &str) -> Option<String> {
    match inputs.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Required string input.
pub(crate) fn req_str(inputs: &Map<String, Value>, key: &str) -> Result<String, ToolError> {
    match inputs.get(key) {
        None | Some(Value::Null) => Err(ToolError::InvalidInput(format!("missing '{key}'"))),
        Some(_) => opt_str(inputs, key)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ToolError::InvalidInput(format!("'{key}' must be a non-empty string"))),
    }
}

/// Optional duration input (`"2s"`, `"500ms"`, or a number of seconds).
pub(crate) fn opt_duration(
    inputs: &Map<String, Value>,
    key: &str,
) -> Result<Option<Duration>, ToolError> {
    match inputs.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => duration_from_value(value)
            .map(Some)
            .map_err(|e| ToolError::InvalidInput(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_req_str() {
        let i = inputs(json!({ "url": "http://x", "n": 5, "empty": "", "obj": {} }));
        assert_eq!(req_str(&i, "url").unwrap(), "http://x");
        assert_eq!(req_str(&i, "n").unwrap(), "5");
        assert!(matches!(req_str(&i, "missing"), Err(ToolError::InvalidInput(_))));
        assert!(matches!(req_str(&i, "empty"), Err(ToolError::InvalidInput(_))));
        assert!(matches!(req_str(&i, "obj"), Err(ToolError::InvalidInput(_))));
    }

    #[test]
    fn test_opt_duration() {
        let i = inputs(json!({ "a": "2s", "b": 1, "c": "bogus" }));
        assert_eq!(opt_duration(&i, "a").unwrap(), Some(Duration::from_secs(2)));
        assert_eq!(opt_duration(&i, "b").unwrap(), Some(Duration::from_secs(1)));
        assert_eq!(opt_duration(&i, "z").unwrap(), None);
        assert!(opt_duration(&i, "c").is_err());
    }

    #[tokio::test]
    async fn test_sleep_honors_cancellation() {
        let ctx = ToolContext::detached("s");
        ctx.cancel.cancel();
        let started = std::time::Instant::now();
        let err = ctx.sleep(Duration::from_secs(30)).await.unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(ToolError::Execution("x".into()).is_retryable());
        assert!(ToolError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!ToolError::Cancelled.is_retryable());
        assert!(!ToolError::InvalidInput("x".into()).is_retryable());
        assert!(!ToolError::NotFound("x".into()).is_retryable());
    }
}
