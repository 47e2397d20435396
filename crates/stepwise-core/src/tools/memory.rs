//! `memory` -- process-local key-value scratchpad shared across steps.
//!
//! Actions: `store` (alias `set`), `retrieve` (alias `get`), `delete`,
//! `append`, `list`. Without an `action`, `key` + `value` stores and
//! `key` alone retrieves.

use futures_util::future::BoxFuture;
use serde_json::{Map, Value, json};
use stepwise_types::tool::ToolDescriptor;

use super::{Tool, ToolContext, ToolError, opt_str, req_str};
use crate::storage::kv_store::{KvError, KvStore};

pub const MEMORY_TOOL: &str = "memory";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemoryAction {
    Store,
    Retrieve,
    Delete,
    Append,
    List,
}

impl MemoryAction {
    fn resolve(inputs: &Map<String, Value>) -> Result<Self, ToolError> {
        match opt_str(inputs, "action").as_deref().map(str::trim) {
            Some("store") | Some("set") => Ok(MemoryAction::Store),
            Some("retrieve") | Some("get") => Ok(MemoryAction::Retrieve),
            Some("delete") => Ok(MemoryAction::Delete),
            Some("append") => Ok(MemoryAction::Append),
            Some("list") => Ok(MemoryAction::List),
            Some("") | None => {
                if inputs.contains_key("value") {
                    Ok(MemoryAction::Store)
                } else {
                    Ok(MemoryAction::Retrieve)
                }
            }
            Some(other) => Err(ToolError::InvalidInput(format!(
                "unknown memory action '{other}' (expected store, retrieve, delete, append, list)"
            ))),
        }
    }
}

fn kv_err(e: KvError) -> ToolError {
    ToolError::Execution(e.to_string())
}

/// Key-value operations over any [`KvStore`].
pub struct MemoryTool<K: KvStore> {
    store: K,
}

impl<K: KvStore> MemoryTool<K> {
    pub fn new(store: K) -> Self {
        Self { store }
    }

    async fn run(&self, ctx: &ToolContext, inputs: Map<String, Value>) -> Result<Value, ToolError> {
        let action = MemoryAction::resolve(&inputs)?;
        if action == MemoryAction::List {
            return self.list().await;
        }

        let key = req_str(&inputs, "key")?;
        tracing::debug!(step_id = %ctx.step_id, key = %key, ?action, "memory operation");

        match action {
            MemoryAction::Store => {
                let value = inputs.get("value").cloned().unwrap_or(Value::Null);
                self.store.set(&key, value.clone()).await.map_err(kv_err)?;
                Ok(value)
            }
            MemoryAction::Retrieve => Ok(self
                .store
                .get(&key)
                .await
                .map_err(kv_err)?
                .unwrap_or(Value::Null)),
            MemoryAction::Delete => {
                let previous = self.store.delete(&key).await.map_err(kv_err)?;
                Ok(json!({ "key": key, "deleted": previous.is_some() }))
            }
            MemoryAction::Append => {
                let value = inputs.get("value").cloned().ok_or_else(|| {
                    ToolError::InvalidInput("'append' requires 'value'".to_string())
                })?;
                self.store.append(&key, value).await.map_err(kv_err)
            }
            MemoryAction::List => self.list().await,
        }
    }

    async fn list(&self) -> Result<Value, ToolError> {
        let keys = self.store.keys().await.map_err(kv_err)?;
        Ok(json!(keys))
    }
}

impl<K: KvStore> Tool for MemoryTool<K> {
    fn name(&self) -> &str {
        MEMORY_TOOL
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            MEMORY_TOOL,
            "Store and retrieve values shared between steps. key+value stores, key alone retrieves.",
            json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": ["store", "retrieve", "delete", "append", "list"]
                    },
                    "key": { "type": "string" },
                    "value": { "description": "Any JSON value" }
                }
            }),
        )
    }

    fn call<'a>(
        &'a self,
        ctx: &'a ToolContext,
        inputs: Map<String, Value>,
    ) -> BoxFuture<'a, Result<Value, ToolError>> {
        Box::pin(self.run(ctx, inputs))
    }
}
