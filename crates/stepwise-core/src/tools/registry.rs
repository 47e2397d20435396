//! Tool registry: built-ins by name, with an optional external fallback.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use stepwise_types::tool::ToolDescriptor;

use super::{Tool, ToolCaller, ToolContext, ToolError};

/// Name-keyed tool surface consumed by the executor and the plan executor.
///
/// Built-ins registered with [`ToolRegistry::register`] shadow external tools
/// of the same name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
    external: Option<Arc<dyn ToolCaller>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its own name, replacing any previous entry.
    pub fn register(&mut self, tool: impl Tool + 'static) -> &mut Self {
        let tool: Arc<dyn Tool> = Arc::new(tool);
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    /// Route names with no built-in to `caller`.
    pub fn with_external(mut self, caller: Arc<dyn ToolCaller>) -> Self {
        self.external = Some(caller);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Built-in names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Descriptors of every built-in followed by the external catalog.
    pub fn catalog(&self) -> Vec<ToolDescriptor> {
        let mut catalog: Vec<ToolDescriptor> =
            self.tools.values().map(|tool| tool.descriptor()).collect();
        if let Some(external) = &self.external {
            catalog.extend(
                external
                    .list_tools()
                    .into_iter()
                    .filter(|t| !self.tools.contains_key(&t.name)),
            );
        }
        catalog
    }
}

impl ToolCaller for ToolRegistry {
    fn call_tool<'a>(
        &'a self,
        ctx: &'a ToolContext,
        name: &'a str,
        inputs: Map<String, Value>,
    ) -> BoxFuture<'a, Result<Value, ToolError>> {
        if let Some(tool) = self.get(name) {
            return tool.call(ctx, inputs);
        }
        match &self.external {
            Some(external) => external.call_tool(ctx, name, inputs),
            None => Box::pin(async move { Err(ToolError::NotFound(name.to_string())) }),
        }
    }

    fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.catalog()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .field("external", &self.external.is_some())
            .finish()
    }
}
