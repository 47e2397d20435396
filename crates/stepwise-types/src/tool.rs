//! Tool catalog types.
//!
//! A `ToolDescriptor` is what the planner and the workflow generator show the
//! LLM: the tool's name, a one-line description, and the shape of its inputs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name, description and parameter shape of a callable tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON-Schema-like object describing accepted inputs.
    #[serde(default)]
    pub parameters: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Top-level parameters with their type and required flag, required
    /// ones first, then by name.
    pub fn parameter_specs(&self) -> Vec<ParameterSpec> {
        let required: Vec<&str> = self
            .parameters
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let Some(props) = self.parameters.get("properties").and_then(Value::as_object) else {
            return Vec::new();
        };

        let mut specs: Vec<ParameterSpec> = props
            .iter()
            .map(|(name, schema)| ParameterSpec {
                name: name.clone(),
                kind: schema_kind(schema),
                required: required.contains(&name.as_str()),
                description: schema
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
            .collect();
        specs.sort_by(|a, b| b.required.cmp(&a.required).then_with(|| a.name.cmp(&b.name)));
        specs
    }
}

/// One parameter as shown in a tool catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: String,
    /// `string`, `object`, an enum listing like `read|write`, or `None` when
    /// the schema gives no type.
    pub kind: Option<String>,
    pub required: bool,
    pub description: Option<String>,
}

fn schema_kind(schema: &Value) -> Option<String> {
    if let Some(options) = schema.get("enum").and_then(Value::as_array) {
        let options: Vec<String> = options
            .iter()
            .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
            .collect();
        return Some(options.join("|"));
    }
    match schema.get("type")? {
        Value::String(kind) => Some(kind.clone()),
        Value::Array(kinds) => Some(
            kinds
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("|"),
        ),
        _ => None,
    }
}
