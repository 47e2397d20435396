//! `sequential-thinking` -- a single LLM call composed from step inputs.
//!
//! The prompt is `prompt` (or `task`), followed by optional `context` and
//! `data` sections, followed by every other input as a `key: value` line in
//! key order. Returns the completion text.

use futures_util::future::BoxFuture;
use serde_json::{Map, Value, json};
use stepwise_types::llm::{DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, GenerationRequest};
use stepwise_types::tool::ToolDescriptor;

use super::{Tool, ToolContext, ToolError};
use crate::llm::box_generator::BoxGenerator;
use crate::template::value_to_string;

pub const THINKING_TOOL: &str = "sequential-thinking";

const RESERVED_KEYS: &[&str] = &["prompt", "task", "context", "data"];

/// Compose the generator prompt from rendered step inputs.
pub fn compose_prompt(inputs: &Map<String, Value>) -> Result<String, ToolError> {
    let base = ["prompt", "task"]
        .iter()
        .filter_map(|key| inputs.get(*key))
        .filter(|v| !v.is_null())
        .map(value_to_string)
        .find(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidInput("missing 'prompt' or 'task'".to_string()))?;

    let mut prompt = base;
    if let Some(context) = inputs.get("context").filter(|v| !v.is_null()) {
        prompt.push_str("\n\nContext:\n");
        prompt.push_str(&value_to_string(context));
    }
    if let Some(data) = inputs.get("data").filter(|v| !v.is_null()) {
        prompt.push_str("\n\nData:\n");
        prompt.push_str(&value_to_string(data));
    }

    let extras: Vec<String> = inputs
        .iter()
        .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
        .map(|(key, value)| format!("{key}: {}", value_to_string(value)))
        .collect();
    if !extras.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(&extras.join("\n"));
    }
    Ok(prompt)
}

/// LLM reasoning step backed by a [`BoxGenerator`].
pub struct ThinkingTool {
    generator: BoxGenerator,
    temperature: f64,
    max_tokens: u32,
}

impl ThinkingTool {
    pub fn new(generator: BoxGenerator) -> Self {
        Self {
            generator,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_sampling(mut self, temperature: f64, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }
}

impl Tool for ThinkingTool {
    fn name(&self) -> &str {
        THINKING_TOOL
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            THINKING_TOOL,
            "Ask the language model to reason about a prompt, with optional context and data.",
            json!({
                "type": "object",
                "properties": {
                    "prompt": { "type": "string" },
                    "task": { "type": "string", "description": "Alias for prompt" },
                    "context": { "type": "string" },
                    "data": { "description": "Any JSON value to include" }
                }
            }),
        )
    }

    fn call<'a>(
        &'a self,
        ctx: &'a ToolContext,
        inputs: Map<String, Value>,
    ) -> BoxFuture<'a, Result<Value, ToolError>> {
        Box::pin(async move {
            let prompt = compose_prompt(&inputs)?;
            let request = GenerationRequest::new(prompt)
                .with_temperature(self.temperature)
                .with_max_tokens(self.max_tokens);

            tracing::debug!(
                step_id = %ctx.step_id,
                generator = self.generator.name(),
                prompt_len = request.prompt.len(),
                "sequential-thinking request"
            );

            let completion = ctx
                .run_cancellable(async {
                    self.generator
                        .generate(&request)
                        .await
                        .map_err(|e| ToolError::Execution(format!("generator: {e}")))
                })
                .await?;
            Ok(Value::String(completion))
        })
    }
}
