//! Text generation request types.
//!
//! The workflow core consumes LLMs through a narrow "generate text" capability.
//! These types describe what goes into a generation call and what can go wrong.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default sampling temperature for generation calls.
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Default completion budget for generation calls.
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

/// A single-prompt generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl GenerationRequest {
    /// A request with default temperature and token budget.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A generation request constrained to a JSON schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredRequest {
    pub request: GenerationRequest,
    /// Name reported to providers that require one (e.g. `response_format`).
    pub schema_name: String,
    pub schema: Value,
}

/// Errors from generator operations.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("provider error: {message}")]
    Provider { message: String },

    #[error("unsupported by provider: {0}")]
    Unsupported(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },
}

impl GeneratorError {
    /// Whether the caller should fall back to unstructured generation.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, GeneratorError::Unsupported(_))
    }
}
