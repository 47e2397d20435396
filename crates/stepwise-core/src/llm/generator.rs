//! Generator trait definition.
//!
//! The narrow text-generation capability the workflow core needs from an
//! LLM provider. Uses RPITIT for the async methods; `BoxGenerator` wraps any
//! implementation for dynamic dispatch.
//!
//! Implementations live in stepwise-infra (e.g., `OpenAiCompatGenerator`).

use serde_json::Value;
use stepwise_types::llm::{GenerationRequest, GeneratorError, StructuredRequest};

/// Trait for text generation backends.
pub trait Generator: Send + Sync {
    /// Human-readable generator name (e.g., "openai-compatible").
    fn name(&self) -> &str;

    /// Generate a free-form completion for a single prompt.
    fn generate(
        &self,
        request: &GenerationRequest,
    ) -> impl std::future::Future<Output = Result<String, GeneratorError>> + Send;

    /// Generate a JSON document conforming to `request.schema`.
    ///
    /// Providers without schema-constrained output keep the default, which
    /// reports [`GeneratorError::Unsupported`] so callers can fall back to
    /// [`Generator::generate`] plus extraction.
    fn generate_structured(
        &self,
        request: &StructuredRequest,
    ) -> impl std::future::Future<Output = Result<Value, GeneratorError>> + Send {
        let _ = request;
        async { Err(GeneratorError::Unsupported("structured output".to_string())) }
    }
}
