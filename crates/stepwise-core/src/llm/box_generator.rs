//! BoxGenerator -- object-safe dynamic dispatch wrapper for Generator.
//!
//! 1. Define an object-safe `GeneratorDyn` trait with boxed futures
//! 2. Blanket-impl `GeneratorDyn` for all `T: Generator`
//! 3. `BoxGenerator` wraps `Arc<dyn GeneratorDyn>` and delegates
//!
//! The wrapper is `Clone` so one generator can back both the
//! `sequential-thinking` tool and the planner.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use stepwise_types::llm::{GenerationRequest, GeneratorError, StructuredRequest};

use super::generator::Generator;

/// Object-safe version of [`Generator`] with boxed futures.
pub trait GeneratorDyn: Send + Sync {
    fn name(&self) -> &str;

    fn generate_boxed<'a>(
        &'a self,
        request: &'a GenerationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, GeneratorError>> + Send + 'a>>;

    fn generate_structured_boxed<'a>(
        &'a self,
        request: &'a StructuredRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Value, GeneratorError>> + Send + 'a>>;
}

/// Blanket implementation: any `Generator` automatically implements `GeneratorDyn`.
impl<T: Generator> GeneratorDyn for T {
    fn name(&self) -> &str {
        Generator::name(self)
    }

    fn generate_boxed<'a>(
        &'a self,
        request: &'a GenerationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, GeneratorError>> + Send + 'a>> {
        Box::pin(self.generate(request))
    }

    fn generate_structured_boxed<'a>(
        &'a self,
        request: &'a StructuredRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Value, GeneratorError>> + Send + 'a>> {
        Box::pin(self.generate_structured(request))
    }
}

/// Type-erased generator for runtime provider selection.
#[derive(Clone)]
pub struct BoxGenerator {
    inner: Arc<dyn GeneratorDyn>,
}

impl BoxGenerator {
    /// Wrap a concrete `Generator` in a type-erased handle.
    pub fn new<T: Generator + 'static>(generator: T) -> Self {
        Self {
            inner: Arc::new(generator),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn generate(&self, request: &GenerationRequest) -> Result<String, GeneratorError> {
        self.inner.generate_boxed(request).await
    }

    pub async fn generate_structured(
        &self,
        request: &StructuredRequest,
    ) -> Result<Value, GeneratorError> {
        self.inner.generate_structured_boxed(request).await
    }
}

impl std::fmt::Debug for BoxGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxGenerator")
            .field("name", &self.name())
            .finish()
    }
}
