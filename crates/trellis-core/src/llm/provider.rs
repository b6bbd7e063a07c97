//! Provider abstraction for text generation and embeddings
//!
//! Everything in the engine that talks to a language model goes through
//! [`Provider`], so tests can swap in a scripted implementation and the
//! retrieval pipeline never depends on a concrete backend.

use async_trait::async_trait;

use crate::error::Result;
use crate::llm::types::{GeneratedText, GenerationRequest};

/// Capability trait for language-model backends.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Generate text for a single request.
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratedText>;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Name of the backing model, for logs and reports.
    fn model_name(&self) -> &str;
}

#[async_trait]
impl<P: Provider + ?Sized> Provider for std::sync::Arc<P> {
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratedText> {
        (**self).generate(request).await
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        (**self).embed(texts).await
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}
