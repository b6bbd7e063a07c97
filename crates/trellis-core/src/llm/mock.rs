//! Scripted provider for tests
//!
//! [`MockProvider`] answers generation requests from a queue of scripted
//! responses, records every request for later assertions, and produces
//! deterministic bag-of-words embeddings so similarity behaves predictably
//! without a real model.

use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::llm::provider::Provider;
use crate::llm::types::{GeneratedText, GenerationRequest};

/// Dimension of the hashed token embeddings.
const MOCK_EMBED_DIM: usize = 16;

#[derive(Default)]
struct MockState {
    script: VecDeque<std::result::Result<String, Error>>,
    requests: Vec<GenerationRequest>,
    generation_calls: u32,
    embedding_calls: u32,
    fail_generation: bool,
    fail_embedding: bool,
}

/// Test double for [`Provider`].
#[derive(Default)]
pub struct MockProvider {
    state: Mutex<MockState>,
}

impl MockProvider {
    /// Create a provider with an empty script. Unscripted generation
    /// requests succeed with the text `"ok"`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful generation response.
    pub fn push_text(&self, text: impl Into<String>) {
        self.lock().script.push_back(Ok(text.into()));
    }

    /// Queue a generation failure.
    pub fn push_error(&self, error: Error) {
        self.lock().script.push_back(Err(error));
    }

    /// Make every generation call fail until reset.
    pub fn fail_generation(&self, fail: bool) {
        self.lock().fail_generation = fail;
    }

    /// Make every embedding call fail until reset.
    pub fn fail_embedding(&self, fail: bool) {
        self.lock().fail_embedding = fail;
    }

    /// Number of generation calls seen so far.
    pub fn generation_calls(&self) -> u32 {
        self.lock().generation_calls
    }

    /// Number of embedding calls seen so far.
    pub fn embedding_calls(&self) -> u32 {
        self.lock().embedding_calls
    }

    /// All generation requests recorded so far, in call order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.lock().requests.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Hash whitespace tokens into a fixed-size count vector and
    /// L2-normalize it. Texts sharing words end up with similar vectors.
    pub fn embedding_for(text: &str) -> Vec<f32> {
        let mut counts = vec![0.0f32; MOCK_EMBED_DIM];
        for token in text.split_whitespace() {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % MOCK_EMBED_DIM;
            counts[bucket] += 1.0;
        }

        let magnitude: f32 = counts.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for c in counts.iter_mut() {
                *c /= magnitude;
            }
        }
        counts
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratedText> {
        let mut state = self.lock();
        state.generation_calls += 1;
        state.requests.push(request);

        if state.fail_generation {
            return Err(Error::Provider("scripted generation failure".into()));
        }

        let text = match state.script.pop_front() {
            Some(Ok(text)) => text,
            Some(Err(error)) => return Err(error),
            None => "ok".to_string(),
        };

        Ok(GeneratedText {
            text,
            model: "mock".into(),
            tokens_used: 0,
        })
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut state = self.lock();
        state.embedding_calls += 1;

        if state.fail_embedding {
            return Err(Error::Embedding("scripted embedding failure".into()));
        }

        Ok(texts.iter().map(|t| Self::embedding_for(t)).collect())
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::cosine_similarity;

    #[tokio::test]
    async fn test_scripted_responses_in_order() {
        let provider = MockProvider::new();
        provider.push_text("first");
        provider.push_text("second");

        let a = provider.generate(GenerationRequest::new("q1")).await.unwrap();
        let b = provider.generate(GenerationRequest::new("q2")).await.unwrap();
        let c = provider.generate(GenerationRequest::new("q3")).await.unwrap();

        assert_eq!(a.text, "first");
        assert_eq!(b.text, "second");
        assert_eq!(c.text, "ok");
        assert_eq!(provider.generation_calls(), 3);
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let provider = MockProvider::new();
        provider.push_error(Error::Provider("down".into()));

        let result = provider.generate(GenerationRequest::new("q")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_embeddings_are_deterministic_and_token_sensitive() {
        let provider = MockProvider::new();
        let texts = vec![
            "database migration plan".to_string(),
            "database migration plan".to_string(),
            "cat pictures".to_string(),
        ];
        let vectors = provider.embed(&texts).await.unwrap();

        let same = cosine_similarity(&vectors[0], &vectors[1]);
        let different = cosine_similarity(&vectors[0], &vectors[2]);
        assert!((same - 1.0).abs() < 0.001);
        assert!(different < same);
    }

    #[tokio::test]
    async fn test_recorded_requests() {
        let provider = MockProvider::new();
        let request = GenerationRequest::new("what changed?").with_temperature(0.9);
        provider.generate(request).await.unwrap();

        let recorded = provider.requests();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].prompt, "what changed?");
        assert_eq!(recorded[0].temperature, 0.9);
    }
}
