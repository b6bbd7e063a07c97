//! Hypothetical-document expansion
//!
//! A short question embeds poorly against paragraph-sized content. The
//! expander asks the model for a few plausible answer documents and the
//! semantic searcher embeds those alongside the question, pulling the
//! query vector toward the document distribution. Each sample runs at a
//! slightly higher temperature to diversify phrasing. Expansion is an
//! optimization: when generation fails entirely, retrieval proceeds
//! without it.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::config::HydeConfig;
use crate::llm::provider::Provider;
use crate::llm::types::GenerationRequest;

const HYDE_SYSTEM_PROMPT: &str = "You draft short, plausible excerpts from project documents. \
Write as if quoting an existing document that answers the question. \
Respond with the excerpt only, two to three sentences, no preamble.";

const HYDE_MAX_TOKENS: usize = 200;

/// Generates hypothetical answer documents for a question.
pub struct HydeExpander {
    provider: Arc<dyn Provider>,
    cache: TtlCache<String, Vec<String>>,
    config: HydeConfig,
}

impl HydeExpander {
    pub fn new(provider: Arc<dyn Provider>, config: HydeConfig) -> Self {
        let cache = TtlCache::new(
            Duration::from_secs(config.cache_ttl_secs),
            config.cache_capacity,
        );
        Self {
            provider,
            cache,
            config,
        }
    }

    /// Generate up to `samples` hypothetical documents. Returns an empty
    /// list when expansion is disabled or every sample fails; only
    /// non-empty outcomes are cached so a flaky provider can recover.
    pub async fn hypothetical_documents(&self, question: &str) -> Vec<String> {
        if !self.config.enabled || self.config.samples == 0 {
            return Vec::new();
        }

        let key = cache_key(question, self.config.samples);
        if let Some(cached) = self.cache.get(&key) {
            debug!(documents = cached.len(), "hyde cache hit");
            return cached;
        }

        let prompt = format!(
            "Write a brief excerpt from a plausible project document that would \
             answer this question.\n\nQuestion: {question}"
        );

        let samples = (0..self.config.samples).map(|index| {
            let request = GenerationRequest::new(prompt.clone())
                .with_system(HYDE_SYSTEM_PROMPT)
                .with_temperature(
                    self.config.base_temperature
                        + self.config.temperature_step * index as f32,
                )
                .with_max_tokens(HYDE_MAX_TOKENS);
            let provider = Arc::clone(&self.provider);
            async move { provider.generate(request).await }
        });

        let mut documents = Vec::with_capacity(self.config.samples);
        let mut failures = 0usize;
        for outcome in join_all(samples).await {
            match outcome {
                Ok(generated) => {
                    let text = generated.text.trim().to_string();
                    if !text.is_empty() {
                        documents.push(text);
                    }
                }
                Err(_) => failures += 1,
            }
        }

        if documents.is_empty() {
            if failures > 0 {
                warn!(failures, "hypothetical document generation failed, skipping expansion");
            }
            return Vec::new();
        }

        self.cache.insert(key, documents.clone());
        documents
    }
}

fn cache_key(question: &str, samples: usize) -> String {
    let normalized = question
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    format!("{normalized}#{samples}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::MockProvider;

    fn config(samples: usize) -> HydeConfig {
        HydeConfig {
            samples,
            ..HydeConfig::default()
        }
    }

    #[tokio::test]
    async fn test_generates_and_caches_documents() {
        let provider = Arc::new(MockProvider::new());
        provider.push_text("The rollout finishes in June.");
        provider.push_text("Phase two depends on the audit.");
        let expander = HydeExpander::new(provider.clone(), config(2));

        let first = expander.hypothetical_documents("When does the rollout finish?").await;
        assert_eq!(first.len(), 2);
        assert_eq!(provider.generation_calls(), 2);

        // Same question, different casing: served from cache.
        let second = expander.hypothetical_documents("when does THE rollout finish?").await;
        assert_eq!(second, first);
        assert_eq!(provider.generation_calls(), 2);
    }

    #[tokio::test]
    async fn test_temperature_ladder() {
        let provider = Arc::new(MockProvider::new());
        let expander = HydeExpander::new(provider.clone(), config(3));
        expander.hypothetical_documents("What changed?").await;

        let temps: Vec<f32> = provider.requests().iter().map(|r| r.temperature).collect();
        assert_eq!(temps.len(), 3);
        assert!(temps[0] < temps[1] && temps[1] < temps[2]);
    }

    #[tokio::test]
    async fn test_total_failure_is_empty_and_uncached() {
        let provider = Arc::new(MockProvider::new());
        provider.fail_generation(true);
        let expander = HydeExpander::new(provider.clone(), config(2));

        assert!(expander.hypothetical_documents("What changed?").await.is_empty());

        // Provider recovers; the failed outcome must not have been cached.
        provider.fail_generation(false);
        provider.push_text("A useful excerpt.");
        let recovered = expander.hypothetical_documents("What changed?").await;
        assert_eq!(recovered.len(), 2);
        assert_eq!(recovered[0], "A useful excerpt.");
    }

    #[tokio::test]
    async fn test_disabled_expander_is_silent() {
        let provider = Arc::new(MockProvider::new());
        let expander = HydeExpander::new(
            provider.clone(),
            HydeConfig {
                enabled: false,
                ..HydeConfig::default()
            },
        );

        assert!(expander.hypothetical_documents("What changed?").await.is_empty());
        assert_eq!(provider.generation_calls(), 0);
    }
}
