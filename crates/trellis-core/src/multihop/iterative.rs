//! Iterative retrieval without decomposition
//!
//! Repeats {retrieve, merge, assess} until a heuristic confidence
//! clears the configured threshold or the iteration cap is reached.
//! Between rounds the LLM is asked to rephrase the query based on what
//! came back so far; a refinement failure ends the loop early rather
//! than erroring.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::MultiHopConfig;
use crate::llm::provider::Provider;
use crate::llm::types::GenerationRequest;
use crate::multihop::Retriever;
use crate::search::{truncate_chars, SearchResult};

const REFINE_MAX_TOKENS: usize = 100;

const REFINE_SYSTEM_PROMPT: &str = "You reword search queries over a project knowledge \
graph to surface missing information. Respond with the reworded query only.";

/// Merged evidence plus how the loop ended.
#[derive(Debug, Clone)]
pub struct IterativeOutcome {
    pub results: Vec<SearchResult>,
    pub iterations: usize,
    pub confidence: f32,
}

/// Retrieval loop with LLM-assisted query refinement.
pub struct IterativeReasoner {
    provider: Arc<dyn Provider>,
    config: MultiHopConfig,
}

impl IterativeReasoner {
    pub fn new(provider: Arc<dyn Provider>, config: MultiHopConfig) -> Self {
        Self { provider, config }
    }

    pub async fn retrieve(&self, question: &str, retriever: &dyn Retriever) -> IterativeOutcome {
        let rounds = self.config.max_iterations.max(1);
        let mut merged: Vec<SearchResult> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut query = question.to_string();
        let mut confidence = 0.0;
        let mut iterations = 0;

        for round in 0..rounds {
            iterations = round + 1;
            let batch = retriever.retrieve(&query).await;
            for result in batch {
                if seen.insert(result.dedup_key()) {
                    merged.push(result);
                }
            }

            confidence = assess_confidence(question, &merged);
            debug!(
                round = iterations,
                results = merged.len(),
                confidence,
                "iterative retrieval round complete"
            );
            if confidence >= self.config.confidence_threshold {
                break;
            }

            if round + 1 < rounds {
                match self.refine(question, &query, &merged).await {
                    Some(refined) if refined != query => query = refined,
                    _ => break,
                }
            }
        }

        IterativeOutcome { results: merged, iterations, confidence }
    }

    /// Ask for a better phrasing of the query. `None` ends the loop.
    async fn refine(
        &self,
        question: &str,
        current: &str,
        results: &[SearchResult],
    ) -> Option<String> {
        let found = if results.is_empty() {
            "Nothing was found.".to_string()
        } else {
            let lines: Vec<String> = results
                .iter()
                .take(2)
                .map(|r| format!("- {}", truncate_chars(&r.content, 120)))
                .collect();
            format!("Found so far:\n{}", lines.join("\n"))
        };
        let prompt = format!(
            "Original question: {question}\nCurrent query: {current}\n{found}\n\
             Reword the query to find what is still missing."
        );
        let request = GenerationRequest::new(prompt)
            .with_system(REFINE_SYSTEM_PROMPT)
            .with_temperature(0.4)
            .with_max_tokens(REFINE_MAX_TOKENS);

        match self.provider.generate(request).await {
            Ok(g) => {
                let refined = g.text.lines().next().unwrap_or("").trim().trim_matches('"');
                if refined.is_empty() { None } else { Some(refined.to_string()) }
            }
            Err(e) => {
                warn!(error = %e, "query refinement failed, stopping iteration");
                None
            }
        }
    }
}

/// Blend of question-term coverage, result volume, and origin diversity.
pub(crate) fn assess_confidence(question: &str, results: &[SearchResult]) -> f32 {
    if results.is_empty() {
        return 0.0;
    }

    let terms: Vec<String> = question
        .to_lowercase()
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|t| t.chars().count() >= 4)
        .collect();
    let coverage = if terms.is_empty() {
        1.0
    } else {
        let corpus: String = results
            .iter()
            .map(|r| r.content.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");
        terms.iter().filter(|t| corpus.contains(t.as_str())).count() as f32 / terms.len() as f32
    };

    let volume = (results.len() as f32 / 5.0).min(1.0);
    let origins: HashSet<&str> = results.iter().map(|r| r.origin.as_str()).collect();
    let diversity = (origins.len() as f32 / 3.0).min(1.0);

    0.5 * coverage + 0.3 * volume + 0.2 * diversity
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::graph::types::NodeLabel;
    use crate::llm::mock::MockProvider;
    use crate::search::RetrievalOrigin;

    struct ScriptedRetriever {
        questions: Mutex<Vec<String>>,
        batch: Vec<SearchResult>,
    }

    impl ScriptedRetriever {
        fn new(batch: Vec<SearchResult>) -> Self {
            Self { questions: Mutex::new(Vec::new()), batch }
        }

        fn questions(&self) -> Vec<String> {
            self.questions.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Retriever for ScriptedRetriever {
        async fn retrieve(&self, question: &str) -> Vec<SearchResult> {
            self.questions.lock().unwrap().push(question.to_string());
            self.batch.clone()
        }
    }

    fn result(id: &str, content: &str, origin: RetrievalOrigin) -> SearchResult {
        SearchResult {
            kind: NodeLabel::Document,
            content: content.to_string(),
            payload: serde_json::json!({ "id": id }),
            origin,
            score: None,
        }
    }

    #[test]
    fn test_confidence_is_zero_without_results() {
        assert_eq!(assess_confidence("anything at all", &[]), 0.0);
    }

    #[test]
    fn test_confidence_rises_with_coverage_and_diversity() {
        let thin = vec![result("a", "unrelated text", RetrievalOrigin::Keyword)];
        let rich: Vec<SearchResult> = (0..5)
            .map(|i| {
                let origin = match i % 3 {
                    0 => RetrievalOrigin::Structural,
                    1 => RetrievalOrigin::Semantic,
                    _ => RetrievalOrigin::GraphQuery,
                };
                result(&format!("r{i}"), "database migration risks and owners", origin)
            })
            .collect();

        let question = "what are the database migration risks?";
        assert!(assess_confidence(question, &rich) > assess_confidence(question, &thin));
        assert!(assess_confidence(question, &rich) >= 0.8);
    }

    #[tokio::test]
    async fn test_stops_once_confident_without_refining() {
        let provider = Arc::new(MockProvider::new());
        let batch: Vec<SearchResult> = (0..6)
            .map(|i| {
                result(
                    &format!("r{i}"),
                    "list of database migration risks and their owners",
                    RetrievalOrigin::Structural,
                )
            })
            .collect();
        let retriever = ScriptedRetriever::new(batch);

        let outcome = IterativeReasoner::new(provider.clone(), MultiHopConfig::default())
            .retrieve("list the database migration risks", &retriever)
            .await;

        assert_eq!(outcome.iterations, 1);
        assert!(outcome.confidence >= 0.8);
        assert_eq!(provider.generation_calls(), 0);
    }

    #[tokio::test]
    async fn test_refines_up_to_the_cap() {
        let provider = Arc::new(MockProvider::new());
        provider.push_text("migration blockers");
        provider.push_text("open database tasks");
        let retriever = ScriptedRetriever::new(Vec::new());

        let config = MultiHopConfig { max_iterations: 3, ..MultiHopConfig::default() };
        let outcome = IterativeReasoner::new(provider.clone(), config)
            .retrieve("what blocks the migration?", &retriever)
            .await;

        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.confidence, 0.0);
        assert_eq!(
            retriever.questions(),
            vec!["what blocks the migration?", "migration blockers", "open database tasks"]
        );
        assert_eq!(provider.generation_calls(), 2);
    }

    #[tokio::test]
    async fn test_rounds_merge_without_duplicates() {
        let provider = Arc::new(MockProvider::new());
        provider.push_text("a different query");
        let retriever = ScriptedRetriever::new(vec![result(
            "only",
            "the same single result",
            RetrievalOrigin::Semantic,
        )]);

        let config = MultiHopConfig {
            max_iterations: 2,
            confidence_threshold: 0.99,
            ..MultiHopConfig::default()
        };
        let outcome = IterativeReasoner::new(provider, config)
            .retrieve("question", &retriever)
            .await;

        assert_eq!(retriever.questions().len(), 2);
        assert_eq!(outcome.results.len(), 1);
    }

    #[tokio::test]
    async fn test_refinement_failure_ends_the_loop() {
        let provider = Arc::new(MockProvider::new());
        provider.fail_generation(true);
        let retriever = ScriptedRetriever::new(Vec::new());

        let config = MultiHopConfig { max_iterations: 3, ..MultiHopConfig::default() };
        let outcome = IterativeReasoner::new(provider, config)
            .retrieve("question", &retriever)
            .await;

        assert_eq!(outcome.iterations, 1);
        assert_eq!(retriever.questions().len(), 1);
    }
}
