//! Semantic retrieval
//!
//! Embeds the question together with its hypothetical answer documents,
//! averages the vectors into one L2-normalized query vector, and runs it
//! against the store's vector index. Thin result sets are supplemented
//! with keyword matches. Every external failure shrinks the result list
//! instead of surfacing an error.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::classify::QueryAnalysis;
use crate::config::RetrievalConfig;
use crate::graph::store::GraphStore;
use crate::llm::provider::Provider;
use crate::llm::types::centroid;
use crate::search::hyde::HydeExpander;
use crate::search::{significant_term, RetrievalOrigin, SearchResult};

/// Embedding search with HyDE expansion and keyword supplement.
pub struct SemanticSearcher {
    provider: Arc<dyn Provider>,
    store: Arc<dyn GraphStore>,
    hyde: HydeExpander,
    config: RetrievalConfig,
}

impl SemanticSearcher {
    pub fn new(
        provider: Arc<dyn Provider>,
        store: Arc<dyn GraphStore>,
        hyde: HydeExpander,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            provider,
            store,
            hyde,
            config,
        }
    }

    /// Run the semantic search. Infallible: a failed expansion falls
    /// back to plain embedding, a failed embedding falls back to keyword
    /// search, and both failing yields an empty list.
    pub async fn search(&self, question: &str, analysis: &QueryAnalysis) -> Vec<SearchResult> {
        let documents = self.hyde.hypothetical_documents(question).await;
        debug!(expansions = documents.len(), "semantic search");

        let mut results = match self.query_vector(question, documents).await {
            Some(vector) => self.vector_results(&vector).await,
            None => Vec::new(),
        };

        if results.len() < self.config.keyword_floor {
            self.supplement_with_keywords(question, analysis, &mut results).await;
        }
        results
    }

    /// One embedding batch over the question and its expansions,
    /// averaged and normalized.
    async fn query_vector(&self, question: &str, documents: Vec<String>) -> Option<Vec<f32>> {
        let mut texts = Vec::with_capacity(documents.len() + 1);
        texts.push(question.to_string());
        texts.extend(documents);

        match self.provider.embed(&texts).await {
            Ok(vectors) => centroid(&vectors),
            Err(e) => {
                warn!(error = %e, "query embedding failed, degrading to keyword search");
                None
            }
        }
    }

    async fn vector_results(&self, vector: &[f32]) -> Vec<SearchResult> {
        match self.store.vector_search(vector, self.config.top_k).await {
            Ok(hits) => hits
                .iter()
                .map(|(node, score)| {
                    SearchResult::from_node(node, RetrievalOrigin::Semantic, Some(*score))
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "vector search unavailable");
                Vec::new()
            }
        }
    }

    async fn supplement_with_keywords(
        &self,
        question: &str,
        analysis: &QueryAnalysis,
        results: &mut Vec<SearchResult>,
    ) {
        let term = analysis
            .entity_hints
            .first()
            .map(|h| h.to_lowercase())
            .unwrap_or_else(|| significant_term(question));
        if term.chars().count() < 3 {
            return;
        }

        match self.store.keyword_search(&term, self.config.top_k).await {
            Ok(nodes) => {
                let seen: Vec<String> = results
                    .iter()
                    .filter_map(|r| r.payload.get("id").and_then(|v| v.as_str()).map(String::from))
                    .collect();
                for node in nodes {
                    if seen.contains(&node.id) {
                        continue;
                    }
                    results.push(SearchResult::from_node(
                        &node,
                        RetrievalOrigin::Keyword,
                        None,
                    ));
                }
            }
            Err(e) => warn!(error = %e, term = %term, "keyword supplement failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{Language, QueryStrategy};
    use crate::config::HydeConfig;
    use crate::graph::memory::MemoryGraph;
    use crate::graph::types::{GraphNode, NodeLabel};
    use crate::llm::mock::MockProvider;

    fn analysis() -> QueryAnalysis {
        QueryAnalysis {
            strategy: QueryStrategy::Semantic,
            entity_hints: Vec::new(),
            relation_hints: Vec::new(),
            matched_pattern: None,
            language: Language::English,
        }
    }

    async fn store_with_docs() -> Arc<MemoryGraph> {
        let graph = Arc::new(MemoryGraph::new());
        let embed = |text: &str| serde_json::json!(MockProvider::embedding_for(text));
        let docs = vec![
            GraphNode::new("d-migration", NodeLabel::Document)
                .with_property("title", "Migration Plan")
                .with_property("content", "database migration schedule and owners")
                .with_property("embedding", embed("database migration schedule and owners")),
            GraphNode::new("d-picnic", NodeLabel::Document)
                .with_property("title", "Team Picnic")
                .with_property("content", "snacks and games in the park")
                .with_property("embedding", embed("snacks and games in the park")),
        ];
        graph.create_nodes(&NodeLabel::Document, &docs).await.unwrap();
        graph
    }

    fn searcher(provider: Arc<MockProvider>, store: Arc<MemoryGraph>) -> SemanticSearcher {
        let hyde = HydeExpander::new(provider.clone(), HydeConfig::default());
        SemanticSearcher::new(provider, store, hyde, RetrievalConfig::default())
    }

    #[tokio::test]
    async fn test_vector_search_ranks_relevant_documents_first() {
        let provider = Arc::new(MockProvider::new());
        // Hypothetical documents reinforce the migration vocabulary.
        provider.push_text("The database migration is scheduled for June.");
        provider.push_text("Owners are listed in the migration plan.");
        provider.push_text("The migration schedule has three phases.");
        let searcher = searcher(provider, store_with_docs().await);

        let results = searcher.search("when is the database migration", &analysis()).await;

        assert!(!results.is_empty());
        assert_eq!(results[0].payload["id"], "d-migration");
        assert_eq!(results[0].origin, RetrievalOrigin::Semantic);
        assert!(results[0].score.is_some());
    }

    #[tokio::test]
    async fn test_thin_results_get_keyword_supplement() {
        let provider = Arc::new(MockProvider::new());
        let searcher = searcher(provider, store_with_docs().await);

        // Two documents total, keyword floor is five: both routes run and
        // overlapping hits are deduplicated by node id.
        let results = searcher.search("when is the database migration", &analysis()).await;
        let migration_hits = results
            .iter()
            .filter(|r| r.payload["id"] == "d-migration")
            .count();
        assert_eq!(migration_hits, 1);
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades_to_keywords() {
        let provider = Arc::new(MockProvider::new());
        provider.fail_embedding(true);
        let searcher = searcher(provider, store_with_docs().await);

        let results = searcher.search("when is the database migration", &analysis()).await;

        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.origin == RetrievalOrigin::Keyword));
    }

    #[tokio::test]
    async fn test_double_failure_yields_empty_list() {
        let provider = Arc::new(MockProvider::new());
        provider.fail_generation(true);
        provider.fail_embedding(true);
        let store = store_with_docs().await;
        store.set_connected(false);
        let searcher = searcher(provider, store);

        let results = searcher.search("when is the database migration", &analysis()).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_expansion_failure_does_not_block_retrieval() {
        let provider = Arc::new(MockProvider::new());
        provider.fail_generation(true);
        let searcher = searcher(provider, store_with_docs().await);

        let results = searcher.search("when is the database migration", &analysis()).await;
        assert!(results.iter().any(|r| r.origin == RetrievalOrigin::Semantic));
    }
}
