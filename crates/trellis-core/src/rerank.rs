//! Result fusion and reranking
//!
//! Three stages compose the hybrid pipeline:
//! 1. reciprocal rank fusion merges the per-strategy lists without
//!    comparing their incomparable native scores
//! 2. an LLM cross-encoder scores a bounded candidate pool against the
//!    question, with a neutral score standing in wherever the model's
//!    output cannot be parsed
//! 3. cheap heuristics boost type agreement and literal term overlap
//!
//! A formatting or transport failure in stage 2 must never discard
//! evidence; it only flattens the ordering back toward the fused one.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::classify::QueryAnalysis;
use crate::config::RetrievalConfig;
use crate::graph::types::NodeLabel;
use crate::llm::parse::from_model_output;
use crate::llm::provider::Provider;
use crate::llm::types::GenerationRequest;
use crate::search::{truncate_chars, SearchResult};

/// Score assigned when the cross-encoder cannot produce one.
const NEUTRAL_SCORE: f32 = 0.5;

const CROSS_ENCODE_MAX_TOKENS: usize = 256;

const CROSS_ENCODE_SYSTEM_PROMPT: &str = "You judge how relevant each candidate passage is \
to a question. Respond with a JSON array of numbers between 0.0 and 1.0, one per candidate, \
in candidate order. No other text.";

/// Merge ranked lists by reciprocal rank: each occurrence of an item
/// contributes `1 / (k + rank + 1)`. Items are recognized across lists
/// by their dedup key; the first-seen occurrence supplies the payload.
pub fn rrf_fuse(lists: &[Vec<SearchResult>], k: f32) -> Vec<SearchResult> {
    let mut order: Vec<String> = Vec::new();
    let mut first_seen: HashMap<String, SearchResult> = HashMap::new();
    let mut scores: HashMap<String, f32> = HashMap::new();

    for list in lists {
        for (rank, result) in list.iter().enumerate() {
            let key = result.dedup_key();
            *scores.entry(key.clone()).or_insert(0.0) += 1.0 / (k + rank as f32 + 1.0);
            if !first_seen.contains_key(&key) {
                order.push(key.clone());
                first_seen.insert(key, result.clone());
            }
        }
    }

    let mut fused: Vec<SearchResult> = Vec::with_capacity(order.len());
    for key in order {
        if let Some(mut result) = first_seen.remove(&key) {
            result.score = scores.get(&key).copied();
            fused.push(result);
        }
    }

    // Stable sort keeps first-seen order among ties.
    fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    fused
}

/// Cross-encoding and boosting over fused results.
pub struct Reranker {
    provider: Arc<dyn Provider>,
    config: RetrievalConfig,
}

impl Reranker {
    pub fn new(provider: Arc<dyn Provider>, config: RetrievalConfig) -> Self {
        Self { provider, config }
    }

    /// Full hybrid pipeline: fuse, cross-encode the top `2 * top_k`
    /// candidates only, boost, and cut to `top_k`.
    pub async fn rerank_hybrid(
        &self,
        question: &str,
        analysis: &QueryAnalysis,
        lists: &[Vec<SearchResult>],
        top_k: usize,
    ) -> Vec<SearchResult> {
        let fused = rrf_fuse(lists, self.config.rrf_k);
        let pool_size = top_k.saturating_mul(self.config.cross_encode_factor).max(top_k);
        let pool: Vec<SearchResult> = fused.into_iter().take(pool_size).collect();
        debug!(candidates = pool.len(), "cross-encoding candidate pool");

        let mut scored = self.cross_encode(question, pool).await;
        self.boost(question, analysis, &mut scored);

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }

    /// Score each candidate against the question with the model. Any
    /// candidate the model fails to score, and the whole batch on a
    /// transport failure, gets the neutral score instead of being
    /// dropped.
    pub async fn cross_encode(
        &self,
        question: &str,
        results: Vec<SearchResult>,
    ) -> Vec<SearchResult> {
        if results.is_empty() {
            return results;
        }

        let mut candidates = String::new();
        for (index, result) in results.iter().enumerate() {
            candidates.push_str(&format!(
                "{}. {}\n",
                index + 1,
                truncate_chars(&result.content, 300)
            ));
        }
        let prompt = format!(
            "Question: {question}\n\nCandidates:\n{candidates}\nScore all {} candidates.",
            results.len()
        );
        let request = GenerationRequest::new(prompt)
            .with_system(CROSS_ENCODE_SYSTEM_PROMPT)
            .with_temperature(0.0)
            .with_max_tokens(CROSS_ENCODE_MAX_TOKENS);

        let parsed: Vec<Option<f32>> = match self.provider.generate(request).await {
            Ok(generated) => match from_model_output::<Vec<serde_json::Value>>(&generated.text) {
                Some(values) => values.iter().map(|v| v.as_f64().map(|f| f as f32)).collect(),
                None => {
                    warn!("cross-encoder output unparseable, scoring batch neutral");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(error = %e, "cross-encoder call failed, scoring batch neutral");
                Vec::new()
            }
        };

        results
            .into_iter()
            .enumerate()
            .map(|(index, mut result)| {
                let score = parsed
                    .get(index)
                    .copied()
                    .flatten()
                    .map(|s| s.clamp(0.0, 1.0))
                    .unwrap_or(NEUTRAL_SCORE);
                result.score = Some(score);
                result
            })
            .collect()
    }

    /// Multiply scores by intent/type agreement and literal overlap with
    /// the question's terms.
    pub fn boost(&self, question: &str, analysis: &QueryAnalysis, results: &mut [SearchResult]) {
        let ql = question.to_lowercase();
        let terms: Vec<String> = ql
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
            .filter(|t| t.chars().count() >= 4)
            .collect();

        for result in results.iter_mut() {
            let mut factor = type_agreement_factor(&ql, &result.kind);

            if !terms.is_empty() {
                let content = result.content.to_lowercase();
                let hits = terms.iter().filter(|t| content.contains(t.as_str())).count();
                factor *= 1.0 + 0.2 * (hits as f32 / terms.len() as f32);
            }

            if let Some(hint) = analysis.entity_hints.first()
                && result.content.to_lowercase().contains(&hint.to_lowercase())
            {
                factor *= 1.1;
            }

            result.score = Some(result.score.unwrap_or(NEUTRAL_SCORE) * factor);
        }
    }
}

/// Who-questions want people, risk-questions want risks, and so on.
fn type_agreement_factor(ql: &str, kind: &NodeLabel) -> f32 {
    match kind {
        NodeLabel::Person if ql.contains("who") || ql.contains("wer ") => 1.3,
        NodeLabel::Risk if ql.contains("risk") || ql.contains("risik") => 1.2,
        NodeLabel::Task if ql.contains("task") || ql.contains("aufgabe") => 1.2,
        NodeLabel::Decision if ql.contains("decision") || ql.contains("entscheidung") => 1.2,
        NodeLabel::Document if ql.contains("document") || ql.contains("dokument") => 1.15,
        _ => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{Language, QueryStrategy};
    use crate::llm::mock::MockProvider;
    use crate::search::RetrievalOrigin;

    fn result(id: &str, kind: NodeLabel, content: &str) -> SearchResult {
        SearchResult {
            kind,
            content: content.to_string(),
            payload: serde_json::json!({ "id": id }),
            origin: RetrievalOrigin::Structural,
            score: None,
        }
    }

    fn analysis() -> QueryAnalysis {
        QueryAnalysis {
            strategy: QueryStrategy::Hybrid,
            entity_hints: Vec::new(),
            relation_hints: Vec::new(),
            matched_pattern: None,
            language: Language::English,
        }
    }

    #[test]
    fn test_rrf_rewards_presence_in_more_lists() {
        let everywhere = result("x", NodeLabel::Document, "appears in every list");
        let once = result("y", NodeLabel::Document, "appears once");

        let lists = vec![
            vec![everywhere.clone(), once.clone()],
            vec![everywhere.clone()],
            vec![everywhere.clone()],
        ];
        let fused = rrf_fuse(&lists, 60.0);

        assert_eq!(fused[0].payload["id"], "x");
        assert!(fused[0].score.unwrap() > fused[1].score.unwrap());
    }

    #[test]
    fn test_rrf_score_formula() {
        let lists = vec![vec![result("a", NodeLabel::Document, "only entry")]];
        let fused = rrf_fuse(&lists, 60.0);
        // rank 0 in one list: 1 / (60 + 0 + 1)
        assert!((fused[0].score.unwrap() - 1.0 / 61.0).abs() < 1e-6);
    }

    #[test]
    fn test_rrf_keeps_first_seen_payload() {
        let mut from_structural = result("z", NodeLabel::Task, "task row");
        from_structural.origin = RetrievalOrigin::Structural;
        let mut from_semantic = result("z", NodeLabel::Task, "task row");
        from_semantic.origin = RetrievalOrigin::Semantic;

        let fused = rrf_fuse(&[vec![from_structural], vec![from_semantic]], 60.0);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].origin, RetrievalOrigin::Structural);
    }

    #[tokio::test]
    async fn test_cross_encode_applies_model_scores() {
        let provider = Arc::new(MockProvider::new());
        provider.push_text("[0.9, 0.2, 1.7]");
        let reranker = Reranker::new(provider, RetrievalConfig::default());

        let scored = reranker
            .cross_encode(
                "question",
                vec![
                    result("a", NodeLabel::Document, "first"),
                    result("b", NodeLabel::Document, "second"),
                    result("c", NodeLabel::Document, "third"),
                ],
            )
            .await;

        assert_eq!(scored[0].score, Some(0.9));
        assert_eq!(scored[1].score, Some(0.2));
        // Out-of-range score clamped.
        assert_eq!(scored[2].score, Some(1.0));
    }

    #[tokio::test]
    async fn test_unparseable_scores_are_neutral_and_keep_the_batch() {
        let provider = Arc::new(MockProvider::new());
        provider.push_text("I think the first one is best!");
        let reranker = Reranker::new(provider, RetrievalConfig::default());

        let scored = reranker
            .cross_encode(
                "question",
                vec![
                    result("a", NodeLabel::Document, "first"),
                    result("b", NodeLabel::Document, "second"),
                ],
            )
            .await;

        assert_eq!(scored.len(), 2);
        assert!(scored.iter().all(|r| r.score == Some(NEUTRAL_SCORE)));
    }

    #[tokio::test]
    async fn test_transport_failure_scores_neutral() {
        let provider = Arc::new(MockProvider::new());
        provider.fail_generation(true);
        let reranker = Reranker::new(provider, RetrievalConfig::default());

        let scored = reranker
            .cross_encode("question", vec![result("a", NodeLabel::Document, "first")])
            .await;
        assert_eq!(scored[0].score, Some(NEUTRAL_SCORE));
    }

    #[tokio::test]
    async fn test_partial_score_array_pads_with_neutral() {
        let provider = Arc::new(MockProvider::new());
        provider.push_text("[0.8]");
        let reranker = Reranker::new(provider, RetrievalConfig::default());

        let scored = reranker
            .cross_encode(
                "question",
                vec![
                    result("a", NodeLabel::Document, "first"),
                    result("b", NodeLabel::Document, "second"),
                ],
            )
            .await;
        assert_eq!(scored[0].score, Some(0.8));
        assert_eq!(scored[1].score, Some(NEUTRAL_SCORE));
    }

    #[test]
    fn test_boost_prefers_people_for_who_questions() {
        let provider = Arc::new(MockProvider::new());
        let reranker = Reranker::new(provider, RetrievalConfig::default());

        let mut results = vec![
            result("doc", NodeLabel::Document, "the plan"),
            result("person", NodeLabel::Person, "Ada Lovelace"),
        ];
        for r in results.iter_mut() {
            r.score = Some(0.5);
        }

        reranker.boost("who is responsible?", &analysis(), &mut results);
        assert!(results[1].score.unwrap() > results[0].score.unwrap());
    }

    #[tokio::test]
    async fn test_hybrid_bounds_the_cross_encoded_pool() {
        let provider = Arc::new(MockProvider::new());
        provider.push_text("[0.9, 0.8, 0.7, 0.6]");
        let config = RetrievalConfig {
            top_k: 2,
            cross_encode_factor: 2,
            ..RetrievalConfig::default()
        };
        let reranker = Reranker::new(provider.clone(), config);

        let list: Vec<SearchResult> = (0..6)
            .map(|i| result(&format!("r{i}"), NodeLabel::Document, &format!("candidate {i}")))
            .collect();
        let top = reranker
            .rerank_hybrid("question", &analysis(), &[list], 2)
            .await;

        assert_eq!(top.len(), 2);
        let prompt = &provider.requests()[0].prompt;
        assert!(prompt.contains("4. candidate 3"));
        assert!(!prompt.contains("5. candidate 4"));
    }
}
