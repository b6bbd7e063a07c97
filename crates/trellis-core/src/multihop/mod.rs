//! Multi-hop reasoning over decomposed questions
//!
//! Complex questions are decomposed by the LLM into a small DAG of
//! sub-questions with integer dependency references. Sub-questions run
//! through the standard retrieval pipeline in topological order; each
//! one's evidence is summarized and the summary is appended as context
//! to the sub-questions that depend on it. A final synthesis pass merges
//! the sub-summaries into one cited answer.
//!
//! Dependency cycles are broken, not rejected: reaching an in-progress
//! node again skips that edge with a warning and the skipped ids are
//! surfaced on the report.

pub mod iterative;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classify::QueryAnalysis;
use crate::config::MultiHopConfig;
use crate::graph::types::NodeLabel;
use crate::llm::parse::from_model_output;
use crate::llm::provider::Provider;
use crate::llm::types::GenerationRequest;
use crate::search::{truncate_chars, RetrievalOrigin, SearchResult};
use crate::synthesize::{Answer, Synthesizer};

const DECOMPOSE_MAX_TOKENS: usize = 600;
const SUMMARY_MAX_TOKENS: usize = 150;
const SUMMARY_EVIDENCE_LINES: usize = 4;

const DECOMPOSE_SYSTEM_PROMPT: &str = "You split a complex question about a project \
knowledge graph into smaller sub-questions. Respond with a JSON array of objects \
{\"id\": number, \"text\": string, \"kind\": string, \"depends_on\": [numbers]}. \
Kinds: lookup, relationship, comparison, aggregation. A sub-question lists another \
sub-question's id in depends_on when it needs that answer first. No other text.";

/// Runs a question through the retrieval pipeline. Implemented by the
/// engine and injected per call so the reasoner stays engine-agnostic.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, question: &str) -> Vec<SearchResult>;
}

/// Declared type of a sub-question, as labeled by the decomposition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SubQueryKind {
    Lookup,
    Relationship,
    Comparison,
    Aggregation,
    Other(String),
}

impl SubQueryKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Lookup => "lookup",
            Self::Relationship => "relationship",
            Self::Comparison => "comparison",
            Self::Aggregation => "aggregation",
            Self::Other(s) => s,
        }
    }
}

impl Default for SubQueryKind {
    fn default() -> Self {
        Self::Lookup
    }
}

impl From<String> for SubQueryKind {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "lookup" | "factual" => Self::Lookup,
            "relationship" | "relational" => Self::Relationship,
            "comparison" | "compare" => Self::Comparison,
            "aggregation" | "count" => Self::Aggregation,
            _ => Self::Other(s),
        }
    }
}

impl From<SubQueryKind> for String {
    fn from(kind: SubQueryKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for SubQueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node in the decomposition DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubQuery {
    pub id: u32,
    #[serde(alias = "question")]
    pub text: String,
    #[serde(default)]
    pub kind: SubQueryKind,
    #[serde(default, alias = "dependencies")]
    pub depends_on: Vec<u32>,
}

/// Resolved sub-question with its evidence summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubSummary {
    pub id: u32,
    pub question: String,
    pub summary: String,
}

/// Outcome of a multi-hop run.
#[derive(Debug, Clone)]
pub struct MultiHopReport {
    pub answer: Answer,
    pub sub_summaries: Vec<SubSummary>,
    /// Dependency ids skipped because following them would close a cycle.
    pub skipped: Vec<u32>,
}

/// Cheap bilingual check for whether a question warrants decomposition,
/// saving the decomposition call on simple questions.
pub fn is_complex(question: &str) -> bool {
    const CONNECTIVES: &[&str] = &[
        " and ", " then ", " after ", " before ", " because ", " und ", " dann ", " nachdem ",
        " bevor ", " weil ",
    ];
    const COMPARISON_CUES: &[&str] = &[
        "compare",
        "difference between",
        "versus",
        " vs ",
        "relationship between",
        "how does",
        "how do",
        "unterschied",
        "vergleich",
        "beziehung zwischen",
        "wie hängt",
        "wie haengt",
    ];

    let ql = question.to_lowercase();
    if ql.matches('?').count() > 1 {
        return true;
    }
    if COMPARISON_CUES.iter().any(|cue| ql.contains(cue)) {
        return true;
    }
    ql.split_whitespace().count() > 12 && CONNECTIVES.iter().any(|c| ql.contains(c))
}

/// Decomposes complex questions and reasons over the sub-question DAG.
pub struct MultiHopReasoner {
    provider: Arc<dyn Provider>,
    synthesizer: Arc<Synthesizer>,
    config: MultiHopConfig,
}

impl MultiHopReasoner {
    pub fn new(
        provider: Arc<dyn Provider>,
        synthesizer: Arc<Synthesizer>,
        config: MultiHopConfig,
    ) -> Self {
        Self { provider, synthesizer, config }
    }

    /// Answer a complex question by decomposition. A failed or malformed
    /// decomposition falls back to a single-question retrieval pass.
    pub async fn answer(
        &self,
        question: &str,
        analysis: &QueryAnalysis,
        retriever: &dyn Retriever,
    ) -> MultiHopReport {
        let Some(subs) = self.decompose(question).await else {
            debug!("decomposition unavailable, answering as a single question");
            let results = retriever.retrieve(question).await;
            let answer = self
                .synthesizer
                .synthesize(question, &results, analysis.strategy)
                .await;
            return MultiHopReport { answer, sub_summaries: Vec::new(), skipped: Vec::new() };
        };

        let (order, skipped) = execution_order(&subs);
        debug!(sub_questions = subs.len(), ?order, "executing decomposition");

        let by_id: HashMap<u32, &SubQuery> = subs.iter().map(|s| (s.id, s)).collect();
        let mut summaries: HashMap<u32, String> = HashMap::new();
        let mut sub_summaries = Vec::with_capacity(order.len());

        for id in order {
            let Some(sub) = by_id.get(&id) else { continue };

            let context: Vec<&str> = sub
                .depends_on
                .iter()
                .filter_map(|dep| summaries.get(dep).map(String::as_str))
                .collect();
            let prompt = if context.is_empty() {
                sub.text.clone()
            } else {
                format!("{}\n\nKnown from earlier steps:\n- {}", sub.text, context.join("\n- "))
            };

            let results = retriever.retrieve(&prompt).await;
            let summary = self.summarize(&sub.text, &results).await;
            summaries.insert(id, summary.clone());
            sub_summaries.push(SubSummary { id, question: sub.text.clone(), summary });
        }

        let evidence: Vec<SearchResult> = sub_summaries
            .iter()
            .map(|s| SearchResult {
                kind: NodeLabel::Unknown("Summary".to_string()),
                content: format!("{}: {}", s.question, s.summary),
                payload: serde_json::json!({ "sub_question": s.question, "summary": s.summary }),
                origin: RetrievalOrigin::Reasoning,
                score: None,
            })
            .collect();
        let answer = self
            .synthesizer
            .synthesize(question, &evidence, analysis.strategy)
            .await;

        MultiHopReport { answer, sub_summaries, skipped }
    }

    /// Ask the model for a decomposition; `None` when the call fails or
    /// nothing usable comes back.
    async fn decompose(&self, question: &str) -> Option<Vec<SubQuery>> {
        let prompt = format!(
            "Question: {question}\n\nSplit into at most {} sub-questions.",
            self.config.max_sub_questions
        );
        let request = GenerationRequest::new(prompt)
            .with_system(DECOMPOSE_SYSTEM_PROMPT)
            .with_temperature(0.1)
            .with_max_tokens(DECOMPOSE_MAX_TOKENS);

        let generated = match self.provider.generate(request).await {
            Ok(g) => g,
            Err(e) => {
                warn!(error = %e, "decomposition call failed");
                return None;
            }
        };

        let subs = from_model_output::<Vec<SubQuery>>(&generated.text)?;
        let subs = self.sanitize(subs);
        if subs.is_empty() { None } else { Some(subs) }
    }

    /// Drop empty or duplicate sub-questions, cap the count, and strip
    /// dependency references that point outside the kept set.
    fn sanitize(&self, subs: Vec<SubQuery>) -> Vec<SubQuery> {
        let mut seen = HashSet::new();
        let mut kept: Vec<SubQuery> = subs
            .into_iter()
            .filter(|s| !s.text.trim().is_empty() && seen.insert(s.id))
            .take(self.config.max_sub_questions)
            .collect();

        let ids: HashSet<u32> = kept.iter().map(|s| s.id).collect();
        for sub in kept.iter_mut() {
            let own = sub.id;
            sub.depends_on.retain(|dep| *dep != own && ids.contains(dep));
        }
        kept
    }

    /// Summarize a sub-question's evidence in a sentence or two. Falls
    /// back to the first result's content when generation fails.
    async fn summarize(&self, question: &str, results: &[SearchResult]) -> String {
        if results.is_empty() {
            return "No supporting information was found.".to_string();
        }

        let mut evidence = String::new();
        for result in results.iter().take(SUMMARY_EVIDENCE_LINES) {
            evidence.push_str(&format!("- {}\n", truncate_chars(&result.content, 200)));
        }
        let prompt = format!(
            "Summarize in one or two sentences what this evidence says about the question.\n\
             Question: {question}\nEvidence:\n{evidence}"
        );
        let request = GenerationRequest::new(prompt)
            .with_temperature(0.2)
            .with_max_tokens(SUMMARY_MAX_TOKENS);

        match self.provider.generate(request).await {
            Ok(g) if !g.text.trim().is_empty() => g.text.trim().to_string(),
            Ok(_) | Err(_) => {
                warn!("sub-question summary failed, using first evidence line");
                truncate_chars(&results[0].content, 200).to_string()
            }
        }
    }
}

/// Topological order over the sub-question DAG. Cycles are broken by
/// skipping the edge back into an in-progress node; the skipped target
/// ids are returned alongside the order.
fn execution_order(subs: &[SubQuery]) -> (Vec<u32>, Vec<u32>) {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    fn visit(
        i: usize,
        subs: &[SubQuery],
        index: &HashMap<u32, usize>,
        marks: &mut [Mark],
        order: &mut Vec<u32>,
        skipped: &mut Vec<u32>,
    ) {
        marks[i] = Mark::InProgress;
        for dep in &subs[i].depends_on {
            match index.get(dep) {
                Some(&j) => match marks[j] {
                    Mark::Done => {}
                    Mark::InProgress => {
                        warn!(sub = subs[i].id, dependency = *dep, "dependency cycle, skipping edge");
                        skipped.push(*dep);
                    }
                    Mark::Unvisited => visit(j, subs, index, marks, order, skipped),
                },
                None => {
                    warn!(sub = subs[i].id, dependency = *dep, "dependency id not in decomposition");
                }
            }
        }
        marks[i] = Mark::Done;
        order.push(subs[i].id);
    }

    let index: HashMap<u32, usize> = subs.iter().enumerate().map(|(i, s)| (s.id, i)).collect();
    let mut marks = vec![Mark::Unvisited; subs.len()];
    let mut order = Vec::with_capacity(subs.len());
    let mut skipped = Vec::new();

    for i in 0..subs.len() {
        if marks[i] == Mark::Unvisited {
            visit(i, subs, &index, &mut marks, &mut order, &mut skipped);
        }
    }

    skipped.sort_unstable();
    skipped.dedup();
    (order, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::classify::{Language, QueryStrategy};
    use crate::llm::mock::MockProvider;

    struct RecordingRetriever {
        questions: Mutex<Vec<String>>,
        canned: Vec<SearchResult>,
    }

    impl RecordingRetriever {
        fn new(canned: Vec<SearchResult>) -> Self {
            Self { questions: Mutex::new(Vec::new()), canned }
        }

        fn questions(&self) -> Vec<String> {
            self.questions.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Retriever for RecordingRetriever {
        async fn retrieve(&self, question: &str) -> Vec<SearchResult> {
            self.questions.lock().unwrap().push(question.to_string());
            self.canned.clone()
        }
    }

    fn canned_result(content: &str) -> SearchResult {
        SearchResult {
            kind: NodeLabel::Person,
            content: content.to_string(),
            payload: serde_json::json!({ "id": "p1" }),
            origin: RetrievalOrigin::Structural,
            score: Some(0.9),
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

    fn reasoner(provider: Arc<MockProvider>) -> MultiHopReasoner {
        let synthesizer = Arc::new(Synthesizer::new(provider.clone()));
        MultiHopReasoner::new(provider, synthesizer, MultiHopConfig::default())
    }

    fn sub(id: u32, depends_on: Vec<u32>) -> SubQuery {
        SubQuery {
            id,
            text: format!("sub {id}"),
            kind: SubQueryKind::Lookup,
            depends_on,
        }
    }

    #[test]
    fn test_simple_questions_are_not_complex() {
        assert!(!is_complex("Who is the project lead?"));
        assert!(!is_complex("Wie viele Risiken gibt es?"));
    }

    #[test]
    fn test_complexity_cues() {
        assert!(is_complex("Who owns the API? And when is it due?"));
        assert!(is_complex("What is the difference between the two migration plans?"));
        assert!(is_complex(
            "Which tasks are assigned to the platform team and which of them are blocked because of the database migration?"
        ));
    }

    #[test]
    fn test_execution_order_respects_dependencies() {
        let subs = vec![sub(3, vec![2]), sub(1, vec![]), sub(2, vec![1])];
        let (order, skipped) = execution_order(&subs);
        assert_eq!(order, vec![1, 2, 3]);
        assert!(skipped.is_empty());
    }

    #[test]
    fn test_cycles_are_skipped_not_fatal() {
        let subs = vec![sub(1, vec![2]), sub(2, vec![1])];
        let (order, skipped) = execution_order(&subs);
        assert_eq!(order.len(), 2);
        assert_eq!(skipped, vec![1]);
    }

    #[test]
    fn test_sub_query_parses_model_shapes() {
        let parsed: Vec<SubQuery> = serde_json::from_str(
            r#"[{"id": 1, "question": "who leads?", "kind": "factual"},
                {"id": 2, "text": "what do they own?", "kind": "weird", "dependencies": [1]}]"#,
        )
        .unwrap();
        assert_eq!(parsed[0].text, "who leads?");
        assert_eq!(parsed[0].kind, SubQueryKind::Lookup);
        assert!(parsed[0].depends_on.is_empty());
        assert_eq!(parsed[1].kind, SubQueryKind::Other("weird".to_string()));
        assert_eq!(parsed[1].depends_on, vec![1]);
    }

    #[tokio::test]
    async fn test_dependency_summary_flows_into_dependent_retrieval() {
        let provider = Arc::new(MockProvider::new());
        provider.push_text(
            r#"[{"id": 1, "text": "Who leads the project?", "depends_on": []},
                {"id": 2, "text": "What does the lead own?", "depends_on": [1]}]"#,
        );
        provider.push_text("Grace Hopper leads the project.");
        provider.push_text("The lead owns the compiler initiative.");
        provider.push_text("Grace Hopper owns the compiler initiative [1][2].");

        let retriever = RecordingRetriever::new(vec![canned_result("Grace Hopper, lead")]);
        let report = reasoner(provider)
            .answer("Who leads the project and what do they own?", &analysis(), &retriever)
            .await;

        let questions = retriever.questions();
        assert_eq!(questions.len(), 2);
        assert!(questions[0].starts_with("Who leads the project?"));
        assert!(questions[1].contains("Grace Hopper leads the project."));

        assert_eq!(report.sub_summaries.len(), 2);
        assert_eq!(report.sub_summaries[0].summary, "Grace Hopper leads the project.");
        assert!(report.skipped.is_empty());
        assert!(report.answer.text.contains("compiler initiative"));
    }

    #[tokio::test]
    async fn test_malformed_decomposition_falls_back_to_single_pass() {
        let provider = Arc::new(MockProvider::new());
        provider.push_text("sorry, I cannot split this");
        provider.push_text("Here is what I found [1].");

        let retriever = RecordingRetriever::new(vec![canned_result("some evidence")]);
        let report = reasoner(provider)
            .answer("Compare the plans and their owners", &analysis(), &retriever)
            .await;

        assert_eq!(retriever.questions(), vec!["Compare the plans and their owners"]);
        assert!(report.sub_summaries.is_empty());
        assert!(report.answer.text.contains("[1]"));
    }

    #[tokio::test]
    async fn test_decomposition_is_capped() {
        let provider = Arc::new(MockProvider::new());
        let many: Vec<serde_json::Value> = (1..=8)
            .map(|i| serde_json::json!({ "id": i, "text": format!("sub {i}") }))
            .collect();
        provider.push_text(serde_json::to_string(&many).unwrap());
        // Summaries for the capped set plus the final synthesis.
        for _ in 0..6 {
            provider.push_text("a summary");
        }

        let config = MultiHopConfig { max_sub_questions: 3, ..MultiHopConfig::default() };
        let synthesizer = Arc::new(Synthesizer::new(provider.clone()));
        let reasoner = MultiHopReasoner::new(provider, synthesizer, config);

        let retriever = RecordingRetriever::new(vec![canned_result("evidence")]);
        let report = reasoner
            .answer("a very long compound question", &analysis(), &retriever)
            .await;

        assert_eq!(retriever.questions().len(), 3);
        assert_eq!(report.sub_summaries.len(), 3);
    }

    #[tokio::test]
    async fn test_summary_failure_falls_back_to_evidence_line() {
        let provider = Arc::new(MockProvider::new());
        provider.push_text(r#"[{"id": 1, "text": "Who leads?"}]"#);
        provider.push_error(crate::error::Error::Provider("overloaded".to_string()));
        provider.push_text("final answer [1]");

        let retriever = RecordingRetriever::new(vec![canned_result("Grace Hopper leads the team")]);
        let report = reasoner(provider)
            .answer("Compare who leads versus who owns", &analysis(), &retriever)
            .await;

        assert_eq!(report.sub_summaries.len(), 1);
        assert!(report.sub_summaries[0].summary.contains("Grace Hopper leads the team"));
    }
}
