//! Response synthesis
//!
//! Turns ranked, source-tagged evidence into a cited natural-language
//! answer. Every failure path still produces an [`Answer`]: empty
//! evidence yields an explicit no-information response and a generation
//! failure falls back to an extractive summary of the top evidence.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classify::QueryStrategy;
use crate::llm::provider::Provider;
use crate::llm::types::GenerationRequest;
use crate::search::{truncate_chars, RetrievalOrigin, SearchResult};

/// Returned when no strategy produced any evidence.
pub const NO_INFORMATION_ANSWER: &str =
    "No relevant information was found for this question in the project graph.";

const MAX_EVIDENCE: usize = 8;
const EVIDENCE_SNIPPET_CHARS: usize = 300;
const SYNTHESIS_MAX_TOKENS: usize = 700;

const SYNTHESIS_SYSTEM_PROMPT: &str = "You answer questions about a project knowledge graph. \
Use only the numbered evidence provided. Cite evidence inline as [1], [2] and so on. \
If the evidence does not answer the question, say so plainly.";

/// One numbered evidence source backing an answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// 1-based index matching the `[n]` markers in the answer text.
    pub index: usize,
    /// Short human-readable label for the source.
    pub label: String,
    /// Graph node id when the evidence maps to one.
    pub node_id: Option<String>,
    /// Which retrieval strategy produced the evidence.
    pub origin: RetrievalOrigin,
}

/// Final answer handed back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
    pub confidence: f32,
    pub strategy: QueryStrategy,
}

impl Answer {
    /// Answer for a question with no usable evidence.
    pub fn no_information(strategy: QueryStrategy) -> Self {
        Self {
            text: NO_INFORMATION_ANSWER.to_string(),
            citations: Vec::new(),
            confidence: 0.0,
            strategy,
        }
    }
}

/// Builds cited answers from retrieval evidence.
pub struct Synthesizer {
    provider: Arc<dyn Provider>,
}

impl Synthesizer {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    /// Produce an answer from ranked evidence. Infallible: empty
    /// evidence and generation failures both degrade to canned forms.
    pub async fn synthesize(
        &self,
        question: &str,
        evidence: &[SearchResult],
        strategy: QueryStrategy,
    ) -> Answer {
        if evidence.is_empty() {
            debug!("no evidence to synthesize from");
            return Answer::no_information(strategy);
        }

        let cited: Vec<&SearchResult> = evidence.iter().take(MAX_EVIDENCE).collect();
        let citations: Vec<Citation> = cited
            .iter()
            .enumerate()
            .map(|(i, result)| Citation {
                index: i + 1,
                label: citation_label(result),
                node_id: result
                    .payload
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                origin: result.origin,
            })
            .collect();

        let mut block = String::new();
        for (i, result) in cited.iter().enumerate() {
            block.push_str(&format!(
                "[{}] ({}) {}\n",
                i + 1,
                result.origin,
                truncate_chars(&result.content, EVIDENCE_SNIPPET_CHARS)
            ));
        }
        let prompt = format!("Question: {question}\n\nEvidence:\n{block}\nAnswer the question.");
        let request = GenerationRequest::new(prompt)
            .with_system(SYNTHESIS_SYSTEM_PROMPT)
            .with_temperature(0.2)
            .with_max_tokens(SYNTHESIS_MAX_TOKENS);

        match self.provider.generate(request).await {
            Ok(generated) if !generated.text.trim().is_empty() => {
                let text = generated.text.trim().to_string();
                let confidence = if has_citation_marker(&text, citations.len()) {
                    0.8
                } else {
                    0.6
                };
                Answer { text, citations, confidence, strategy }
            }
            Ok(_) => {
                warn!("synthesis returned empty text, using extractive fallback");
                extractive_answer(&cited, citations, strategy)
            }
            Err(e) => {
                warn!(error = %e, "synthesis failed, using extractive fallback");
                extractive_answer(&cited, citations, strategy)
            }
        }
    }
}

/// Canned preamble plus the top evidence lines, still cited.
fn extractive_answer(
    cited: &[&SearchResult],
    citations: Vec<Citation>,
    strategy: QueryStrategy,
) -> Answer {
    let mut text = String::from("Based on the retrieved information:\n");
    for (i, result) in cited.iter().take(3).enumerate() {
        text.push_str(&format!(
            "- {} [{}]\n",
            truncate_chars(&result.content, 200),
            i + 1
        ));
    }
    Answer { text, citations, confidence: 0.4, strategy }
}

/// Whether the text references at least one of the numbered sources.
fn has_citation_marker(text: &str, sources: usize) -> bool {
    (1..=sources).any(|i| text.contains(&format!("[{i}]")))
}

fn citation_label(result: &SearchResult) -> String {
    for field in ["name", "title", "subject", "sub_question"] {
        if let Some(value) = result.payload.get(field).and_then(|v| v.as_str()) {
            return value.to_string();
        }
    }
    truncate_chars(&result.content, 60).to_string()
}
