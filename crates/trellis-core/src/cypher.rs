//! Natural-language to graph-query generation
//!
//! Three routes, first success wins:
//! 1. registered ontology patterns (deterministic, confidence 0.95)
//! 2. LLM generation against the live schema (near-zero temperature)
//! 3. deterministic fallback templates (confidence well below the rest)
//!
//! A transport failure or unparseable model output demotes to the next
//! route; callers always get a usable query. Results are cached for half
//! an hour keyed by the normalized question, fallback results included,
//! so a dead-end LLM call is not paid twice.

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::classify::QueryAnalysis;
use crate::config::CypherConfig;
use crate::error::{Error, Result};
use crate::graph::store::GraphStore;
use crate::graph::types::NodeLabel;
use crate::llm::parse::from_model_output;
use crate::llm::provider::Provider;
use crate::llm::types::GenerationRequest;
use crate::ontology::Ontology;

const QUERY_SYSTEM_PROMPT: &str = "You translate questions about a project knowledge graph \
into read-only Cypher queries. Use only the labels, properties, and relationship types \
listed in the schema. Match names case-insensitively with toLower(...) CONTAINS. \
Never generate queries that modify the graph. \
Respond with a single JSON object: \
{\"query\": \"...\", \"explanation\": \"...\", \"confidence\": 0.0}";

const LLM_MAX_TOKENS: usize = 512;

/// Confidence attached to registered-pattern queries.
const PATTERN_CONFIDENCE: f32 = 0.95;

static MUTATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(CREATE|MERGE|DELETE|DETACH|SET|REMOVE|DROP)\b").expect("valid pattern")
});

/// Which route produced a generated query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerySource {
    Pattern,
    Llm,
    Fallback,
}

impl QuerySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pattern => "pattern",
            Self::Llm => "llm",
            Self::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for QuerySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A graph query with provenance and confidence.
#[derive(Debug, Clone)]
pub struct GeneratedQuery {
    pub query: String,
    pub explanation: String,
    /// 0.0..=1.0; pattern queries are 0.95, fallbacks stay at or below 0.4
    pub confidence: f32,
    pub source: QuerySource,
}

#[derive(Debug, Deserialize)]
struct RawGeneratedQuery {
    #[serde(default)]
    query: String,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    confidence: Option<f32>,
}

/// Generates graph queries from natural-language questions.
pub struct CypherGenerator {
    provider: Arc<dyn Provider>,
    store: Arc<dyn GraphStore>,
    ontology: Arc<dyn Ontology>,
    cache: TtlCache<String, GeneratedQuery>,
    config: CypherConfig,
}

impl CypherGenerator {
    pub fn new(
        provider: Arc<dyn Provider>,
        store: Arc<dyn GraphStore>,
        ontology: Arc<dyn Ontology>,
        config: CypherConfig,
    ) -> Self {
        let cache = TtlCache::new(
            Duration::from_secs(config.cache_ttl_secs),
            config.cache_capacity,
        );
        Self {
            provider,
            store,
            ontology,
            cache,
            config,
        }
    }

    /// Generate a query for the question. The only error surface is
    /// invalid input; transport and formatting failures degrade through
    /// the route ladder instead of escaping.
    pub async fn generate(
        &self,
        question: &str,
        analysis: &QueryAnalysis,
    ) -> Result<GeneratedQuery> {
        if question.trim().is_empty() {
            return Err(Error::InvalidInput("question is empty".into()));
        }

        let key = normalize_question(question);
        if let Some(cached) = self.cache.get(&key) {
            debug!(source = %cached.source, "query generation cache hit");
            return Ok(cached);
        }

        if let Some(matched) = self.ontology.match_query_pattern(question) {
            let generated = GeneratedQuery {
                query: matched.query,
                explanation: format!("registered pattern '{}'", matched.name),
                confidence: PATTERN_CONFIDENCE,
                source: QuerySource::Pattern,
            };
            self.cache.insert(key, generated.clone());
            return Ok(generated);
        }

        let generated = match self.generate_with_llm(question, analysis).await {
            Ok(generated) => generated,
            Err(e) => {
                warn!(error = %e, "query generation degraded to fallback template");
                self.fallback_query(question, analysis)
            }
        };

        self.cache.insert(key, generated.clone());
        Ok(generated)
    }

    async fn generate_with_llm(
        &self,
        question: &str,
        analysis: &QueryAnalysis,
    ) -> Result<GeneratedQuery> {
        let schema = self.describe_schema().await;
        let hints = if analysis.entity_hints.is_empty() && analysis.relation_hints.is_empty() {
            String::new()
        } else {
            format!(
                "\nDetected entities: {}\nDetected relationships: {}\n",
                analysis.entity_hints.join(", "),
                analysis.relation_hints.join(", ")
            )
        };

        let prompt = format!("Schema:\n{schema}{hints}\nQuestion: {question}");
        let request = GenerationRequest::new(prompt)
            .with_system(QUERY_SYSTEM_PROMPT)
            .with_temperature(self.config.temperature)
            .with_max_tokens(LLM_MAX_TOKENS);

        let response = self.provider.generate(request).await?;
        let raw: RawGeneratedQuery = from_model_output(&response.text).ok_or_else(|| {
            Error::MalformedResponse(format!(
                "no query object in model output: {}",
                truncate(&response.text, 120)
            ))
        })?;

        let query = raw.query.trim().to_string();
        if query.is_empty() || !query.to_uppercase().contains("MATCH") {
            return Err(Error::MalformedResponse("model produced no MATCH query".into()));
        }
        if MUTATION_RE.is_match(&query) {
            return Err(Error::MalformedResponse(
                "model produced a mutating query".into(),
            ));
        }

        Ok(GeneratedQuery {
            query,
            explanation: raw.explanation,
            confidence: raw.confidence.unwrap_or(0.6).clamp(0.0, 1.0),
            source: QuerySource::Llm,
        })
    }

    /// One line per label with its properties, then the relationship
    /// vocabulary, then live node counts when the store is reachable.
    async fn describe_schema(&self) -> String {
        let mut lines = Vec::new();
        for label in self.ontology.entity_types() {
            let properties = self.ontology.properties_for(&label);
            lines.push(format!("({label}) properties: {}", properties.join(", ")));
        }
        let relations: Vec<String> = self
            .ontology
            .relation_types()
            .iter()
            .map(|r| r.to_string())
            .collect();
        lines.push(format!("Relationships: {}", relations.join(", ")));

        if let Ok(stats) = self.store.stats().await {
            let counts: Vec<String> = stats
                .labels
                .iter()
                .map(|(label, count)| format!("{label}: {count}"))
                .collect();
            if !counts.is_empty() {
                lines.push(format!("Node counts: {}", counts.join(", ")));
            }
        }

        lines.join("\n")
    }

    /// Deterministic template keyed off the question type and the first
    /// entity hint. Intentionally low confidence.
    fn fallback_query(&self, question: &str, analysis: &QueryAnalysis) -> GeneratedQuery {
        let ql = question.to_lowercase();
        let entity = analysis
            .entity_hints
            .first()
            .map(|e| sanitize_literal(e))
            .filter(|e| !e.is_empty());

        let query = if is_person_question(&ql) {
            match &entity {
                Some(entity) => format!(
                    "MATCH (p:Person) WHERE toLower(p.name) CONTAINS '{entity}' \
                     OR toLower(p.organization) CONTAINS '{entity}' RETURN p LIMIT 10"
                ),
                None => "MATCH (p:Person) RETURN p LIMIT 10".to_string(),
            }
        } else if is_count_question(&ql) {
            let label = count_label(&ql);
            format!("MATCH (n:{label}) RETURN count(n) AS count")
        } else {
            let term = entity.unwrap_or_else(|| significant_term(&ql));
            format!(
                "MATCH (d:Document) WHERE toLower(d.title) CONTAINS '{term}' \
                 OR toLower(d.content) CONTAINS '{term}' RETURN d LIMIT 10"
            )
        };

        GeneratedQuery {
            query,
            explanation: "deterministic fallback template".into(),
            confidence: self.config.fallback_confidence.min(0.4),
            source: QuerySource::Fallback,
        }
    }
}

fn normalize_question(question: &str) -> String {
    question.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn sanitize_literal(text: &str) -> String {
    text.to_lowercase().replace(['\'', '"', '\\'], "").trim().to_string()
}

fn is_person_question(ql: &str) -> bool {
    ["who ", "who'", "whose ", "wer ", "wessen "]
        .iter()
        .any(|cue| ql.starts_with(cue) || ql.contains(&format!(" {cue}")))
}

fn is_count_question(ql: &str) -> bool {
    ["how many", "count ", "wie viele", "anzahl"].iter().any(|cue| ql.contains(cue))
}

fn count_label(ql: &str) -> NodeLabel {
    if ql.contains("task") || ql.contains("aufgabe") {
        NodeLabel::Task
    } else if ql.contains("risk") || ql.contains("risik") {
        NodeLabel::Risk
    } else if ql.contains("decision") || ql.contains("entscheidung") {
        NodeLabel::Decision
    } else if ql.contains("people") || ql.contains("person") || ql.contains("leute") {
        NodeLabel::Person
    } else if ql.contains("message") || ql.contains("communication") || ql.contains("nachricht") {
        NodeLabel::Communication
    } else {
        NodeLabel::Document
    }
}

/// Longest word in the question, as a last-resort search term.
fn significant_term(ql: &str) -> String {
    ql.split_whitespace()
        .map(|t| t.trim_matches(|c: char| c.is_ascii_punctuation()))
        .max_by_key(|t| t.chars().count())
        .unwrap_or("")
        .to_string()
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
