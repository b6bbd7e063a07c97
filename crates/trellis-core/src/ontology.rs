//! Ontology collaborator
//!
//! The ontology describes what the project graph can contain: entity
//! labels with their properties, relationship types, registered query
//! patterns, and known entity names. The engine treats it as read-only
//! reference data; administration of ontologies happens elsewhere.

use crate::classify::QueryStrategy;
use crate::graph::types::{NodeLabel, RelType};

/// A registered query pattern matched against incoming questions.
///
/// Trigger phrases are compared case-insensitively. A template may
/// contain an `{entity}` placeholder filled from the question's entity
/// hints; templates with an unfillable placeholder do not match.
#[derive(Debug, Clone)]
pub struct QueryPattern {
    /// Stable pattern name, surfaced on the analysis for observability
    pub name: String,
    /// Trigger phrases, any of which activates the pattern
    pub triggers: Vec<String>,
    /// Graph query template, optionally containing `{entity}`
    pub template: String,
    /// Retrieval strategy the pattern implies
    pub strategy: QueryStrategy,
}

/// A successful pattern match.
#[derive(Debug, Clone)]
pub struct PatternMatch {
    pub name: String,
    /// The template with placeholders substituted
    pub query: String,
    pub strategy: QueryStrategy,
}

/// Schema row for one entity label.
#[derive(Debug, Clone)]
pub struct OntologyEntry {
    pub label: NodeLabel,
    /// Property names the label carries
    pub properties: Vec<String>,
    /// Whether instances are shared across projects (people, organizations)
    pub shared: bool,
}

/// Read-only ontology surface consumed by the engine.
pub trait Ontology: Send + Sync {
    /// Entity labels in the ontology.
    fn entity_types(&self) -> Vec<NodeLabel>;

    /// Relationship types in the ontology.
    fn relation_types(&self) -> Vec<RelType>;

    /// Property names for a label, empty when unknown.
    fn properties_for(&self, label: &NodeLabel) -> Vec<String>;

    /// Whether instances of the label are shared across project scopes.
    fn is_shared_entity(&self, label: &NodeLabel) -> bool;

    /// Try the registered patterns against a question.
    fn match_query_pattern(&self, text: &str) -> Option<PatternMatch>;

    /// Known entity names appearing in the text, case-insensitively.
    fn entity_hints(&self, text: &str) -> Vec<String>;
}

/// Ontology assembled from static rows, the default implementation.
#[derive(Debug, Clone, Default)]
pub struct StaticOntology {
    entries: Vec<OntologyEntry>,
    relations: Vec<RelType>,
    patterns: Vec<QueryPattern>,
    known_entities: Vec<String>,
}

impl StaticOntology {
    /// An empty ontology.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard project-knowledge ontology: all modeled labels with
    /// their usual properties, all modeled relationship types, no
    /// patterns or known entities.
    pub fn project_default() -> Self {
        let entry = |label: NodeLabel, properties: &[&str], shared: bool| OntologyEntry {
            label,
            properties: properties.iter().map(|p| p.to_string()).collect(),
            shared,
        };

        Self {
            entries: vec![
                entry(
                    NodeLabel::Person,
                    &["name", "email", "role", "organization"],
                    true,
                ),
                entry(
                    NodeLabel::Document,
                    &["title", "content", "url", "created_at"],
                    false,
                ),
                entry(
                    NodeLabel::Task,
                    &["title", "status", "assignee", "due_date"],
                    false,
                ),
                entry(
                    NodeLabel::Decision,
                    &["title", "rationale", "decided_at"],
                    false,
                ),
                entry(NodeLabel::Risk, &["title", "severity", "status"], false),
                entry(
                    NodeLabel::Communication,
                    &["subject", "content", "channel", "sent_at"],
                    false,
                ),
            ],
            relations: vec![
                RelType::ReportsTo,
                RelType::Authored,
                RelType::AssignedTo,
                RelType::Mentions,
                RelType::References,
                RelType::Decided,
                RelType::Owns,
                RelType::Mitigates,
                RelType::ParticipatedIn,
                RelType::SimilarTo,
            ],
            patterns: Vec::new(),
            known_entities: Vec::new(),
        }
    }

    /// Add a schema entry.
    pub fn with_entry(mut self, entry: OntologyEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Register a query pattern.
    pub fn with_pattern(mut self, pattern: QueryPattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    /// Register a known entity name.
    pub fn with_known_entity(mut self, name: impl Into<String>) -> Self {
        self.known_entities.push(name.into());
        self
    }
}

impl Ontology for StaticOntology {
    fn entity_types(&self) -> Vec<NodeLabel> {
        self.entries.iter().map(|e| e.label.clone()).collect()
    }

    fn relation_types(&self) -> Vec<RelType> {
        self.relations.clone()
    }

    fn properties_for(&self, label: &NodeLabel) -> Vec<String> {
        self.entries
            .iter()
            .find(|e| e.label == *label)
            .map(|e| e.properties.clone())
            .unwrap_or_default()
    }

    fn is_shared_entity(&self, label: &NodeLabel) -> bool {
        self.entries
            .iter()
            .find(|e| e.label == *label)
            .is_some_and(|e| e.shared)
    }

    fn match_query_pattern(&self, text: &str) -> Option<PatternMatch> {
        let lowered = text.to_lowercase();
        for pattern in &self.patterns {
            let triggered = pattern
                .triggers
                .iter()
                .any(|t| lowered.contains(&t.to_lowercase()));
            if !triggered {
                continue;
            }

            let query = if pattern.template.contains("{entity}") {
                // An entity-parameterized template needs a hint to fill it;
                // without one this pattern is skipped, not the whole search.
                match self.entity_hints(text).into_iter().next() {
                    Some(hint) => pattern.template.replace("{entity}", &hint.to_lowercase()),
                    None => continue,
                }
            } else {
                pattern.template.clone()
            };

            return Some(PatternMatch {
                name: pattern.name.clone(),
                query,
                strategy: pattern.strategy,
            });
        }
        None
    }

    fn entity_hints(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        self.known_entities
            .iter()
            .filter(|name| lowered.contains(&name.to_lowercase()))
            .cloned()
            .collect()
    }
}
