//! Structural retrieval
//!
//! Typed lookups against the graph, inferred from label cues in the
//! question, plus a bounded two-hop traversal around recognized entity
//! names. When the store is offline or returns nothing, the searcher
//! scans the project snapshot instead; store results and snapshot
//! results are never mixed in one response.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::classify::QueryAnalysis;
use crate::config::RetrievalConfig;
use crate::graph::store::{GraphStore, NodeFilter};
use crate::graph::types::{GraphNode, NodeLabel, RelType};
use crate::project::{ProjectSnapshot, ProjectStore};
use crate::search::{significant_term, truncate_chars, RetrievalOrigin, SearchResult};

/// Relationship types the neighborhood traversal is allowed to follow.
const TRAVERSAL_RELS: [RelType; 6] = [
    RelType::ReportsTo,
    RelType::AssignedTo,
    RelType::Authored,
    RelType::Owns,
    RelType::Decided,
    RelType::ParticipatedIn,
];

/// At most this many traversal seeds per question.
const MAX_SEEDS: usize = 3;

/// Label cues per language, matched as lowercase substrings.
const LABEL_CUES: [(&[&str], NodeLabel); 6] = [
    (
        &["who", "people", "person", "team", "wer", "personen", "leute", "mitarbeiter"],
        NodeLabel::Person,
    ),
    (&["task", "todo", "aufgabe"], NodeLabel::Task),
    (
        &["document", "doc ", "page", "dokument", "seite", "unterlage"],
        NodeLabel::Document,
    ),
    (
        &["decision", "decided", "entscheidung", "entschieden"],
        NodeLabel::Decision,
    ),
    (&["risk", "risik"], NodeLabel::Risk),
    (
        &["message", "email", "meeting", "communication", "nachricht", "besprechung"],
        NodeLabel::Communication,
    ),
];

/// Graph lookups with snapshot fallback.
pub struct StructuralSearcher {
    store: Arc<dyn GraphStore>,
    projects: Arc<dyn ProjectStore>,
    project: String,
    config: RetrievalConfig,
}

impl StructuralSearcher {
    pub fn new(
        store: Arc<dyn GraphStore>,
        projects: Arc<dyn ProjectStore>,
        project: impl Into<String>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            projects,
            project: project.into(),
            config,
        }
    }

    /// Run the structural search. Infallible: degraded collaborators
    /// shrink the result list, they never produce an error.
    pub async fn search(&self, question: &str, analysis: &QueryAnalysis) -> Vec<SearchResult> {
        if !self.store.is_connected().await {
            warn!("graph store offline, falling back to project snapshot scan");
            return self.snapshot_scan(question, analysis).await;
        }

        let labels = infer_labels(question);
        let hint = analysis.entity_hints.first().cloned();
        debug!(labels = labels.len(), hint = hint.as_deref().unwrap_or(""), "structural lookup");

        let lookups = labels.iter().map(|label| {
            let filter = match &hint {
                Some(hint) => NodeFilter::any().contains(name_property(label), hint.clone()),
                None => NodeFilter::any(),
            };
            let store = Arc::clone(&self.store);
            let limit = self.config.structural_limit;
            let label = label.clone();
            async move {
                let found = store.find_nodes(&label, &filter, limit).await;
                (label, found)
            }
        });

        let mut results: Vec<SearchResult> = Vec::new();
        let mut seen_ids: Vec<String> = Vec::new();
        let mut nodes: Vec<GraphNode> = Vec::new();

        for (label, found) in join_all(lookups).await {
            match found {
                Ok(batch) => {
                    for node in batch {
                        if seen_ids.contains(&node.id) {
                            continue;
                        }
                        seen_ids.push(node.id.clone());
                        results.push(SearchResult::from_node(
                            &node,
                            RetrievalOrigin::Structural,
                            None,
                        ));
                        nodes.push(node);
                    }
                }
                Err(e) => warn!(label = %label, error = %e, "node lookup failed"),
            }
        }

        results.extend(self.traverse_neighborhoods(&nodes, analysis).await);

        if results.is_empty() {
            debug!("store returned nothing, scanning project snapshot");
            return self.snapshot_scan(question, analysis).await;
        }
        results
    }

    /// Two-hop traversal around nodes whose name matches an entity hint.
    async fn traverse_neighborhoods(
        &self,
        nodes: &[GraphNode],
        analysis: &QueryAnalysis,
    ) -> Vec<SearchResult> {
        if analysis.entity_hints.is_empty() {
            return Vec::new();
        }

        let seeds: Vec<&GraphNode> = nodes
            .iter()
            .filter(|node| {
                let name = node.display_name().to_lowercase();
                analysis
                    .entity_hints
                    .iter()
                    .any(|hint| name.contains(&hint.to_lowercase()))
            })
            .take(MAX_SEEDS)
            .collect();

        let traversals = seeds.iter().map(|seed| {
            let store = Arc::clone(&self.store);
            let id = seed.id.clone();
            let depth = self.config.traverse_depth;
            async move { store.traverse(&id, &TRAVERSAL_RELS, depth).await }
        });

        let mut results = Vec::new();
        let mut seen = Vec::new();
        for outcome in join_all(traversals).await {
            match outcome {
                Ok(paths) => {
                    for path in paths.iter().take(self.config.structural_limit) {
                        let result = SearchResult::from_path(path, RetrievalOrigin::Structural);
                        let key = result.dedup_key();
                        if !seen.contains(&key) {
                            seen.push(key);
                            results.push(result);
                        }
                    }
                }
                Err(e) => warn!(error = %e, "traversal failed"),
            }
        }
        results
    }

    /// Linear scan over the project snapshot, term-matched against the
    /// records' text fields.
    async fn snapshot_scan(&self, question: &str, analysis: &QueryAnalysis) -> Vec<SearchResult> {
        let snapshot = match self.projects.snapshot(&self.project).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, project = %self.project, "snapshot unavailable");
                return Vec::new();
            }
        };

        let mut terms: Vec<String> = analysis
            .entity_hints
            .iter()
            .map(|h| h.to_lowercase())
            .collect();
        if terms.is_empty() {
            let term = significant_term(question);
            if term.chars().count() >= 3 {
                terms.push(term);
            }
        }
        if terms.is_empty() {
            return Vec::new();
        }

        let matches = |fields: &[&str]| -> bool {
            fields.iter().any(|field| {
                let lowered = field.to_lowercase();
                terms.iter().any(|term| lowered.contains(term))
            })
        };

        let mut results = scan_snapshot(&snapshot, matches);
        results.truncate(self.config.structural_limit * 2);
        results
    }
}

fn infer_labels(question: &str) -> Vec<NodeLabel> {
    let ql = question.to_lowercase();
    let mut labels: Vec<NodeLabel> = LABEL_CUES
        .iter()
        .filter(|(cues, _)| cues.iter().any(|cue| ql.contains(cue)))
        .map(|(_, label)| label.clone())
        .collect();

    if labels.is_empty() {
        labels = vec![NodeLabel::Person, NodeLabel::Document, NodeLabel::Task];
    }
    labels
}

/// The property a name-based filter should match for each label.
fn name_property(label: &NodeLabel) -> &'static str {
    match label {
        NodeLabel::Person => "name",
        NodeLabel::Communication => "subject",
        _ => "title",
    }
}

fn scan_snapshot<F: Fn(&[&str]) -> bool>(
    snapshot: &ProjectSnapshot,
    matches: F,
) -> Vec<SearchResult> {
    let mut results = Vec::new();
    let mut push = |kind: NodeLabel, content: String, payload: serde_json::Value| {
        results.push(SearchResult {
            kind,
            content,
            payload,
            origin: RetrievalOrigin::Snapshot,
            score: None,
        });
    };

    for person in &snapshot.people {
        let role = person.role.as_deref().unwrap_or("");
        if matches(&[&person.name, role, person.email.as_deref().unwrap_or("")]) {
            let mut content = format!("Person: {}", person.name);
            if !role.is_empty() {
                content.push_str(&format!(" (role: {role})"));
            }
            push(
                NodeLabel::Person,
                content,
                serde_json::to_value(person).unwrap_or_default(),
            );
        }
    }

    for document in &snapshot.documents {
        if matches(&[&document.title, &document.content]) {
            push(
                NodeLabel::Document,
                format!(
                    "Document: {}. {}",
                    document.title,
                    truncate_chars(&document.content, 200)
                ),
                serde_json::to_value(document).unwrap_or_default(),
            );
        }
    }

    for task in &snapshot.tasks {
        let description = task.description.as_deref().unwrap_or("");
        if matches(&[&task.title, description, task.assignee.as_deref().unwrap_or("")]) {
            let mut content = format!("Task: {}", task.title);
            if let Some(status) = &task.status {
                content.push_str(&format!(" (status: {status})"));
            }
            push(
                NodeLabel::Task,
                content,
                serde_json::to_value(task).unwrap_or_default(),
            );
        }
    }

    for decision in &snapshot.decisions {
        let rationale = decision.rationale.as_deref().unwrap_or("");
        if matches(&[&decision.title, rationale]) {
            push(
                NodeLabel::Decision,
                format!("Decision: {}. {}", decision.title, truncate_chars(rationale, 200)),
                serde_json::to_value(decision).unwrap_or_default(),
            );
        }
    }

    for risk in &snapshot.risks {
        if matches(&[&risk.title, risk.owner.as_deref().unwrap_or("")]) {
            let mut content = format!("Risk: {}", risk.title);
            if let Some(severity) = &risk.severity {
                content.push_str(&format!(" (severity: {severity})"));
            }
            push(
                NodeLabel::Risk,
                content,
                serde_json::to_value(risk).unwrap_or_default(),
            );
        }
    }

    for communication in &snapshot.communications {
        if matches(&[&communication.subject, &communication.content]) {
            push(
                NodeLabel::Communication,
                format!(
                    "Communication: {}. {}",
                    communication.subject,
                    truncate_chars(&communication.content, 200)
                ),
                serde_json::to_value(communication).unwrap_or_default(),
            );
        }
    }

    results
}
