//! Retrieval result model and the searchers that produce it
//!
//! - [`structural`]: typed lookups and bounded traversal over the graph
//! - [`hyde`]: hypothetical-document expansion for embedding queries
//! - [`semantic`]: vector search with keyword supplement
//!
//! All searchers degrade instead of failing: a broken collaborator means
//! fewer results, never an error on the query path.

pub mod hyde;
pub mod semantic;
pub mod structural;

pub use hyde::HydeExpander;
pub use semantic::SemanticSearcher;
pub use structural::StructuralSearcher;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graph::types::{GraphNode, GraphPath, NodeLabel};

/// Where a result came from. Provenance feeds deduplication, citation
/// labels, and the reranker's diversity heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalOrigin {
    /// Typed graph lookup or traversal
    Structural,
    /// Embedding similarity
    Semantic,
    /// Generated graph query execution
    GraphQuery,
    /// Keyword supplement
    Keyword,
    /// Project snapshot scan (store fallback)
    Snapshot,
    /// Sub-question summary from the multi-hop reasoner
    Reasoning,
}

impl RetrievalOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structural => "structural",
            Self::Semantic => "semantic",
            Self::GraphQuery => "graph-query",
            Self::Keyword => "keyword",
            Self::Snapshot => "snapshot",
            Self::Reasoning => "reasoning",
        }
    }
}

impl std::fmt::Display for RetrievalOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single piece of retrieved evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// What kind of thing this is, following node labels
    pub kind: NodeLabel,
    /// Human-readable summary used in prompts and citations
    pub content: String,
    /// Structured source data (node, path, or query row)
    pub payload: Value,
    pub origin: RetrievalOrigin,
    /// Retrieval or reranker score, when one exists
    pub score: Option<f32>,
}

impl SearchResult {
    /// Build a result from a graph node.
    pub fn from_node(node: &GraphNode, origin: RetrievalOrigin, score: Option<f32>) -> Self {
        let mut payload = node.properties.clone();
        payload.remove("embedding");
        payload.insert("id".into(), Value::String(node.id.clone()));
        payload.insert("label".into(), Value::String(node.label.to_string()));

        Self {
            kind: node.label.clone(),
            content: describe_node(node),
            payload: Value::Object(payload),
            origin,
            score,
        }
    }

    /// Build a result from a traversal path.
    pub fn from_path(path: &GraphPath, origin: RetrievalOrigin) -> Self {
        let kind = path
            .endpoint()
            .map(|n| n.label.clone())
            .unwrap_or(NodeLabel::Unknown("Path".into()));

        Self {
            kind,
            content: describe_path(path),
            payload: serde_json::to_value(path).unwrap_or(Value::Null),
            origin,
            score: None,
        }
    }

    /// Build a result from a raw query row.
    pub fn from_row(row: Value, origin: RetrievalOrigin) -> Self {
        let kind = row
            .get("label")
            .and_then(|l| l.as_str())
            .map(NodeLabel::parse)
            .unwrap_or(NodeLabel::Unknown("Row".into()));
        let content = describe_row(&row);

        Self {
            kind,
            content,
            payload: row,
            origin,
            score: None,
        }
    }

    /// Key used to recognize the same evidence across result lists:
    /// the node id when the payload has one, otherwise the normalized
    /// content text.
    pub fn dedup_key(&self) -> String {
        if let Some(id) = self.payload.get("id").and_then(|v| v.as_str()) {
            return format!("id:{id}");
        }
        format!(
            "content:{}",
            self.content.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
        )
    }
}

/// "Label: name. Snippet of the first text property."
fn describe_node(node: &GraphNode) -> String {
    let mut description = format!("{}: {}", node.label, node.display_name());
    let snippet = ["content", "description", "rationale", "summary", "text"]
        .iter()
        .find_map(|key| node.property_str(key))
        .map(|text| truncate_chars(text, 200));
    if let Some(snippet) = snippet
        && !snippet.trim().is_empty()
    {
        description.push_str(". ");
        description.push_str(snippet.trim());
    }
    for key in ["status", "severity", "role"] {
        if let Some(value) = node.property_str(key) {
            description.push_str(&format!(" ({key}: {value})"));
        }
    }
    description
}

fn describe_path(path: &GraphPath) -> String {
    let mut out = String::new();
    for (index, node) in path.nodes.iter().enumerate() {
        if index > 0 {
            let rel = path
                .rels
                .get(index - 1)
                .map(|r| r.as_str())
                .unwrap_or("RELATED_TO");
            out.push_str(&format!(" -[{rel}]-> "));
        }
        out.push_str(node.display_name());
    }
    out
}

fn describe_row(row: &Value) -> String {
    match row {
        Value::Object(map) => {
            let mut parts: Vec<String> = Vec::new();
            for (key, value) in map {
                if key == "embedding" {
                    continue;
                }
                match value {
                    Value::String(s) => parts.push(format!("{key}: {}", truncate_chars(s, 120))),
                    other => parts.push(format!("{key}: {other}")),
                }
            }
            parts.join(", ")
        }
        other => other.to_string(),
    }
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Longest alphanumeric word, a last-resort keyword for text search.
pub(crate) fn significant_term(text: &str) -> String {
    text.split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
        .max_by_key(|t| t.chars().count())
        .unwrap_or("")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::types::RelType;

    #[test]
    fn test_result_from_node_strips_embedding() {
        let node = GraphNode::new("d1", NodeLabel::Document)
            .with_property("title", "Rollout Plan")
            .with_property("content", "Phase one begins in June.")
            .with_property("embedding", serde_json::json!([0.1, 0.2]));

        let result = SearchResult::from_node(&node, RetrievalOrigin::Semantic, Some(0.9));
        assert_eq!(result.kind, NodeLabel::Document);
        assert!(result.content.contains("Rollout Plan"));
        assert!(result.content.contains("Phase one"));
        assert!(result.payload.get("embedding").is_none());
        assert_eq!(result.dedup_key(), "id:d1");
    }

    #[test]
    fn test_result_from_path_describes_hops() {
        let path = GraphPath {
            nodes: vec![
                GraphNode::new("p1", NodeLabel::Person).with_property("name", "Ada"),
                GraphNode::new("p2", NodeLabel::Person).with_property("name", "Grace"),
            ],
            rels: vec![RelType::ReportsTo],
        };

        let result = SearchResult::from_path(&path, RetrievalOrigin::Structural);
        assert_eq!(result.content, "Ada -[REPORTS_TO]-> Grace");
        assert_eq!(result.kind, NodeLabel::Person);
    }

    #[test]
    fn test_row_result_without_id_dedupes_on_content() {
        let result = SearchResult::from_row(
            serde_json::json!({ "count": 12 }),
            RetrievalOrigin::GraphQuery,
        );
        assert_eq!(result.content, "count: 12");
        assert!(result.dedup_key().starts_with("content:"));
    }

    #[test]
    fn test_significant_term() {
        assert_eq!(significant_term("what about the migration?"), "migration");
        assert_eq!(significant_term(""), "");
    }
}
