//! Node, edge, and label types for the project knowledge graph

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Length of a deterministic node id in hex characters.
const NODE_ID_HEX_LEN: usize = 24;

/// Vertex labels the engine models.
///
/// Labels reported by a store that the engine does not model are preserved
/// as [`NodeLabel::Unknown`] instead of being misfiled or dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeLabel {
    /// A person on the project
    Person,
    /// A document or page of project material
    Document,
    /// A unit of work
    Task,
    /// A recorded decision
    Decision,
    /// A tracked risk
    Risk,
    /// A message, meeting note, or other communication
    Communication,
    /// A label outside the modeled set
    Unknown(String),
}

impl NodeLabel {
    /// Label name as stored in the graph.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Person => "Person",
            Self::Document => "Document",
            Self::Task => "Task",
            Self::Decision => "Decision",
            Self::Risk => "Risk",
            Self::Communication => "Communication",
            Self::Unknown(s) => s.as_str(),
        }
    }

    /// Parse a label name, case-insensitively. Unrecognized names become
    /// [`NodeLabel::Unknown`] with the original spelling preserved.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "person" | "people" => Self::Person,
            "document" | "doc" => Self::Document,
            "task" => Self::Task,
            "decision" => Self::Decision,
            "risk" => Self::Risk,
            "communication" | "message" => Self::Communication,
            _ => Self::Unknown(s.to_string()),
        }
    }

    /// All modeled labels.
    pub fn all() -> [NodeLabel; 6] {
        [
            Self::Person,
            Self::Document,
            Self::Task,
            Self::Decision,
            Self::Risk,
            Self::Communication,
        ]
    }
}

impl std::fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<String> for NodeLabel {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<NodeLabel> for String {
    fn from(label: NodeLabel) -> Self {
        label.as_str().to_string()
    }
}

/// Relationship types the engine models.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RelType {
    /// Person reports to person
    ReportsTo,
    /// Person authored a document or communication
    Authored,
    /// Task assigned to a person
    AssignedTo,
    /// Source mentions a person or entity
    Mentions,
    /// Document references another document
    References,
    /// Person made a decision
    Decided,
    /// Person owns a risk or task
    Owns,
    /// Task mitigates a risk
    Mitigates,
    /// Person participated in a communication
    ParticipatedIn,
    /// Content similarity between two nodes
    SimilarTo,
    /// A relationship outside the modeled set
    Unknown(String),
}

impl RelType {
    /// Relationship name as stored in the graph.
    pub fn as_str(&self) -> &str {
        match self {
            Self::ReportsTo => "REPORTS_TO",
            Self::Authored => "AUTHORED",
            Self::AssignedTo => "ASSIGNED_TO",
            Self::Mentions => "MENTIONS",
            Self::References => "REFERENCES",
            Self::Decided => "DECIDED",
            Self::Owns => "OWNS",
            Self::Mitigates => "MITIGATES",
            Self::ParticipatedIn => "PARTICIPATED_IN",
            Self::SimilarTo => "SIMILAR_TO",
            Self::Unknown(s) => s.as_str(),
        }
    }

    /// Parse a relationship name, case-insensitively.
    pub fn parse(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "REPORTS_TO" => Self::ReportsTo,
            "AUTHORED" => Self::Authored,
            "ASSIGNED_TO" => Self::AssignedTo,
            "MENTIONS" => Self::Mentions,
            "REFERENCES" => Self::References,
            "DECIDED" => Self::Decided,
            "OWNS" => Self::Owns,
            "MITIGATES" => Self::Mitigates,
            "PARTICIPATED_IN" => Self::ParticipatedIn,
            "SIMILAR_TO" => Self::SimilarTo,
            _ => Self::Unknown(s.to_string()),
        }
    }
}

impl std::fmt::Display for RelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<String> for RelType {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<RelType> for String {
    fn from(rel: RelType) -> Self {
        rel.as_str().to_string()
    }
}

/// A graph vertex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    /// Unique id within the project scope
    pub id: String,
    /// Vertex label
    pub label: NodeLabel,
    /// Arbitrary properties
    pub properties: Map<String, Value>,
}

impl GraphNode {
    /// Create a node with no properties.
    pub fn new(id: impl Into<String>, label: NodeLabel) -> Self {
        Self {
            id: id.into(),
            label,
            properties: Map::new(),
        }
    }

    /// Attach a property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// String property lookup.
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }

    /// Best-effort display name: the first of `name`, `title`, `subject`,
    /// falling back to the id.
    pub fn display_name(&self) -> &str {
        self.property_str("name")
            .or_else(|| self.property_str("title"))
            .or_else(|| self.property_str("subject"))
            .unwrap_or(&self.id)
    }

    /// The stored embedding vector, if the node carries one.
    pub fn embedding(&self) -> Option<Vec<f32>> {
        let array = self.properties.get("embedding")?.as_array()?;
        let mut vector = Vec::with_capacity(array.len());
        for value in array {
            vector.push(value.as_f64()? as f32);
        }
        Some(vector)
    }
}

/// A directed graph edge.
///
/// Every edge carries an `updated_at` timestamp in its properties so stale
/// relationships can be identified after repeated syncs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Source node id
    pub from_id: String,
    /// Target node id
    pub to_id: String,
    /// Relationship type
    pub rel_type: RelType,
    /// Arbitrary properties, always including `updated_at` (RFC 3339)
    pub properties: Map<String, Value>,
}

impl GraphEdge {
    /// Create an edge stamped with the current time.
    pub fn new(from_id: impl Into<String>, to_id: impl Into<String>, rel_type: RelType) -> Self {
        let mut properties = Map::new();
        properties.insert("updated_at".into(), Value::String(Utc::now().to_rfc3339()));
        Self {
            from_id: from_id.into(),
            to_id: to_id.into(),
            rel_type,
            properties,
        }
    }

    /// Attach a property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// A traversal path: `nodes[0]` is the start, `rels[i]` connects
/// `nodes[i]` to `nodes[i + 1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphPath {
    pub nodes: Vec<GraphNode>,
    pub rels: Vec<RelType>,
}

impl GraphPath {
    /// The node the path ends at.
    pub fn endpoint(&self) -> Option<&GraphNode> {
        self.nodes.last()
    }

    /// Number of hops.
    pub fn depth(&self) -> usize {
        self.rels.len()
    }
}

/// Derive a stable node id from a project scope, label, and natural key.
///
/// The same inputs produce the same id in every process, which is what
/// makes repeated syncs upsert instead of duplicate. Keys are lowercased
/// so that casing differences in source records collapse to one node.
pub fn deterministic_node_id(project: &str, label: &NodeLabel, natural_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(project.as_bytes());
    hasher.update(b":");
    hasher.update(label.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(natural_key.to_lowercase().as_bytes());
    let digest = hasher.finalize();

    let mut id = String::with_capacity(NODE_ID_HEX_LEN);
    for byte in digest.iter().take(NODE_ID_HEX_LEN / 2) {
        id.push_str(&format!("{byte:02x}"));
    }
    id
}
