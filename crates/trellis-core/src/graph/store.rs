//! Graph store capability trait
//!
//! Everything the engine needs from a graph backend, kept narrow enough
//! that both a production graph database client and the in-memory
//! reference store can implement it. The query path only reads; writes
//! happen exclusively through the sync pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::graph::types::{GraphEdge, GraphNode, GraphPath, NodeLabel, RelType};

/// Property predicate used by [`GraphStore::find_nodes`].
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    clauses: Vec<FilterClause>,
}

#[derive(Debug, Clone)]
enum FilterClause {
    Equals(String, Value),
    Contains(String, String),
}

impl NodeFilter {
    /// Filter that matches every node of the label.
    pub fn any() -> Self {
        Self::default()
    }

    /// Require a property to equal a value exactly.
    pub fn equals(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push(FilterClause::Equals(key.into(), value.into()));
        self
    }

    /// Require a string property to contain a substring, case-insensitively.
    pub fn contains(mut self, key: impl Into<String>, needle: impl Into<String>) -> Self {
        self.clauses
            .push(FilterClause::Contains(key.into(), needle.into()));
        self
    }

    /// True when no clauses were added.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Evaluate the filter against a node. All clauses must hold.
    pub fn matches(&self, node: &GraphNode) -> bool {
        self.clauses.iter().all(|clause| match clause {
            FilterClause::Equals(key, expected) => {
                node.properties.get(key).is_some_and(|v| v == expected)
            }
            FilterClause::Contains(key, needle) => node
                .property_str(key)
                .is_some_and(|v| v.to_lowercase().contains(&needle.to_lowercase())),
        })
    }
}

/// Outcome of a batched write.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Items written (created or updated in place)
    pub created: usize,
    /// Per-item failures, in input order of discovery
    pub errors: Vec<String>,
}

impl BatchOutcome {
    /// Merge another outcome into this one.
    pub fn absorb(&mut self, other: BatchOutcome) {
        self.created += other.created;
        self.errors.extend(other.errors);
    }
}

/// Aggregate graph statistics, used for schema prompts and status reports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    /// Node count per label name, sorted by label
    pub labels: BTreeMap<String, usize>,
}

/// Lifecycle state of the sync pipeline as seen by operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Syncing,
    Failed,
}

/// Sync status record pushed to the store after every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub state: SyncState,
    /// Failure message when `state` is `Failed`
    pub message: Option<String>,
    /// Node count at the time of the report
    pub node_count: usize,
    /// Edge count at the time of the report
    pub edge_count: usize,
    pub reported_at: DateTime<Utc>,
}

impl SyncStatus {
    /// Status for a sync that has just started.
    pub fn syncing() -> Self {
        Self {
            state: SyncState::Syncing,
            message: None,
            node_count: 0,
            edge_count: 0,
            reported_at: Utc::now(),
        }
    }

    /// Status for a completed sync with fresh counts.
    pub fn idle(node_count: usize, edge_count: usize) -> Self {
        Self {
            state: SyncState::Idle,
            message: None,
            node_count,
            edge_count,
            reported_at: Utc::now(),
        }
    }

    /// Status for a failed sync.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            state: SyncState::Failed,
            message: Some(message.into()),
            node_count: 0,
            edge_count: 0,
            reported_at: Utc::now(),
        }
    }
}

/// Capability trait for graph backends.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Whether the store is reachable. Searchers consult this before
    /// deciding between live lookups and snapshot fallbacks.
    async fn is_connected(&self) -> bool;

    /// Execute a raw graph query, returning one JSON object per row.
    async fn execute(&self, query: &str) -> Result<Vec<Value>>;

    /// Find nodes of a label matching a property filter.
    async fn find_nodes(
        &self,
        label: &NodeLabel,
        filter: &NodeFilter,
        limit: usize,
    ) -> Result<Vec<GraphNode>>;

    /// Breadth-first traversal from a start node over the given
    /// relationship types, up to `max_depth` hops, edges followed in
    /// either direction. One path per reached node.
    async fn traverse(
        &self,
        start_id: &str,
        rel_types: &[RelType],
        max_depth: u32,
    ) -> Result<Vec<GraphPath>>;

    /// Upsert a batch of nodes by id.
    async fn create_nodes(&self, label: &NodeLabel, nodes: &[GraphNode]) -> Result<BatchOutcome>;

    /// Create a batch of edges. Edges whose endpoints do not resolve are
    /// dropped and reported in the outcome's errors, never retried.
    async fn create_relationships(&self, edges: &[GraphEdge]) -> Result<BatchOutcome>;

    /// Nearest nodes by embedding similarity. Stores without vector
    /// support return an error; callers degrade to keyword search.
    async fn vector_search(&self, embedding: &[f32], top_k: usize)
        -> Result<Vec<(GraphNode, f32)>>;

    /// Case-insensitive text lookup over name-ish and content properties.
    async fn keyword_search(&self, term: &str, limit: usize) -> Result<Vec<GraphNode>>;

    /// Record the latest sync status.
    async fn update_sync_status(&self, status: &SyncStatus) -> Result<()>;

    /// Aggregate statistics.
    async fn stats(&self) -> Result<GraphStats>;

    /// Remove every node and edge. Used by full-rebuild syncs.
    async fn clear(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_equals_and_contains() {
        let node = GraphNode::new("p1", NodeLabel::Person)
            .with_property("name", "Grace Hopper")
            .with_property("level", 3);

        assert!(NodeFilter::any().matches(&node));
        assert!(NodeFilter::any().equals("level", 3).matches(&node));
        assert!(!NodeFilter::any().equals("level", 4).matches(&node));
        assert!(NodeFilter::any().contains("name", "hopper").matches(&node));
        assert!(!NodeFilter::any().contains("name", "lovelace").matches(&node));
        // Missing property fails a contains clause.
        assert!(!NodeFilter::any().contains("title", "x").matches(&node));
    }

    #[test]
    fn test_batch_outcome_absorb() {
        let mut total = BatchOutcome {
            created: 2,
            errors: vec!["a".into()],
        };
        total.absorb(BatchOutcome {
            created: 3,
            errors: vec!["b".into()],
        });
        assert_eq!(total.created, 5);
        assert_eq!(total.errors.len(), 2);
    }

    #[test]
    fn test_sync_status_constructors() {
        assert_eq!(SyncStatus::syncing().state, SyncState::Syncing);

        let done = SyncStatus::idle(10, 4);
        assert_eq!(done.state, SyncState::Idle);
        assert_eq!(done.node_count, 10);

        let failed = SyncStatus::failed("store went away");
        assert_eq!(failed.state, SyncState::Failed);
        assert_eq!(failed.message.as_deref(), Some("store went away"));
    }
}
