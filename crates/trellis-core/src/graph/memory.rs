//! In-memory graph store
//!
//! Reference implementation of [`GraphStore`]: HashMap-backed nodes, a flat
//! edge list, brute-force cosine similarity for vector search, and a small
//! interpreter for the query shapes the engine generates (single-node and
//! one-hop MATCH with CONTAINS filters, COUNT, LIMIT). It backs the test
//! suite and works as a local development backend.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::graph::store::{BatchOutcome, GraphStats, GraphStore, NodeFilter, SyncStatus};
use crate::graph::types::{GraphEdge, GraphNode, GraphPath, NodeLabel, RelType};
use crate::llm::types::cosine_similarity;

/// Row limit applied when a query has no LIMIT clause.
const DEFAULT_ROW_LIMIT: usize = 25;

/// Properties scanned by keyword search.
const TEXT_PROPERTIES: [&str; 7] = [
    "name", "title", "subject", "content", "description", "text", "summary",
];

static MATCH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)MATCH\s*\((\w+):(\w+)\)(?:\s*-\s*\[:(\w+)\]\s*->\s*\((\w+):(\w+)\))?")
        .expect("valid pattern")
});

static CONTAINS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:toLower\()?(\w+)\.(\w+)\)?\s+CONTAINS\s+'([^']*)'")
        .expect("valid pattern")
});

static COUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)RETURN\s+count\s*\(").expect("valid pattern"));

static RETURN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)RETURN\s+(\w+)").expect("valid pattern"));

static LIMIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)LIMIT\s+(\d+)").expect("valid pattern"));

#[derive(Default)]
struct GraphData {
    nodes: HashMap<String, GraphNode>,
    edges: Vec<GraphEdge>,
    last_status: Option<SyncStatus>,
}

/// HashMap-backed [`GraphStore`].
pub struct MemoryGraph {
    inner: RwLock<GraphData>,
    connected: AtomicBool,
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGraph {
    /// Create an empty, connected store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(GraphData::default()),
            connected: AtomicBool::new(true),
        }
    }

    /// Simulate losing or regaining the backend connection.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// The most recently reported sync status.
    pub async fn last_sync_status(&self) -> Option<SyncStatus> {
        self.inner.read().await.last_status.clone()
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::GraphUnavailable("memory store marked offline".into()))
        }
    }

    fn node_to_row(node: &GraphNode) -> Value {
        let mut row = node.properties.clone();
        row.insert("id".into(), Value::String(node.id.clone()));
        row.insert("label".into(), Value::String(node.label.as_str().to_string()));
        row.remove("embedding");
        Value::Object(row)
    }

    /// Disjunction of CONTAINS clauses bound to one query variable. A node
    /// passes when the variable has no clauses or any clause matches.
    fn passes_clauses(node: &GraphNode, clauses: &[(String, String)]) -> bool {
        if clauses.is_empty() {
            return true;
        }
        clauses.iter().any(|(key, needle)| {
            node.property_str(key)
                .is_some_and(|v| v.to_lowercase().contains(needle))
        })
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn execute(&self, query: &str) -> Result<Vec<Value>> {
        self.ensure_connected()?;

        let captures = MATCH_RE
            .captures(query)
            .ok_or_else(|| Error::GraphQuery(format!("unsupported query shape: {query}")))?;

        let first_var = captures[1].to_string();
        let first_label = NodeLabel::parse(&captures[2]);
        let hop = captures.get(3).map(|rel| {
            (
                RelType::parse(rel.as_str()),
                captures[4].to_string(),
                NodeLabel::parse(&captures[5]),
            )
        });

        // CONTAINS clauses grouped by the variable they constrain.
        let mut clauses: HashMap<String, Vec<(String, String)>> = HashMap::new();
        for c in CONTAINS_RE.captures_iter(query) {
            clauses
                .entry(c[1].to_string())
                .or_default()
                .push((c[2].to_string(), c[3].to_lowercase()));
        }

        let counting = COUNT_RE.is_match(query);
        let return_var = RETURN_RE
            .captures(query)
            .map(|c| c[1].to_string())
            .unwrap_or_else(|| first_var.clone());
        let limit = LIMIT_RE
            .captures(query)
            .and_then(|c| c[1].parse::<usize>().ok())
            .unwrap_or(DEFAULT_ROW_LIMIT);

        let data = self.inner.read().await;
        let empty = Vec::new();
        let first_clauses = clauses.get(&first_var).unwrap_or(&empty);

        let rows: Vec<Value> = match hop {
            None => {
                let mut matched: Vec<&GraphNode> = data
                    .nodes
                    .values()
                    .filter(|n| n.label == first_label && Self::passes_clauses(n, first_clauses))
                    .collect();
                matched.sort_by(|a, b| a.id.cmp(&b.id));

                if counting {
                    return Ok(vec![json!({ "count": matched.len() })]);
                }
                matched.into_iter().take(limit).map(Self::node_to_row).collect()
            }
            Some((rel_type, second_var, second_label)) => {
                let second_clauses = clauses.get(&second_var).unwrap_or(&empty);
                let mut pairs: Vec<(&GraphNode, &GraphNode)> = data
                    .edges
                    .iter()
                    .filter(|e| e.rel_type == rel_type)
                    .filter_map(|e| {
                        let from = data.nodes.get(&e.from_id)?;
                        let to = data.nodes.get(&e.to_id)?;
                        (from.label == first_label
                            && to.label == second_label
                            && Self::passes_clauses(from, first_clauses)
                            && Self::passes_clauses(to, second_clauses))
                        .then_some((from, to))
                    })
                    .collect();
                pairs.sort_by(|a, b| (&a.0.id, &a.1.id).cmp(&(&b.0.id, &b.1.id)));

                if counting {
                    return Ok(vec![json!({ "count": pairs.len() })]);
                }
                pairs
                    .into_iter()
                    .take(limit)
                    .map(|(from, to)| {
                        if return_var == second_var {
                            Self::node_to_row(to)
                        } else {
                            Self::node_to_row(from)
                        }
                    })
                    .collect()
            }
        };

        Ok(rows)
    }

    async fn find_nodes(
        &self,
        label: &NodeLabel,
        filter: &NodeFilter,
        limit: usize,
    ) -> Result<Vec<GraphNode>> {
        self.ensure_connected()?;
        let data = self.inner.read().await;
        let mut matched: Vec<GraphNode> = data
            .nodes
            .values()
            .filter(|n| n.label == *label && filter.matches(n))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched.truncate(limit);
        Ok(matched)
    }

    async fn traverse(
        &self,
        start_id: &str,
        rel_types: &[RelType],
        max_depth: u32,
    ) -> Result<Vec<GraphPath>> {
        self.ensure_connected()?;
        let data = self.inner.read().await;
        let Some(start) = data.nodes.get(start_id) else {
            return Ok(Vec::new());
        };

        // Undirected adjacency restricted to the requested relationship types.
        let mut adjacency: HashMap<&str, Vec<(&str, &RelType)>> = HashMap::new();
        for edge in &data.edges {
            if !rel_types.contains(&edge.rel_type) {
                continue;
            }
            adjacency
                .entry(edge.from_id.as_str())
                .or_default()
                .push((edge.to_id.as_str(), &edge.rel_type));
            adjacency
                .entry(edge.to_id.as_str())
                .or_default()
                .push((edge.from_id.as_str(), &edge.rel_type));
        }

        let mut visited: HashMap<&str, ()> = HashMap::from([(start_id, ())]);
        let mut queue: VecDeque<(Vec<&GraphNode>, Vec<RelType>)> =
            VecDeque::from([(vec![start], Vec::new())]);
        let mut paths = Vec::new();

        while let Some((path_nodes, path_rels)) = queue.pop_front() {
            if path_rels.len() as u32 >= max_depth {
                continue;
            }
            let Some(tail) = path_nodes.last() else { continue };
            let mut neighbors: Vec<(&str, &RelType)> = adjacency
                .get(tail.id.as_str())
                .map(|n| n.to_vec())
                .unwrap_or_default();
            neighbors.sort_by(|a, b| a.0.cmp(b.0));

            for (neighbor_id, rel) in neighbors {
                if visited.contains_key(neighbor_id) {
                    continue;
                }
                let Some(neighbor) = data.nodes.get(neighbor_id) else {
                    continue;
                };
                visited.insert(neighbor_id, ());

                let mut next_nodes = path_nodes.clone();
                next_nodes.push(neighbor);
                let mut next_rels = path_rels.clone();
                next_rels.push((*rel).clone());

                paths.push(GraphPath {
                    nodes: next_nodes.iter().map(|n| (*n).clone()).collect(),
                    rels: next_rels.clone(),
                });
                queue.push_back((next_nodes, next_rels));
            }
        }

        Ok(paths)
    }

    async fn create_nodes(&self, label: &NodeLabel, nodes: &[GraphNode]) -> Result<BatchOutcome> {
        self.ensure_connected()?;
        let mut data = self.inner.write().await;
        let mut outcome = BatchOutcome::default();

        for node in nodes {
            if node.id.is_empty() {
                outcome
                    .errors
                    .push(format!("{label} node rejected: empty id"));
                continue;
            }
            let mut node = node.clone();
            node.label = label.clone();
            data.nodes.insert(node.id.clone(), node);
            outcome.created += 1;
        }

        Ok(outcome)
    }

    async fn create_relationships(&self, edges: &[GraphEdge]) -> Result<BatchOutcome> {
        self.ensure_connected()?;
        let mut data = self.inner.write().await;
        let mut outcome = BatchOutcome::default();

        for edge in edges {
            if !data.nodes.contains_key(&edge.from_id) || !data.nodes.contains_key(&edge.to_id) {
                outcome.errors.push(format!(
                    "{} -[{}]-> {}: unresolved endpoint",
                    edge.from_id, edge.rel_type, edge.to_id
                ));
                continue;
            }

            // Upsert on (from, to, type) so repeated syncs stay idempotent.
            if let Some(existing) = data.edges.iter_mut().find(|e| {
                e.from_id == edge.from_id && e.to_id == edge.to_id && e.rel_type == edge.rel_type
            }) {
                *existing = edge.clone();
            } else {
                data.edges.push(edge.clone());
            }
            outcome.created += 1;
        }

        Ok(outcome)
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<(GraphNode, f32)>> {
        self.ensure_connected()?;
        let data = self.inner.read().await;

        let mut scored: Vec<(GraphNode, f32)> = data
            .nodes
            .values()
            .filter_map(|n| {
                let stored = n.embedding()?;
                Some((n.clone(), cosine_similarity(embedding, &stored)))
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn keyword_search(&self, term: &str, limit: usize) -> Result<Vec<GraphNode>> {
        self.ensure_connected()?;
        let needle = term.to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let data = self.inner.read().await;
        let mut matched: Vec<GraphNode> = data
            .nodes
            .values()
            .filter(|n| {
                TEXT_PROPERTIES.iter().any(|key| {
                    n.property_str(key)
                        .is_some_and(|v| v.to_lowercase().contains(&needle))
                })
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched.truncate(limit);
        Ok(matched)
    }

    async fn update_sync_status(&self, status: &SyncStatus) -> Result<()> {
        self.ensure_connected()?;
        self.inner.write().await.last_status = Some(status.clone());
        Ok(())
    }

    async fn stats(&self) -> Result<GraphStats> {
        self.ensure_connected()?;
        let data = self.inner.read().await;
        let mut stats = GraphStats {
            node_count: data.nodes.len(),
            edge_count: data.edges.len(),
            ..Default::default()
        };
        for node in data.nodes.values() {
            *stats.labels.entry(node.label.as_str().to_string()).or_insert(0) += 1;
        }
        Ok(stats)
    }

    async fn clear(&self) -> Result<()> {
        self.ensure_connected()?;
        let mut data = self.inner.write().await;
        data.nodes.clear();
        data.edges.clear();
        Ok(())
    }
}
