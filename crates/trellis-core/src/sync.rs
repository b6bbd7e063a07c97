//! Graph sync pipeline
//!
//! Ingests a [`ProjectSnapshot`] into the graph store in three ordered
//! phases: nodes, relationships, similarity edges. Node ids prefer an
//! externally supplied stable id and otherwise fall back to a
//! deterministic hash of (scope, label, natural key), which makes
//! re-syncs upsert instead of duplicate. Shared entity labels (people by
//! default) hash with a project-independent scope so the same person
//! links up across projects.
//!
//! Per-record problems (missing natural key, unresolvable edge endpoint)
//! are counted and skipped; the batch continues. A store failure aborts
//! the remaining phases, leaves what was committed, and is surfaced
//! through a `failed` sync status.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::graph::store::{GraphStore, SyncStatus};
use crate::graph::types::{deterministic_node_id, GraphEdge, GraphNode, NodeLabel, RelType};
use crate::llm::provider::Provider;
use crate::ontology::Ontology;
use crate::project::{ProjectSnapshot, ProjectStore};

/// Scope used for deterministic ids of shared entity labels.
const SHARED_SCOPE: &str = "shared";

/// Shortest person name considered for free-text mention matching.
const MIN_MENTION_NAME_CHARS: usize = 5;

/// What a sync run should do beyond the node/relationship phases.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Wipe the graph first and rebuild from scratch.
    pub clear: bool,
    /// Materialize `SIMILAR_TO` edges from precomputed similarity pairs.
    pub compute_similarity: bool,
    /// Embed record text and attach vectors under an `embedding` property.
    pub generate_embeddings: bool,
}

/// Which phase an error was recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Nodes,
    Relationships,
    Similarity,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nodes => "nodes",
            Self::Relationships => "relationships",
            Self::Similarity => "similarity",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded, non-fatal problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncError {
    pub phase: SyncPhase,
    pub message: String,
}

impl SyncError {
    fn new(phase: SyncPhase, message: impl Into<String>) -> Self {
        Self { phase, message: message.into() }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.phase, self.message)
    }
}

/// Counts and problems from one sync run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    /// Correlates this run's log lines when syncs overlap.
    pub run_id: String,
    pub project: String,
    /// Nodes created or upserted.
    pub nodes: usize,
    /// Edges created or refreshed.
    pub edges: usize,
    /// Records skipped for lacking a usable natural key.
    pub skipped_records: usize,
    /// Edges dropped because an endpoint did not resolve.
    pub skipped_edges: usize,
    pub errors: Vec<SyncError>,
    pub duration_ms: u64,
}

/// Maps record references (ids, natural keys, names, emails) to node ids
/// built during the node phase. First registration of an alias wins.
struct RemapTable {
    entries: HashMap<String, String>,
}

impl RemapTable {
    fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    fn register(&mut self, label: &NodeLabel, alias: &str, node_id: &str) {
        let alias = alias.trim();
        if alias.is_empty() {
            return;
        }
        self.entries
            .entry(format!("{}:{}", label.as_str(), alias.to_lowercase()))
            .or_insert_with(|| node_id.to_string());
    }

    fn resolve(&self, label: &NodeLabel, reference: &str) -> Option<String> {
        let key = format!("{}:{}", label.as_str(), reference.trim().to_lowercase());
        self.entries.get(&key).cloned()
    }
}

/// Three-phase ingest of project records into the graph.
pub struct SyncPipeline {
    store: Arc<dyn GraphStore>,
    projects: Arc<dyn ProjectStore>,
    provider: Arc<dyn Provider>,
    ontology: Arc<dyn Ontology>,
    config: SyncConfig,
}

impl SyncPipeline {
    pub fn new(
        store: Arc<dyn GraphStore>,
        projects: Arc<dyn ProjectStore>,
        provider: Arc<dyn Provider>,
        ontology: Arc<dyn Ontology>,
        config: SyncConfig,
    ) -> Self {
        Self { store, projects, provider, ontology, config }
    }

    /// Run a full sync for one project. The sync status record moves
    /// syncing -> idle on success and syncing -> failed on error; a
    /// failure to report status never aborts the pipeline itself.
    pub async fn sync(&self, project: &str, options: SyncOptions) -> Result<SyncReport> {
        let run_id = Uuid::new_v4().to_string();
        info!(
            run = %run_id,
            project,
            clear = options.clear,
            similarity = options.compute_similarity,
            embeddings = options.generate_embeddings,
            "starting graph sync"
        );
        if let Err(e) = self.store.update_sync_status(&SyncStatus::syncing()).await {
            error!(error = %e, "failed to report syncing status");
        }

        match self.run(project, options, run_id).await {
            Ok(report) => {
                let (nodes, edges) = match self.store.stats().await {
                    Ok(stats) => (stats.node_count, stats.edge_count),
                    Err(_) => (report.nodes, report.edges),
                };
                if let Err(e) = self.store.update_sync_status(&SyncStatus::idle(nodes, edges)).await
                {
                    error!(error = %e, "failed to report idle status");
                }
                info!(
                    run = %report.run_id,
                    project,
                    nodes = report.nodes,
                    edges = report.edges,
                    skipped_records = report.skipped_records,
                    skipped_edges = report.skipped_edges,
                    errors = report.errors.len(),
                    duration_ms = report.duration_ms,
                    "graph sync complete"
                );
                Ok(report)
            }
            Err(e) => {
                if let Err(se) = self
                    .store
                    .update_sync_status(&SyncStatus::failed(e.to_string()))
                    .await
                {
                    error!(error = %se, "failed to report failed status");
                }
                Err(e)
            }
        }
    }

    async fn run(&self, project: &str, options: SyncOptions, run_id: String) -> Result<SyncReport> {
        let started = Instant::now();
        let snapshot = self.projects.snapshot(project).await?;
        debug!(records = snapshot.record_count(), "loaded project snapshot");

        if options.clear {
            self.store
                .clear()
                .await
                .map_err(|e| Error::Sync(format!("graph clear failed: {e}")))?;
            info!(project, "cleared graph for full rebuild");
        }

        let mut report = SyncReport {
            run_id,
            project: project.to_string(),
            ..SyncReport::default()
        };
        let mut remap = RemapTable::new();

        self.sync_nodes(&snapshot, options, &mut remap, &mut report).await?;
        self.sync_relationships(&snapshot, &remap, &mut report).await?;
        if options.compute_similarity {
            self.sync_similarity(&snapshot, &remap, &mut report).await;
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    /// Deterministic id scope: shared labels hash without the project so
    /// the same record converges across projects.
    fn id_scope<'a>(&self, project: &'a str, label: &NodeLabel) -> &'a str {
        if self.ontology.is_shared_entity(label) {
            SHARED_SCOPE
        } else {
            project
        }
    }

    // Phase 1: nodes

    async fn sync_nodes(
        &self,
        snapshot: &ProjectSnapshot,
        options: SyncOptions,
        remap: &mut RemapTable,
        report: &mut SyncReport,
    ) -> Result<()> {
        let mut embeddings_alive = options.generate_embeddings;

        let people = self.build_people(snapshot, remap, report);
        self.upsert_nodes(&NodeLabel::Person, people, false, &mut embeddings_alive, report)
            .await?;

        let documents = self.build_documents(snapshot, remap, report);
        self.upsert_nodes(&NodeLabel::Document, documents, true, &mut embeddings_alive, report)
            .await?;

        let tasks = self.build_tasks(snapshot, remap, report);
        self.upsert_nodes(&NodeLabel::Task, tasks, true, &mut embeddings_alive, report)
            .await?;

        let decisions = self.build_decisions(snapshot, remap, report);
        self.upsert_nodes(&NodeLabel::Decision, decisions, true, &mut embeddings_alive, report)
            .await?;

        let risks = self.build_risks(snapshot, remap, report);
        self.upsert_nodes(&NodeLabel::Risk, risks, false, &mut embeddings_alive, report)
            .await?;

        let communications = self.build_communications(snapshot, remap, report);
        self.upsert_nodes(
            &NodeLabel::Communication,
            communications,
            true,
            &mut embeddings_alive,
            report,
        )
        .await?;

        Ok(())
    }

    async fn upsert_nodes(
        &self,
        label: &NodeLabel,
        mut nodes: Vec<GraphNode>,
        embeddable: bool,
        embeddings_alive: &mut bool,
        report: &mut SyncReport,
    ) -> Result<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        if embeddable && *embeddings_alive {
            self.attach_embeddings(&mut nodes, embeddings_alive, report).await;
        }

        for chunk in nodes.chunks(self.config.batch_size.max(1)) {
            let outcome = self
                .store
                .create_nodes(label, chunk)
                .await
                .map_err(|e| Error::Sync(format!("{label} node upsert failed: {e}")))?;
            report.nodes += outcome.created;
            for message in outcome.errors {
                report.errors.push(SyncError::new(SyncPhase::Nodes, message));
            }
        }
        Ok(())
    }

    /// Embed node text in batches. A provider failure degrades the rest
    /// of the run to no-embedding nodes with a single recorded error.
    async fn attach_embeddings(
        &self,
        nodes: &mut [GraphNode],
        embeddings_alive: &mut bool,
        report: &mut SyncReport,
    ) {
        let indexed: Vec<(usize, String)> = nodes
            .iter()
            .enumerate()
            .filter_map(|(i, node)| embeddable_text(node).map(|text| (i, text)))
            .collect();

        for chunk in indexed.chunks(self.config.batch_size.max(1)) {
            let texts: Vec<String> = chunk.iter().map(|(_, text)| text.clone()).collect();
            match self.provider.embed(&texts).await {
                Ok(vectors) if vectors.len() == chunk.len() => {
                    for ((index, _), vector) in chunk.iter().zip(vectors) {
                        nodes[*index]
                            .properties
                            .insert("embedding".to_string(), Value::from(vector));
                    }
                }
                Ok(vectors) => {
                    warn!(
                        expected = chunk.len(),
                        got = vectors.len(),
                        "embedding count mismatch, continuing without embeddings"
                    );
                    report.errors.push(SyncError::new(
                        SyncPhase::Nodes,
                        "embedding count mismatch, remaining nodes stored without embeddings",
                    ));
                    *embeddings_alive = false;
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "embedding failed, continuing without embeddings");
                    report.errors.push(SyncError::new(
                        SyncPhase::Nodes,
                        format!("embedding failed, remaining nodes stored without embeddings: {e}"),
                    ));
                    *embeddings_alive = false;
                    return;
                }
            }
        }
    }

    fn build_people(
        &self,
        snapshot: &ProjectSnapshot,
        remap: &mut RemapTable,
        report: &mut SyncReport,
    ) -> Vec<GraphNode> {
        let label = NodeLabel::Person;
        let scope = self.id_scope(&snapshot.project, &label);
        let mut nodes = Vec::with_capacity(snapshot.people.len());

        for person in &snapshot.people {
            let Some(key) = person.natural_key() else {
                skip_record(report, "person record without name or email");
                continue;
            };
            let id = person
                .id
                .clone()
                .unwrap_or_else(|| deterministic_node_id(scope, &label, &key));

            let mut node = GraphNode::new(&id, label.clone())
                .with_property("name", person.name.trim())
                .with_property("project", snapshot.project.as_str());
            if let Some(email) = non_empty(&person.email) {
                node = node.with_property("email", email);
            }
            if let Some(role) = non_empty(&person.role) {
                node = node.with_property("role", role);
            }
            if let Some(organization) = non_empty(&person.organization) {
                node = node.with_property("organization", organization);
            }

            remap.register(&label, &key, &id);
            remap.register(&label, &person.name, &id);
            if let Some(email) = non_empty(&person.email) {
                remap.register(&label, email, &id);
            }
            if let Some(external) = non_empty(&person.id) {
                remap.register(&label, external, &id);
            }
            nodes.push(node);
        }
        nodes
    }

    fn build_documents(
        &self,
        snapshot: &ProjectSnapshot,
        remap: &mut RemapTable,
        report: &mut SyncReport,
    ) -> Vec<GraphNode> {
        let label = NodeLabel::Document;
        let scope = self.id_scope(&snapshot.project, &label);
        let mut nodes = Vec::with_capacity(snapshot.documents.len());

        for document in &snapshot.documents {
            let Some(key) = document.natural_key() else {
                skip_record(report, "document record without title");
                continue;
            };
            let id = document
                .id
                .clone()
                .unwrap_or_else(|| deterministic_node_id(scope, &label, &key));

            let mut node = GraphNode::new(&id, label.clone())
                .with_property("title", document.title.trim())
                .with_property("content", document.content.as_str())
                .with_property("project", snapshot.project.as_str());
            if let Some(url) = non_empty(&document.url) {
                node = node.with_property("url", url);
            }
            if let Some(created_at) = document.created_at {
                node = node.with_property("created_at", created_at.to_rfc3339());
            }

            remap.register(&label, &key, &id);
            if let Some(external) = non_empty(&document.id) {
                remap.register(&label, external, &id);
            }
            nodes.push(node);
        }
        nodes
    }

    fn build_tasks(
        &self,
        snapshot: &ProjectSnapshot,
        remap: &mut RemapTable,
        report: &mut SyncReport,
    ) -> Vec<GraphNode> {
        let label = NodeLabel::Task;
        let scope = self.id_scope(&snapshot.project, &label);
        let mut nodes = Vec::with_capacity(snapshot.tasks.len());

        for task in &snapshot.tasks {
            let Some(key) = task.natural_key() else {
                skip_record(report, "task record without title");
                continue;
            };
            let id = task
                .id
                .clone()
                .unwrap_or_else(|| deterministic_node_id(scope, &label, &key));

            let mut node = GraphNode::new(&id, label.clone())
                .with_property("title", task.title.trim())
                .with_property("project", snapshot.project.as_str());
            if let Some(description) = non_empty(&task.description) {
                node = node.with_property("description", description);
            }
            if let Some(status) = non_empty(&task.status) {
                node = node.with_property("status", status);
            }
            if let Some(due_date) = task.due_date {
                node = node.with_property("due_date", due_date.to_rfc3339());
            }

            remap.register(&label, &key, &id);
            if let Some(external) = non_empty(&task.id) {
                remap.register(&label, external, &id);
            }
            nodes.push(node);
        }
        nodes
    }

    fn build_decisions(
        &self,
        snapshot: &ProjectSnapshot,
        remap: &mut RemapTable,
        report: &mut SyncReport,
    ) -> Vec<GraphNode> {
        let label = NodeLabel::Decision;
        let scope = self.id_scope(&snapshot.project, &label);
        let mut nodes = Vec::with_capacity(snapshot.decisions.len());

        for decision in &snapshot.decisions {
            let Some(key) = decision.natural_key() else {
                skip_record(report, "decision record without title");
                continue;
            };
            let id = decision
                .id
                .clone()
                .unwrap_or_else(|| deterministic_node_id(scope, &label, &key));

            let mut node = GraphNode::new(&id, label.clone())
                .with_property("title", decision.title.trim())
                .with_property("project", snapshot.project.as_str());
            if let Some(rationale) = non_empty(&decision.rationale) {
                node = node.with_property("rationale", rationale);
            }
            if let Some(decided_at) = decision.decided_at {
                node = node.with_property("decided_at", decided_at.to_rfc3339());
            }

            remap.register(&label, &key, &id);
            if let Some(external) = non_empty(&decision.id) {
                remap.register(&label, external, &id);
            }
            nodes.push(node);
        }
        nodes
    }

    fn build_risks(
        &self,
        snapshot: &ProjectSnapshot,
        remap: &mut RemapTable,
        report: &mut SyncReport,
    ) -> Vec<GraphNode> {
        let label = NodeLabel::Risk;
        let scope = self.id_scope(&snapshot.project, &label);
        let mut nodes = Vec::with_capacity(snapshot.risks.len());

        for risk in &snapshot.risks {
            let Some(key) = risk.natural_key() else {
                skip_record(report, "risk record without title");
                continue;
            };
            let id = risk
                .id
                .clone()
                .unwrap_or_else(|| deterministic_node_id(scope, &label, &key));

            let mut node = GraphNode::new(&id, label.clone())
                .with_property("title", risk.title.trim())
                .with_property("project", snapshot.project.as_str());
            if let Some(severity) = non_empty(&risk.severity) {
                node = node.with_property("severity", severity);
            }
            if let Some(status) = non_empty(&risk.status) {
                node = node.with_property("status", status);
            }

            remap.register(&label, &key, &id);
            if let Some(external) = non_empty(&risk.id) {
                remap.register(&label, external, &id);
            }
            nodes.push(node);
        }
        nodes
    }

    fn build_communications(
        &self,
        snapshot: &ProjectSnapshot,
        remap: &mut RemapTable,
        report: &mut SyncReport,
    ) -> Vec<GraphNode> {
        let label = NodeLabel::Communication;
        let scope = self.id_scope(&snapshot.project, &label);
        let mut nodes = Vec::with_capacity(snapshot.communications.len());

        for communication in &snapshot.communications {
            let Some(key) = communication.natural_key() else {
                skip_record(report, "communication record without external id or subject");
                continue;
            };
            let id = deterministic_node_id(scope, &label, &key);

            let mut node = GraphNode::new(&id, label.clone())
                .with_property("subject", communication.subject.trim())
                .with_property("content", communication.content.as_str())
                .with_property("project", snapshot.project.as_str());
            if let Some(channel) = non_empty(&communication.channel) {
                node = node.with_property("channel", channel);
            }
            if let Some(sent_at) = communication.sent_at {
                node = node.with_property("sent_at", sent_at.to_rfc3339());
            }

            remap.register(&label, &key, &id);
            if let Some(external) = non_empty(&communication.external_id) {
                remap.register(&label, external, &id);
            }
            nodes.push(node);
        }
        nodes
    }

    // Phase 2: relationships

    async fn sync_relationships(
        &self,
        snapshot: &ProjectSnapshot,
        remap: &RemapTable,
        report: &mut SyncReport,
    ) -> Result<()> {
        let mut edges: Vec<GraphEdge> = Vec::new();
        let person = NodeLabel::Person;

        for record in &snapshot.people {
            let Some(from) = record
                .natural_key()
                .and_then(|key| remap.resolve(&person, &key))
            else {
                continue;
            };
            if let Some(manager) = non_empty(&record.manager) {
                match remap.resolve(&person, manager) {
                    Some(to) if to != from => {
                        edges.push(GraphEdge::new(&from, &to, RelType::ReportsTo));
                    }
                    Some(_) => {}
                    None => drop_edge(report, "manager", manager, &record.name),
                }
            }
        }

        for record in &snapshot.documents {
            let Some(doc_id) = record
                .natural_key()
                .and_then(|key| remap.resolve(&NodeLabel::Document, &key))
            else {
                continue;
            };
            if let Some(author) = non_empty(&record.author) {
                match remap.resolve(&person, author) {
                    Some(author_id) => {
                        edges.push(GraphEdge::new(&author_id, &doc_id, RelType::Authored));
                    }
                    None => drop_edge(report, "author", author, &record.title),
                }
            }
        }

        for record in &snapshot.tasks {
            let Some(task_id) = record
                .natural_key()
                .and_then(|key| remap.resolve(&NodeLabel::Task, &key))
            else {
                continue;
            };
            if let Some(assignee) = non_empty(&record.assignee) {
                match remap.resolve(&person, assignee) {
                    Some(person_id) => {
                        edges.push(GraphEdge::new(&task_id, &person_id, RelType::AssignedTo));
                    }
                    None => drop_edge(report, "assignee", assignee, &record.title),
                }
            }
            if let Some(mitigated) = non_empty(&record.mitigates) {
                match remap.resolve(&NodeLabel::Risk, mitigated) {
                    Some(risk_id) => {
                        edges.push(GraphEdge::new(&task_id, &risk_id, RelType::Mitigates));
                    }
                    None => drop_edge(report, "mitigates", mitigated, &record.title),
                }
            }
        }

        for record in &snapshot.decisions {
            let Some(decision_id) = record
                .natural_key()
                .and_then(|key| remap.resolve(&NodeLabel::Decision, &key))
            else {
                continue;
            };
            if let Some(decider) = non_empty(&record.decided_by) {
                match remap.resolve(&person, decider) {
                    Some(person_id) => {
                        edges.push(GraphEdge::new(&person_id, &decision_id, RelType::Decided));
                    }
                    None => drop_edge(report, "decided_by", decider, &record.title),
                }
            }
            for reference in &record.references {
                let Some(reference) = non_empty_str(reference) else { continue };
                match remap.resolve(&NodeLabel::Document, reference) {
                    Some(doc_id) => {
                        edges.push(GraphEdge::new(&decision_id, &doc_id, RelType::References));
                    }
                    None => drop_edge(report, "reference", reference, &record.title),
                }
            }
        }

        for record in &snapshot.risks {
            let Some(risk_id) = record
                .natural_key()
                .and_then(|key| remap.resolve(&NodeLabel::Risk, &key))
            else {
                continue;
            };
            if let Some(owner) = non_empty(&record.owner) {
                match remap.resolve(&person, owner) {
                    Some(person_id) => {
                        edges.push(GraphEdge::new(&person_id, &risk_id, RelType::Owns));
                    }
                    None => drop_edge(report, "owner", owner, &record.title),
                }
            }
        }

        let mention_index = mention_index(snapshot, remap);
        for record in &snapshot.communications {
            let Some(comm_id) = record
                .natural_key()
                .and_then(|key| remap.resolve(&NodeLabel::Communication, &key))
            else {
                continue;
            };
            if let Some(sender) = non_empty(&record.sender) {
                match remap.resolve(&person, sender) {
                    Some(person_id) => {
                        edges.push(GraphEdge::new(&person_id, &comm_id, RelType::Authored));
                    }
                    None => drop_edge(report, "sender", sender, &record.subject),
                }
            }
            for participant in &record.participants {
                let Some(participant) = non_empty_str(participant) else { continue };
                match remap.resolve(&person, participant) {
                    Some(person_id) => {
                        edges.push(GraphEdge::new(&person_id, &comm_id, RelType::ParticipatedIn));
                    }
                    None => drop_edge(report, "participant", participant, &record.subject),
                }
            }
            // Free-text mention matching against known person names.
            let content = record.content.to_lowercase();
            for (name, person_id) in &mention_index {
                if *person_id != comm_id && content.contains(name.as_str()) {
                    edges.push(GraphEdge::new(&comm_id, person_id, RelType::Mentions));
                }
            }
        }

        for chunk in edges.chunks(self.config.batch_size.max(1)) {
            let outcome = self
                .store
                .create_relationships(chunk)
                .await
                .map_err(|e| Error::Sync(format!("relationship upsert failed: {e}")))?;
            report.edges += outcome.created;
            for message in outcome.errors {
                report.skipped_edges += 1;
                report.errors.push(SyncError::new(SyncPhase::Relationships, message));
            }
        }
        Ok(())
    }

    // Phase 3: similarity edges

    async fn sync_similarity(
        &self,
        snapshot: &ProjectSnapshot,
        remap: &RemapTable,
        report: &mut SyncReport,
    ) {
        let mut edges: Vec<GraphEdge> = Vec::new();
        for pair in &snapshot.similarities {
            if pair.score < self.config.similarity_threshold {
                continue;
            }
            let first = remap.resolve(&pair.label, &pair.first);
            let second = remap.resolve(&pair.label, &pair.second);
            match (first, second) {
                (Some(a), Some(b)) if a != b => {
                    edges.push(
                        GraphEdge::new(a, b, RelType::SimilarTo)
                            .with_property("score", pair.score),
                    );
                }
                (Some(_), Some(_)) => {}
                _ => {
                    report.skipped_edges += 1;
                    report.errors.push(SyncError::new(
                        SyncPhase::Similarity,
                        format!(
                            "similarity pair '{}' / '{}' did not resolve",
                            pair.first, pair.second
                        ),
                    ));
                }
            }
        }

        for chunk in edges.chunks(self.config.batch_size.max(1)) {
            match self.store.create_relationships(chunk).await {
                Ok(outcome) => {
                    report.edges += outcome.created;
                    for message in outcome.errors {
                        report.skipped_edges += 1;
                        report.errors.push(SyncError::new(SyncPhase::Similarity, message));
                    }
                }
                Err(e) => {
                    // Non-fatal by design: similarity edges are an extra.
                    warn!(error = %e, "similarity edge upsert failed");
                    report.errors.push(SyncError::new(
                        SyncPhase::Similarity,
                        format!("similarity edge upsert failed: {e}"),
                    ));
                    return;
                }
            }
        }
    }
}

/// Person names long enough to match against free text, with their ids.
fn mention_index(snapshot: &ProjectSnapshot, remap: &RemapTable) -> Vec<(String, String)> {
    let person = NodeLabel::Person;
    snapshot
        .people
        .iter()
        .filter_map(|p| {
            let name = p.name.trim().to_lowercase();
            if name.chars().count() < MIN_MENTION_NAME_CHARS {
                return None;
            }
            remap.resolve(&person, &name).map(|id| (name, id))
        })
        .collect()
}

fn skip_record(report: &mut SyncReport, message: &str) {
    warn!(message, "skipping record");
    report.skipped_records += 1;
    report.errors.push(SyncError::new(SyncPhase::Nodes, format!("{message}, skipped")));
}

fn drop_edge(report: &mut SyncReport, kind: &str, reference: &str, owner: &str) {
    warn!(kind, reference, owner, "dropping edge with unresolvable endpoint");
    report.skipped_edges += 1;
    report.errors.push(SyncError::new(
        SyncPhase::Relationships,
        format!("{kind} reference '{reference}' on '{owner}' did not resolve"),
    ));
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().and_then(non_empty_str)
}

fn non_empty_str(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Text worth embedding: display fields plus body fields, joined.
fn embeddable_text(node: &GraphNode) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for key in ["title", "name", "subject", "content", "description", "rationale"] {
        if let Some(value) = node.property_str(key)
            && !value.trim().is_empty()
        {
            parts.push(value);
        }
    }
    if parts.is_empty() { None } else { Some(parts.join(". ")) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::memory::MemoryGraph;
    use crate::graph::store::NodeFilter;
    use crate::llm::mock::MockProvider;
    use crate::ontology::StaticOntology;
    use crate::project::{
        CommunicationRecord, DecisionRecord, DocumentRecord, InMemoryProjectStore, PersonRecord,
        ProjectSnapshot, RiskRecord, SimilarityRecord, TaskRecord,
    };

    fn fixture_snapshot() -> ProjectSnapshot {
        let mut snapshot = ProjectSnapshot::new("atlas");
        snapshot.people.push(
            PersonRecord::new("Ada Lovelace")
                .with_email("ada@atlas.dev")
                .with_manager("Grace Hopper"),
        );
        snapshot
            .people
            .push(PersonRecord::new("Grace Hopper").with_email("grace@atlas.dev"));
        snapshot.documents.push(
            DocumentRecord::new("Migration Plan", "Plan to migrate the database before Q3.")
                .with_author("Ada Lovelace"),
        );
        snapshot.documents.push(
            DocumentRecord::new("Rollback Strategy", "How we roll back if migration fails.")
                .with_author("grace@atlas.dev"),
        );
        let mut task = TaskRecord::new("Database migration")
            .with_assignee("ada@atlas.dev")
            .with_status("open");
        task.mitigates = Some("Data loss during migration".to_string());
        snapshot.tasks.push(task);
        let mut decision =
            DecisionRecord::new("Use blue-green deployment").with_decided_by("Grace Hopper");
        decision.references.push("Migration Plan".to_string());
        snapshot.decisions.push(decision);
        snapshot.risks.push(
            RiskRecord::new("Data loss during migration").with_owner("Ada Lovelace"),
        );
        snapshot.communications.push(
            CommunicationRecord::new(
                "Migration kickoff",
                "Discussed the migration plan with Grace Hopper.",
            )
            .with_sender("Ada Lovelace")
            .with_participant("Grace Hopper"),
        );
        snapshot.similarities.push(SimilarityRecord {
            label: NodeLabel::Document,
            first: "migration plan".to_string(),
            second: "rollback strategy".to_string(),
            score: 0.82,
        });
        snapshot.similarities.push(SimilarityRecord {
            label: NodeLabel::Document,
            first: "migration plan".to_string(),
            second: "rollback strategy".to_string(),
            score: 0.4,
        });
        snapshot
    }

    async fn pipeline_with(
        snapshot: ProjectSnapshot,
    ) -> (SyncPipeline, Arc<MemoryGraph>, Arc<MockProvider>) {
        let store = Arc::new(MemoryGraph::new());
        let projects = Arc::new(InMemoryProjectStore::new());
        projects.put(snapshot).await;
        let provider = Arc::new(MockProvider::new());
        let ontology = Arc::new(StaticOntology::project_default());
        let pipeline = SyncPipeline::new(
            store.clone(),
            projects,
            provider.clone(),
            ontology,
            SyncConfig::default(),
        );
        (pipeline, store, provider)
    }

    #[tokio::test]
    async fn test_full_sync_builds_nodes_and_edges() {
        let (pipeline, store, _) = pipeline_with(fixture_snapshot()).await;

        let report = pipeline.sync("atlas", SyncOptions::default()).await.unwrap();

        assert_eq!(report.nodes, 8);
        // reports_to, 2x authored, assigned_to, mitigates, decided,
        // references, owns, comm authored, participated_in, mentions
        assert_eq!(report.edges, 11);
        assert_eq!(report.skipped_edges, 0);
        assert!(report.errors.is_empty());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.node_count, 8);
        assert_eq!(stats.edge_count, 11);
        assert_eq!(stats.labels.get("Person"), Some(&2));
    }

    #[tokio::test]
    async fn test_sync_is_idempotent_with_clear() {
        let (pipeline, store, _) = pipeline_with(fixture_snapshot()).await;
        let options = SyncOptions { clear: true, ..SyncOptions::default() };

        let first = pipeline.sync("atlas", options).await.unwrap();
        let second = pipeline.sync("atlas", options).await.unwrap();

        assert_eq!(first.nodes, second.nodes);
        assert_eq!(first.edges, second.edges);
        assert_ne!(first.run_id, second.run_id);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.node_count, first.nodes);
        assert_eq!(stats.edge_count, first.edges);
    }

    #[tokio::test]
    async fn test_additive_rerun_does_not_duplicate() {
        let (pipeline, store, _) = pipeline_with(fixture_snapshot()).await;

        pipeline.sync("atlas", SyncOptions::default()).await.unwrap();
        pipeline.sync("atlas", SyncOptions::default()).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.node_count, 8);
        assert_eq!(stats.edge_count, 11);
    }

    #[tokio::test]
    async fn test_ids_are_deterministic_across_stores() {
        let (first_pipeline, first_store, _) = pipeline_with(fixture_snapshot()).await;
        let (second_pipeline, second_store, _) = pipeline_with(fixture_snapshot()).await;

        first_pipeline.sync("atlas", SyncOptions::default()).await.unwrap();
        second_pipeline.sync("atlas", SyncOptions::default()).await.unwrap();

        let filter = NodeFilter::any().equals("email", "ada@atlas.dev");
        let a = first_store.find_nodes(&NodeLabel::Person, &filter, 1).await.unwrap();
        let b = second_store.find_nodes(&NodeLabel::Person, &filter, 1).await.unwrap();
        assert_eq!(a[0].id, b[0].id);
    }

    #[tokio::test]
    async fn test_missing_natural_key_skips_record() {
        let mut snapshot = fixture_snapshot();
        snapshot.people.push(PersonRecord::new("   "));
        let (pipeline, _, _) = pipeline_with(snapshot).await;

        let report = pipeline.sync("atlas", SyncOptions::default()).await.unwrap();

        assert_eq!(report.skipped_records, 1);
        assert_eq!(report.nodes, 8);
        assert!(report
            .errors
            .iter()
            .any(|e| e.phase == SyncPhase::Nodes && e.message.contains("without name or email")));
    }

    #[tokio::test]
    async fn test_dangling_reference_drops_edge_and_continues() {
        let mut snapshot = fixture_snapshot();
        snapshot
            .tasks
            .push(TaskRecord::new("Orphan task").with_assignee("nobody@nowhere.dev"));
        let (pipeline, _, _) = pipeline_with(snapshot).await;

        let report = pipeline.sync("atlas", SyncOptions::default()).await.unwrap();

        assert_eq!(report.skipped_edges, 1);
        assert_eq!(report.edges, 11);
        assert!(report
            .errors
            .iter()
            .any(|e| e.phase == SyncPhase::Relationships && e.message.contains("nobody@nowhere")));
    }

    #[tokio::test]
    async fn test_similarity_edges_respect_threshold() {
        let (pipeline, store, _) = pipeline_with(fixture_snapshot()).await;
        let options = SyncOptions { compute_similarity: true, ..SyncOptions::default() };

        let report = pipeline.sync("atlas", options).await.unwrap();

        // Only the 0.82 pair clears the default 0.75 threshold.
        assert_eq!(report.edges, 12);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.edge_count, 12);
    }

    #[tokio::test]
    async fn test_embeddings_attached_when_requested() {
        let (pipeline, store, provider) = pipeline_with(fixture_snapshot()).await;
        let options = SyncOptions { generate_embeddings: true, ..SyncOptions::default() };

        pipeline.sync("atlas", options).await.unwrap();

        assert!(provider.embedding_calls() > 0);
        let docs = store
            .find_nodes(&NodeLabel::Document, &NodeFilter::any(), 10)
            .await
            .unwrap();
        assert!(docs.iter().all(|d| d.embedding().is_some()));
        let people = store
            .find_nodes(&NodeLabel::Person, &NodeFilter::any(), 10)
            .await
            .unwrap();
        assert!(people.iter().all(|p| p.embedding().is_none()));
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades_not_fatal() {
        let (pipeline, store, provider) = pipeline_with(fixture_snapshot()).await;
        provider.fail_embedding(true);
        let options = SyncOptions { generate_embeddings: true, ..SyncOptions::default() };

        let report = pipeline.sync("atlas", options).await.unwrap();

        assert_eq!(report.nodes, 8);
        assert!(report.errors.iter().any(|e| e.message.contains("embedding failed")));
        let docs = store
            .find_nodes(&NodeLabel::Document, &NodeFilter::any(), 10)
            .await
            .unwrap();
        assert!(docs.iter().all(|d| d.embedding().is_none()));
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let (pipeline, store, _) = pipeline_with(fixture_snapshot()).await;

        pipeline.sync("atlas", SyncOptions::default()).await.unwrap();
        let status = store.last_sync_status().await.unwrap();
        assert_eq!(status.state, crate::graph::store::SyncState::Idle);
        assert_eq!(status.node_count, 8);
        assert_eq!(status.edge_count, 11);

        let missing = pipeline.sync("unknown-project", SyncOptions::default()).await;
        assert!(missing.is_err());
        let status = store.last_sync_status().await.unwrap();
        assert_eq!(status.state, crate::graph::store::SyncState::Failed);
        assert!(status.message.is_some());
    }

    #[tokio::test]
    async fn test_store_failure_is_fatal_and_reported() {
        let (pipeline, store, _) = pipeline_with(fixture_snapshot()).await;
        store.set_connected(false);

        let result = pipeline.sync("atlas", SyncOptions::default()).await;
        assert!(matches!(result, Err(Error::Sync(_))));
    }

    #[tokio::test]
    async fn test_mentions_resolved_from_free_text() {
        let (pipeline, store, _) = pipeline_with(fixture_snapshot()).await;
        pipeline.sync("atlas", SyncOptions::default()).await.unwrap();

        let comms = store
            .find_nodes(&NodeLabel::Communication, &NodeFilter::any(), 10)
            .await
            .unwrap();
        let paths = store
            .traverse(&comms[0].id, &[RelType::Mentions], 1)
            .await
            .unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].endpoint().unwrap().display_name(), "Grace Hopper");
    }
}
