//! Project data store collaborator
//!
//! Source-of-truth records the sync pipeline reads and maps into the
//! graph. Six collections (people, documents, tasks, decisions, risks,
//! communications) plus precomputed similarity pairs, bundled into a
//! [`ProjectSnapshot`]. The structural searcher also scans snapshots as
//! its fallback when the graph store is unreachable.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::graph::types::NodeLabel;

/// A person involved in the project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonRecord {
    /// Externally assigned stable id, when the source system has one
    pub id: Option<String>,
    pub name: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub organization: Option<String>,
    /// Name or email of this person's manager
    pub manager: Option<String>,
}

impl PersonRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_manager(mut self, manager: impl Into<String>) -> Self {
        self.manager = Some(manager.into());
        self
    }

    /// Email when present, else name. Empty names yield no key and the
    /// record is skipped by the sync pipeline.
    pub fn natural_key(&self) -> Option<String> {
        match &self.email {
            Some(email) if !email.trim().is_empty() => Some(email.trim().to_lowercase()),
            _ if !self.name.trim().is_empty() => Some(self.name.trim().to_lowercase()),
            _ => None,
        }
    }
}

/// A project document or page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: Option<String>,
    pub title: String,
    pub content: String,
    /// Author name or email
    pub author: Option<String>,
    pub url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl DocumentRecord {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn natural_key(&self) -> Option<String> {
        title_key(&self.title)
    }
}

/// A unit of work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    /// Assignee name or email
    pub assignee: Option<String>,
    /// Title of a risk this task mitigates
    pub mitigates: Option<String>,
}

impl TaskRecord {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn natural_key(&self) -> Option<String> {
        title_key(&self.title)
    }
}

/// A recorded decision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: Option<String>,
    pub title: String,
    pub rationale: Option<String>,
    /// Name or email of the decision maker
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    /// Titles of documents this decision references
    pub references: Vec<String>,
}

impl DecisionRecord {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_decided_by(mut self, decided_by: impl Into<String>) -> Self {
        self.decided_by = Some(decided_by.into());
        self
    }

    pub fn natural_key(&self) -> Option<String> {
        title_key(&self.title)
    }
}

/// A tracked risk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskRecord {
    pub id: Option<String>,
    pub title: String,
    pub severity: Option<String>,
    pub status: Option<String>,
    /// Name or email of the risk owner
    pub owner: Option<String>,
}

impl RiskRecord {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn natural_key(&self) -> Option<String> {
        title_key(&self.title)
    }
}

/// A message, meeting note, or other communication.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommunicationRecord {
    /// Id from the source system (message id, thread id)
    pub external_id: Option<String>,
    pub subject: String,
    pub content: String,
    pub channel: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    /// Sender name or email
    pub sender: Option<String>,
    /// Participant names or emails
    pub participants: Vec<String>,
}

impl CommunicationRecord {
    pub fn new(subject: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_participant(mut self, participant: impl Into<String>) -> Self {
        self.participants.push(participant.into());
        self
    }

    /// External id when present, else subject plus timestamp. Two
    /// communications sharing a subject stay distinct as long as they
    /// were sent at different times.
    pub fn natural_key(&self) -> Option<String> {
        if let Some(id) = &self.external_id
            && !id.trim().is_empty()
        {
            return Some(id.trim().to_lowercase());
        }
        if self.subject.trim().is_empty() {
            return None;
        }
        let stamp = self
            .sent_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        Some(format!("{}|{}", self.subject.trim().to_lowercase(), stamp))
    }
}

/// A precomputed content-similarity pair between two records of a label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityRecord {
    pub label: NodeLabel,
    /// Natural key of the first record
    pub first: String,
    /// Natural key of the second record
    pub second: String,
    /// Similarity in 0.0..=1.0
    pub score: f32,
}

/// Everything the store knows about one project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub project: String,
    pub people: Vec<PersonRecord>,
    pub documents: Vec<DocumentRecord>,
    pub tasks: Vec<TaskRecord>,
    pub decisions: Vec<DecisionRecord>,
    pub risks: Vec<RiskRecord>,
    pub communications: Vec<CommunicationRecord>,
    pub similarities: Vec<SimilarityRecord>,
}

impl ProjectSnapshot {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            ..Default::default()
        }
    }

    /// Total record count across all collections.
    pub fn record_count(&self) -> usize {
        self.people.len()
            + self.documents.len()
            + self.tasks.len()
            + self.decisions.len()
            + self.risks.len()
            + self.communications.len()
    }
}

fn title_key(title: &str) -> Option<String> {
    let trimmed = title.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_lowercase())
}

/// Read access to project source data.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Full snapshot of a project's records.
    async fn snapshot(&self, project: &str) -> Result<ProjectSnapshot>;
}

/// Snapshot store held in memory, keyed by project name.
#[derive(Default)]
pub struct InMemoryProjectStore {
    snapshots: RwLock<HashMap<String, ProjectSnapshot>>,
}

impl InMemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a project's snapshot.
    pub async fn put(&self, snapshot: ProjectSnapshot) {
        self.snapshots
            .write()
            .await
            .insert(snapshot.project.clone(), snapshot);
    }
}

#[async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn snapshot(&self, project: &str) -> Result<ProjectSnapshot> {
        self.snapshots
            .read()
            .await
            .get(project)
            .cloned()
            .ok_or_else(|| Error::InvalidInput(format!("unknown project: {project}")))
    }
}
