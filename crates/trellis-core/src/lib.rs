//! Trellis Core Library
//!
//! Graph-backed retrieval over project knowledge, including:
//! - Bilingual query classification with pattern-driven strategy routing
//! - Query generation (pattern templates, LLM translation, keyword fallback)
//! - Structural search (typed lookups and bounded graph traversal)
//! - Semantic search with hypothetical-document expansion
//! - Reciprocal-rank fusion, LLM cross-encoding, and heuristic boosting
//! - Multi-hop decomposition and iterative retrieval for complex questions
//! - Cited answer synthesis with graceful degradation
//! - Idempotent three-phase graph synchronization from project records

pub mod cache;
pub mod classify;
pub mod config;
pub mod cypher;
pub mod engine;
pub mod error;
pub mod graph;
pub mod llm;
pub mod multihop;
pub mod ontology;
pub mod project;
pub mod rerank;
pub mod search;
pub mod sync;
pub mod synthesize;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::classify::{Language, QueryAnalysis, QueryClassifier, QueryStrategy};
    pub use crate::config::EngineConfig;
    pub use crate::engine::{RagEngine, RagEngineBuilder};
    pub use crate::error::{Error, Result};
    pub use crate::graph::{GraphStore, MemoryGraph, NodeLabel};
    pub use crate::llm::{HttpProvider, MockProvider, Provider};
    pub use crate::ontology::{Ontology, StaticOntology};
    pub use crate::project::{InMemoryProjectStore, ProjectSnapshot, ProjectStore};
    pub use crate::search::{RetrievalOrigin, SearchResult};
    pub use crate::sync::{SyncOptions, SyncPipeline, SyncReport};
    pub use crate::synthesize::{Answer, Citation};
}
