//! Graph model and store access
//!
//! - [`types`]: node/edge/label model shared across the engine
//! - [`store`]: the [`GraphStore`] capability trait and its helper types
//! - [`memory`]: in-memory reference implementation, also the test substrate

pub mod memory;
pub mod store;
pub mod types;

pub use memory::MemoryGraph;
pub use store::{BatchOutcome, GraphStats, GraphStore, NodeFilter, SyncState, SyncStatus};
pub use types::{deterministic_node_id, GraphEdge, GraphNode, GraphPath, NodeLabel, RelType};
