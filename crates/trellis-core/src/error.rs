//! Error types for Trellis

use thiserror::Error;

/// Result type alias using Trellis's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Trellis error types
///
/// The query path never surfaces `Provider`, `Embedding` or
/// `MalformedResponse` to callers of [`crate::engine::RagEngine::answer`];
/// those are caught at the call site and replaced by the documented
/// fallback. They exist as variants so the individual components can be
/// driven (and tested) directly.
#[derive(Error, Debug)]
pub enum Error {
    // Graph store errors
    #[error("Graph store is unavailable: {0}")]
    GraphUnavailable(String),

    #[error("Graph query failed: {0}")]
    GraphQuery(String),

    // Generation/embedding capability errors
    #[error("Generation provider error: {0}")]
    Provider(String),

    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    #[error("Rate limited. Waiting {0} seconds before retry.")]
    RateLimited(u64),

    #[error("Model returned an unparseable response: {0}")]
    MalformedResponse(String),

    // Retrieval pipeline errors
    #[error("Graph query generation failed: {0}")]
    QueryGeneration(String),

    #[error("Question decomposition failed: {0}")]
    Decomposition(String),

    // Sync pipeline errors
    #[error("Graph sync failed: {0}")]
    Sync(String),

    // Input/config errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // Transport
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is a transient transport/provider failure that a
    /// degraded fallback path should absorb rather than propagate.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Provider(_)
                | Self::Embedding(_)
                | Self::RateLimited(_)
                | Self::MalformedResponse(_)
                | Self::Network(_)
        )
    }
}
