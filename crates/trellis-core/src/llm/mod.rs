//! Generation and embedding capability
//!
//! The engine treats text generation and embedding as one opaque, fallible,
//! rate-limited external capability behind the [`Provider`] trait. Two
//! implementations ship with the crate:
//!
//! - [`HttpProvider`]: OpenAI-compatible chat/embeddings client. Provider
//!   endpoint and model identifiers are supplied by the caller at
//!   construction; there is no built-in default provider.
//! - [`MockProvider`]: scripted responses for tests and offline development.

pub mod http;
pub mod mock;
pub(crate) mod parse;
pub mod provider;
pub mod types;

pub use http::{HttpProvider, HttpProviderBuilder};
pub use mock::MockProvider;
pub use provider::Provider;
pub use types::{
    centroid, cosine_similarity, GeneratedText, GenerationRequest, Message, MessageRole,
};
