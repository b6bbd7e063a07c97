//! Request/response types for the generation capability
//!
//! The wire types match the OpenAI-compatible chat/embeddings format spoken
//! by most hosted providers; [`GenerationRequest`] and [`GeneratedText`] are
//! the simplified shapes the rest of the engine works with.

use serde::{Deserialize, Serialize};

/// A generation request as issued by engine components.
///
/// Components build these with the temperature they need (the query
/// generator runs near-deterministic, HyDE runs a rising temperature
/// ladder); the provider maps the request onto its own wire format.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// The user prompt.
    pub prompt: String,
    /// Optional system instruction.
    pub system: Option<String>,
    /// Sampling temperature (0.0 to 2.0).
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: usize,
}

impl GenerationRequest {
    /// Create a request with the component defaults (temperature 0.3).
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            temperature: 0.3,
            max_tokens: 1024,
        }
    }

    /// Set the system instruction.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the generation budget.
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Generated text returned by a provider.
#[derive(Debug, Clone)]
pub struct GeneratedText {
    /// The generated content.
    pub text: String,
    /// Model that produced it.
    pub model: String,
    /// Total tokens consumed (input + output), 0 when unreported.
    pub tokens_used: u32,
}

/// Role of a message in a chat conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System message (instructions/context)
    System,
    /// User message
    User,
    /// Assistant message (model response)
    Assistant,
}

/// A chat message on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: MessageRole,
    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Request body for chat completions.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
}

/// Token usage reported by the API.
#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// A single completion choice.
#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: Message,
}

/// Response from the chat completions API.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
}

impl ChatResponse {
    /// Collapse the API response into [`GeneratedText`], if it has content.
    pub fn into_generated(self) -> Option<GeneratedText> {
        let choice = self.choices.into_iter().next()?;
        let tokens_used = self.usage.map(|u| u.total_tokens).unwrap_or(0);
        Some(GeneratedText {
            text: choice.message.content,
            model: self.model,
            tokens_used,
        })
    }
}

/// Request body for embeddings.
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub input: Vec<String>,
}

/// A single embedding in the batch response.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingData {
    pub index: usize,
    pub embedding: Vec<f32>,
}

/// Response from the embeddings API.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingResponse {
    pub data: Vec<EmbeddingData>,
    pub model: String,
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched lengths or zero-magnitude inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Average a set of equal-length vectors and L2-normalize the result.
///
/// This is how HyDE folds the question and its hypothetical answer
/// documents into a single query vector. Returns `None` for an empty set
/// or inconsistent dimensions.
pub fn centroid(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let dim = first.len();
    if dim == 0 || vectors.iter().any(|v| v.len() != dim) {
        return None;
    }

    let mut mean = vec![0.0f32; dim];
    for vector in vectors {
        for (acc, v) in mean.iter_mut().zip(vector.iter()) {
            *acc += v;
        }
    }
    let n = vectors.len() as f32;
    for acc in mean.iter_mut() {
        *acc /= n;
    }

    let magnitude: f32 = mean.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for acc in mean.iter_mut() {
            *acc /= magnitude;
        }
    }

    Some(mean)
}
