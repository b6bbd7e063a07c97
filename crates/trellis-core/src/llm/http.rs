//! HTTP-backed provider for OpenAI-compatible APIs
//!
//! Speaks the `/chat/completions` and `/embeddings` endpoints, with:
//! - Bearer authentication from an environment-sourced key
//! - Retry with exponential backoff on rate limiting
//! - Fallback models tried in order when the primary is unavailable
//! - Status-code mapping onto [`Error`] variants

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::llm::provider::Provider;
use crate::llm::types::{
    ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, GeneratedText,
    GenerationRequest, Message,
};

/// Maximum retry attempts for rate-limited requests.
const MAX_RETRIES: u32 = 3;

/// Initial backoff in milliseconds.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Provider that talks to an OpenAI-compatible HTTP API.
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    fallback_models: Vec<String>,
    embedding_model: String,
}

/// Builder for [`HttpProvider`].
#[derive(Default)]
pub struct HttpProviderBuilder {
    base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    fallback_models: Vec<String>,
    embedding_model: Option<String>,
    timeout: Option<Duration>,
}

impl HttpProviderBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the API base URL (required), e.g. `https://api.openai.com/v1`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the API key. Omit for keyless local endpoints.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the generation model (required).
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Models tried in order when the primary model is unavailable.
    pub fn fallback_models(mut self, models: Vec<String>) -> Self {
        self.fallback_models = models;
        self
    }

    /// Set the embedding model (required).
    pub fn embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    /// Override the per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the provider.
    pub fn build(self) -> Result<HttpProvider> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::Config("provider base_url is required".into()))?;
        let model = self
            .model
            .ok_or_else(|| Error::Config("generation model is required".into()))?;
        let embedding_model = self
            .embedding_model
            .ok_or_else(|| Error::Config("embedding model is required".into()))?;

        let timeout = self
            .timeout
            .unwrap_or(Duration::from_secs(REQUEST_TIMEOUT_SECS));
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(HttpProvider {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: self.api_key,
            model,
            fallback_models: self.fallback_models,
            embedding_model,
        })
    }
}

impl HttpProvider {
    /// Start building a provider.
    pub fn builder() -> HttpProviderBuilder {
        HttpProviderBuilder::new()
    }

    /// Build a provider from configuration, resolving the API key from
    /// the environment.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let mut builder = Self::builder()
            .base_url(config.base_url.clone())
            .model(config.model.clone())
            .fallback_models(config.fallback_models.clone())
            .embedding_model(config.embedding_model.clone())
            .timeout(Duration::from_secs(config.timeout_secs));
        if let Some(key) = config.resolved_api_key()? {
            builder = builder.api_key(key);
        }
        builder.build()
    }

    async fn post_json<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(Self::map_error_status(status, &body))
    }

    fn map_error_status(status: reqwest::StatusCode, body: &str) -> Error {
        let detail = if body.len() > 200 { &body[..200] } else { body };
        match status.as_u16() {
            401 => Error::Provider("authentication failed, check the API key".into()),
            402 => Error::Provider("provider quota exhausted".into()),
            403 => Error::Provider("access forbidden for this model".into()),
            404 => Error::Provider("model or endpoint not found".into()),
            429 => Error::RateLimited(Self::parse_retry_after(body)),
            500..=599 => Error::Provider(format!("provider error {status}: {detail}")),
            _ => Error::Provider(format!("unexpected status {status}: {detail}")),
        }
    }

    /// Pull a retry hint out of a 429 body, defaulting to 2 seconds.
    fn parse_retry_after(body: &str) -> u64 {
        serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("retry_after").and_then(|r| r.as_u64()))
            .unwrap_or(2)
    }

    /// Exponential backoff with jitter derived from the clock.
    fn backoff_delay(attempt: u32, hint_secs: u64) -> Duration {
        let base = INITIAL_BACKOFF_MS.saturating_mul(2u64.saturating_pow(attempt));
        let base = base.max(hint_secs.saturating_mul(1000));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u64 % 250)
            .unwrap_or(0);
        Duration::from_millis(base + jitter)
    }

    async fn execute_chat(&self, body: ChatRequest) -> Result<ChatResponse> {
        let mut attempt = 0;
        loop {
            match self.post_json("chat/completions", &body).await {
                Ok(response) => {
                    return response
                        .json::<ChatResponse>()
                        .await
                        .map_err(|e| Error::MalformedResponse(e.to_string()));
                }
                Err(Error::RateLimited(hint)) if attempt < MAX_RETRIES => {
                    let delay = Self::backoff_delay(attempt, hint);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratedText> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(request.prompt.clone()));

        let mut last_error = None;
        for model in std::iter::once(&self.model).chain(self.fallback_models.iter()) {
            let body = ChatRequest {
                model: model.clone(),
                messages: messages.clone(),
                temperature: Some(request.temperature),
                max_tokens: Some(request.max_tokens),
            };

            debug!(model = %model, temperature = request.temperature, "sending generation request");
            match self.execute_chat(body).await {
                Ok(response) => {
                    return response.into_generated().ok_or_else(|| {
                        Error::MalformedResponse("response contained no choices".into())
                    });
                }
                Err(e @ (Error::RateLimited(_) | Error::Provider(_))) => {
                    warn!(model = %model, error = %e, "model unavailable, trying next");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Provider("no model produced a response".into())))
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingRequest {
            model: self.embedding_model.clone(),
            input: texts.to_vec(),
        };

        let response = self.post_json("embeddings", &body).await?;
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::MalformedResponse(e.to_string()))?;

        if parsed.data.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        // The API may return entries out of order; restore input order.
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
