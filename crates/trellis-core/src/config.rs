//! Configuration management with file persistence
//!
//! [`EngineConfig`] gathers every tunable of the retrieval pipeline in
//! one serializable tree: loaded from `trellis.toml` in the platform
//! config directory, overridable per field, validated before any engine
//! is built. API keys never live in the file; they come from the
//! environment only.

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Top-level configuration for the engine and the sync pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub hyde: HydeConfig,
    pub cypher: CypherConfig,
    pub multihop: MultiHopConfig,
    pub sync: SyncConfig,
    pub language: LanguageConfig,
}

/// Model endpoint settings for the HTTP provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    #[serde(skip)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub fallback_models: Vec<String>,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout_secs: u64,
}

/// Shared knobs for the structural and semantic searchers and the
/// reranker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Results returned to the caller after fusion and reranking.
    pub top_k: usize,
    /// Per-lookup cap inside the structural searcher.
    pub structural_limit: usize,
    /// Hops followed from each seed node during traversal.
    pub traverse_depth: u32,
    /// Below this many semantic hits, keyword results top the list up.
    pub keyword_floor: usize,
    /// Reciprocal-rank-fusion constant.
    pub rrf_k: f32,
    /// The cross-encoder scores `top_k * cross_encode_factor` fused
    /// candidates.
    pub cross_encode_factor: usize,
}

/// Hypothetical-document expansion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HydeConfig {
    pub enabled: bool,
    /// Hypothetical documents generated per query.
    pub samples: usize,
    pub base_temperature: f32,
    /// Added to the base per extra sample for output diversity.
    pub temperature_step: f32,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
}

/// Query-generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CypherConfig {
    /// Sampling temperature for model-generated queries.
    pub temperature: f32,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
    /// Confidence assigned to the keyword fallback query.
    pub fallback_confidence: f32,
}

/// Multi-hop decomposition and iterative retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiHopConfig {
    pub max_sub_questions: usize,
    pub max_iterations: usize,
    /// Iterative retrieval stops once estimated confidence reaches this.
    pub confidence_threshold: f32,
}

/// Graph synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Nodes or edges written per store call.
    pub batch_size: usize,
    /// Similarity pairs below this score are not materialized as edges.
    pub similarity_threshold: f32,
}

/// Classifier language-pack override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageConfig {
    /// Path to a TOML language pack replacing the built-in tables.
    pub pack_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            retrieval: RetrievalConfig::default(),
            hyde: HydeConfig::default(),
            cypher: CypherConfig::default(),
            multihop: MultiHopConfig::default(),
            sync: SyncConfig::default(),
            language: LanguageConfig::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            fallback_models: vec!["gpt-4o".to_string()],
            temperature: 0.2,
            max_tokens: 1024,
            timeout_secs: 60,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 8,
            structural_limit: 10,
            traverse_depth: 2,
            keyword_floor: 5,
            rrf_k: 60.0,
            cross_encode_factor: 2,
        }
    }
}

impl Default for HydeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            samples: 3,
            base_temperature: 0.7,
            temperature_step: 0.1,
            cache_ttl_secs: 600,
            cache_capacity: 128,
        }
    }
}

impl Default for CypherConfig {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            cache_ttl_secs: 1800,
            cache_capacity: 256,
            fallback_confidence: 0.3,
        }
    }
}

impl Default for MultiHopConfig {
    fn default() -> Self {
        Self {
            max_sub_questions: 5,
            max_iterations: 3,
            confidence_threshold: 0.8,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            similarity_threshold: 0.75,
        }
    }
}

impl LlmConfig {
    /// Resolve the API key from the environment. `TRELLIS_API_KEY` wins
    /// over `OPENAI_API_KEY`; a key stored in the file is an error.
    pub fn resolved_api_key(&self) -> Result<Option<String>> {
        self.enforce_env_only()?;

        Ok(env::var("TRELLIS_API_KEY")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .ok())
    }

    /// Resolved key with all but the last four characters masked.
    pub fn redacted_api_key(&self) -> Result<Option<String>> {
        self.resolved_api_key().map(|opt| {
            opt.map(|key| {
                if key.len() <= 4 {
                    "***".to_string()
                } else {
                    let suffix = &key[key.len() - 4..];
                    format!("***{}", suffix)
                }
            })
        })
    }

    pub fn enforce_env_only(&self) -> Result<()> {
        if self.api_key.is_some() {
            return Err(Error::Config(
                "LLM API keys must be provided via environment variables, not stored in configuration"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("TRELLIS_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("trellis")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("trellis.toml"))
    }

    /// Load configuration from file, or return defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(EngineConfig::default())
        }
    }

    /// Load and validate configuration from an explicit path.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: EngineConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        self.save_to(&Self::config_path()?)
    }

    /// Validate and write configuration to an explicit path.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Reject values no component can run with.
    pub fn validate(&self) -> Result<()> {
        self.llm.enforce_env_only()?;

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(Error::Config(
                "llm.temperature must be between 0.0 and 2.0".to_string(),
            ));
        }
        if self.llm.max_tokens == 0 {
            return Err(Error::Config("llm.max_tokens must be positive".to_string()));
        }
        if self.retrieval.top_k == 0 {
            return Err(Error::Config("retrieval.top_k must be positive".to_string()));
        }
        if self.retrieval.structural_limit == 0 {
            return Err(Error::Config(
                "retrieval.structural_limit must be positive".to_string(),
            ));
        }
        if self.retrieval.rrf_k <= 0.0 {
            return Err(Error::Config("retrieval.rrf_k must be positive".to_string()));
        }
        if self.retrieval.cross_encode_factor == 0 {
            return Err(Error::Config(
                "retrieval.cross_encode_factor must be positive".to_string(),
            ));
        }
        if self.hyde.samples == 0 {
            return Err(Error::Config("hyde.samples must be positive".to_string()));
        }
        if !(0.0..=2.0).contains(&self.hyde.base_temperature) {
            return Err(Error::Config(
                "hyde.base_temperature must be between 0.0 and 2.0".to_string(),
            ));
        }
        if self.hyde.temperature_step < 0.0 {
            return Err(Error::Config(
                "hyde.temperature_step must not be negative".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.cypher.temperature) {
            return Err(Error::Config(
                "cypher.temperature must be between 0.0 and 2.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.cypher.fallback_confidence) {
            return Err(Error::Config(
                "cypher.fallback_confidence must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.multihop.max_sub_questions == 0 {
            return Err(Error::Config(
                "multihop.max_sub_questions must be positive".to_string(),
            ));
        }
        if self.multihop.max_iterations == 0 {
            return Err(Error::Config(
                "multihop.max_iterations must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.multihop.confidence_threshold) {
            return Err(Error::Config(
                "multihop.confidence_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.sync.batch_size == 0 {
            return Err(Error::Config("sync.batch_size must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.sync.similarity_threshold) {
            return Err(Error::Config(
                "sync.similarity_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        Ok(())
    }
}
