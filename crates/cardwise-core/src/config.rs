//! Cardwise configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CardwiseError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardwiseConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl CardwiseConfig {
    /// Load config from `$CARDWISE_CONFIG`, else the default path, else defaults.
    pub fn load() -> Result<Self> {
        let path = std::env::var("CARDWISE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_path());
        if path.exists() {
            Self::load_from(&path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CardwiseError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CardwiseError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the orchestration cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.retrieval.top_k == 0 {
            return Err(CardwiseError::Config("retrieval.top_k must be positive".into()));
        }
        if self.embedding.dimensions == 0 {
            return Err(CardwiseError::Config("embedding.dimensions must be positive".into()));
        }
        if self.orchestration.model_timeout_secs == 0 {
            return Err(CardwiseError::Config("orchestration.model_timeout_secs must be positive".into()));
        }
        if self.orchestration.search_timeout_secs == 0 {
            return Err(CardwiseError::Config("orchestration.search_timeout_secs must be positive".into()));
        }
        let policy = self.orchestration.edge_policy.trim().to_lowercase();
        if policy != "conditional" && policy != "always" {
            return Err(CardwiseError::Config(format!(
                "unknown orchestration.edge_policy '{}' (expected 'conditional' or 'always')",
                self.orchestration.edge_policy
            )));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Cardwise home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cardwise")
    }
}

/// Expand `~` and environment variables in a configured path.
///
/// An undefined variable leaves the path with only `~` expanded.
pub fn expand_path(p: &str) -> PathBuf {
    match shellexpand::full(p) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(e) => {
            tracing::warn!("Could not expand {p}: {e}");
            PathBuf::from(shellexpand::tilde(p).as_ref())
        }
    }
}

/// Chat model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_provider() -> String { "openai".into() }
fn default_model() -> String { "gpt-4o-mini".into() }
fn default_max_tokens() -> u32 { 512 }

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: String::new(),
            endpoint: String::new(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
        }
    }
}

/// Embedding model configuration.
///
/// `fastembed` runs a local sentence-embedding model (downloaded on first use);
/// `hashing` is a lexical embedder for offline runs; any registry provider
/// name uses its `/embeddings` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

fn default_embedding_provider() -> String { "fastembed".into() }
fn default_embedding_model() -> String { "all-MiniLM-L6-v2".into() }
fn default_dimensions() -> usize { 384 }

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dimensions: default_dimensions(),
        }
    }
}

/// Corpus location and search width.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_corpus_path")]
    pub corpus_path: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_corpus_path() -> String { "~/.cardwise/credit_cards.json".into() }
fn default_top_k() -> usize { 3 }

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            corpus_path: default_corpus_path(),
            top_k: default_top_k(),
        }
    }
}

/// State-machine behaviour, deadlines and retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    /// `conditional` retrieves only when the model asks; `always` retrieves every turn.
    #[serde(default = "default_edge_policy")]
    pub edge_policy: String,
    #[serde(default = "default_model_timeout")]
    pub model_timeout_secs: u64,
    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
}

fn default_edge_policy() -> String { "conditional".into() }
fn default_model_timeout() -> u64 { 60 }
fn default_search_timeout() -> u64 { 10 }
fn default_max_retries() -> u32 { 2 }
fn default_retry_base_delay() -> u64 { 500 }

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            edge_policy: default_edge_policy(),
            model_timeout_secs: default_model_timeout(),
            search_timeout_secs: default_search_timeout(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
        }
    }
}

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 { 8000 }
fn default_host() -> String { "127.0.0.1".into() }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}
