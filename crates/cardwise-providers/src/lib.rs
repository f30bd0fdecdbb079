//! # Cardwise Providers
//!
//! Language-model and embedding backends. Every remote backend speaks the
//! OpenAI dialect and is served by `OpenAiCompatibleProvider`; the
//! `HashingEmbedder` runs locally with no network access.

pub mod hashing;
pub mod local_embedding;
pub mod openai_compatible;
pub mod provider_registry;
pub mod retry;

use cardwise_core::config::{CardwiseConfig, LlmConfig};
use cardwise_core::error::{CardwiseError, Result};
use cardwise_core::traits::{Embedder, Provider};
use std::sync::Arc;
use std::time::Duration;

pub use hashing::HashingEmbedder;
pub use local_embedding::FastEmbedder;
pub use openai_compatible::OpenAiCompatibleProvider;
pub use retry::RetryProvider;

fn build_openai_compatible(provider_name: &str, llm: &LlmConfig) -> Result<OpenAiCompatibleProvider> {
    if provider_name.starts_with("custom:") {
        return OpenAiCompatibleProvider::custom(provider_name, llm);
    }
    let registry = provider_registry::get_provider_config(provider_name)
        .ok_or_else(|| CardwiseError::ProviderNotFound(provider_name.into()))?;
    OpenAiCompatibleProvider::from_registry(registry, llm)
}

/// Create the chat provider from configuration, wrapped with retry/backoff.
pub fn create_provider(config: &CardwiseConfig) -> Result<Box<dyn Provider>> {
    let inner = build_openai_compatible(&config.llm.provider, &config.llm)?;
    tracing::debug!("Chat provider: {} ({})", config.llm.provider, inner.base_url());
    Ok(Box::new(RetryProvider::new(
        Box::new(inner),
        config.orchestration.max_retries,
        Duration::from_millis(config.orchestration.retry_base_delay_ms),
    )))
}

/// Create the embedder used to build and query the retrieval index.
///
/// `fastembed` (default) and `hashing` run locally; any other name is resolved
/// against the provider registry and shares the chat credentials when it
/// names the same provider.
pub fn create_embedder(config: &CardwiseConfig) -> Result<Arc<dyn Embedder>> {
    let name = config.embedding.provider.as_str();
    match name {
        "fastembed" => return Ok(Arc::new(FastEmbedder::from_name(&config.embedding.model)?)),
        "hashing" => return Ok(Arc::new(HashingEmbedder::new(config.embedding.dimensions))),
        _ => {}
    }

    let llm = if name == config.llm.provider {
        config.llm.clone()
    } else {
        LlmConfig {
            provider: name.to_string(),
            ..LlmConfig::default()
        }
    };
    let provider = build_openai_compatible(name, &llm)?.with_embedding_model(&config.embedding.model);
    Ok(Arc::new(provider))
}

/// List all available provider names.
pub fn available_providers() -> Vec<&'static str> {
    let mut names = provider_registry::all_provider_names();
    names.push("custom");
    names
}
