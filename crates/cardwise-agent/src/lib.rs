//! # Cardwise Agent
//! Retrieval-augmented answering over the credit-card corpus.
//!
//! - [`conversation`]: append-only conversation state with turn ids
//! - [`prompt`]: retrieval tool, document serialization, answer prompt
//! - [`orchestrator`]: the DECIDE → RETRIEVE → GENERATE stage machine
//!
//! [`RagAgent`] is the request boundary: it never surfaces an error, only an
//! answer or [`FALLBACK_ANSWER`].

pub mod conversation;
pub mod orchestrator;
pub mod prompt;

use cardwise_core::config::CardwiseConfig;
use cardwise_core::error::Result;
use cardwise_core::traits::{Provider, Retriever};
use cardwise_core::types::Document;
use cardwise_knowledge::VectorIndex;
use std::sync::Arc;

pub use conversation::ConversationState;
pub use orchestrator::{EdgePolicy, Orchestrator, OrchestratorConfig, RunOutcome, Stage, Terminal};

/// Returned whenever a run does not end with an assistant answer.
pub const FALLBACK_ANSWER: &str = "Sorry, I don't know.";

/// Answer of a finished run, or the fallback text.
pub fn answer_or_fallback(outcome: &RunOutcome) -> String {
    match outcome.answer() {
        Some(answer) => answer.to_string(),
        None => FALLBACK_ANSWER.to_string(),
    }
}

/// Question-answering agent shared by every request.
pub struct RagAgent {
    orchestrator: Orchestrator,
}

impl RagAgent {
    pub fn new(provider: Arc<dyn Provider>, retriever: Arc<dyn Retriever>, config: OrchestratorConfig) -> Self {
        Self {
            orchestrator: Orchestrator::new(provider, retriever, config),
        }
    }

    /// Wire provider, embedder and index from configuration and index `documents`.
    pub async fn from_config(config: &CardwiseConfig, documents: Vec<Document>) -> Result<Self> {
        config.validate()?;
        let orchestration = OrchestratorConfig::from_config(config)?;
        let provider: Arc<dyn Provider> = Arc::from(cardwise_providers::create_provider(config)?);
        let embedder = cardwise_providers::create_embedder(config)?;

        let index = VectorIndex::new(embedder);
        index.build(documents).await?;

        tracing::info!(
            "RAG agent ready: provider={}, model={}, corpus={} documents, top_k={}, edge_policy={:?}",
            provider.name(),
            orchestration.params.model,
            index.len(),
            orchestration.top_k,
            orchestration.edge_policy
        );
        Ok(Self::new(provider, Arc::new(index), orchestration))
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn provider_name(&self) -> &str {
        self.orchestrator.provider().name()
    }

    pub fn corpus_size(&self) -> usize {
        self.orchestrator.retriever().len()
    }

    /// Run the stage machine for `query` and return the full outcome.
    pub async fn run(&self, query: &str) -> RunOutcome {
        self.orchestrator.run(query).await
    }

    /// Answer `query`. Failures are logged and turned into [`FALLBACK_ANSWER`].
    pub async fn ask(&self, query: &str, user_name: &str) -> String {
        tracing::info!(user = user_name, "Question: {}", query);
        let outcome = self.run(query).await;
        if let Some(e) = outcome.error() {
            tracing::error!(user = user_name, "Answering failed: {e}");
        } else if outcome.answer().is_none() {
            tracing::warn!(user = user_name, "Run ended without an assistant answer");
        }
        answer_or_fallback(&outcome)
    }
}
