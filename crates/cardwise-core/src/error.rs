//! Error taxonomy shared across Cardwise crates.

use thiserror::Error;

/// Every failure a Cardwise component can surface.
#[derive(Debug, Error)]
pub enum CardwiseError {
    /// A corpus record is missing a required field. Fatal at startup.
    #[error("Malformed catalog record #{index}: missing or invalid field `{field}`")]
    MalformedRecord { index: usize, field: &'static str },

    /// Two corpus records derive the same document id.
    #[error("Duplicate document id in catalog: {0}")]
    DuplicateDocument(String),

    /// Search was attempted before the index finished building.
    #[error("Retrieval index unavailable: {0}")]
    IndexUnavailable(String),

    /// `build` was called on an index that is already built.
    #[error("Retrieval index already built")]
    IndexAlreadyBuilt,

    /// The language model call failed (transport, quota, bad response).
    #[error("Model invocation failed: {0}")]
    ModelInvocation(String),

    /// The model endpoint refused the request (bad request, auth). Not retried.
    #[error("Model rejected request: {0}")]
    ModelRejected(String),

    /// A per-call deadline elapsed.
    #[error("{operation} exceeded its deadline of {timeout_ms}ms")]
    DeadlineExceeded {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API key missing for provider: {0}")]
    ApiKeyMissing(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    /// An append would break a conversation invariant.
    #[error("Conversation invariant violated: {0}")]
    Conversation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CardwiseError {
    /// Whether a retry of the same call has a reasonable chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CardwiseError::ModelInvocation(_) | CardwiseError::Http(_) | CardwiseError::Embedding(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CardwiseError>;
