//! Retrieval boundary used by the RETRIEVE stage.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Document;

/// Ranked k-nearest-neighbour search over a fixed corpus.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Up to `k` documents, most similar first. Deterministic for a fixed
    /// corpus and query.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Document>>;

    /// Number of indexed documents, 0 while unbuilt.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
