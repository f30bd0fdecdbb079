//! Embedding-backed similarity index over the fixed card corpus.
//!
//! Built exactly once; afterwards the entries are read-only, so any number of
//! concurrent searches can share one `Arc<VectorIndex>` without locking.

use async_trait::async_trait;
use cardwise_core::error::{CardwiseError, Result};
use cardwise_core::traits::{Embedder, Retriever};
use cardwise_core::types::Document;
use std::sync::Arc;
use tokio::sync::OnceCell;

struct IndexedDocument {
    document: Document,
    vector: Vec<f32>,
}

/// In-memory k-nearest-neighbour index (cosine similarity).
pub struct VectorIndex {
    embedder: Arc<dyn Embedder>,
    entries: OnceCell<Vec<IndexedDocument>>,
}

impl VectorIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: OnceCell::new(),
        }
    }

    /// Embed and index `documents`. Fails with `IndexAlreadyBuilt` on a second call.
    pub async fn build(&self, documents: Vec<Document>) -> Result<()> {
        if self.entries.initialized() {
            return Err(CardwiseError::IndexAlreadyBuilt);
        }

        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != documents.len() {
            return Err(CardwiseError::Embedding(format!(
                "{} returned {} vectors for {} documents",
                self.embedder.name(),
                vectors.len(),
                documents.len()
            )));
        }

        let entries: Vec<IndexedDocument> = documents
            .into_iter()
            .zip(vectors)
            .map(|(document, vector)| IndexedDocument { document, vector })
            .collect();
        let count = entries.len();

        self.entries
            .set(entries)
            .map_err(|_| CardwiseError::IndexAlreadyBuilt)?;
        tracing::info!("Indexed {} documents with {} embeddings", count, self.embedder.name());
        Ok(())
    }

    pub fn is_built(&self) -> bool {
        self.entries.initialized()
    }

    /// Ids of all indexed documents in corpus order.
    pub fn document_ids(&self) -> Vec<&str> {
        self.entries
            .get()
            .map(|entries| entries.iter().map(|e| e.document.id.as_str()).collect())
            .unwrap_or_default()
    }
}

/// Cosine similarity; 0 when either vector has zero length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl Retriever for VectorIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Document>> {
        let entries = self
            .entries
            .get()
            .ok_or_else(|| CardwiseError::IndexUnavailable("search before build completed".into()))?;
        if k == 0 || entries.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed_one(query).await?;

        let mut scored: Vec<(f32, &IndexedDocument)> = entries
            .iter()
            .map(|e| {
                let score = cosine_similarity(&query_vector, &e.vector);
                // NaN from a degenerate vector ranks below every real score
                (if score.is_nan() { f32::NEG_INFINITY } else { score }, e)
            })
            .collect();
        // Stable sort: equal scores keep corpus order
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        let results: Vec<Document> = scored
            .into_iter()
            .take(k)
            .map(|(_, e)| e.document.clone())
            .collect();
        tracing::debug!("Index search: {} of {} documents returned", results.len(), entries.len());
        Ok(results)
    }

    fn len(&self) -> usize {
        self.entries.get().map(Vec::len).unwrap_or(0)
    }
}
