//! Embedding-model boundary.

use async_trait::async_trait;

use crate::error::Result;

/// Turns text into dense vectors. All vectors from one embedder share a length.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| {
            crate::error::CardwiseError::Embedding(format!("{} returned no vector", self.name()))
        })
    }
}
