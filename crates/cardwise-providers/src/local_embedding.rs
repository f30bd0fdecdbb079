//! Local sentence embeddings via `fastembed` (ONNX runtime, no API key).
//!
//! The model is downloaded and loaded lazily on the first embedding request;
//! inference runs on a blocking thread so the async runtime stays responsive.

use async_trait::async_trait;
use cardwise_core::error::{CardwiseError, Result};
use cardwise_core::traits::Embedder;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio::task;

/// Resolve a configured model name to a fastembed model.
pub fn parse_model(name: &str) -> Result<EmbeddingModel> {
    let normalized = name.trim().to_lowercase().replace(['_', ' '], "-");
    let normalized = normalized.strip_prefix("sentence-transformers/").unwrap_or(&normalized);
    match normalized {
        "all-minilm-l6-v2" | "allminilml6v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "all-minilm-l12-v2" | "allminilml12v2" => Ok(EmbeddingModel::AllMiniLML12V2),
        "bge-small-en-v1.5" | "baai/bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" | "baai/bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        other => Err(CardwiseError::Config(format!("unsupported fastembed model '{other}'"))),
    }
}

#[derive(Clone)]
pub struct FastEmbedder {
    model_name: EmbeddingModel,
    model: Arc<OnceCell<Arc<TextEmbedding>>>,
}

impl FastEmbedder {
    /// Creates the embedder without loading the model.
    pub fn new(model_name: EmbeddingModel) -> Self {
        Self {
            model_name,
            model: Arc::new(OnceCell::new()),
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Ok(Self::new(parse_model(name)?))
    }

    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    /// Returns the model, initializing it on first call.
    async fn get_model(&self) -> Result<Arc<TextEmbedding>> {
        let model_name = self.model_name.clone();
        let model = self
            .model
            .get_or_try_init(|| async move {
                task::spawn_blocking(move || {
                    let mut options = InitOptions::default();
                    options.model_name = model_name.clone();
                    options.show_download_progress = true;
                    let model = TextEmbedding::try_new(options)
                        .map_err(|e| CardwiseError::Embedding(format!("failed to load {model_name:?}: {e}")))?;
                    tracing::info!("Embedding model loaded ({:?})", model_name);
                    Ok::<_, CardwiseError>(Arc::new(model))
                })
                .await
                .map_err(|e| CardwiseError::Embedding(format!("embedding model loader panicked: {e}")))?
            })
            .await?;
        Ok(model.clone())
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    fn name(&self) -> &str {
        "fastembed"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.get_model().await?;
        let texts = texts.to_vec();
        task::spawn_blocking(move || model.embed(texts, None))
            .await
            .map_err(|e| CardwiseError::Embedding(format!("embedding task panicked: {e}")))?
            .map_err(|e| CardwiseError::Embedding(e.to_string()))
    }
}
