use crate::error::ModelError;
use async_trait::async_trait;

/// Text-in, text-out language model. Implementations are shared across
/// refinement workers, so calls must be safe to run concurrently.
#[async_trait]
pub trait GenerationModel: Send + Sync {
    async fn invoke(&self, prompt: &str) -> Result<String, ModelError>;
}

/// Embeds document chunks (`embed`, `embed_batch`) and search queries
/// (`embed_query`). Backends that distinguish the two override `embed_query`.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        self.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}
