use crate::error::SearchError;
use crate::index::{ScoredChunk, VectorIndex};
use crate::traits::EmbeddingModel;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_TOP_K: usize = 4;

/// Embeds a query and looks it up in a built index.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingModel>,
    top_k: usize,
}

impl Retriever {
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn EmbeddingModel>) -> Self {
        Self {
            index,
            embedder,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub async fn retrieve(&self, query: &str) -> Result<Vec<ScoredChunk>, SearchError> {
        self.query(query, self.top_k).await
    }

    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredChunk>, SearchError> {
        if text.trim().is_empty() {
            return Err(SearchError::Request("query is empty".to_string()));
        }

        let embedding = self.embedder.embed_query(text).await?;
        let hits = self.index.search(&embedding, k)?;
        debug!(k, hits = hits.len(), "retrieved chunks");
        Ok(hits)
    }
}
