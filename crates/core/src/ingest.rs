use crate::chunking::{split_pages, total_chars, ChunkingConfig};
use crate::error::IngestError;
use crate::index::VectorIndex;
use crate::loader::DocumentLoader;
use crate::models::{IngestionOptions, PageRecord};
use crate::pool::WorkerPool;
use crate::refiner::ChunkRefiner;
use crate::traits::{EmbeddingModel, GenerationModel};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionReport {
    pub pages: usize,
    pub total_chars: usize,
    pub chunk_size: usize,
    pub chunks: usize,
    pub refined: usize,
    pub fallbacks: usize,
    pub indexed: usize,
}

pub struct IngestedDocument {
    pub index: VectorIndex,
    pub report: IngestionReport,
}

/// Load, split, refine, embed. The index is only built once every chunk has
/// either been refined or fallen back to its original text.
pub struct IngestionPipeline {
    loader: Arc<dyn DocumentLoader>,
    refiner: ChunkRefiner,
    embedder: Arc<dyn EmbeddingModel>,
    options: IngestionOptions,
}

impl IngestionPipeline {
    pub fn new(
        loader: Arc<dyn DocumentLoader>,
        refine_model: Arc<dyn GenerationModel>,
        embedder: Arc<dyn EmbeddingModel>,
        options: IngestionOptions,
    ) -> Self {
        let refiner = ChunkRefiner::new(
            refine_model,
            options.refine_retry,
            WorkerPool::new(options.refine_workers),
        );
        Self {
            loader,
            refiner,
            embedder,
            options,
        }
    }

    pub fn embedder(&self) -> Arc<dyn EmbeddingModel> {
        Arc::clone(&self.embedder)
    }

    pub async fn ingest_path(&self, path: &Path) -> Result<IngestedDocument, IngestError> {
        let pages = self.load(path.to_path_buf()).await?;
        self.ingest_pages(pages).await
    }

    pub async fn ingest_pages(
        &self,
        pages: Vec<PageRecord>,
    ) -> Result<IngestedDocument, IngestError> {
        if pages.is_empty() {
            return Err(IngestError::InvalidArgument(
                "document has no pages".to_string(),
            ));
        }

        let config = ChunkingConfig::adaptive(&pages, &self.options)?;
        let chunks = split_pages(&pages, &config);
        if chunks.is_empty() {
            return Err(IngestError::InvalidArgument(
                "document has no text to chunk".to_string(),
            ));
        }

        let document_chars = total_chars(&pages);
        info!(
            pages = pages.len(),
            total_chars = document_chars,
            chunk_size = config.chunk_size,
            chunks = chunks.len(),
            "document split"
        );

        let chunk_count = chunks.len();
        let outcomes = self.refiner.refine_detailed(chunks).await?;
        let fallbacks = outcomes.iter().filter(|outcome| !outcome.refined).count();
        let refined_chunks = outcomes.into_iter().map(|outcome| outcome.chunk).collect();

        let index = VectorIndex::build(self.embedder.as_ref(), refined_chunks).await?;

        Ok(IngestedDocument {
            report: IngestionReport {
                pages: pages.len(),
                total_chars: document_chars,
                chunk_size: config.chunk_size,
                chunks: chunk_count,
                refined: chunk_count - fallbacks,
                fallbacks,
                indexed: index.len(),
            },
            index,
        })
    }

    async fn load(&self, path: PathBuf) -> Result<Vec<PageRecord>, IngestError> {
        let loader = Arc::clone(&self.loader);
        tokio::task::spawn_blocking(move || loader.load(&path))
            .await
            .map_err(|error| IngestError::Worker(error.to_string()))?
    }
}
