use crate::error::{IngestError, SearchError};
use crate::models::RefinedChunk;
use crate::traits::EmbeddingModel;
use tracing::info;

#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub embedding: Vec<f32>,
    pub chunk: RefinedChunk,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: RefinedChunk,
    pub distance: f32,
    pub position: usize,
}

/// Exact (brute-force) Euclidean nearest-neighbour index. Immutable once
/// built, so it can be shared freely between readers.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimensions: usize,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Embeds every chunk and builds the index. Any embedding failure aborts
    /// the build; there is no partial index.
    pub async fn build(
        embedder: &dyn EmbeddingModel,
        chunks: Vec<RefinedChunk>,
    ) -> Result<Self, IngestError> {
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let embeddings = embedder.embed_batch(&texts).await?;

        if embeddings.len() != chunks.len() {
            return Err(IngestError::IndexBuild(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }

        let entries = embeddings
            .into_iter()
            .zip(chunks)
            .map(|(embedding, chunk)| IndexEntry { embedding, chunk })
            .collect();

        let index = Self::from_entries(entries)?;
        info!(
            entries = index.len(),
            dimensions = index.dimensions(),
            "vector index built"
        );
        Ok(index)
    }

    pub fn from_entries(entries: Vec<IndexEntry>) -> Result<Self, IngestError> {
        let dimensions = match entries.first() {
            Some(entry) => entry.embedding.len(),
            None => {
                return Err(IngestError::IndexBuild(
                    "no chunks to index".to_string(),
                ))
            }
        };

        if dimensions == 0 {
            return Err(IngestError::IndexBuild(
                "embeddings have zero dimensions".to_string(),
            ));
        }

        if let Some((position, entry)) = entries
            .iter()
            .enumerate()
            .find(|(_, entry)| entry.embedding.len() != dimensions)
        {
            return Err(IngestError::IndexBuild(format!(
                "embedding {position} has dimension {} != {dimensions}",
                entry.embedding.len()
            )));
        }

        Ok(Self {
            dimensions,
            entries,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Up to `top_k` entries by ascending distance; ties keep insertion order.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>, SearchError> {
        if query.len() != self.dimensions {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (position, squared_distance(query, &entry.embedding)))
            .collect();

        scored.sort_by(|left, right| left.1.total_cmp(&right.1));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(position, squared)| ScoredChunk {
                chunk: self.entries[position].chunk.clone(),
                distance: squared.sqrt(),
                position,
            })
            .collect())
    }
}

fn squared_distance(left: &[f32], right: &[f32]) -> f32 {
    left.iter()
        .zip(right)
        .map(|(a, b)| {
            let delta = a - b;
            delta * delta
        })
        .sum()
}
