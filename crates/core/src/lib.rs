pub mod chain;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod gemini;
pub mod index;
pub mod ingest;
pub mod loader;
pub mod models;
pub mod pool;
pub mod prompt;
pub mod refiner;
pub mod retriever;
pub mod retry;
pub mod session;
pub mod traits;

pub use chain::{ChainAnswer, ConversationalRetrievalChain};
pub use chunking::{adaptive_chunk_size, split_pages, split_text, ChunkingConfig};
pub use embeddings::{TrigramEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{ChatError, IngestError, ModelError, PromptError, SearchError};
pub use gemini::{GeminiClient, GeminiConfig, GeminiEmbedder, GeminiGenerator};
pub use index::{IndexEntry, ScoredChunk, VectorIndex};
pub use ingest::{IngestedDocument, IngestionPipeline, IngestionReport};
pub use loader::{AutoLoader, DocumentLoader, PdfLoader, TextLoader};
pub use models::{
    ChainConfig, ChatHistory, Chunk, ConversationTurn, DocumentFingerprint, IngestionOptions,
    Metadata, PageRecord, RefinedChunk,
};
pub use pool::WorkerPool;
pub use prompt::PromptTemplate;
pub use refiner::{ChunkRefiner, RefineOutcome, RefineTask};
pub use retriever::{Retriever, DEFAULT_TOP_K};
pub use retry::{run_with_retry, RetryOutcome, RetryPolicy};
pub use session::{ChatState, ModelSet, ProcessResult, Session};
pub use traits::{EmbeddingModel, GenerationModel};
