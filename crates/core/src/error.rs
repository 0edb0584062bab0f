use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("unsupported document type: {0}")]
    UnsupportedDocument(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("refinement worker failed: {0}")]
    Worker(String),

    #[error("index build failed: {0}")]
    IndexBuild(String),

    #[error("embedding failed while building index: {0}")]
    Embedding(#[from] ModelError),
}

/// Failure of a single call to a generation or embedding model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("{backend} returned status {status}: {body}")]
    Status {
        backend: String,
        status: u16,
        body: String,
    },

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("model call failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("query embedding has {actual} dimensions, index has {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("query embedding failed: {0}")]
    Embedding(#[from] ModelError),

    #[error("search request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("template slot `{0}` has no value")]
    MissingSlot(String),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("no document has been processed yet")]
    NotReady,

    #[error("question is empty")]
    EmptyQuestion,

    #[error("retrieval failed: {0}")]
    Retrieval(#[from] SearchError),

    #[error("answer generation failed: {0}")]
    Generation(#[source] ModelError),

    #[error(transparent)]
    Prompt(#[from] PromptError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
