use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding backend error: {0}")]
    EmbeddingBackend(String),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error(
        "Corpus inconsistency: index holds {index_size} vectors but the corpus has {chunk_count} embedded chunks"
    )]
    CorpusInconsistency {
        index_size: usize,
        chunk_count: usize,
    },

    #[error("Chunk {chunk_id} already belongs to document {owner}")]
    DuplicateChunk { chunk_id: String, owner: String },

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Invalid chunking parameters: overlap {overlap} must be smaller than chunk size {chunk_size}")]
    InvalidChunking { chunk_size: usize, overlap: usize },

    #[error("Unknown embedding model: {0}")]
    UnknownModel(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl RagError {
    /// Whether repeating the same call may succeed
    #[inline]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingBackend(_) | Self::CacheUnavailable(_) | Self::Io(_)
        )
    }
}

pub mod cache;
pub mod commands;
pub mod config;
pub mod embeddings;
pub mod index;
pub mod retrieval;
