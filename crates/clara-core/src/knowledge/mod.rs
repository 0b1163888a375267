//! Reference-document knowledge base: chunking, embedding, storage and cosine search.

pub mod backend;
pub mod chunker;
pub mod embedding;
pub mod index;

pub use backend::{cosine_distance, MemoryVectorBackend, ScoredChunk, SledVectorBackend, VectorBackend};
pub use chunker::split_into_chunks;
pub use embedding::{Embedder, HashingEmbedder, OpenAiEmbedder};
pub use index::{IngestReport, KnowledgeIndex, SearchHit, SearchProfile};

/// Result type for knowledge operations.
pub type KnowledgeResult<T> = Result<T, KnowledgeError>;

/// Errors raised by the embedding capability or the chunk storage.
#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("Embedding request failed: {0}")]
    Embedding(String),

    #[error("Embedding API error {status}: {body}")]
    EmbeddingApi { status: u16, body: String },

    #[error("Embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Document has no content to index")]
    EmptyDocument,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
