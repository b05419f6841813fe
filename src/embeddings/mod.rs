// Embeddings module
// Text chunking plus the remote, HuggingFace and local backends that turn chunks into vectors

pub mod chunking;
pub mod huggingface;
pub mod local;
pub mod models;
pub mod pool;
pub mod provider;
pub mod remote;

pub use chunking::{ChunkingConfig, split_text};
pub use huggingface::HuggingFaceEmbedder;
pub use local::LocalEmbedder;
pub use models::{EMBEDDING_MODELS, EmbeddingModel, ProviderKind, find_model};
pub use pool::{CancelFlag, WorkerPool};
pub use provider::{EmbeddingBackend, EmbeddingProvider, EmbeddingStats};
pub use remote::RemoteEmbedder;
