use serde::Serialize;

use crate::{RagError, Result};

pub const LOCAL_HASH_MODEL_ID: &str = "local-hash";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    RemoteApi,
    HuggingFace,
    LocalFallback,
}

impl ProviderKind {
    #[inline]
    pub const fn label(self) -> &'static str {
        match self {
            Self::RemoteApi => "remote",
            Self::HuggingFace => "huggingface",
            Self::LocalFallback => "local",
        }
    }
}

/// A model the provider knows how to talk to, with the vector width it produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EmbeddingModel {
    pub id: &'static str,
    pub name: &'static str,
    pub provider: ProviderKind,
    pub dimensions: usize,
    pub max_input_tokens: usize,
}

impl EmbeddingModel {
    #[inline]
    pub const fn is_local(&self) -> bool {
        matches!(self.provider, ProviderKind::LocalFallback)
    }
}

pub const EMBEDDING_MODELS: &[EmbeddingModel] = &[
    EmbeddingModel {
        id: "text-embedding-3-small",
        name: "OpenAI text-embedding-3-small",
        provider: ProviderKind::RemoteApi,
        dimensions: 1536,
        max_input_tokens: 8191,
    },
    EmbeddingModel {
        id: "text-embedding-3-large",
        name: "OpenAI text-embedding-3-large",
        provider: ProviderKind::RemoteApi,
        dimensions: 3072,
        max_input_tokens: 8191,
    },
    EmbeddingModel {
        id: "text-embedding-ada-002",
        name: "OpenAI text-embedding-ada-002",
        provider: ProviderKind::RemoteApi,
        dimensions: 1536,
        max_input_tokens: 8191,
    },
    EmbeddingModel {
        id: "sentence-transformers/all-MiniLM-L6-v2",
        name: "Sentence Transformers all-MiniLM-L6-v2",
        provider: ProviderKind::HuggingFace,
        dimensions: 384,
        max_input_tokens: 256,
    },
    EmbeddingModel {
        id: LOCAL_HASH_MODEL_ID,
        name: "Local hashed bag-of-words",
        provider: ProviderKind::LocalFallback,
        dimensions: 384,
        max_input_tokens: usize::MAX,
    },
];

#[inline]
pub fn find_model(id: &str) -> Result<&'static EmbeddingModel> {
    EMBEDDING_MODELS
        .iter()
        .find(|model| model.id == id)
        .ok_or_else(|| RagError::UnknownModel(id.to_string()))
}
