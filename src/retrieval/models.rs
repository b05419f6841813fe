use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::Result;

/// Characters of parsed text kept on the document record
pub const CONTENT_PREVIEW_CHARS: usize = 10_000;

/// A file handed to ingestion: raw bytes plus what the caller knows about them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestFile {
    pub name: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl IngestFile {
    #[inline]
    pub fn new(name: impl Into<String>, mime_type: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type,
            bytes,
        }
    }

    #[inline]
    pub fn from_text(name: impl Into<String>, text: &str) -> Self {
        Self::new(name, Some("text/plain".to_string()), text.as_bytes().to_vec())
    }

    #[inline]
    pub async fn from_path(path: &Path, mime_type: Option<String>) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        Ok(Self::new(name, mime_type, bytes))
    }

    /// Lower-cased extension of the file name, if any
    #[inline]
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
    }
}

/// Text produced by a [`super::DocumentParser`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDocument {
    pub content: String,
    pub page_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub page_count: usize,
    pub raw_content_preview: String,
    pub chunk_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub document_id: String,
    pub document_name: String,
    pub content: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    /// Absent when every embedding attempt for this chunk failed
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchOptions {
    pub top_k: usize,
    pub min_score: f32,
    pub use_cache: bool,
}

impl Default for SearchOptions {
    #[inline]
    fn default() -> Self {
        Self {
            top_k: 5,
            min_score: 0.0,
            use_cache: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub document_id: String,
    pub document_name: String,
    pub content: String,
    pub chunk_index: usize,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub embedding_time: Duration,
    pub retrieval_time: Duration,
    pub total_time: Duration,
    pub chunks_searched: usize,
    pub chunks_retrieved: usize,
    /// Rough token estimate for the query, two characters per token
    pub tokens_used: usize,
    pub from_cache: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub stats: SearchStats,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub document: Document,
    pub chunks: Vec<DocumentChunk>,
}

/// The reduced view of an ingestion handed to callers outside the crate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub document_id: String,
    pub chunk_count: usize,
}

impl IngestOutcome {
    #[inline]
    pub fn summary(&self) -> IngestSummary {
        IngestSummary {
            document_id: self.document.id.clone(),
            chunk_count: self.chunks.len(),
        }
    }
}

/// Parsed text and chunk boundaries cached per file content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct CachedDocument {
    pub file_name: String,
    pub content_preview: String,
    pub page_count: usize,
    pub chunks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct CachedHit {
    pub chunk_id: String,
    pub score: f32,
}

/// Everything needed to bring a knowledge base back after a restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct KnowledgeBaseSnapshot {
    pub model_id: String,
    pub dimensions: usize,
    /// Drawn fresh whenever the knowledge base starts over; older snapshots lack it
    #[serde(default)]
    pub generation: String,
    pub revision: u64,
    pub documents: Vec<Document>,
    pub chunks: Vec<DocumentChunk>,
}
