
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{RagError, Result};

pub const DEFAULT_CHUNK_SIZE: usize = 800;
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

/// Configuration for content chunking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Window length in characters
    pub chunk_size: usize,
    /// Characters shared by adjacent windows
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    #[inline]
    pub const fn validate(&self) -> Result<()> {
        if self.overlap >= self.chunk_size {
            return Err(RagError::InvalidChunking {
                chunk_size: self.chunk_size,
                overlap: self.overlap,
            });
        }
        Ok(())
    }

    /// Split text using this configuration
    #[inline]
    pub fn split(&self, text: &str) -> Result<Vec<String>> {
        split_text(text, self.chunk_size, self.overlap)
    }
}

/// Split text into overlapping fixed-size windows over its characters.
///
/// Window `i` covers `[start, start + chunk_size)`; the next window starts
/// `overlap` characters before the previous one ended. Text no longer than
/// `chunk_size` comes back as a single chunk.
#[inline]
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>> {
    ChunkingConfig {
        chunk_size,
        overlap,
    }
    .validate()?;

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= chunk_size {
        return Ok(vec![text.to_owned()]);
    }

    let stride = chunk_size - overlap;
    let mut chunks = Vec::with_capacity(chars.len().div_ceil(stride));
    let mut start = 0;

    loop {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect::<String>());
        if end == chars.len() {
            break;
        }
        start = end - overlap;
    }

    debug!(
        "Split {} characters into {} chunks (size {}, overlap {})",
        chars.len(),
        chunks.len(),
        chunk_size,
        overlap
    );

    Ok(chunks)
}
