//! In-memory nearest-neighbour indices over fixed-width vectors.
//!
//! Scores are cosine similarities, so every search returns hits ordered from
//! most to least similar.

#[cfg(test)]
mod tests;

pub mod adaptive;
pub mod hnsw;
pub mod linear;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{RagError, Result};

pub use adaptive::{AdaptiveIndex, DEFAULT_HNSW_THRESHOLD};
pub use hnsw::{HnswConfig, HnswIndex};
pub use linear::LinearIndex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    Linear,
    Graph,
}

impl fmt::Display for IndexKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linear => f.write_str("linear"),
            Self::Graph => f.write_str("hnsw"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IndexStats {
    pub kind: IndexKind,
    pub node_count: usize,
    pub max_level: usize,
    pub avg_connections: f32,
    pub memory_estimate_bytes: usize,
}

pub trait VectorIndex {
    /// Width every stored and queried vector must have
    fn dimensions(&self) -> usize;

    /// Insert a vector, replacing any vector already stored under `id`
    fn add(&mut self, id: &str, vector: &[f32]) -> Result<()>;

    /// Returns whether `id` was present
    fn remove(&mut self, id: &str) -> bool;

    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>>;

    fn size(&self) -> usize;

    #[inline]
    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    fn clear(&mut self);

    fn contains(&self, id: &str) -> bool;

    fn stats(&self) -> IndexStats;
}

#[inline]
pub const fn check_dimensions(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(RagError::DimensionMismatch { expected, actual })
    }
}

/// Cosine similarity of two equally sized vectors; 0 when either has zero norm
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b) {
        dot = x.mul_add(*y, dot);
        norm_a = x.mul_add(*x, norm_a);
        norm_b = y.mul_add(*y, norm_b);
    }

    let denominator = norm_a.sqrt() * norm_b.sqrt();
    if denominator == 0.0 {
        0.0
    } else {
        dot / denominator
    }
}

#[inline]
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().fold(0.0_f32, |acc, v| v.mul_add(*v, acc)).sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Orders hits best first, breaking score ties by id so results are repeatable
pub(crate) fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
}
