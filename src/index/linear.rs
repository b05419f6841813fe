use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{
    IndexKind, IndexStats, SearchHit, VectorIndex, check_dimensions, cosine_similarity, sort_hits,
};
use crate::Result;

/// Fixed bookkeeping cost per stored vector
const ENTRY_OVERHEAD_BYTES: usize = 64;

/// Exact search by scoring every stored vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearIndex {
    dimensions: usize,
    vectors: BTreeMap<String, Vec<f32>>,
}

impl LinearIndex {
    #[inline]
    pub const fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            vectors: BTreeMap::new(),
        }
    }

    /// Stored vectors in id order
    #[inline]
    pub fn vectors(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.vectors
            .iter()
            .map(|(id, vector)| (id.as_str(), vector.as_slice()))
    }
}

impl VectorIndex for LinearIndex {
    #[inline]
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[inline]
    fn add(&mut self, id: &str, vector: &[f32]) -> Result<()> {
        check_dimensions(self.dimensions, vector.len())?;
        self.vectors.insert(id.to_string(), vector.to_vec());
        Ok(())
    }

    #[inline]
    fn remove(&mut self, id: &str) -> bool {
        self.vectors.remove(id).is_some()
    }

    #[inline]
    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        check_dimensions(self.dimensions, query.len())?;

        let mut hits: Vec<SearchHit> = self
            .vectors
            .iter()
            .map(|(id, vector)| SearchHit {
                id: id.clone(),
                score: cosine_similarity(query, vector),
            })
            .collect();

        sort_hits(&mut hits);
        hits.truncate(top_k);
        Ok(hits)
    }

    #[inline]
    fn size(&self) -> usize {
        self.vectors.len()
    }

    #[inline]
    fn clear(&mut self) {
        self.vectors.clear();
    }

    #[inline]
    fn contains(&self, id: &str) -> bool {
        self.vectors.contains_key(id)
    }

    #[inline]
    fn stats(&self) -> IndexStats {
        let per_vector = self.dimensions * size_of::<f32>() + ENTRY_OVERHEAD_BYTES;
        IndexStats {
            kind: IndexKind::Linear,
            node_count: self.vectors.len(),
            max_level: 0,
            avg_connections: 0.0,
            memory_estimate_bytes: self.vectors.len() * per_vector,
        }
    }
}
