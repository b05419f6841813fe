#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{HnswConfig, HnswIndex, IndexKind, IndexStats, LinearIndex, SearchHit, VectorIndex};
use crate::Result;

/// Corpus size at which exact search gives way to the graph
pub const DEFAULT_HNSW_THRESHOLD: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", content = "index", rename_all = "snake_case")]
enum Backing {
    Linear(LinearIndex),
    Graph(HnswIndex),
}

/// Exact search for small corpora, HNSW once the corpus reaches `threshold`.
///
/// The switch happens at most once: shrinking the corpus afterwards keeps the
/// graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveIndex {
    threshold: usize,
    hnsw_config: HnswConfig,
    #[serde(default)]
    seed: Option<u64>,
    backing: Backing,
}

impl AdaptiveIndex {
    #[inline]
    pub const fn new(dimensions: usize) -> Self {
        Self::with_threshold(dimensions, DEFAULT_HNSW_THRESHOLD, HnswConfig {
            m: super::hnsw::DEFAULT_M,
            ef_construction: super::hnsw::DEFAULT_EF_CONSTRUCTION,
            ef_search: super::hnsw::DEFAULT_EF_SEARCH,
        })
    }

    #[inline]
    pub const fn with_threshold(dimensions: usize, threshold: usize, hnsw_config: HnswConfig) -> Self {
        Self {
            threshold,
            hnsw_config,
            seed: None,
            backing: Backing::Linear(LinearIndex::new(dimensions)),
        }
    }

    /// Seed the graph built on migration, for reproducible layouts
    #[inline]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    #[inline]
    pub const fn threshold(&self) -> usize {
        self.threshold
    }

    #[inline]
    pub const fn kind(&self) -> IndexKind {
        match self.backing {
            Backing::Linear(_) => IndexKind::Linear,
            Backing::Graph(_) => IndexKind::Graph,
        }
    }

    fn migrate_if_needed(&mut self) -> Result<()> {
        let Backing::Linear(linear) = &self.backing else {
            return Ok(());
        };
        if linear.size() < self.threshold {
            return Ok(());
        }

        let dimensions = linear.dimensions();
        let mut graph = match self.seed {
            Some(seed) => HnswIndex::with_seed(dimensions, self.hnsw_config, seed),
            None => HnswIndex::with_config(dimensions, self.hnsw_config),
        };
        for (id, vector) in linear.vectors() {
            graph.add(id, vector)?;
        }

        info!(
            "Migrated {} vectors from linear scan to HNSW graph",
            graph.size()
        );
        self.backing = Backing::Graph(graph);
        Ok(())
    }

    fn inner(&self) -> &dyn VectorIndex {
        match &self.backing {
            Backing::Linear(index) => index,
            Backing::Graph(index) => index,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn VectorIndex {
        match &mut self.backing {
            Backing::Linear(index) => index,
            Backing::Graph(index) => index,
        }
    }
}

impl VectorIndex for AdaptiveIndex {
    #[inline]
    fn dimensions(&self) -> usize {
        self.inner().dimensions()
    }

    #[inline]
    fn add(&mut self, id: &str, vector: &[f32]) -> Result<()> {
        self.inner_mut().add(id, vector)?;
        self.migrate_if_needed()
    }

    #[inline]
    fn remove(&mut self, id: &str) -> bool {
        self.inner_mut().remove(id)
    }

    #[inline]
    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        self.inner().search(query, top_k)
    }

    #[inline]
    fn size(&self) -> usize {
        self.inner().size()
    }

    #[inline]
    fn clear(&mut self) {
        self.inner_mut().clear();
    }

    #[inline]
    fn contains(&self, id: &str) -> bool {
        self.inner().contains(id)
    }

    #[inline]
    fn stats(&self) -> IndexStats {
        self.inner().stats()
    }
}
