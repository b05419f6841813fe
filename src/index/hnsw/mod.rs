//! Hierarchical navigable small world graph.
//!
//! Nodes live in an arena of slots; removal frees the slot and cuts every
//! edge that points at it, so no stale neighbour ids survive. Each node
//! tracks its inbound edges as well as its outbound ones to make that cheap.

#[cfg(test)]
mod tests;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use tracing::debug;

use super::{IndexKind, IndexStats, SearchHit, VectorIndex, check_dimensions, cosine_similarity};
use crate::Result;

pub const DEFAULT_M: usize = 16;
pub const DEFAULT_EF_CONSTRUCTION: usize = 200;
pub const DEFAULT_EF_SEARCH: usize = 64;
/// Hard cap on the number of layers
pub const MAX_LEVEL: usize = 16;

/// Estimated bookkeeping per node on top of the vector itself
const NODE_OVERHEAD_BYTES: usize = 200;

type Slot = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    /// Maximum out-degree per node per layer
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl Default for HnswConfig {
    #[inline]
    fn default() -> Self {
        Self {
            m: DEFAULT_M,
            ef_construction: DEFAULT_EF_CONSTRUCTION,
            ef_search: DEFAULT_EF_SEARCH,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HnswNode {
    id: String,
    vector: Vec<f32>,
    level: usize,
    /// `neighbors[l]` holds the outbound edges on layer `l`
    neighbors: Vec<BTreeSet<Slot>>,
    /// `inbound[l]` holds the nodes with an edge to this one on layer `l`
    inbound: Vec<BTreeSet<Slot>>,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    score: f32,
    slot: Slot,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    // Higher score wins; on a tie the lower slot wins
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.slot.cmp(&self.slot))
    }
}

fn entropy_rng() -> StdRng {
    StdRng::from_os_rng()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswIndex {
    dimensions: usize,
    config: HnswConfig,
    nodes: Vec<Option<HnswNode>>,
    free_slots: Vec<Slot>,
    slots_by_id: HashMap<String, Slot>,
    entry_point: Option<Slot>,
    level_max: usize,
    #[serde(skip, default = "entropy_rng")]
    rng: StdRng,
}

impl HnswIndex {
    #[inline]
    pub fn new(dimensions: usize) -> Self {
        Self::with_config(dimensions, HnswConfig::default())
    }

    #[inline]
    pub fn with_config(dimensions: usize, config: HnswConfig) -> Self {
        Self::with_rng(dimensions, config, entropy_rng())
    }

    /// Level assignment driven by a fixed seed, for reproducible graphs
    #[inline]
    pub fn with_seed(dimensions: usize, config: HnswConfig, seed: u64) -> Self {
        Self::with_rng(dimensions, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(dimensions: usize, config: HnswConfig, rng: StdRng) -> Self {
        Self {
            dimensions,
            config: HnswConfig {
                m: config.m.max(1),
                ef_construction: config.ef_construction.max(1),
                ef_search: config.ef_search.max(1),
            },
            nodes: Vec::new(),
            free_slots: Vec::new(),
            slots_by_id: HashMap::new(),
            entry_point: None,
            level_max: 0,
            rng,
        }
    }

    #[inline]
    pub const fn config(&self) -> &HnswConfig {
        &self.config
    }

    #[inline]
    pub fn entry_point(&self) -> Option<&str> {
        self.entry_point
            .and_then(|slot| self.node(slot))
            .map(|node| node.id.as_str())
    }

    #[inline]
    pub const fn level_max(&self) -> usize {
        self.level_max
    }

    #[inline]
    pub fn level_of(&self, id: &str) -> Option<usize> {
        self.node_by_id(id).map(|node| node.level)
    }

    /// Outbound neighbour ids of `id` on `level`
    #[inline]
    pub fn neighbors(&self, id: &str, level: usize) -> Option<Vec<&str>> {
        let node = self.node_by_id(id)?;
        let edges = node.neighbors.get(level)?;
        Some(
            edges
                .iter()
                .filter_map(|&slot| self.node(slot))
                .map(|neighbor| neighbor.id.as_str())
                .collect(),
        )
    }

    #[inline]
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.nodes
            .iter()
            .flatten()
            .map(|node| node.id.as_str())
    }

    fn node(&self, slot: Slot) -> Option<&HnswNode> {
        self.nodes.get(slot).and_then(Option::as_ref)
    }

    fn node_by_id(&self, id: &str) -> Option<&HnswNode> {
        self.slots_by_id.get(id).and_then(|&slot| self.node(slot))
    }

    fn score(&self, query: &[f32], slot: Slot) -> Option<f32> {
        self.node(slot)
            .map(|node| cosine_similarity(query, &node.vector))
    }

    /// Geometric level draw: floor(-ln(U) / ln(M)), capped at [`MAX_LEVEL`]
    fn random_level(&mut self) -> usize {
        let uniform = 1.0 - self.rng.random::<f64>();
        let base = (self.config.m.max(2) as f64).ln();
        let level = (-uniform.ln() / base).floor();
        (level as usize).min(MAX_LEVEL)
    }

    fn allocate(&mut self, node: HnswNode) -> Slot {
        if let Some(slot) = self.free_slots.pop() {
            if let Some(entry) = self.nodes.get_mut(slot) {
                *entry = Some(node);
                return slot;
            }
        }
        self.nodes.push(Some(node));
        self.nodes.len() - 1
    }

    fn connect(&mut self, from: Slot, to: Slot, level: usize) {
        if let Some(edges) = self
            .nodes
            .get_mut(from)
            .and_then(Option::as_mut)
            .and_then(|node| node.neighbors.get_mut(level))
        {
            edges.insert(to);
        }
        if let Some(edges) = self
            .nodes
            .get_mut(to)
            .and_then(Option::as_mut)
            .and_then(|node| node.inbound.get_mut(level))
        {
            edges.insert(from);
        }
    }

    fn disconnect(&mut self, from: Slot, to: Slot, level: usize) {
        if let Some(edges) = self
            .nodes
            .get_mut(from)
            .and_then(Option::as_mut)
            .and_then(|node| node.neighbors.get_mut(level))
        {
            edges.remove(&to);
        }
        if let Some(edges) = self
            .nodes
            .get_mut(to)
            .and_then(Option::as_mut)
            .and_then(|node| node.inbound.get_mut(level))
        {
            edges.remove(&from);
        }
    }

    /// Beam search on one layer; returns up to `ef` candidates, best first
    fn search_layer(&self, query: &[f32], entry: Slot, ef: usize, level: usize) -> Vec<Candidate> {
        let Some(entry_score) = self.score(query, entry) else {
            return Vec::new();
        };
        let start = Candidate {
            score: entry_score,
            slot: entry,
        };

        let mut visited = HashSet::from([entry]);
        let mut candidates = BinaryHeap::from([start]);
        let mut results = BinaryHeap::from([Reverse(start)]);

        while let Some(current) = candidates.pop() {
            if let Some(Reverse(worst)) = results.peek() {
                if results.len() >= ef && current.score < worst.score {
                    break;
                }
            }

            let Some(edges) = self
                .node(current.slot)
                .and_then(|node| node.neighbors.get(level))
            else {
                continue;
            };

            for &neighbor in edges {
                if !visited.insert(neighbor) {
                    continue;
                }
                let Some(score) = self.score(query, neighbor) else {
                    continue;
                };

                let admit = results.len() < ef
                    || results
                        .peek()
                        .is_some_and(|Reverse(worst)| score > worst.score);
                if admit {
                    let candidate = Candidate {
                        score,
                        slot: neighbor,
                    };
                    candidates.push(candidate);
                    results.push(Reverse(candidate));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut found: Vec<Candidate> = results.into_iter().map(|Reverse(c)| c).collect();
        found.sort_by(|a, b| b.cmp(a));
        found
    }

    /// Greedy walk from the entry point down to `target_level + 1`
    fn descend(&self, query: &[f32], entry: Slot, target_level: usize) -> Slot {
        let mut current = entry;
        for level in (target_level + 1..=self.level_max).rev() {
            if let Some(best) = self.search_layer(query, current, 1, level).first() {
                current = best.slot;
            }
        }
        current
    }

    fn insert(&mut self, id: &str, vector: &[f32]) {
        let level = self.random_level();
        let slot = self.allocate(HnswNode {
            id: id.to_string(),
            vector: vector.to_vec(),
            level,
            neighbors: vec![BTreeSet::new(); level + 1],
            inbound: vec![BTreeSet::new(); level + 1],
        });
        self.slots_by_id.insert(id.to_string(), slot);

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(slot);
            self.level_max = level;
            return;
        };

        let mut current = self.descend(vector, entry, level);
        for layer in (0..=level.min(self.level_max)).rev() {
            let candidates = self.search_layer(vector, current, self.config.ef_construction, layer);

            let selected: Vec<Slot> = candidates
                .iter()
                .filter(|candidate| candidate.slot != slot)
                .take(self.config.m)
                .map(|candidate| candidate.slot)
                .collect();

            for &neighbor in &selected {
                self.connect(slot, neighbor, layer);
                self.link_back(neighbor, slot, vector, layer);
            }

            if let Some(best) = candidates.first() {
                current = best.slot;
            }
        }

        if level > self.level_max {
            debug!("Raising HNSW entry point to level {}", level);
            self.entry_point = Some(slot);
            self.level_max = level;
        }
    }

    /// Adds the reverse edge `neighbor -> new` if `neighbor` has room, or if
    /// `new` is strictly closer than its current farthest link
    fn link_back(&mut self, neighbor: Slot, new: Slot, new_vector: &[f32], layer: usize) {
        let Some(node) = self.node(neighbor) else {
            return;
        };
        let Some(edges) = node.neighbors.get(layer) else {
            return;
        };

        if edges.len() < self.config.m {
            self.connect(neighbor, new, layer);
            return;
        }

        let farthest = edges
            .iter()
            .filter_map(|&slot| {
                self.score(&node.vector, slot)
                    .map(|score| Candidate { score, slot })
            })
            .min();
        let new_score = cosine_similarity(new_vector, &node.vector);

        if let Some(farthest) = farthest {
            if new_score > farthest.score {
                self.disconnect(neighbor, farthest.slot, layer);
                self.connect(neighbor, new, layer);
            }
        }
    }

    fn detach(&mut self, slot: Slot) -> Option<HnswNode> {
        let node = self.nodes.get_mut(slot)?.take()?;

        for (layer, targets) in node.neighbors.iter().enumerate() {
            for &target in targets {
                if let Some(edges) = self
                    .nodes
                    .get_mut(target)
                    .and_then(Option::as_mut)
                    .and_then(|n| n.inbound.get_mut(layer))
                {
                    edges.remove(&slot);
                }
            }
        }
        for (layer, sources) in node.inbound.iter().enumerate() {
            for &source in sources {
                if let Some(edges) = self
                    .nodes
                    .get_mut(source)
                    .and_then(Option::as_mut)
                    .and_then(|n| n.neighbors.get_mut(layer))
                {
                    edges.remove(&slot);
                }
            }
        }

        self.slots_by_id.remove(&node.id);
        self.free_slots.push(slot);

        if self.entry_point == Some(slot) {
            self.promote_entry_point();
        }

        Some(node)
    }

    /// Picks the highest-level survivor as the new entry point
    fn promote_entry_point(&mut self) {
        let best = self
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(slot, node)| node.as_ref().map(|n| (n.level, Reverse(slot))))
            .max();

        match best {
            Some((level, Reverse(slot))) => {
                self.entry_point = Some(slot);
                self.level_max = level;
            }
            None => {
                self.entry_point = None;
                self.level_max = 0;
            }
        }
    }
}

impl VectorIndex for HnswIndex {
    #[inline]
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[inline]
    fn add(&mut self, id: &str, vector: &[f32]) -> Result<()> {
        check_dimensions(self.dimensions, vector.len())?;

        if let Some(&slot) = self.slots_by_id.get(id) {
            self.detach(slot);
        }
        self.insert(id, vector);
        Ok(())
    }

    #[inline]
    fn remove(&mut self, id: &str) -> bool {
        let Some(&slot) = self.slots_by_id.get(id) else {
            return false;
        };
        self.detach(slot).is_some()
    }

    #[inline]
    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        check_dimensions(self.dimensions, query.len())?;

        let Some(entry) = self.entry_point else {
            return Ok(Vec::new());
        };
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let current = self.descend(query, entry, 0);
        let ef = top_k.max(self.config.ef_search);

        let hits = self
            .search_layer(query, current, ef, 0)
            .into_iter()
            .take(top_k)
            .filter_map(|candidate| {
                self.node(candidate.slot).map(|node| SearchHit {
                    id: node.id.clone(),
                    score: candidate.score,
                })
            })
            .collect();

        Ok(hits)
    }

    #[inline]
    fn size(&self) -> usize {
        self.slots_by_id.len()
    }

    #[inline]
    fn clear(&mut self) {
        self.nodes.clear();
        self.free_slots.clear();
        self.slots_by_id.clear();
        self.entry_point = None;
        self.level_max = 0;
    }

    #[inline]
    fn contains(&self, id: &str) -> bool {
        self.slots_by_id.contains_key(id)
    }

    #[inline]
    fn stats(&self) -> IndexStats {
        let node_count = self.size();
        let total_edges: usize = self
            .nodes
            .iter()
            .flatten()
            .map(|node| node.neighbors.iter().map(BTreeSet::len).sum::<usize>())
            .sum();

        let avg_connections = if node_count == 0 {
            0.0
        } else {
            (total_edges as f32 / node_count as f32 * 10.0).round() / 10.0
        };

        IndexStats {
            kind: IndexKind::Graph,
            node_count,
            max_level: self.level_max,
            avg_connections,
            memory_estimate_bytes: node_count
                * (self.dimensions * size_of::<f32>() + NODE_OVERHEAD_BYTES),
        }
    }
}
