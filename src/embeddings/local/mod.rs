
use fnv::FnvHasher;
use std::collections::BTreeMap;
use std::hash::Hasher;

use crate::index::l2_normalize;

/// Number of slots each token is spread over
const HASH_PROBES: u64 = 5;
const PROBE_STRIDE: u64 = 31;
const PROBE_DECAY: f32 = 0.15;
/// Tokens shorter than this carry too little signal to be worth hashing
const MIN_TOKEN_CHARS: usize = 3;
/// Terms near the end of a text count up to this much more than the first term
const POSITION_BOOST: f32 = 0.5;

/// Deterministic hashed bag-of-words embedder that needs no network access.
///
/// Vectors are L2-normalised, so cosine similarity between two of them
/// reflects shared vocabulary. Texts without any usable token produce the
/// zero vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalEmbedder {
    dimensions: usize,
}

impl LocalEmbedder {
    #[inline]
    pub const fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    #[inline]
    pub const fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[inline]
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimensions];
        if self.dimensions == 0 {
            return vector;
        }

        let tokens = tokenize(text);
        if tokens.is_empty() {
            return vector;
        }

        // BTreeMap keeps the accumulation order stable across runs
        let total = tokens.len() as f32;
        let mut weights: BTreeMap<&str, f32> = BTreeMap::new();
        for (position, token) in tokens.iter().enumerate() {
            let weight = (position as f32 / total).mul_add(POSITION_BOOST, 1.0);
            *weights.entry(token.as_str()).or_insert(0.0) += weight;
        }

        let width = self.dimensions as u64;
        for (token, weight) in weights {
            let hash = token_hash(token);
            for probe in 0..HASH_PROBES {
                let slot = hash.wrapping_add(probe * PROBE_STRIDE) % width;
                let decay = (probe as f32).mul_add(-PROBE_DECAY, 1.0);
                if let Some(value) = vector.get_mut(slot as usize) {
                    *value = weight.mul_add(decay, *value);
                }
            }
        }

        let peak = vector.iter().copied().fold(0.0_f32, f32::max);
        if peak > 0.0 {
            let scale = peak.ln_1p();
            for value in &mut vector {
                *value = value.ln_1p() / scale;
            }
        }

        l2_normalize(&mut vector);
        vector
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .map(str::to_owned)
        .collect()
}

fn token_hash(token: &str) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(token.as_bytes());
    hasher.finish()
}
