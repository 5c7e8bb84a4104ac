//! Random-hyperplane LSH for candidate pair generation.
//!
//! Buckets vectors by the sign pattern of projections onto random
//! hyperplanes; a pair colliding in at least one table becomes a candidate
//! and is then verified with the exact cosine similarity.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::similarity::{dot, normalize_vectors, sort_pairs, SimilarPair};

/// LSH tuning. `seed` fixes the hyperplanes for reproducible runs.
#[derive(Debug, Clone)]
pub struct LshConfig {
    pub num_tables: usize,
    pub num_bits: usize,
    pub seed: Option<u64>,
}

impl Default for LshConfig {
    fn default() -> Self {
        Self {
            num_tables: 10,
            num_bits: 8,
            seed: None,
        }
    }
}

/// Locality-sensitive hashing index for cosine similarity.
pub struct LshIndex {
    dim: usize,
    num_bits: usize,
    /// One flattened `num_bits x dim` matrix per table.
    hyperplanes: Vec<Vec<f32>>,
    /// Per table: hash value -> item indices, in insertion order.
    tables: Vec<HashMap<u32, Vec<usize>>>,
}

impl LshIndex {
    pub fn new(dim: usize, config: &LshConfig) -> Self {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        // A u32 hash caps the usable bits at 32.
        let num_bits = config.num_bits.clamp(1, 32);
        let hyperplanes = (0..config.num_tables.max(1))
            .map(|_| {
                (0..num_bits * dim)
                    .map(|_| rng.gen_range(-1.0f32..1.0))
                    .collect()
            })
            .collect::<Vec<Vec<f32>>>();
        let tables = vec![HashMap::new(); hyperplanes.len()];
        Self {
            dim,
            num_bits,
            hyperplanes,
            tables,
        }
    }

    fn hash_vector(&self, vector: &[f32], table_idx: usize) -> u32 {
        let planes = &self.hyperplanes[table_idx];
        let mut value = 0u32;
        for bit in 0..self.num_bits {
            let row = &planes[bit * self.dim..(bit + 1) * self.dim];
            if dot(row, vector) > 0.0 {
                value |= 1 << bit;
            }
        }
        value
    }

    /// Index all vectors into every hash table.
    pub fn index(&mut self, vectors: &[Vec<f32>]) {
        for (idx, vector) in vectors.iter().enumerate() {
            for table_idx in 0..self.tables.len() {
                let hash = self.hash_vector(vector, table_idx);
                self.tables[table_idx].entry(hash).or_default().push(idx);
            }
        }
    }

    /// All `(i, j)` with `i < j` sharing at least one bucket, sorted.
    pub fn candidate_pairs(&self) -> Vec<(usize, usize)> {
        let mut candidates = HashSet::new();
        for table in &self.tables {
            for bucket in table.values() {
                if bucket.len() < 2 {
                    continue;
                }
                for a in 0..bucket.len() {
                    for b in (a + 1)..bucket.len() {
                        candidates.insert((bucket[a], bucket[b]));
                    }
                }
            }
        }
        let mut out: Vec<(usize, usize)> = candidates.into_iter().collect();
        out.sort_unstable();
        out
    }
}

/// Find similar pairs via LSH candidates plus exact verification.
pub fn find_similar_pairs_lsh(
    vectors: &[Vec<f32>],
    threshold: f32,
    config: &LshConfig,
    parallelism: usize,
) -> Vec<SimilarPair> {
    let n = vectors.len();
    if n < 2 {
        return Vec::new();
    }

    let normalized = normalize_vectors(vectors);
    let dim = normalized[0].len();
    let mut index = LshIndex::new(dim, config);
    index.index(&normalized);

    let candidates = index.candidate_pairs();
    debug!(
        n_items = n,
        n_candidates = candidates.len(),
        "LSH candidate generation"
    );
    if candidates.is_empty() {
        return Vec::new();
    }

    let parallelism = parallelism.max(1);
    let chunk_size = candidates.len().div_ceil(parallelism);

    let mut pairs: Vec<SimilarPair> = Vec::new();
    std::thread::scope(|scope| {
        let normalized = &normalized;
        let mut handles = Vec::new();
        for chunk in candidates.chunks(chunk_size) {
            handles.push(scope.spawn(move || {
                let mut chunk_pairs = Vec::new();
                for &(i, j) in chunk {
                    let similarity = dot(&normalized[i], &normalized[j]);
                    if similarity >= threshold {
                        chunk_pairs.push((i, j, similarity));
                    }
                }
                chunk_pairs
            }));
        }
        for handle in handles {
            match handle.join() {
                Ok(chunk) => pairs.extend(chunk),
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
    });

    debug!(
        candidates = candidates.len(),
        matches = pairs.len(),
        threshold,
        "LSH similarity matching"
    );
    sort_pairs(&mut pairs);
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> LshConfig {
        LshConfig {
            seed: Some(1234),
            ..LshConfig::default()
        }
    }

    #[test]
    fn identical_vectors_always_collide() {
        let vectors: Vec<Vec<f32>> = (0..60).map(|_| vec![0.3, -0.7, 0.2, 0.5]).collect();
        let pairs = find_similar_pairs_lsh(&vectors, 0.99, &seeded(), 4);
        assert_eq!(pairs.len(), 60 * 59 / 2);
    }

    #[test]
    fn verification_rejects_dissimilar_collisions() {
        // Orthogonal vectors may still collide in a table; verification must
        // drop them at a high threshold.
        let mut vectors = Vec::new();
        for i in 0..30 {
            let angle = i as f32 * 0.21;
            vectors.push(vec![angle.cos(), angle.sin()]);
        }
        let pairs = find_similar_pairs_lsh(&vectors, 0.999, &seeded(), 4);
        for &(i, j, s) in &pairs {
            assert!(i < j);
            assert!(s >= 0.999);
        }
    }

    #[test]
    fn candidate_pairs_are_deduplicated_across_tables() {
        let vectors: Vec<Vec<f32>> = (0..5).map(|_| vec![1.0, 0.0]).collect();
        let mut index = LshIndex::new(2, &seeded());
        index.index(&vectors);
        let candidates = index.candidate_pairs();
        assert_eq!(candidates.len(), 10);
        let unique: HashSet<_> = candidates.iter().collect();
        assert_eq!(unique.len(), candidates.len());
    }

    #[test]
    fn same_seed_reproduces_pairs() {
        let vectors: Vec<Vec<f32>> = (0..80)
            .map(|i| {
                let a = i as f32 * 0.07;
                vec![a.cos(), a.sin(), (a * 2.0).cos()]
            })
            .collect();
        let first = find_similar_pairs_lsh(&vectors, 0.9, &seeded(), 4);
        let second = find_similar_pairs_lsh(&vectors, 0.9, &seeded(), 1);
        assert_eq!(first, second);
    }
}
