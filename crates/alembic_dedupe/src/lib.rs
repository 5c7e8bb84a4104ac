//! Similarity search and clustering for embedding vectors.
//!
//! Two pair-finding strategies (dense scan for small corpora, LSH candidate
//! filtering for large ones) and two clustering strategies (BFS connected
//! components, Louvain-style communities for large graphs).

pub mod cluster;
pub mod lsh;
pub mod similarity;

pub use cluster::cluster_pairs;
pub use lsh::{find_similar_pairs_lsh, LshConfig, LshIndex};
pub use similarity::{find_similar_pairs_dense, SimilarPair};

use tracing::debug;

/// Strategy selection and tuning for pair search.
#[derive(Debug, Clone)]
pub struct SimilarityConfig {
    pub use_lsh: bool,
    /// Minimum corpus size before the LSH path is taken.
    pub lsh_min_items: usize,
    pub lsh: LshConfig,
    /// Upper bound on scan threads.
    pub parallelism: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            use_lsh: true,
            lsh_min_items: 50,
            lsh: LshConfig::default(),
            parallelism: 10,
        }
    }
}

/// Find all pairs with cosine similarity at or above `threshold`.
///
/// Vectors are normalized internally, so callers may pass raw embeddings.
/// Output pairs have `i < j`, are deduplicated, and are sorted by descending
/// similarity.
pub fn find_similar_pairs(
    vectors: &[Vec<f32>],
    threshold: f32,
    config: &SimilarityConfig,
) -> Vec<SimilarPair> {
    let n = vectors.len();
    if config.use_lsh && n >= config.lsh_min_items {
        debug!(n, threshold, "using LSH similarity search");
        find_similar_pairs_lsh(vectors, threshold, &config.lsh, config.parallelism)
    } else {
        debug!(n, threshold, "using dense similarity search");
        find_similar_pairs_dense(vectors, threshold, config.parallelism)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_switches_on_corpus_size() {
        let config = SimilarityConfig {
            lsh_min_items: 4,
            lsh: LshConfig {
                seed: Some(7),
                ..LshConfig::default()
            },
            ..SimilarityConfig::default()
        };

        // Identical vectors always collide in every LSH table, so both
        // strategies must find every pair.
        let vectors: Vec<Vec<f32>> = (0..6).map(|_| vec![1.0, 0.0, 0.0]).collect();
        let pairs = find_similar_pairs(&vectors, 0.9, &config);
        assert_eq!(pairs.len(), 6 * 5 / 2);

        let small: Vec<Vec<f32>> = (0..3).map(|_| vec![1.0, 0.0, 0.0]).collect();
        let pairs = find_similar_pairs(&small, 0.9, &config);
        assert_eq!(pairs.len(), 3);
    }
}
