//! Dense cosine-similarity pair search.

use std::cmp::Ordering;

/// `(i, j, similarity)` with `i < j`.
pub type SimilarPair = (usize, usize, f32);

/// L2-normalize every vector; zero vectors are left as-is.
pub(crate) fn normalize_vectors(vectors: &[Vec<f32>]) -> Vec<Vec<f32>> {
    vectors
        .iter()
        .map(|v| {
            let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                v.iter().map(|x| x / norm).collect()
            } else {
                v.clone()
            }
        })
        .collect()
}

pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Descending by similarity, then ascending by index pair.
pub(crate) fn sort_pairs(pairs: &mut [SimilarPair]) {
    pairs.sort_unstable_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(Ordering::Equal)
            .then_with(|| (a.0, a.1).cmp(&(b.0, b.1)))
    });
}

/// Scan the full upper triangle, parallelized over row chunks.
pub fn find_similar_pairs_dense(
    vectors: &[Vec<f32>],
    threshold: f32,
    parallelism: usize,
) -> Vec<SimilarPair> {
    let n = vectors.len();
    if n < 2 {
        return Vec::new();
    }

    let normalized = normalize_vectors(vectors);
    let parallelism = parallelism.max(1);
    let chunk_size = n.div_ceil(parallelism);

    let mut pairs: Vec<SimilarPair> = Vec::new();
    std::thread::scope(|scope| {
        let normalized = &normalized;
        let mut handles = Vec::new();
        let mut start = 0;
        while start < n {
            let end = (start + chunk_size).min(n);
            handles.push(scope.spawn(move || {
                let mut chunk_pairs = Vec::new();
                for i in start..end {
                    for j in (i + 1)..n {
                        let similarity = dot(&normalized[i], &normalized[j]);
                        if similarity >= threshold {
                            chunk_pairs.push((i, j, similarity));
                        }
                    }
                }
                chunk_pairs
            }));
            start = end;
        }
        for handle in handles {
            match handle.join() {
                Ok(chunk) => pairs.extend(chunk),
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
    });

    sort_pairs(&mut pairs);
    pairs
}
