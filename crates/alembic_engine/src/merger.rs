//! Hierarchical cluster merging bounded by the LLM input budget.
//!
//! Clusters larger than the per-call budget are split into balanced,
//! id-sorted slices and merged recursively; combined results that are still
//! too large or still mutually similar are merged again. Every work item
//! tracks the set of input block ids it subsumes, so a failed sub-merge can
//! hand its blocks back to the next iteration instead of losing them.

use futures::future::{join_all, BoxFuture};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use alembic_dedupe::find_similar_pairs_dense;
use alembic_protocol::ids::BlockIdGen;
use alembic_protocol::types::{Block, BlockContent, BlockType};

use crate::provider::{EmbeddingProvider, MergeProvider, ProviderError};

/// Sizing limits for the hierarchical merger.
#[derive(Debug, Clone)]
pub struct MergerConfig {
    /// Largest cluster handed to the LLM in one call (M).
    pub max_blocks_per_merge: usize,
    pub max_recursion_depth: usize,
    /// Thread bound for the re-cluster similarity check.
    pub similarity_parallelism: usize,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            max_blocks_per_merge: 20,
            max_recursion_depth: 10,
            similarity_parallelism: 10,
        }
    }
}

/// Result of merging one cluster.
#[derive(Debug, Default)]
pub struct ClusterOutcome {
    /// Newly synthesized blocks, `type = merged`, `sources_used` populated.
    pub merged: Vec<Block>,
    /// Input blocks whose merge failed; they stay in the active set.
    pub leftovers: Vec<Block>,
}

/// A unit of work inside the recursion: a knowledge triple plus the input
/// block ids it subsumes.
#[derive(Debug, Clone)]
struct MergeItem {
    content: BlockContent,
    origins: BTreeSet<String>,
    /// Identifier used for deterministic slicing; becomes the block id of a
    /// surviving output.
    sort_key: String,
    /// True once the item is the product of a successful LLM merge.
    synthetic: bool,
    document_id: Option<String>,
}

pub struct ClusterMerger {
    merge: Arc<dyn MergeProvider>,
    embed: Arc<dyn EmbeddingProvider>,
    ids: Arc<dyn BlockIdGen>,
    /// One permit per concurrent LLM call, shared across every recursion
    /// depth and every cluster of the iteration.
    permits: Arc<Semaphore>,
    config: MergerConfig,
}

impl ClusterMerger {
    pub fn new(
        merge: Arc<dyn MergeProvider>,
        embed: Arc<dyn EmbeddingProvider>,
        ids: Arc<dyn BlockIdGen>,
        permits: Arc<Semaphore>,
        config: MergerConfig,
    ) -> Self {
        Self {
            merge,
            embed,
            ids,
            permits,
            config,
        }
    }

    /// Merge one cluster at the given similarity threshold.
    pub async fn merge_cluster(&self, blocks: Vec<Block>, threshold: f32) -> ClusterOutcome {
        if blocks.len() < 2 {
            return ClusterOutcome {
                merged: Vec::new(),
                leftovers: blocks,
            };
        }

        if blocks.len() > self.config.max_blocks_per_merge {
            info!(
                cluster_size = blocks.len(),
                max_size = self.config.max_blocks_per_merge,
                "large cluster, using hierarchical subclustering"
            );
        }

        let originals: Vec<Block> = blocks.clone();
        let items: Vec<MergeItem> = blocks
            .into_iter()
            .map(|block| MergeItem {
                origins: BTreeSet::from([block.id.clone()]),
                sort_key: block.id.clone(),
                synthetic: false,
                document_id: block.document_id.clone(),
                content: block.content,
            })
            .collect();

        let (mut outputs, leftovers) = self.merge_recursive(items, threshold, 0).await;

        let mut unmerged = Vec::new();
        for item in leftovers {
            if item.synthetic {
                // Product of an earlier successful sub-merge whose follow-up
                // failed; keep the work rather than discarding it.
                outputs.push(item);
            } else if let Some(original) = originals.iter().find(|b| b.id == item.sort_key) {
                unmerged.push(original.clone());
            }
        }

        let merged = outputs
            .into_iter()
            .filter(|item| item.synthetic)
            .map(|item| Block {
                block_type: BlockType::Merged,
                id: item.sort_key,
                content: item.content,
                hidden: false,
                exported: false,
                reviewed: false,
                document_id: item.document_id,
                sources_used: Some(item.origins.into_iter().collect()),
            })
            .collect();

        ClusterOutcome {
            merged,
            leftovers: unmerged,
        }
    }

    fn merge_recursive(
        &self,
        mut items: Vec<MergeItem>,
        threshold: f32,
        depth: usize,
    ) -> BoxFuture<'_, (Vec<MergeItem>, Vec<MergeItem>)> {
        Box::pin(async move {
            let n = items.len();
            if n == 0 {
                return (Vec::new(), Vec::new());
            }
            if n == 1 {
                let item = items.remove(0);
                return if item.synthetic {
                    (vec![item], Vec::new())
                } else {
                    (Vec::new(), vec![item])
                };
            }

            let max = self.config.max_blocks_per_merge;

            if depth >= self.config.max_recursion_depth {
                warn!(depth, cluster_size = n, "max recursion depth reached, forcing direct merge");
                items.sort_by(|a, b| a.sort_key.cmp(&b.sort_key));
                let rest = items.split_off(max.min(items.len()));
                return match self.call_merge(&items).await {
                    Ok(outputs) => (outputs, rest),
                    Err(err) => {
                        warn!(error = %err, "forced merge failed, keeping blocks unmerged");
                        items.extend(rest);
                        (Vec::new(), items)
                    }
                };
            }

            if n <= max {
                return match self.call_merge(&items).await {
                    Ok(outputs) => (outputs, Vec::new()),
                    Err(err) => {
                        warn!(error = %err, cluster_size = n, "leaf merge failed, keeping blocks unmerged");
                        (Vec::new(), items)
                    }
                };
            }

            // Balanced split over the id-sorted cluster.
            let target_size = max.min(5usize.max((2.0 * (n as f64).sqrt()).floor() as usize));
            let num_slices = n.div_ceil(target_size);
            debug!(depth, total_blocks = n, target_size, num_slices, "hierarchical split");

            items.sort_by(|a, b| a.sort_key.cmp(&b.sort_key));
            let mut slices = Vec::with_capacity(num_slices);
            for i in (0..num_slices).rev() {
                let start = i * n / num_slices;
                let slice = items.split_off(start);
                if !slice.is_empty() {
                    slices.push(slice);
                }
            }
            slices.reverse();

            let results = join_all(
                slices
                    .into_iter()
                    .map(|slice| self.merge_recursive(slice, threshold, depth + 1)),
            )
            .await;

            let mut outputs = Vec::new();
            let mut leftovers = Vec::new();
            for (slice_outputs, slice_leftovers) in results {
                outputs.extend(slice_outputs);
                leftovers.extend(slice_leftovers);
            }

            if outputs.len() > max {
                let (merged, more_leftovers) =
                    self.merge_recursive(outputs, threshold, depth + 1).await;
                leftovers.extend(more_leftovers);
                return (merged, leftovers);
            }

            if outputs.len() > 1 && self.combined_still_similar(&outputs, threshold).await {
                let (merged, more_leftovers) =
                    self.merge_recursive(outputs, threshold, depth + 1).await;
                leftovers.extend(more_leftovers);
                return (merged, leftovers);
            }

            (outputs, leftovers)
        })
    }

    /// Re-embed combined results and test whether any pair still clears the
    /// threshold. Embedding trouble here does not fail the cluster; the
    /// combined results simply stand.
    async fn combined_still_similar(&self, items: &[MergeItem], threshold: f32) -> bool {
        let texts: Vec<String> = items
            .iter()
            .map(|item| item.content.embed_text(&item.sort_key))
            .collect();
        match self.embed.embed(texts).await {
            Ok(vectors) => !find_similar_pairs_dense(
                &vectors,
                threshold,
                self.config.similarity_parallelism,
            )
            .is_empty(),
            Err(err) => {
                warn!(error = %err, "re-embedding combined results failed, keeping them as-is");
                false
            }
        }
    }

    /// One bounded LLM call over the given items.
    async fn call_merge(&self, items: &[MergeItem]) -> Result<Vec<MergeItem>, ProviderError> {
        let blocks: Vec<Block> = items
            .iter()
            .map(|item| Block {
                block_type: if item.synthetic {
                    BlockType::Synthetic
                } else {
                    BlockType::Original
                },
                id: item.sort_key.clone(),
                content: item.content.clone(),
                hidden: false,
                exported: false,
                reviewed: false,
                document_id: item.document_id.clone(),
                sources_used: None,
            })
            .collect();

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ProviderError::Provider("merge pool closed".to_string()))?;
        let contents = self.merge.merge(&blocks).await?;
        if contents.is_empty() {
            return Err(ProviderError::ResponseFormat {
                message: "merge returned no blocks".to_string(),
                raw_response: String::new(),
            });
        }

        let mut origins = BTreeSet::new();
        for item in items {
            origins.extend(item.origins.iter().cloned());
        }
        let document_id = items.iter().find_map(|item| item.document_id.clone());

        Ok(contents
            .into_iter()
            .map(|content| MergeItem {
                content,
                origins: origins.clone(),
                sort_key: self.ids.next_id(),
                synthetic: true,
                document_id: document_id.clone(),
            })
            .collect())
    }
}
