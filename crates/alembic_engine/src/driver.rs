//! The per-iteration deduplication driver.
//!
//! Each iteration embeds the active set, finds similar pairs at the current
//! threshold, clusters them, merges every multi-block cluster through the
//! LLM in parallel, re-embeds the merged output, and escalates the
//! threshold. Checkpoints are written after every iteration that produced
//! merges.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use alembic_dedupe::{cluster_pairs, find_similar_pairs, SimilarityConfig};
use alembic_protocol::cancel::CancelToken;
use alembic_protocol::defaults::SCHEMA_VERSION;
use alembic_protocol::ids::BlockIdGen;
use alembic_protocol::settings::Settings;
use alembic_protocol::types::{
    Block, DistillResult, ProcessingStats, ProgressPhase, ResultStatus,
};

use crate::merger::{ClusterMerger, MergerConfig};
use crate::provider::{EmbeddingProvider, MergeProvider, ProviderError};

/// Observer for progress reports and intermediate checkpoints.
///
/// Sinks are expected to swallow their own I/O trouble; a progress write
/// must never fail a job.
#[async_trait]
pub trait JobObserver: Send + Sync {
    async fn progress(&self, phase: ProgressPhase, fraction: f64, details: serde_json::Value);
    async fn intermediate(&self, snapshot: &DistillResult);
}

/// Observer that discards everything.
#[derive(Debug, Default)]
pub struct NoopObserver;

#[async_trait]
impl JobObserver for NoopObserver {
    async fn progress(&self, _phase: ProgressPhase, _fraction: f64, _details: serde_json::Value) {}
    async fn intermediate(&self, _snapshot: &DistillResult) {}
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("job cancelled")]
    Cancelled,
}

/// Engine tuning, carved from [`Settings`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_blocks_per_merge: usize,
    pub max_recursion_depth: usize,
    pub llm_parallel: usize,
    pub similarity: SimilarityConfig,
    pub similarity_increase_per_iteration: f64,
    pub similarity_increase_start_iteration: u32,
    pub max_similarity_threshold: f64,
    pub louvain_node_threshold: usize,
    pub save_intermediate: bool,
}

impl EngineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_blocks_per_merge: settings.max_cluster_size_for_llm,
            max_recursion_depth: settings.max_recursion_depth,
            llm_parallel: settings.llm_parallel,
            similarity: SimilarityConfig {
                use_lsh: settings.use_lsh,
                lsh_min_items: settings.lsh_min_items,
                lsh: alembic_dedupe::LshConfig {
                    num_tables: settings.lsh_tables,
                    num_bits: settings.lsh_bits,
                    seed: None,
                },
                parallelism: settings.similarity_parallel,
            },
            similarity_increase_per_iteration: settings.similarity_increase_per_iteration,
            similarity_increase_start_iteration: settings.similarity_increase_start_iteration,
            max_similarity_threshold: settings.max_similarity_threshold,
            louvain_node_threshold: settings.louvain_node_threshold,
            save_intermediate: settings.save_intermediate,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// A block paired with its embedding for the duration of a run.
#[derive(Debug, Clone)]
struct EmbeddedBlock {
    block: Block,
    vector: Vec<f32>,
}

const ITERATION_PROGRESS_START: f64 = 0.15;
const ITERATION_PROGRESS_END: f64 = 0.95;

pub struct DistillEngine {
    embed: Arc<dyn EmbeddingProvider>,
    merge: Arc<dyn MergeProvider>,
    ids: Arc<dyn BlockIdGen>,
    config: EngineConfig,
}

impl DistillEngine {
    pub fn new(
        embed: Arc<dyn EmbeddingProvider>,
        merge: Arc<dyn MergeProvider>,
        ids: Arc<dyn BlockIdGen>,
        config: EngineConfig,
    ) -> Self {
        Self {
            embed,
            merge,
            ids,
            config,
        }
    }

    /// Run the full deduplication over `blocks`.
    ///
    /// The response lists every input block marked hidden, followed by all
    /// merged blocks; stats follow the external counting convention (every
    /// active input removed, every merged block added).
    pub async fn run(
        &self,
        blocks: Vec<Block>,
        similarity_threshold: f64,
        max_iterations: u32,
        cancel: &CancelToken,
        observer: &dyn JobObserver,
    ) -> Result<DistillResult, EngineError> {
        observer
            .progress(
                ProgressPhase::Initialization,
                0.0,
                json!({"status": "Starting distillation"}),
            )
            .await;

        let active: Vec<Block> = blocks.iter().filter(|b| b.is_active()).cloned().collect();
        let starting_count = active.len();
        let mut threshold = similarity_threshold;

        info!(
            initial_count = starting_count,
            similarity_threshold,
            max_iterations,
            "starting deduplication"
        );

        if starting_count < 2 {
            return Ok(assemble_result(
                &blocks,
                &[],
                ProcessingStats::unchanged(starting_count),
            ));
        }

        observer
            .progress(
                ProgressPhase::Embeddings,
                0.05,
                json!({"status": "Generating embeddings"}),
            )
            .await;
        let mut master = self.embed_blocks(active).await?;
        observer
            .progress(
                ProgressPhase::Embeddings,
                0.15,
                json!({"status": "Embeddings complete", "count": master.len()}),
            )
            .await;

        let mut all_merged: Vec<Block> = Vec::new();

        let permits = Arc::new(Semaphore::new(self.config.llm_parallel.max(1)));
        let merger = ClusterMerger::new(
            self.merge.clone(),
            self.embed.clone(),
            self.ids.clone(),
            permits,
            MergerConfig {
                max_blocks_per_merge: self.config.max_blocks_per_merge,
                max_recursion_depth: self.config.max_recursion_depth,
                similarity_parallelism: self.config.similarity.parallelism,
            },
        );

        let progress_range = ITERATION_PROGRESS_END - ITERATION_PROGRESS_START;
        for iteration in 1..=max_iterations {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let fraction = ITERATION_PROGRESS_START
                + (iteration as f64 / max_iterations as f64) * progress_range;
            observer
                .progress(
                    ProgressPhase::Iteration,
                    fraction,
                    json!({
                        "iteration": iteration,
                        "blockCount": master.len(),
                        "threshold": threshold,
                    }),
                )
                .await;
            info!(
                iteration,
                block_count = master.len(),
                threshold,
                "starting iteration"
            );

            if master.len() < 2 {
                info!(iteration, "too few blocks to cluster, stopping");
                break;
            }

            let vectors: Vec<Vec<f32>> = master.iter().map(|e| e.vector.clone()).collect();
            let pairs = find_similar_pairs(&vectors, threshold as f32, &self.config.similarity);
            if pairs.is_empty() {
                info!(iteration, "no similar pairs found, stopping iterations");
                break;
            }

            let clusters = cluster_pairs(&pairs, master.len(), self.config.louvain_node_threshold);
            let mergeable: Vec<Vec<usize>> =
                clusters.into_iter().filter(|c| c.len() > 1).collect();
            if mergeable.is_empty() {
                info!(iteration, "no mergeable clusters found, stopping");
                break;
            }
            info!(
                iteration,
                cluster_count = mergeable.len(),
                total_items = mergeable.iter().map(Vec::len).sum::<usize>(),
                "found mergeable clusters"
            );

            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            // Merge every cluster concurrently; the LLM semaphore inside the
            // merger enforces the real parallelism ceiling.
            let outcomes = futures::future::join_all(mergeable.iter().map(|indices| {
                let cluster_blocks: Vec<Block> =
                    indices.iter().map(|&i| master[i].block.clone()).collect();
                merger.merge_cluster(cluster_blocks, threshold as f32)
            }))
            .await;

            let mut clustered_indices: HashSet<usize> = HashSet::new();
            for indices in &mergeable {
                clustered_indices.extend(indices.iter().copied());
            }

            let mut merged_this_iteration: Vec<Block> = Vec::new();
            let mut kept_ids: HashSet<String> = HashSet::new();
            let mut successes = 0usize;
            let mut failures = 0usize;
            for outcome in outcomes {
                if outcome.merged.is_empty() {
                    failures += 1;
                } else {
                    successes += 1;
                }
                for leftover in &outcome.leftovers {
                    kept_ids.insert(leftover.id.clone());
                }
                merged_this_iteration.extend(outcome.merged);
            }

            info!(
                iteration,
                successful = successes,
                failed = failures,
                merged_blocks = merged_this_iteration.len(),
                "cluster merge summary"
            );
            if merged_this_iteration.is_empty() && failures > 0 {
                warn!(iteration, failed_count = failures, "all cluster merges failed in iteration");
            }

            // Rebuild the active set: unclustered survivors plus leftovers
            // keep their embeddings; merged output is embedded fresh.
            let mut next_master: Vec<EmbeddedBlock> = Vec::new();
            for (idx, embedded) in master.into_iter().enumerate() {
                if !clustered_indices.contains(&idx) || kept_ids.contains(&embedded.block.id) {
                    next_master.push(embedded);
                }
            }

            if !merged_this_iteration.is_empty() {
                let embedded_merged = self.embed_blocks(merged_this_iteration.clone()).await?;
                next_master.extend(embedded_merged);
            }

            all_merged.extend(merged_this_iteration.clone());
            let produced = !merged_this_iteration.is_empty();
            master = next_master;

            info!(
                iteration,
                new_blocks = merged_this_iteration.len(),
                next_iteration_count = master.len(),
                "iteration complete"
            );

            if self.config.save_intermediate && !all_merged.is_empty() {
                let snapshot = DistillResult {
                    schema_version: SCHEMA_VERSION,
                    status: ResultStatus::Partial,
                    stats: ProcessingStats::recounted(starting_count, all_merged.len()),
                    results: assembled_blocks(&blocks, &all_merged),
                };
                observer.intermediate(&snapshot).await;
            }

            if !produced && threshold >= self.config.max_similarity_threshold {
                warn!(iteration, "no successful merges and threshold at maximum, stopping");
                break;
            }

            if iteration >= self.config.similarity_increase_start_iteration {
                threshold = (threshold + self.config.similarity_increase_per_iteration)
                    .min(self.config.max_similarity_threshold);
            }
        }

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        observer
            .progress(
                ProgressPhase::Completion,
                0.95,
                json!({"status": "Building results"}),
            )
            .await;

        let stats = ProcessingStats::recounted(starting_count, all_merged.len());
        let result = assemble_result(&blocks, &all_merged, stats);

        observer
            .progress(
                ProgressPhase::Completion,
                1.0,
                json!({
                    "status": "Complete",
                    "startingBlockCount": stats.starting_block_count,
                    "finalBlockCount": stats.final_block_count,
                }),
            )
            .await;
        info!(
            starting = stats.starting_block_count,
            merged = stats.final_block_count,
            reduction_percent = stats.block_reduction_percent,
            "deduplication completed"
        );

        Ok(result)
    }

    /// Embed a batch of blocks, pairing each with its vector.
    async fn embed_blocks(&self, blocks: Vec<Block>) -> Result<Vec<EmbeddedBlock>, ProviderError> {
        if blocks.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = blocks.iter().map(Block::embed_text).collect();
        let vectors = self.embed.embed(texts).await?;
        if vectors.len() != blocks.len() {
            return Err(ProviderError::ResponseFormat {
                message: format!(
                    "embedding count mismatch: {} texts, {} vectors",
                    blocks.len(),
                    vectors.len()
                ),
                raw_response: String::new(),
            });
        }
        Ok(blocks
            .into_iter()
            .zip(vectors)
            .map(|(block, vector)| EmbeddedBlock { block, vector })
            .collect())
    }
}

/// Every input block marked hidden, followed by the merged blocks.
fn assembled_blocks(inputs: &[Block], merged: &[Block]) -> Vec<Block> {
    let mut results: Vec<Block> = inputs
        .iter()
        .map(|block| {
            let mut hidden = block.clone();
            hidden.hidden = true;
            hidden
        })
        .collect();
    results.extend(merged.iter().cloned());
    results
}

fn assemble_result(inputs: &[Block], merged: &[Block], stats: ProcessingStats) -> DistillResult {
    DistillResult {
        schema_version: SCHEMA_VERSION,
        status: ResultStatus::Success,
        stats,
        results: assembled_blocks(inputs, merged),
    }
}
