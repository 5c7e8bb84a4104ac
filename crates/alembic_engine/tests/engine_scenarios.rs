//! End-to-end engine scenarios with mock providers.
//!
//! The embedding mock assigns a fixed vector per topic keyword, so
//! similarity is fully deterministic; the merge mock synthesizes one block
//! per call and counts invocations.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use alembic_engine::{
    DistillEngine, EmbeddingProvider, EngineConfig, EngineError, JobObserver, MergeProvider,
    NoopObserver, ProviderError,
};
use alembic_protocol::cancel::CancelToken;
use alembic_protocol::ids::SequentialBlockIds;
use alembic_protocol::types::{
    Block, BlockContent, BlockType, DistillResult, ProgressPhase,
};

struct KeywordEmbedding;

#[async_trait]
impl EmbeddingProvider for KeywordEmbedding {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|text| keyword_vector(text)).collect())
    }
}

fn keyword_vector(text: &str) -> Vec<f32> {
    if text.contains("Python") {
        vec![1.0, 0.0, 0.0]
    } else if text.contains("JavaScript") {
        vec![0.0, 1.0, 0.0]
    } else {
        vec![0.0, 0.0, 1.0]
    }
}

struct MockMerge {
    calls: AtomicUsize,
    fail: bool,
}

impl MockMerge {
    fn ok() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: true,
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MergeProvider for MockMerge {
    async fn merge(&self, blocks: &[Block]) -> Result<Vec<BlockContent>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProviderError::Provider("merge endpoint unavailable".to_string()));
        }
        Ok(vec![BlockContent {
            name: format!("merged {}", blocks[0].content.name),
            critical_question: blocks[0].content.critical_question.clone(),
            trusted_answer: format!("combined from {} blocks", blocks.len()),
        }])
    }
}

#[derive(Default)]
struct CapturingObserver {
    progress: Mutex<Vec<(ProgressPhase, f64, Value)>>,
    snapshots: Mutex<Vec<DistillResult>>,
}

#[async_trait]
impl JobObserver for CapturingObserver {
    async fn progress(&self, phase: ProgressPhase, fraction: f64, details: Value) {
        self.progress.lock().unwrap().push((phase, fraction, details));
    }

    async fn intermediate(&self, snapshot: &DistillResult) {
        self.snapshots.lock().unwrap().push(snapshot.clone());
    }
}

fn block(id: &str, name: &str) -> Block {
    Block {
        block_type: BlockType::Original,
        id: id.to_string(),
        content: BlockContent {
            name: name.to_string(),
            critical_question: format!("What about {name}?"),
            trusted_answer: format!("{name}."),
        },
        hidden: false,
        exported: false,
        reviewed: false,
        document_id: None,
        sources_used: None,
    }
}

fn engine(merge: Arc<MockMerge>) -> DistillEngine {
    DistillEngine::new(
        Arc::new(KeywordEmbedding),
        merge,
        Arc::new(SequentialBlockIds::new("m")),
        EngineConfig::default(),
    )
}

#[tokio::test]
async fn hidden_only_corpus_returns_unchanged() {
    let merge = MockMerge::ok();
    let mut input = block("x", "a");
    input.hidden = true;

    let result = engine(merge.clone())
        .run(vec![input], 0.8, 4, &CancelToken::new(), &NoopObserver)
        .await
        .unwrap();

    assert_eq!(result.results.len(), 1);
    assert!(result.results[0].hidden);
    assert_eq!(result.stats.starting_block_count, 0);
    assert_eq!(result.stats.final_block_count, 0);
    assert_eq!(result.stats.blocks_added, 0);
    assert_eq!(result.stats.block_reduction_percent, 0.0);
    assert_eq!(merge.call_count(), 0);
}

#[tokio::test]
async fn single_active_block_returns_unchanged() {
    let merge = MockMerge::ok();
    let result = engine(merge.clone())
        .run(
            vec![block("1", "Python is a language")],
            0.8,
            4,
            &CancelToken::new(),
            &NoopObserver,
        )
        .await
        .unwrap();

    assert_eq!(result.results.len(), 1);
    assert!(result.results[0].hidden);
    assert_eq!(result.stats.starting_block_count, 1);
    assert_eq!(result.stats.blocks_added, 0);
    assert_eq!(result.stats.block_reduction_percent, 0.0);
    assert_eq!(merge.call_count(), 0);
}

#[tokio::test]
async fn two_near_duplicates_produce_one_merged_block() {
    let merge = MockMerge::ok();
    let result = engine(merge.clone())
        .run(
            vec![
                block("1", "Python is a language"),
                block("2", "Python is a programming language"),
            ],
            0.8,
            1,
            &CancelToken::new(),
            &NoopObserver,
        )
        .await
        .unwrap();

    let hidden: Vec<&Block> = result.results.iter().filter(|b| b.hidden).collect();
    let merged: Vec<&Block> = result.results.iter().filter(|b| !b.hidden).collect();
    assert_eq!(hidden.len(), 2);
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].block_type, BlockType::Merged);
    assert_eq!(
        merged[0].sources_used.as_deref(),
        Some(&["1".to_string(), "2".to_string()][..])
    );
    assert_eq!(result.stats.starting_block_count, 2);
    assert_eq!(result.stats.final_block_count, 1);
    assert_eq!(result.stats.blocks_removed, 2);
    assert_eq!(result.stats.blocks_added, 1);
    assert_eq!(result.stats.block_reduction_percent, 50.0);
    assert_eq!(merge.call_count(), 1);
}

#[tokio::test]
async fn unrelated_block_stays_out_of_the_merge() {
    let merge = MockMerge::ok();
    let result = engine(merge.clone())
        .run(
            vec![
                block("1", "Python is a language"),
                block("2", "Python is a programming language"),
                block("3", "JavaScript runs in browsers"),
            ],
            0.8,
            1,
            &CancelToken::new(),
            &NoopObserver,
        )
        .await
        .unwrap();

    assert_eq!(result.results.len(), 4);
    let merged: Vec<&Block> = result.results.iter().filter(|b| !b.hidden).collect();
    assert_eq!(merged.len(), 1);
    assert_eq!(
        merged[0].sources_used.as_deref(),
        Some(&["1".to_string(), "2".to_string()][..])
    );
    let hidden_ids: Vec<&str> = result
        .results
        .iter()
        .filter(|b| b.hidden)
        .map(|b| b.id.as_str())
        .collect();
    assert_eq!(hidden_ids, vec!["1", "2", "3"]);
}

#[tokio::test]
async fn oversize_cluster_is_merged_hierarchically() {
    let merge = MockMerge::ok();
    let blocks: Vec<Block> = (0..45)
        .map(|i| block(&format!("b-{i:03}"), "Python is a language"))
        .collect();

    let result = engine(merge.clone())
        .run(blocks, 0.8, 1, &CancelToken::new(), &NoopObserver)
        .await
        .unwrap();

    let merged: Vec<&Block> = result.results.iter().filter(|b| !b.hidden).collect();
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].sources_used.as_ref().map(Vec::len), Some(45));
    // Four leaf slices (target size 13 -> ceil(45/13) = 4) plus one
    // re-merge of the combined results.
    assert_eq!(merge.call_count(), 5);
    assert_eq!(result.stats.starting_block_count, 45);
    assert_eq!(result.stats.final_block_count, 1);
}

#[tokio::test]
async fn failed_merges_keep_blocks_active_for_next_iteration() {
    let merge = MockMerge::failing();
    let result = engine(merge.clone())
        .run(
            vec![
                block("1", "Python is a language"),
                block("2", "Python is a programming language"),
            ],
            0.8,
            2,
            &CancelToken::new(),
            &NoopObserver,
        )
        .await
        .unwrap();

    // One failed attempt per iteration: the pair stays active throughout.
    assert_eq!(merge.call_count(), 2);
    assert!(result.results.iter().all(|b| b.hidden));
    assert_eq!(result.stats.blocks_added, 0);
    assert_eq!(result.stats.final_block_count, 0);
}

#[tokio::test]
async fn cancelled_token_aborts_the_run() {
    let merge = MockMerge::ok();
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = engine(merge)
        .run(
            vec![
                block("1", "Python is a language"),
                block("2", "Python is a programming language"),
            ],
            0.8,
            4,
            &cancel,
            &NoopObserver,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
}

#[tokio::test]
async fn threshold_escalates_after_the_start_iteration() {
    let merge = MockMerge::failing();
    let observer = CapturingObserver::default();

    engine(merge)
        .run(
            vec![
                block("1", "Python is a language"),
                block("2", "Python is a programming language"),
            ],
            0.8,
            3,
            &CancelToken::new(),
            &observer,
        )
        .await
        .unwrap();

    let progress = observer.progress.lock().unwrap();
    let thresholds: Vec<f64> = progress
        .iter()
        .filter(|(phase, _, _)| *phase == ProgressPhase::Iteration)
        .map(|(_, _, details)| details["threshold"].as_f64().unwrap())
        .collect();
    assert_eq!(thresholds.len(), 3);
    assert_eq!(thresholds[0], 0.8);
    assert_eq!(thresholds[1], 0.8);
    assert!((thresholds[2] - 0.81).abs() < 1e-9);
}

#[tokio::test]
async fn progress_is_monotonic_and_reaches_completion() {
    let merge = MockMerge::ok();
    let observer = CapturingObserver::default();

    engine(merge)
        .run(
            vec![
                block("1", "Python is a language"),
                block("2", "Python is a programming language"),
                block("3", "JavaScript runs in browsers"),
            ],
            0.8,
            2,
            &CancelToken::new(),
            &observer,
        )
        .await
        .unwrap();

    let progress = observer.progress.lock().unwrap();
    let fractions: Vec<f64> = progress.iter().map(|(_, f, _)| *f).collect();
    assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*fractions.last().unwrap(), 1.0);
    assert_eq!(progress[0].0, ProgressPhase::Initialization);
}

#[tokio::test]
async fn intermediate_snapshot_written_after_productive_iteration() {
    let merge = MockMerge::ok();
    let observer = CapturingObserver::default();

    engine(merge)
        .run(
            vec![
                block("1", "Python is a language"),
                block("2", "Python is a programming language"),
            ],
            0.8,
            1,
            &CancelToken::new(),
            &observer,
        )
        .await
        .unwrap();

    let snapshots = observer.snapshots.lock().unwrap();
    assert_eq!(snapshots.len(), 1);
    let snapshot = &snapshots[0];
    assert_eq!(
        serde_json::to_value(snapshot).unwrap()["status"],
        "partial"
    );
    assert_eq!(snapshot.results.len(), 3);
    assert_eq!(snapshot.stats.final_block_count, 1);
}
