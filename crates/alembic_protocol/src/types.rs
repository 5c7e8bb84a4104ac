//! Canonical IdeaBlock and job lifecycle types.
//!
//! These serialize directly to the external JSON field names, so the same
//! structs travel through the engine, the job store, and the polling API.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Content of a single IdeaBlock: the knowledge triple.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockContent {
    pub name: String,
    pub critical_question: String,
    pub trusted_answer: String,
}

impl BlockContent {
    /// Text handed to the embedding endpoint: space-joined non-empty fields,
    /// falling back to a placeholder derived from `fallback_id` when the
    /// whole triple is empty.
    pub fn embed_text(&self, fallback_id: &str) -> String {
        let parts: Vec<&str> = [
            self.name.trim(),
            self.critical_question.trim(),
            self.trusted_answer.trim(),
        ]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect();

        if parts.is_empty() {
            format!("block-{fallback_id}")
        } else {
            parts.join(" ")
        }
    }
}

/// Provenance category of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    /// Submitted by the client.
    Original,
    /// Synthesized from one or more source blocks.
    Merged,
    /// Internal intermediate of the hierarchical merger.
    Synthetic,
    /// Accepted on input for API compatibility; never produced.
    New,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Original => "original",
            BlockType::Merged => "merged",
            BlockType::Synthetic => "synthetic",
            BlockType::New => "new",
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single IdeaBlock with identity, flags and provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    #[serde(rename = "type")]
    pub block_type: BlockType,
    #[serde(rename = "blockifyResultUUID")]
    pub id: String,
    #[serde(rename = "blockifiedTextResult")]
    pub content: BlockContent,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub exported: bool,
    #[serde(default)]
    pub reviewed: bool,
    #[serde(
        rename = "blockifyDocumentUUID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub document_id: Option<String>,
    #[serde(
        rename = "blockifyResultsUsed",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sources_used: Option<Vec<String>>,
}

impl Block {
    /// Blocks flagged hidden or exported are excluded from processing.
    pub fn is_active(&self) -> bool {
        !self.hidden && !self.exported
    }

    pub fn embed_text(&self) -> String {
        self.content.embed_text(&self.id)
    }
}

/// Job execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Success,
    Failure,
    Timeout,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failure => "failure",
            JobStatus::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "failure" => Ok(JobStatus::Failure),
            "timeout" => Ok(JobStatus::Timeout),
            other => Err(format!("invalid job status: {other}")),
        }
    }
}

/// Processing phase reported while a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressPhase {
    Initialization,
    Embeddings,
    Iteration,
    Completion,
}

impl ProgressPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressPhase::Initialization => "initialization",
            ProgressPhase::Embeddings => "embeddings",
            ProgressPhase::Iteration => "iteration",
            ProgressPhase::Completion => "completion",
        }
    }
}

impl fmt::Display for ProgressPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Statistics about a distillation run.
///
/// The counting convention is fixed by the external API: every active input
/// counts as removed and every merged block as added, so `final_block_count`
/// is the merged-block count, not the response length.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStats {
    pub starting_block_count: usize,
    pub final_block_count: usize,
    pub blocks_removed: usize,
    pub blocks_added: usize,
    pub block_reduction_percent: f64,
}

impl ProcessingStats {
    /// Stats for the recounted final (or intermediate) payload.
    pub fn recounted(starting: usize, merged: usize) -> Self {
        let reduction = if starting > 0 {
            let raw = 100.0 * (1.0 - merged as f64 / starting as f64);
            (raw * 100.0).round() / 100.0
        } else {
            0.0
        };
        Self {
            starting_block_count: starting,
            final_block_count: merged,
            blocks_removed: starting,
            blocks_added: merged,
            block_reduction_percent: reduction,
        }
    }

    /// Zero-reduction stats for corpora too small to process.
    pub fn unchanged(starting: usize) -> Self {
        Self {
            starting_block_count: starting,
            final_block_count: 0,
            blocks_removed: 0,
            blocks_added: 0,
            block_reduction_percent: 0.0,
        }
    }
}

/// Whether a distillation payload is the terminal result or a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Partial,
}

/// Terminal or intermediate payload of a distillation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistillResult {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    pub status: ResultStatus,
    pub stats: ProcessingStats,
    pub results: Vec<Block>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(id: &str) -> Block {
        Block {
            block_type: BlockType::Original,
            id: id.to_string(),
            content: BlockContent {
                name: "Python".to_string(),
                critical_question: "What is Python?".to_string(),
                trusted_answer: "A programming language.".to_string(),
            },
            hidden: false,
            exported: false,
            reviewed: false,
            document_id: None,
            sources_used: None,
        }
    }

    #[test]
    fn block_serializes_with_wire_field_names() {
        let json = serde_json::to_value(block("b-1")).unwrap();
        assert_eq!(json["type"], "original");
        assert_eq!(json["blockifyResultUUID"], "b-1");
        assert_eq!(json["blockifiedTextResult"]["criticalQuestion"], "What is Python?");
        assert_eq!(json["blockifiedTextResult"]["trustedAnswer"], "A programming language.");
        assert!(json.get("blockifyDocumentUUID").is_none());
        assert!(json.get("blockifyResultsUsed").is_none());
    }

    #[test]
    fn block_deserializes_with_defaults() {
        let raw = r#"{
            "type": "merged",
            "blockifyResultUUID": "m-1",
            "blockifiedTextResult": {"name": "n", "criticalQuestion": "q", "trustedAnswer": "a"},
            "blockifyResultsUsed": ["1", "2"]
        }"#;
        let block: Block = serde_json::from_str(raw).unwrap();
        assert_eq!(block.block_type, BlockType::Merged);
        assert!(!block.hidden);
        assert!(!block.exported);
        assert_eq!(block.sources_used.as_deref(), Some(&["1".to_string(), "2".to_string()][..]));
    }

    #[test]
    fn embed_text_joins_non_empty_fields() {
        let mut b = block("b-2");
        b.content.critical_question = "  ".to_string();
        assert_eq!(b.embed_text(), "Python A programming language.");
    }

    #[test]
    fn embed_text_falls_back_to_placeholder() {
        let mut b = block("b-3");
        b.content = BlockContent::default();
        assert_eq!(b.embed_text(), "block-b-3");
    }

    #[test]
    fn recounted_stats_round_to_two_decimals() {
        let stats = ProcessingStats::recounted(3, 1);
        assert_eq!(stats.blocks_removed, 3);
        assert_eq!(stats.blocks_added, 1);
        assert_eq!(stats.final_block_count, 1);
        assert!((stats.block_reduction_percent - 66.67).abs() < 1e-9);
    }

    #[test]
    fn recounted_stats_handle_empty_start() {
        let stats = ProcessingStats::recounted(0, 0);
        assert_eq!(stats.block_reduction_percent, 0.0);
    }

    #[test]
    fn job_status_round_trips_through_strings() {
        for status in [
            JobStatus::Running,
            JobStatus::Success,
            JobStatus::Failure,
            JobStatus::Timeout,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("done".parse::<JobStatus>().is_err());
    }
}
