//! Wire shapes for the HTTP front door.
//!
//! The front door itself (routing, schema docs, CORS) lives outside this
//! workspace; these are the JSON bodies it exchanges with clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::defaults;
use crate::ids::JobId;
use crate::types::{Block, DistillResult, JobStatus, ProcessingStats};

/// Request to distill a batch of IdeaBlocks (`POST /api/autoDistill`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoDistillRequest {
    #[serde(rename = "blockifyTaskUUID")]
    pub task_id: String,
    #[serde(default = "default_similarity")]
    pub similarity: f64,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    pub results: Vec<Block>,
}

fn default_similarity() -> f64 {
    defaults::DEFAULT_SIMILARITY_THRESHOLD
}

fn default_iterations() -> u32 {
    defaults::DEFAULT_ITERATIONS
}

/// Response to a job submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmissionResponse {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "jobId")]
    pub job_id: JobId,
}

impl JobSubmissionResponse {
    pub fn new(job_id: JobId) -> Self {
        Self {
            schema_version: defaults::SCHEMA_VERSION,
            job_id,
        }
    }
}

/// Progress block included while a job is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressInfo {
    /// Progress percentage in [0, 100].
    pub percent: f64,
    pub phase: String,
    #[serde(default)]
    pub details: Value,
}

/// Polling response for a job (`GET /api/jobs/{jobId}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    pub status: JobStatus,
    #[serde(default)]
    pub results: Vec<Block>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<ProcessingStats>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intermediate_result: Option<DistillResult>,
}

impl JobStatusResponse {
    pub fn new(status: JobStatus) -> Self {
        Self {
            schema_version: defaults::SCHEMA_VERSION,
            status,
            results: Vec::new(),
            stats: None,
            error: None,
            progress: None,
            intermediate_result: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockContent, BlockType, ResultStatus};

    #[test]
    fn request_fills_defaults_for_missing_fields() {
        let raw = r#"{
            "blockifyTaskUUID": "task-1",
            "results": [{
                "type": "original",
                "blockifyResultUUID": "1",
                "blockifiedTextResult": {"name": "a", "criticalQuestion": "b", "trustedAnswer": "c"}
            }]
        }"#;
        let request: AutoDistillRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(request.similarity, 0.55);
        assert_eq!(request.iterations, 4);
        assert_eq!(request.results.len(), 1);
        assert_eq!(request.results[0].block_type, BlockType::Original);
    }

    #[test]
    fn submission_response_shape() {
        let response = JobSubmissionResponse::new(JobId::new());
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["schemaVersion"], 1);
        assert!(json["jobId"].is_string());
    }

    #[test]
    fn status_response_omits_empty_optionals() {
        let mut response = JobStatusResponse::new(JobStatus::Running);
        response.progress = Some(ProgressInfo {
            percent: 42.5,
            phase: "iteration".to_string(),
            details: serde_json::json!({"iteration": 2}),
        });
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["progress"]["percent"], 42.5);
        assert!(json.get("stats").is_none());
        assert!(json.get("intermediate_result").is_none());
        assert_eq!(json["error"], Value::Null);
    }

    #[test]
    fn status_response_round_trips_result_payload() {
        let mut response = JobStatusResponse::new(JobStatus::Success);
        response.stats = Some(ProcessingStats::recounted(2, 1));
        response.results = vec![Block {
            block_type: BlockType::Merged,
            id: "m-1".to_string(),
            content: BlockContent {
                name: "n".to_string(),
                critical_question: "q".to_string(),
                trusted_answer: "a".to_string(),
            },
            hidden: false,
            exported: false,
            reviewed: false,
            document_id: None,
            sources_used: Some(vec!["1".to_string(), "2".to_string()]),
        }];
        let json = serde_json::to_string(&response).unwrap();
        let back: JobStatusResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back.results, response.results);
        assert_eq!(back.stats, response.stats);
    }

    #[test]
    fn intermediate_result_keeps_partial_status() {
        let mut response = JobStatusResponse::new(JobStatus::Timeout);
        response.error = Some("Job execution timed out".to_string());
        response.intermediate_result = Some(DistillResult {
            schema_version: 1,
            status: ResultStatus::Partial,
            stats: ProcessingStats::recounted(4, 1),
            results: Vec::new(),
        });
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["intermediate_result"]["status"], "partial");
    }
}
