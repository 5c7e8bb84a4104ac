//! Durable job store with interchangeable SQLite and filesystem backends.
//!
//! Terminal status writes and intermediate snapshots survive restarts;
//! progress updates are advisory. Terminal transitions only apply while a
//! job is still `running`, so a late timeout can never clobber a success.

pub mod filesystem;
pub mod sqlite;

pub use filesystem::FilesystemJobStore;
pub use sqlite::SqliteJobStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use alembic_protocol::ids::JobId;
use alembic_protocol::types::{DistillResult, JobStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid store URL: {0}")]
    InvalidUrl(String),
    #[error("invalid stored record: {0}")]
    Corrupt(String),
}

/// Persistent record of a distillation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<DistillResult>,
    pub error: Option<String>,
    pub progress: f64,
    pub progress_phase: String,
    pub progress_details: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intermediate_result: Option<DistillResult>,
    pub webhook_url: Option<String>,
}

impl JobRecord {
    /// A fresh `running` record.
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            job_id: JobId::new(),
            status: JobStatus::Running,
            created_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
            progress: 0.0,
            progress_phase: String::new(),
            progress_details: serde_json::json!({}),
            intermediate_result: None,
            webhook_url,
        }
    }
}

/// Storage contract shared by both backends.
///
/// Individual operations are atomic (row-level updates in SQLite, whole-file
/// replace on the filesystem); terminal writes on a job that is no longer
/// `running` are dropped silently.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a `running` record and return its id.
    async fn create_job(&self, webhook_url: Option<String>) -> Result<JobId, StoreError>;

    async fn get_job(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError>;

    /// Transition to `success`, store the result, clear the snapshot.
    async fn update_success(&self, id: &JobId, result: &DistillResult) -> Result<(), StoreError>;

    /// Transition to `failure` with a human-readable error.
    async fn update_failure(&self, id: &JobId, error: &str) -> Result<(), StoreError>;

    /// Transition to `timeout`. A no-op for jobs already terminal.
    async fn update_timeout(&self, id: &JobId) -> Result<(), StoreError>;

    /// Advisory progress update; only applied while `running`.
    async fn update_progress(
        &self,
        id: &JobId,
        phase: &str,
        progress: f64,
        details: &serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Durable checkpoint for crash recovery; only applied while `running`.
    async fn save_intermediate(
        &self,
        id: &JobId,
        snapshot: &DistillResult,
    ) -> Result<(), StoreError>;

    async fn get_intermediate(&self, id: &JobId) -> Result<Option<DistillResult>, StoreError>;

    /// Remove the record and any snapshot. Returns whether anything existed.
    async fn delete_job(&self, id: &JobId) -> Result<bool, StoreError>;

    async fn active_count(&self) -> Result<u64, StoreError>;

    async fn completed_count_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Remove completed jobs older than `max_age`. Returns the count removed.
    async fn cleanup_older_than(&self, max_age: chrono::Duration) -> Result<u64, StoreError>;
}

/// Parsed store location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreUrl {
    /// `sqlite:<path>` — one row per job.
    Sqlite(PathBuf),
    /// `file:<dir>` — one JSON file per job under `<dir>/jobs/`.
    Filesystem(PathBuf),
}

impl StoreUrl {
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        if let Some(rest) = raw.strip_prefix("sqlite:") {
            let path = rest.trim();
            if path.is_empty() {
                return Err(StoreError::InvalidUrl(format!("sqlite URL missing path: {raw}")));
            }
            return Ok(Self::Sqlite(PathBuf::from(path)));
        }
        if let Some(rest) = raw.strip_prefix("file:") {
            let dir = rest.trim();
            if dir.is_empty() {
                return Err(StoreError::InvalidUrl(format!("file URL missing directory: {raw}")));
            }
            return Ok(Self::Filesystem(PathBuf::from(dir)));
        }
        Err(StoreError::InvalidUrl(format!("unsupported store URL: {raw}")))
    }
}

/// Open the backend named by `raw` (`sqlite:<path>` or `file:<dir>`).
pub async fn open_store(raw: &str) -> Result<Arc<dyn JobStore>, StoreError> {
    match StoreUrl::parse(raw)? {
        StoreUrl::Sqlite(path) => Ok(Arc::new(SqliteJobStore::open(&path).await?)),
        StoreUrl::Filesystem(dir) => Ok(Arc::new(FilesystemJobStore::open(&dir)?)),
    }
}
