//! SQLite backend: one row per job, JSON columns for structured payloads.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, error, info, warn};

use alembic_protocol::defaults::TIMEOUT_ERROR_MESSAGE;
use alembic_protocol::ids::JobId;
use alembic_protocol::types::{DistillResult, JobStatus};

use crate::{JobRecord, JobStore, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    job_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    completed_at TEXT,
    result TEXT,
    error TEXT,
    progress REAL NOT NULL DEFAULT 0,
    progress_phase TEXT NOT NULL DEFAULT '',
    progress_details TEXT NOT NULL DEFAULT '{}',
    intermediate_result TEXT,
    webhook_url TEXT
)
"#;

pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        sqlx::query(SCHEMA).execute(&pool).await?;
        info!(path = %path.display(), "SQLite job store initialized");
        Ok(Self { pool })
    }

    fn row_to_record(row: &SqliteRow) -> Result<JobRecord, StoreError> {
        let job_id: String = row.get("job_id");
        let status: String = row.get("status");
        let created_at: String = row.get("created_at");
        let completed_at: Option<String> = row.get("completed_at");
        let result: Option<String> = row.get("result");
        let progress_details: String = row.get("progress_details");
        let intermediate: Option<String> = row.get("intermediate_result");

        Ok(JobRecord {
            job_id: JobId::parse(&job_id)
                .map_err(|e| StoreError::Corrupt(format!("job id {job_id}: {e}")))?,
            status: JobStatus::from_str(&status).map_err(StoreError::Corrupt)?,
            created_at: parse_timestamp(&created_at)?,
            completed_at: completed_at.as_deref().map(parse_timestamp).transpose()?,
            result: result
                .as_deref()
                .map(serde_json::from_str::<DistillResult>)
                .transpose()?,
            error: row.get("error"),
            progress: row.get("progress"),
            progress_phase: row.get("progress_phase"),
            progress_details: serde_json::from_str(&progress_details)
                .unwrap_or_else(|_| serde_json::json!({})),
            intermediate_result: intermediate
                .as_deref()
                .map(serde_json::from_str::<DistillResult>)
                .transpose()?,
            webhook_url: row.get("webhook_url"),
        })
    }
}

fn timestamp_string(at: DateTime<Utc>) -> String {
    // Fixed subsecond width keeps lexicographic order equal to time order.
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {raw}: {e}")))
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create_job(&self, webhook_url: Option<String>) -> Result<JobId, StoreError> {
        let record = JobRecord::new(webhook_url);
        sqlx::query(
            r#"
            INSERT INTO jobs (job_id, status, created_at, progress, progress_phase, progress_details, webhook_url)
            VALUES (?, ?, ?, 0, '', '{}', ?)
            "#,
        )
        .bind(record.job_id.as_str())
        .bind(record.status.as_str())
        .bind(timestamp_string(record.created_at))
        .bind(&record.webhook_url)
        .execute(&self.pool)
        .await?;

        info!(job_id = %record.job_id, "created job");
        Ok(record.job_id)
    }

    async fn get_job(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE job_id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn update_success(&self, id: &JobId, result: &DistillResult) -> Result<(), StoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'success',
                completed_at = ?,
                result = ?,
                intermediate_result = NULL
            WHERE job_id = ? AND status = 'running'
            "#,
        )
        .bind(timestamp_string(Utc::now()))
        .bind(serde_json::to_string(result)?)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows > 0 {
            info!(job_id = %id, "job completed successfully");
        } else {
            debug!(job_id = %id, "success write dropped, job missing or already terminal");
        }
        Ok(())
    }

    async fn update_failure(&self, id: &JobId, message: &str) -> Result<(), StoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failure', completed_at = ?, error = ?
            WHERE job_id = ? AND status = 'running'
            "#,
        )
        .bind(timestamp_string(Utc::now()))
        .bind(message)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows > 0 {
            error!(job_id = %id, error = message, "job failed");
        }
        Ok(())
    }

    async fn update_timeout(&self, id: &JobId) -> Result<(), StoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'timeout', completed_at = ?, error = ?
            WHERE job_id = ? AND status = 'running'
            "#,
        )
        .bind(timestamp_string(Utc::now()))
        .bind(TIMEOUT_ERROR_MESSAGE)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows > 0 {
            warn!(job_id = %id, "job timed out");
        } else {
            debug!(job_id = %id, "timeout write dropped, job missing or already terminal");
        }
        Ok(())
    }

    async fn update_progress(
        &self,
        id: &JobId,
        phase: &str,
        progress: f64,
        details: &serde_json::Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET progress = ?, progress_phase = ?, progress_details = ?
            WHERE job_id = ? AND status = 'running'
            "#,
        )
        .bind(progress)
        .bind(phase)
        .bind(serde_json::to_string(details)?)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_intermediate(
        &self,
        id: &JobId,
        snapshot: &DistillResult,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET intermediate_result = ?
            WHERE job_id = ? AND status = 'running'
            "#,
        )
        .bind(serde_json::to_string(snapshot)?)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        debug!(job_id = %id, "saved intermediate result");
        Ok(())
    }

    async fn get_intermediate(&self, id: &JobId) -> Result<Option<DistillResult>, StoreError> {
        let raw: Option<Option<String>> =
            sqlx::query_scalar("SELECT intermediate_result FROM jobs WHERE job_id = ?")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        raw.flatten()
            .as_deref()
            .map(serde_json::from_str::<DistillResult>)
            .transpose()
            .map_err(StoreError::from)
    }

    async fn delete_job(&self, id: &JobId) -> Result<bool, StoreError> {
        let rows = sqlx::query("DELETE FROM jobs WHERE job_id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();
        if rows > 0 {
            info!(job_id = %id, "job deleted");
        }
        Ok(rows > 0)
    }

    async fn active_count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = 'running'")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn completed_count_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE completed_at IS NOT NULL AND completed_at >= ?",
        )
        .bind(timestamp_string(since))
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn cleanup_older_than(&self, max_age: chrono::Duration) -> Result<u64, StoreError> {
        let cutoff = timestamp_string(Utc::now() - max_age);
        let rows = sqlx::query(
            "DELETE FROM jobs WHERE completed_at IS NOT NULL AND completed_at < ?",
        )
        .bind(&cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if rows > 0 {
            info!(count = rows, "cleaned up old jobs");
        }
        Ok(rows)
    }
}
