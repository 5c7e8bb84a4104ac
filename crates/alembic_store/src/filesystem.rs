//! Filesystem backend: running jobs live in memory, terminal states and
//! checkpoints persist as JSON files with atomic replace.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

use alembic_protocol::defaults::TIMEOUT_ERROR_MESSAGE;
use alembic_protocol::ids::JobId;
use alembic_protocol::types::{DistillResult, JobStatus};

use crate::{JobRecord, JobStore, StoreError};

pub struct FilesystemJobStore {
    jobs_dir: PathBuf,
    live: Mutex<HashMap<String, JobRecord>>,
}

impl FilesystemJobStore {
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let jobs_dir = data_dir.join("jobs");
        fs::create_dir_all(&jobs_dir)?;
        info!(data_dir = %data_dir.display(), "filesystem job store initialized");
        Ok(Self {
            jobs_dir,
            live: Mutex::new(HashMap::new()),
        })
    }

    fn job_path(&self, id: &JobId) -> PathBuf {
        self.jobs_dir.join(format!("{id}.json"))
    }

    fn intermediate_path(&self, id: &JobId) -> PathBuf {
        self.jobs_dir.join(format!("{id}.intermediate.json"))
    }

    /// Write-temp-then-rename so pollers never read a half-written file.
    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn persist(&self, record: &JobRecord) -> Result<(), StoreError> {
        let mut on_disk = record.clone();
        on_disk.intermediate_result = None;
        Self::write_atomic(
            &self.job_path(&record.job_id),
            &serde_json::to_vec_pretty(&on_disk)?,
        )
    }

    fn load_from_disk(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        let path = self.job_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        let record = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))?;
        Ok(Some(record))
    }

    fn remove_intermediate(&self, id: &JobId) {
        let path = self.intermediate_path(id);
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                warn!(job_id = %id, error = %e, "failed to clean up intermediate file");
            }
        }
    }

    /// Take the record out of the live map when a terminal transition is
    /// legal; `None` means the write must be dropped.
    fn take_running(&self, id: &JobId) -> Option<JobRecord> {
        let mut live = self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match live.get(id.as_str()) {
            Some(record) if record.status == JobStatus::Running => live.remove(id.as_str()),
            _ => None,
        }
    }

    fn completed_records(&self) -> Vec<(PathBuf, JobRecord)> {
        let mut records = Vec::new();
        let entries = match fs::read_dir(&self.jobs_dir) {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "failed to list jobs directory");
                return records;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with(".json") || name.ends_with(".intermediate.json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(StoreError::from)
                .and_then(|raw| serde_json::from_str::<JobRecord>(&raw).map_err(StoreError::from))
            {
                Ok(record) => records.push((path, record)),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable job file"),
            }
        }
        records
    }
}

#[async_trait]
impl JobStore for FilesystemJobStore {
    async fn create_job(&self, webhook_url: Option<String>) -> Result<JobId, StoreError> {
        let record = JobRecord::new(webhook_url);
        let id = record.job_id.clone();
        self.live
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id.as_str().to_string(), record);
        info!(job_id = %id, "created job");
        Ok(id)
    }

    async fn get_job(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        {
            let live = self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(record) = live.get(id.as_str()) {
                return Ok(Some(record.clone()));
            }
        }
        self.load_from_disk(id)
    }

    async fn update_success(&self, id: &JobId, result: &DistillResult) -> Result<(), StoreError> {
        let Some(mut record) = self.take_running(id) else {
            debug!(job_id = %id, "success write dropped, job missing or already terminal");
            return Ok(());
        };
        record.status = JobStatus::Success;
        record.completed_at = Some(Utc::now());
        record.result = Some(result.clone());
        record.intermediate_result = None;
        self.persist(&record)?;
        self.remove_intermediate(id);
        info!(job_id = %id, "job completed successfully");
        Ok(())
    }

    async fn update_failure(&self, id: &JobId, message: &str) -> Result<(), StoreError> {
        let Some(mut record) = self.take_running(id) else {
            debug!(job_id = %id, "failure write dropped, job missing or already terminal");
            return Ok(());
        };
        record.status = JobStatus::Failure;
        record.completed_at = Some(Utc::now());
        record.error = Some(message.to_string());
        self.persist(&record)?;
        error!(job_id = %id, error = message, "job failed");
        Ok(())
    }

    async fn update_timeout(&self, id: &JobId) -> Result<(), StoreError> {
        let Some(mut record) = self.take_running(id) else {
            debug!(job_id = %id, "timeout write dropped, job missing or already terminal");
            return Ok(());
        };
        record.status = JobStatus::Timeout;
        record.completed_at = Some(Utc::now());
        record.error = Some(TIMEOUT_ERROR_MESSAGE.to_string());
        self.persist(&record)?;
        warn!(job_id = %id, "job timed out");
        Ok(())
    }

    async fn update_progress(
        &self,
        id: &JobId,
        phase: &str,
        progress: f64,
        details: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut live = self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(record) = live.get_mut(id.as_str()) {
            if record.status == JobStatus::Running {
                record.progress = progress;
                record.progress_phase = phase.to_string();
                record.progress_details = details.clone();
            }
        }
        Ok(())
    }

    async fn save_intermediate(
        &self,
        id: &JobId,
        snapshot: &DistillResult,
    ) -> Result<(), StoreError> {
        {
            let mut live = self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            match live.get_mut(id.as_str()) {
                Some(record) if record.status == JobStatus::Running => {
                    record.intermediate_result = Some(snapshot.clone());
                }
                _ => return Ok(()),
            }
        }
        Self::write_atomic(&self.intermediate_path(id), &serde_json::to_vec(snapshot)?)?;
        debug!(job_id = %id, "saved intermediate result");
        Ok(())
    }

    async fn get_intermediate(&self, id: &JobId) -> Result<Option<DistillResult>, StoreError> {
        {
            let live = self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(record) = live.get(id.as_str()) {
                if record.intermediate_result.is_some() {
                    return Ok(record.intermediate_result.clone());
                }
            }
        }
        let path = self.intermediate_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        let snapshot = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))?;
        Ok(Some(snapshot))
    }

    async fn delete_job(&self, id: &JobId) -> Result<bool, StoreError> {
        let mut deleted = self
            .live
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id.as_str())
            .is_some();

        let job_file = self.job_path(id);
        if job_file.exists() {
            fs::remove_file(&job_file)?;
            deleted = true;
        }
        self.remove_intermediate(id);

        if deleted {
            info!(job_id = %id, "job deleted");
        }
        Ok(deleted)
    }

    async fn active_count(&self) -> Result<u64, StoreError> {
        let live = self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(live.len() as u64)
    }

    async fn completed_count_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError> {
        let count = self
            .completed_records()
            .into_iter()
            .filter(|(_, record)| record.completed_at.is_some_and(|at| at >= since))
            .count();
        Ok(count as u64)
    }

    async fn cleanup_older_than(&self, max_age: chrono::Duration) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - max_age;
        let mut removed = 0u64;
        for (path, record) in self.completed_records() {
            if record.completed_at.is_some_and(|at| at < cutoff) {
                if let Err(e) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "failed to remove old job file");
                    continue;
                }
                self.remove_intermediate(&record.job_id);
                removed += 1;
            }
        }
        if removed > 0 {
            info!(count = removed, "cleaned up old jobs");
        }
        Ok(removed)
    }
}
