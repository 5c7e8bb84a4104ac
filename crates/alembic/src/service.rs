//! Service facade: request validation, job submission, polling shapes.

use chrono::{Duration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use alembic_engine::DistillEngine;
use alembic_jobs::JobManager;
use alembic_protocol::defaults::{MAX_ITERATIONS, MIN_ITERATIONS};
use alembic_protocol::ids::JobId;
use alembic_protocol::settings::Settings;
use alembic_protocol::types::JobStatus;
use alembic_protocol::wire::{AutoDistillRequest, JobStatusResponse, ProgressInfo};
use alembic_store::StoreError;

/// Errors surfaced at submission. `Validation` maps to HTTP 4xx at the
/// front door; `Store` to 5xx.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Static facts reported by [`DistillService::health`].
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub llm_model: String,
    pub embedding_model: String,
    pub max_cluster_size: usize,
}

impl ServiceInfo {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            llm_model: settings.llm_model.clone(),
            embedding_model: settings.embedding_model.clone(),
            max_cluster_size: settings.max_cluster_size_for_llm,
        }
    }
}

/// Health surface for probes; plain data, no HTTP attached.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub status: &'static str,
    pub model: String,
    pub embedding_model: String,
    pub max_cluster_size: usize,
    pub jobs_active: u64,
    pub jobs_completed_24h: u64,
}

pub struct DistillService {
    engine: Arc<DistillEngine>,
    manager: Arc<JobManager>,
    info: ServiceInfo,
}

impl DistillService {
    pub fn new(engine: Arc<DistillEngine>, manager: Arc<JobManager>, info: ServiceInfo) -> Self {
        Self {
            engine,
            manager,
            info,
        }
    }

    /// Validate and enqueue a distillation request. The returned id is
    /// valid for polling immediately.
    pub async fn submit(
        &self,
        request: AutoDistillRequest,
        webhook_url: Option<String>,
    ) -> Result<JobId, SubmitError> {
        validate(&request)?;
        info!(
            task_id = %request.task_id,
            block_count = request.results.len(),
            similarity = request.similarity,
            iterations = request.iterations,
            "received distillation request"
        );

        let engine = self.engine.clone();
        let AutoDistillRequest {
            similarity,
            iterations,
            results,
            ..
        } = request;

        let job_id = self
            .manager
            .submit(webhook_url, move |handle| async move {
                engine
                    .run(
                        results,
                        similarity,
                        iterations,
                        &handle.cancel,
                        handle.observer.as_ref(),
                    )
                    .await
            })
            .await?;
        Ok(job_id)
    }

    /// Poll a job. `None` means the id is unknown (HTTP 404).
    pub async fn status(&self, id: &JobId) -> Result<Option<JobStatusResponse>, StoreError> {
        let store = self.manager.store();
        let Some(record) = store.get_job(id).await? else {
            return Ok(None);
        };

        let mut response = JobStatusResponse::new(record.status);
        match record.status {
            JobStatus::Running => {
                response.progress = Some(ProgressInfo {
                    percent: (record.progress * 1000.0).round() / 10.0,
                    phase: record.progress_phase,
                    details: record.progress_details,
                });
            }
            JobStatus::Success => {
                if let Some(result) = record.result {
                    response.results = result.results;
                    response.stats = Some(result.stats);
                }
            }
            JobStatus::Failure | JobStatus::Timeout => {
                response.error = record.error;
                response.intermediate_result = store.get_intermediate(id).await?;
            }
        }
        Ok(Some(response))
    }

    /// Cancel and remove a job. Returns whether anything existed.
    pub async fn delete(&self, id: &JobId) -> Result<bool, StoreError> {
        self.manager.delete_job(id).await
    }

    pub async fn health(&self) -> ServiceHealth {
        let jobs_active = self.manager.active_count().await.unwrap_or(0);
        let jobs_completed_24h = self
            .manager
            .completed_count_since(Utc::now() - Duration::hours(24))
            .await
            .unwrap_or(0);
        ServiceHealth {
            status: "ok",
            model: self.info.llm_model.clone(),
            embedding_model: self.info.embedding_model.clone(),
            max_cluster_size: self.info.max_cluster_size,
            jobs_active,
            jobs_completed_24h,
        }
    }
}

fn validate(request: &AutoDistillRequest) -> Result<(), SubmitError> {
    if request.results.is_empty() {
        return Err(SubmitError::Validation("results must not be empty".to_string()));
    }
    if !(0.0..=1.0).contains(&request.similarity) {
        return Err(SubmitError::Validation(format!(
            "similarity must be within [0, 1], got {}",
            request.similarity
        )));
    }
    if !(MIN_ITERATIONS..=MAX_ITERATIONS).contains(&request.iterations) {
        return Err(SubmitError::Validation(format!(
            "iterations must be within [{MIN_ITERATIONS}, {MAX_ITERATIONS}], got {}",
            request.iterations
        )));
    }
    let mut seen = HashSet::new();
    for block in &request.results {
        if !seen.insert(block.id.as_str()) {
            return Err(SubmitError::Validation(format!(
                "duplicate block id: {}",
                block.id
            )));
        }
    }
    Ok(())
}
