//! Bounded job execution with timeout enforcement.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use alembic_engine::{EngineError, JobObserver};
use alembic_protocol::cancel::CancelToken;
use alembic_protocol::ids::JobId;
use alembic_protocol::settings::Settings;
use alembic_protocol::types::DistillResult;
use alembic_store::{JobStore, StoreError};

use crate::observer::StoreObserver;

#[derive(Debug, Clone)]
pub struct JobManagerConfig {
    pub worker_pool_size: usize,
    pub job_timeout: Duration,
}

impl JobManagerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            worker_pool_size: settings.worker_pool_size,
            job_timeout: Duration::from_secs(settings.job_timeout_seconds),
        }
    }
}

/// Everything a job future needs from the manager: its identity, the
/// cancellation token checked between phases, and the store observer.
pub struct JobHandle {
    pub job_id: JobId,
    pub cancel: CancelToken,
    pub observer: Arc<dyn JobObserver>,
}

struct RunningJob {
    cancel: CancelToken,
    task: JoinHandle<()>,
}

/// Executes jobs on a bounded pool; submission is non-blocking and the
/// returned id is pollable immediately.
pub struct JobManager {
    store: Arc<dyn JobStore>,
    permits: Arc<Semaphore>,
    timeout: Duration,
    running: Arc<Mutex<HashMap<String, RunningJob>>>,
}

impl JobManager {
    pub fn new(store: Arc<dyn JobStore>, config: JobManagerConfig) -> Self {
        info!(
            worker_pool_size = config.worker_pool_size,
            timeout_seconds = config.job_timeout.as_secs(),
            "job manager initialized"
        );
        Self {
            store,
            permits: Arc::new(Semaphore::new(config.worker_pool_size.max(1))),
            timeout: config.job_timeout,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    /// Create the job record, then dispatch the work built by `make_job`.
    pub async fn submit<F, Fut>(
        &self,
        webhook_url: Option<String>,
        make_job: F,
    ) -> Result<JobId, StoreError>
    where
        F: FnOnce(JobHandle) -> Fut,
        Fut: Future<Output = Result<DistillResult, EngineError>> + Send + 'static,
    {
        let job_id = self.store.create_job(webhook_url).await?;
        let cancel = CancelToken::new();
        let observer = Arc::new(StoreObserver::new(self.store.clone(), job_id.clone()));
        let work = make_job(JobHandle {
            job_id: job_id.clone(),
            cancel: cancel.clone(),
            observer,
        });

        let store = self.store.clone();
        let permits = self.permits.clone();
        let timeout = self.timeout;
        let running = self.running.clone();
        let task_id = job_id.clone();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            run_job(store, permits, timeout, task_id.clone(), task_cancel, work).await;
            running
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(task_id.as_str());
        });

        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(job_id.as_str().to_string(), RunningJob { cancel, task });

        info!(job_id = %job_id, "job submitted to worker pool");
        Ok(job_id)
    }

    /// Cancel and remove a job. Late writes from the dead task hit a
    /// missing record and are dropped by the store.
    pub async fn delete_job(&self, id: &JobId) -> Result<bool, StoreError> {
        let removed = self.store.delete_job(id).await?;
        if let Some(job) = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id.as_str())
        {
            job.cancel.cancel();
            job.task.abort();
            debug!(job_id = %id, "requested worker termination");
        }
        Ok(removed)
    }

    pub async fn active_count(&self) -> Result<u64, StoreError> {
        self.store.active_count().await
    }

    pub async fn completed_count_since(
        &self,
        since: chrono::DateTime<chrono::Utc>,
    ) -> Result<u64, StoreError> {
        self.store.completed_count_since(since).await
    }

    /// Retention sweep; returns the number of jobs removed.
    pub async fn cleanup_old_jobs(&self, max_age: chrono::Duration) -> Result<u64, StoreError> {
        self.store.cleanup_older_than(max_age).await
    }
}

async fn run_job<Fut>(
    store: Arc<dyn JobStore>,
    permits: Arc<Semaphore>,
    timeout: Duration,
    job_id: JobId,
    cancel: CancelToken,
    work: Fut,
) where
    Fut: Future<Output = Result<DistillResult, EngineError>> + Send + 'static,
{
    let Ok(_permit) = permits.acquire_owned().await else {
        let _ = store
            .update_failure(&job_id, "worker pool shut down before execution")
            .await;
        return;
    };

    info!(job_id = %job_id, timeout_seconds = timeout.as_secs(), "starting job execution");
    let start = Instant::now();

    match tokio::time::timeout(timeout, work).await {
        Ok(Ok(result)) => {
            info!(
                job_id = %job_id,
                execution_seconds = start.elapsed().as_secs_f64(),
                "job execution completed"
            );
            if let Err(e) = store.update_success(&job_id, &result).await {
                error!(job_id = %job_id, error = %e, "failed to persist job result");
            }
        }
        Ok(Err(EngineError::Cancelled)) => {
            // Deletion already removed the record; this write is dropped.
            info!(job_id = %job_id, "job cancelled");
            if let Err(e) = store.update_failure(&job_id, "Job cancelled").await {
                error!(job_id = %job_id, error = %e, "failed to persist cancellation");
            }
        }
        Ok(Err(err)) => {
            error!(job_id = %job_id, error = %err, "job execution failed");
            if let Err(e) = store.update_failure(&job_id, &err.to_string()).await {
                error!(job_id = %job_id, error = %e, "failed to persist job failure");
            }
        }
        Err(_) => {
            warn!(
                job_id = %job_id,
                timeout_seconds = timeout.as_secs(),
                execution_seconds = start.elapsed().as_secs_f64(),
                "job execution timed out"
            );
            // The work future is already dropped; ask any cooperative
            // stragglers (blocking sections) to stop as well.
            cancel.cancel();
            if let Err(e) = store.update_timeout(&job_id).await {
                error!(job_id = %job_id, error = %e, "failed to persist job timeout");
            }
        }
    }
}
