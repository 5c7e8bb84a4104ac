//! Write-through observer connecting the engine to the job store.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use alembic_engine::JobObserver;
use alembic_protocol::ids::JobId;
use alembic_protocol::types::{DistillResult, ProgressPhase};
use alembic_store::JobStore;

/// Forwards progress and checkpoints to the store. Store trouble is logged
/// and swallowed: a failed progress write must never fail the job.
pub struct StoreObserver {
    store: Arc<dyn JobStore>,
    job_id: JobId,
}

impl StoreObserver {
    pub fn new(store: Arc<dyn JobStore>, job_id: JobId) -> Self {
        Self { store, job_id }
    }
}

#[async_trait]
impl JobObserver for StoreObserver {
    async fn progress(&self, phase: ProgressPhase, fraction: f64, details: serde_json::Value) {
        if let Err(e) = self
            .store
            .update_progress(&self.job_id, phase.as_str(), fraction, &details)
            .await
        {
            warn!(job_id = %self.job_id, error = %e, "failed to write progress update");
        }
    }

    async fn intermediate(&self, snapshot: &DistillResult) {
        if let Err(e) = self.store.save_intermediate(&self.job_id, snapshot).await {
            warn!(job_id = %self.job_id, error = %e, "failed to save intermediate result");
        }
    }
}
