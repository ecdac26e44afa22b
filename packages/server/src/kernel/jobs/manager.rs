//! Job manager: the enqueue/status/cancel surface consumed by the API layer.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use super::error::JobError;
use super::job::{Job, NewJob};
use super::progress::{JobProgress, ProgressTracker};
use super::store::JobStore;

/// Registry of in-flight executions on this worker process, keyed by job id.
/// The manager uses it to revoke a running job best-effort; the durable row
/// stays authoritative either way.
#[derive(Clone, Default)]
pub struct RunningJobs {
    inner: Arc<RwLock<HashMap<i64, CancellationToken>>>,
}

impl RunningJobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job_id: i64, token: CancellationToken) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job_id, token);
    }

    pub fn remove(&self, job_id: i64) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&job_id);
    }

    /// Cancel the in-flight execution if one exists. Returns whether a
    /// running execution was signalled.
    pub fn revoke(&self, job_id: i64) -> bool {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        match guard.get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Job row plus the live (advisory) progress for status queries.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobSnapshot {
    #[serde(flatten)]
    pub job: Job,
    pub progress: Option<JobProgress>,
}

#[derive(Clone)]
pub struct JobManager {
    store: Arc<dyn JobStore>,
    progress: ProgressTracker,
    running: RunningJobs,
}

impl JobManager {
    pub fn new(store: Arc<dyn JobStore>, progress: ProgressTracker, running: RunningJobs) -> Self {
        Self {
            store,
            progress,
            running,
        }
    }

    /// Enqueue a lead-fetch job for a campaign.
    pub async fn enqueue_fetch(
        &self,
        name: impl Into<String>,
        campaign_id: Uuid,
        params: JsonValue,
    ) -> Result<Job, JobError> {
        self.enqueue(NewJob::fetch_leads(name, campaign_id, params))
            .await
    }

    pub async fn enqueue(&self, new_job: NewJob) -> Result<Job, JobError> {
        let job = self.store.create(new_job).await?;
        info!(job_id = job.id, job_type = job.job_type.as_str(), "job enqueued");
        Ok(job)
    }

    /// Consistent snapshot: the durable row plus any live progress.
    pub async fn status(&self, job_id: i64) -> Result<JobSnapshot, JobError> {
        let job = self.store.get(job_id).await?;
        let progress = self.progress.get(job_id);
        Ok(JobSnapshot { job, progress })
    }

    /// Cancel a pending or processing job. The row write is authoritative;
    /// the in-flight execution (if any) is revoked best-effort afterwards.
    /// Cancelling a terminal job is `JobError::InvalidTransition`.
    pub async fn cancel(&self, job_id: i64) -> Result<Job, JobError> {
        let job = self.store.cancel(job_id).await?;

        let revoked = self.running.revoke(job_id);
        self.progress.clear(job_id);
        info!(job_id, revoked, "job cancelled");

        Ok(job)
    }
}
