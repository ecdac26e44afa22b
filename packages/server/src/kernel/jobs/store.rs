//! Job storage trait with guarded state transitions.

use async_trait::async_trait;

use super::error::JobError;
use super::job::{Job, NewJob};

/// Storage for job rows. Every transition is guarded by the current status,
/// so concurrent writers cannot push a job backwards through the state
/// machine or overwrite a terminal state.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new pending job.
    async fn create(&self, new_job: NewJob) -> Result<Job, JobError>;

    /// Load a job by id. `JobError::NotFound` when absent.
    async fn get(&self, job_id: i64) -> Result<Job, JobError>;

    /// Atomically claim up to `limit` pending jobs: flips them to processing
    /// and stamps a task handle derived from `worker_id`.
    async fn claim_ready(&self, worker_id: &str, limit: i64) -> Result<Vec<Job>, JobError>;

    /// Transition pending -> processing and record `task_handle`. Calling on
    /// an already-processing job is a no-op returning the current row; any
    /// other state is `JobError::InvalidTransition`.
    async fn start(&self, job_id: i64, task_handle: &str) -> Result<Job, JobError>;

    /// Terminal write: processing -> completed, setting `result` and
    /// `completed_at`. Returns false (ignored, logged by the caller) when the
    /// job is no longer in a completable state - this is how a late worker
    /// result loses to a cancellation.
    async fn complete(&self, job_id: i64, result: &str) -> Result<bool, JobError>;

    /// Terminal write: pending/processing -> failed, setting `error` and
    /// `completed_at`. Same ignored-write semantics as [`Self::complete`].
    /// Pending is accepted so policy rejections can fail a job the worker
    /// never started.
    async fn fail(&self, job_id: i64, error: &str) -> Result<bool, JobError>;

    /// Terminal write: pending/processing -> cancelled. Cancelling a job
    /// already in a terminal state is `JobError::InvalidTransition`.
    async fn cancel(&self, job_id: i64) -> Result<Job, JobError>;
}
