//! In-memory job store for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::error::JobError;
use super::job::{Job, JobStatus, NewJob};
use super::store::JobStore;

/// In-memory [`JobStore`] with the same transition guards as the Postgres
/// implementation. Jobs are held in a map for inspection.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<i64, Job>>,
    next_id: AtomicI64,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all stored jobs.
    pub fn all(&self) -> Vec<Job> {
        self.jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    fn update<F>(&self, job_id: i64, mutate: F) -> Result<Option<Job>, JobError>
    where
        F: FnOnce(&mut Job) -> bool,
    {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let job = jobs.get_mut(&job_id).ok_or(JobError::NotFound(job_id))?;

        if mutate(job) {
            job.updated_at = Utc::now();
            Ok(Some(job.clone()))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, new_job: NewJob) -> Result<Job, JobError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let job = Job {
            id,
            name: new_job.name,
            job_type: new_job.job_type,
            campaign_id: new_job.campaign_id,
            status: JobStatus::Pending,
            task_handle: None,
            params: new_job.params,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, job.clone());

        Ok(job)
    }

    async fn get(&self, job_id: i64) -> Result<Job, JobError> {
        self.jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&job_id)
            .cloned()
            .ok_or(JobError::NotFound(job_id))
    }

    async fn claim_ready(&self, worker_id: &str, limit: i64) -> Result<Vec<Job>, JobError> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());

        let mut ready: Vec<(chrono::DateTime<Utc>, i64)> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .map(|j| (j.created_at, j.id))
            .collect();
        ready.sort();
        ready.truncate(limit.max(0) as usize);
        let ready: Vec<i64> = ready.into_iter().map(|(_, id)| id).collect();

        let mut claimed = Vec::with_capacity(ready.len());
        for id in ready {
            if let Some(job) = jobs.get_mut(&id) {
                job.status = JobStatus::Processing;
                job.task_handle = Some(format!("{}:{}", worker_id, Uuid::new_v4()));
                job.updated_at = Utc::now();
                claimed.push(job.clone());
            }
        }

        Ok(claimed)
    }

    async fn start(&self, job_id: i64, task_handle: &str) -> Result<Job, JobError> {
        let updated = self.update(job_id, |job| {
            if matches!(job.status, JobStatus::Pending | JobStatus::Processing) {
                job.status = JobStatus::Processing;
                if job.task_handle.is_none() {
                    job.task_handle = Some(task_handle.to_string());
                }
                true
            } else {
                false
            }
        })?;

        match updated {
            Some(job) => Ok(job),
            None => {
                let current = self.get(job_id).await?;
                Err(JobError::InvalidTransition {
                    action: "start",
                    status: current.status,
                })
            }
        }
    }

    async fn complete(&self, job_id: i64, result: &str) -> Result<bool, JobError> {
        let updated = self.update(job_id, |job| {
            if job.status == JobStatus::Processing {
                job.status = JobStatus::Completed;
                job.result = Some(result.to_string());
                job.error = None;
                job.completed_at = Some(Utc::now());
                true
            } else {
                false
            }
        })?;

        Ok(updated.is_some())
    }

    async fn fail(&self, job_id: i64, error: &str) -> Result<bool, JobError> {
        let updated = self.update(job_id, |job| {
            if matches!(job.status, JobStatus::Pending | JobStatus::Processing) {
                job.status = JobStatus::Failed;
                job.error = Some(error.to_string());
                job.completed_at = Some(Utc::now());
                true
            } else {
                false
            }
        })?;

        Ok(updated.is_some())
    }

    async fn cancel(&self, job_id: i64) -> Result<Job, JobError> {
        let updated = self.update(job_id, |job| {
            if matches!(job.status, JobStatus::Pending | JobStatus::Processing) {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                true
            } else {
                false
            }
        })?;

        match updated {
            Some(job) => Ok(job),
            None => {
                let current = self.get(job_id).await?;
                Err(JobError::InvalidTransition {
                    action: "cancel",
                    status: current.status,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::JobType;
    use serde_json::json;

    fn store() -> InMemoryJobStore {
        InMemoryJobStore::new()
    }

    fn sample_job() -> NewJob {
        NewJob::fetch_leads("fetch", Uuid::new_v4(), json!({"fileName": "x.csv"}))
    }

    #[tokio::test]
    async fn create_starts_pending() {
        let store = store();
        let job = store.create(sample_job()).await.unwrap();

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.job_type, JobType::FetchLeads);
        assert!(job.task_handle.is_none());
        assert!(job.completed_at.is_none());
    }

    #[tokio::test]
    async fn get_missing_job_is_not_found() {
        let store = store();
        assert!(matches!(store.get(42).await, Err(JobError::NotFound(42))));
    }

    #[tokio::test]
    async fn claim_marks_processing_and_stamps_handle() {
        let store = store();
        let job = store.create(sample_job()).await.unwrap();

        let claimed = store.claim_ready("worker-1", 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, job.id);
        assert_eq!(claimed[0].status, JobStatus::Processing);
        assert!(claimed[0].task_handle.as_deref().unwrap().starts_with("worker-1:"));

        // A second claim finds nothing.
        assert!(store.claim_ready("worker-2", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn start_is_idempotent_for_processing_jobs() {
        let store = store();
        let job = store.create(sample_job()).await.unwrap();

        let started = store.start(job.id, "task-1").await.unwrap();
        assert_eq!(started.status, JobStatus::Processing);
        assert_eq!(started.task_handle.as_deref(), Some("task-1"));

        // Re-start keeps the original handle.
        let restarted = store.start(job.id, "task-2").await.unwrap();
        assert_eq!(restarted.task_handle.as_deref(), Some("task-1"));
    }

    #[tokio::test]
    async fn complete_requires_processing() {
        let store = store();
        let job = store.create(sample_job()).await.unwrap();

        // Pending job cannot complete.
        assert!(!store.complete(job.id, "done").await.unwrap());

        store.start(job.id, "task-1").await.unwrap();
        assert!(store.complete(job.id, "done").await.unwrap());

        let job = store.get(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.as_deref(), Some("done"));
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn late_completion_does_not_overwrite_cancelled() {
        let store = store();
        let job = store.create(sample_job()).await.unwrap();
        store.start(job.id, "task-1").await.unwrap();
        let cancelled = store.cancel(job.id).await.unwrap();
        let cancelled_at = cancelled.completed_at;

        // Worker finishes late; its writes must be ignored.
        assert!(!store.complete(job.id, "done").await.unwrap());
        assert!(!store.fail(job.id, "boom").await.unwrap());

        let job = store.get(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.result.is_none());
        assert_eq!(job.completed_at, cancelled_at);
    }

    #[tokio::test]
    async fn fail_accepts_pending_jobs() {
        let store = store();
        let job = store.create(sample_job()).await.unwrap();

        assert!(store.fail(job.id, "circuit breaker open").await.unwrap());

        let job = store.get(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("circuit breaker open"));
    }

    #[tokio::test]
    async fn cancel_terminal_job_is_invalid_transition() {
        let store = store();
        let job = store.create(sample_job()).await.unwrap();
        store.start(job.id, "task-1").await.unwrap();
        store.complete(job.id, "done").await.unwrap();
        let before = store.get(job.id).await.unwrap();

        let err = store.cancel(job.id).await.unwrap_err();
        assert!(matches!(
            err,
            JobError::InvalidTransition {
                action: "cancel",
                status: JobStatus::Completed
            }
        ));
        assert_eq!(
            err.to_string(),
            "cannot cancel job in completed state"
        );

        // Row unchanged.
        let after = store.get(job.id).await.unwrap();
        assert_eq!(after.status, before.status);
        assert_eq!(after.completed_at, before.completed_at);
    }

    #[tokio::test]
    async fn start_terminal_job_is_invalid_transition() {
        let store = store();
        let job = store.create(sample_job()).await.unwrap();
        store.cancel(job.id).await.unwrap();

        assert!(matches!(
            store.start(job.id, "task-1").await,
            Err(JobError::InvalidTransition {
                action: "start",
                status: JobStatus::Cancelled
            })
        ));
    }
}
