//! Job worker service for processing background jobs.
//!
//! The `JobWorker` is a long-running service that:
//! - Polls the job store for ready jobs (atomic claim)
//! - Looks up the executor registered for each job's type
//! - Runs claimed jobs concurrently, one executor invocation per job
//! - Tracks a per-job `CancellationToken` so cancel requests can interrupt
//!   in-flight work
//!
//! Executors own all terminal job-row transitions; the worker only steps in
//! for jobs with no registered executor. The worker never retries: if the
//! surrounding scheduler wants retries, it enqueues a new job.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::job::{Job, JobType};
use super::manager::RunningJobs;
use super::progress::ProgressTracker;
use super::store::JobStore;
use crate::kernel::service_host::Service;

/// Executes one kind of job to a terminal state.
///
/// Implementations own every Job row transition for the jobs they run; the
/// returned string is the human-readable result summary, and the returned
/// error feeds the queue's failure tracking.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    fn job_type(&self) -> JobType;

    async fn execute(&self, job_id: i64) -> Result<String>;
}

/// Executors keyed by the job type they handle.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<JobType, Arc<dyn JobExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, executor: Arc<dyn JobExecutor>) {
        self.executors.insert(executor.job_type(), executor);
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobExecutor>> {
        self.executors.get(&job_type).cloned()
    }
}

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct JobWorkerConfig {
    /// Maximum number of jobs to claim at once
    pub batch_size: i64,
    /// How long to wait when no jobs are available
    pub max_poll_interval: Duration,
    /// Pause between busy batches
    pub min_poll_interval: Duration,
    /// Worker ID for this instance
    pub worker_id: String,
}

impl Default for JobWorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 4,
            max_poll_interval: Duration::from_secs(15),
            min_poll_interval: Duration::from_millis(100),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }
}

impl JobWorkerConfig {
    /// Create a new config with a specific worker ID.
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }
}

/// A worker that claims jobs and drives their executors.
pub struct JobWorker {
    store: Arc<dyn JobStore>,
    registry: Arc<ExecutorRegistry>,
    running: RunningJobs,
    progress: ProgressTracker,
    config: JobWorkerConfig,
}

impl JobWorker {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<ExecutorRegistry>,
        running: RunningJobs,
        progress: ProgressTracker,
    ) -> Self {
        Self {
            store,
            registry,
            running,
            progress,
            config: JobWorkerConfig::default(),
        }
    }

    /// Create with custom configuration.
    pub fn with_config(
        store: Arc<dyn JobStore>,
        registry: Arc<ExecutorRegistry>,
        running: RunningJobs,
        progress: ProgressTracker,
        config: JobWorkerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            running,
            progress,
            config,
        }
    }

    /// Process a single claimed job.
    async fn process_job(&self, job: Job, shutdown: &CancellationToken) {
        let job_id = job.id;
        let job_type = job.job_type;

        let Some(executor) = self.registry.get(job_type) else {
            let msg = format!("no executor registered for job type {}", job_type.as_str());
            error!(job_id, job_type = job_type.as_str(), "{}", msg);
            if let Err(e) = self.store.fail(job_id, &msg).await {
                error!(job_id, error = %e, "failed to mark job as failed");
            }
            return;
        };

        let job_cancel = shutdown.child_token();
        self.running.register(job_id, job_cancel.clone());

        tokio::select! {
            _ = job_cancel.cancelled() => {
                // The row was already cancelled by the manager (or we are
                // shutting down); the guarded terminal writes make any late
                // executor result a no-op, so just stop driving the job.
                warn!(job_id, job_type = job_type.as_str(), "job execution interrupted");
            }
            result = executor.execute(job_id) => {
                match result {
                    Ok(summary) => {
                        debug!(job_id, job_type = job_type.as_str(), summary = %summary, "job succeeded");
                    }
                    Err(e) => {
                        warn!(job_id, job_type = job_type.as_str(), error = %e, "job failed");
                    }
                }
            }
        }

        self.running.remove(job_id);
        self.progress.clear(job_id);
    }
}

#[async_trait]
impl Service for JobWorker {
    fn name(&self) -> &'static str {
        "job-worker"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            batch_size = self.config.batch_size,
            "job worker starting"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let jobs = match self
                .store
                .claim_ready(&self.config.worker_id, self.config.batch_size)
                .await
            {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!(error = %e, "failed to claim jobs");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            if jobs.is_empty() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.max_poll_interval) => {}
                }
                continue;
            }

            debug!(count = jobs.len(), "claimed jobs");

            let mut handles = Vec::with_capacity(jobs.len());
            for job in jobs {
                let worker = &self;
                let shutdown_ref = &shutdown;

                handles.push(async move {
                    worker.process_job(job, shutdown_ref).await;
                });
            }

            futures::future::join_all(handles).await;

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.min_poll_interval) => {}
            }
        }

        // Give in-flight jobs a bounded window to wind down.
        if !self.running.is_empty() {
            info!(count = self.running.len(), "waiting for running jobs to complete");

            let timeout = Duration::from_secs(30);
            let start = std::time::Instant::now();
            while !self.running.is_empty() && start.elapsed() < timeout {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }

        info!(worker_id = %self.config.worker_id, "job worker stopped");
        Ok(())
    }
}
