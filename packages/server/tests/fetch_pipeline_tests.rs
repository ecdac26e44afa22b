//! End-to-end fetch pipeline tests over the public engine API: manager,
//! worker, executor, breaker and dedup wired together with in-memory
//! backends.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use server_core::domains::ingestion::{
    FetchConfig, FetchLeadsExecutor, LeadProvider, MockLeadProvider, ProviderError, ProviderRun,
};
use server_core::domains::leads::{InMemoryLeadStore, LeadDeduper};
use server_core::kernel::jobs::{
    ExecutorRegistry, InMemoryJobStore, JobManager, JobStatus, JobStore, JobWorker,
    JobWorkerConfig, ProgressTracker, RunningJobs,
};
use server_core::kernel::{BreakerConfig, CircuitBreaker, InMemoryBreakerStore, Service};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Pipeline {
    jobs: Arc<InMemoryJobStore>,
    leads: Arc<InMemoryLeadStore>,
    breaker: CircuitBreaker,
    manager: JobManager,
    registry: Arc<ExecutorRegistry>,
    running: RunningJobs,
    progress: ProgressTracker,
}

fn pipeline(provider: Arc<dyn LeadProvider>) -> Pipeline {
    let jobs = Arc::new(InMemoryJobStore::new());
    let leads = Arc::new(InMemoryLeadStore::new());
    let breaker = CircuitBreaker::new(
        Arc::new(InMemoryBreakerStore::new()),
        BreakerConfig::default(),
    );
    let progress = ProgressTracker::new();
    let running = RunningJobs::new();

    let executor = FetchLeadsExecutor::new(
        jobs.clone(),
        breaker.clone(),
        provider,
        LeadDeduper::new(leads.clone()),
        progress.clone(),
        FetchConfig::default(),
    );
    let mut registry = ExecutorRegistry::new();
    registry.register(Arc::new(executor));

    let manager = JobManager::new(jobs.clone(), progress.clone(), running.clone());

    Pipeline {
        jobs,
        leads,
        breaker,
        manager,
        registry: Arc::new(registry),
        running,
        progress,
    }
}

fn spawn_worker(p: &Pipeline) -> (CancellationToken, tokio::task::JoinHandle<()>) {
    let worker = JobWorker::with_config(
        p.jobs.clone(),
        p.registry.clone(),
        p.running.clone(),
        p.progress.clone(),
        JobWorkerConfig {
            batch_size: 4,
            max_poll_interval: Duration::from_millis(20),
            min_poll_interval: Duration::from_millis(5),
            worker_id: "test-worker".to_string(),
        },
    );

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let handle = tokio::spawn(async move {
        let _ = Box::new(worker).run(token).await;
    });
    (shutdown, handle)
}

async fn wait_for_terminal(jobs: &InMemoryJobStore, job_id: i64) -> server_core::kernel::jobs::Job {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let job = jobs.get(job_id).await.unwrap();
            if job.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job did not reach a terminal state")
}

#[tokio::test]
async fn fetch_job_runs_to_completion_through_the_worker() {
    let provider = Arc::new(MockLeadProvider::with_records(vec![
        json!({"email": "a@x.com", "first_name": "Ada"}),
        json!({"email": "A@X.COM ", "first_name": "Ada again"}),
        json!({"email": ""}),
        json!({"email": "b@x.com", "organization": {"name": "Nested Inc"}}),
    ]));
    let p = pipeline(provider);

    let job = p
        .manager
        .enqueue_fetch("q3 import", Uuid::new_v4(), json!({"fileName": "q3.csv"}))
        .await
        .unwrap();

    let (shutdown, handle) = spawn_worker(&p);
    let finished = wait_for_terminal(&p.jobs, job.id).await;
    shutdown.cancel();
    let _ = handle.await;

    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(
        finished.result.as_deref(),
        Some("Created 2 leads (2 skipped, 0 errors) from 4 records")
    );
    assert!(finished.task_handle.as_deref().unwrap().starts_with("test-worker:"));

    let mut emails: Vec<String> = p.leads.emails();
    emails.sort();
    assert_eq!(emails, vec!["a@x.com", "b@x.com"]);

    let company = p
        .leads
        .leads()
        .into_iter()
        .find(|l| l.email.as_deref() == Some("b@x.com"))
        .unwrap()
        .company;
    assert_eq!(company.as_deref(), Some("Nested Inc"));

    // Progress is cleared once the job is done.
    assert!(p.progress.get(job.id).is_none());
}

#[tokio::test]
async fn open_breaker_fails_jobs_without_touching_the_provider() {
    let provider = Arc::new(MockLeadProvider::with_records(vec![
        json!({"email": "a@x.com"}),
    ]));
    let p = pipeline(provider.clone());

    p.breaker.manually_open("upstream incident").await.unwrap();

    let job = p
        .manager
        .enqueue_fetch("blocked", Uuid::new_v4(), json!({"fileName": "x.csv"}))
        .await
        .unwrap();

    let (shutdown, handle) = spawn_worker(&p);
    let finished = wait_for_terminal(&p.jobs, job.id).await;
    shutdown.cancel();
    let _ = handle.await;

    assert_eq!(finished.status, JobStatus::Failed);
    assert!(finished.error.unwrap().contains("circuit breaker"));
    assert_eq!(provider.run_count(), 0);
    assert!(p.leads.leads().is_empty());
}

#[tokio::test]
async fn provider_failure_opens_the_breaker_and_pauses_future_dispatch() {
    let provider = Arc::new(MockLeadProvider::with_records(vec![]));
    provider.set_fail_run("Actor run failed: upstream 502");
    let p = pipeline(provider.clone());

    let first = p
        .manager
        .enqueue_fetch("first", Uuid::new_v4(), json!({"fileName": "a.csv"}))
        .await
        .unwrap();

    let (shutdown, handle) = spawn_worker(&p);
    let first_done = wait_for_terminal(&p.jobs, first.id).await;

    assert_eq!(first_done.status, JobStatus::Failed);
    assert_eq!(
        first_done.error.as_deref(),
        Some("Actor run failed: upstream 502")
    );
    assert_eq!(provider.run_count(), 1);

    // The breaker tripped on the first failure; the next job is rejected
    // before the provider is consulted again.
    let second = p
        .manager
        .enqueue_fetch("second", Uuid::new_v4(), json!({"fileName": "b.csv"}))
        .await
        .unwrap();
    let second_done = wait_for_terminal(&p.jobs, second.id).await;
    shutdown.cancel();
    let _ = handle.await;

    assert_eq!(second_done.status, JobStatus::Failed);
    assert!(second_done.error.unwrap().contains("circuit breaker"));
    assert_eq!(provider.run_count(), 1);
}

#[tokio::test]
async fn operator_close_resumes_dispatch() {
    let provider = Arc::new(MockLeadProvider::with_records(vec![
        json!({"email": "a@x.com"}),
    ]));
    provider.set_fail_run("Actor run failed: flapping");
    let p = pipeline(provider.clone());

    let first = p
        .manager
        .enqueue_fetch("first", Uuid::new_v4(), json!({"fileName": "a.csv"}))
        .await
        .unwrap();
    let (shutdown, handle) = spawn_worker(&p);
    wait_for_terminal(&p.jobs, first.id).await;

    assert!(!p.breaker.should_allow_dispatch().await.unwrap());
    assert!(p.breaker.manually_close(Some("resolved")).await.unwrap());

    // Second call is scripted to succeed.
    provider.clear_fail_run();

    let second = p
        .manager
        .enqueue_fetch("second", Uuid::new_v4(), json!({"fileName": "b.csv"}))
        .await
        .unwrap();
    let second_done = wait_for_terminal(&p.jobs, second.id).await;
    shutdown.cancel();
    let _ = handle.await;

    assert_eq!(second_done.status, JobStatus::Completed);
    assert_eq!(p.leads.leads().len(), 1);
}

/// Provider that blocks until told to continue, for cancellation tests.
struct StallingProvider {
    entered: tokio::sync::Notify,
}

#[async_trait]
impl LeadProvider for StallingProvider {
    async fn run_actor(
        &self,
        _actor_id: &str,
        _input: JsonValue,
    ) -> Result<ProviderRun, ProviderError> {
        self.entered.notify_one();
        // Block until the future is dropped by cancellation.
        std::future::pending().await
    }

    async fn fetch_page(
        &self,
        _dataset_id: &str,
        _offset: u32,
        _limit: u32,
    ) -> Result<Vec<JsonValue>, ProviderError> {
        Ok(vec![])
    }
}

#[tokio::test]
async fn cancel_interrupts_an_in_flight_job_and_stays_authoritative() {
    let provider = Arc::new(StallingProvider {
        entered: tokio::sync::Notify::new(),
    });
    let p = pipeline(provider.clone());

    let job = p
        .manager
        .enqueue_fetch("slow", Uuid::new_v4(), json!({"fileName": "x.csv"}))
        .await
        .unwrap();

    let (shutdown, handle) = spawn_worker(&p);

    // Wait until the provider call is actually in flight.
    tokio::time::timeout(Duration::from_secs(5), provider.entered.notified())
        .await
        .expect("provider was never invoked");

    let cancelled = p.manager.cancel(job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    let finished = wait_for_terminal(&p.jobs, job.id).await;
    shutdown.cancel();
    let _ = handle.await;

    // The cancelled row is authoritative; nothing overwrote it.
    assert_eq!(finished.status, JobStatus::Cancelled);
    assert!(finished.result.is_none());
    assert!(p.leads.leads().is_empty());

    // Cancelling again is an invalid transition, and the row is unchanged.
    let err = p.manager.cancel(job.id).await.unwrap_err();
    assert_eq!(err.to_string(), "cannot cancel job in cancelled state");
}
