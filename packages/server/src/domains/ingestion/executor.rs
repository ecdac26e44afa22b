//! The fetch-and-ingest workflow.
//!
//! One executor invocation takes a fetch job from claimed to terminal:
//! consult the circuit breaker, validate parameters, run the scraping actor,
//! stream its dataset page by page, hand the batch to the dedup engine, and
//! record the outcome on the job row. All job-row writes are guarded, so a
//! cancellation that lands mid-flight wins over the executor's result.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::error::FetchError;
use super::provider::LeadProvider;
use crate::domains::leads::{IngestSummary, LeadDeduper};
use crate::kernel::circuit_breaker::CircuitBreaker;
use crate::kernel::jobs::{JobError, JobExecutor, JobStatus, JobStore, JobType, ProgressTracker};
use crate::kernel::rate_limiter::RateLimiter;

/// Tuning for the fetch workflow.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Actor invoked for every fetch job.
    pub actor_id: String,
    /// Dataset page size while streaming results.
    pub page_size: u32,
    /// Rate-limit bucket counted per provider run.
    pub rate_limit_key: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            actor_id: "vendor~lead-scraper".to_string(),
            page_size: 500,
            rate_limit_key: "apify:actor_runs".to_string(),
        }
    }
}

/// How a fetch attempt ended (when it did not fail outright).
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Ingested(IngestSummary),
    /// The rate limiter refused the run. Soft result: no provider call, no
    /// breaker failure, job completes with zero leads.
    RateLimited {
        retry_after_seconds: i64,
        remaining_requests: i64,
    },
}

impl FetchOutcome {
    /// Human-readable summary stored on the job row.
    pub fn result_message(&self) -> String {
        match self {
            Self::Ingested(summary) => format!(
                "Created {} leads ({} skipped, {} errors) from {} records",
                summary.created, summary.skipped, summary.errors, summary.total_processed
            ),
            Self::RateLimited {
                retry_after_seconds,
                remaining_requests,
            } => format!(
                "Rate limited: retry after {}s ({} requests remaining)",
                retry_after_seconds, remaining_requests
            ),
        }
    }
}

pub struct FetchLeadsExecutor {
    jobs: Arc<dyn JobStore>,
    breaker: CircuitBreaker,
    provider: Arc<dyn LeadProvider>,
    deduper: LeadDeduper,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    progress: ProgressTracker,
    config: FetchConfig,
}

impl FetchLeadsExecutor {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        breaker: CircuitBreaker,
        provider: Arc<dyn LeadProvider>,
        deduper: LeadDeduper,
        progress: ProgressTracker,
        config: FetchConfig,
    ) -> Self {
        Self {
            jobs,
            breaker,
            provider,
            deduper,
            rate_limiter: None,
            progress,
            config,
        }
    }

    pub fn with_rate_limiter(mut self, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    /// Run the fetch workflow for `job_id` to a terminal job state.
    pub async fn run(&self, job_id: i64) -> Result<FetchOutcome, FetchError> {
        let job = self.jobs.get(job_id).await?;
        let job = match job.status {
            JobStatus::Pending => {
                let handle = format!("task:{}", Uuid::new_v4());
                self.jobs.start(job_id, &handle).await?
            }
            JobStatus::Processing => job,
            status => {
                return Err(JobError::InvalidTransition {
                    action: "execute",
                    status,
                }
                .into())
            }
        };

        // Breaker consult. An open circuit is a policy rejection: the job
        // fails with a descriptive error but no provider failure is recorded.
        if !self.breaker.should_allow_dispatch().await? {
            warn!(job_id, "circuit breaker open, refusing to dispatch fetch job");
            self.fail_job(job_id, "circuit breaker open").await;
            return Err(FetchError::CircuitOpen);
        }

        // Fail fast on bad input before any external call.
        let Some(campaign_id) = job.campaign_id else {
            let message = "fetch job has no campaign scope".to_string();
            self.fail_job(job_id, &message).await;
            return Err(FetchError::InvalidParams(message));
        };
        let params = match validate_params(&job.params) {
            Ok(params) => params,
            Err(message) => {
                self.fail_job(job_id, &message).await;
                return Err(FetchError::InvalidParams(message));
            }
        };

        if let Some(outcome) = self.check_rate_limit(job_id).await {
            self.complete_job(job_id, &outcome.result_message()).await;
            return Ok(outcome);
        }

        self.progress
            .publish(job_id, 1, Some(3), "starting provider run");

        let run = match self
            .provider
            .run_actor(&self.config.actor_id, params)
            .await
        {
            Ok(run) => run,
            Err(e) => return self.provider_failure(job_id, e.to_string()).await,
        };

        let Some(dataset_id) = run.dataset_id else {
            let message = format!("actor run {} returned no dataset", run.run_id);
            return self.provider_failure(job_id, message).await;
        };

        self.progress
            .publish(job_id, 2, Some(3), "fetching dataset items");

        let mut records: Vec<JsonValue> = Vec::new();
        let mut offset: u32 = 0;
        loop {
            let page = match self
                .provider
                .fetch_page(&dataset_id, offset, self.config.page_size)
                .await
            {
                Ok(page) => page,
                Err(e) => return self.provider_failure(job_id, e.to_string()).await,
            };

            let page_len = page.len() as u32;
            records.extend(page);
            self.progress.publish(
                job_id,
                2,
                Some(3),
                &format!("fetched {} records", records.len()),
            );

            if page_len < self.config.page_size {
                break;
            }
            offset += page_len;
        }

        self.progress.publish(job_id, 3, Some(3), "ingesting leads");

        let summary = match self.deduper.ingest(campaign_id, &records).await {
            Ok(summary) => summary,
            Err(e) => {
                self.fail_job(job_id, &e.to_string()).await;
                return Err(e.into());
            }
        };

        info!(
            job_id,
            campaign_id = %campaign_id,
            created = summary.created,
            skipped = summary.skipped,
            errors = summary.errors,
            "fetch job ingested leads"
        );

        let outcome = FetchOutcome::Ingested(summary);
        self.complete_job(job_id, &outcome.result_message()).await;
        Ok(outcome)
    }

    /// Returns the rate-limited outcome when the limiter refuses the run.
    /// A limiter error degrades to "no limiter configured".
    async fn check_rate_limit(&self, job_id: i64) -> Option<FetchOutcome> {
        let limiter = self.rate_limiter.as_ref()?;

        match limiter.check_and_increment(&self.config.rate_limit_key).await {
            Ok(decision) if !decision.allowed => {
                info!(
                    job_id,
                    retry_after_seconds = decision.retry_after_seconds,
                    "fetch job rate limited"
                );
                Some(FetchOutcome::RateLimited {
                    retry_after_seconds: decision.retry_after_seconds,
                    remaining_requests: decision.remaining,
                })
            }
            Ok(_) => None,
            Err(e) => {
                warn!(job_id, error = %e, "rate limiter unavailable, proceeding without limit");
                None
            }
        }
    }

    /// Provider faults: record on the breaker exactly once, fail the job
    /// with the provider's message verbatim.
    async fn provider_failure(
        &self,
        job_id: i64,
        message: String,
    ) -> Result<FetchOutcome, FetchError> {
        if let Err(e) = self.breaker.record_failure(&message).await {
            // Breaker backend trouble must not mask the provider fault.
            error!(job_id, error = %e, "failed to record provider failure on circuit breaker");
        }
        self.fail_job(job_id, &message).await;
        Err(FetchError::Provider(message))
    }

    async fn fail_job(&self, job_id: i64, message: &str) {
        match self.jobs.fail(job_id, message).await {
            Ok(true) => {}
            Ok(false) => info!(job_id, "job already terminal, failure result discarded"),
            Err(e) => error!(job_id, error = %e, "failed to mark job as failed"),
        }
    }

    async fn complete_job(&self, job_id: i64, result: &str) {
        match self.jobs.complete(job_id, result).await {
            Ok(true) => {}
            Ok(false) => info!(job_id, "job already terminal, completion discarded"),
            Err(e) => error!(job_id, error = %e, "failed to mark job as completed"),
        }
    }
}

/// Fetch jobs require a non-empty "fileName" parameter. Returns the actor
/// input on success, the failure message otherwise.
fn validate_params(params: &Option<JsonValue>) -> Result<JsonValue, String> {
    let params = params.clone().unwrap_or(JsonValue::Null);
    let file_name = params
        .get("fileName")
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .unwrap_or("");
    if file_name.is_empty() {
        return Err("missing required parameter: fileName".to_string());
    }

    Ok(params)
}

#[async_trait]
impl JobExecutor for FetchLeadsExecutor {
    fn job_type(&self) -> JobType {
        JobType::FetchLeads
    }

    async fn execute(&self, job_id: i64) -> Result<String> {
        let outcome = self.run(job_id).await?;
        Ok(outcome.result_message())
    }
}
