// Worker fleet entry point: claims fetch jobs and runs them.

use std::sync::Arc;

use anyhow::{Context, Result};
use apify_client::ApifyClient;
use server_core::domains::ingestion::{ApifyLeadProvider, FetchConfig, FetchLeadsExecutor};
use server_core::domains::leads::{LeadDeduper, PostgresLeadStore};
use server_core::kernel::jobs::{
    ExecutorRegistry, JobWorker, JobWorkerConfig, PostgresJobStore, ProgressTracker, RunningJobs,
};
use server_core::kernel::{
    BreakerConfig, CircuitBreaker, PostgresBreakerStore, PostgresRateLimiter, RateLimiter,
    ServiceHost,
};
use server_core::Config;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Leadflow worker");

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    let breaker = CircuitBreaker::new(
        Arc::new(PostgresBreakerStore::new(pool.clone())),
        BreakerConfig {
            failure_threshold: config.circuit_breaker_failure_threshold,
        },
    );
    let provider = Arc::new(ApifyLeadProvider::new(ApifyClient::new(
        config.apify_api_token.clone(),
    )));
    let deduper = LeadDeduper::new(Arc::new(PostgresLeadStore::new(pool.clone())));
    let progress = ProgressTracker::new();
    let running = RunningJobs::new();
    let job_store = Arc::new(PostgresJobStore::new(pool.clone()));

    let mut executor = FetchLeadsExecutor::new(
        job_store.clone(),
        breaker,
        provider,
        deduper,
        progress.clone(),
        FetchConfig {
            actor_id: config.apify_actor_id.clone(),
            page_size: config.apify_page_size,
            ..FetchConfig::default()
        },
    );
    if let Some(max_requests) = config.rate_limit_max_requests {
        let limiter: Arc<dyn RateLimiter> = Arc::new(PostgresRateLimiter::new(
            pool.clone(),
            max_requests,
            config.rate_limit_window_secs,
        ));
        executor = executor.with_rate_limiter(limiter);
    }

    let mut registry = ExecutorRegistry::new();
    registry.register(Arc::new(executor));

    let worker = JobWorker::with_config(
        job_store,
        Arc::new(registry),
        running,
        progress,
        JobWorkerConfig {
            batch_size: config.worker_batch_size,
            ..JobWorkerConfig::default()
        },
    );

    ServiceHost::new()
        .with_service(worker)
        .run_until_shutdown()
        .await
}
