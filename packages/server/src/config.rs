use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub apify_api_token: String,
    /// Actor invoked by fetch jobs, e.g. "vendor~lead-scraper".
    pub apify_actor_id: String,
    /// Dataset page size used when streaming actor results.
    pub apify_page_size: u32,
    /// Consecutive provider failures before the circuit opens.
    pub circuit_breaker_failure_threshold: u32,
    /// Provider calls allowed per rate-limit window. None disables limiting.
    pub rate_limit_max_requests: Option<i64>,
    pub rate_limit_window_secs: i64,
    pub worker_batch_size: i64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            apify_api_token: env::var("APIFY_API_TOKEN")
                .context("APIFY_API_TOKEN must be set")?,
            apify_actor_id: env::var("APIFY_ACTOR_ID").context("APIFY_ACTOR_ID must be set")?,
            apify_page_size: env::var("APIFY_PAGE_SIZE")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .context("APIFY_PAGE_SIZE must be a valid number")?,
            circuit_breaker_failure_threshold: env::var("CIRCUIT_BREAKER_FAILURE_THRESHOLD")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .context("CIRCUIT_BREAKER_FAILURE_THRESHOLD must be a valid number")?,
            rate_limit_max_requests: match env::var("RATE_LIMIT_MAX_REQUESTS") {
                Ok(raw) => Some(
                    raw.parse()
                        .context("RATE_LIMIT_MAX_REQUESTS must be a valid number")?,
                ),
                Err(_) => None,
            },
            rate_limit_window_secs: env::var("RATE_LIMIT_WINDOW_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .context("RATE_LIMIT_WINDOW_SECS must be a valid number")?,
            worker_batch_size: env::var("WORKER_BATCH_SIZE")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .context("WORKER_BATCH_SIZE must be a valid number")?,
        })
    }
}
