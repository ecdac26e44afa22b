//! Provider-call rate limiting.
//!
//! Fixed-window counters keyed by caller-chosen strings ("apify:actor_runs").
//! The executor consults the limiter before contacting the provider; limiter
//! exhaustion is a soft outcome, and limiter *errors* must never block a
//! fetch (the executor degrades to unlimited).

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests left in the current window (0 when exhausted).
    pub remaining: i64,
    /// Seconds until the window resets; 0 when allowed.
    pub retry_after_seconds: i64,
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count one request against `key` and report whether it may proceed.
    async fn check_and_increment(&self, key: &str) -> Result<RateDecision>;
}

// ============================================================================
// Postgres fixed-window limiter
// ============================================================================

pub struct PostgresRateLimiter {
    pool: PgPool,
    max_requests: i64,
    window_secs: i64,
}

impl PostgresRateLimiter {
    pub fn new(pool: PgPool, max_requests: i64, window_secs: i64) -> Self {
        Self {
            pool,
            max_requests,
            window_secs,
        }
    }
}

#[async_trait]
impl RateLimiter for PostgresRateLimiter {
    async fn check_and_increment(&self, key: &str) -> Result<RateDecision> {
        // Window start is aligned on the epoch so every worker lands on the
        // same bucket; the upsert makes increment-and-read atomic.
        let (count, retry_after): (i64, i64) = sqlx::query_as(
            r#"
            INSERT INTO rate_limits (key, window_start, count)
            VALUES ($1, to_timestamp(floor(extract(epoch FROM now()) / $2) * $2), 1)
            ON CONFLICT (key, window_start)
            DO UPDATE SET count = rate_limits.count + 1
            RETURNING count,
                      GREATEST(
                          extract(epoch FROM window_start)::bigint + $2
                              - extract(epoch FROM now())::bigint,
                          0
                      )
            "#,
        )
        .bind(key)
        .bind(self.window_secs)
        .fetch_one(&self.pool)
        .await?;

        let allowed = count <= self.max_requests;
        Ok(RateDecision {
            allowed,
            remaining: (self.max_requests - count).max(0),
            retry_after_seconds: if allowed { 0 } else { retry_after },
        })
    }
}

// ============================================================================
// In-memory limiter (tests)
// ============================================================================

/// In-memory limiter with failure injection. Windows never roll over; tests
/// exercise exhaustion by picking a small ceiling.
pub struct InMemoryRateLimiter {
    max_requests: i64,
    retry_after_seconds: i64,
    counts: Mutex<HashMap<String, i64>>,
    should_fail: Mutex<bool>,
}

impl InMemoryRateLimiter {
    pub fn new(max_requests: i64) -> Self {
        Self {
            max_requests,
            retry_after_seconds: 60,
            counts: Mutex::new(HashMap::new()),
            should_fail: Mutex::new(false),
        }
    }

    /// Make every check fail, simulating an unreachable backing store.
    pub fn set_should_fail(&self, should_fail: bool) {
        *self
            .should_fail
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = should_fail;
    }

    pub fn count(&self, key: &str) -> i64 {
        self.counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check_and_increment(&self, key: &str) -> Result<RateDecision> {
        let failing = *self
            .should_fail
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if failing {
            anyhow::bail!("rate limiter store unreachable");
        }

        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let count = counts.entry(key.to_string()).or_insert(0);
        *count += 1;

        let allowed = *count <= self.max_requests;
        Ok(RateDecision {
            allowed,
            remaining: (self.max_requests - *count).max(0),
            retry_after_seconds: if allowed { 0 } else { self.retry_after_seconds },
        })
    }
}
