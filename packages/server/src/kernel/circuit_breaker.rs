//! Global circuit breaker gating provider dispatch.
//!
//! The breaker is a two-state gate ({closed, open}) consulted before every
//! provider call. State lives in a singleton database row so every worker
//! process observes the same answer; all writes go through an optimistic
//! compare-and-swap on a version column so concurrent opens/closes cannot
//! lose updates.
//!
//! There is no half-open probe state: reopening after an incident is an
//! operator action via [`CircuitBreaker::manually_close`].

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, warn};

/// Breaker state. Wire values are exactly "closed" and "open".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "breaker_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
}

/// The stored singleton record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BreakerRecord {
    pub state: BreakerState,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub metadata: JsonValue,
    pub version: i64,
}

impl BreakerRecord {
    fn initial() -> Self {
        Self {
            state: BreakerState::Closed,
            opened_at: None,
            closed_at: Some(Utc::now()),
            metadata: json!({}),
            version: 1,
        }
    }
}

/// Snapshot returned to status queries.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub state: BreakerState,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub metadata: JsonValue,
}

impl From<BreakerRecord> for BreakerStatus {
    fn from(record: BreakerRecord) -> Self {
        Self {
            state: record.state,
            opened_at: record.opened_at,
            closed_at: record.closed_at,
            metadata: record.metadata,
        }
    }
}

/// Breaker operations fail only when the backing store does. "Already in the
/// requested state" is a successful call that returns `false`.
#[derive(Debug, Error)]
pub enum BreakerError {
    #[error("circuit breaker backend error: {0}")]
    Backend(#[source] anyhow::Error),
}

/// Storage behind the breaker singleton.
#[async_trait]
pub trait BreakerStore: Send + Sync {
    /// Load the current record, initializing it CLOSED on first use.
    async fn load(&self) -> Result<BreakerRecord, BreakerError>;

    /// Write `next` iff the stored version still equals `expected_version`.
    /// Returns false when a concurrent writer won the race.
    async fn swap(&self, expected_version: i64, next: BreakerRecord)
        -> Result<bool, BreakerError>;
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive provider failures before the circuit auto-opens.
    pub failure_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 1,
        }
    }
}

/// The process-facing breaker API.
#[derive(Clone)]
pub struct CircuitBreaker {
    store: Arc<dyn BreakerStore>,
    config: BreakerConfig,
}

impl CircuitBreaker {
    pub fn new(store: Arc<dyn BreakerStore>, config: BreakerConfig) -> Self {
        Self { store, config }
    }

    /// Current authoritative state. Side-effect free apart from first-use
    /// initialization.
    pub async fn status(&self) -> Result<BreakerStatus, BreakerError> {
        Ok(self.store.load().await?.into())
    }

    /// True iff the circuit is closed.
    pub async fn should_allow_dispatch(&self) -> Result<bool, BreakerError> {
        Ok(self.store.load().await?.state == BreakerState::Closed)
    }

    /// CLOSED -> OPEN. Returns true iff a transition occurred; opening an
    /// already-open circuit is a no-op returning false.
    pub async fn manually_open(&self, reason: &str) -> Result<bool, BreakerError> {
        loop {
            let current = self.store.load().await?;
            if current.state == BreakerState::Open {
                return Ok(false);
            }

            let mut next = current.clone();
            next.state = BreakerState::Open;
            next.opened_at = Some(Utc::now());
            next.closed_at = None;
            next.version = current.version + 1;
            set_key(&mut next.metadata, "last_reason", json!(reason));

            if self.store.swap(current.version, next).await? {
                warn!(reason, "circuit breaker opened");
                return Ok(true);
            }
        }
    }

    /// OPEN -> CLOSED. Returns true iff a transition occurred. Resets the
    /// consecutive-failure counter.
    pub async fn manually_close(&self, reason: Option<&str>) -> Result<bool, BreakerError> {
        loop {
            let current = self.store.load().await?;
            if current.state == BreakerState::Closed {
                return Ok(false);
            }

            let mut next = current.clone();
            next.state = BreakerState::Closed;
            next.opened_at = None;
            next.closed_at = Some(Utc::now());
            next.version = current.version + 1;
            set_key(&mut next.metadata, "consecutive_failures", json!(0));
            if let Some(reason) = reason {
                set_key(&mut next.metadata, "last_reason", json!(reason));
            }

            if self.store.swap(current.version, next).await? {
                info!(reason = reason.unwrap_or("-"), "circuit breaker closed");
                return Ok(true);
            }
        }
    }

    /// Record a provider-call failure. Auto-opens the circuit once the
    /// consecutive-failure count reaches the configured threshold.
    pub async fn record_failure(&self, context: &str) -> Result<(), BreakerError> {
        loop {
            let current = self.store.load().await?;

            let consecutive = read_count(&current.metadata, "consecutive_failures") + 1;
            let total = read_count(&current.metadata, "total_failures") + 1;

            let mut next = current.clone();
            next.version = current.version + 1;
            set_key(&mut next.metadata, "consecutive_failures", json!(consecutive));
            set_key(&mut next.metadata, "total_failures", json!(total));
            set_key(&mut next.metadata, "last_failure", json!(context));
            set_key(
                &mut next.metadata,
                "last_failure_at",
                json!(Utc::now().to_rfc3339()),
            );

            let tripped = current.state == BreakerState::Closed
                && consecutive >= i64::from(self.config.failure_threshold);
            if tripped {
                next.state = BreakerState::Open;
                next.opened_at = Some(Utc::now());
                next.closed_at = None;
                set_key(
                    &mut next.metadata,
                    "last_reason",
                    json!(format!("auto-opened: {}", context)),
                );
            }

            if self.store.swap(current.version, next).await? {
                if tripped {
                    warn!(
                        context,
                        consecutive_failures = consecutive,
                        "circuit breaker auto-opened"
                    );
                }
                return Ok(());
            }
        }
    }
}

fn set_key(metadata: &mut JsonValue, key: &str, value: JsonValue) {
    if !metadata.is_object() {
        *metadata = json!({});
    }
    if let Some(map) = metadata.as_object_mut() {
        map.insert(key.to_string(), value);
    }
}

fn read_count(metadata: &JsonValue, key: &str) -> i64 {
    metadata.get(key).and_then(JsonValue::as_i64).unwrap_or(0)
}

// ============================================================================
// Postgres store
// ============================================================================

/// Singleton-row store. The table's primary key is a boolean constrained to
/// TRUE, so exactly one row can exist.
pub struct PostgresBreakerStore {
    pool: PgPool,
}

impl PostgresBreakerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BreakerStore for PostgresBreakerStore {
    async fn load(&self) -> Result<BreakerRecord, BreakerError> {
        sqlx::query(
            r#"
            INSERT INTO circuit_breaker (id, state, opened_at, closed_at, metadata, version)
            VALUES (TRUE, 'closed', NULL, NOW(), '{}'::jsonb, 1)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| BreakerError::Backend(e.into()))?;

        let record = sqlx::query_as::<_, BreakerRecord>(
            "SELECT state, opened_at, closed_at, metadata, version FROM circuit_breaker WHERE id = TRUE",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BreakerError::Backend(e.into()))?;

        Ok(record)
    }

    async fn swap(
        &self,
        expected_version: i64,
        next: BreakerRecord,
    ) -> Result<bool, BreakerError> {
        let result = sqlx::query(
            r#"
            UPDATE circuit_breaker
            SET state = $1, opened_at = $2, closed_at = $3, metadata = $4, version = $5
            WHERE id = TRUE AND version = $6
            "#,
        )
        .bind(next.state)
        .bind(next.opened_at)
        .bind(next.closed_at)
        .bind(&next.metadata)
        .bind(next.version)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(|e| BreakerError::Backend(e.into()))?;

        Ok(result.rows_affected() == 1)
    }
}

// ============================================================================
// In-memory store (tests)
// ============================================================================

/// In-memory breaker store with failure injection.
#[derive(Default)]
pub struct InMemoryBreakerStore {
    record: Mutex<Option<BreakerRecord>>,
    should_fail: Mutex<bool>,
}

impl InMemoryBreakerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every store call fail with a backend error.
    pub fn set_should_fail(&self, should_fail: bool) {
        *self
            .should_fail
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = should_fail;
    }

    fn check_failure(&self) -> Result<(), BreakerError> {
        let failing = *self
            .should_fail
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if failing {
            return Err(BreakerError::Backend(anyhow::anyhow!(
                "breaker store unreachable"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl BreakerStore for InMemoryBreakerStore {
    async fn load(&self) -> Result<BreakerRecord, BreakerError> {
        self.check_failure()?;
        let mut guard = self.record.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard.get_or_insert_with(BreakerRecord::initial).clone())
    }

    async fn swap(
        &self,
        expected_version: i64,
        next: BreakerRecord,
    ) -> Result<bool, BreakerError> {
        self.check_failure()?;
        let mut guard = self.record.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(current) if current.version == expected_version => {
                *guard = Some(next);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            Arc::new(InMemoryBreakerStore::new()),
            BreakerConfig::default(),
        )
    }

    fn breaker_with_threshold(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            Arc::new(InMemoryBreakerStore::new()),
            BreakerConfig {
                failure_threshold: threshold,
            },
        )
    }

    #[tokio::test]
    async fn initializes_closed() {
        let breaker = breaker();
        let status = breaker.status().await.unwrap();

        assert_eq!(status.state, BreakerState::Closed);
        assert!(status.opened_at.is_none());
        assert!(status.closed_at.is_some());
        assert!(breaker.should_allow_dispatch().await.unwrap());
    }

    #[tokio::test]
    async fn manual_open_transitions_once() {
        let breaker = breaker();

        assert!(breaker.manually_open("maintenance").await.unwrap());
        assert!(!breaker.manually_open("again").await.unwrap());

        let status = breaker.status().await.unwrap();
        assert_eq!(status.state, BreakerState::Open);
        assert!(status.opened_at.is_some());
        assert!(status.closed_at.is_none());
        assert_eq!(status.metadata["last_reason"], "maintenance");
        assert!(!breaker.should_allow_dispatch().await.unwrap());
    }

    #[tokio::test]
    async fn manual_close_transitions_once() {
        let breaker = breaker();

        assert!(!breaker.manually_close(None).await.unwrap());

        breaker.manually_open("incident").await.unwrap();
        assert!(breaker.manually_close(Some("resolved")).await.unwrap());
        assert!(!breaker.manually_close(Some("resolved")).await.unwrap());

        let status = breaker.status().await.unwrap();
        assert_eq!(status.state, BreakerState::Closed);
        assert!(status.opened_at.is_none());
        assert!(status.closed_at.is_some());
        assert_eq!(status.metadata["last_reason"], "resolved");
    }

    #[tokio::test]
    async fn first_failure_opens_with_default_threshold() {
        let breaker = breaker();

        breaker.record_failure("provider timeout").await.unwrap();

        let status = breaker.status().await.unwrap();
        assert_eq!(status.state, BreakerState::Open);
        assert_eq!(status.metadata["consecutive_failures"], 1);
        assert_eq!(status.metadata["last_failure"], "provider timeout");
    }

    #[tokio::test]
    async fn threshold_of_three_needs_three_consecutive_failures() {
        let breaker = breaker_with_threshold(3);

        breaker.record_failure("one").await.unwrap();
        breaker.record_failure("two").await.unwrap();
        assert!(breaker.should_allow_dispatch().await.unwrap());

        breaker.record_failure("three").await.unwrap();
        assert!(!breaker.should_allow_dispatch().await.unwrap());

        let status = breaker.status().await.unwrap();
        assert_eq!(status.metadata["total_failures"], 3);
    }

    #[tokio::test]
    async fn manual_close_resets_consecutive_failures() {
        let breaker = breaker_with_threshold(2);

        breaker.record_failure("one").await.unwrap();
        breaker.manually_open("operator").await.unwrap();
        breaker.manually_close(Some("operator")).await.unwrap();

        // Counter was reset, so one more failure must not trip the breaker.
        breaker.record_failure("two").await.unwrap();
        assert!(breaker.should_allow_dispatch().await.unwrap());
    }

    #[tokio::test]
    async fn failures_while_open_keep_counting_without_reopening() {
        let breaker = breaker();

        breaker.record_failure("first").await.unwrap();
        let opened_at = breaker.status().await.unwrap().opened_at;

        breaker.record_failure("second").await.unwrap();
        let status = breaker.status().await.unwrap();
        assert_eq!(status.state, BreakerState::Open);
        assert_eq!(status.opened_at, opened_at);
        assert_eq!(status.metadata["total_failures"], 2);
    }

    #[tokio::test]
    async fn backend_errors_propagate() {
        let store = Arc::new(InMemoryBreakerStore::new());
        let breaker = CircuitBreaker::new(store.clone(), BreakerConfig::default());

        store.set_should_fail(true);
        assert!(matches!(
            breaker.status().await,
            Err(BreakerError::Backend(_))
        ));
        assert!(matches!(
            breaker.manually_open("x").await,
            Err(BreakerError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn state_serializes_to_wire_values() {
        assert_eq!(
            serde_json::to_string(&BreakerState::Closed).unwrap(),
            "\"closed\""
        );
        assert_eq!(
            serde_json::to_string(&BreakerState::Open).unwrap(),
            "\"open\""
        );
    }
}
