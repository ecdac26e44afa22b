use thiserror::Error;

use crate::domains::leads::IngestError;
use crate::kernel::circuit_breaker::BreakerError;
use crate::kernel::jobs::JobError;

/// Fetch-workflow failures, one variant per failure kind so callers (and
/// tests) can branch on what went wrong.
///
/// Policy rejections (`CircuitOpen`) and validation failures terminate the
/// job without touching the circuit breaker; `Provider` faults are the only
/// kind that records a breaker failure.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Circuit breaker refused dispatch. A policy rejection, not a provider
    /// fault.
    #[error("circuit breaker open")]
    CircuitOpen,

    /// Required parameters missing or malformed; no external call was made.
    #[error("{0}")]
    InvalidParams(String),

    /// The provider call failed or returned no dataset. Message preserved
    /// verbatim.
    #[error("{0}")]
    Provider(String),

    /// Lead batch commit failed; the batch was rolled back.
    #[error(transparent)]
    Ingest(#[from] IngestError),

    /// Job row problems: missing job, invalid transition, storage fault.
    #[error(transparent)]
    Job(#[from] JobError),

    /// Circuit breaker backend unreachable.
    #[error(transparent)]
    Breaker(#[from] BreakerError),
}
