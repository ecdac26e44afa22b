//! Kernel module - engine infrastructure and dependencies.

pub mod circuit_breaker;
pub mod jobs;
pub mod rate_limiter;
pub mod service_host;

pub use circuit_breaker::{
    BreakerConfig, BreakerError, BreakerState, BreakerStatus, BreakerStore, CircuitBreaker,
    InMemoryBreakerStore, PostgresBreakerStore,
};
pub use rate_limiter::{InMemoryRateLimiter, PostgresRateLimiter, RateDecision, RateLimiter};
pub use service_host::{Service, ServiceHost};
