// Leadflow - Campaign Engine Core
//
// This crate provides the background engine for lead-generation campaigns:
// fetch jobs delegated to a worker fleet, a circuit-breaker-guarded provider
// dispatch path, and duplicate-safe lead ingestion.
//
// The HTTP API surface consumes `kernel::jobs::JobManager` and
// `kernel::CircuitBreaker`; it lives outside this crate.

pub mod config;
pub mod domains;
pub mod kernel;

pub use config::*;
