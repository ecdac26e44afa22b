//! Ingestion domain: the fetch-and-ingest workflow behind fetch jobs.

pub mod error;
pub mod executor;
pub mod provider;

pub use error::FetchError;
pub use executor::{FetchConfig, FetchLeadsExecutor, FetchOutcome};
pub use provider::{ApifyLeadProvider, LeadProvider, MockLeadProvider, ProviderError, ProviderRun};
