//! Scraping provider seam.
//!
//! The executor talks to the provider through [`LeadProvider`]:
//! start an actor run (blocking until the run reaches a terminal state) and
//! page through the resulting dataset. Production uses the Apify client;
//! tests use [`MockLeadProvider`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use apify_client::ApifyClient;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;

/// A completed provider run.
#[derive(Debug, Clone)]
pub struct ProviderRun {
    pub run_id: String,
    /// Dataset handle; `None` when the run produced no usable dataset.
    pub dataset_id: Option<String>,
}

/// Provider failures carry the provider's own message verbatim so operators
/// can diagnose the root cause from the job row.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0}")]
    Call(String),
}

#[async_trait]
pub trait LeadProvider: Send + Sync {
    /// Start an actor run and wait for it to reach a terminal state.
    async fn run_actor(
        &self,
        actor_id: &str,
        input: JsonValue,
    ) -> Result<ProviderRun, ProviderError>;

    /// Fetch one page of dataset items.
    async fn fetch_page(
        &self,
        dataset_id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<JsonValue>, ProviderError>;
}

// =============================================================================
// Apify implementation
// =============================================================================

pub struct ApifyLeadProvider {
    client: ApifyClient,
}

impl ApifyLeadProvider {
    pub fn new(client: ApifyClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LeadProvider for ApifyLeadProvider {
    async fn run_actor(
        &self,
        actor_id: &str,
        input: JsonValue,
    ) -> Result<ProviderRun, ProviderError> {
        let run = self
            .client
            .run_actor_to_completion(actor_id, input)
            .await
            .map_err(|e| ProviderError::Call(e.to_string()))?;

        Ok(ProviderRun {
            dataset_id: run.dataset_id().map(str::to_string),
            run_id: run.id,
        })
    }

    async fn fetch_page(
        &self,
        dataset_id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<JsonValue>, ProviderError> {
        self.client
            .dataset_items_page(dataset_id, offset, limit)
            .await
            .map_err(|e| ProviderError::Call(e.to_string()))
    }
}

// =============================================================================
// Mock implementation (tests)
// =============================================================================

/// Scriptable provider that records invocations.
#[derive(Default)]
pub struct MockLeadProvider {
    records: Vec<JsonValue>,
    no_dataset: bool,
    fail_run: Mutex<Option<String>>,
    run_calls: AtomicUsize,
    page_calls: AtomicUsize,
    last_input: Mutex<Option<JsonValue>>,
}

impl MockLeadProvider {
    /// Provider whose dataset yields `records`.
    pub fn with_records(records: Vec<JsonValue>) -> Self {
        Self {
            records,
            ..Default::default()
        }
    }

    /// Provider whose runs complete without producing a dataset.
    pub fn with_no_dataset() -> Self {
        Self {
            no_dataset: true,
            ..Default::default()
        }
    }

    /// Make `run_actor` fail with exactly `message`.
    pub fn set_fail_run(&self, message: &str) {
        *self.fail_run.lock().unwrap_or_else(|e| e.into_inner()) = Some(message.to_string());
    }

    /// Let subsequent runs succeed again.
    pub fn clear_fail_run(&self) {
        *self.fail_run.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn run_count(&self) -> usize {
        self.run_calls.load(Ordering::SeqCst)
    }

    pub fn page_count(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    /// Input passed to the most recent run.
    pub fn last_input(&self) -> Option<JsonValue> {
        self.last_input
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl LeadProvider for MockLeadProvider {
    async fn run_actor(
        &self,
        _actor_id: &str,
        input: JsonValue,
    ) -> Result<ProviderRun, ProviderError> {
        self.run_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_input.lock().unwrap_or_else(|e| e.into_inner()) = Some(input);

        let failure = self
            .fail_run
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(message) = failure {
            return Err(ProviderError::Call(message));
        }

        Ok(ProviderRun {
            run_id: "run-1".to_string(),
            dataset_id: if self.no_dataset {
                None
            } else {
                Some("dataset-1".to_string())
            },
        })
    }

    async fn fetch_page(
        &self,
        _dataset_id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<JsonValue>, ProviderError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);

        let start = (offset as usize).min(self.records.len());
        let end = (start + limit as usize).min(self.records.len());
        Ok(self.records[start..end].to_vec())
    }
}
