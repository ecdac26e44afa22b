//! Pure Apify REST API client.
//!
//! A minimal client for the Apify platform API. Supports starting actor runs,
//! polling for completion, and paging through dataset results.
//!
//! # Example
//!
//! ```rust,ignore
//! use apify_client::ApifyClient;
//! use serde_json::json;
//!
//! let client = ApifyClient::new("your-api-token".into());
//!
//! let run = client.run_actor("vendor~lead-scraper", json!({"fileName": "q3.csv"})).await?;
//! let completed = client.wait_for_run(&run.id).await?;
//! let page = client
//!     .dataset_items_page(completed.dataset_id().unwrap(), 0, 100)
//!     .await?;
//! ```

pub mod error;
pub mod types;

pub use error::{ApifyError, Result};
pub use types::{ApiResponse, RunData};

use serde_json::Value as JsonValue;

const BASE_URL: &str = "https://api.apify.com/v2";

pub struct ApifyClient {
    client: reqwest::Client,
    token: String,
}

impl ApifyClient {
    pub fn new(token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
        }
    }

    /// Start an actor run. Returns immediately with run metadata.
    pub async fn run_actor(&self, actor_id: &str, input: JsonValue) -> Result<RunData> {
        let url = format!("{}/acts/{}/runs", BASE_URL, actor_id);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&input)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApifyError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let api_resp: ApiResponse<RunData> = resp.json().await?;
        Ok(api_resp.data)
    }

    /// Poll until a run completes. Uses `waitForFinish=60` for efficient long-polling.
    pub async fn wait_for_run(&self, run_id: &str) -> Result<RunData> {
        loop {
            let url = format!("{}/actor-runs/{}?waitForFinish=60", BASE_URL, run_id);
            let resp = self
                .client
                .get(&url)
                .bearer_auth(&self.token)
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(ApifyError::Api {
                    status: status.as_u16(),
                    message: body,
                });
            }

            let api_resp: ApiResponse<RunData> = resp.json().await?;
            match api_resp.data.status.as_str() {
                "SUCCEEDED" => return Ok(api_resp.data),
                "FAILED" | "ABORTED" | "TIMED-OUT" => {
                    return Err(ApifyError::RunFailed(api_resp.data.status));
                }
                _ => {
                    tracing::debug!(run_id, status = %api_resp.data.status, "Run still in progress");
                    continue;
                }
            }
        }
    }

    /// Fetch one page of dataset items from a completed run.
    ///
    /// Items are returned as raw JSON objects; callers page with
    /// `offset`/`limit` until a short (or empty) page comes back.
    pub async fn dataset_items_page(
        &self,
        dataset_id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<JsonValue>> {
        let url = format!(
            "{}/datasets/{}/items?format=json&offset={}&limit={}",
            BASE_URL, dataset_id, offset, limit
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApifyError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let items: Vec<JsonValue> = resp.json().await?;
        Ok(items)
    }

    /// Start a run, wait for it, and return the completed run metadata.
    pub async fn run_actor_to_completion(
        &self,
        actor_id: &str,
        input: JsonValue,
    ) -> Result<RunData> {
        tracing::info!(actor_id, "Starting actor run");

        let run = self.run_actor(actor_id, input).await?;
        tracing::info!(run_id = %run.id, "Apify run started, polling for completion");

        let completed = self.wait_for_run(&run.id).await?;
        tracing::info!(
            run_id = %completed.id,
            dataset_id = completed.dataset_id().unwrap_or("-"),
            "Run completed"
        );

        Ok(completed)
    }
}
