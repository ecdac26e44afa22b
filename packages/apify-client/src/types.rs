use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Wrapper for Apify API responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

/// Apify actor run metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct RunData {
    pub id: String,
    pub status: String,
    /// Absent or empty when the run produced no default dataset.
    #[serde(rename = "defaultDatasetId", default)]
    pub default_dataset_id: Option<String>,
    #[serde(rename = "startedAt")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "finishedAt")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunData {
    /// Dataset handle for a completed run, if the run produced one.
    pub fn dataset_id(&self) -> Option<&str> {
        self.default_dataset_id.as_deref().filter(|id| !id.is_empty())
    }
}
