//! Job model for background work execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

/// Job state machine: pending -> processing -> {completed, failed, cancelled}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    FetchLeads,
    EnrichLeads,
    VerifyEmails,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchLeads => "fetch_leads",
            Self::EnrichLeads => "enrich_leads",
            Self::VerifyEmails => "verify_emails",
        }
    }
}

// ============================================================================
// Job Model
// ============================================================================

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub name: String,
    pub job_type: JobType,
    pub campaign_id: Option<Uuid>,
    pub status: JobStatus,
    /// Opaque correlation handle stamped when a worker picks the job up.
    pub task_handle: Option<String>,
    /// Actor input. Fetch jobs require a "fileName" key.
    pub params: Option<JsonValue>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Fields supplied when enqueueing a job.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewJob {
    pub name: String,
    pub job_type: JobType,
    #[builder(default, setter(strip_option))]
    pub campaign_id: Option<Uuid>,
    #[builder(default, setter(strip_option))]
    pub params: Option<JsonValue>,
}

impl NewJob {
    /// Convenience constructor for a lead-fetch job.
    pub fn fetch_leads(name: impl Into<String>, campaign_id: Uuid, params: JsonValue) -> Self {
        Self::builder()
            .name(name.into())
            .job_type(JobType::FetchLeads)
            .campaign_id(campaign_id)
            .params(params)
            .build()
    }
}
