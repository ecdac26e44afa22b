use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

/// Lead - a prospect record owned by exactly one campaign.
///
/// `email` is globally unique when present (partial unique index on
/// `lower(email)`); the ingestion pipeline enforces the same rule ahead of
/// the constraint. `enrichment_data` and `verification_data` are payload
/// slots filled by later pipeline stages.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Lead {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub title: Option<String>,
    pub linkedin_url: Option<String>,
    pub source_url: Option<String>,
    pub raw_data: Option<JsonValue>,
    pub enrichment_data: Option<JsonValue>,
    pub verification_data: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl Lead {
    /// Find lead by ID
    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        let lead = sqlx::query_as::<_, Lead>("SELECT * FROM leads WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(lead)
    }

    /// Find leads for a campaign, newest first
    pub async fn find_by_campaign(campaign_id: Uuid, limit: i64, pool: &PgPool) -> Result<Vec<Self>> {
        let leads = sqlx::query_as::<_, Lead>(
            r#"
            SELECT * FROM leads
            WHERE campaign_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(campaign_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(leads)
    }

    /// Count leads in a campaign
    pub async fn count_by_campaign(campaign_id: Uuid, pool: &PgPool) -> Result<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM leads WHERE campaign_id = $1")
                .bind(campaign_id)
                .fetch_one(pool)
                .await?;
        Ok(count)
    }
}
