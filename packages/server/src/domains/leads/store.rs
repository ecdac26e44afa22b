//! Lead storage trait for the ingestion pipeline.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

/// A staged lead row, ready for batch insertion. `email` holds the
/// normalized (trimmed, lowercased) address.
#[derive(Debug, Clone)]
pub struct NewLead {
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
    pub raw_data: JsonValue,
}

/// Storage seam for the dedup engine.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Which of `emails` (normalized) already exist anywhere in the lead
    /// table. One bulk lookup per batch, never per record.
    async fn existing_emails(&self, emails: &[String]) -> Result<HashSet<String>>;

    /// Persist all rows in a single transaction: either every row commits or
    /// none do. Returns the created lead ids in input order.
    async fn insert_batch(&self, leads: Vec<NewLead>) -> Result<Vec<Uuid>>;
}

// =============================================================================
// Postgres implementation
// =============================================================================

pub struct PostgresLeadStore {
    pool: PgPool,
}

impl PostgresLeadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeadStore for PostgresLeadStore {
    async fn existing_emails(&self, emails: &[String]) -> Result<HashSet<String>> {
        if emails.is_empty() {
            return Ok(HashSet::new());
        }

        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT lower(email) FROM leads WHERE email IS NOT NULL AND lower(email) = ANY($1)",
        )
        .bind(emails)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn insert_batch(&self, leads: Vec<NewLead>) -> Result<Vec<Uuid>> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(leads.len());
        let now = Utc::now();

        for lead in &leads {
            sqlx::query(
                r#"
                INSERT INTO leads (
                    id, campaign_id, first_name, last_name, email, phone,
                    company, title, linkedin_url, source_url, raw_data,
                    created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12)
                "#,
            )
            .bind(lead.id)
            .bind(lead.campaign_id)
            .bind(&lead.first_name)
            .bind(&lead.last_name)
            .bind(&lead.email)
            .bind(&lead.phone)
            .bind(&lead.company)
            .bind(&lead.title)
            .bind(&lead.linkedin_url)
            .bind(&lead.source_url)
            .bind(&lead.raw_data)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            ids.push(lead.id);
        }

        tx.commit().await?;
        Ok(ids)
    }
}
