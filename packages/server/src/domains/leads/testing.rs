//! In-memory lead store for tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use super::models::Lead;
use super::store::{LeadStore, NewLead};

/// In-memory [`LeadStore`] with failure injection for the two storage
/// operations the dedup engine performs.
#[derive(Default)]
pub struct InMemoryLeadStore {
    leads: RwLock<Vec<Lead>>,
    fail_email_lookup: AtomicBool,
    fail_commit: AtomicBool,
}

impl InMemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with leads holding the given emails (stored as-is,
    /// the way an API-created lead would be).
    pub fn with_existing_emails(emails: &[&str]) -> Self {
        let store = Self::new();
        {
            let mut leads = store.leads.write().unwrap_or_else(|e| e.into_inner());
            for email in emails {
                leads.push(seeded_lead(email));
            }
        }
        store
    }

    /// Make the bulk duplicate-check lookup fail.
    pub fn set_fail_email_lookup(&self, fail: bool) {
        self.fail_email_lookup.store(fail, Ordering::SeqCst);
    }

    /// Make the batch commit fail (nothing is persisted).
    pub fn set_fail_commit(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of all stored leads.
    pub fn leads(&self) -> Vec<Lead> {
        self.leads
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Stored emails, as-is.
    pub fn emails(&self) -> Vec<String> {
        self.leads()
            .into_iter()
            .filter_map(|lead| lead.email)
            .collect()
    }
}

fn seeded_lead(email: &str) -> Lead {
    let now = Utc::now();
    Lead {
        id: Uuid::new_v4(),
        campaign_id: Uuid::new_v4(),
        first_name: None,
        last_name: None,
        email: Some(email.to_string()),
        phone: None,
        company: None,
        title: None,
        linkedin_url: None,
        source_url: None,
        raw_data: Some(json!({})),
        enrichment_data: None,
        verification_data: None,
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl LeadStore for InMemoryLeadStore {
    async fn existing_emails(&self, emails: &[String]) -> Result<HashSet<String>> {
        if self.fail_email_lookup.load(Ordering::SeqCst) {
            anyhow::bail!("lead storage unreachable");
        }

        let wanted: HashSet<&str> = emails.iter().map(String::as_str).collect();
        let found = self
            .leads
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter_map(|lead| lead.email.as_deref())
            .map(|email| email.trim().to_lowercase())
            .filter(|email| wanted.contains(email.as_str()))
            .collect();

        Ok(found)
    }

    async fn insert_batch(&self, new_leads: Vec<NewLead>) -> Result<Vec<Uuid>> {
        if self.fail_commit.load(Ordering::SeqCst) {
            anyhow::bail!("commit failed: lead storage unreachable");
        }

        let now = Utc::now();
        let mut leads = self.leads.write().unwrap_or_else(|e| e.into_inner());
        let mut ids = Vec::with_capacity(new_leads.len());

        for new_lead in new_leads {
            ids.push(new_lead.id);
            leads.push(Lead {
                id: new_lead.id,
                campaign_id: new_lead.campaign_id,
                first_name: new_lead.first_name,
                last_name: new_lead.last_name,
                email: new_lead.email,
                phone: new_lead.phone,
                company: new_lead.company,
                title: new_lead.title,
                linkedin_url: new_lead.linkedin_url,
                source_url: new_lead.source_url,
                raw_data: Some(new_lead.raw_data),
                enrichment_data: None,
                verification_data: None,
                created_at: now,
                updated_at: now,
            });
        }

        Ok(ids)
    }
}
