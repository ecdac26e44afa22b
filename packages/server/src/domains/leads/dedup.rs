//! Duplicate-safe lead ingestion.
//!
//! Takes a batch of raw provider records for one campaign and decides which
//! become new lead rows. Emails are the natural key: normalized
//! (trimmed, lowercased) and enforced unique across the whole lead table,
//! with first-occurrence-wins semantics inside a batch.
//!
//! Failure policy: the stored-email lookup degrades gracefully (a storage
//! error means "assume nothing exists" rather than blocking ingestion), a
//! single malformed record is counted and skipped over, and only the final
//! batch commit is a hard error.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::store::{LeadStore, NewLead};

/// Counts returned to the caller after a batch.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IngestSummary {
    pub created: usize,
    pub skipped: usize,
    pub errors: usize,
    pub total_processed: usize,
    pub created_ids: Vec<Uuid>,
    /// Informational notes ("Skipped N duplicate/invalid emails"), not
    /// failure indicators.
    pub messages: Vec<String>,
}

/// Only the batch commit propagates; everything else is absorbed into the
/// summary counters.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("lead batch commit failed: {0}")]
    Commit(#[source] anyhow::Error),
}

/// Trim surrounding whitespace and lowercase. Missing or empty-after-trim
/// emails normalize to `None`.
pub fn normalize_email(raw: Option<&str>) -> Option<String> {
    let email = raw?.trim().to_lowercase();
    if email.is_empty() {
        None
    } else {
        Some(email)
    }
}

/// The dedup engine. Built over a [`LeadStore`]; a detached engine (no
/// store) treats every batch as a no-op and returns a zeroed summary.
#[derive(Clone)]
pub struct LeadDeduper {
    store: Option<Arc<dyn LeadStore>>,
}

impl LeadDeduper {
    pub fn new(store: Arc<dyn LeadStore>) -> Self {
        Self { store: Some(store) }
    }

    /// Engine with no storage attached; `ingest` becomes a no-op.
    pub fn detached() -> Self {
        Self { store: None }
    }

    /// Ingest one batch of raw records for `campaign_id`.
    ///
    /// Records are processed strictly in input order. A record is skipped
    /// when its normalized email is missing, already stored, or already seen
    /// earlier in this batch. A record whose staging fails is counted under
    /// `errors` and does not disturb the rest of the batch. All staged rows
    /// are committed together; a commit failure rolls back the whole batch
    /// and propagates.
    pub async fn ingest(
        &self,
        campaign_id: Uuid,
        records: &[JsonValue],
    ) -> Result<IngestSummary, IngestError> {
        let Some(store) = &self.store else {
            return Ok(IngestSummary::default());
        };

        let mut summary = IngestSummary::default();

        let candidate_emails: Vec<String> = records
            .iter()
            .filter_map(|record| normalize_email(record.get("email").and_then(JsonValue::as_str)))
            .collect();

        let existing = match store.existing_emails(&candidate_emails).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(error = %e, "duplicate check failed, proceeding without stored-email dedup");
                HashSet::new()
            }
        };

        let mut seen: HashSet<String> = HashSet::new();
        let mut staged: Vec<NewLead> = Vec::new();

        for record in records {
            summary.total_processed += 1;

            let Some(email) = normalize_email(record.get("email").and_then(JsonValue::as_str))
            else {
                summary.skipped += 1;
                continue;
            };

            if existing.contains(&email) || seen.contains(&email) {
                summary.skipped += 1;
                continue;
            }

            match stage_lead(campaign_id, record, &email) {
                Ok(lead) => {
                    seen.insert(email);
                    staged.push(lead);
                }
                Err(e) => {
                    warn!(error = %e, "failed to stage lead record");
                    summary.errors += 1;
                }
            }
        }

        if !staged.is_empty() {
            let ids = store
                .insert_batch(staged)
                .await
                .map_err(IngestError::Commit)?;
            summary.created = ids.len();
            summary.created_ids = ids;
        }

        if summary.skipped > 0 {
            summary
                .messages
                .push(format!("Skipped {} duplicate/invalid emails", summary.skipped));
        }

        debug!(
            campaign_id = %campaign_id,
            created = summary.created,
            skipped = summary.skipped,
            errors = summary.errors,
            "lead batch ingested"
        );

        Ok(summary)
    }
}

/// Build a staged lead from one raw record.
///
/// Fields present with a non-string value are construction errors (counted
/// per record by the caller), not silent coercions.
fn stage_lead(campaign_id: Uuid, record: &JsonValue, email: &str) -> anyhow::Result<NewLead> {
    Ok(NewLead {
        id: Uuid::new_v4(),
        campaign_id,
        first_name: str_field(record, "first_name")?,
        last_name: str_field(record, "last_name")?,
        email: Some(email.to_string()),
        phone: str_field(record, "phone")?,
        company: company_name(record)?,
        title: str_field(record, "title")?,
        linkedin_url: str_field(record, "linkedin_url")?,
        source_url: str_field(record, "source_url")?,
        raw_data: record.clone(),
    })
}

/// Company can arrive flat (`organization_name`) or nested
/// (`organization.name`). The flat field wins when both are present.
fn company_name(record: &JsonValue) -> anyhow::Result<Option<String>> {
    if record.get("organization_name").is_some_and(|v| !v.is_null()) {
        return str_field(record, "organization_name");
    }

    match record.get("organization") {
        None | Some(JsonValue::Null) => Ok(None),
        Some(org) if org.is_object() => str_field(org, "name"),
        Some(other) => anyhow::bail!("organization is not an object: {}", other),
    }
}

fn str_field(record: &JsonValue, key: &str) -> anyhow::Result<Option<String>> {
    match record.get(key) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(s)) => Ok(Some(s.clone())),
        Some(other) => anyhow::bail!("field {} is not a string: {}", key, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::leads::testing::InMemoryLeadStore;
    use serde_json::json;

    fn deduper(store: Arc<InMemoryLeadStore>) -> LeadDeduper {
        LeadDeduper::new(store)
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(
            normalize_email(Some("  A@X.COM ")),
            Some("a@x.com".to_string())
        );
        assert_eq!(normalize_email(Some("   ")), None);
        assert_eq!(normalize_email(Some("")), None);
        assert_eq!(normalize_email(None), None);
    }

    #[tokio::test]
    async fn mixed_batch_creates_and_skips() {
        // One valid, one case/whitespace duplicate of it, one blank, one new.
        let store = Arc::new(InMemoryLeadStore::new());
        let campaign_id = Uuid::new_v4();

        let records = vec![
            json!({"email": "a@x.com"}),
            json!({"email": "A@X.COM "}),
            json!({"email": ""}),
            json!({"email": "b@x.com"}),
        ];

        let summary = deduper(store.clone())
            .ingest(campaign_id, &records)
            .await
            .unwrap();

        assert_eq!(summary.created, 2);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.errors, 0);
        assert_eq!(summary.total_processed, 4);
        assert_eq!(summary.created_ids.len(), 2);
        assert_eq!(summary.messages, vec!["Skipped 2 duplicate/invalid emails"]);

        let mut emails = store.emails();
        emails.sort();
        assert_eq!(emails, vec!["a@x.com", "b@x.com"]);
    }

    #[tokio::test]
    async fn stored_emails_always_skip() {
        let store = Arc::new(InMemoryLeadStore::with_existing_emails(&["a@x.com"]));

        let records = vec![json!({"email": " A@x.com "}), json!({"email": "a@x.com"})];
        let summary = deduper(store.clone())
            .ingest(Uuid::new_v4(), &records)
            .await
            .unwrap();

        assert_eq!(summary.created, 0);
        assert_eq!(summary.skipped, 2);
        assert_eq!(store.leads().len(), 1);
    }

    #[tokio::test]
    async fn lookup_failure_degrades_to_batch_only_dedup() {
        let store = Arc::new(InMemoryLeadStore::with_existing_emails(&["a@x.com"]));
        store.set_fail_email_lookup(true);

        let records = vec![
            json!({"email": "a@x.com"}),
            json!({"email": "b@x.com"}),
            json!({"email": "b@x.com"}),
        ];
        let summary = deduper(store.clone())
            .ingest(Uuid::new_v4(), &records)
            .await
            .unwrap();

        // Stored duplicate slips through (degraded mode), in-batch duplicate
        // still caught.
        assert_eq!(summary.created, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.errors, 0);
    }

    #[tokio::test]
    async fn commit_failure_rolls_back_and_propagates() {
        let store = Arc::new(InMemoryLeadStore::new());
        store.set_fail_commit(true);

        let records = vec![json!({"email": "a@x.com"})];
        let err = deduper(store.clone())
            .ingest(Uuid::new_v4(), &records)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Commit(_)));
        assert!(store.leads().is_empty());
    }

    #[tokio::test]
    async fn malformed_record_counts_as_error_and_batch_continues() {
        let store = Arc::new(InMemoryLeadStore::new());

        let records = vec![
            json!({"email": "a@x.com", "first_name": {"weird": true}}),
            json!({"email": "b@x.com", "first_name": "Bea"}),
        ];
        let summary = deduper(store.clone())
            .ingest(Uuid::new_v4(), &records)
            .await
            .unwrap();

        assert_eq!(summary.created, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.skipped, 0);
        assert_eq!(store.emails(), vec!["b@x.com"]);
    }

    #[tokio::test]
    async fn detached_engine_is_a_noop() {
        let summary = LeadDeduper::detached()
            .ingest(Uuid::new_v4(), &[json!({"email": "a@x.com"})])
            .await
            .unwrap();

        assert_eq!(summary.created, 0);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.errors, 0);
        assert_eq!(summary.total_processed, 0);
    }

    #[tokio::test]
    async fn empty_batch_returns_zeroed_summary_without_message() {
        let store = Arc::new(InMemoryLeadStore::new());
        let summary = deduper(store).ingest(Uuid::new_v4(), &[]).await.unwrap();

        assert_eq!(summary.total_processed, 0);
        assert!(summary.messages.is_empty());
    }

    #[tokio::test]
    async fn contact_fields_are_copied_onto_the_lead() {
        let store = Arc::new(InMemoryLeadStore::new());
        let campaign_id = Uuid::new_v4();

        let records = vec![json!({
            "email": "ada@acme.com",
            "first_name": "Ada",
            "last_name": "Lovelace",
            "phone": "+1-555-0100",
            "title": "Engineer",
            "organization_name": "Acme",
            "linkedin_url": "https://linkedin.com/in/ada",
            "source_url": "https://acme.com/team",
        })];

        deduper(store.clone())
            .ingest(campaign_id, &records)
            .await
            .unwrap();

        let leads = store.leads();
        let lead = &leads[0];
        assert_eq!(lead.campaign_id, campaign_id);
        assert_eq!(lead.first_name.as_deref(), Some("Ada"));
        assert_eq!(lead.company.as_deref(), Some("Acme"));
        assert_eq!(lead.email.as_deref(), Some("ada@acme.com"));
        assert_eq!(lead.raw_data.as_ref().unwrap()["title"], "Engineer");
    }

    #[test]
    fn company_prefers_flat_name_over_nested() {
        let record = json!({
            "organization_name": "Flat Inc",
            "organization": {"name": "Nested Inc"},
        });
        assert_eq!(company_name(&record).unwrap().as_deref(), Some("Flat Inc"));
    }

    #[test]
    fn company_falls_back_to_nested_object() {
        let record = json!({"organization": {"name": "Nested Inc"}});
        assert_eq!(
            company_name(&record).unwrap().as_deref(),
            Some("Nested Inc")
        );
    }

    #[test]
    fn company_absent_when_neither_shape_present() {
        assert_eq!(company_name(&json!({})).unwrap(), None);
        assert_eq!(company_name(&json!({"organization": null})).unwrap(), None);
    }

    #[test]
    fn company_rejects_non_object_organization() {
        assert!(company_name(&json!({"organization": "Acme"})).is_err());
    }
}
