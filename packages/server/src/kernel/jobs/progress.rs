//! Ephemeral per-job progress reporting.
//!
//! Progress is advisory telemetry published by executors while a job is
//! processing. It lives in process memory only: a worker restart loses it,
//! and nothing here touches the durable job row.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct JobProgress {
    pub current: u32,
    pub total: Option<u32>,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

/// Shared progress side channel, queryable by job id.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    inner: Arc<RwLock<HashMap<i64, JobProgress>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, job_id: i64, current: u32, total: Option<u32>, message: &str) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                job_id,
                JobProgress {
                    current,
                    total,
                    message: message.to_string(),
                    updated_at: Utc::now(),
                },
            );
    }

    pub fn get(&self, job_id: i64) -> Option<JobProgress> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&job_id)
            .cloned()
    }

    pub fn clear(&self, job_id: i64) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_then_get_roundtrips() {
        let tracker = ProgressTracker::new();
        tracker.publish(1, 2, Some(3), "fetching dataset items");

        let progress = tracker.get(1).unwrap();
        assert_eq!(progress.current, 2);
        assert_eq!(progress.total, Some(3));
        assert_eq!(progress.message, "fetching dataset items");
    }

    #[test]
    fn publish_overwrites_previous_step() {
        let tracker = ProgressTracker::new();
        tracker.publish(1, 1, Some(3), "starting");
        tracker.publish(1, 2, Some(3), "halfway");

        assert_eq!(tracker.get(1).unwrap().current, 2);
    }

    #[test]
    fn clear_removes_entry() {
        let tracker = ProgressTracker::new();
        tracker.publish(1, 1, None, "working");
        tracker.clear(1);

        assert!(tracker.get(1).is_none());
    }

    #[test]
    fn unknown_job_has_no_progress() {
        assert!(ProgressTracker::new().get(99).is_none());
    }
}
