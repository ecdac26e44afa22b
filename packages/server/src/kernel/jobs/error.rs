use thiserror::Error;

use super::job::JobStatus;

/// Job storage and state-machine errors.
///
/// `InvalidTransition` covers invalid-state requests (e.g. cancelling a
/// completed job) - an unsuccessful operation, not an infrastructure fault.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(i64),

    #[error("cannot {action} job in {} state", .status.as_str())]
    InvalidTransition {
        action: &'static str,
        status: JobStatus,
    },

    #[error("job storage error: {0}")]
    Backend(#[source] anyhow::Error),
}

impl From<sqlx::Error> for JobError {
    fn from(e: sqlx::Error) -> Self {
        JobError::Backend(e.into())
    }
}
