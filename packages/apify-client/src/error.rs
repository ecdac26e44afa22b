use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApifyError>;

#[derive(Debug, Error)]
pub enum ApifyError {
    /// Transport-level failure (connection, TLS, body decode).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status code.
    #[error("apify api error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The actor run reached a terminal non-success status.
    #[error("actor run finished with status {0}")]
    RunFailed(String),
}
