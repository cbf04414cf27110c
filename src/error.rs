//! Error types surfaced by the Gust client.

use serde_json::Value;

/// Errors returned by client operations.
///
/// Best-effort cancellation requests (timeout expiry, guard drop) never
/// surface here; their failures are logged so they cannot mask the primary
/// error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The server answered with a non-2xx status and the caller did not opt
    /// out of strict checking.
    #[error("{method} {url}: {status}, {body}")]
    Transport {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },

    /// The job reached a terminal failure state. Carries the server-supplied
    /// error payload verbatim.
    #[error("job {job_id} was not successful: {error}")]
    JobFailed { job_id: String, error: Value },

    /// The wait deadline elapsed before the job completed. A best-effort
    /// cancellation has already been issued by the time this is returned.
    #[error("job {job_id} reached timeout")]
    Timeout { job_id: String },

    /// A required configuration value (workspace, state path, flow context)
    /// was absent at call time.
    #[error("missing configuration: {0}")]
    Config(String),

    /// Strict mode was requested and a successful job produced a null result.
    #[error("job {job_id} returned a null result")]
    NullResult { job_id: String },

    #[error(transparent)]
    Request(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
