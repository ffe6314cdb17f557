use thiserror::Error;

use crate::model::{JobStatus, MarketoError};

/// Top-level error type for client operations.
///
/// Retryable failures (5xx statuses, connection drops, the known retryable
/// vendor codes) are absorbed by the transport loop and only surface once the
/// retry budget is exhausted. Everything else propagates unchanged, carrying
/// the vendor's own message text where one exists.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Credential or identity failure. The message is the vendor's
    /// `error_description` verbatim when the identity endpoint supplied one.
    #[error("{message}")]
    Auth { message: String },

    /// Network-level or HTTP-status failure.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        /// HTTP status when the request completed with a non-2xx response.
        status: Option<u16>,
        /// Whether the failure class is worth retrying (timeouts, connects).
        retryable: bool,
    },

    /// Structured error list returned inside a 2xx vendor envelope.
    #[error("marketo api error: {}", format_errors(.0))]
    Api(Vec<MarketoError>),

    /// Bulk extract job reached a terminal failure state.
    #[error("bulk extract job {job_id} ended as {status}")]
    JobFailed { job_id: String, status: JobStatus },

    /// Bulk extract job did not reach a terminal state within the poll budget.
    #[error("bulk extract job {job_id} not complete after {polls} polls")]
    JobTimeout { job_id: String, polls: u32 },

    /// Response body did not have the expected shape.
    #[error("unexpected payload: {0}")]
    Payload(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn transport(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Transport {
            message: message.into(),
            status,
            retryable: status.map(|s| s >= 500).unwrap_or(false),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
            retryable: true,
        }
    }
}

fn format_errors(errors: &[MarketoError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.code, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}
