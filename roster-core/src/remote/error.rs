//! Remote client error types.

use thiserror::Error;

/// Errors from a single remote round trip. No retries happen at this level.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Server could not be reached or the request timed out.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Not found on server: {0}")]
    NotFound(String),

    /// 4xx other than 404, typically a validation failure.
    #[error("Rejected by server ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// 5xx or any other unexpected status.
    #[error("Server returned status {status}: {message}")]
    Server { status: u16, message: String },

    /// Response body was not the expected JSON.
    #[error("Invalid response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Whether trying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Connection(_) | RemoteError::Server { .. })
    }

    pub(crate) fn from_status(status: u16, message: String, id: Option<&str>) -> Self {
        match status {
            404 => RemoteError::NotFound(id.map(str::to_string).unwrap_or(message)),
            400..=499 => RemoteError::Rejected { status, message },
            _ => RemoteError::Server { status, message },
        }
    }
}
