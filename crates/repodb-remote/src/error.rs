use std::time::Duration;

/// HTTP status the remote uses for a stale version token.
pub const STATUS_CONFLICT: u16 = 409;
/// HTTP status the remote uses when the caller is throttled.
pub const STATUS_RATE_LIMITED: u16 = 429;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_NOT_MODIFIED: u16 = 304;
/// Lowest status treated as a server-side (transient) failure.
pub const SERVER_ERROR_THRESHOLD: u16 = 500;

/// Errors from remote store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The remote answered with a non-success status.
    #[error("remote returned {status}: {message}")]
    Status {
        status: u16,
        message: String,
        /// Suggested wait carried by a `Retry-After` header.
        retry_after: Option<Duration>,
    },

    /// The request never produced a response (DNS, TLS, connection reset).
    #[error("transport error: {0}")]
    Transport(String),

    /// The response did not have the expected shape.
    #[error("malformed response: {0}")]
    Decode(String),

    /// The request could not be built (bad path, bad base URL).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RemoteError {
    /// Shorthand for a status error without a body or hint.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    /// The HTTP status, if the failure carried one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.status_code() == Some(STATUS_CONFLICT)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status_code() == Some(STATUS_RATE_LIMITED)
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(STATUS_NOT_FOUND)
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self.status_code(), Some(s) if s >= SERVER_ERROR_THRESHOLD)
    }
}

/// Result alias for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;
