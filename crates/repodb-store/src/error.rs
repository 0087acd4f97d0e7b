use std::time::Duration;

use repodb_remote::RemoteError;

/// Errors from storage engine operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The version token supplied for a write or delete is stale.
    #[error("version conflict on {path}")]
    Conflict { path: String },

    /// A batch commit lost the race to advance the branch. Nothing landed;
    /// the whole batch must be re-resolved and re-submitted.
    #[error("batch commit rejected: branch {branch} moved")]
    BatchConflict { branch: String },

    /// Retries were exhausted while the remote kept rate limiting.
    #[error("rate limited by remote (suggested wait: {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// The path does not exist.
    #[error("path not found: {path}")]
    NotFound { path: String },

    /// A batch commit was requested with no changes.
    #[error("nothing to commit")]
    EmptyCommit,

    /// The operation was cancelled while waiting to retry.
    #[error("operation cancelled")]
    Cancelled,

    /// Configuration could not be loaded or is inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Any other remote failure: client errors, transient errors that
    /// outlived the retry budget, transport and decoding failures.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl StoreError {
    /// Returns `true` for both single-path and batch conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::BatchConflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Remote(err) => err.is_not_found(),
            _ => false,
        }
    }
}

/// Result alias for storage engine operations.
pub type StoreResult<T> = Result<T, StoreError>;
