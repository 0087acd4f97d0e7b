use repodb_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("record {id} not found in {collection}")]
    NotFound { collection: String, id: String },

    #[error("record {id} already exists in {collection}")]
    Duplicate { collection: String, id: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{hook} hook of middleware {middleware} failed: {reason}")]
    Middleware {
        middleware: String,
        hook: &'static str,
        reason: String,
    },

    #[error("record has no usable `{field}` value")]
    MissingId { field: String },

    #[error("invalid record id: {0:?}")]
    InvalidId(String),

    #[error("invalid record data: {0}")]
    InvalidRecord(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CollectionError {
    /// True for single-path and batch version conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_conflict())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type CollectionResult<T> = Result<T, CollectionError>;
