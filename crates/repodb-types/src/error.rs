use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("empty version token")]
    EmptyToken,

    #[error("expected a JSON object, got {0}")]
    NotAnObject(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
