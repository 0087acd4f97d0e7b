use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

const PENDING: &str = "pending";

/// Opaque identifier for the exact state of a path at the remote store.
///
/// The remote assigns a new token on every successful write. Tokens are only
/// ever compared for equality and sent back to the store as a precondition;
/// nothing in repodb derives a token from content.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    /// Wrap a token string received from the remote store.
    pub fn new(token: impl Into<String>) -> Result<Self, TypeError> {
        let token = token.into();
        if token.is_empty() {
            return Err(TypeError::EmptyToken);
        }
        Ok(Self(token))
    }

    /// The placeholder handed out for writes buffered in a transaction.
    ///
    /// A pending token is never valid as a precondition; it only marks that
    /// the real version will be assigned when the batch commits.
    pub fn pending() -> Self {
        Self(PENDING.to_string())
    }

    /// Returns `true` for the placeholder returned by buffered writes.
    pub fn is_pending(&self) -> bool {
        self.0 == PENDING
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 8 characters) for logs.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Debug for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VersionToken({})", self.short())
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
