use async_trait::async_trait;
use bytes::Bytes;
use repodb_types::{FileChange, ListEntry, VersionToken, Versioned};

use crate::error::StoreResult;

/// Versioned path-level access to stored blobs.
///
/// Every mutating call takes the version the caller last observed;
/// implementations reject the call with a conflict when the stored version
/// has moved on. [`commit`](Self::commit) applies several puts and deletes
/// as one unit.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    async fn exists(&self, path: &str) -> StoreResult<bool>;

    /// Current content and version of `path`, or `None` if it does not
    /// exist.
    async fn read(&self, path: &str) -> StoreResult<Option<Versioned<Bytes>>>;

    /// Create or replace `path`.
    ///
    /// Without `expected`, the engine discovers the current version itself
    /// (from its cache or a lookup). Returns the new version.
    async fn write(
        &self,
        path: &str,
        content: Bytes,
        message: &str,
        expected: Option<&VersionToken>,
    ) -> StoreResult<VersionToken>;

    /// Remove `path` if it is still at `expected`.
    async fn delete(&self, path: &str, message: &str, expected: &VersionToken) -> StoreResult<()>;

    /// Direct children of `dir`; empty if the directory does not exist.
    async fn list(&self, dir: &str) -> StoreResult<Vec<ListEntry>>;

    /// Apply all `changes` in one atomic step.
    async fn commit(&self, changes: Vec<FileChange>, message: &str) -> StoreResult<CommitOutcome>;
}

/// What a batch commit produced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Identifier of the new commit; `None` when nothing was committed.
    pub commit: Option<String>,
    /// Each changed path with its new version. Deleted paths, and paths
    /// whose version the remote did not report, carry `None`.
    pub changes: Vec<(String, Option<VersionToken>)>,
}

impl CommitOutcome {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn version_of(&self, path: &str) -> Option<&VersionToken> {
        self.changes
            .iter()
            .find(|(p, _)| p == path)
            .and_then(|(_, v)| v.as_ref())
    }
}
