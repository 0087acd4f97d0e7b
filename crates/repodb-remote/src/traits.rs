use async_trait::async_trait;
use bytes::Bytes;
use repodb_types::{FileChange, ListEntry, VersionToken};

use crate::error::RemoteResult;
use crate::types::{CreatedTree, Fetched};

/// Client for a remote, version-controlled blob store.
///
/// Implementations translate wire status codes into [`Fetched`] outcomes or
/// [`RemoteError`](crate::RemoteError) values and otherwise hold no state.
/// All content operations target the client's configured branch.
///
/// Atomic multi-path commits are expressed through the object methods in
/// order: [`get_ref`](Self::get_ref) -> [`get_commit_tree`](Self::get_commit_tree)
/// -> [`create_tree`](Self::create_tree) -> [`create_commit`](Self::create_commit)
/// -> [`update_ref`](Self::update_ref). Only the last call is visible to
/// other readers.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Name of the line of history this client reads and writes.
    fn branch(&self) -> &str;

    /// Read the content at `path`.
    ///
    /// When `if_none_match` is given and still matches the remote version,
    /// returns [`Fetched::NotModified`] without a body.
    async fn get_content(
        &self,
        path: &str,
        if_none_match: Option<&VersionToken>,
    ) -> RemoteResult<Fetched>;

    /// Create or replace the content at `path` and return its new version.
    ///
    /// `expected` must equal the current version; `None` is only accepted
    /// when the path does not exist yet. A mismatch fails with a conflict
    /// status.
    async fn put_content(
        &self,
        path: &str,
        content: Bytes,
        expected: Option<&VersionToken>,
        message: &str,
    ) -> RemoteResult<VersionToken>;

    /// Remove `path` if its current version equals `expected`.
    async fn delete_content(
        &self,
        path: &str,
        expected: &VersionToken,
        message: &str,
    ) -> RemoteResult<()>;

    /// List the direct children of a directory.
    ///
    /// Returns `Ok(None)` if the directory does not exist.
    async fn list_dir(&self, path: &str) -> RemoteResult<Option<Vec<ListEntry>>>;

    /// Resolve the commit the branch currently points at.
    async fn get_ref(&self) -> RemoteResult<String>;

    /// Resolve the tree a commit is anchored at.
    async fn get_commit_tree(&self, commit: &str) -> RemoteResult<String>;

    /// Build a tree equal to `base_tree` plus `changes`.
    async fn create_tree(
        &self,
        base_tree: &str,
        changes: &[FileChange],
    ) -> RemoteResult<CreatedTree>;

    /// Create a commit with a single parent.
    async fn create_commit(&self, message: &str, tree: &str, parent: &str) -> RemoteResult<String>;

    /// Move the branch to `commit`.
    ///
    /// Fails with a conflict status unless `commit` descends from the
    /// branch's current target.
    async fn update_ref(&self, commit: &str) -> RemoteResult<()>;
}
