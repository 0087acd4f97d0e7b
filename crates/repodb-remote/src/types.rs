use bytes::Bytes;
use repodb_types::VersionToken;

/// Blob content together with the version token the remote assigned to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteBlob {
    pub content: Bytes,
    pub version: VersionToken,
}

/// Outcome of a (possibly conditional) content read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fetched {
    /// The path exists; here is its current content.
    Content(RemoteBlob),
    /// The precondition token still matches the remote's version.
    NotModified,
    /// Nothing exists at the path.
    Missing,
}

/// A path and its blob version, as reported by tree construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    pub version: VersionToken,
}

/// Result of building a new tree on top of a base tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedTree {
    /// Identifier of the new tree object.
    pub sha: String,
    /// Blob entries the remote reported for the new tree. Backends that only
    /// report top-level entries leave nested paths out.
    pub entries: Vec<TreeEntry>,
}

impl CreatedTree {
    /// Version assigned to `path` in the new tree, if the remote reported it.
    pub fn version_of(&self, path: &str) -> Option<&VersionToken> {
        self.entries
            .iter()
            .find(|e| e.path == path)
            .map(|e| &e.version)
    }
}
