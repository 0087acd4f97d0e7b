use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::version::VersionToken;

/// A single path mutation inside a batch commit.
///
/// `content == None` is a tombstone: the path is removed from the tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub content: Option<Bytes>,
}

impl FileChange {
    /// Replace (or create) `path` with `content`.
    pub fn put(path: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            path: path.into(),
            content: Some(content.into()),
        }
    }

    /// Remove `path`.
    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: None,
        }
    }

    pub fn is_delete(&self) -> bool {
        self.content.is_none()
    }
}

/// Kind of a directory listing entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    /// Symlinks, submodules and anything else the store reports.
    Other,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Dir => write!(f, "dir"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// One entry returned by a directory listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListEntry {
    /// Full path from the repository root.
    pub path: String,
    /// Final path component.
    pub name: String,
    pub version: VersionToken,
    pub kind: EntryKind,
}
