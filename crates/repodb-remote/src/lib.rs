//! Versioned blob store clients for repodb.
//!
//! The remote store is a hosted Git repository reached through its
//! file-content API (read, create-or-update, delete, list) and its low-level
//! object API (refs, commits, trees) for atomic multi-path commits. Every
//! write is a compare-and-swap on the path's version token.
//!
//! # Backends
//!
//! All backends implement the [`RemoteStore`] trait:
//!
//! - [`GitHubClient`] -- HTTP client for the GitHub REST API
//! - [`InMemoryRemote`] -- in-process simulation with the same semantics,
//!   call counters and fault injection, for tests and embedding
//!
//! # Design Rules
//!
//! 1. Clients own no state beyond the connection; caching lives upstream.
//! 2. Status codes are surfaced unchanged in [`RemoteError::Status`];
//!    retry classification is the caller's job.
//! 3. "Not found" on a read or listing is a typed outcome, not an error.

pub mod error;
pub mod github;
pub mod memory;
pub mod traits;
pub mod types;

pub use error::{RemoteError, RemoteResult};
pub use github::{GitHubClient, GitHubConfig};
pub use memory::{InMemoryRemote, RemoteOp};
pub use traits::RemoteStore;
pub use types::{CreatedTree, Fetched, RemoteBlob, TreeEntry};
