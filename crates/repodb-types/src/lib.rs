//! Foundation types for repodb.
//!
//! repodb uses a hosted Git repository as a record store. This crate holds
//! the value types shared by every layer, from the wire client up to the
//! collection engine. Every other repodb crate depends on `repodb-types`.
//!
//! # Key Types
//!
//! - [`VersionToken`] -- Opaque per-path version assigned by the remote store
//! - [`Versioned`] -- A value paired with the token it was read or written at
//! - [`Record`] -- A dynamic JSON key/value bag, the unit of a collection
//! - [`FileChange`] -- One path replacement or removal in a batch commit
//! - [`ListEntry`] -- One entry of a directory listing

pub mod change;
pub mod error;
pub mod record;
pub mod version;

pub use change::{EntryKind, FileChange, ListEntry};
pub use error::TypeError;
pub use record::{record_from_value, Record, Versioned};
pub use version::VersionToken;
