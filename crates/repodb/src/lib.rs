//! Record collections stored in a hosted Git repository.
//!
//! `repodb` treats a repository's file-content API as a small record store:
//! named collections of JSON records with CRUD operations, filter / sort /
//! pagination queries, equality indexes, and optimistic concurrency through
//! per-path version tokens. Several independent processes may share one
//! repository; conflicting writes are detected and surfaced, never lost.
//!
//! # Key Types
//!
//! - [`RepoDb`] -- connection handle: opens collections and transactions
//! - [`Collection`] -- one record set, single-blob or sharded
//! - [`Query`] / [`Filter`] -- filter, sort and paginate
//! - [`Validator`] / [`Middleware`] -- hooks run around saves and loads
//! - [`Typed`] -- serde conversion to application structs
//!
//! # Example
//!
//! ```no_run
//! use repodb::{Query, RepoDb, StoreConfig};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), repodb::CollectionError> {
//! let mut config = StoreConfig::new("acme", "inventory");
//! config.token = Some("ghp_example".into());
//! let db = RepoDb::connect(&config)?;
//!
//! let mut users = db.collection("users");
//! let record = repodb::record_from_value(json!({"name": "Alice"})).unwrap();
//! users.create(record).await?;
//! let alices = users.find(&Query::new().where_eq("name", "Alice")).await?;
//! # Ok(())
//! # }
//! ```

pub mod collection;
pub mod database;
pub mod error;
pub mod hooks;
pub mod query;
pub mod typed;

pub use collection::{Collection, CollectionOptions, Layout};
pub use database::{CollectionInfo, RepoDb};
pub use error::{CollectionError, CollectionResult};
pub use hooks::{Middleware, Rejection, RequiredFields, Validator};
pub use query::{compare_values, Direction, Filter, FilterOp, Query, SortKey};
pub use typed::Typed;

// Re-export key types
pub use repodb_store::{CommitOutcome, StoreConfig, StoreError, Transaction};
pub use repodb_types::{record_from_value, Record, VersionToken};
