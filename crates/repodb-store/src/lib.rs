//! Storage engine for repodb.
//!
//! This crate turns a [`RemoteStore`](repodb_remote::RemoteStore) into a
//! storage engine with database-like guarantees:
//!
//! - [`RetryPolicy`] -- classifies failures and retries transient ones with
//!   capped exponential backoff, honoring rate-limit hints
//! - [`CoherentCache`] -- two-tier (fresh / stale) cache revalidated with
//!   conditional reads so independent processes never read stale data
//!   indefinitely
//! - [`RemoteStorage`] -- the [`StorageEngine`] implementation composing the
//!   remote client, the retry policy and the cache, including the atomic
//!   multi-path commit protocol
//! - [`Transaction`] -- a [`StorageEngine`] decorator that buffers writes and
//!   flushes them as one commit
//!
//! # Design Rules
//!
//! 1. Conflicts are never retried; they surface to the caller.
//! 2. The cache is written through only after the remote confirms a write.
//! 3. A batch commit lands all of its paths or none of them.
//! 4. Every wait between retries can be cancelled.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod remote;
pub mod retry;
pub mod transaction;

pub use cache::{CacheEntry, CacheStats, CoherentCache};
pub use config::{RetryConfig, StoreConfig};
pub use engine::{CommitOutcome, StorageEngine};
pub use error::{StoreError, StoreResult};
pub use remote::RemoteStorage;
pub use retry::RetryPolicy;
pub use transaction::Transaction;
