//! Two-tier read cache kept coherent with the remote through conditional
//! reads.
//!
//! The fresh tier answers reads outright until its entries expire. The
//! stale tier keeps the last known content and version of every path
//! regardless of age; its version is sent as the precondition of the next
//! read, and its content is reused when the remote answers "not modified".
//!
//! Entries recorded after this process's own confirmed writes are pinned:
//! the next read is answered locally even when the TTL has already run
//! out. Later reads follow the TTL again.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use repodb_remote::{Fetched, RemoteError};
use repodb_types::VersionToken;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// Cached content of one path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    pub data: Bytes,
    pub version: VersionToken,
}

#[derive(Debug)]
struct FreshEntry {
    entry: CacheEntry,
    expires_at: Option<Instant>,
    /// Set by [`CoherentCache::put_written`]; cleared by the read it serves.
    pinned: bool,
}

impl FreshEntry {
    fn is_live(&self) -> bool {
        self.pinned || self.expires_at.map_or(true, |at| Instant::now() < at)
    }
}

#[derive(Debug, Default)]
struct Tiers {
    fresh: HashMap<String, FreshEntry>,
    stale: HashMap<String, CacheEntry>,
}

/// Read counters since the cache was created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered from the fresh tier without contacting the remote.
    pub hits: u64,
    /// Conditional reads the remote answered with "not modified".
    pub revalidated: u64,
    /// Reads that transferred content (or found nothing).
    pub misses: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    revalidated: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug)]
pub struct CoherentCache {
    ttl: Option<Duration>,
    tiers: Mutex<Tiers>,
    counters: Counters,
}

impl CoherentCache {
    /// `ttl == None` keeps fresh entries forever; `Some(ZERO)` makes every
    /// read a conditional request.
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            tiers: Mutex::new(Tiers::default()),
            counters: Counters::default(),
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, Tiers> {
        self.tiers.lock().expect("lock poisoned")
    }

    fn expiry(&self) -> Option<Instant> {
        self.ttl.map(|ttl| Instant::now() + ttl)
    }

    /// The fresh-tier entry for `path`, if it has not expired or is pinned.
    pub fn fresh(&self, path: &str) -> Option<CacheEntry> {
        let tiers = self.lock();
        tiers
            .fresh
            .get(path)
            .filter(|f| f.is_live())
            .map(|f| f.entry.clone())
    }

    /// Like [`fresh`](Self::fresh), but consumes the pin of an own write.
    fn take_fresh(&self, path: &str) -> Option<CacheEntry> {
        let mut tiers = self.lock();
        let fresh = tiers.fresh.get_mut(path).filter(|f| f.is_live())?;
        fresh.pinned = false;
        Some(fresh.entry.clone())
    }

    /// Last known content and version for `path`, however old.
    pub fn stale(&self, path: &str) -> Option<CacheEntry> {
        self.lock().stale.get(path).cloned()
    }

    /// Last known version for `path`, however old.
    pub fn version(&self, path: &str) -> Option<VersionToken> {
        self.lock().stale.get(path).map(|e| e.version.clone())
    }

    /// Whether either tier holds `path`.
    pub fn contains(&self, path: &str) -> bool {
        let tiers = self.lock();
        tiers.stale.contains_key(path) || tiers.fresh.contains_key(path)
    }

    /// Record `entry` in both tiers.
    pub fn put(&self, path: &str, entry: CacheEntry) {
        self.insert(path, entry, false);
    }

    /// Record content this process just wrote. The next read of `path` is
    /// served from the cache whatever the TTL.
    pub fn put_written(&self, path: &str, entry: CacheEntry) {
        self.insert(path, entry, true);
    }

    fn insert(&self, path: &str, entry: CacheEntry, pinned: bool) {
        let expires_at = self.expiry();
        let mut tiers = self.lock();
        tiers.stale.insert(path.to_string(), entry.clone());
        tiers.fresh.insert(
            path.to_string(),
            FreshEntry {
                entry,
                expires_at,
                pinned,
            },
        );
    }

    /// Forget `path` in both tiers.
    pub fn remove(&self, path: &str) {
        let mut tiers = self.lock();
        tiers.fresh.remove(path);
        tiers.stale.remove(path);
    }

    /// Drop the fresh entry for `path` so the next read revalidates.
    pub fn expire(&self, path: &str) {
        self.lock().fresh.remove(path);
    }

    pub fn clear(&self) {
        let mut tiers = self.lock();
        tiers.fresh.clear();
        tiers.stale.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().stale.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            revalidated: self.counters.revalidated.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
        }
    }

    /// Read `path`, consulting the remote through `fetch` unless the fresh
    /// tier can answer.
    ///
    /// `fetch` receives the stale-tier version to send as precondition.
    /// Returns `None` when the remote reports nothing at the path.
    pub async fn read_through<F, Fut>(&self, path: &str, fetch: F) -> StoreResult<Option<CacheEntry>>
    where
        F: FnOnce(Option<VersionToken>) -> Fut,
        Fut: Future<Output = StoreResult<Fetched>>,
    {
        if let Some(entry) = self.take_fresh(path) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(path, version = entry.version.short(), "cache hit");
            return Ok(Some(entry));
        }

        let stale = self.stale(path);
        let precondition = stale.as_ref().map(|e| e.version.clone());
        match fetch(precondition).await? {
            Fetched::NotModified => {
                let entry = stale.ok_or_else(|| {
                    StoreError::Remote(RemoteError::Decode(format!(
                        "{path}: not modified without a precondition"
                    )))
                })?;
                self.counters.revalidated.fetch_add(1, Ordering::Relaxed);
                debug!(path, version = entry.version.short(), "cache revalidated");
                self.put(path, entry.clone());
                Ok(Some(entry))
            }
            Fetched::Content(blob) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                let entry = CacheEntry {
                    data: blob.content,
                    version: blob.version,
                };
                self.put(path, entry.clone());
                Ok(Some(entry))
            }
            Fetched::Missing => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                self.remove(path);
                Ok(None)
            }
        }
    }
}
