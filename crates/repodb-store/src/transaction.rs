//! Write buffering over another [`StorageEngine`].

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use repodb_types::{FileChange, ListEntry, VersionToken, Versioned};
use tracing::debug;

use crate::engine::{CommitOutcome, StorageEngine};
use crate::error::StoreResult;

/// A [`StorageEngine`] that records writes and deletes instead of
/// performing them.
///
/// Reads see the buffered state first (read-your-own-writes) and fall
/// through to the wrapped engine for untouched paths. Buffered writes
/// report [`VersionToken::pending`]. [`Transaction::commit`] hands the
/// whole buffer to the wrapped engine as one batch.
pub struct Transaction {
    inner: Arc<dyn StorageEngine>,
    pending: Mutex<Vec<FileChange>>,
}

impl Transaction {
    pub fn new(inner: Arc<dyn StorageEngine>) -> Self {
        Self {
            inner,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &Arc<dyn StorageEngine> {
        &self.inner
    }

    fn lock(&self) -> MutexGuard<'_, Vec<FileChange>> {
        self.pending.lock().expect("lock poisoned")
    }

    /// Record `change`, replacing any earlier change to the same path but
    /// keeping its position.
    fn stage(&self, change: FileChange) {
        let mut pending = self.lock();
        match pending.iter_mut().find(|c| c.path == change.path) {
            Some(slot) => *slot = change,
            None => pending.push(change),
        }
    }

    fn staged(&self, path: &str) -> Option<Option<Bytes>> {
        self.lock()
            .iter()
            .find(|c| c.path == path)
            .map(|c| c.content.clone())
    }

    /// Buffered changes, one per path, in first-touched order.
    pub fn changes(&self) -> Vec<FileChange> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Flush the buffer as one batch on the wrapped engine.
    ///
    /// The buffer is emptied whether or not the batch lands. An empty
    /// buffer commits nothing and makes no remote call.
    pub async fn commit(&self, message: &str) -> StoreResult<CommitOutcome> {
        let changes = std::mem::take(&mut *self.lock());
        if changes.is_empty() {
            debug!("transaction empty, nothing to commit");
            return Ok(CommitOutcome::default());
        }
        debug!(changes = changes.len(), "committing transaction");
        self.inner.commit(changes, message).await
    }

    /// Drop every buffered change.
    pub fn discard(&self) {
        self.lock().clear();
    }
}

#[async_trait]
impl StorageEngine for Transaction {
    async fn exists(&self, path: &str) -> StoreResult<bool> {
        match self.staged(path) {
            Some(content) => Ok(content.is_some()),
            None => self.inner.exists(path).await,
        }
    }

    async fn read(&self, path: &str) -> StoreResult<Option<Versioned<Bytes>>> {
        match self.staged(path) {
            Some(content) => Ok(content.map(|data| Versioned::new(data, VersionToken::pending()))),
            None => self.inner.read(path).await,
        }
    }

    async fn write(
        &self,
        path: &str,
        content: Bytes,
        _message: &str,
        _expected: Option<&VersionToken>,
    ) -> StoreResult<VersionToken> {
        self.stage(FileChange::put(path, content));
        Ok(VersionToken::pending())
    }

    async fn delete(&self, path: &str, _message: &str, _expected: &VersionToken) -> StoreResult<()> {
        self.stage(FileChange::delete(path));
        Ok(())
    }

    async fn list(&self, dir: &str) -> StoreResult<Vec<ListEntry>> {
        self.inner.list(dir).await
    }

    /// Buffer `changes` alongside earlier writes; nothing reaches the
    /// wrapped engine until [`Transaction::commit`].
    async fn commit(&self, changes: Vec<FileChange>, _message: &str) -> StoreResult<CommitOutcome> {
        let mut outcome = CommitOutcome::default();
        for change in changes {
            let version = change.content.as_ref().map(|_| VersionToken::pending());
            outcome.changes.push((change.path.clone(), version));
            self.stage(change);
        }
        Ok(outcome)
    }
}
