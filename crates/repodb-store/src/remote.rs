//! [`StorageEngine`] over a [`RemoteStore`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use repodb_remote::{Fetched, GitHubClient, RemoteStore};
use repodb_types::{FileChange, ListEntry, VersionToken, Versioned};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CoherentCache};
use crate::config::StoreConfig;
use crate::engine::{CommitOutcome, StorageEngine};
use crate::error::{StoreError, StoreResult};
use crate::retry::RetryPolicy;

const REF_LABEL: &str = "<ref>";

/// The production storage engine.
///
/// Every remote call goes through the retry policy; reads go through the
/// coherent cache; confirmed writes are written through to the cache.
pub struct RemoteStorage {
    remote: Arc<dyn RemoteStore>,
    cache: CoherentCache,
    retry: RetryPolicy,
    cancel: Option<CancellationToken>,
}

impl RemoteStorage {
    /// An engine with the default retry policy and a zero cache TTL.
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            remote,
            cache: CoherentCache::new(Some(Duration::ZERO)),
            retry: RetryPolicy::default(),
            cancel: None,
        }
    }

    /// Build a GitHub-backed engine from configuration.
    pub fn from_config(config: &StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        let client = GitHubClient::new(config.github())?;
        Ok(Self::new(Arc::new(client))
            .with_cache_ttl(config.cache_ttl())
            .with_retry(config.retry_policy()))
    }

    pub fn with_cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.cache = CoherentCache::new(ttl);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Abort pending retry waits once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn cache(&self) -> &CoherentCache {
        &self.cache
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    pub fn branch(&self) -> &str {
        self.remote.branch()
    }

    async fn fetch(&self, path: &str, precondition: Option<VersionToken>) -> StoreResult<Fetched> {
        let pre = precondition.as_ref();
        self.retry
            .run(path, self.cancel.as_ref(), || self.remote.get_content(path, pre))
            .await
    }

    async fn current_version(&self, path: &str) -> StoreResult<Option<VersionToken>> {
        if let Some(version) = self.cache.version(path) {
            return Ok(Some(version));
        }
        Ok(self.read(path).await?.map(|v| v.version))
    }

    /// A conflict anywhere in the commit sequence means the branch moved.
    fn batch_conflict(&self, err: StoreError) -> StoreError {
        match err {
            StoreError::Conflict { .. } => StoreError::BatchConflict {
                branch: self.branch().to_string(),
            },
            other => other,
        }
    }
}

#[async_trait]
impl StorageEngine for RemoteStorage {
    async fn exists(&self, path: &str) -> StoreResult<bool> {
        if self.cache.contains(path) {
            return Ok(true);
        }
        Ok(self.read(path).await?.is_some())
    }

    async fn read(&self, path: &str) -> StoreResult<Option<Versioned<Bytes>>> {
        let entry = self
            .cache
            .read_through(path, |pre| self.fetch(path, pre))
            .await?;
        Ok(entry.map(|e| Versioned::new(e.data, e.version)))
    }

    async fn write(
        &self,
        path: &str,
        content: Bytes,
        message: &str,
        expected: Option<&VersionToken>,
    ) -> StoreResult<VersionToken> {
        let expected = match expected {
            Some(v) => Some(v.clone()),
            None => self.current_version(path).await?,
        };
        let pre = expected.as_ref();
        let result = self
            .retry
            .run(path, self.cancel.as_ref(), || {
                self.remote.put_content(path, content.clone(), pre, message)
            })
            .await;
        match result {
            Ok(version) => {
                debug!(path, version = version.short(), "write confirmed");
                self.cache.put_written(
                    path,
                    CacheEntry {
                        data: content,
                        version: version.clone(),
                    },
                );
                Ok(version)
            }
            Err(err) => {
                if err.is_conflict() {
                    self.cache.expire(path);
                }
                Err(err)
            }
        }
    }

    async fn delete(&self, path: &str, message: &str, expected: &VersionToken) -> StoreResult<()> {
        let result = self
            .retry
            .run(path, self.cancel.as_ref(), || {
                self.remote.delete_content(path, expected, message)
            })
            .await;
        match result {
            Ok(()) => {
                debug!(path, "delete confirmed");
                self.cache.remove(path);
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                self.cache.remove(path);
                Err(StoreError::NotFound {
                    path: path.to_string(),
                })
            }
            Err(err) => {
                if err.is_conflict() {
                    self.cache.expire(path);
                }
                Err(err)
            }
        }
    }

    async fn list(&self, dir: &str) -> StoreResult<Vec<ListEntry>> {
        let entries = self
            .retry
            .run(dir, self.cancel.as_ref(), || self.remote.list_dir(dir))
            .await?;
        Ok(entries.unwrap_or_default())
    }

    async fn commit(&self, changes: Vec<FileChange>, message: &str) -> StoreResult<CommitOutcome> {
        if changes.is_empty() {
            return Err(StoreError::EmptyCommit);
        }
        let cancel = self.cancel.as_ref();
        let branch = self.branch().to_string();

        let head = self
            .retry
            .run(REF_LABEL, cancel, || self.remote.get_ref())
            .await
            .map_err(|e| self.batch_conflict(e))?;
        let base_tree = self
            .retry
            .run(REF_LABEL, cancel, || self.remote.get_commit_tree(&head))
            .await
            .map_err(|e| self.batch_conflict(e))?;
        let tree = self
            .retry
            .run(REF_LABEL, cancel, || self.remote.create_tree(&base_tree, &changes))
            .await
            .map_err(|e| self.batch_conflict(e))?;
        let commit = self
            .retry
            .run(REF_LABEL, cancel, || {
                self.remote.create_commit(message, &tree.sha, &head)
            })
            .await
            .map_err(|e| self.batch_conflict(e))?;

        if let Err(err) = self
            .retry
            .run(REF_LABEL, cancel, || self.remote.update_ref(&commit))
            .await
        {
            let err = self.batch_conflict(err);
            if err.is_conflict() {
                warn!(%branch, changes = changes.len(), "batch commit lost the race");
                for change in &changes {
                    self.cache.expire(&change.path);
                }
            }
            return Err(err);
        }

        let mut outcome = CommitOutcome {
            commit: Some(commit),
            changes: Vec::with_capacity(changes.len()),
        };
        for change in changes {
            let version = match (change.content, tree.version_of(&change.path)) {
                (Some(data), Some(version)) => {
                    self.cache.put_written(
                        &change.path,
                        CacheEntry {
                            data,
                            version: version.clone(),
                        },
                    );
                    Some(version.clone())
                }
                _ => {
                    self.cache.remove(&change.path);
                    None
                }
            };
            outcome.changes.push((change.path, version));
        }
        info!(
            %branch,
            commit = outcome.commit.as_deref().unwrap_or_default(),
            changes = outcome.changes.len(),
            "batch committed"
        );
        Ok(outcome)
    }
}
