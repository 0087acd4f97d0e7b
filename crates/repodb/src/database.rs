//! Entry point tying a storage engine to named collections.

use std::sync::Arc;

use repodb_store::{RemoteStorage, StorageEngine, StoreConfig, Transaction};
use repodb_types::EntryKind;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::collection::{Collection, CollectionOptions, Layout};
use crate::error::CollectionResult;
use crate::typed::Typed;

/// A collection found in the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionInfo {
    pub name: String,
    pub layout: Layout,
}

/// Handle to a repository used as a record store.
///
/// Cloning is cheap; clones share the storage engine and its cache.
#[derive(Clone)]
pub struct RepoDb {
    engine: Arc<dyn StorageEngine>,
    base_path: String,
}

impl std::fmt::Debug for RepoDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoDb")
            .field("base_path", &self.base_path)
            .finish()
    }
}

impl RepoDb {
    /// Connect to the hosted repository described by `config`.
    pub fn connect(config: &StoreConfig) -> CollectionResult<Self> {
        let engine = RemoteStorage::from_config(config)?;
        debug!(owner = %config.owner, repo = %config.repo, branch = %config.branch, "connected");
        Ok(Self::with_engine(Arc::new(engine), config.base_path.clone()))
    }

    pub fn with_engine(engine: Arc<dyn StorageEngine>, base_path: impl Into<String>) -> Self {
        Self {
            engine,
            base_path: base_path.into().trim_matches('/').to_string(),
        }
    }

    pub fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// A single-blob collection with default options.
    pub fn collection(&self, name: impl Into<String>) -> Collection {
        self.collection_with(name, CollectionOptions::default())
    }

    pub fn collection_with(&self, name: impl Into<String>, options: CollectionOptions) -> Collection {
        Collection::new(name, self.base_path.clone(), Arc::clone(&self.engine), options)
    }

    pub fn typed<T>(&self, name: impl Into<String>, options: CollectionOptions) -> Typed<T>
    where
        T: Serialize + DeserializeOwned,
    {
        Typed::new(self.collection_with(name, options))
    }

    /// Start buffering writes.
    ///
    /// Collections opened with [`collection_in`](Self::collection_in) on the
    /// returned transaction see its pending writes; nothing reaches the
    /// store until [`Transaction::commit`]. Discard those collections after
    /// committing: their snapshots carry placeholder versions.
    ///
    /// There is no isolation. Buffered writes drop their expected versions
    /// and the commit builds on whatever the branch holds when it runs, so a
    /// change another writer lands on the same path between this
    /// transaction's read and its commit is overwritten. Only a moved branch
    /// during the commit itself is detected, as a batch conflict.
    pub fn transaction(&self) -> Arc<Transaction> {
        Arc::new(Transaction::new(Arc::clone(&self.engine)))
    }

    pub fn collection_in(
        &self,
        tx: &Arc<Transaction>,
        name: impl Into<String>,
        options: CollectionOptions,
    ) -> Collection {
        let engine: Arc<dyn StorageEngine> = tx.clone();
        Collection::new(name, self.base_path.clone(), engine, options)
    }

    /// Collections under the base path: `<name>.json` files are single-blob
    /// collections, sub-directories are sharded ones.
    pub async fn list_collections(&self) -> CollectionResult<Vec<CollectionInfo>> {
        let entries = self.engine.list(&self.base_path).await?;
        let mut found: Vec<CollectionInfo> = entries
            .into_iter()
            .filter_map(|entry| match entry.kind {
                EntryKind::Dir => Some(CollectionInfo {
                    name: entry.name,
                    layout: Layout::Sharded,
                }),
                EntryKind::File => entry.name.strip_suffix(".json").map(|name| CollectionInfo {
                    name: name.to_string(),
                    layout: Layout::SingleBlob,
                }),
                EntryKind::Other => None,
            })
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Query;
    use repodb_remote::{InMemoryRemote, RemoteOp};
    use repodb_store::RemoteStorage;
    use serde_json::{json, Value};

    fn rec(value: Value) -> repodb_types::Record {
        repodb_types::record_from_value(value).unwrap()
    }

    fn db(remote: &Arc<InMemoryRemote>) -> RepoDb {
        RepoDb::with_engine(Arc::new(RemoteStorage::new(remote.clone())), "data")
    }

    #[tokio::test]
    async fn lists_both_layouts() {
        let remote = Arc::new(InMemoryRemote::new());
        remote.seed("data/users.json", "[]");
        remote.seed("data/orders/1.json", "{}");
        remote.seed("data/README.md", "notes");
        let found = db(&remote).list_collections().await.unwrap();
        assert_eq!(
            found,
            vec![
                CollectionInfo {
                    name: "orders".into(),
                    layout: Layout::Sharded
                },
                CollectionInfo {
                    name: "users".into(),
                    layout: Layout::SingleBlob
                },
            ]
        );
    }

    #[tokio::test]
    async fn empty_store_has_no_collections() {
        let remote = Arc::new(InMemoryRemote::new());
        assert!(db(&remote).list_collections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn transaction_lands_all_collections_in_one_commit() {
        let remote = Arc::new(InMemoryRemote::new());
        let db = db(&remote);
        let history = remote.history_len();

        let tx = db.transaction();
        let mut users = db.collection_in(&tx, "users", CollectionOptions::new());
        let mut orders = db.collection_in(&tx, "orders", CollectionOptions::sharded());
        users.create(rec(json!({"id": "u1", "name": "Alice"}))).await.unwrap();
        orders.create(rec(json!({"id": "o1", "user": "u1"}))).await.unwrap();
        orders.create(rec(json!({"id": "o2", "user": "u1"}))).await.unwrap();

        // Buffered writes are readable by path inside the transaction, but
        // directory listings only show what the store holds.
        assert!(orders.find_by_id("o1").await.unwrap().is_some());
        assert_eq!(orders.count().await.unwrap(), 0);
        assert!(remote.paths().is_empty());
        assert_eq!(remote.calls(RemoteOp::PutContent), 0);

        let outcome = tx.commit("checkout").await.unwrap();
        assert_eq!(outcome.changes.len(), 3);
        assert_eq!(remote.history_len(), history + 1);
        assert_eq!(
            remote.paths(),
            vec!["data/orders/o1.json", "data/orders/o2.json", "data/users.json"]
        );

        let mut fresh = db.collection_with("orders", CollectionOptions::sharded());
        let found = fresh.find(&Query::new().where_eq("user", "u1")).await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn transaction_overwrites_changes_landed_after_its_read() {
        let remote = Arc::new(InMemoryRemote::new());
        remote.seed("data/users.json", r#"[{"id":"u1"}]"#);
        let db = db(&remote);

        let tx = db.transaction();
        let mut buffered = db.collection_in(&tx, "users", CollectionOptions::new());
        buffered.create(rec(json!({"id": "u2"}))).await.unwrap();

        let mut direct = db.collection("users");
        direct.create(rec(json!({"id": "u3"}))).await.unwrap();

        tx.commit("late batch").await.unwrap();
        let stored: Value =
            serde_json::from_slice(&remote.file("data/users.json").unwrap()).unwrap();
        assert_eq!(stored, json!([{"id": "u1"}, {"id": "u2"}]));
    }

    #[tokio::test]
    async fn failed_transaction_lands_nothing() {
        let remote = Arc::new(InMemoryRemote::new());
        let db = db(&remote);
        let tx = db.transaction();
        let mut users = db.collection_in(&tx, "users", CollectionOptions::sharded());
        for id in ["a", "b", "c"] {
            users.create(rec(json!({"id": id}))).await.unwrap();
        }
        remote.fail_next(RemoteOp::UpdateRef, 409);
        let err = tx.commit("batch").await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(remote.calls(RemoteOp::CreateTree), 1);
        assert!(remote.paths().is_empty());
    }

    #[tokio::test]
    async fn typed_handle_shares_engine() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Note {
            id: String,
            body: String,
        }

        let remote = Arc::new(InMemoryRemote::new());
        let db = db(&remote);
        let mut notes = db.typed::<Note>("notes", CollectionOptions::sharded());
        notes
            .create(&Note {
                id: "n1".into(),
                body: "hi".into(),
            })
            .await
            .unwrap();
        assert_eq!(remote.paths(), vec!["data/notes/n1.json"]);
    }
}
