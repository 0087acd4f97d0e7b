//! Statically-shaped access to a [`Collection`].

use std::marker::PhantomData;

use repodb_types::{record_from_value, Record};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::collection::Collection;
use crate::error::{CollectionError, CollectionResult};
use crate::query::Query;

/// A [`Collection`] whose records convert to and from `T` through serde.
///
/// Hooks, indexes and conflict handling are those of the wrapped
/// collection; `Typed` only converts at the boundary.
pub struct Typed<T> {
    inner: Collection,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Typed<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(inner: Collection) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub fn collection(&mut self) -> &mut Collection {
        &mut self.inner
    }

    pub fn into_inner(self) -> Collection {
        self.inner
    }

    pub async fn create(&mut self, value: &T) -> CollectionResult<T> {
        let record = self.inner.create(to_record(value)?).await?;
        from_record(record)
    }

    pub async fn find(&mut self, query: &Query) -> CollectionResult<Vec<T>> {
        self.inner
            .find(query)
            .await?
            .into_iter()
            .map(from_record)
            .collect()
    }

    pub async fn find_by_id(&mut self, id: &str) -> CollectionResult<Option<T>> {
        self.inner.find_by_id(id).await?.map(from_record).transpose()
    }

    /// Apply a partial update; `patch` must serialize to a JSON object.
    pub async fn update<P: Serialize>(&mut self, id: &str, patch: &P) -> CollectionResult<T> {
        let record = self.inner.update(id, to_record(patch)?).await?;
        from_record(record)
    }

    pub async fn delete(&mut self, id: &str) -> CollectionResult<bool> {
        self.inner.delete(id).await
    }
}

fn to_record<V: Serialize + ?Sized>(value: &V) -> CollectionResult<Record> {
    let value =
        serde_json::to_value(value).map_err(|e| CollectionError::InvalidRecord(e.to_string()))?;
    record_from_value(value).map_err(|e| CollectionError::InvalidRecord(e.to_string()))
}

fn from_record<T: DeserializeOwned>(record: Record) -> CollectionResult<T> {
    serde_json::from_value(record.into())
        .map_err(|e| CollectionError::InvalidRecord(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::CollectionOptions;
    use repodb_remote::InMemoryRemote;
    use repodb_store::{RemoteStorage, StorageEngine};
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct User {
        id: String,
        name: String,
        #[serde(default)]
        admin: bool,
    }

    fn typed() -> Typed<User> {
        let remote = Arc::new(InMemoryRemote::new());
        let engine: Arc<dyn StorageEngine> = Arc::new(RemoteStorage::new(remote));
        Typed::new(Collection::new("users", "data", engine, CollectionOptions::new()))
    }

    #[tokio::test]
    async fn typed_round_trip() {
        let mut users = typed();
        let alice = User {
            id: "1".into(),
            name: "Alice".into(),
            admin: false,
        };
        assert_eq!(users.create(&alice).await.unwrap(), alice);

        let promoted = users.update("1", &json!({"admin": true})).await.unwrap();
        assert!(promoted.admin);

        let admins = users
            .find(&Query::new().where_eq("admin", true))
            .await
            .unwrap();
        assert_eq!(admins, vec![promoted.clone()]);
        assert_eq!(users.find_by_id("1").await.unwrap(), Some(promoted));
        assert!(users.delete("1").await.unwrap());
        assert!(users.find_by_id("1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn non_object_patch_is_rejected() {
        let mut users = typed();
        let err = users.update("1", &42).await.unwrap_err();
        assert!(matches!(err, CollectionError::InvalidRecord(_)));
    }

    #[tokio::test]
    async fn shape_mismatch_is_reported() {
        let mut users = typed();
        users
            .collection()
            .create(repodb_types::record_from_value(json!({"id": "2"})).unwrap())
            .await
            .unwrap();
        let err = users.find(&Query::new()).await.unwrap_err();
        assert!(matches!(err, CollectionError::InvalidRecord(_)));
    }
}
