//! A named record set bound to a storage engine.
//!
//! A collection is either unloaded or holds a snapshot: the record list as
//! last confirmed by the store, an index over it, and the version tokens
//! needed for the next write. Reads load the snapshot on demand. Writes go
//! to the store first and touch the snapshot only once the store confirms
//! them. A conflict drops the snapshot so stale data is never served again.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use repodb_index::SecondaryIndex;
use repodb_store::{StorageEngine, StoreError, StoreResult};
use repodb_types::{EntryKind, Record, VersionToken};
use serde_json::{Number, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CollectionError, CollectionResult};
use crate::hooks::{Hooks, Middleware, Validator};
use crate::query::Query;

const JSON_EXT: &str = ".json";

/// How a collection maps onto blobs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Layout {
    /// All records in one JSON array at `<base>/<name>.json`.
    #[default]
    SingleBlob,
    /// One JSON object per record at `<base>/<name>/<id>.json`.
    Sharded,
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleBlob => write!(f, "single-blob"),
            Self::Sharded => write!(f, "sharded"),
        }
    }
}

#[derive(Clone)]
pub struct CollectionOptions {
    pub layout: Layout,
    /// Field holding the record id.
    pub id_field: String,
    hooks: Hooks,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            layout: Layout::SingleBlob,
            id_field: "id".into(),
            hooks: Hooks::default(),
        }
    }
}

impl fmt::Debug for CollectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionOptions")
            .field("layout", &self.layout)
            .field("id_field", &self.id_field)
            .field("validator", &self.hooks.validator.is_some())
            .field("middleware", &self.hooks.middleware.len())
            .finish()
    }
}

impl CollectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sharded() -> Self {
        Self::default().with_layout(Layout::Sharded)
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    pub fn with_validator(mut self, validator: impl Validator + 'static) -> Self {
        self.hooks.validator = Some(Arc::new(validator));
        self
    }

    /// Append a middleware; middleware run in the order they were added.
    pub fn with_middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.hooks.middleware.push(Arc::new(middleware));
        self
    }
}

/// The loaded state of a collection.
#[derive(Default)]
struct Snapshot {
    records: Vec<Arc<Record>>,
    index: SecondaryIndex,
    /// Version of the collection blob (single-blob layout).
    version: Option<VersionToken>,
    /// Version of each record blob by id (sharded layout).
    versions: HashMap<String, VersionToken>,
}

impl Snapshot {
    fn position(&self, id_field: &str, id: &str) -> Option<usize> {
        self.records
            .iter()
            .position(|r| id_matches(r, id_field, id))
    }

    fn get(&self, id_field: &str, id: &str) -> Option<Arc<Record>> {
        if self.index.has_index(id_field) {
            // Numeric ids are indexed under their JSON number form.
            let mut probes = vec![Value::String(id.to_string())];
            if let Ok(n) = id.parse::<Number>() {
                probes.push(Value::Number(n));
            }
            return probes.iter().find_map(|probe| {
                self.index
                    .query(id_field, probe)
                    .and_then(|hits| hits.into_iter().next())
            });
        }
        self.position(id_field, id).map(|i| Arc::clone(&self.records[i]))
    }
}

/// One named record set.
///
/// Mutating and loading operations take `&mut self`, so one instance
/// executes its operations strictly in the order they are issued.
pub struct Collection {
    name: String,
    base_path: String,
    engine: Arc<dyn StorageEngine>,
    options: CollectionOptions,
    snapshot: Option<Snapshot>,
    version_lookups: u64,
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("base_path", &self.base_path)
            .field("options", &self.options)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl Collection {
    pub fn new(
        name: impl Into<String>,
        base_path: impl Into<String>,
        engine: Arc<dyn StorageEngine>,
        options: CollectionOptions,
    ) -> Self {
        Self {
            name: name.into(),
            base_path: base_path.into().trim_matches('/').to_string(),
            engine,
            options,
            snapshot: None,
            version_lookups: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> Layout {
        self.options.layout
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Drop the in-memory snapshot; the next read reloads from the store.
    pub fn invalidate(&mut self) {
        self.snapshot = None;
    }

    /// Extra reads made only to learn a record's version before deleting it.
    pub fn version_lookups(&self) -> u64 {
        self.version_lookups
    }

    /// Fields indexed in the current snapshot.
    pub fn indexed_fields(&self) -> Vec<String> {
        self.snapshot
            .as_ref()
            .map(|s| s.index.fields().into_iter().map(String::from).collect())
            .unwrap_or_default()
    }

    // ---- Paths ----

    fn join(&self, tail: &str) -> String {
        if self.base_path.is_empty() {
            tail.to_string()
        } else {
            format!("{}/{tail}", self.base_path)
        }
    }

    fn blob_path(&self) -> String {
        self.join(&format!("{}{JSON_EXT}", self.name))
    }

    fn shard_dir(&self) -> String {
        self.join(&self.name)
    }

    fn record_path(&self, id: &str) -> String {
        format!("{}/{id}{JSON_EXT}", self.shard_dir())
    }

    // ---- Loading ----

    async fn ensure_loaded(&mut self) -> CollectionResult<&Snapshot> {
        let snapshot = match self.snapshot.take() {
            Some(snapshot) => snapshot,
            None => self.load().await?,
        };
        Ok(self.snapshot.insert(snapshot))
    }

    async fn load(&self) -> CollectionResult<Snapshot> {
        let mut snapshot = Snapshot::default();
        match self.options.layout {
            Layout::SingleBlob => {
                let path = self.blob_path();
                if let Some(blob) = self.engine.read(&path).await? {
                    for record in parse_list(&blob.data, &path)? {
                        snapshot
                            .records
                            .push(Arc::new(self.options.hooks.loaded(record)?));
                    }
                    snapshot.version = Some(blob.version);
                }
            }
            Layout::Sharded => {
                let entries = self.engine.list(&self.shard_dir()).await?;
                for entry in entries {
                    if entry.kind != EntryKind::File || !entry.name.ends_with(JSON_EXT) {
                        continue;
                    }
                    let Some(blob) = self.engine.read(&entry.path).await? else {
                        debug!(path = %entry.path, "record vanished during load");
                        continue;
                    };
                    let record = self.options.hooks.loaded(parse_record(&blob.data, &entry.path)?)?;
                    let id = match record_id(&record, &self.options.id_field) {
                        Ok(id) => id,
                        Err(_) => entry.name.trim_end_matches(JSON_EXT).to_string(),
                    };
                    snapshot.versions.insert(id, blob.version);
                    snapshot.records.push(Arc::new(record));
                }
            }
        }

        let fields: Vec<String> = snapshot
            .records
            .first()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default();
        snapshot.index.build(&snapshot.records, fields);
        debug!(
            collection = %self.name,
            layout = %self.options.layout,
            records = snapshot.records.len(),
            "collection loaded"
        );
        Ok(snapshot)
    }

    /// Drop the snapshot if `result` is a conflict, then pass it on.
    fn settle<T>(&mut self, result: StoreResult<T>) -> CollectionResult<T> {
        match result {
            Err(err) if err.is_conflict() => {
                warn!(collection = %self.name, error = %err, "conflict, dropping snapshot");
                self.snapshot = None;
                Err(err.into())
            }
            other => other.map_err(CollectionError::from),
        }
    }

    // ---- Reads ----

    /// Records matching `query`, loading the collection first if needed.
    ///
    /// A query that is exactly one equality filter on an indexed field is
    /// answered from the index. Either way results keep snapshot order
    /// before sorting and pagination.
    pub async fn find(&mut self, query: &Query) -> CollectionResult<Vec<Record>> {
        let snapshot = self.ensure_loaded().await?;
        if let Some((field, value)) = query.index_probe() {
            if let Some(hits) = snapshot.index.query(field, value) {
                debug!(field, hits = hits.len(), "index lookup");
                // Buckets drift from snapshot order as records are replaced.
                let hits: HashSet<*const Record> = hits.iter().map(Arc::as_ptr).collect();
                let refs = snapshot
                    .records
                    .iter()
                    .filter(|r| hits.contains(&Arc::as_ptr(r)))
                    .map(|r| &**r)
                    .collect();
                return Ok(query.arrange(refs).into_iter().cloned().collect());
            }
        }
        Ok(query
            .apply(snapshot.records.iter().map(|r| &**r))
            .into_iter()
            .cloned()
            .collect())
    }

    /// Records for which `predicate` holds, bypassing filters, sorting and
    /// pagination.
    pub async fn find_where<P>(&mut self, predicate: P) -> CollectionResult<Vec<Record>>
    where
        P: Fn(&Record) -> bool,
    {
        let snapshot = self.ensure_loaded().await?;
        Ok(snapshot
            .records
            .iter()
            .filter(|r| predicate(r))
            .map(|r| Record::clone(r))
            .collect())
    }

    /// The record with `id`, if any.
    ///
    /// For an unloaded sharded collection this reads the one record blob
    /// directly, without listing the directory or loading the collection.
    pub async fn find_by_id(&mut self, id: &str) -> CollectionResult<Option<Record>> {
        if self.snapshot.is_none() && self.options.layout == Layout::Sharded {
            return Ok(self.read_shard(id).await?.map(|(record, _)| record));
        }
        let id_field = self.options.id_field.clone();
        let snapshot = self.ensure_loaded().await?;
        Ok(snapshot.get(&id_field, id).map(|r| Record::clone(&r)))
    }

    /// Number of records, loading the collection first if needed.
    pub async fn count(&mut self) -> CollectionResult<usize> {
        Ok(self.ensure_loaded().await?.records.len())
    }

    async fn read_shard(&self, id: &str) -> CollectionResult<Option<(Record, VersionToken)>> {
        check_id(id)?;
        let path = self.record_path(id);
        let Some(blob) = self.engine.read(&path).await? else {
            return Ok(None);
        };
        let record = self.options.hooks.loaded(parse_record(&blob.data, &path)?)?;
        Ok(Some((record, blob.version)))
    }

    // ---- Writes ----

    /// Validate and persist a new record, returning it as stored.
    ///
    /// A record without an id gets a freshly generated one.
    pub async fn create(&mut self, mut record: Record) -> CollectionResult<Record> {
        let id_field = self.options.id_field.clone();
        if matches!(record.get(&id_field), None | Some(Value::Null)) {
            record.insert(id_field.clone(), Value::String(Uuid::now_v7().to_string()));
        }
        let record = self.options.hooks.prepare(record)?;
        let id = record_id(&record, &id_field)?;
        check_id(&id)?;

        match self.options.layout {
            Layout::SingleBlob => self.create_in_blob(record, id).await,
            Layout::Sharded => self.create_shard(record, id).await,
        }
    }

    async fn create_in_blob(&mut self, record: Record, id: String) -> CollectionResult<Record> {
        let path = self.blob_path();
        let message = format!("Create {id} in {}", self.name);
        let id_field = self.options.id_field.as_str();

        let (content, expected) = match &self.snapshot {
            Some(snapshot) => {
                if snapshot.position(id_field, &id).is_some() {
                    return Err(self.duplicate(id));
                }
                let mut list: Vec<&Record> = snapshot.records.iter().map(|r| &**r).collect();
                list.push(&record);
                (encode(&list)?, snapshot.version.clone())
            }
            None => {
                let (mut list, version) = match self.engine.read(&path).await? {
                    Some(blob) => (parse_list(&blob.data, &path)?, Some(blob.version)),
                    None => (Vec::new(), None),
                };
                if list.iter().any(|r| id_matches(r, id_field, &id)) {
                    return Err(self.duplicate(id));
                }
                list.push(record.clone());
                (encode(&list)?, version)
            }
        };

        let result = self
            .engine
            .write(&path, content, &message, expected.as_ref())
            .await;
        let version = self.settle(result)?;
        if let Some(snapshot) = self.snapshot.as_mut() {
            let stored = Arc::new(record.clone());
            snapshot.index.add(&stored);
            snapshot.records.push(stored);
            snapshot.version = Some(version);
        }
        debug!(collection = %self.name, id = %id, "record created");
        Ok(record)
    }

    async fn create_shard(&mut self, record: Record, id: String) -> CollectionResult<Record> {
        let path = self.record_path(&id);
        let taken = match &self.snapshot {
            Some(snapshot) => snapshot.versions.contains_key(&id)
                || snapshot.position(&self.options.id_field, &id).is_some(),
            None => self.engine.exists(&path).await?,
        };
        if taken {
            return Err(self.duplicate(id));
        }

        let message = format!("Create {id} in {}", self.name);
        let result = self
            .engine
            .write(&path, encode(&record)?, &message, None)
            .await;
        let version = self.settle(result)?;
        if let Some(snapshot) = self.snapshot.as_mut() {
            let stored = Arc::new(record.clone());
            snapshot.index.add(&stored);
            snapshot.records.push(stored);
            snapshot.versions.insert(id.clone(), version);
        }
        debug!(collection = %self.name, id = %id, "record created");
        Ok(record)
    }

    /// Shallow-merge `patch` into the record with `id` and persist it.
    ///
    /// The id field itself cannot be changed.
    pub async fn update(&mut self, id: &str, patch: Record) -> CollectionResult<Record> {
        let id_field = self.options.id_field.clone();
        let (current, known_version) = self.locate(id).await?.ok_or_else(|| CollectionError::NotFound {
            collection: self.name.clone(),
            id: id.to_string(),
        })?;

        let mut merged = Record::clone(&current);
        for (key, value) in patch {
            if key != id_field {
                merged.insert(key, value);
            }
        }
        let updated = self.options.hooks.prepare(merged)?;
        let message = format!("Update {id} in {}", self.name);

        let (path, content, expected) = match self.options.layout {
            Layout::SingleBlob => {
                let snapshot = self.snapshot.as_ref().ok_or_else(|| {
                    CollectionError::InvalidRecord("single-blob update without snapshot".into())
                })?;
                let list: Vec<&Record> = snapshot
                    .records
                    .iter()
                    .map(|r| if Arc::ptr_eq(r, &current) { &updated } else { &**r })
                    .collect();
                (self.blob_path(), encode(&list)?, snapshot.version.clone())
            }
            Layout::Sharded => (self.record_path(id), encode(&updated)?, known_version),
        };

        let result = self
            .engine
            .write(&path, content, &message, expected.as_ref())
            .await;
        let version = self.settle(result)?;
        let layout = self.options.layout;
        if let Some(snapshot) = self.snapshot.as_mut() {
            let stored = Arc::new(updated.clone());
            if let Some(slot) = snapshot.records.iter_mut().find(|r| Arc::ptr_eq(r, &current)) {
                *slot = Arc::clone(&stored);
            }
            snapshot.index.update(&current, &stored);
            match layout {
                Layout::SingleBlob => snapshot.version = Some(version),
                Layout::Sharded => {
                    snapshot.versions.insert(id.to_string(), version);
                }
            }
        }
        debug!(collection = %self.name, id = %id, "record updated");
        Ok(updated)
    }

    /// Remove the record with `id`. Returns `false` if there was none.
    pub async fn delete(&mut self, id: &str) -> CollectionResult<bool> {
        let message = format!("Delete {id} from {}", self.name);
        let removed = match self.options.layout {
            Layout::SingleBlob => self.delete_from_blob(id, &message).await?,
            Layout::Sharded => self.delete_shard(id, &message).await?,
        };
        if removed {
            debug!(collection = %self.name, id = %id, "record deleted");
        }
        Ok(removed)
    }

    async fn delete_from_blob(&mut self, id: &str, message: &str) -> CollectionResult<bool> {
        let Some((current, _)) = self.locate(id).await? else {
            return Ok(false);
        };
        let snapshot = self.snapshot.as_ref().ok_or_else(|| {
            CollectionError::InvalidRecord("single-blob delete without snapshot".into())
        })?;
        let list: Vec<&Record> = snapshot
            .records
            .iter()
            .filter(|r| !Arc::ptr_eq(r, &current))
            .map(|r| &**r)
            .collect();
        let content = encode(&list)?;
        let expected = snapshot.version.clone();

        let result = self
            .engine
            .write(&self.blob_path(), content, message, expected.as_ref())
            .await;
        let version = self.settle(result)?;
        if let Some(snapshot) = self.snapshot.as_mut() {
            snapshot.records.retain(|r| !Arc::ptr_eq(r, &current));
            snapshot.index.remove(&current);
            snapshot.version = Some(version);
        }
        Ok(true)
    }

    async fn delete_shard(&mut self, id: &str, message: &str) -> CollectionResult<bool> {
        check_id(id)?;
        let path = self.record_path(id);
        let known = match &self.snapshot {
            Some(snapshot) => {
                if snapshot.get(&self.options.id_field, id).is_none() {
                    return Ok(false);
                }
                snapshot.versions.get(id).cloned()
            }
            None => None,
        };

        let version = match known {
            Some(version) => version,
            None => {
                self.version_lookups += 1;
                debug!(path = %path, lookups = self.version_lookups, "looking up version before delete");
                match self.engine.read(&path).await? {
                    Some(blob) => blob.version,
                    None => return Ok(false),
                }
            }
        };

        let result = match self.engine.delete(&path, message, &version).await {
            Err(StoreError::NotFound { .. }) => {
                self.snapshot = None;
                return Ok(false);
            }
            other => other,
        };
        self.settle(result)?;
        if let Some(snapshot) = self.snapshot.as_mut() {
            if let Some(i) = snapshot.position(&self.options.id_field, id) {
                let gone = snapshot.records.remove(i);
                snapshot.index.remove(&gone);
            }
            snapshot.versions.remove(id);
        }
        Ok(true)
    }

    /// Find the record with `id` and the version its next write needs.
    ///
    /// Unloaded sharded collections read the one record blob; everything
    /// else goes through the snapshot.
    async fn locate(&mut self, id: &str) -> CollectionResult<Option<(Arc<Record>, Option<VersionToken>)>> {
        if self.snapshot.is_none() && self.options.layout == Layout::Sharded {
            return Ok(self
                .read_shard(id)
                .await?
                .map(|(record, version)| (Arc::new(record), Some(version))));
        }
        let id_field = self.options.id_field.clone();
        let layout = self.options.layout;
        let snapshot = self.ensure_loaded().await?;
        let Some(record) = snapshot.get(&id_field, id) else {
            return Ok(None);
        };
        let version = match layout {
            Layout::SingleBlob => snapshot.version.clone(),
            Layout::Sharded => snapshot.versions.get(id).cloned(),
        };
        Ok(Some((record, version)))
    }

    fn duplicate(&self, id: String) -> CollectionError {
        CollectionError::Duplicate {
            collection: self.name.clone(),
            id,
        }
    }
}

/// String form of a record's id: strings as-is, numbers in JSON form.
pub(crate) fn record_id(record: &Record, id_field: &str) -> CollectionResult<String> {
    match record.get(id_field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(CollectionError::MissingId {
            field: id_field.to_string(),
        }),
    }
}

fn id_matches(record: &Record, id_field: &str, id: &str) -> bool {
    match record.get(id_field) {
        Some(Value::String(s)) => s == id,
        Some(Value::Number(n)) => n.to_string() == id,
        _ => false,
    }
}

/// Ids become path components and must stay within one.
fn check_id(id: &str) -> CollectionResult<()> {
    if id.is_empty() || id == "." || id == ".." || id.contains('/') || id.contains('\\') {
        return Err(CollectionError::InvalidId(id.to_string()));
    }
    Ok(())
}

fn encode<T: serde::Serialize + ?Sized>(value: &T) -> CollectionResult<Bytes> {
    serde_json::to_vec_pretty(value)
        .map(Bytes::from)
        .map_err(|e| CollectionError::InvalidRecord(e.to_string()))
}

fn parse_list(data: &[u8], path: &str) -> CollectionResult<Vec<Record>> {
    serde_json::from_slice(data)
        .map_err(|e| CollectionError::InvalidRecord(format!("{path}: {e}")))
}

fn parse_record(data: &[u8], path: &str) -> CollectionResult<Record> {
    serde_json::from_slice(data)
        .map_err(|e| CollectionError::InvalidRecord(format!("{path}: {e}")))
}
