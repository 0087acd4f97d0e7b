//! Per-field equality index over shared records.
//!
//! Buckets hold `Arc<Record>` handles: membership is by identity, so two
//! structurally equal records are still two distinct members. Records that
//! lack a field are simply absent from that field's index.

use std::collections::HashMap;
use std::sync::Arc;

use repodb_types::Record;
use serde_json::Value;
use tracing::debug;

use crate::key::IndexKey;

type Buckets = HashMap<IndexKey, Vec<Arc<Record>>>;

#[derive(Clone, Default)]
pub struct SecondaryIndex {
    fields: HashMap<String, Buckets>,
}

impl std::fmt::Debug for SecondaryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut fields: Vec<(&str, usize)> = self
            .fields
            .iter()
            .map(|(name, buckets)| (name.as_str(), buckets.len()))
            .collect();
        fields.sort();
        f.debug_struct("SecondaryIndex")
            .field("fields", &fields)
            .finish()
    }
}

impl SecondaryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every index with fresh ones over `records` for `fields`.
    pub fn build<I, S>(&mut self, records: &[Arc<Record>], fields: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.clear();
        for field in fields {
            let field = field.into();
            let mut buckets = Buckets::new();
            for record in records {
                if let Some(value) = record.get(&field) {
                    buckets
                        .entry(IndexKey::of(value))
                        .or_default()
                        .push(Arc::clone(record));
                }
            }
            self.fields.insert(field, buckets);
        }
        debug!(
            fields = self.fields.len(),
            records = records.len(),
            "index built"
        );
    }

    /// Records whose `field` equals `value`.
    ///
    /// `None` means `field` is not indexed and the caller must scan;
    /// `Some(vec![])` means it is indexed and nothing matches.
    pub fn query(&self, field: &str, value: &Value) -> Option<Vec<Arc<Record>>> {
        let buckets = self.fields.get(field)?;
        Some(
            buckets
                .get(&IndexKey::of(value))
                .cloned()
                .unwrap_or_default(),
        )
    }

    pub fn add(&mut self, record: &Arc<Record>) {
        for (field, buckets) in &mut self.fields {
            if let Some(value) = record.get(field) {
                buckets
                    .entry(IndexKey::of(value))
                    .or_default()
                    .push(Arc::clone(record));
            }
        }
    }

    pub fn remove(&mut self, record: &Arc<Record>) {
        for (field, buckets) in &mut self.fields {
            let Some(value) = record.get(field) else {
                continue;
            };
            let key = IndexKey::of(value);
            if let Some(bucket) = buckets.get_mut(&key) {
                bucket.retain(|member| !Arc::ptr_eq(member, record));
                if bucket.is_empty() {
                    buckets.remove(&key);
                }
            }
        }
    }

    pub fn update(&mut self, old: &Arc<Record>, new: &Arc<Record>) {
        self.remove(old);
        self.add(new);
    }

    pub fn has_index(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Indexed field names, sorted.
    pub fn fields(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.fields.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }
}
