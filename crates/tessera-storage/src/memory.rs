//! In-memory storage backend for testing.
//!
//! Hash records live in a `BTreeMap` behind a `RwLock`. Nothing is
//! persistent — all data is lost when the process exits. Expiry is applied
//! lazily: an expired key reads as absent but is only physically removed
//! when overwritten.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::RwLock;

use crate::{KeyStream, StorageBackend, StorageError};

#[derive(Debug, Clone, Default)]
struct Record {
    fields: HashMap<String, Vec<u8>>,
    expire_at: Option<i64>,
}

impl Record {
    fn is_live(&self, now: i64) -> bool {
        self.expire_at.map_or(true, |at| now < at)
    }
}

/// An in-memory storage backend backed by a `BTreeMap` of hash records.
///
/// Thread-safe and async-compatible. Scans walk keys in sorted order,
/// matching against the `*` wildcard only — enough for the catch-all
/// patterns the token store produces.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<String, Record>>>,
}

impl MemoryBackend {
    /// Create a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Match `s` against a glob pattern supporting only the `*` wildcard.
fn wildcard_match(pattern: &str, s: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == s;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let Some(mut rest) = s.strip_prefix(parts[0]) else {
        return false;
    };

    let last = parts[parts.len() - 1];
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match rest.find(part) {
            Some(i) => rest = &rest[i + part.len()..],
            None => return false,
        }
    }

    rest.len() >= last.len() && rest.ends_with(last)
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn put_fields(
        &self,
        key: &str,
        fields: &[(&str, Vec<u8>)],
        expire_at: Option<i64>,
    ) -> Result<(), StorageError> {
        let mut data = self.data.write().await;
        let entry = data.entry(key.to_owned()).or_default();
        // An expired record is a dead key; writing starts a fresh one.
        if !entry.is_live(now()) {
            *entry = Record::default();
        }
        for (field, value) in fields {
            entry.fields.insert((*field).to_owned(), value.clone());
        }
        if expire_at.is_some() {
            entry.expire_at = expire_at;
        }
        Ok(())
    }

    async fn get_fields(
        &self,
        key: &str,
        fields: &[&str],
    ) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
        let data = self.data.read().await;
        let record = data.get(key).filter(|r| r.is_live(now()));
        Ok(fields
            .iter()
            .map(|f| record.and_then(|r| r.fields.get(*f).cloned()))
            .collect())
    }

    async fn get_field(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let data = self.data.read().await;
        Ok(data
            .get(key)
            .filter(|r| r.is_live(now()))
            .and_then(|r| r.fields.get(field).cloned()))
    }

    async fn put_field(&self, key: &str, field: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.put_fields(key, &[(field, value)], None).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let data = self.data.read().await;
        Ok(data.get(key).is_some_and(|r| r.is_live(now())))
    }

    async fn delete(&self, key: &str) -> Result<u64, StorageError> {
        let mut data = self.data.write().await;
        match data.remove(key) {
            Some(r) if r.is_live(now()) => Ok(1),
            _ => Ok(0),
        }
    }

    async fn scan(&self, pattern: &str, _page_size: u64) -> Result<KeyStream, StorageError> {
        let data = self.data.read().await;
        let ts = now();
        let keys: Vec<String> = data
            .iter()
            .filter(|(k, r)| r.is_live(ts) && wildcard_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect();
        Ok(futures::stream::iter(keys.into_iter().map(Ok)).boxed())
    }
}
