use crate::domain::ports::{DocumentStore, KeyValueStore};
use crate::utils::error::{Result, StackError};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process `KeyValueStore` for tests and `sai-backend --memory-store`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    strings: Mutex<HashMap<String, Entry>>,
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        let mut strings = self.strings.lock().unwrap_or_else(|e| e.into_inner());
        strings.retain(|_, entry| entry.is_live(now));
        strings.len() + self.hashes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let mut strings = self.strings.lock().unwrap_or_else(|e| e.into_inner());
        match strings.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                strings.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.hashes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        self.strings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let string = self
            .strings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
            .is_some_and(|entry| entry.is_live(now));
        let hash = self
            .hashes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
            .is_some();
        Ok(string || hash)
    }

    async fn hset(&self, name: &str, field: &str, value: &str) -> Result<()> {
        self.hashes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(name.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hget(&self, name: &str, field: &str) -> Result<Option<String>> {
        Ok(self
            .hashes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .and_then(|hash| hash.get(field).cloned()))
    }

    async fn hdel(&self, name: &str, field: &str) -> Result<bool> {
        let mut hashes = self.hashes.lock().unwrap_or_else(|e| e.into_inner());
        let Some(hash) = hashes.get_mut(name) else {
            return Ok(false);
        };
        let removed = hash.remove(field).is_some();
        if hash.is_empty() {
            hashes.remove(name);
        }
        Ok(removed)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let mut strings = self.strings.lock().unwrap_or_else(|e| e.into_inner());
        strings.retain(|_, entry| entry.is_live(now));
        Ok(strings
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

type Collection = BTreeMap<String, Map<String, Value>>;

/// In-process `DocumentStore`; ids are sequential 24-digit hex strings.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: Mutex<HashMap<String, Collection>>,
    next_id: AtomicU64,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_collection<T>(&self, name: &str, f: impl FnOnce(&mut Collection) -> T) -> T {
        let mut collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        f(collections.entry(name.to_string()).or_default())
    }
}

fn into_object(what: &str, value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(StackError::validation(format!(
            "{} must be a JSON object, got {}",
            what, other
        ))),
    }
}

fn matches_filter(document: &Map<String, Value>, filter: &Map<String, Value>) -> bool {
    filter
        .iter()
        .all(|(field, expected)| document.get(field) == Some(expected))
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn insert_document(&self, collection: &str, document: Value) -> Result<String> {
        let mut document = into_object("document", document)?;
        let id = match document.get("_id") {
            Some(Value::String(id)) => id.clone(),
            _ => format!("{:024x}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
        };
        document.insert("_id".to_string(), Value::String(id.clone()));

        self.with_collection(collection, |documents| {
            if documents.contains_key(&id) {
                return Err(StackError::validation(format!(
                    "duplicate _id {} in collection '{}'",
                    id, collection
                )));
            }
            documents.insert(id.clone(), document);
            Ok(())
        })?;
        Ok(id)
    }

    async fn find_document(&self, collection: &str, filter: Value) -> Result<Option<Value>> {
        Ok(self
            .find_documents(collection, filter, Some(1))
            .await?
            .into_iter()
            .next())
    }

    async fn find_documents(
        &self,
        collection: &str,
        filter: Value,
        limit: Option<u32>,
    ) -> Result<Vec<Value>> {
        let filter = into_object("filter", filter)?;
        let limit = limit.map_or(usize::MAX, |n| n as usize);
        Ok(self.with_collection(collection, |documents| {
            documents
                .values()
                .filter(|document| matches_filter(document, &filter))
                .take(limit)
                .map(|document| Value::Object(document.clone()))
                .collect()
        }))
    }

    async fn update_document(&self, collection: &str, id: &str, changes: Value) -> Result<bool> {
        let changes = into_object("update", changes)?;
        Ok(self.with_collection(collection, |documents| {
            let Some(document) = documents.get_mut(id) else {
                return false;
            };
            let mut changed = false;
            for (field, value) in changes.into_iter().filter(|(field, _)| field != "_id") {
                if document.get(&field) != Some(&value) {
                    document.insert(field, value);
                    changed = true;
                }
            }
            changed
        }))
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<bool> {
        Ok(self.with_collection(collection, |documents| documents.remove(id).is_some()))
    }
}
