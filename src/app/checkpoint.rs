//! Named snapshots of JSON state kept in the key-value store.

use crate::app::connect::retry;
use crate::app::memory::MemoryManager;
use crate::domain::ports::KeyValueStore;
use crate::utils::error::{Result, StackError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub const CHECKPOINT_PREFIX: &str = "checkpoint:";
pub const CACHE_TTL: Duration = Duration::from_secs(300);
const SAVE_ATTEMPTS: u32 = 3;
const SAVE_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub state_data: Value,
}

fn key_of(name: &str) -> String {
    format!("{}{}", CHECKPOINT_PREFIX, name)
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(StackError::validation(
            "checkpoint name must be a non-empty string",
        ));
    }
    Ok(())
}

pub struct Checkpointer {
    memory: MemoryManager<dyn KeyValueStore>,
    cache: Mutex<HashMap<String, (Instant, Checkpoint)>>,
    cache_ttl: Duration,
}

impl Checkpointer {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            memory: MemoryManager::new(store),
            cache: Mutex::new(HashMap::new()),
            cache_ttl: CACHE_TTL,
        }
    }

    pub fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    fn cached(&self, name: &str) -> Option<Checkpoint> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let ttl = self.cache_ttl;
        cache.retain(|_, (stored, _)| stored.elapsed() < ttl);
        cache.get(name).map(|(_, checkpoint)| checkpoint.clone())
    }

    fn remember(&self, checkpoint: &Checkpoint) {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(checkpoint.name.clone(), (Instant::now(), checkpoint.clone()));
    }

    fn forget(&self, name: &str) {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
    }

    /// Stores `state_data` under `name`, replacing any earlier checkpoint.
    pub async fn create(&self, name: &str, state_data: Value) -> Result<Checkpoint> {
        validate_name(name)?;
        let checkpoint = Checkpoint {
            name: name.to_string(),
            timestamp: Utc::now(),
            state_data,
        };
        let serialized = serde_json::to_string(&checkpoint)?;
        let key = key_of(name);

        retry("checkpoint store", SAVE_ATTEMPTS, SAVE_BACKOFF, |_| {
            self.memory.store_data(&key, &serialized, None)
        })
        .await?;

        self.remember(&checkpoint);
        tracing::info!("📸 Checkpoint '{}' created", name);
        Ok(checkpoint)
    }

    pub async fn load(&self, name: &str) -> Result<Option<Checkpoint>> {
        validate_name(name)?;
        if let Some(checkpoint) = self.cached(name) {
            tracing::debug!("Checkpoint '{}' served from cache", name);
            return Ok(Some(checkpoint));
        }

        let Some(serialized) = self.memory.retrieve_data(&key_of(name)).await? else {
            tracing::warn!("⚠️ Checkpoint '{}' not found", name);
            return Ok(None);
        };
        let checkpoint: Checkpoint = serde_json::from_str(&serialized).map_err(|e| {
            tracing::error!("❌ Checkpoint '{}' is corrupt: {}", name, e);
            StackError::SerializationError(e)
        })?;

        self.remember(&checkpoint);
        tracing::info!("📂 Checkpoint '{}' loaded", name);
        Ok(Some(checkpoint))
    }

    /// Returns `true` when the checkpoint existed.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        self.forget(name);
        let deleted = self.memory.delete_data(&key_of(name)).await?;
        if deleted {
            tracing::info!("🗑️ Checkpoint '{}' deleted", name);
        }
        Ok(deleted)
    }

    /// Checkpoint names in sorted order; pages are numbered from 1.
    pub async fn list(&self, page_size: usize, page_number: usize) -> Result<Vec<String>> {
        if page_size == 0 || page_number == 0 {
            return Err(StackError::validation(
                "page size and page number must be at least 1",
            ));
        }
        let names: Vec<String> = self
            .memory
            .list_keys(CHECKPOINT_PREFIX)
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(CHECKPOINT_PREFIX).map(str::to_string))
            .collect();

        Ok(names
            .into_iter()
            .skip(page_size.saturating_mul(page_number - 1))
            .take(page_size)
            .collect())
    }
}

pub async fn save_to_file(checkpoint: &Checkpoint, path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(checkpoint)?;
    tokio::fs::write(path, content).await?;
    tracing::info!("💾 Checkpoint '{}' written to {}", checkpoint.name, path.display());
    Ok(())
}

pub async fn load_from_file(path: &Path) -> Result<Checkpoint> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use serde_json::json;

    fn checkpointer() -> (Arc<dyn KeyValueStore>, Checkpointer) {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let checkpointer = Checkpointer::new(Arc::clone(&store));
        (store, checkpointer)
    }

    #[tokio::test]
    async fn test_create_load_delete() {
        let (store, checkpoints) = checkpointer();

        let created = checkpoints
            .create("epoch-3", json!({"agents": 12, "mood": "curious"}))
            .await
            .unwrap();
        assert!(store.get("checkpoint:epoch-3").await.unwrap().is_some());

        let loaded = checkpoints.load("epoch-3").await.unwrap().unwrap();
        assert_eq!(loaded, created);
        assert_eq!(loaded.state_data["agents"], 12);

        assert!(checkpoints.delete("epoch-3").await.unwrap());
        assert_eq!(checkpoints.load("epoch-3").await.unwrap(), None);
        assert!(!checkpoints.delete("epoch-3").await.unwrap());
        assert!(checkpoints.create(" ", json!({})).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_expires() {
        let (store, checkpoints) = checkpointer();
        checkpoints.create("warm", json!([1, 2, 3])).await.unwrap();

        // Removed behind the cache's back.
        store.delete("checkpoint:warm").await.unwrap();
        assert!(checkpoints.load("warm").await.unwrap().is_some());

        tokio::time::advance(CACHE_TTL + Duration::from_secs(1)).await;
        assert_eq!(checkpoints.load("warm").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint() {
        let (store, checkpoints) = checkpointer();
        store
            .set("checkpoint:broken", "{not json", None)
            .await
            .unwrap();
        assert!(matches!(
            checkpoints.load("broken").await,
            Err(StackError::SerializationError(_))
        ));
    }

    #[tokio::test]
    async fn test_list_is_paginated() {
        let (store, checkpoints) = checkpointer();
        for name in ["c", "a", "e", "b", "d"] {
            checkpoints.create(name, json!({"name": name})).await.unwrap();
        }
        store.set("unrelated", "x", None).await.unwrap();

        assert_eq!(checkpoints.list(2, 1).await.unwrap(), vec!["a", "b"]);
        assert_eq!(checkpoints.list(2, 3).await.unwrap(), vec!["e"]);
        assert!(checkpoints.list(2, 4).await.unwrap().is_empty());
        assert!(checkpoints.list(0, 1).await.is_err());
        assert!(checkpoints.list(10, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let (_, checkpoints) = checkpointer();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("epoch.json");

        let checkpoint = checkpoints
            .create("epoch", json!({"step": 7}))
            .await
            .unwrap();
        save_to_file(&checkpoint, &path).await.unwrap();
        assert_eq!(load_from_file(&path).await.unwrap(), checkpoint);

        assert!(load_from_file(&dir.path().join("missing.json")).await.is_err());
    }
}
