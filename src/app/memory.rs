use crate::domain::ports::KeyValueStore;
use crate::utils::error::{Result, StackError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

fn require(name: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        tracing::error!("Invalid {}: {} must be a non-empty string", name, name);
        return Err(StackError::validation(format!("{} must be a non-empty string", name)));
    }
    Ok(())
}

/// Validated, time-bounded access to the key-value store.
pub struct MemoryManager<S: KeyValueStore + ?Sized> {
    store: Arc<S>,
    timeout: Duration,
}

impl<S: KeyValueStore + ?Sized> Clone for MemoryManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            timeout: self.timeout,
        }
    }
}

impl<S: KeyValueStore + ?Sized> MemoryManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            timeout: OPERATION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn bounded<T>(&self, operation: String, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| StackError::TimeoutError { operation })?
    }

    pub async fn store_data(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        require("key", key)?;
        require("value", value)?;
        self.bounded(format!("store '{}'", key), self.store.set(key, value, ttl))
            .await?;
        tracing::debug!("💾 Data stored with key: {}", key);
        Ok(())
    }

    pub async fn retrieve_data(&self, key: &str) -> Result<Option<String>> {
        require("key", key)?;
        let value = self
            .bounded(format!("retrieve '{}'", key), self.store.get(key))
            .await?;
        if value.is_none() {
            tracing::debug!("No data found for key: {}", key);
        }
        Ok(value)
    }

    /// Returns `true` when something was deleted.
    pub async fn delete_data(&self, key: &str) -> Result<bool> {
        require("key", key)?;
        self.bounded(format!("delete '{}'", key), self.store.delete(key))
            .await
    }

    pub async fn store_hash_data(&self, name: &str, field: &str, value: &str) -> Result<()> {
        require("name", name)?;
        require("field", field)?;
        require("value", value)?;
        self.bounded(
            format!("store field '{}' of '{}'", field, name),
            self.store.hset(name, field, value),
        )
        .await
    }

    pub async fn retrieve_hash_data(&self, name: &str, field: &str) -> Result<Option<String>> {
        require("name", name)?;
        require("field", field)?;
        self.bounded(
            format!("retrieve field '{}' of '{}'", field, name),
            self.store.hget(name, field),
        )
        .await
    }

    pub async fn delete_hash_data(&self, name: &str, field: &str) -> Result<bool> {
        require("name", name)?;
        require("field", field)?;
        self.bounded(
            format!("delete field '{}' of '{}'", field, name),
            self.store.hdel(name, field),
        )
        .await
    }

    /// Keys starting with `prefix`, sorted.
    pub async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = self
            .bounded(
                format!("list keys under '{}'", prefix),
                self.store.keys_with_prefix(prefix),
            )
            .await?;
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use async_trait::async_trait;

    struct StalledStore;

    #[async_trait]
    impl KeyValueStore for StalledStore {
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            std::future::pending().await
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> Result<()> {
            std::future::pending().await
        }
        async fn delete(&self, _key: &str) -> Result<bool> {
            std::future::pending().await
        }
        async fn hset(&self, _name: &str, _field: &str, _value: &str) -> Result<()> {
            std::future::pending().await
        }
        async fn hget(&self, _name: &str, _field: &str) -> Result<Option<String>> {
            std::future::pending().await
        }
        async fn hdel(&self, _name: &str, _field: &str) -> Result<bool> {
            std::future::pending().await
        }
        async fn keys_with_prefix(&self, _prefix: &str) -> Result<Vec<String>> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_rejects_empty_keys_and_values() {
        let memory = MemoryManager::new(Arc::new(MemoryStore::new()));

        assert!(matches!(
            memory.store_data("", "x", None).await,
            Err(StackError::ValidationError { .. })
        ));
        assert!(memory.store_data("k", "", None).await.is_err());
        assert!(memory.retrieve_data("").await.is_err());
        assert!(memory.store_hash_data("h", "", "v").await.is_err());
    }

    #[tokio::test]
    async fn test_round_trip_through_store() {
        let memory = MemoryManager::new(Arc::new(MemoryStore::new()));

        memory.store_data("goal", "explore", None).await.unwrap();
        assert_eq!(
            memory.retrieve_data("goal").await.unwrap().as_deref(),
            Some("explore")
        );
        assert!(memory.delete_data("goal").await.unwrap());
        assert_eq!(memory.retrieve_data("goal").await.unwrap(), None);
        assert!(!memory.delete_hash_data("agent", "mood").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_keys_is_sorted() {
        let memory = MemoryManager::new(Arc::new(MemoryStore::new()));
        for key in ["run:b", "run:a", "other"] {
            memory.store_data(key, "1", None).await.unwrap();
        }
        assert_eq!(memory.list_keys("run:").await.unwrap(), vec!["run:a", "run:b"]);
        assert!(memory.list_keys("none:").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_store_times_out() {
        let memory = MemoryManager::new(Arc::new(StalledStore));
        let err = memory.retrieve_data("goal").await.unwrap_err();
        assert!(matches!(err, StackError::TimeoutError { .. }));
    }
}
