use crate::domain::ports::DocumentStore;
use crate::utils::error::{Result, StackError};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// 24 hexadecimal digits, the shape of a generated document id.
pub fn is_document_id(id: &str) -> bool {
    id.len() == 24 && id.bytes().all(|b| b.is_ascii_hexdigit())
}

fn require_object(what: &str, value: &Value) -> Result<()> {
    match value {
        Value::Object(_) => Ok(()),
        other => Err(StackError::validation(format!(
            "{} must be a JSON object, got {}",
            what, other
        ))),
    }
}

/// Validated, time-bounded access to one collection of the document store.
#[derive(Clone)]
pub struct DocumentCollection {
    store: Arc<dyn DocumentStore>,
    name: String,
    timeout: Duration,
}

impl DocumentCollection {
    pub fn new(store: Arc<dyn DocumentStore>, name: &str) -> Result<Self> {
        if name.is_empty() || name.contains('$') || name.contains('\0') {
            return Err(StackError::validation(format!(
                "'{}' is not a valid collection name",
                name
            )));
        }
        Ok(Self {
            store,
            name: name.to_string(),
            timeout: OPERATION_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn bounded<T>(&self, operation: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| StackError::TimeoutError {
                operation: format!("{} in '{}'", operation, self.name),
            })?
    }

    /// Returns the id of the new document.
    pub async fn insert(&self, document: Value) -> Result<String> {
        require_object("document", &document)?;
        let id = self
            .bounded("insert", self.store.insert_document(&self.name, document))
            .await?;
        tracing::info!("📄 Document inserted into '{}' with id {}", self.name, id);
        Ok(id)
    }

    pub async fn find_one(&self, filter: Value) -> Result<Option<Value>> {
        require_object("filter", &filter)?;
        let found = self
            .bounded("find", self.store.find_document(&self.name, filter))
            .await?;
        if found.is_none() {
            tracing::debug!("No document in '{}' matches the filter", self.name);
        }
        Ok(found)
    }

    /// `limit` of `None` or `Some(0)` returns every match.
    pub async fn find_many(&self, filter: Value, limit: Option<u32>) -> Result<Vec<Value>> {
        require_object("filter", &filter)?;
        let limit = limit.filter(|limit| *limit > 0);
        let documents = self
            .bounded(
                "find many",
                self.store.find_documents(&self.name, filter, limit),
            )
            .await?;
        tracing::debug!("Found {} document(s) in '{}'", documents.len(), self.name);
        Ok(documents)
    }

    /// Sets the given fields. Returns `false` for an unknown or malformed id.
    pub async fn update(&self, id: &str, changes: Value) -> Result<bool> {
        require_object("update", &changes)?;
        if !is_document_id(id) {
            tracing::error!("Invalid document id: {}", id);
            return Ok(false);
        }
        let updated = self
            .bounded("update", self.store.update_document(&self.name, id, changes))
            .await?;
        if updated {
            tracing::info!("✏️ Document {} in '{}' updated", id, self.name);
        } else {
            tracing::info!("No document {} in '{}' to update", id, self.name);
        }
        Ok(updated)
    }

    /// Returns `false` for an unknown or malformed id.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        if !is_document_id(id) {
            tracing::error!("Invalid document id: {}", id);
            return Ok(false);
        }
        let deleted = self
            .bounded("delete", self.store.delete_document(&self.name, id))
            .await?;
        if deleted {
            tracing::info!("🗑️ Document {} in '{}' deleted", id, self.name);
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryDocumentStore;
    use async_trait::async_trait;
    use serde_json::json;

    fn agents() -> DocumentCollection {
        DocumentCollection::new(Arc::new(MemoryDocumentStore::new()), "agents").unwrap()
    }

    struct StalledStore;

    #[async_trait]
    impl DocumentStore for StalledStore {
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
        async fn insert_document(&self, _collection: &str, _document: Value) -> Result<String> {
            std::future::pending().await
        }
        async fn find_document(&self, _collection: &str, _filter: Value) -> Result<Option<Value>> {
            std::future::pending().await
        }
        async fn find_documents(
            &self,
            _collection: &str,
            _filter: Value,
            _limit: Option<u32>,
        ) -> Result<Vec<Value>> {
            std::future::pending().await
        }
        async fn update_document(&self, _collection: &str, _id: &str, _changes: Value) -> Result<bool> {
            std::future::pending().await
        }
        async fn delete_document(&self, _collection: &str, _id: &str) -> Result<bool> {
            std::future::pending().await
        }
    }

    #[test]
    fn test_collection_names_and_ids() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        assert!(DocumentCollection::new(Arc::clone(&store), "").is_err());
        assert!(DocumentCollection::new(Arc::clone(&store), "$cmd").is_err());
        assert_eq!(
            DocumentCollection::new(store, "agents").unwrap().name(),
            "agents"
        );

        assert!(is_document_id("65a1f0c2e4b0a1b2c3d4e5f6"));
        assert!(!is_document_id("65a1f0c2e4b0a1b2c3d4e5f"));
        assert!(!is_document_id("zza1f0c2e4b0a1b2c3d4e5f6"));
    }

    #[tokio::test]
    async fn test_crud_through_collection() {
        let agents = agents();
        let id = agents
            .insert(json!({"name": "ada", "mood": "calm"}))
            .await
            .unwrap();
        agents
            .insert(json!({"name": "bob", "mood": "calm"}))
            .await
            .unwrap();

        let ada = agents.find_one(json!({"name": "ada"})).await.unwrap().unwrap();
        assert_eq!(ada["_id"], id.as_str());
        assert_eq!(agents.find_many(json!({"mood": "calm"}), Some(0)).await.unwrap().len(), 2);
        assert_eq!(agents.find_many(json!({}), Some(1)).await.unwrap().len(), 1);

        assert!(agents.update(&id, json!({"mood": "curious"})).await.unwrap());
        let ada = agents.find_one(json!({"name": "ada"})).await.unwrap().unwrap();
        assert_eq!(ada["mood"], "curious");

        assert!(agents.delete(&id).await.unwrap());
        assert_eq!(agents.find_one(json!({"name": "ada"})).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_malformed_input() {
        let agents = agents();
        assert!(matches!(
            agents.insert(json!("just a string")).await,
            Err(StackError::ValidationError { .. })
        ));
        assert!(agents.find_one(json!([1])).await.is_err());
        assert!(!agents.update("not-an-id", json!({"mood": "x"})).await.unwrap());
        assert!(agents
            .update("65a1f0c2e4b0a1b2c3d4e5f6", json!("x"))
            .await
            .is_err());
        assert!(!agents.delete("not-an-id").await.unwrap());
        assert!(!agents.delete("65a1f0c2e4b0a1b2c3d4e5f6").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_store_times_out() {
        let stalled = DocumentCollection::new(Arc::new(StalledStore), "agents")
            .unwrap()
            .with_timeout(Duration::from_secs(2));
        assert!(matches!(
            stalled.find_one(json!({})).await,
            Err(StackError::TimeoutError { .. })
        ));
    }
}
