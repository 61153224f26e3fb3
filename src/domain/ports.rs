use crate::core::plan::{ContainerPlan, ImageBuild};
use crate::utils::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Missing,
    /// Created but not running: exited, crashed or stopped by hand.
    Stopped,
    Running,
}

/// Everything the orchestrator needs from a container engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create_network(&self, name: &str, driver: Option<&str>) -> Result<()>;
    async fn remove_network(&self, name: &str) -> Result<()>;

    /// Returns `true` when the volume did not exist before.
    async fn ensure_volume(&self, name: &str, driver: Option<&str>) -> Result<bool>;
    async fn remove_volume(&self, name: &str) -> Result<()>;

    async fn image_exists(&self, image: &str) -> Result<bool>;
    async fn build_image(&self, service: &str, build: &ImageBuild) -> Result<()>;
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Creates and starts the container; the name must be free.
    async fn run_container(&self, container: &ContainerPlan) -> Result<String>;
    async fn container_state(&self, name: &str) -> Result<ContainerState>;
    async fn stop_container(&self, name: &str) -> Result<()>;
    async fn remove_container(&self, name: &str) -> Result<()>;
}

/// Key-value store operations used by the backend service.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn ping(&self) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    /// Returns `true` when the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn hset(&self, name: &str, field: &str, value: &str) -> Result<()>;
    async fn hget(&self, name: &str, field: &str) -> Result<Option<String>>;
    async fn hdel(&self, name: &str, field: &str) -> Result<bool>;
    /// Plain string keys starting with `prefix`, in no particular order.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Releases pooled connections. Later calls may reconnect.
    fn close(&self) {}
}

/// Document store operations, one JSON object per document.
///
/// Stored documents come back with `_id` as a 24-digit hex string.
/// Filters match top-level fields by equality.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn ping(&self) -> Result<()>;
    /// Returns the id of the new document.
    async fn insert_document(&self, collection: &str, document: Value) -> Result<String>;
    async fn find_document(&self, collection: &str, filter: Value) -> Result<Option<Value>>;
    /// `limit` of `None` returns every match.
    async fn find_documents(
        &self,
        collection: &str,
        filter: Value,
        limit: Option<u32>,
    ) -> Result<Vec<Value>>;
    /// Sets the given top-level fields. Returns `true` when the document changed.
    async fn update_document(&self, collection: &str, id: &str, changes: Value) -> Result<bool>;
    /// Returns `true` when a document was removed.
    async fn delete_document(&self, collection: &str, id: &str) -> Result<bool>;
}
