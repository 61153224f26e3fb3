//! `DocumentStore` backed by the MongoDB driver.

use crate::config::backend::BackendSettings;
use crate::domain::ports::DocumentStore;
use crate::utils::error::{Result, StackError};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, Database};
use serde_json::Value;
use std::time::Duration;

pub const APP_NAME: &str = "sai-backend";

pub struct MongoStore {
    database: Database,
}

impl MongoStore {
    /// Builds the pooled client. The driver connects lazily; `ping` proves reachability.
    pub async fn connect(settings: &BackendSettings, timeout: Duration) -> Result<Self> {
        let mut options = ClientOptions::parse(&settings.mongo_uri).await?;
        options.app_name = Some(APP_NAME.to_string());
        options.max_pool_size = Some(settings.mongo_max_pool_size);
        options.min_pool_size = Some(settings.mongo_min_pool_size);
        options.connect_timeout = Some(timeout);
        options.server_selection_timeout = Some(timeout);

        let client = Client::with_options(options)?;
        Ok(Self {
            database: client.database(&settings.mongo_db_name),
        })
    }

    pub fn database_name(&self) -> &str {
        self.database.name()
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection::<Document>(name)
    }
}

pub fn parse_object_id(id: &str) -> Result<ObjectId> {
    ObjectId::parse_str(id)
        .map_err(|_| StackError::validation(format!("'{}' is not a valid document id", id)))
}

/// JSON object to BSON; a string `_id` that looks like an ObjectId becomes one.
pub fn to_document(what: &str, value: &Value) -> Result<Document> {
    let mut document = match value {
        Value::Null => Document::new(),
        Value::Object(_) => mongodb::bson::to_document(value).map_err(|e| {
            StackError::validation(format!("{} is not a valid document: {}", what, e))
        })?,
        other => {
            return Err(StackError::validation(format!(
                "{} must be a JSON object, got {}",
                what, other
            )))
        }
    };

    let object_id = match document.get("_id") {
        Some(Bson::String(id)) => ObjectId::parse_str(id).ok(),
        _ => None,
    };
    if let Some(object_id) = object_id {
        document.insert("_id", object_id);
    }
    Ok(document)
}

/// BSON to relaxed extended JSON, with `_id` flattened to its hex string.
pub fn from_document(mut document: Document) -> Value {
    let hex = match document.get("_id") {
        Some(Bson::ObjectId(id)) => Some(id.to_hex()),
        _ => None,
    };
    if let Some(hex) = hex {
        document.insert("_id", hex);
    }
    Bson::Document(document).into_relaxed_extjson()
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn ping(&self) -> Result<()> {
        self.database.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    async fn insert_document(&self, collection: &str, document: Value) -> Result<String> {
        let document = to_document("document", &document)?;
        let result = self.collection(collection).insert_one(document).await?;
        let id = match result.inserted_id {
            Bson::ObjectId(id) => id.to_hex(),
            Bson::String(id) => id,
            other => other.to_string(),
        };
        tracing::info!("📄 Document inserted into '{}' with id {}", collection, id);
        Ok(id)
    }

    async fn find_document(&self, collection: &str, filter: Value) -> Result<Option<Value>> {
        let filter = to_document("filter", &filter)?;
        let found = self.collection(collection).find_one(filter).await?;
        if found.is_none() {
            tracing::debug!("No document in '{}' matches the filter", collection);
        }
        Ok(found.map(from_document))
    }

    async fn find_documents(
        &self,
        collection: &str,
        filter: Value,
        limit: Option<u32>,
    ) -> Result<Vec<Value>> {
        let filter = to_document("filter", &filter)?;
        let coll = self.collection(collection);
        let mut find = coll.find(filter);
        if let Some(limit) = limit {
            find = find.limit(i64::from(limit));
        }
        let documents: Vec<Document> = find.await?.try_collect().await?;
        tracing::debug!("Found {} document(s) in '{}'", documents.len(), collection);
        Ok(documents.into_iter().map(from_document).collect())
    }

    async fn update_document(&self, collection: &str, id: &str, changes: Value) -> Result<bool> {
        let object_id = parse_object_id(id)?;
        let mut changes = to_document("update", &changes)?;
        changes.remove("_id");
        if changes.is_empty() {
            return Ok(false);
        }

        let result = self
            .collection(collection)
            .update_one(doc! { "_id": object_id }, doc! { "$set": changes })
            .await?;
        Ok(result.modified_count > 0)
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<bool> {
        let object_id = parse_object_id(id)?;
        let result = self
            .collection(collection)
            .delete_one(doc! { "_id": object_id })
            .await?;
        Ok(result.deleted_count > 0)
    }
}
