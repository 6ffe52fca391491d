//! # MongoDB Document Store
//!
//! MongoDB implementation of [`DocumentStore`]. Upserts filter on the
//! entity's natural key field; bulk flushes use unordered writes.

use async_trait::async_trait;
use mongodb::bson::{doc, to_document, Bson, Document};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Client, Database, IndexModel};
use serde_json::Value;

use super::DocumentStore;
use crate::error::{EngineError, Result};
use civic_domain::EntityRegistry;

/// MongoDB connection configuration.
#[derive(Debug, Clone)]
pub struct MongoStoreConfig {
    pub uri: String,
    pub database: String,
}

impl Default for MongoStoreConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://127.0.0.1:27017".to_string(),
            database: "civic_data".to_string(),
        }
    }
}

/// MongoDB client wrapper.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    db: Database,
}

impl MongoStore {
    /// Connect to MongoDB.
    pub async fn new(config: MongoStoreConfig) -> Result<Self> {
        let client = Client::with_uri_str(&config.uri).await?;
        let db = client.database(&config.database);
        Ok(Self { client, db })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn set_document(set: &Value) -> Result<Document> {
        to_document(set).map_err(|e| EngineError::Serialization(e.to_string()))
    }

    fn filter_document(filter: &Value) -> Result<Document> {
        to_document(filter).map_err(|e| EngineError::Serialization(e.to_string()))
    }

    fn key_filter(field: &str, key: &str) -> Document {
        doc! { field: key }
    }

    fn document_to_value(document: Document) -> Result<Value> {
        serde_json::to_value(&document).map_err(|e| EngineError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn find_one(&self, collection: &str, field: &str, key: &str) -> Result<Option<Value>> {
        let coll = self.db.collection::<Document>(collection);
        let found = coll.find_one(Self::key_filter(field, key)).await?;
        found.map(Self::document_to_value).transpose()
    }

    async fn upsert(&self, collection: &str, field: &str, key: &str, doc_value: &Value) -> Result<()> {
        let coll = self.db.collection::<Document>(collection);
        let set = Self::set_document(doc_value)?;
        coll.update_one(Self::key_filter(field, key), doc! { "$set": set })
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn update_one(
        &self,
        collection: &str,
        field: &str,
        key: &str,
        set: &Value,
    ) -> Result<bool> {
        let coll = self.db.collection::<Document>(collection);
        let set = Self::set_document(set)?;
        let result = coll
            .update_one(Self::key_filter(field, key), doc! { "$set": set })
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Value,
        set: &Value,
    ) -> Result<Option<Value>> {
        let coll = self.db.collection::<Document>(collection);
        let filter = Self::filter_document(filter)?;
        let set = Self::set_document(set)?;
        let updated = coll
            .find_one_and_update(filter, doc! { "$set": set })
            .return_document(ReturnDocument::After)
            .await?;
        updated.map(Self::document_to_value).transpose()
    }

    async fn delete_one(&self, collection: &str, field: &str, key: &str) -> Result<bool> {
        let coll = self.db.collection::<Document>(collection);
        let result = coll.delete_one(Self::key_filter(field, key)).await?;
        Ok(result.deleted_count > 0)
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        let coll = self.db.collection::<Document>(collection);
        Ok(coll.count_documents(doc! {}).await?)
    }

    async fn bulk_upsert(
        &self,
        collection: &str,
        field: &str,
        docs: &[(String, Value)],
    ) -> Result<u64> {
        if docs.is_empty() {
            return Ok(0);
        }

        let coll = self.db.collection::<Document>(collection);
        let namespace = coll.namespace();

        let mut models = Vec::with_capacity(docs.len());
        for (key, doc_value) in docs {
            let set = Self::set_document(doc_value)?;
            models.push(
                mongodb::options::UpdateOneModel::builder()
                    .namespace(namespace.clone())
                    .filter(Self::key_filter(field, key))
                    .update(doc! { "$set": set })
                    .upsert(true)
                    .build(),
            );
        }

        let result = self
            .client
            .bulk_write(models.into_iter().map(mongodb::options::WriteModel::UpdateOne))
            .ordered(false)
            .await?;
        Ok(result.matched_count.max(0) as u64 + result.upserted_count.max(0) as u64)
    }

    async fn ensure_indexes(&self, registry: &EntityRegistry) -> Result<()> {
        for (collection, natural_key) in registry.collections() {
            // _id is already unique
            if natural_key == "_id" {
                continue;
            }
            let coll = self.db.collection::<Document>(collection);
            let model = IndexModel::builder()
                .keys(doc! { natural_key: 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build();
            coll.create_index(model).await?;
            tracing::debug!(collection, natural_key, "Unique index ensured");
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let reply = self.db.run_command(doc! { "ping": 1 }).await?;
        match reply.get("ok") {
            Some(Bson::Double(v)) if *v >= 1.0 => Ok(()),
            Some(Bson::Int32(1)) | Some(Bson::Int64(1)) => Ok(()),
            other => Err(EngineError::Store(format!(
                "ping returned unexpected ok field: {other:?}"
            ))),
        }
    }
}
