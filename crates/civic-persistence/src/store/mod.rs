//! # Document Store Layer
//!
//! Abstract interface over the document database the sync workers
//! upsert into. Implementations can be swapped for different backends
//! (MongoDB, in-memory mock); consistency is at most "write
//! acknowledged by the primary".

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use civic_domain::EntityRegistry;

#[cfg(feature = "mongo")]
pub mod mongo_impl;

pub mod memory;

pub use memory::MemoryStore;
#[cfg(feature = "mongo")]
pub use mongo_impl::{MongoStore, MongoStoreConfig};

/// Document store operations required by the engine.
///
/// Filters on the natural key are simple field equality; the richer
/// filter document used by `find_one_and_update` supports equality
/// plus `$gt`/`$lt` comparisons.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Find the document whose `field` equals `key`.
    async fn find_one(&self, collection: &str, field: &str, key: &str) -> Result<Option<Value>>;

    /// Upsert: `$set` the full document under `field == key`.
    async fn upsert(&self, collection: &str, field: &str, key: &str, doc: &Value) -> Result<()>;

    /// Update an existing document; returns whether one matched.
    async fn update_one(
        &self,
        collection: &str,
        field: &str,
        key: &str,
        set: &Value,
    ) -> Result<bool>;

    /// Atomically find a document matching `filter`, apply `$set`, and
    /// return the updated document. The compare-and-swap primitive
    /// behind phone verification.
    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Value,
        set: &Value,
    ) -> Result<Option<Value>>;

    /// Delete the document whose `field` equals `key`; returns whether
    /// one was removed.
    async fn delete_one(&self, collection: &str, field: &str, key: &str) -> Result<bool>;

    /// Count all documents in a collection.
    async fn count(&self, collection: &str) -> Result<u64>;

    /// Unordered bulk upsert of `(key, document)` pairs under `field`.
    /// Returns how many writes were applied.
    async fn bulk_upsert(
        &self,
        collection: &str,
        field: &str,
        docs: &[(String, Value)],
    ) -> Result<u64>;

    /// Create the unique natural-key indexes for every registered
    /// collection.
    async fn ensure_indexes(&self, registry: &EntityRegistry) -> Result<()>;

    /// Health probe against the primary.
    async fn ping(&self) -> Result<()>;
}
