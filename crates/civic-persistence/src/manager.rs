//! # Data Manager
//!
//! Read/write/delete primitives over the tri-layer storage: cache
//! write-buffer, cache read-cache, document store. `write` stages the
//! payload in the write-buffer and enqueues a sync job; background
//! workers drain the queue into the store.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::cache::CacheBackend;
use crate::error::{EngineError, Result};
use crate::job::SyncJob;
use crate::keyspace::CacheKeyspace;
use crate::store::DocumentStore;
use civic_domain::registry::READ_CACHE_TTL;
use civic_domain::{DataOperation, EntityRegistry};

/// Outcome of a conditional write-buffer cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// The entry matched the synced payload and was removed.
    Removed,
    /// A newer write overwrote the entry; it was left in place for its
    /// own queued job.
    Superseded,
    /// No entry was present. Before the sync completed this means the
    /// TTL expired under the queue: an inconsistency signal.
    Missing,
}

/// Engine facade over the cache layers and the document store.
pub struct DataManager {
    cache: Arc<dyn CacheBackend>,
    store: Arc<dyn DocumentStore>,
    registry: Arc<EntityRegistry>,
}

impl DataManager {
    pub fn new(
        cache: Arc<dyn CacheBackend>,
        store: Arc<dyn DocumentStore>,
        registry: Arc<EntityRegistry>,
    ) -> Self {
        Self {
            cache,
            store,
            registry,
        }
    }

    pub fn cache(&self) -> &Arc<dyn CacheBackend> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    /// Stage a write: set the write-buffer entry, then enqueue a sync
    /// job carrying its own payload snapshot.
    ///
    /// Both cache operations must succeed. A failure after the buffer
    /// set but before the enqueue surfaces as an error; the next write
    /// for the same key re-queues.
    pub async fn write(&self, op: &dyn DataOperation) -> Result<SyncJob> {
        let entity_type = op.entity_type();
        let key = op.key();
        let payload = op.payload().map_err(EngineError::from)?;
        let encoded = serde_json::to_string(&payload)?;

        let buffer_key = CacheKeyspace::write_buffer(entity_type, key);
        self.cache.set_ex(&buffer_key, &encoded, op.ttl()).await?;

        let job = SyncJob::new(entity_type, key, op.collection(), payload);
        let queue_key = CacheKeyspace::queue(entity_type);
        self.cache.lpush(&queue_key, &job.encode()?).await?;

        tracing::debug!(
            entity_type,
            key,
            job_id = %job.id,
            "Write staged and sync job enqueued"
        );
        Ok(job)
    }

    /// Read one entity, probing write-buffer, then read-cache, then
    /// the store. A store hit warms the read-cache before returning.
    ///
    /// Cache I/O failures fall through to the next layer; a miss on
    /// every layer is a distinct [`EngineError::NotFound`].
    pub async fn read(&self, key: &str, collection: &str, entity_type: &str) -> Result<Value> {
        let natural_key = self
            .registry
            .natural_key_for(collection)
            .ok_or_else(|| EngineError::UnknownCollection(collection.to_string()))?;

        let buffer_key = CacheKeyspace::write_buffer(entity_type, key);
        match self.cache.get(&buffer_key).await {
            Ok(Some(raw)) => return Ok(serde_json::from_str(&raw)?),
            Ok(None) => {}
            Err(e) => tracing::warn!(entity_type, key, error = %e, "Write-buffer probe failed"),
        }

        let cache_key = CacheKeyspace::read_cache(entity_type, key);
        match self.cache.get(&cache_key).await {
            Ok(Some(raw)) => return Ok(serde_json::from_str(&raw)?),
            Ok(None) => {}
            Err(e) => tracing::warn!(entity_type, key, error = %e, "Read-cache probe failed"),
        }

        match self.store.find_one(collection, natural_key, key).await? {
            Some(value) => {
                if let Err(e) = self.update_read_cache(entity_type, key, &value).await {
                    tracing::warn!(entity_type, key, error = %e, "Read-cache populate failed");
                }
                Ok(value)
            }
            None => Err(EngineError::NotFound {
                collection: collection.to_string(),
                key: key.to_string(),
            }),
        }
    }

    /// Remove an entity from every layer: cache entries first, so no
    /// reader can observe a pre-delete value after the store confirms
    /// the deletion.
    pub async fn delete(&self, key: &str, collection: &str, entity_type: &str) -> Result<()> {
        let natural_key = self
            .registry
            .natural_key_for(collection)
            .ok_or_else(|| EngineError::UnknownCollection(collection.to_string()))?;

        let cache_keys = vec![
            CacheKeyspace::write_buffer(entity_type, key),
            CacheKeyspace::read_cache(entity_type, key),
        ];
        if let Err(e) = self.cache.del(&cache_keys).await {
            tracing::warn!(entity_type, key, error = %e, "Cache cleanup on delete failed");
        }

        self.store.delete_one(collection, natural_key, key).await?;
        tracing::debug!(entity_type, key, "Entity deleted from all layers");
        Ok(())
    }

    /// Conditionally remove the write-buffer entry after a successful
    /// sync: deleted only if its contents still match the payload the
    /// job carried. A newer overwrite keeps its shadow (its own queued
    /// job will clean up); a missing entry means the TTL expired before
    /// the sync finished.
    pub async fn cleanup_write_buffer(
        &self,
        entity_type: &str,
        key: &str,
        synced_payload: &Value,
    ) -> Result<CleanupOutcome> {
        let buffer_key = CacheKeyspace::write_buffer(entity_type, key);
        let current = match self.cache.get(&buffer_key).await? {
            Some(raw) => raw,
            None => return Ok(CleanupOutcome::Missing),
        };

        let matches = serde_json::from_str::<Value>(&current)
            .map(|v| &v == synced_payload)
            .unwrap_or(false);
        if !matches {
            return Ok(CleanupOutcome::Superseded);
        }

        self.cache.del(&[buffer_key]).await?;
        Ok(CleanupOutcome::Removed)
    }

    /// Refresh the read-cache entry with a short TTL to keep readers
    /// warm after a sync.
    pub async fn update_read_cache(
        &self,
        entity_type: &str,
        key: &str,
        value: &Value,
    ) -> Result<()> {
        let ttl = self
            .registry
            .descriptor(entity_type)
            .map(|d| d.read_cache_ttl)
            .unwrap_or(READ_CACHE_TTL);
        let cache_key = CacheKeyspace::read_cache(entity_type, key);
        self.cache
            .set_ex(&cache_key, &serde_json::to_string(value)?, ttl)
            .await
    }

    /// Depth of one type's sync queue.
    pub async fn queue_depth(&self, entity_type: &str) -> Result<u64> {
        self.cache.llen(&CacheKeyspace::queue(entity_type)).await
    }

    /// Depth of one type's dead-letter queue.
    pub async fn dlq_depth(&self, entity_type: &str) -> Result<u64> {
        self.cache.llen(&CacheKeyspace::dlq(entity_type)).await
    }

    /// Per-type occupancy of every cache layer the engine owns.
    pub async fn cache_stats(&self) -> Result<HashMap<String, u64>> {
        let mut stats = HashMap::new();
        for entity_type in self.registry.type_tags() {
            stats.insert(
                format!("queue_depth_{entity_type}"),
                self.queue_depth(entity_type).await?,
            );
            stats.insert(
                format!("dlq_depth_{entity_type}"),
                self.dlq_depth(entity_type).await?,
            );
            stats.insert(
                format!("write_buffer_{entity_type}"),
                self.cache
                    .keys(&CacheKeyspace::write_buffer_pattern(entity_type))
                    .await?
                    .len() as u64,
            );
            stats.insert(
                format!("read_cache_{entity_type}"),
                self.cache
                    .keys(&CacheKeyspace::read_cache_pattern(entity_type))
                    .await?
                    .len() as u64,
            );
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use civic_domain::{Citizen, CitizenWrite};
    use serde_json::json;

    fn manager() -> (Arc<MemoryCache>, Arc<MemoryStore>, DataManager) {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryStore::new());
        let manager = DataManager::new(
            cache.clone(),
            store.clone(),
            Arc::new(EntityRegistry::standard()),
        );
        (cache, store, manager)
    }

    fn citizen(cpf: &str, name: &str) -> Citizen {
        Citizen {
            cpf: cpf.to_string(),
            name: name.to_string(),
            social_name: None,
            birth_date: None,
            mother_name: None,
            email: None,
            phone: None,
            address: None,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_write_stages_buffer_and_enqueues_job() {
        let (cache, _store, manager) = manager();
        let op = CitizenWrite::new(citizen("03561350712", "João"));

        let job = manager.write(&op).await.unwrap();

        let buffered = cache.get("citizen:write:03561350712").await.unwrap();
        assert!(buffered.is_some());
        assert_eq!(cache.llen("sync:queue:citizen").await.unwrap(), 1);
        assert_eq!(job.entity_type, "citizen");
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.data["name"], "João");
    }

    #[tokio::test]
    async fn test_read_prefers_write_buffer_over_store() {
        let (_cache, store, manager) = manager();
        // Stale store copy
        store.seed("citizens", json!({"cpf": "B", "name": "old"}));

        let op = CitizenWrite::new(citizen("B", "new"));
        manager.write(&op).await.unwrap();

        // Even with the store document gone, the buffered write wins
        store.delete_one("citizens", "cpf", "B").await.unwrap();
        let value = manager.read("B", "citizens", "citizen").await.unwrap();
        assert_eq!(value["name"], "new");
    }

    #[tokio::test]
    async fn test_read_populates_read_cache_from_store() {
        let (cache, store, manager) = manager();
        store.seed("citizens", json!({"cpf": "A", "name": "X"}));

        let value = manager.read("A", "citizens", "citizen").await.unwrap();
        assert_eq!(value["name"], "X");
        assert!(cache.get("citizen:cache:A").await.unwrap().is_some());

        // Store document removed out-of-band: the read-cache still serves
        store.delete_one("citizens", "cpf", "A").await.unwrap();
        let cached = manager.read("A", "citizens", "citizen").await.unwrap();
        assert_eq!(cached["name"], "X");
    }

    #[tokio::test]
    async fn test_read_miss_is_not_found() {
        let (_cache, _store, manager) = manager();
        let err = manager.read("Z", "citizens", "citizen").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_read_unknown_collection_is_hard_error() {
        let (_cache, _store, manager) = manager();
        let err = manager.read("A", "mystery", "citizen").await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownCollection(_)));
    }

    #[tokio::test]
    async fn test_delete_clears_all_layers() {
        let (cache, store, manager) = manager();
        let op = CitizenWrite::new(citizen("C", "gone"));
        manager.write(&op).await.unwrap();
        store.seed("citizens", json!({"cpf": "C", "name": "gone"}));

        manager.delete("C", "citizens", "citizen").await.unwrap();

        assert!(cache.get("citizen:write:C").await.unwrap().is_none());
        assert!(cache.get("citizen:cache:C").await.unwrap().is_none());
        assert!(store.find_one("citizens", "cpf", "C").await.unwrap().is_none());
        let err = manager.read("C", "citizens", "citizen").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_matching_payload() {
        let (cache, _store, manager) = manager();
        let op = CitizenWrite::new(citizen("D", "v1"));
        let job = manager.write(&op).await.unwrap();

        // An overwrite lands before the worker cleans up
        let newer = CitizenWrite::new(citizen("D", "v2"));
        manager.write(&newer).await.unwrap();

        let outcome = manager
            .cleanup_write_buffer("citizen", "D", &job.data)
            .await
            .unwrap();
        assert_eq!(outcome, CleanupOutcome::Superseded);
        assert!(cache.get("citizen:write:D").await.unwrap().is_some());

        // The newer job's own cleanup removes the entry
        let newer_payload: Value =
            serde_json::from_str(&cache.get("citizen:write:D").await.unwrap().unwrap()).unwrap();
        let outcome = manager
            .cleanup_write_buffer("citizen", "D", &newer_payload)
            .await
            .unwrap();
        assert_eq!(outcome, CleanupOutcome::Removed);
        assert!(cache.get("citizen:write:D").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_reports_missing_entry() {
        let (_cache, _store, manager) = manager();
        let outcome = manager
            .cleanup_write_buffer("citizen", "E", &json!({"cpf": "E"}))
            .await
            .unwrap();
        assert_eq!(outcome, CleanupOutcome::Missing);
    }

    #[tokio::test]
    async fn test_cache_stats_reports_layers() {
        let (_cache, _store, manager) = manager();
        let op = CitizenWrite::new(citizen("F", "stats"));
        manager.write(&op).await.unwrap();

        let stats = manager.cache_stats().await.unwrap();
        assert_eq!(stats["queue_depth_citizen"], 1);
        assert_eq!(stats["dlq_depth_citizen"], 0);
        assert_eq!(stats["write_buffer_citizen"], 1);
    }
}
