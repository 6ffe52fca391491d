//! # Civic Persistence Library
//!
//! Write-behind persistence layer for the citizen data platform.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Application Layer                        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        DataManager                           │
//! │        (write-buffer staging, tri-layer reads, deletes)      │
//! └─────────────────────────────────────────────────────────────┘
//!            │                              │
//!            ▼                              ▼
//! ┌─────────────────────────┐   ┌──────────────────────────────┐
//! │     Redis Cache          │   │         MongoDB              │
//! │ (write-buffer, queues,   │   │    (source of truth,         │
//! │  read-cache, DLQs)       │   │     synced by workers)       │
//! └─────────────────────────┘   └──────────────────────────────┘
//! ```
//!
//! Writes are acknowledged once they land in the cache: the payload is
//! staged under the type's write-buffer key and a [`job::SyncJob`] is
//! appended to the type's queue for the sync workers to drain. Reads
//! probe write-buffer, then read-cache, then the store.
//!
//! ## Features
//!
//! - `mongo`: MongoDB store backend (default)
//! - `redis`: Redis cache backend (default)

pub mod cache;
pub mod error;
pub mod job;
pub mod keyspace;
pub mod manager;
pub mod store;

pub use cache::{BatchCommand, BatchReply, CacheBackend, CacheBatch, MemoryCache};
#[cfg(feature = "redis")]
pub use cache::{RedisCache, RedisCacheConfig};
pub use error::{EngineError, Result};
pub use job::{DlqJob, SyncJob, DEFAULT_MAX_RETRIES};
pub use keyspace::CacheKeyspace;
pub use manager::{CleanupOutcome, DataManager};
pub use store::{DocumentStore, MemoryStore};
#[cfg(feature = "mongo")]
pub use store::{MongoStore, MongoStoreConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
