//! # Cache Layer
//!
//! Key/value cache abstraction over the operations the engine needs:
//! plain GET/SET-with-TTL/DEL, the list operations backing the sync
//! queues, keyspace scans, memory introspection, and pipelined
//! batches. Implementations can be swapped for different backends
//! (Redis, in-memory, mock).

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_impl;

pub use memory::MemoryCache;
#[cfg(feature = "redis")]
pub use redis_impl::{RedisCache, RedisCacheConfig};

/// One command inside a pipelined batch.
#[derive(Debug, Clone)]
pub enum BatchCommand {
    Get { key: String },
    SetEx { key: String, value: String, ttl: Duration },
    Del { key: String },
}

/// Reply to one batch command, in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchReply {
    Value(Option<String>),
    Done,
    Deleted(u64),
}

/// Groups GET/SET/DEL commands into a single cache round-trip.
#[derive(Debug, Clone, Default)]
pub struct CacheBatch {
    commands: Vec<BatchCommand>,
}

impl CacheBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(mut self, key: impl Into<String>) -> Self {
        self.commands.push(BatchCommand::Get { key: key.into() });
        self
    }

    pub fn set_ex(mut self, key: impl Into<String>, value: impl Into<String>, ttl: Duration) -> Self {
        self.commands.push(BatchCommand::SetEx {
            key: key.into(),
            value: value.into(),
            ttl,
        });
        self
    }

    pub fn del(mut self, key: impl Into<String>) -> Self {
        self.commands.push(BatchCommand::Del { key: key.into() });
        self
    }

    pub fn commands(&self) -> &[BatchCommand] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }
}

/// Cache substrate required by the engine.
///
/// All methods are safe for concurrent use; production backends are
/// connection-pool backed.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a string value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a string value with a time-to-live.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Delete keys; returns how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64>;

    /// Append to the head of a list; returns the new length.
    async fn lpush(&self, key: &str, value: &str) -> Result<u64>;

    /// Pop from the tail of a list.
    async fn rpop(&self, key: &str) -> Result<Option<String>>;

    /// Blocking pop from the tail of the first non-empty list.
    ///
    /// Returns `(list key, value)` or `None` once the timeout elapses.
    async fn brpop(&self, keys: &[String], timeout: Duration) -> Result<Option<(String, String)>>;

    /// Length of a list (0 for a missing key).
    async fn llen(&self, key: &str) -> Result<u64>;

    /// Keys matching a glob-style pattern.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Raw `INFO memory` section text.
    async fn info_memory(&self) -> Result<String>;

    /// Liveness probe.
    async fn ping(&self) -> Result<()>;

    /// Execute a batch in one round-trip; replies are in command order.
    async fn apply_batch(&self, batch: CacheBatch) -> Result<Vec<BatchReply>>;
}
