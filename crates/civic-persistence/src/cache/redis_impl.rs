//! # Redis Cache Backend
//!
//! Redis implementation of [`CacheBackend`] on top of a shared
//! `ConnectionManager`, with pipelined batches via `redis::pipe()`.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Value};

use super::{BatchCommand, BatchReply, CacheBackend, CacheBatch};
use crate::error::{EngineError, Result};

/// Redis connection configuration.
#[derive(Debug, Clone)]
pub struct RedisCacheConfig {
    pub url: String,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

/// Redis cache client with a multiplexed, auto-reconnecting connection.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connect to Redis.
    pub async fn new(config: RedisCacheConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Get the raw connection for advanced operations.
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn reply_from_value(command: &BatchCommand, value: Value) -> Result<BatchReply> {
    match command {
        BatchCommand::Get { .. } => match value {
            Value::Nil => Ok(BatchReply::Value(None)),
            Value::BulkString(bytes) => Ok(BatchReply::Value(Some(
                String::from_utf8_lossy(&bytes).into_owned(),
            ))),
            Value::SimpleString(s) => Ok(BatchReply::Value(Some(s))),
            other => Err(EngineError::Cache(format!(
                "unexpected GET reply in pipeline: {other:?}"
            ))),
        },
        BatchCommand::SetEx { .. } => Ok(BatchReply::Done),
        BatchCommand::Del { .. } => match value {
            Value::Int(n) => Ok(BatchReply::Deleted(n.max(0) as u64)),
            other => Err(EngineError::Cache(format!(
                "unexpected DEL reply in pipeline: {other:?}"
            ))),
        },
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let seconds = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value, seconds).await?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let deleted: i64 = conn.del(keys).await?;
        Ok(deleted.max(0) as u64)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let len: i64 = conn.lpush(key, value).await?;
        Ok(len.max(0) as u64)
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.rpop(key, None).await?;
        Ok(value)
    }

    async fn brpop(&self, keys: &[String], timeout: Duration) -> Result<Option<(String, String)>> {
        if keys.is_empty() {
            return Ok(None);
        }
        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> = conn.brpop(keys, timeout.as_secs_f64()).await?;
        Ok(popped)
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let len: i64 = conn.llen(key).await?;
        Ok(len.max(0) as u64)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.keys(pattern).await?;
        Ok(keys)
    }

    async fn info_memory(&self) -> Result<String> {
        let mut conn = self.conn.clone();
        let info: String = redis::cmd("INFO")
            .arg("memory")
            .query_async(&mut conn)
            .await?;
        Ok(info)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn apply_batch(&self, batch: CacheBatch) -> Result<Vec<BatchReply>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for command in batch.commands() {
            match command {
                BatchCommand::Get { key } => {
                    pipe.get(key);
                }
                BatchCommand::SetEx { key, value, ttl } => {
                    pipe.set_ex(key, value, ttl.as_secs().max(1));
                }
                BatchCommand::Del { key } => {
                    pipe.del(key);
                }
            }
        }

        let mut conn = self.conn.clone();
        let values: Vec<Value> = pipe.query_async(&mut conn).await?;
        if values.len() != batch.len() {
            return Err(EngineError::Cache(format!(
                "pipeline returned {} replies for {} commands",
                values.len(),
                batch.len()
            )));
        }

        batch
            .commands()
            .iter()
            .zip(values)
            .map(|(command, value)| reply_from_value(command, value))
            .collect()
    }
}
