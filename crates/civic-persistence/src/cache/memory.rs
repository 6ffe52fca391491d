//! # In-Memory Cache Backend
//!
//! Mutex-guarded implementation of [`CacheBackend`] with lazy TTL
//! expiry and a polling blocking-pop. Used by the test suites and for
//! local development without a Redis instance.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{BatchCommand, BatchReply, CacheBackend, CacheBatch};
use crate::error::Result;

const BRPOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
struct StringEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl StringEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    strings: HashMap<String, StringEntry>,
    lists: HashMap<String, VecDeque<String>>,
}

/// In-memory cache with Redis-like semantics.
#[derive(Debug, Default)]
pub struct MemoryCache {
    inner: Mutex<MemoryInner>,
    info_memory: Mutex<String>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
            info_memory: Mutex::new(
                "# Memory\r\nused_memory:1048576\r\nmaxmemory:0\r\n".to_string(),
            ),
        }
    }

    /// Override the text returned by `info_memory`.
    pub fn set_info_memory(&self, info: impl Into<String>) {
        *self.info_memory.lock().unwrap() = info.into();
    }

    fn get_live(&self, key: &str) -> Option<String> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        match inner.strings.get(key) {
            Some(entry) if entry.is_expired(now) => {
                inner.strings.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    fn pop_any(&self, keys: &[String]) -> Option<(String, String)> {
        let mut inner = self.inner.lock().unwrap();
        for key in keys {
            if let Some(list) = inner.lists.get_mut(key) {
                if let Some(value) = list.pop_back() {
                    return Some((key.clone(), value));
                }
            }
        }
        None
    }
}

fn pattern_matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get_live(key))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let mut deleted = 0;
        for key in keys {
            if inner.strings.remove(key).is_some() || inner.lists.remove(key).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let list = inner.lists.entry(key.to_string()).or_default();
        list.push_front(value.to_string());
        Ok(list.len() as u64)
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.lists.get_mut(key).and_then(VecDeque::pop_back))
    }

    async fn brpop(&self, keys: &[String], timeout: Duration) -> Result<Option<(String, String)>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(popped) = self.pop_any(keys) {
                return Ok(Some(popped));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(BRPOP_POLL_INTERVAL).await;
        }
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.lists.get(key).map_or(0, |l| l.len() as u64))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        inner.strings.retain(|_, entry| !entry.is_expired(now));

        let mut matched: Vec<String> = inner
            .strings
            .keys()
            .chain(inner.lists.keys())
            .filter(|k| pattern_matches(pattern, k))
            .cloned()
            .collect();
        matched.sort_unstable();
        Ok(matched)
    }

    async fn info_memory(&self) -> Result<String> {
        Ok(self.info_memory.lock().unwrap().clone())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn apply_batch(&self, batch: CacheBatch) -> Result<Vec<BatchReply>> {
        let mut replies = Vec::with_capacity(batch.len());
        for command in batch.commands() {
            let reply = match command {
                BatchCommand::Get { key } => BatchReply::Value(self.get(key).await?),
                BatchCommand::SetEx { key, value, ttl } => {
                    self.set_ex(key, value, *ttl).await?;
                    BatchReply::Done
                }
                BatchCommand::Del { key } => BatchReply::Deleted(self.del(&[key.clone()]).await?),
            };
            replies.push(reply);
        }
        Ok(replies)
    }
}
