//! # Cache Keyspace
//!
//! Deterministic key schema for the write-buffer, read-cache, sync
//! queues, and dead-letter queues. This module is the only place in
//! the system that knows the separator and the layer discriminators;
//! changing the scheme strands every queued job, so the formats below
//! are load-bearing and covered bit-exactly by tests.

/// Key formatter for every cache layer the engine touches.
pub struct CacheKeyspace;

impl CacheKeyspace {
    /// Write-buffer entry holding the most recent unsynced payload.
    pub fn write_buffer(entity_type: &str, key: &str) -> String {
        format!("{entity_type}:write:{key}")
    }

    /// Read-cache entry populated from the store on read-miss.
    pub fn read_cache(entity_type: &str, key: &str) -> String {
        format!("{entity_type}:cache:{key}")
    }

    /// Per-type sync work queue (append-left, consume-right, FIFO).
    pub fn queue(entity_type: &str) -> String {
        format!("sync:queue:{entity_type}")
    }

    /// Per-type dead-letter queue.
    pub fn dlq(entity_type: &str) -> String {
        format!("sync:dlq:{entity_type}")
    }

    /// Per-entity auxiliary cache key, opaque to the engine.
    pub fn aux(entity_type: &str, discriminator: &str, key: &str) -> String {
        format!("{entity_type}:{discriminator}:{key}")
    }

    /// Match-all pattern over one type's write-buffer entries.
    pub fn write_buffer_pattern(entity_type: &str) -> String {
        format!("{entity_type}:write:*")
    }

    /// Match-all pattern over one type's read-cache entries.
    pub fn read_cache_pattern(entity_type: &str) -> String {
        format!("{entity_type}:cache:*")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_formats_are_bit_exact() {
        assert_eq!(
            CacheKeyspace::write_buffer("citizen", "03561350712"),
            "citizen:write:03561350712"
        );
        assert_eq!(
            CacheKeyspace::read_cache("citizen", "03561350712"),
            "citizen:cache:03561350712"
        );
        assert_eq!(CacheKeyspace::queue("citizen"), "sync:queue:citizen");
        assert_eq!(CacheKeyspace::dlq("citizen"), "sync:dlq:citizen");
        assert_eq!(
            CacheKeyspace::aux("phone_mapping", "quarantine", "+5521988887777"),
            "phone_mapping:quarantine:+5521988887777"
        );
    }

    #[test]
    fn test_patterns() {
        assert_eq!(
            CacheKeyspace::write_buffer_pattern("user_config"),
            "user_config:write:*"
        );
        assert_eq!(
            CacheKeyspace::read_cache_pattern("user_config"),
            "user_config:cache:*"
        );
    }
}
