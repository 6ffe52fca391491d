//! # Sync Job Wire Records
//!
//! JSON records carried on the per-type queues: the unit of async work
//! and its terminal dead-letter form. Field names are part of the wire
//! contract; decoders tolerate unknown fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;

/// Default retry budget for a queued job.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// One queued upsert of a `(type, key)` snapshot into the store.
///
/// The job carries its own payload snapshot, so a later overwrite of
/// the write-buffer entry cannot corrupt work already in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub key: String,
    pub collection: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl SyncJob {
    /// Build a fresh job with a generated id and zero retries.
    pub fn new(
        entity_type: impl Into<String>,
        key: impl Into<String>,
        collection: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type: entity_type.into(),
            key: key.into(),
            collection: collection.into(),
            data,
            timestamp: Utc::now(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Whether another retry is within budget after one more failure.
    pub fn has_retry_budget(&self) -> bool {
        self.retry_count + 1 < self.max_retries
    }
}

/// Terminal record for a job whose retry budget was exhausted.
///
/// The wrapped job is kept schema-tolerant: a decodable job is stored
/// as its JSON object, an undecodable queue entry as its raw text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqJob {
    pub job: Value,
    pub error: String,
    pub failed_at: DateTime<Utc>,
    pub attempts: u32,
}

impl DlqJob {
    /// Dead-letter a job that exhausted its retries.
    pub fn from_job(job: &SyncJob, error: impl Into<String>) -> Result<Self> {
        Ok(Self {
            job: serde_json::to_value(job)?,
            error: error.into(),
            failed_at: Utc::now(),
            attempts: job.retry_count + 1,
        })
    }

    /// Dead-letter a queue entry that failed to decode.
    pub fn from_raw(raw: &str, error: impl Into<String>) -> Self {
        Self {
            job: Value::String(raw.to_string()),
            error: error.into(),
            failed_at: Utc::now(),
            attempts: 0,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_field_names() {
        let job = SyncJob::new("citizen", "A", "citizens", json!({"cpf": "A"}));
        let encoded = job.encode().unwrap();
        let raw: Value = serde_json::from_str(&encoded).unwrap();
        for field in [
            "id",
            "type",
            "key",
            "collection",
            "data",
            "timestamp",
            "retry_count",
            "max_retries",
        ] {
            assert!(raw.get(field).is_some(), "missing wire field {field}");
        }
        assert_eq!(raw["type"], "citizen");
    }

    #[test]
    fn test_round_trip() {
        let job = SyncJob::new("citizen", "A", "citizens", json!({"cpf": "A", "name": "X"}));
        let decoded = SyncJob::decode(&job.encode().unwrap()).unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn test_decode_tolerates_unknown_fields_and_missing_counters() {
        let raw = json!({
            "id": Uuid::new_v4(),
            "type": "citizen",
            "key": "A",
            "collection": "citizens",
            "data": {"cpf": "A"},
            "timestamp": Utc::now(),
            "origin_host": "api-7"
        })
        .to_string();

        let job = SyncJob::decode(&raw).unwrap();
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn test_retry_budget() {
        let mut job = SyncJob::new("citizen", "A", "citizens", json!({}));
        job.max_retries = 2;
        assert!(job.has_retry_budget());
        job.retry_count = 1;
        assert!(!job.has_retry_budget());
    }

    #[test]
    fn test_dlq_round_trip() {
        let job = SyncJob::new("citizen", "A", "citizens", json!({"cpf": "A"}));
        let dlq = DlqJob::from_job(&job, "503 service unavailable").unwrap();
        let decoded = DlqJob::decode(&dlq.encode().unwrap()).unwrap();
        assert_eq!(decoded, dlq);
        assert_eq!(decoded.attempts, 1);
        assert_eq!(decoded.job["key"], "A");
    }

    #[test]
    fn test_dlq_from_undecodable_entry() {
        let dlq = DlqJob::from_raw("{not json", "decode");
        assert_eq!(dlq.error, "decode");
        assert_eq!(dlq.job, Value::String("{not json".to_string()));
        assert_eq!(dlq.attempts, 0);
    }
}
