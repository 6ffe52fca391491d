//! # In-Memory Document Store
//!
//! Mutex-guarded implementation of [`DocumentStore`] for tests and
//! local development. Supports equality and `$gt`/`$lt` filters and an
//! injectable failure mode so outage behavior can be exercised.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;

use super::DocumentStore;
use crate::error::{EngineError, Result};
use civic_domain::EntityRegistry;

/// In-memory document store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<Value>>>,
    fail_message: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent store operation fail with `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.fail_message.lock().unwrap() = Some(message.into());
    }

    /// Clear a previously injected failure.
    pub fn clear_failure(&self) {
        *self.fail_message.lock().unwrap() = None;
    }

    /// Seed a document directly, bypassing the failure gate.
    pub fn seed(&self, collection: &str, doc: Value) {
        let mut collections = self.collections.lock().unwrap();
        collections.entry(collection.to_string()).or_default().push(doc);
    }

    /// Snapshot of every document in a collection.
    pub fn dump(&self, collection: &str) -> Vec<Value> {
        let collections = self.collections.lock().unwrap();
        collections.get(collection).cloned().unwrap_or_default()
    }

    fn check_failure(&self) -> Result<()> {
        match self.fail_message.lock().unwrap().as_ref() {
            Some(message) => Err(EngineError::Store(message.clone())),
            None => Ok(()),
        }
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (a.as_str(), b.as_str()) {
        if let (Ok(a), Ok(b)) = (
            DateTime::parse_from_rfc3339(a),
            DateTime::parse_from_rfc3339(b),
        ) {
            return Some(a.cmp(&b));
        }
        return Some(a.cmp(b));
    }
    if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
        return a.partial_cmp(&b);
    }
    None
}

fn condition_matches(actual: Option<&Value>, expected: &Value) -> bool {
    match expected {
        Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
            let Some(actual) = actual else { return false };
            ops.iter().all(|(op, operand)| match op.as_str() {
                "$gt" => {
                    compare(actual, operand) == Some(std::cmp::Ordering::Greater)
                }
                "$lt" => compare(actual, operand) == Some(std::cmp::Ordering::Less),
                _ => false,
            })
        }
        scalar => actual == Some(scalar),
    }
}

fn filter_matches(doc: &Value, filter: &Value) -> bool {
    let Some(conditions) = filter.as_object() else {
        return false;
    };
    conditions
        .iter()
        .all(|(field, expected)| condition_matches(doc.get(field), expected))
}

fn apply_set(doc: &mut Value, set: &Value) {
    let (Some(target), Some(fields)) = (doc.as_object_mut(), set.as_object()) else {
        return;
    };
    for (field, value) in fields {
        target.insert(field.clone(), value.clone());
    }
}

fn upserted_document(field: &str, key: &str, set: &Value) -> Value {
    let mut doc = serde_json::json!({ field: key });
    apply_set(&mut doc, set);
    doc
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find_one(&self, collection: &str, field: &str, key: &str) -> Result<Option<Value>> {
        self.check_failure()?;
        let collections = self.collections.lock().unwrap();
        let found = collections.get(collection).and_then(|docs| {
            docs.iter()
                .find(|doc| doc.get(field).and_then(Value::as_str) == Some(key))
                .cloned()
        });
        Ok(found)
    }

    async fn upsert(&self, collection: &str, field: &str, key: &str, doc_value: &Value) -> Result<()> {
        self.check_failure()?;
        let mut collections = self.collections.lock().unwrap();
        let docs = collections.entry(collection.to_string()).or_default();
        match docs
            .iter_mut()
            .find(|doc| doc.get(field).and_then(Value::as_str) == Some(key))
        {
            Some(existing) => apply_set(existing, doc_value),
            None => docs.push(upserted_document(field, key, doc_value)),
        }
        Ok(())
    }

    async fn update_one(
        &self,
        collection: &str,
        field: &str,
        key: &str,
        set: &Value,
    ) -> Result<bool> {
        self.check_failure()?;
        let mut collections = self.collections.lock().unwrap();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        match docs
            .iter_mut()
            .find(|doc| doc.get(field).and_then(Value::as_str) == Some(key))
        {
            Some(existing) => {
                apply_set(existing, set);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Value,
        set: &Value,
    ) -> Result<Option<Value>> {
        self.check_failure()?;
        let mut collections = self.collections.lock().unwrap();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(None);
        };
        match docs.iter_mut().find(|doc| filter_matches(doc, filter)) {
            Some(existing) => {
                apply_set(existing, set);
                Ok(Some(existing.clone()))
            }
            None => Ok(None),
        }
    }

    async fn delete_one(&self, collection: &str, field: &str, key: &str) -> Result<bool> {
        self.check_failure()?;
        let mut collections = self.collections.lock().unwrap();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        let before = docs.len();
        if let Some(pos) = docs
            .iter()
            .position(|doc| doc.get(field).and_then(Value::as_str) == Some(key))
        {
            docs.remove(pos);
        }
        Ok(docs.len() < before)
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        self.check_failure()?;
        let collections = self.collections.lock().unwrap();
        Ok(collections.get(collection).map_or(0, |docs| docs.len() as u64))
    }

    async fn bulk_upsert(
        &self,
        collection: &str,
        field: &str,
        docs: &[(String, Value)],
    ) -> Result<u64> {
        self.check_failure()?;
        for (key, doc_value) in docs {
            self.upsert(collection, field, key, doc_value).await?;
        }
        Ok(docs.len() as u64)
    }

    async fn ensure_indexes(&self, _registry: &EntityRegistry) -> Result<()> {
        self.check_failure()
    }

    async fn ping(&self) -> Result<()> {
        self.check_failure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_insert_then_update() {
        let store = MemoryStore::new();
        store
            .upsert("citizens", "cpf", "A", &json!({"cpf": "A", "name": "X"}))
            .await
            .unwrap();
        store
            .upsert("citizens", "cpf", "A", &json!({"cpf": "A", "name": "Y"}))
            .await
            .unwrap();

        assert_eq!(store.count("citizens").await.unwrap(), 1);
        let found = store.find_one("citizens", "cpf", "A").await.unwrap().unwrap();
        assert_eq!(found["name"], "Y");
    }

    #[tokio::test]
    async fn test_injected_failure_surfaces() {
        let store = MemoryStore::new();
        store.fail_with("503 service unavailable");
        let err = store.find_one("citizens", "cpf", "A").await.unwrap_err();
        assert!(err.is_transient());

        store.clear_failure();
        assert!(store.find_one("citizens", "cpf", "A").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_one_and_update_cas() {
        let store = MemoryStore::new();
        store.seed(
            "phone_verifications",
            json!({
                "phone_number": "+5521988887777",
                "code": "123456",
                "used": false,
                "expires_at": "2030-01-01T00:00:00Z"
            }),
        );

        let filter = json!({
            "phone_number": "+5521988887777",
            "code": "123456",
            "used": false,
            "expires_at": { "$gt": "2026-01-01T00:00:00Z" }
        });
        let updated = store
            .find_one_and_update("phone_verifications", &filter, &json!({"used": true}))
            .await
            .unwrap();
        assert_eq!(updated.unwrap()["used"], true);

        // Second swap misses: used is now true
        let again = store
            .find_one_and_update("phone_verifications", &filter, &json!({"used": true}))
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_expired_verification_does_not_match() {
        let store = MemoryStore::new();
        store.seed(
            "phone_verifications",
            json!({
                "phone_number": "+5521900000000",
                "code": "999999",
                "used": false,
                "expires_at": "2020-01-01T00:00:00Z"
            }),
        );

        let filter = json!({
            "phone_number": "+5521900000000",
            "code": "999999",
            "used": false,
            "expires_at": { "$gt": "2026-01-01T00:00:00Z" }
        });
        let updated = store
            .find_one_and_update("phone_verifications", &filter, &json!({"used": true}))
            .await
            .unwrap();
        assert!(updated.is_none());
    }

    #[tokio::test]
    async fn test_delete_one() {
        let store = MemoryStore::new();
        store.seed("citizens", json!({"cpf": "A"}));
        assert!(store.delete_one("citizens", "cpf", "A").await.unwrap());
        assert!(!store.delete_one("citizens", "cpf", "A").await.unwrap());
    }

    #[tokio::test]
    async fn test_bulk_upsert_empty_is_noop() {
        let store = MemoryStore::new();
        assert_eq!(store.bulk_upsert("citizens", "cpf", &[]).await.unwrap(), 0);
    }
}
