//! # Entity Registry
//!
//! Static table mapping entity type tags to their document collection,
//! natural key field, and cache TTLs. The registry is the only place
//! that knows which field identifies an entity inside its collection;
//! both the read path and the sync workers resolve their store filters
//! through it.

use std::collections::HashMap;
use std::time::Duration;

use crate::SelfDeclaredKind;

/// Default time-to-live for write-buffer entries.
pub const WRITE_BUFFER_TTL: Duration = Duration::from_secs(6 * 3600);

/// Default time-to-live for read-cache entries.
pub const READ_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Longer read-cache TTL for slow-moving entities.
pub const READ_CACHE_TTL_LONG: Duration = Duration::from_secs(3 * 3600);

/// Describes one entity kind known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDescriptor {
    /// Short ASCII tag naming the entity kind; partitions queues and DLQs.
    pub type_tag: &'static str,
    /// Document collection the entity is persisted into.
    pub collection: &'static str,
    /// Field carrying the entity's identifying value inside the collection.
    pub natural_key: &'static str,
    pub write_buffer_ttl: Duration,
    pub read_cache_ttl: Duration,
}

impl EntityDescriptor {
    const fn new(
        type_tag: &'static str,
        collection: &'static str,
        natural_key: &'static str,
        read_cache_ttl: Duration,
    ) -> Self {
        Self {
            type_tag,
            collection,
            natural_key,
            write_buffer_ttl: WRITE_BUFFER_TTL,
            read_cache_ttl,
        }
    }
}

/// Registry of every entity kind the engine can sync.
///
/// Unknown type tags and unknown collections are hard errors at the
/// call sites; there is deliberately no `_id` fallback.
#[derive(Debug, Clone)]
pub struct EntityRegistry {
    by_type: HashMap<&'static str, EntityDescriptor>,
    by_collection: HashMap<&'static str, &'static str>,
}

impl EntityRegistry {
    /// Build the standard registry covering all platform entity kinds.
    pub fn standard() -> Self {
        let mut descriptors = vec![
            EntityDescriptor::new("citizen", "citizens", "cpf", READ_CACHE_TTL_LONG),
            EntityDescriptor::new(
                "phone_mapping",
                "phone_cpf_mappings",
                "phone_number",
                READ_CACHE_TTL,
            ),
            EntityDescriptor::new("user_config", "user_configs", "cpf", READ_CACHE_TTL),
            EntityDescriptor::new("opt_in_history", "opt_in_histories", "_id", READ_CACHE_TTL),
            EntityDescriptor::new("beta_group", "beta_groups", "_id", READ_CACHE_TTL_LONG),
            EntityDescriptor::new(
                "phone_verification",
                "phone_verifications",
                "phone_number",
                READ_CACHE_TTL,
            ),
            EntityDescriptor::new(
                "maintenance_request",
                "maintenance_requests",
                "_id",
                READ_CACHE_TTL,
            ),
            EntityDescriptor::new("cf_lookup", "cf_lookups", "cpf", READ_CACHE_TTL_LONG),
        ];

        for kind in SelfDeclaredKind::ALL {
            descriptors.push(EntityDescriptor::new(
                kind.type_tag(),
                "self_declared",
                "cpf",
                READ_CACHE_TTL,
            ));
        }

        let mut by_type = HashMap::new();
        let mut by_collection = HashMap::new();
        for desc in descriptors {
            by_type.insert(desc.type_tag, desc);
            by_collection.entry(desc.collection).or_insert(desc.natural_key);
        }

        Self {
            by_type,
            by_collection,
        }
    }

    /// Look up the descriptor for an entity type tag.
    pub fn descriptor(&self, type_tag: &str) -> Option<&EntityDescriptor> {
        self.by_type.get(type_tag)
    }

    /// Resolve the natural key field for a collection.
    pub fn natural_key_for(&self, collection: &str) -> Option<&'static str> {
        self.by_collection.get(collection).copied()
    }

    /// All registered type tags, in unspecified order.
    pub fn type_tags(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.by_type.keys().copied()
    }

    /// All registered `(collection, natural_key)` pairs.
    pub fn collections(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.by_collection.iter().map(|(c, k)| (*c, *k))
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_covers_all_kinds() {
        let registry = EntityRegistry::standard();
        // 8 base kinds + 9 self-declared kinds
        assert_eq!(registry.len(), 17);
    }

    #[test]
    fn test_citizen_descriptor() {
        let registry = EntityRegistry::standard();
        let desc = registry.descriptor("citizen").unwrap();
        assert_eq!(desc.collection, "citizens");
        assert_eq!(desc.natural_key, "cpf");
        assert_eq!(desc.write_buffer_ttl, Duration::from_secs(21_600));
    }

    #[test]
    fn test_natural_key_lookup_by_collection() {
        let registry = EntityRegistry::standard();
        assert_eq!(registry.natural_key_for("citizens"), Some("cpf"));
        assert_eq!(
            registry.natural_key_for("phone_cpf_mappings"),
            Some("phone_number")
        );
        assert_eq!(registry.natural_key_for("beta_groups"), Some("_id"));
        assert_eq!(registry.natural_key_for("self_declared"), Some("cpf"));
    }

    #[test]
    fn test_unknown_collection_has_no_fallback() {
        let registry = EntityRegistry::standard();
        assert_eq!(registry.natural_key_for("nonexistent"), None);
    }

    #[test]
    fn test_self_declared_kinds_share_collection() {
        let registry = EntityRegistry::standard();
        for kind in SelfDeclaredKind::ALL {
            let desc = registry.descriptor(kind.type_tag()).unwrap();
            assert_eq!(desc.collection, "self_declared");
            assert_eq!(desc.natural_key, "cpf");
        }
    }
}
