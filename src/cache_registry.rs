//! Named cache namespaces shared across the request-handling layer.

use crate::cache::{BoundedCache, CacheSettings};
use crate::clock::{Clock, SystemClock};
use crate::error::{GuardError, GuardResult};
use crate::metrics::CacheSnapshot;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;
use validator::Validate;

pub type JsonCache = BoundedCache<Value>;

/// Owns every cache namespace; each name maps to one independently sized cache.
pub struct CacheRegistry {
    namespaces: RwLock<HashMap<String, Arc<JsonCache>>>,
    default_settings: CacheSettings,
    clock: Arc<dyn Clock>,
}

impl CacheRegistry {
    pub fn new(default_settings: CacheSettings) -> GuardResult<Self> {
        Self::with_clock(default_settings, Arc::new(SystemClock))
    }

    /// Fails if `default_settings` would create unusable namespaces.
    pub fn with_clock(
        default_settings: CacheSettings,
        clock: Arc<dyn Clock>,
    ) -> GuardResult<Self> {
        default_settings.validate()?;
        Ok(Self {
            namespaces: RwLock::new(HashMap::new()),
            default_settings,
            clock,
        })
    }

    /// Create (or replace) a namespace with its own settings.
    pub fn register(&self, name: &str, settings: CacheSettings) -> GuardResult<Arc<JsonCache>> {
        settings.validate()?;
        let cache = Arc::new(BoundedCache::with_clock(name, settings, self.clock.clone()));
        self.namespaces
            .write()
            .insert(name.to_string(), cache.clone());
        info!(
            target: "storefront_guard::cache",
            namespace = %name,
            max_size = settings.max_size,
            default_ttl = ?settings.default_ttl,
            "Registered cache namespace"
        );
        Ok(cache)
    }

    /// The namespace called `name`, created with the default settings on first use.
    pub fn namespace(&self, name: &str) -> Arc<JsonCache> {
        if let Some(cache) = self.namespaces.read().get(name) {
            return cache.clone();
        }

        self.namespaces
            .write()
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(BoundedCache::with_clock(
                    name,
                    self.default_settings,
                    self.clock.clone(),
                ))
            })
            .clone()
    }

    /// An existing namespace; never creates one.
    pub fn existing(&self, name: &str) -> GuardResult<Arc<JsonCache>> {
        self.namespaces
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| GuardError::UnknownNamespace(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Purge expired entries in every namespace.
    pub fn purge_expired(&self) -> usize {
        self.snapshot_caches()
            .iter()
            .map(|cache| cache.purge_expired())
            .sum()
    }

    pub fn clear_all(&self) {
        for cache in self.snapshot_caches() {
            cache.clear();
        }
    }

    pub fn stats(&self) -> BTreeMap<String, CacheSnapshot> {
        self.snapshot_caches()
            .iter()
            .map(|cache| (cache.name().to_string(), cache.stats()))
            .collect()
    }

    // copy the handles out so no registry lock is held while touching a cache
    fn snapshot_caches(&self) -> Vec<Arc<JsonCache>> {
        self.namespaces.read().values().cloned().collect()
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
            default_settings: CacheSettings::default(),
            clock: Arc::new(SystemClock),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_namespace_is_shared() {
        let registry = CacheRegistry::default();
        registry
            .namespace("products")
            .set("product:id=1", json!({"name": "lamp"}), Duration::from_secs(60));

        let again = registry.namespace("products");
        assert_eq!(again.get("product:id=1"), Some(json!({"name": "lamp"})));
        assert_eq!(registry.namespace("categories").size(), 0);
    }

    #[test]
    fn test_namespaces_have_independent_settings() {
        let registry = CacheRegistry::default();
        let small = registry
            .register("sessions", CacheSettings::new(2, Duration::from_secs(10)))
            .unwrap();
        let default = registry.namespace("products");

        assert_eq!(small.settings().max_size, 2);
        assert_eq!(default.settings(), CacheSettings::default());

        for i in 0..3 {
            small.set(format!("s{}", i), json!(i), Duration::from_secs(10));
        }
        assert_eq!(small.size(), 2);
    }

    #[test]
    fn test_register_rejects_zero_capacity() {
        let registry = CacheRegistry::default();
        assert!(registry
            .register("broken", CacheSettings::new(0, Duration::from_secs(1)))
            .is_err());
    }

    #[test]
    fn test_zero_capacity_defaults_rejected() {
        let result = CacheRegistry::new(CacheSettings::new(0, Duration::from_secs(60)));
        assert!(matches!(result, Err(GuardError::Validation(_))));
    }

    #[test]
    fn test_existing_does_not_create() {
        let registry = CacheRegistry::default();
        assert!(matches!(
            registry.existing("ghost"),
            Err(GuardError::UnknownNamespace(_))
        ));
        registry.namespace("ghost");
        assert!(registry.existing("ghost").is_ok());
        assert_eq!(registry.names(), vec!["ghost".to_string()]);
    }

    #[test]
    fn test_purge_expired_across_namespaces() {
        let clock = MockClock::default();
        let registry =
            CacheRegistry::with_clock(CacheSettings::default(), Arc::new(clock.clone())).unwrap();
        registry.namespace("a").set("k", json!(1), Duration::from_secs(1));
        registry.namespace("b").set("k", json!(2), Duration::from_secs(1));
        registry.namespace("b").set("keep", json!(3), Duration::from_secs(100));

        clock.advance(Duration::from_secs(2));
        assert_eq!(registry.purge_expired(), 2);

        let stats = registry.stats();
        assert_eq!(stats["a"].size, 0);
        assert_eq!(stats["b"].size, 1);

        registry.clear_all();
        assert_eq!(registry.stats()["b"].size, 0);
    }
}
