//! TTL-aware cache over a key-value store
//!
//! `KeyCache` is what the verification pipeline talks to. It owns the
//! TTL policy and forwards storage and eviction to a [`KeyValueStore`].

use chrono::TimeDelta;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::kv::KeyValueStore;

/// What a caller-supplied TTL turns into at the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expiry {
    Never,
    After(Duration),
    /// Zero or negative TTL
    Immediately,
}

impl Expiry {
    fn from_ttl(ttl: Option<TimeDelta>) -> Self {
        let Some(ttl) = ttl else {
            return Expiry::Never;
        };
        if ttl <= TimeDelta::zero() {
            return Expiry::Immediately;
        }
        // Positive sub-second TTLs round up to one second.
        let duration = ttl.to_std().unwrap_or(Duration::from_secs(1));
        Expiry::After(duration.max(Duration::from_secs(1)))
    }
}

/// Cache of small serialized values with per-entry TTL
///
/// A cache without a store is valid and never holds anything.
#[derive(Clone, Default)]
pub struct KeyCache {
    store: Option<Arc<dyn KeyValueStore>>,
}

impl KeyCache {
    /// Create a cache backed by `store`
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store: Some(store) }
    }

    /// Create a cache that stores nothing
    pub fn disabled() -> Self {
        Self { store: None }
    }

    /// Set or clear the LRU ceiling for a namespace.
    ///
    /// Lowering the ceiling below current occupancy evicts the least
    /// recently used entries right away.
    pub fn configure(&self, namespace: &str, max_entries: Option<usize>) {
        if let Some(store) = &self.store {
            store.configure_lru(namespace, max_entries);
        }
    }

    /// Stored entries per namespace
    pub fn stats(&self) -> HashMap<String, usize> {
        self.store
            .as_ref()
            .map(|store| store.namespace_stats())
            .unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.store.as_ref()?.get(key)
    }

    /// Store `value` under `key`.
    ///
    /// `None` stores without expiry; a zero or negative `ttl` deletes the
    /// key instead of storing it.
    pub fn set(&self, key: &str, value: Vec<u8>, ttl: Option<TimeDelta>) {
        let Some(store) = &self.store else {
            return;
        };
        match Expiry::from_ttl(ttl) {
            Expiry::Immediately => store.delete(key),
            Expiry::Never => store.set(key, value, None),
            Expiry::After(duration) => store.set(key, value, Some(duration)),
        }
    }

    pub fn delete(&self, key: &str) {
        if let Some(store) = &self.store {
            store.delete(key);
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        self.store.as_ref().is_some_and(|store| store.exists(key))
    }

    pub async fn async_get(&self, key: &str) -> Option<Vec<u8>> {
        match &self.store {
            Some(store) => store.async_get(key).await,
            None => None,
        }
    }

    /// Async form of [`KeyCache::set`]
    pub async fn async_set(&self, key: &str, value: Vec<u8>, ttl: Option<TimeDelta>) {
        let Some(store) = &self.store else {
            return;
        };
        match Expiry::from_ttl(ttl) {
            Expiry::Immediately => store.async_delete(key).await,
            Expiry::Never => store.async_set(key, value, None).await,
            Expiry::After(duration) => store.async_set(key, value, Some(duration)).await,
        }
    }

    pub async fn async_delete(&self, key: &str) {
        if let Some(store) = &self.store {
            store.async_delete(key).await;
        }
    }

    pub async fn async_exists(&self, key: &str) -> bool {
        match &self.store {
            Some(store) => store.async_exists(key).await,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InMemoryKv;

    fn cache() -> KeyCache {
        KeyCache::new(Arc::new(InMemoryKv::new()))
    }

    #[test]
    fn test_expiry_from_ttl() {
        assert_eq!(Expiry::from_ttl(None), Expiry::Never);
        assert_eq!(Expiry::from_ttl(Some(TimeDelta::zero())), Expiry::Immediately);
        assert_eq!(Expiry::from_ttl(Some(TimeDelta::seconds(-5))), Expiry::Immediately);
        assert_eq!(
            Expiry::from_ttl(Some(TimeDelta::milliseconds(200))),
            Expiry::After(Duration::from_secs(1))
        );
        assert_eq!(
            Expiry::from_ttl(Some(TimeDelta::seconds(90))),
            Expiry::After(Duration::from_secs(90))
        );
    }

    #[test]
    fn test_missing_then_set_then_get() {
        let cache = cache();
        assert_eq!(cache.get("signature:https://a.example/actor#key"), None);

        cache.set(
            "signature:https://a.example/actor#key",
            b"der".to_vec(),
            Some(TimeDelta::seconds(60)),
        );
        assert_eq!(
            cache.get("signature:https://a.example/actor#key"),
            Some(b"der".to_vec())
        );
    }

    #[test]
    fn test_zero_ttl_deletes() {
        let cache = cache();
        cache.set("a", b"value".to_vec(), None);
        cache.set("a", b"other".to_vec(), Some(TimeDelta::zero()));
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn test_negative_ttl_behaves_like_zero() {
        let cache = cache();
        cache.set("b", b"value".to_vec(), Some(TimeDelta::seconds(-5)));
        assert_eq!(cache.get("b"), None);
        assert!(!cache.exists("b"));
    }

    #[test]
    fn test_configured_namespace_keeps_two_most_recent() {
        let cache = cache();
        cache.configure("ns", Some(2));

        cache.set("ns:a", b"a".to_vec(), None);
        cache.set("ns:b", b"b".to_vec(), None);
        cache.set("ns:c", b"c".to_vec(), None);

        assert!(!cache.exists("ns:a"));
        assert!(cache.exists("ns:b"));
        assert!(cache.exists("ns:c"));
        assert_eq!(cache.stats().get("ns"), Some(&2));
    }

    #[test]
    fn test_disabled_cache_holds_nothing() {
        let cache = KeyCache::disabled();
        cache.set("a", b"value".to_vec(), None);
        assert_eq!(cache.get("a"), None);
        assert!(!cache.exists("a"));
        assert!(cache.stats().is_empty());
    }

    #[tokio::test]
    async fn test_async_forms() {
        let cache = cache();
        cache.async_set("a", b"value".to_vec(), None).await;
        assert_eq!(cache.async_get("a").await, Some(b"value".to_vec()));
        assert!(cache.async_exists("a").await);

        cache.async_delete("a").await;
        assert_eq!(cache.async_get("a").await, None);

        cache.async_set("b", b"value".to_vec(), Some(TimeDelta::seconds(-1))).await;
        assert!(!cache.async_exists("b").await);
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let cache = cache();
        cache.set("a", b"value".to_vec(), Some(TimeDelta::seconds(1)));
        assert!(cache.exists("a"));

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(cache.get("a"), None);
        assert!(!cache.exists("a"));
    }
}
