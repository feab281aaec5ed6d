//! Key-value store backends
//!
//! The cache layer talks to a [`KeyValueStore`]. Keys are namespaced by
//! their first `:`-delimited segment (see [`namespace_of`]); the in-memory
//! backend bounds each namespace independently with LRU eviction.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// Namespace used for keys without a `:` separator
pub const DEFAULT_NAMESPACE: &str = "default";

/// Namespace of a cache key.
///
/// The namespace is the segment before the first `:`. Keys without a
/// separator belong to [`DEFAULT_NAMESPACE`]. Eviction ceilings are
/// configured per namespace, so callers rely on this derivation.
///
/// ```
/// use fedisig::data::namespace_of;
///
/// assert_eq!(namespace_of("signature:https://example.com/actor#key"), "signature");
/// assert_eq!(namespace_of("plain"), "default");
/// ```
pub fn namespace_of(key: &str) -> &str {
    match key.split_once(':') {
        Some((namespace, _)) => namespace,
        None => DEFAULT_NAMESPACE,
    }
}

/// Storage backend for small serialized values
///
/// Blocking and async forms have identical semantics. Async methods
/// default to the blocking ones, which is correct for backends whose
/// operations never wait on I/O.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a value, `None` if absent or expired
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Store a value, expiring after `ttl` if given
    fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>);

    /// Remove a value
    fn delete(&self, key: &str);

    /// Check whether a non-expired value exists
    fn exists(&self, key: &str) -> bool;

    /// Set or clear the LRU ceiling of a namespace
    ///
    /// Backends without eviction support ignore this.
    fn configure_lru(&self, _namespace: &str, _max_entries: Option<usize>) {}

    /// Entry counts per namespace
    fn namespace_stats(&self) -> HashMap<String, usize> {
        HashMap::new()
    }

    async fn async_get(&self, key: &str) -> Option<Vec<u8>> {
        self.get(key)
    }

    async fn async_set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        self.set(key, value, ttl)
    }

    async fn async_delete(&self, key: &str) {
        self.delete(key)
    }

    async fn async_exists(&self, key: &str) -> bool {
        self.exists(key)
    }
}

#[derive(Debug)]
struct StoredValue {
    value: Vec<u8>,
    expires_at: Option<Instant>,
    /// Position in the namespace recency order
    tick: u64,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct Namespace {
    max_entries: Option<usize>,
    /// tick -> key, oldest first
    order: BTreeMap<u64, String>,
}

#[derive(Debug, Default)]
struct KvState {
    entries: HashMap<String, StoredValue>,
    namespaces: HashMap<String, Namespace>,
    next_tick: u64,
}

impl KvState {
    fn bump_tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn remove(&mut self, key: &str) -> Option<StoredValue> {
        let removed = self.entries.remove(key)?;
        if let Some(namespace) = self.namespaces.get_mut(namespace_of(key)) {
            namespace.order.remove(&removed.tick);
        }
        Some(removed)
    }

    /// Mark `key` most-recently-used. The key must be present.
    fn touch(&mut self, key: &str) {
        let tick = self.bump_tick();
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        let previous = std::mem::replace(&mut entry.tick, tick);
        let namespace = self
            .namespaces
            .entry(namespace_of(key).to_string())
            .or_default();
        namespace.order.remove(&previous);
        namespace.order.insert(tick, key.to_string());
    }

    /// Drop the live entry for `key` if it expired. Returns true if a
    /// live entry remains.
    fn purge_if_expired(&mut self, key: &str, now: Instant) -> bool {
        match self.entries.get(key) {
            None => false,
            Some(entry) if entry.is_expired(now) => {
                self.remove(key);
                false
            }
            Some(_) => true,
        }
    }

    fn enforce_ceiling(&mut self, namespace_name: &str) -> usize {
        let Some(namespace) = self.namespaces.get_mut(namespace_name) else {
            return 0;
        };
        let Some(max_entries) = namespace.max_entries else {
            return 0;
        };

        let mut evicted = Vec::new();
        while namespace.order.len() > max_entries {
            match namespace.order.pop_first() {
                Some((_, key)) => evicted.push(key),
                None => break,
            }
        }
        for key in &evicted {
            self.entries.remove(key);
        }
        evicted.len()
    }
}

/// In-memory key-value store with TTL and per-namespace LRU eviction
///
/// All state sits behind one mutex, so the recency order of a namespace
/// is only ever modified inside a single critical section. The lock is
/// never held across an await point.
#[derive(Debug, Default)]
pub struct InMemoryKv {
    state: Mutex<KvState>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including ones that expired but were not
    /// accessed since.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of stored entries in a namespace
    pub fn namespace_len(&self, namespace: &str) -> usize {
        self.state
            .lock()
            .namespaces
            .get(namespace)
            .map_or(0, |ns| ns.order.len())
    }
}

impl KeyValueStore for InMemoryKv {
    fn namespace_stats(&self) -> HashMap<String, usize> {
        self.state
            .lock()
            .namespaces
            .iter()
            .filter(|(_, ns)| !ns.order.is_empty())
            .map(|(name, ns)| (name.clone(), ns.order.len()))
            .collect()
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        if !state.purge_if_expired(key, Instant::now()) {
            return None;
        }
        state.touch(key);
        state.entries.get(key).map(|entry| entry.value.clone())
    }

    fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        let now = Instant::now();
        let mut state = self.state.lock();
        let tick = state.bump_tick();
        let stored = StoredValue {
            value,
            // A TTL past the clock's range never expires
            expires_at: ttl.and_then(|ttl| now.checked_add(ttl)),
            tick,
        };

        let namespace_name = namespace_of(key).to_string();
        if let Some(previous) = state.entries.insert(key.to_string(), stored) {
            if let Some(namespace) = state.namespaces.get_mut(&namespace_name) {
                namespace.order.remove(&previous.tick);
            }
        }
        state
            .namespaces
            .entry(namespace_name.clone())
            .or_default()
            .order
            .insert(tick, key.to_string());

        let evicted = state.enforce_ceiling(&namespace_name);
        if evicted > 0 {
            tracing::debug!(
                namespace = %namespace_name,
                evicted,
                "Evicted least recently used entries"
            );
        }
    }

    fn delete(&self, key: &str) {
        self.state.lock().remove(key);
    }

    fn exists(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        if !state.purge_if_expired(key, Instant::now()) {
            return false;
        }
        state.touch(key);
        true
    }

    fn configure_lru(&self, namespace: &str, max_entries: Option<usize>) {
        let mut state = self.state.lock();
        state
            .namespaces
            .entry(namespace.to_string())
            .or_default()
            .max_entries = max_entries;

        let evicted = state.enforce_ceiling(namespace);
        tracing::debug!(
            namespace = %namespace,
            max_entries = ?max_entries,
            evicted,
            "Configured namespace LRU ceiling"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_namespace_of() {
        assert_eq!(namespace_of("signature:https://a.example/actor#key"), "signature");
        assert_eq!(namespace_of("webfinger:acct:alice@a.example"), "webfinger");
        assert_eq!(namespace_of("no-separator"), "default");
        assert_eq!(namespace_of(":leading"), "");
    }

    #[test]
    fn test_set_get_delete() {
        let kv = InMemoryKv::new();
        assert_eq!(kv.get("a"), None);

        kv.set("a", b"value".to_vec(), None);
        assert_eq!(kv.get("a"), Some(b"value".to_vec()));
        assert!(kv.exists("a"));

        kv.delete("a");
        assert_eq!(kv.get("a"), None);
        assert!(!kv.exists("a"));
        assert_eq!(kv.namespace_len("default"), 0);
    }

    #[test]
    fn test_ttl_beyond_clock_range_is_stored() {
        let kv = InMemoryKv::new();
        kv.set("a", b"value".to_vec(), Some(Duration::MAX));
        assert_eq!(kv.get("a"), Some(b"value".to_vec()));
    }

    #[test]
    fn test_overwrite_keeps_single_order_slot() {
        let kv = InMemoryKv::new();
        kv.set("ns:a", b"1".to_vec(), None);
        kv.set("ns:a", b"2".to_vec(), None);

        assert_eq!(kv.get("ns:a"), Some(b"2".to_vec()));
        assert_eq!(kv.namespace_len("ns"), 1);
    }

    #[test]
    fn test_lru_eviction_keeps_most_recent() {
        let kv = InMemoryKv::new();
        kv.configure_lru("ns", Some(2));

        kv.set("ns:a", b"a".to_vec(), None);
        kv.set("ns:b", b"b".to_vec(), None);
        kv.set("ns:c", b"c".to_vec(), None);

        assert!(!kv.exists("ns:a"));
        assert!(kv.exists("ns:b"));
        assert!(kv.exists("ns:c"));
        assert_eq!(kv.namespace_len("ns"), 2);
    }

    #[test]
    fn test_get_marks_most_recently_used() {
        let kv = InMemoryKv::new();
        kv.configure_lru("ns", Some(2));

        kv.set("ns:a", b"a".to_vec(), None);
        kv.set("ns:b", b"b".to_vec(), None);
        // Touch a so that b becomes the eviction candidate
        assert!(kv.get("ns:a").is_some());
        kv.set("ns:c", b"c".to_vec(), None);

        assert!(kv.get("ns:a").is_some());
        assert!(kv.get("ns:b").is_none());
        assert!(kv.get("ns:c").is_some());
    }

    #[test]
    fn test_namespaces_are_bounded_independently() {
        let kv = InMemoryKv::new();
        kv.configure_lru("small", Some(1));

        kv.set("small:a", b"a".to_vec(), None);
        kv.set("small:b", b"b".to_vec(), None);
        kv.set("other:a", b"a".to_vec(), None);
        kv.set("other:b", b"b".to_vec(), None);
        kv.set("plain", b"p".to_vec(), None);

        assert_eq!(kv.namespace_len("small"), 1);
        assert_eq!(kv.namespace_len("other"), 2);
        assert_eq!(kv.namespace_len("default"), 1);
        assert_eq!(kv.len(), 4);
    }

    #[test]
    fn test_shrinking_ceiling_evicts_immediately() {
        let kv = InMemoryKv::new();
        for key in ["ns:a", "ns:b", "ns:c", "ns:d"] {
            kv.set(key, key.as_bytes().to_vec(), None);
        }

        kv.configure_lru("ns", Some(1));
        assert_eq!(kv.namespace_len("ns"), 1);
        assert!(kv.exists("ns:d"));

        kv.configure_lru("ns", None);
        kv.set("ns:e", b"e".to_vec(), None);
        kv.set("ns:f", b"f".to_vec(), None);
        assert_eq!(kv.namespace_len("ns"), 3);
    }

    #[tokio::test]
    async fn test_expired_entries_are_deleted_on_access() {
        let kv = InMemoryKv::new();
        kv.set("ns:a", b"a".to_vec(), Some(Duration::from_millis(50)));
        assert!(kv.exists("ns:a"));

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(kv.len(), 1);
        assert_eq!(kv.get("ns:a"), None);
        assert_eq!(kv.len(), 0);
        assert_eq!(kv.namespace_len("ns"), 0);
    }

    #[tokio::test]
    async fn test_concurrent_writers_respect_ceiling() {
        let kv = Arc::new(InMemoryKv::new());
        kv.configure_lru("ns", Some(16));

        let mut tasks = Vec::new();
        for task in 0..8 {
            let kv = kv.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..50 {
                    let key = format!("ns:{task}-{i}");
                    kv.async_set(&key, vec![task as u8], None).await;
                    kv.async_get(&key).await;
                }
            }));
        }
        for task in tasks {
            task.await.expect("writer task");
        }

        assert_eq!(kv.namespace_len("ns"), 16);
        assert_eq!(kv.len(), 16);
    }
}
