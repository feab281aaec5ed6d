//! Actor key resolution backed by the key cache
//!
//! A key id is looked up under `signature:<key id>`. On a miss the actor
//! document is fetched, the key decoded, and its canonical bytes stored
//! before the key is handed back. Keys that fail to decode are never
//! stored.

use chrono::TimeDelta;
use std::sync::Arc;

use crate::data::KeyCache;
use crate::metrics::KEY_CACHE_LOOKUPS_TOTAL;

use super::actor::{ActorFetcher, actor_url, find_multikey, find_public_key_pem};
use super::keys::{KeyError, KeyKind, PublicKey};

/// Cache namespace for actor keys
pub const SIGNATURE_NAMESPACE: &str = "signature";

/// Cache key for a key id
pub fn cache_key(key_id: &str) -> String {
    format!("{}:{}", SIGNATURE_NAMESPACE, key_id)
}

/// Result of resolving a key id
#[derive(Debug, Clone, PartialEq)]
pub enum KeyResolution {
    Resolved { key: PublicKey, from_cache: bool },
    /// Actor unreachable, or no matching key in its document
    NotFound(String),
    /// Key present but of an algorithm the caller cannot use
    Unsupported(String),
}

/// Resolves public keys for signature key ids and proof verification methods
#[derive(Clone)]
pub struct ActorKeyResolver {
    cache: KeyCache,
    fetcher: Arc<dyn ActorFetcher>,
    ttl: Option<TimeDelta>,
}

impl ActorKeyResolver {
    pub fn new(cache: KeyCache, fetcher: Arc<dyn ActorFetcher>, ttl: Option<TimeDelta>) -> Self {
        Self {
            cache,
            fetcher,
            ttl,
        }
    }

    pub fn cache(&self) -> &KeyCache {
        &self.cache
    }

    /// Look up a cached key
    ///
    /// Returns `(key, is_cache)`. A stored entry that fails to decode is
    /// dropped and reported as `(None, false)`, the same as a miss.
    pub async fn cached_key(&self, key_id: &str) -> (Option<PublicKey>, bool) {
        let cache_key = cache_key(key_id);
        let Some(bytes) = self.cache.async_get(&cache_key).await else {
            KEY_CACHE_LOOKUPS_TOTAL.with_label_values(&["miss"]).inc();
            return (None, false);
        };

        match PublicKey::from_canonical_bytes(&bytes) {
            Ok(key) => {
                KEY_CACHE_LOOKUPS_TOTAL.with_label_values(&["hit"]).inc();
                (Some(key), true)
            }
            Err(e) => {
                KEY_CACHE_LOOKUPS_TOTAL.with_label_values(&["corrupt"]).inc();
                tracing::warn!(key_id = %key_id, error = %e, "Discarding undecodable cached key");
                self.cache.async_delete(&cache_key).await;
                (None, false)
            }
        }
    }

    /// Store a decoded key under its id
    pub async fn store_key(&self, key_id: &str, key: &PublicKey) {
        match key.to_canonical_bytes() {
            Ok(bytes) => self.cache.async_set(&cache_key(key_id), bytes, self.ttl).await,
            Err(e) => tracing::warn!(key_id = %key_id, error = %e, "Failed to encode key for cache"),
        }
    }

    /// Resolve the key named by a Signature header `keyId`
    pub async fn resolve_signature_key(&self, key_id: &str) -> KeyResolution {
        self.resolve(key_id, |document| {
            let pem = find_public_key_pem(document, key_id)
                .ok_or_else(|| KeyError::Invalid("actor has no matching publicKey".to_string()))?;
            PublicKey::from_pem(pem)
        })
        .await
    }

    /// Resolve the Ed25519 Multikey named by a proof `verificationMethod`
    pub async fn resolve_proof_key(&self, verification_method: &str) -> KeyResolution {
        let resolution = self
            .resolve(verification_method, |document| {
                let multibase = find_multikey(document, verification_method).ok_or_else(|| {
                    KeyError::Invalid("actor has no matching assertionMethod".to_string())
                })?;
                PublicKey::from_multibase(multibase)
            })
            .await;

        match resolution {
            KeyResolution::Resolved { key, .. } if key.kind() != KeyKind::Ed25519 => {
                KeyResolution::Unsupported(format!("{} key cannot verify a proof", key.kind()))
            }
            other => other,
        }
    }

    async fn resolve<F>(&self, key_id: &str, decode: F) -> KeyResolution
    where
        F: FnOnce(&serde_json::Value) -> Result<PublicKey, KeyError>,
    {
        if let (Some(key), true) = self.cached_key(key_id).await {
            return KeyResolution::Resolved {
                key,
                from_cache: true,
            };
        }

        let document = match self.fetcher.fetch_actor(actor_url(key_id)).await {
            Ok(document) => document,
            Err(e) => {
                tracing::info!(key_id = %key_id, error = %e, "Actor fetch failed");
                return KeyResolution::NotFound(e.to_string());
            }
        };

        match decode(&document) {
            Ok(key) => {
                self.store_key(key_id, &key).await;
                KeyResolution::Resolved {
                    key,
                    from_cache: false,
                }
            }
            Err(KeyError::Unsupported(reason)) => {
                tracing::info!(key_id = %key_id, reason = %reason, "Unsupported actor key");
                KeyResolution::Unsupported(reason)
            }
            Err(e) => {
                tracing::info!(key_id = %key_id, error = %e, "No usable actor key");
                KeyResolution::NotFound(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InMemoryKv;
    use crate::error::AppError;
    use crate::federation::keys::PrivateKey;
    use crate::federation::keys::test_keys::{ed25519_private_key, rsa_private_key};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeFetcher {
        documents: HashMap<String, Value>,
        requests: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ActorFetcher for FakeFetcher {
        async fn fetch_actor(&self, url: &str) -> Result<Value, AppError> {
            self.requests.lock().push(url.to_string());
            self.documents.get(url).cloned().ok_or(AppError::NotFound)
        }
    }

    const ACTOR: &str = "https://remote.example/users/alice";

    fn resolver_with(document: Value) -> (ActorKeyResolver, Arc<FakeFetcher>) {
        let mut fetcher = FakeFetcher::default();
        fetcher.documents.insert(ACTOR.to_string(), document);
        let fetcher = Arc::new(fetcher);
        let cache = KeyCache::new(Arc::new(InMemoryKv::new()));
        (
            ActorKeyResolver::new(cache, fetcher.clone(), Some(TimeDelta::seconds(60))),
            fetcher,
        )
    }

    fn rsa_actor(public: &PublicKey) -> Value {
        json!({
            "id": ACTOR,
            "publicKey": {
                "id": format!("{ACTOR}#main-key"),
                "owner": ACTOR,
                "publicKeyPem": public.to_public_pem().expect("pem"),
            }
        })
    }

    #[tokio::test]
    async fn test_rsa_key_round_trips_through_cache() {
        let public = PrivateKey::Rsa(rsa_private_key()).public_key();
        let (resolver, fetcher) = resolver_with(rsa_actor(&public));
        let key_id = format!("{ACTOR}#main-key");

        let first = resolver.resolve_signature_key(&key_id).await;
        assert_eq!(
            first,
            KeyResolution::Resolved {
                key: public.clone(),
                from_cache: false
            }
        );

        let (cached, is_cache) = resolver.cached_key(&key_id).await;
        assert!(is_cache);
        let cached = cached.expect("cached key");
        assert_eq!(
            cached.to_public_pem().expect("pem"),
            public.to_public_pem().expect("pem")
        );

        let second = resolver.resolve_signature_key(&key_id).await;
        assert!(matches!(second, KeyResolution::Resolved { from_cache: true, .. }));
        assert_eq!(fetcher.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_ed25519_key_round_trips_through_cache() {
        let public = PrivateKey::Ed25519(ed25519_private_key()).public_key();
        let key_id = "https://remote.example/users/alice#ed-key";
        let (resolver, _) = resolver_with(json!({"id": ACTOR}));

        resolver.store_key(key_id, &public).await;
        let stored = resolver
            .cache()
            .async_get(&cache_key(key_id))
            .await
            .expect("stored bytes");
        assert_eq!(stored.len(), 32);

        let (cached, is_cache) = resolver.cached_key(key_id).await;
        assert!(is_cache);
        assert_eq!(cached.and_then(|key| key.to_multibase()), public.to_multibase());
    }

    #[tokio::test]
    async fn test_corrupt_cache_entry_is_a_miss() {
        let (resolver, _) = resolver_with(json!({"id": ACTOR}));
        let key_id = "https://example.com/actor#invalid";
        resolver
            .cache()
            .async_set(&cache_key(key_id), b"invalid-der-data".to_vec(), None)
            .await;

        let (key, is_cache) = resolver.cached_key(key_id).await;
        assert!(key.is_none());
        assert!(!is_cache);
        assert!(!resolver.cache().async_exists(&cache_key(key_id)).await);
    }

    #[tokio::test]
    async fn test_missing_entry_is_a_miss() {
        let (resolver, _) = resolver_with(json!({"id": ACTOR}));
        let (key, is_cache) = resolver.cached_key("https://example.com/actor#missing").await;
        assert!(key.is_none());
        assert!(!is_cache);
    }

    #[tokio::test]
    async fn test_undecodable_key_is_not_cached() {
        let key_id = format!("{ACTOR}#main-key");
        let (resolver, _) = resolver_with(json!({
            "id": ACTOR,
            "publicKey": {"id": key_id, "publicKeyPem": "not a pem"}
        }));

        assert!(matches!(
            resolver.resolve_signature_key(&key_id).await,
            KeyResolution::NotFound(_)
        ));
        assert!(!resolver.cache().async_exists(&cache_key(&key_id)).await);
    }

    #[tokio::test]
    async fn test_unreachable_actor_is_not_found() {
        let (resolver, _) = resolver_with(json!({"id": ACTOR}));
        assert!(matches!(
            resolver
                .resolve_signature_key("https://other.example/users/bob#main-key")
                .await,
            KeyResolution::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_proof_key_from_assertion_method() {
        let public = PrivateKey::Ed25519(ed25519_private_key()).public_key();
        let method = format!("{ACTOR}#ed25519-key");
        let (resolver, _) = resolver_with(json!({
            "id": ACTOR,
            "assertionMethod": [{
                "id": method,
                "type": "Multikey",
                "controller": ACTOR,
                "publicKeyMultibase": public.to_multibase().expect("multibase"),
            }]
        }));

        assert_eq!(
            resolver.resolve_proof_key(&method).await,
            KeyResolution::Resolved {
                key: public,
                from_cache: false
            }
        );
    }

    #[tokio::test]
    async fn test_proof_key_rejects_cached_rsa_key() {
        let public = PrivateKey::Rsa(rsa_private_key()).public_key();
        let method = format!("{ACTOR}#main-key");
        let (resolver, _) = resolver_with(json!({"id": ACTOR}));
        resolver.store_key(&method, &public).await;

        assert!(matches!(
            resolver.resolve_proof_key(&method).await,
            KeyResolution::Unsupported(_)
        ));
    }
}
