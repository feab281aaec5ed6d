//! Data layer module
//!
//! Handles volatile storage:
//! - Key-value store backends (TTL + per-namespace LRU)
//! - Key cache used by signature verification

mod cache;
mod kv;

pub use cache::KeyCache;
pub use kv::{DEFAULT_NAMESPACE, InMemoryKv, KeyValueStore, namespace_of};
