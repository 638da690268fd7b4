//! Layered TTL cache used by adapters for per-call result caching.
//!
//! Adapters only talk to the [`CacheStore`] trait. Store failures are never
//! fatal to a tool call: the adapter logs them and treats the lookup as a
//! miss.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Default maximum number of entries held by [`MemoryCache`].
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Cache namespace. Keys from different layers never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheLayer {
    Analysis,
    Generation,
    Coverage,
    General,
}

impl CacheLayer {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Generation => "generation",
            Self::Coverage => "coverage",
            Self::General => "general",
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

/// Keyed TTL store, namespaced by layer.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fresh value for `key`, or `None` when missing or expired.
    async fn get(&self, layer: CacheLayer, key: &str) -> Result<Option<Value>, CacheError>;

    /// Value for `key` even if its TTL has elapsed.
    ///
    /// Used by the cache fallback strategy. Stores that drop expired
    /// entries eagerly may simply return the fresh value.
    async fn get_stale(&self, layer: CacheLayer, key: &str) -> Result<Option<Value>, CacheError> {
        self.get(layer, key).await
    }

    async fn set(
        &self,
        layer: CacheLayer,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    async fn invalidate(&self, layer: CacheLayer, key: &str) -> Result<(), CacheError>;

    /// Number of entries currently held, expired ones included.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    /// Expires strictly after the TTL has elapsed.
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

/// In-process cache backed by a hash map.
///
/// Concurrent writers of the same key are last-writer-wins. Expired entries
/// stay readable through [`CacheStore::get_stale`] until they are replaced,
/// invalidated, purged, or evicted.
pub struct MemoryCache {
    entries: RwLock<HashMap<(CacheLayer, String), CacheEntry>>,
    max_entries: usize,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        before - entries.len()
    }

    /// Oldest-first, one entry at a time. Expired entries are not purged
    /// here; they remain the stale copies served by `get_stale`.
    fn evict_for_insert(entries: &mut HashMap<(CacheLayer, String), CacheEntry>, max: usize) {
        while entries.len() >= max {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, layer: CacheLayer, key: &str) -> Result<Option<Value>, CacheError> {
        let entries = self.entries.read();
        Ok(entries
            .get(&(layer, key.to_string()))
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value.clone()))
    }

    async fn get_stale(&self, layer: CacheLayer, key: &str) -> Result<Option<Value>, CacheError> {
        let entries = self.entries.read();
        Ok(entries
            .get(&(layer, key.to_string()))
            .map(|entry| entry.value.clone()))
    }

    async fn set(
        &self,
        layer: CacheLayer,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut entries = self.entries.write();
        let map_key = (layer, key.to_string());
        if !entries.contains_key(&map_key) {
            Self::evict_for_insert(&mut entries, self.max_entries);
        }
        entries.insert(
            map_key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                ttl,
            },
        );
        Ok(())
    }

    async fn invalidate(&self, layer: CacheLayer, key: &str) -> Result<(), CacheError> {
        self.entries.write().remove(&(layer, key.to_string()));
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}
