//! User-embedding cache contract.
//!
//! The cache holds derived data only: every entry can be dropped and
//! recomputed at any time, so writes are last-writer-wins per user key
//! and unavailability must degrade to direct computation, never to a
//! request failure. Entries are overwritten wholesale on each refresh;
//! there is no incremental update.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{RecError, RecResult};

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Key convention shared with external cache consumers.
pub fn user_embedding_key(user_id: &str) -> String {
    format!("user_emb:{user_id}")
}

/// Cached per-user embedding blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEmbeddingEntry {
    /// Recent (order-sensitive) raw movie ids the vector was built from.
    pub sequence_ids: Vec<i64>,
    /// Older (order-insensitive) raw movie ids.
    pub taste_ids: Vec<i64>,
    /// The fused user embedding.
    pub vector: Vec<f32>,
}

/// Read/write contract for an external key-value store.
///
/// Implementations wrap whatever transport backs the deployment; the
/// engine only relies on string get/set with a TTL.
pub trait EmbeddingCache: Send + Sync {
    /// Fetch a value; `Ok(None)` on miss or expiry.
    fn get(&self, key: &str) -> RecResult<Option<String>>;
    /// Store a value with a lifetime, overwriting any previous value.
    fn set(&self, key: &str, value: &str, ttl: Duration) -> RecResult<()>;
}

/// Hit/miss counters, relaxed ordering; statistics only.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheMetrics {
    /// Hits so far.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Misses (including expiries) so far.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

/// In-memory TTL cache; the reference backend and the test double for
/// the contract.
#[derive(Debug, Default)]
pub struct InMemoryEmbeddingCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
    metrics: CacheMetrics,
}

impl InMemoryEmbeddingCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Observed hit/miss counters.
    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }
}

impl EmbeddingCache for InMemoryEmbeddingCache {
    fn get(&self, key: &str) -> RecResult<Option<String>> {
        let guard = self
            .entries
            .read()
            .map_err(|_| RecError::CacheUnavailable("cache lock poisoned".to_string()))?;
        match guard.get(key) {
            Some((value, deadline)) if Instant::now() < *deadline => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value.clone()))
            }
            _ => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> RecResult<()> {
        let mut guard = self
            .entries
            .write()
            .map_err(|_| RecError::CacheUnavailable("cache lock poisoned".to_string()))?;
        let now = Instant::now();
        guard.retain(|_, (_, deadline)| *deadline > now);
        guard.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_convention_is_stable() {
        assert_eq!(user_embedding_key("42"), "user_emb:42");
    }

    #[test]
    fn set_then_get_round_trips() {
        let cache = InMemoryEmbeddingCache::new();
        cache.set("user_emb:1", "{\"x\":1}", DEFAULT_TTL).unwrap();
        assert_eq!(
            cache.get("user_emb:1").unwrap().as_deref(),
            Some("{\"x\":1}")
        );
        assert_eq!(cache.metrics().hits(), 1);
    }

    #[test]
    fn expired_entries_read_as_misses() {
        let cache = InMemoryEmbeddingCache::new();
        cache
            .set("user_emb:1", "v", Duration::from_millis(0))
            .unwrap();
        assert_eq!(cache.get("user_emb:1").unwrap(), None);
        assert_eq!(cache.metrics().misses(), 1);
    }

    #[test]
    fn overwrite_is_last_writer_wins() {
        let cache = InMemoryEmbeddingCache::new();
        cache.set("k", "old", DEFAULT_TTL).unwrap();
        cache.set("k", "new", DEFAULT_TTL).unwrap();
        assert_eq!(cache.get("k").unwrap().as_deref(), Some("new"));
    }

    #[test]
    fn entry_json_matches_contract() {
        let entry = UserEmbeddingEntry {
            sequence_ids: vec![1, 2],
            taste_ids: vec![],
            vector: vec![0.5, -0.5],
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("sequence_ids").is_some());
        assert!(json.get("taste_ids").is_some());
        assert!(json.get("vector").is_some());
    }
}
