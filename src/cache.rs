//! Read-through query cache.
//!
//! Entries are keyed by rendered query text and hold the raw rows returned
//! by the store, before any entity shaping. Only reads are written back;
//! mutations clear the owning mapper's cache.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::store::Rows;

/// Cache capability consulted by executors.
#[async_trait]
pub trait CacheEngine: Send + Sync {
    async fn get(&self, key: &str) -> Option<Rows>;

    fn set(&self, key: &str, rows: Rows);

    /// Drop every entry. Engines that cannot invalidate keep the default.
    fn clear(&self) {}
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
            ttl_secs: 60,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    rows: Rows,
    created_at: Instant,
}

/// In-memory cache with TTL and an entry bound.
#[derive(Debug)]
pub struct QueryCache {
    entries: DashMap<String, CacheEntry>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::with_capacity(config.max_entries.min(1024)),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn lookup(&self, key: &str) -> Option<Rows> {
        if !self.config.enabled {
            return None;
        }

        if let Some(entry) = self.entries.get(key) {
            if entry.created_at.elapsed() < self.config.ttl() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.rows.clone());
            }
            drop(entry);
            self.entries.remove(key);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn store(&self, key: &str, rows: Rows) {
        if !self.config.enabled {
            return;
        }

        if self.entries.len() >= self.config.max_entries && !self.entries.contains_key(key) {
            self.evict_expired();
            if self.entries.len() >= self.config.max_entries {
                tracing::debug!("cache full ({} entries), not storing", self.entries.len());
                return;
            }
        }

        self.entries.insert(
            key.to_string(),
            CacheEntry {
                rows,
                created_at: Instant::now(),
            },
        );
    }

    pub fn invalidate_all(&self) {
        let count = self.entries.len();
        self.entries.clear();
        tracing::debug!("invalidated {} cache entries", count);
    }

    fn evict_expired(&self) {
        let now = Instant::now();
        let ttl = self.config.ttl();
        self.entries
            .retain(|_, entry| now.duration_since(entry.created_at) < ttl);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[async_trait]
impl CacheEngine for QueryCache {
    async fn get(&self, key: &str) -> Option<Rows> {
        self.lookup(key)
    }

    fn set(&self, key: &str, rows: Rows) {
        self.store(key, rows)
    }

    fn clear(&self) {
        self.invalidate_all()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows() -> Rows {
        vec![json!({"id": 1}).as_object().cloned().unwrap_or_default()]
    }

    #[tokio::test]
    async fn test_cache_hit_miss() {
        let cache = QueryCache::default();
        let key = r#"select * from "users""#;

        assert!(cache.get(key).await.is_none());

        cache.set(key, rows());
        assert_eq!(cache.get(key).await, Some(rows()));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 50.0);
    }

    #[test]
    fn test_cache_clear() {
        let cache = QueryCache::default();
        cache.store("a", rows());
        cache.store("b", rows());
        CacheEngine::clear(&cache);
        assert!(cache.lookup("a").is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_cache_disabled() {
        let cache = QueryCache::new(CacheConfig {
            enabled: false,
            ..Default::default()
        });
        cache.store("a", rows());
        assert!(cache.lookup("a").is_none());
    }

    #[test]
    fn test_cache_expiry() {
        let cache = QueryCache::new(CacheConfig {
            ttl_secs: 0,
            ..Default::default()
        });
        cache.store("a", rows());
        assert!(cache.lookup("a").is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_cache_bound() {
        let cache = QueryCache::new(CacheConfig {
            max_entries: 1,
            ..Default::default()
        });
        cache.store("a", rows());
        cache.store("b", rows());
        assert!(cache.lookup("a").is_some());
        assert!(cache.lookup("b").is_none());
    }

    #[test]
    fn test_config_from_toml() {
        let config: CacheConfig = toml::from_str("ttl_secs = 5").unwrap();
        assert_eq!(config.ttl(), Duration::from_secs(5));
        assert!(config.enabled);
    }
}
