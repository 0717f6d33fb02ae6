// Dramabox Core - REST facade over the Dramabox mobile API
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Response cache with per-entry TTL
//!
//! Memoizes upstream results by a semantic key (operation + arguments +
//! language). Values are stored behind `Arc` and handed out as clones of that
//! `Arc`, so a hit returns the very same object that was written. Entries are
//! never mutated; a write replaces the whole entry.
//!
//! Storage is a bounded `moka` cache. Each entry expires after its own TTL and
//! the least useful entries are evicted once `max_entries` is reached. Lookups
//! also check the entry's deadline on the tokio clock, so paused-time tests see
//! the same expiry as production.
//!
//! The cache is purely a latency/cost optimization: every cached operation
//! can be re-derived by repeating the upstream call.

use moka::future::Cache as MokaCache;
use moka::Expiry;
use serde::Serialize;
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Upper bound on resident entries when none is configured
pub const DEFAULT_MAX_ENTRIES: u64 = 10_000;

#[derive(Clone)]
struct CacheEntry {
    value: Arc<dyn Any + Send + Sync>,
    ttl: Duration,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Per-entry expiration: every write starts a fresh TTL
struct EntryExpiry;

impl Expiry<String, CacheEntry> for EntryExpiry {
    fn expire_after_create(&self, _key: &String, entry: &CacheEntry, _created_at: std::time::Instant) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &CacheEntry,
        _updated_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// Snapshot of cache state for the debug endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Live entries
    pub entries: usize,
    /// Entries still held in memory, live or not yet reclaimed
    pub resident: u64,
    pub capacity: u64,
    pub hits: u64,
    pub misses: u64,
    pub keys: Vec<String>,
}

/// Process-wide keyed cache
pub struct ResponseCache {
    entries: MokaCache<String, CacheEntry>,
    capacity: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("capacity", &self.capacity)
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache holding at most `max_entries` entries
    pub fn with_capacity(max_entries: u64) -> Self {
        let entries = MokaCache::builder()
            .max_capacity(max_entries)
            .expire_after(EntryExpiry)
            .build();

        debug!(max_entries, "response cache created");

        Self {
            entries,
            capacity: max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a live entry of type `T`
    ///
    /// Expired entries and entries of a different type count as misses.
    pub async fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let value = match self.entries.get(key).await {
            Some(entry) if entry.is_live(Instant::now()) => entry.value.downcast::<T>().ok(),
            Some(_) => {
                self.entries.invalidate(key).await;
                None
            }
            None => None,
        };

        match value {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, "cache hit");
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store `value` under `key` for `ttl`
    pub async fn set<T: Any + Send + Sync>(&self, key: &str, value: Arc<T>, ttl: Duration) {
        let entry = CacheEntry {
            value,
            ttl,
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(key.to_string(), entry).await;
    }

    /// Drop a single key; missing keys are ignored
    pub async fn remove(&self, key: &str) {
        self.entries.invalidate(key).await;
    }

    /// Drop every entry and reset counters
    pub async fn clear(&self) {
        let count = self.entries.entry_count();
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        debug!(count, "cache cleared");
    }

    /// Drop every entry whose key starts with `prefix`
    pub async fn remove_prefix(&self, prefix: &str) {
        let doomed: Vec<Arc<String>> = self
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key)
            .collect();

        for key in doomed {
            self.entries.invalidate(key.as_str()).await;
        }
    }

    /// Entries held in memory after pending evictions have run
    pub async fn resident(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub async fn stats(&self) -> CacheStats {
        let resident = self.resident().await;
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, _)| key.as_ref().clone())
            .collect();
        keys.sort();

        CacheStats {
            entries: keys.len(),
            resident,
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            keys,
        }
    }
}

/// Build a cache key from an operation name and its arguments
pub fn cache_key(operation: &str, parts: &[&str]) -> String {
    let mut key = operation.to_string();
    for part in parts {
        key.push(':');
        key.push_str(part);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get_returns_same_arc() {
        let cache = ResponseCache::new();
        let value = Arc::new(vec![1, 2, 3]);
        cache.set("k", value.clone(), Duration::from_secs(60)).await;

        let hit = cache.get::<Vec<i32>>("k").await.unwrap();
        assert!(Arc::ptr_eq(&hit, &value));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = ResponseCache::new();
        cache.set("k", Arc::new("v".to_string()), Duration::from_secs(10)).await;

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(cache.get::<String>("k").await.is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get::<String>("k").await.is_none());
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_wrong_type_is_a_miss() {
        let cache = ResponseCache::new();
        cache.set("k", Arc::new(42u32), Duration::from_secs(60)).await;
        assert!(cache.get::<String>("k").await.is_none());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_entry() {
        let cache = ResponseCache::new();
        cache.set("k", Arc::new(1u32), Duration::from_secs(60)).await;
        cache.set("k", Arc::new(2u32), Duration::from_secs(60)).await;
        assert_eq!(*cache.get::<u32>("k").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_stats_and_clear() {
        let cache = ResponseCache::new();
        cache.set("b", Arc::new(1u32), Duration::from_secs(60)).await;
        cache.set("a", Arc::new(2u32), Duration::from_secs(60)).await;
        let _ = cache.get::<u32>("a").await;
        let _ = cache.get::<u32>("missing").await;

        let stats = cache.stats().await;
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.keys, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);

        cache.clear().await;
        let stats = cache.stats().await;
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.hits, 0);
    }

    #[tokio::test]
    async fn test_remove_prefix() {
        let cache = ResponseCache::new();
        cache.set("token:in", Arc::new(1u32), Duration::from_secs(60)).await;
        cache.set("token:en", Arc::new(1u32), Duration::from_secs(60)).await;
        cache.set("search:x", Arc::new(1u32), Duration::from_secs(60)).await;

        cache.remove_prefix("token:").await;
        assert_eq!(cache.stats().await.keys, vec!["search:x".to_string()]);
    }

    #[tokio::test]
    async fn test_expired_entries_are_released() {
        let cache = ResponseCache::new();
        for i in 0..10_000 {
            let key = cache_key("search", &[&format!("kw{}", i), "1", "20", "en"]);
            cache.set(&key, Arc::new(i), Duration::from_millis(50)).await;
        }
        assert!(cache.resident().await > 0);

        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert_eq!(cache.resident().await, 0);
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_capacity_bounds_resident_entries() {
        let cache = ResponseCache::with_capacity(100);
        for i in 0..1_000u32 {
            cache.set(&format!("k{}", i), Arc::new(i), Duration::from_secs(600)).await;
        }

        let stats = cache.stats().await;
        assert!(stats.resident <= 100, "resident = {}", stats.resident);
        assert_eq!(stats.capacity, 100);
    }

    #[test]
    fn test_cache_key() {
        assert_eq!(cache_key("detail", &["42", "en"]), "detail:42:en");
        assert_eq!(cache_key("categories", &[]), "categories");
    }
}
