//! Local Cache - In-Process L1 Tier
//!
//! Moka-backed map from key to a versioned, timestamped, TTL-bound entry.
//! Never touches the network; it is an optimisation only and may transiently
//! disagree with the remote tier.

use moka::Expiry;
use moka::future::Cache;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use crate::pattern::glob_to_regex;

pub(crate) fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Cache entry with version and TTL information
///
/// Valid only while `created_at_epoch_ms + ttl > now`; expired entries are
/// never served.
#[derive(Debug)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub version: Option<String>,
    pub created_at_epoch_ms: u64,
    pub ttl: Duration,
    /// The remote copy of this value was gzipped
    pub compressed: bool,
    access_count: AtomicU64,
}

impl CacheEntry {
    fn new(key: &str, value: Value, ttl: Duration, version: Option<String>, compressed: bool) -> Self {
        Self {
            key: key.to_string(),
            value,
            version,
            created_at_epoch_ms: now_epoch_ms(),
            ttl,
            compressed,
            access_count: AtomicU64::new(0),
        }
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl.as_secs()
    }

    /// Number of reads served from this entry
    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// Time left before expiry (zero once expired)
    pub fn remaining_ttl(&self) -> Duration {
        let expires_at = self
            .created_at_epoch_ms
            .saturating_add(u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX));
        Duration::from_millis(expires_at.saturating_sub(now_epoch_ms()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining_ttl().is_zero()
    }
}

/// Per-entry expiry so Moka reclaims entries even if they are never read again
struct EntryExpiry;

impl Expiry<String, Arc<CacheEntry>> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<CacheEntry>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Arc<CacheEntry>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process L1 cache
///
/// Safe for concurrent `get`/`set`/`delete` from any number of tasks.
pub struct LocalCache {
    cache: Cache<String, Arc<CacheEntry>>,
}

impl LocalCache {
    /// Create new local cache bounded to `max_capacity` entries
    pub fn new(max_capacity: u64) -> Self {
        info!(capacity = max_capacity, "Initializing local cache (Moka)");

        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryExpiry)
            .build();

        Self { cache }
    }

    /// Get a live entry; expired entries are removed and reported as absent
    pub async fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let entry = self.cache.get(key).await?;
        if entry.is_expired() {
            self.cache.invalidate(key).await;
            debug!(key = %key, "[Local] Evicted expired entry");
            return None;
        }
        entry.access_count.fetch_add(1, Ordering::Relaxed);
        Some(entry)
    }

    /// Store `value`, stamped with the current time
    pub async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Duration,
        version: Option<String>,
        compressed: bool,
    ) {
        let entry = CacheEntry::new(key, value, ttl, version, compressed);
        self.cache.insert(key.to_string(), Arc::new(entry)).await;
        debug!(key = %key, ttl_ms = %ttl.as_millis(), "[Local] Cached key with TTL");
    }

    /// Remove `key`; returns whether a live entry was removed
    pub async fn delete(&self, key: &str) -> bool {
        self.cache
            .remove(key)
            .await
            .is_some_and(|entry| !entry.is_expired())
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
        debug!("[Local] Cleared");
    }

    /// Remove every key matching a glob pattern; returns the count removed
    pub async fn delete_matching(&self, pattern: &str) -> usize {
        self.delete_matching_keys(pattern).await.len()
    }

    /// Remove every key matching a glob pattern; returns the keys removed
    pub async fn delete_matching_keys(&self, pattern: &str) -> Vec<String> {
        let Some(re) = glob_to_regex(pattern) else {
            return Vec::new();
        };

        let matching: Vec<Arc<String>> = self
            .cache
            .iter()
            .filter(|(key, _)| re.is_match(key))
            .map(|(key, _)| key)
            .collect();

        let mut removed = Vec::with_capacity(matching.len());
        for key in matching {
            if self.delete(&key).await {
                removed.push(key.as_str().to_string());
            }
        }
        debug!(pattern = %pattern, count = removed.len(), "[Local] Removed keys matching pattern");
        removed
    }

    /// Number of entries, after applying pending evictions
    pub async fn len(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_then_get_tracks_access() {
        let cache = LocalCache::new(100);
        cache
            .set("user:1", json!({"name": "Alice"}), Duration::from_secs(60), Some("3".into()), false)
            .await;

        let entry = cache.get("user:1").await.unwrap();
        assert_eq!(entry.value, json!({"name": "Alice"}));
        assert_eq!(entry.version.as_deref(), Some("3"));
        assert_eq!(entry.ttl_secs(), 60);
        assert_eq!(entry.access_count(), 1);
        cache.get("user:1").await.unwrap();
        assert_eq!(entry.access_count(), 2);
    }

    #[tokio::test]
    async fn expired_entries_are_never_served() {
        let cache = LocalCache::new(100);
        cache.set("k", json!(1), Duration::from_millis(50), None, false).await;
        assert!(cache.get("k").await.is_some());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn delete_matching_only_touches_matches() {
        let cache = LocalCache::new(100);
        for key in ["user:1", "user:2", "order:1"] {
            cache.set(key, json!(key), Duration::from_secs(60), None, false).await;
        }
        assert_eq!(cache.delete_matching("user:*").await, 2);
        assert!(cache.get("user:1").await.is_none());
        assert!(cache.get("order:1").await.is_some());
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let cache = LocalCache::new(100);
        cache.set("a", json!(1), Duration::from_secs(60), None, false).await;
        cache.set("b", json!(2), Duration::from_secs(60), None, false).await;
        assert!(cache.delete("a").await);
        assert!(!cache.delete("a").await);
        cache.clear();
        assert!(cache.get("b").await.is_none());
    }
}
