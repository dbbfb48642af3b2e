//! In-Memory Store - `DashMap` Remote Store Backend
//!
//! A process-local implementation of [`RemoteStore`] with the same atomicity
//! guarantees as the Redis backend. Useful for single-instance deployments,
//! tests and benchmarks: several `TieredCacheService` instances sharing one
//! `Arc<MemoryStore>` behave like a fleet sharing one Redis.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::{CacheError, CacheResult};
use crate::pattern::glob_to_regex;
use crate::traits::{RemoteStore, StoreStats};

/// Writes between two sweeps of expired entries
const DEFAULT_SWEEP_EVERY: u64 = 1024;

/// Stored value with expiration tracking
#[derive(Debug, Clone)]
struct StoredValue {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Instant::now() >= expires_at)
    }

    fn remaining_ms(&self) -> i64 {
        match self.expires_at {
            None => -1,
            Some(at) => {
                let remaining = at.saturating_duration_since(Instant::now()).as_millis();
                i64::try_from(remaining).unwrap_or(i64::MAX)
            }
        }
    }
}

/// Concurrent in-memory store using `DashMap`
///
/// **Semantics**:
/// - TTL is honoured lazily on access (like Redis passive expiry), and every
///   `sweep_every` writes the whole map is swept so keys that are never read
///   again are still reclaimed
/// - `set_nx_px` and `incr_by` use the `DashMap` entry API, so they are atomic
///   with respect to other callers
/// - `compare_and_delete` uses `remove_if`, a single atomic check-and-remove
///
/// **Example**:
/// ```rust
/// use tiered_cache::backends::MemoryStore;
/// use tiered_cache::RemoteStore;
/// use std::time::Duration;
///
/// # async fn example() -> tiered_cache::CacheResult<()> {
/// let store = MemoryStore::new();
/// assert!(store.set_nx_px("lock:a", b"token", Duration::from_secs(1)).await?);
/// assert!(!store.set_nx_px("lock:a", b"other", Duration::from_secs(1)).await?);
/// # Ok(())
/// # }
/// ```
pub struct MemoryStore {
    map: Arc<DashMap<String, StoredValue>>,
    /// When set, every operation fails as if the network were down
    outage: AtomicBool,
    writes: AtomicU64,
    sweep_every: u64,
}

impl MemoryStore {
    /// Create new in-memory store
    pub fn new() -> Self {
        Self::with_sweep_every(DEFAULT_SWEEP_EVERY)
    }

    /// Create a store that sweeps expired entries every `writes` writes
    pub fn with_sweep_every(writes: u64) -> Self {
        info!(sweep_every = writes, "Initializing in-memory remote store (DashMap)");

        Self {
            map: Arc::new(DashMap::new()),
            outage: AtomicBool::new(false),
            writes: AtomicU64::new(0),
            sweep_every: writes.max(1),
        }
    }

    /// Make every subsequent call fail (or succeed again)
    ///
    /// Lets callers exercise failover paths without a real network.
    pub fn simulate_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    /// Remove expired entries; returns how many were dropped
    pub fn cleanup_expired(&self) -> usize {
        let mut removed = 0;
        self.map.retain(|_, entry| {
            if entry.is_expired() {
                removed += 1;
                false
            } else {
                true
            }
        });
        if removed > 0 {
            debug!(count = removed, "[Memory] Cleaned up expired entries");
        }
        removed
    }

    /// Get current entry count (including not-yet-reclaimed expired entries)
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Count a write and sweep when due; call with no map guard held
    fn after_write(&self) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % self.sweep_every == 0 {
            self.cleanup_expired();
        }
    }

    fn check(&self) -> CacheResult<()> {
        if self.outage.load(Ordering::SeqCst) {
            Err(CacheError::Connection("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }

    fn live(&self, key: &str) -> Option<StoredValue> {
        let entry = self.map.get(key)?;
        if entry.is_expired() {
            drop(entry);
            self.map.remove_if(key, |_, v| v.is_expired());
            None
        } else {
            Some(entry.value().clone())
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.check()?;
        Ok(self.live(key).map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()> {
        self.check()?;
        self.map
            .insert(key.to_string(), StoredValue::new(value.to_vec(), ttl));
        self.after_write();
        Ok(())
    }

    async fn set_nx_px(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<bool> {
        self.check()?;
        let written = match self.map.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(StoredValue::new(value.to_vec(), Some(ttl)));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::new(value.to_vec(), Some(ttl)));
                true
            }
        };
        if written {
            self.after_write();
        }
        Ok(written)
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> CacheResult<bool> {
        self.check()?;
        Ok(self
            .map
            .remove_if(key, |_, v| !v.is_expired() && v.value == expected)
            .is_some())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.check()?;
        Ok(self
            .map
            .remove(key)
            .is_some_and(|(_, v)| !v.is_expired()))
    }

    async fn delete_many(&self, keys: &[String]) -> CacheResult<usize> {
        self.check()?;
        Ok(keys
            .iter()
            .filter(|key| self.map.remove(key.as_str()).is_some_and(|(_, v)| !v.is_expired()))
            .count())
    }

    async fn scan_keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.check()?;
        let Some(re) = glob_to_regex(pattern) else {
            return Ok(Vec::new());
        };
        Ok(self
            .map
            .iter()
            .filter(|entry| !entry.is_expired() && re.is_match(entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.check()?;
        Ok(self.live(key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.check()?;
        match self.map.get_mut(key) {
            Some(mut entry) if !entry.is_expired() => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> CacheResult<i64> {
        self.check()?;
        Ok(match self.live(key).map(|entry| entry.remaining_ms()) {
            None => -2,
            Some(-1) => -1,
            Some(ms) => ms.saturating_add(500) / 1000,
        })
    }

    async fn pttl(&self, key: &str) -> CacheResult<i64> {
        self.check()?;
        Ok(self.live(key).map_or(-2, |entry| entry.remaining_ms()))
    }

    async fn incr_by(&self, key: &str, amount: i64, ttl: Option<Duration>) -> CacheResult<i64> {
        self.check()?;
        let parse = |bytes: &[u8]| -> CacheResult<i64> {
            std::str::from_utf8(bytes)
                .ok()
                .and_then(|s| s.trim().parse::<i64>().ok())
                .ok_or_else(|| {
                    CacheError::Backend("value is not an integer or out of range".to_string())
                })
        };

        let next = match self.map.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let created = occupied.get().is_expired();
                let current = if created { 0 } else { parse(&occupied.get().value)? };
                let next = current
                    .checked_add(amount)
                    .ok_or_else(|| CacheError::Backend("increment would overflow".to_string()))?;
                if created {
                    occupied.insert(StoredValue::new(next.to_string().into_bytes(), ttl));
                } else {
                    occupied.get_mut().value = next.to_string().into_bytes();
                }
                next
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::new(amount.to_string().into_bytes(), ttl));
                amount
            }
        };
        self.after_write();
        Ok(next)
    }

    async fn ping(&self) -> CacheResult<()> {
        self.check()
    }

    async fn stats(&self) -> CacheResult<StoreStats> {
        self.check()?;
        let bytes: usize = self
            .map
            .iter()
            .map(|entry| entry.key().len() + entry.value.len())
            .sum();
        Ok(StoreStats {
            connected_clients: Some(1),
            used_memory: Some(format!("{bytes}B")),
        })
    }

    fn name(&self) -> &'static str {
        "Memory"
    }
}
