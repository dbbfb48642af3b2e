//! Remote Store Trait
//!
//! This module defines the seam between the cache and the shared network
//! key-value store. Implement [`RemoteStore`] to plug in a different backend.
//!
//! # Architecture
//!
//! - `RemoteStore`: byte-level primitives every L2 backend must provide,
//!   including the atomic ones the distributed lock and counters rely on
//! - `StoreStats`: optional server statistics reported by health checks
//!
//! # Example: Custom Backend
//!
//! ```rust,ignore
//! use tiered_cache::{RemoteStore, CacheResult, async_trait};
//! use std::time::Duration;
//!
//! struct MyStore {
//!     // Your implementation
//! }
//!
//! #[async_trait]
//! impl RemoteStore for MyStore {
//!     async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
//!         // Your implementation
//!     }
//!
//!     // ... implement the remaining primitives
//! }
//! ```

use async_trait::async_trait;
use std::time::Duration;

use crate::error::CacheResult;

/// Server statistics reported by [`RemoteStore::stats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub connected_clients: Option<u64>,
    /// Human-readable memory usage (e.g. `"1.23M"`)
    pub used_memory: Option<String>,
}

/// Byte-level operations on the shared store
///
/// Every method is network I/O and must be safe to call concurrently.
/// Failures are reported as errors; converting them into safe defaults is the
/// job of [`RemoteStoreAdapter`](crate::remote::RemoteStoreAdapter), not of the
/// backend.
///
/// # Atomicity
///
/// `set_nx_px`, `compare_and_delete` and `incr_by` (expiry included) must each be a single
/// atomic operation at the store. The distributed lock and the namespace
/// version counters are only correct if they are.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Get raw bytes for `key`; `Ok(None)` when absent
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Store `value`, with expiry when `ttl` is given
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()>;

    /// Set `key` to `value` only if it is absent, expiring after `ttl`
    ///
    /// Returns `true` when the value was written.
    async fn set_nx_px(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<bool>;

    /// Delete `key` only if its current value equals `expected`
    ///
    /// Returns `true` when the key was deleted.
    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> CacheResult<bool>;

    /// Delete a key; returns `true` if it existed
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Delete several keys; returns the number removed
    async fn delete_many(&self, keys: &[String]) -> CacheResult<usize>;

    /// Enumerate keys matching a glob pattern (`*`, `?`, `[...]`)
    async fn scan_keys(&self, pattern: &str) -> CacheResult<Vec<String>>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Set expiry on an existing key; returns `false` when the key is absent
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    /// Remaining TTL in seconds: `-2` absent, `-1` no expiry
    async fn ttl(&self, key: &str) -> CacheResult<i64>;

    /// Remaining TTL in milliseconds: `-2` absent, `-1` no expiry
    async fn pttl(&self, key: &str) -> CacheResult<i64>;

    /// Atomically add `amount` to the integer at `key` (absent = 0)
    ///
    /// When `ttl` is given and this call creates the counter, the expiry is
    /// set in the same atomic step, so a counter can never be left behind
    /// without one.
    async fn incr_by(&self, key: &str, amount: i64, ttl: Option<Duration>) -> CacheResult<i64>;

    /// Round-trip liveness check
    async fn ping(&self) -> CacheResult<()>;

    /// Server statistics; backends without them return the default
    async fn stats(&self) -> CacheResult<StoreStats> {
        Ok(StoreStats::default())
    }

    /// Get the name of this backend
    ///
    /// This is used for logging and health reporting.
    fn name(&self) -> &'static str {
        "unknown"
    }
}
