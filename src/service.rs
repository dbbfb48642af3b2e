//! Tiered Cache Service - Unified Cache Operations
//!
//! Composes the local tier, the remote tier and the distributed lock:
//!
//! ```text
//! get:            L1 ──hit──▶ return
//!                  └─miss─▶ L2 ──hit──▶ backfill L1, return
//!                            └─miss─▶ None
//!
//! get_with_lock:  L2 ──hit──▶ return
//!                  └─miss─▶ lock "cache:{key}" ─▶ L2 again ──hit──▶ return
//!                                                  └─miss─▶ loader() ─▶ L1+L2
//! ```
//!
//! Plain `get`/`set` give no ordering between concurrent writers: each tier is
//! last-write-wins and L1 may lag L2 until the next read backfills it.

use dashmap::DashMap;
use futures_util::future::{BoxFuture, join_all};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::codec::JsonCodec;
use crate::config::{CacheConfig, CacheOptions};
use crate::error::{CacheError, CacheResult};
use crate::local::LocalCache;
use crate::lock::DistributedLock;
use crate::metrics::{CacheMetrics, CacheMetricsSnapshot};
use crate::remote::{HealthReport, HealthStatus, RemoteStoreAdapter, RemoteTtl};

/// `key:v:version`: one logical entry for one invalidation generation
pub fn versioned_key(key: &str, version: &str) -> String {
    format!("{key}:v:{version}")
}

fn version_key(namespace: &str) -> String {
    format!("cache:version:{namespace}")
}

/// What the first in-process caller of `get_with_lock` hands to the callers
/// queued behind it
enum SharedOutcome {
    Value(Value),
    LoaderFailed(String),
}

type InFlightSlot = Arc<Mutex<Option<SharedOutcome>>>;

/// RAII cleanup guard for in-flight request tracking
/// Ensures that entries are removed from `DashMap` even on early return or panic,
/// without removing a newer slot registered under the same key
struct CleanupGuard<'a> {
    map: &'a DashMap<String, InFlightSlot>,
    key: &'a str,
    slot: InFlightSlot,
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        self.map
            .remove_if(self.key, |_, current| Arc::ptr_eq(current, &self.slot));
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedVersion {
    version: u64,
    fetched_at: Instant,
}

type Loader<T> = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<T>> + Send>;

/// One key to pre-populate via [`TieredCacheService::warmup`]
pub struct WarmupEntry<T> {
    pub key: String,
    pub options: CacheOptions,
    loader: Loader<T>,
}

impl<T> WarmupEntry<T> {
    pub fn new<F, Fut>(key: impl Into<String>, options: CacheOptions, loader: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            key: key.into(),
            options,
            loader: Box::new(move || Box::pin(loader())),
        }
    }
}

/// Outcome of a warmup run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmupSummary {
    pub loaded: usize,
    pub failed: usize,
}

/// Metrics plus the state of both tiers
#[derive(Debug, Clone, Serialize)]
pub struct CacheMetricsReport {
    #[serde(flatten)]
    pub metrics: CacheMetricsSnapshot,
    pub local_entries: u64,
    pub remote: HealthReport,
}

/// Payload of the health endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheHealth {
    pub status: HealthStatus,
    pub connected_clients: Option<u64>,
    pub used_memory: Option<String>,
    pub hit_rate: f64,
}

/// Tiered Cache Service - Unified operations across L1 and L2
///
/// Construct once at process start (see [`CacheSystem`](crate::CacheSystem))
/// and share it behind an `Arc`.
pub struct TieredCacheService {
    local: Arc<LocalCache>,
    remote: Arc<RemoteStoreAdapter>,
    lock: Arc<DistributedLock>,
    config: CacheConfig,
    metrics: CacheMetrics,
    /// Namespace versions seen by this instance
    versions: DashMap<String, CachedVersion>,
    /// In-flight loads, so tasks of this instance queue locally instead of
    /// all polling the distributed lock
    in_flight_requests: DashMap<String, InFlightSlot>,
}

impl TieredCacheService {
    /// Create new cache service
    pub fn new(
        local: Arc<LocalCache>,
        remote: Arc<RemoteStoreAdapter>,
        lock: Arc<DistributedLock>,
        config: CacheConfig,
    ) -> Self {
        info!(
            remote_connected = remote.is_connected(),
            "Initializing tiered cache service"
        );

        Self {
            local,
            remote,
            lock,
            config,
            metrics: CacheMetrics::new(),
            versions: DashMap::new(),
            in_flight_requests: DashMap::new(),
        }
    }

    pub fn local(&self) -> &Arc<LocalCache> {
        &self.local
    }

    pub fn remote(&self) -> &Arc<RemoteStoreAdapter> {
        &self.remote
    }

    pub fn lock(&self) -> &Arc<DistributedLock> {
        &self.lock
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn resolve_ttl(&self, opts: &CacheOptions) -> Duration {
        opts.ttl
            .unwrap_or_else(|| self.config.ttl.for_priority(opts.priority))
    }

    /// Storage key and version tag for `key` under `opts`
    async fn storage_key(&self, key: &str, opts: &CacheOptions) -> (String, Option<String>) {
        if let Some(version) = &opts.version {
            return (versioned_key(key, version), Some(version.clone()));
        }
        if let Some(namespace) = &opts.namespace {
            let version = self.get_version(namespace).await.to_string();
            return (versioned_key(key, &version), Some(version));
        }
        (key.to_string(), None)
    }

    /// Read the remote tier and backfill L1 on a hit
    async fn remote_lookup<T: DeserializeOwned>(
        &self,
        storage_key: &str,
        version: Option<String>,
        fallback_ttl: Duration,
    ) -> Option<T> {
        let bytes = self.remote.get_raw(storage_key).await?;
        let value = self.remote.codec().decode_value(&bytes);
        let Some(typed) = JsonCodec::coerce::<T>(&value) else {
            warn!(key = %storage_key, expected = std::any::type_name::<T>(), "Remote value does not match the requested type");
            return None;
        };

        // Keep L1 no longer than the remote copy lives
        let ttl = match self.remote.remaining_ttl(storage_key).await {
            Some(RemoteTtl::Expires(left)) => left,
            Some(RemoteTtl::Persistent) => fallback_ttl,
            Some(RemoteTtl::Gone) => {
                debug!(key = %storage_key, "Remote entry expired during lookup");
                return None;
            }
            None => {
                debug!(key = %storage_key, "Remote TTL unknown; serving without L1 backfill");
                return Some(typed);
            }
        };
        self.local
            .set(storage_key, value, ttl, version, JsonCodec::is_compressed(&bytes))
            .await;
        debug!(key = %storage_key, ttl_ms = ttl.as_millis(), "Backfilled L1 from L2");
        Some(typed)
    }

    /// Get value from cache (L1 first, then L2 with backfill)
    ///
    /// # Returns
    /// * `Some(value)` - found in L1 or L2
    /// * `None` - absent, expired, or stored with a shape that does not fit `T`
    pub async fn get<T: DeserializeOwned>(&self, key: &str, opts: &CacheOptions) -> Option<T> {
        let (storage_key, version) = self.storage_key(key, opts).await;

        // Fast path: L1
        if let Some(entry) = self.local.get(&storage_key).await {
            if let Some(typed) = JsonCodec::coerce::<T>(&entry.value) {
                self.metrics.record_hit();
                return Some(typed);
            }
            warn!(key = %storage_key, expected = std::any::type_name::<T>(), "L1 value does not match the requested type");
        }

        if let Some(typed) = self
            .remote_lookup(&storage_key, version, self.resolve_ttl(opts))
            .await
        {
            self.metrics.record_distributed_hit();
            return Some(typed);
        }

        self.metrics.record_miss();
        None
    }

    /// `get` for callers working with untyped JSON
    pub async fn get_value(&self, key: &str, opts: &CacheOptions) -> Option<Value> {
        self.get::<Value>(key, opts).await
    }

    /// Store value in both tiers
    ///
    /// TTL comes from `opts.ttl`, otherwise from `opts.priority`. The tiers are
    /// written concurrently and independently. While a remote store is
    /// connected it is authoritative: the result is the L2 outcome, and a
    /// failed L2 write also drops the L1 copy so this instance does not serve
    /// what no other instance can see. In local-only mode the result is the
    /// L1 outcome.
    ///
    /// # Errors
    ///
    /// `CacheError::Serialization` when `value` cannot be encoded.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        opts: &CacheOptions,
    ) -> CacheResult<bool> {
        let json = serde_json::to_value(value)?;
        let encoded = self.remote.codec().encode(&json, opts.compress)?;
        let (storage_key, version) = self.storage_key(key, opts).await;
        let ttl = self.resolve_ttl(opts);

        let ((), l2_ok) = tokio::join!(
            self.local
                .set(&storage_key, json, ttl, version, encoded.compressed),
            self.remote.set_encoded(&storage_key, &encoded, Some(ttl)),
        );
        self.metrics.record_set();

        if !self.remote.is_connected() {
            debug!(key = %storage_key, "Cached in L1 only (no remote store)");
            return Ok(true);
        }
        if !l2_ok {
            warn!(key = %storage_key, "L2 write failed; dropping L1 copy");
            self.local.delete(&storage_key).await;
        }
        Ok(l2_ok)
    }

    /// Get or load value with stampede protection across the fleet
    ///
    /// 1. Check L2 directly
    /// 2. On a miss take the distributed lock `cache:{key}`
    /// 3. Check L2 again: a racing caller may have filled it while we waited
    /// 4. Still missing: run `loader` once and store the result in both tiers
    /// 5. Release the lock on every path
    ///
    /// Tasks of the same instance queue on an in-process mutex first, so only
    /// one of them contends for the distributed lock; the ones queued behind it
    /// receive its outcome, value or loader error. In local-only mode the
    /// distributed lock is skipped and L1 stands in for L2. When the store is
    /// attached but unreachable, the lock is skipped too and the loader runs
    /// without fleet-wide protection.
    ///
    /// `loader` runtime is not bounded here; wrap the call in your own timeout.
    ///
    /// # Errors
    ///
    /// - `CacheError::LockAcquisition` if the lock is held elsewhere and
    ///   retries ran out
    /// - `CacheError::Loader` if `loader` fails
    /// - `CacheError::Serialization` if the loaded value cannot be encoded
    pub async fn get_with_lock<T, F, Fut>(
        &self,
        key: &str,
        loader: F,
        ttl: Option<Duration>,
    ) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let ttl = ttl.unwrap_or(self.config.ttl.medium);

        let slot = self
            .in_flight_requests
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();
        let _cleanup_guard = CleanupGuard {
            map: &self.in_flight_requests,
            key,
            slot: Arc::clone(&slot),
        };
        let mut outcome = slot.lock().await;

        // Queued behind a caller of this instance that already finished
        match outcome.as_ref() {
            Some(SharedOutcome::Value(value)) => {
                if let Some(typed) = JsonCodec::coerce::<T>(value) {
                    self.metrics.record_hit();
                    return Ok(typed);
                }
            }
            Some(SharedOutcome::LoaderFailed(message)) => {
                return Err(CacheError::Loader(anyhow::anyhow!(message.clone())));
            }
            None => {}
        }

        let result = self.load_with_lock(key, loader, ttl).await;
        *outcome = match &result {
            Ok(value) => serde_json::to_value(value).ok().map(SharedOutcome::Value),
            Err(CacheError::Loader(e)) => Some(SharedOutcome::LoaderFailed(format!("{e:#}"))),
            Err(_) => None,
        };
        result
    }

    async fn load_with_lock<T, F, Fut>(&self, key: &str, loader: F, ttl: Duration) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if let Some(value) = self.lookup_for_load::<T>(key, ttl).await {
            return Ok(value);
        }

        if !self.remote.is_connected() {
            return self.load_and_store(key, loader, ttl).await;
        }

        let lock_name = format!("cache:{key}");
        let guard = match self.lock.hold(&lock_name, &self.lock.defaults()).await {
            Ok(guard) => guard,
            Err(e @ CacheError::LockAcquisition { .. }) => return Err(e),
            Err(e) => {
                warn!(key = %key, error = %e, "Lock store unreachable; loading without the distributed lock");
                return self.load_and_store(key, loader, ttl).await;
            }
        };

        // Double-check inside the lock
        let result = match self.lookup_for_load::<T>(key, ttl).await {
            Some(value) => {
                debug!(key = %key, "Filled by another caller while waiting for the lock");
                Ok(value)
            }
            None => self.load_and_store(key, loader, ttl).await,
        };
        guard.release().await;
        result
    }

    /// L2 when connected, L1 otherwise
    async fn lookup_for_load<T: DeserializeOwned>(&self, key: &str, ttl: Duration) -> Option<T> {
        if self.remote.is_connected() {
            let found = self.remote_lookup::<T>(key, None, ttl).await;
            if found.is_some() {
                self.metrics.record_distributed_hit();
            }
            return found;
        }

        let entry = self.local.get(key).await?;
        let found = JsonCodec::coerce::<T>(&entry.value);
        if found.is_some() {
            self.metrics.record_hit();
        }
        found
    }

    async fn load_and_store<T, F, Fut>(&self, key: &str, loader: F, ttl: Duration) -> CacheResult<T>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.metrics.record_miss();
        debug!(key = %key, "Computing fresh value (stampede protected)");
        let value = loader().await.map_err(CacheError::Loader)?;

        if !self.set(key, &value, &CacheOptions::with_ttl(ttl)).await? {
            warn!(key = %key, "Loaded value could not be cached; returning it uncached");
        }
        Ok(value)
    }

    /// Remove `key` from both tiers; `true` if either tier held it
    pub async fn delete(&self, key: &str) -> bool {
        let (l1, l2) = tokio::join!(self.local.delete(key), self.remote.delete(key));
        let removed = u64::from(l1) + u64::from(l2);
        self.metrics.record_deletes(removed);
        debug!(key = %key, l1 = l1, l2 = l2, "Deleted key");
        l1 || l2
    }

    /// Remove every key matching a glob pattern from both tiers
    ///
    /// Returns the number of distinct keys removed; per-tier counts are logged.
    /// On a single node L2 is enumerated with cursor-based `SCAN`; on a cluster
    /// it falls back to `KEYS` on every primary, which is O(keyspace).
    pub async fn delete_pattern(&self, pattern: &str) -> usize {
        let (l1_keys, l2_keys) = tokio::join!(
            self.local.delete_matching_keys(pattern),
            self.remote.delete_pattern_keys(pattern),
        );

        let l1_count = l1_keys.len();
        let l2_count = l2_keys.len();
        let distinct: HashSet<String> = l1_keys.into_iter().chain(l2_keys).collect();

        self.metrics
            .record_deletes(u64::try_from(distinct.len()).unwrap_or(u64::MAX));
        info!(
            pattern = %pattern,
            l1 = l1_count,
            l2 = l2_count,
            total = distinct.len(),
            "Deleted keys matching pattern"
        );
        distinct.len()
    }

    /// Atomic counter increment at the remote store
    ///
    /// # Errors
    ///
    /// `CacheError::Counter` on any store failure.
    pub async fn incr(&self, key: &str, amount: i64, ttl: Option<Duration>) -> CacheResult<i64> {
        self.remote.incr(key, amount, ttl).await
    }

    /// Atomic counter decrement at the remote store
    ///
    /// # Errors
    ///
    /// `CacheError::Counter` on any store failure.
    pub async fn decr(&self, key: &str, amount: i64, ttl: Option<Duration>) -> CacheResult<i64> {
        self.remote.decr(key, amount, ttl).await
    }

    // ===== Namespace versions =====

    /// Bump the version of `namespace`, invalidating every key tagged with an
    /// older version without enumerating them
    ///
    /// The counter lives in the shared store so other instances see the bump
    /// on their next `get_version` (within `version_cache_ttl`). In local-only
    /// mode only this instance's version is bumped.
    ///
    /// # Errors
    ///
    /// `CacheError::Counter` when the store is connected but the increment fails.
    pub async fn increment_version(&self, namespace: &str) -> CacheResult<u64> {
        let now = Instant::now();
        match self.remote.incr(&version_key(namespace), 1, None).await {
            Ok(version) => {
                let version = version.unsigned_abs();
                self.versions.insert(
                    namespace.to_string(),
                    CachedVersion {
                        version,
                        fetched_at: now,
                    },
                );
                info!(namespace = %namespace, version = version, "Namespace version bumped");
                Ok(version)
            }
            Err(e) if !self.remote.is_connected() => {
                let mut entry = self
                    .versions
                    .entry(namespace.to_string())
                    .or_insert(CachedVersion {
                        version: 0,
                        fetched_at: now,
                    });
                entry.version += 1;
                entry.fetched_at = now;
                warn!(namespace = %namespace, version = entry.version, error = %e, "Namespace version bumped locally only");
                Ok(entry.version)
            }
            Err(e) => Err(e),
        }
    }

    /// Current version of `namespace` (0 if never bumped)
    ///
    /// Local copy first; refreshed from the shared store once older than
    /// `version_cache_ttl`. Never goes backwards. A failed refresh keeps the
    /// last known version and retries on the next call.
    pub async fn get_version(&self, namespace: &str) -> u64 {
        let cached = self.versions.get(namespace).map(|entry| *entry);
        if let Some(cached) = cached {
            if !self.remote.is_connected()
                || cached.fetched_at.elapsed() < self.config.version_cache_ttl
            {
                return cached.version;
            }
        }

        let remote = match self.remote.try_get_raw(&version_key(namespace)).await {
            Ok(bytes) => bytes
                .and_then(|bytes| self.remote.codec().decode::<u64>(&bytes))
                .unwrap_or(0),
            Err(e) => {
                if !matches!(e, CacheError::Unavailable) {
                    warn!(namespace = %namespace, error = %e, "Version lookup failed; keeping the last known version");
                }
                return cached.map_or(0, |c| c.version);
            }
        };
        let version = remote.max(cached.map_or(0, |c| c.version));
        self.versions.insert(
            namespace.to_string(),
            CachedVersion {
                version,
                fetched_at: Instant::now(),
            },
        );
        version
    }

    /// `key` tagged with the current version of `namespace`
    pub async fn get_versioned_key(&self, key: &str, namespace: &str) -> String {
        let version = self.get_version(namespace).await;
        versioned_key(key, &version.to_string())
    }

    // ===== Warmup =====

    /// Pre-populate the cache
    ///
    /// Entries are processed in batches of `warmup_batch_size`; loaders in a
    /// batch run concurrently and batches are separated by
    /// `warmup_batch_delay`. A failing entry is logged and skipped.
    pub async fn warmup<T: Serialize>(&self, entries: Vec<WarmupEntry<T>>) -> WarmupSummary {
        let batch_size = self.config.warmup_batch_size.max(1);
        let total = entries.len();
        info!(entries = total, batch_size = batch_size, "Cache warmup started");

        let mut summary = WarmupSummary::default();
        let mut remaining = entries.into_iter().peekable();

        while remaining.peek().is_some() {
            let batch: Vec<WarmupEntry<T>> = remaining.by_ref().take(batch_size).collect();
            let results = join_all(batch.into_iter().map(|entry| self.warm_one(entry))).await;

            for ok in results {
                if ok {
                    summary.loaded += 1;
                } else {
                    summary.failed += 1;
                }
            }

            if remaining.peek().is_some() {
                tokio::time::sleep(self.config.warmup_batch_delay).await;
            }
        }

        info!(loaded = summary.loaded, failed = summary.failed, "Cache warmup finished");
        summary
    }

    async fn warm_one<T: Serialize>(&self, entry: WarmupEntry<T>) -> bool {
        let WarmupEntry {
            key,
            options,
            loader,
        } = entry;

        let value = match loader().await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Warmup loader failed");
                return false;
            }
        };
        match self.set(&key, &value, &options).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(key = %key, error = %e, "Warmup value could not be cached");
                false
            }
        }
    }

    // ===== Observability =====

    /// Counters plus the health of both tiers
    pub async fn get_metrics(&self) -> CacheMetricsReport {
        CacheMetricsReport {
            metrics: self.metrics.snapshot(),
            local_entries: self.local.len().await,
            remote: self.remote.health_check().await,
        }
    }

    /// Counters only, without touching the network
    pub fn metrics_snapshot(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Zero every counter, e.g. at the start of a reporting window
    pub fn reset_metrics(&self) {
        self.metrics.reset();
        debug!("Cache metrics reset");
    }

    /// Health endpoint payload
    pub async fn health(&self) -> CacheHealth {
        let report = self.remote.health_check().await;
        CacheHealth {
            status: report.status,
            connected_clients: report.details.connected_clients,
            used_memory: report.details.used_memory,
            hit_rate: self.metrics.snapshot().hit_rate,
        }
    }

    /// Drop every L1 entry on this instance
    pub fn clear_local(&self) {
        self.local.clear();
        self.versions.clear();
    }
}
