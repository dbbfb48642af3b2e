//! Remote Store Adapter
//!
//! Resilient wrapper over a [`RemoteStore`]. It owns the connection lifecycle
//! (topology selection, retry with exponential backoff) and converts transient
//! failures into safe defaults so that an unreachable store degrades the cache
//! to local-only mode instead of failing requests.
//!
//! The one exception is atomic counters: `incr`/`decr` propagate a typed error,
//! since a silent `0` would corrupt rate limits and similar counters.

use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::codec::{Encoded, JsonCodec};
use crate::config::RemoteStoreConfig;
use crate::error::{CacheError, CacheResult};
use crate::traits::RemoteStore;

/// Liveness of the remote tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Down,
}

/// Details gathered by [`RemoteStoreAdapter::health_check`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthDetails {
    pub backend: Option<String>,
    pub latency_ms: Option<u64>,
    pub connected_clients: Option<u64>,
    pub used_memory: Option<String>,
    pub error: Option<String>,
}

/// Health of the remote tier
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub details: HealthDetails,
}

impl HealthReport {
    fn down(error: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Down,
            details: HealthDetails {
                error: Some(error.into()),
                ..HealthDetails::default()
            },
        }
    }
}

/// Remaining lifetime of a remote key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteTtl {
    Expires(Duration),
    /// The key exists without an expiry
    Persistent,
    /// Absent, or expired while being looked at
    Gone,
}

/// Resilient access to the shared store
///
/// Every method is safe to call concurrently. While no store is connected,
/// reads return `None`, writes return `false`, and counters fail with
/// [`CacheError::Unavailable`].
pub struct RemoteStoreAdapter {
    store: RwLock<Option<Arc<dyn RemoteStore>>>,
    config: RemoteStoreConfig,
    codec: JsonCodec,
}

impl RemoteStoreAdapter {
    /// Adapter that will connect according to `config` (call [`connect`](Self::connect))
    pub fn new(config: RemoteStoreConfig, codec: JsonCodec) -> Self {
        Self {
            store: RwLock::new(None),
            config,
            codec,
        }
    }

    /// Adapter over an already constructed store
    pub fn with_store(store: Arc<dyn RemoteStore>, codec: JsonCodec) -> Self {
        info!(backend = store.name(), "Remote store attached");
        Self {
            store: RwLock::new(Some(store)),
            config: RemoteStoreConfig::default(),
            codec,
        }
    }

    /// Adapter with no remote tier at all (local-only mode)
    pub fn disconnected() -> Self {
        Self::new(RemoteStoreConfig::default(), JsonCodec::default())
    }

    /// Connect to the configured topology, retrying with exponential backoff
    ///
    /// Never fails: when every attempt is exhausted the error is logged and the
    /// adapter stays in local-only mode. Returns whether a store is connected.
    pub async fn connect(&self) -> bool {
        if self.is_connected() {
            return true;
        }

        #[cfg(feature = "redis")]
        {
            let attempts = self.config.connect_retries.max(1);
            for attempt in 1..=attempts {
                match crate::backends::RedisStore::from_config(&self.config).await {
                    Ok(store) => {
                        info!(
                            attempt = attempt,
                            cluster = self.config.cluster,
                            backend = store.name(),
                            "Remote store connected"
                        );
                        *self.store.write() = Some(Arc::new(store));
                        return true;
                    }
                    Err(e) => {
                        warn!(attempt = attempt, max_attempts = attempts, error = %e, "Remote store connection attempt failed");
                        if attempt < attempts {
                            tokio::time::sleep(self.config.backoff_for(attempt)).await;
                        }
                    }
                }
            }
            error!(
                attempts = attempts,
                "Remote store unreachable, giving up; cache is running in local-only mode"
            );
        }

        #[cfg(not(feature = "redis"))]
        warn!("Built without the `redis` feature; cache is running in local-only mode");

        false
    }

    /// Whether a remote store is attached
    pub fn is_connected(&self) -> bool {
        self.store.read().is_some()
    }

    /// Codec used for every value written through this adapter
    pub fn codec(&self) -> &JsonCodec {
        &self.codec
    }

    fn store(&self) -> Option<Arc<dyn RemoteStore>> {
        self.store.read().clone()
    }

    // ===== Values =====

    /// Raw bytes for `key`; `None` when absent, disconnected or on error
    pub async fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        match self.try_get_raw(key).await {
            Ok(value) => value,
            Err(CacheError::Unavailable) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Remote get failed");
                None
            }
        }
    }

    /// Raw bytes for `key`, for callers that must tell absent from unreachable
    ///
    /// # Errors
    ///
    /// `CacheError::Unavailable` in local-only mode, or the store failure.
    pub async fn try_get_raw(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let store = self.store().ok_or(CacheError::Unavailable)?;
        store.get(key).await
    }

    /// Get and decode `key`
    ///
    /// Payloads that do not fit `T` are reported as absent and logged.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get_raw(key).await?;
        let decoded = self.codec.decode(&bytes);
        if decoded.is_none() {
            warn!(key = %key, expected = std::any::type_name::<T>(), "Remote value does not match the requested type");
        }
        decoded
    }

    /// Get `key` as a JSON value; non-JSON payloads come back as the raw string
    pub async fn get_value(&self, key: &str) -> Option<serde_json::Value> {
        let bytes = self.get_raw(key).await?;
        Some(self.codec.decode_value(&bytes))
    }

    /// Encode and store `value`
    ///
    /// # Errors
    ///
    /// Only `CacheError::Serialization` for values that cannot be encoded; store
    /// failures are logged and reported as `Ok(false)`.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        let encoded = self.codec.encode(value, false)?;
        Ok(self.set_encoded(key, &encoded, ttl).await)
    }

    /// Store an already encoded payload
    pub async fn set_encoded(&self, key: &str, encoded: &Encoded, ttl: Option<Duration>) -> bool {
        let Some(store) = self.store() else {
            return false;
        };
        match store.set(key, &encoded.bytes, ttl).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %key, error = %e, "Remote set failed");
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        let Some(store) = self.store() else {
            return false;
        };
        match store.delete(key).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(key = %key, error = %e, "Remote delete failed");
                false
            }
        }
    }

    /// Delete every key matching `pattern`; returns the count removed (0 on error)
    pub async fn delete_pattern(&self, pattern: &str) -> usize {
        self.delete_pattern_keys(pattern).await.len()
    }

    /// Delete every key matching `pattern`; returns the keys removed
    ///
    /// Enumerates first, then deletes in one batch. Keys that vanish between
    /// the two steps are still reported.
    pub async fn delete_pattern_keys(&self, pattern: &str) -> Vec<String> {
        let Some(store) = self.store() else {
            return Vec::new();
        };
        let keys = match store.scan_keys(pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "Remote key scan failed");
                return Vec::new();
            }
        };
        if keys.is_empty() {
            return keys;
        }
        match store.delete_many(&keys).await {
            Ok(removed) => {
                debug!(pattern = %pattern, matched = keys.len(), removed = removed, "Remote pattern delete");
                keys
            }
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "Remote bulk delete failed");
                Vec::new()
            }
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        let Some(store) = self.store() else {
            return false;
        };
        store.exists(key).await.unwrap_or_else(|e| {
            warn!(key = %key, error = %e, "Remote exists failed");
            false
        })
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> bool {
        let Some(store) = self.store() else {
            return false;
        };
        store.expire(key, ttl).await.unwrap_or_else(|e| {
            warn!(key = %key, error = %e, "Remote expire failed");
            false
        })
    }

    /// Remaining TTL in seconds; `-1` when absent, persistent, or on error
    pub async fn ttl(&self, key: &str) -> i64 {
        let Some(store) = self.store() else {
            return -1;
        };
        match store.ttl(key).await {
            Ok(secs) if secs >= 0 => secs,
            Ok(_) => -1,
            Err(e) => {
                warn!(key = %key, error = %e, "Remote ttl failed");
                -1
            }
        }
    }

    /// Remaining lifetime of `key` at millisecond precision
    ///
    /// `None` when disconnected or on error.
    pub async fn remaining_ttl(&self, key: &str) -> Option<RemoteTtl> {
        let store = self.store()?;
        match store.pttl(key).await {
            Ok(-1) => Some(RemoteTtl::Persistent),
            Ok(ms) if ms > 0 => Some(RemoteTtl::Expires(Duration::from_millis(ms.unsigned_abs()))),
            Ok(_) => Some(RemoteTtl::Gone),
            Err(e) => {
                warn!(key = %key, error = %e, "Remote pttl failed");
                None
            }
        }
    }

    // ===== Atomic counters =====

    /// Atomically add `amount` to the counter at `key`
    ///
    /// When `ttl` is given and this call created the counter, the expiry is
    /// applied in the same atomic step at the store.
    ///
    /// # Errors
    ///
    /// `CacheError::Counter` on any store failure, including local-only mode.
    pub async fn incr(&self, key: &str, amount: i64, ttl: Option<Duration>) -> CacheResult<i64> {
        let store = self
            .store()
            .ok_or_else(|| CacheError::Unavailable.into_counter(key))?;
        store
            .incr_by(key, amount, ttl)
            .await
            .map_err(|e| e.into_counter(key))
    }

    /// Atomically subtract `amount` from the counter at `key`
    ///
    /// # Errors
    ///
    /// `CacheError::Counter` on any store failure, including local-only mode.
    pub async fn decr(&self, key: &str, amount: i64, ttl: Option<Duration>) -> CacheResult<i64> {
        let negated = amount
            .checked_neg()
            .ok_or_else(|| CacheError::Backend("decrement out of range".to_string()).into_counter(key))?;
        self.incr(key, negated, ttl).await
    }

    // ===== Lock primitives =====

    /// `SET key value NX PX ttl`
    ///
    /// # Errors
    ///
    /// `CacheError::Unavailable` in local-only mode, or the store failure.
    pub async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        let store = self.store().ok_or(CacheError::Unavailable)?;
        store.set_nx_px(key, value.as_bytes(), ttl).await
    }

    /// Atomic compare-and-delete
    ///
    /// # Errors
    ///
    /// `CacheError::Unavailable` in local-only mode, or the store failure.
    pub async fn compare_and_delete(&self, key: &str, expected: &str) -> CacheResult<bool> {
        let store = self.store().ok_or(CacheError::Unavailable)?;
        store.compare_and_delete(key, expected.as_bytes()).await
    }

    // ===== Health =====

    /// Round-trip ping plus server statistics; never fails
    pub async fn health_check(&self) -> HealthReport {
        let Some(store) = self.store() else {
            return HealthReport::down("remote store not connected");
        };

        let started = Instant::now();
        if let Err(e) = store.ping().await {
            return HealthReport::down(e.to_string());
        }
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let stats = store.stats().await.unwrap_or_else(|e| {
            debug!(error = %e, "Remote stats unavailable");
            crate::traits::StoreStats::default()
        });

        HealthReport {
            status: HealthStatus::Up,
            details: HealthDetails {
                backend: Some(store.name().to_string()),
                latency_ms: Some(latency_ms),
                connected_clients: stats.connected_clients,
                used_memory: stats.used_memory,
                error: None,
            },
        }
    }
}
