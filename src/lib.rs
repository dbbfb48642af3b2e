//! Tiered Cache
//!
//! A two-tier cache for fleets of service instances:
//! - **L1 Cache**: In-process caching with Moka (per instance, never networked)
//! - **L2 Cache**: Shared caching with Redis, single node or cluster
//! - **Distributed Lock**: token-bound `SET NX PX` locks with atomic release
//! - **Stampede Protection**: one loader run per key across the whole fleet
//! - **Namespace Versioning**: invalidate a namespace by bumping one counter
//! - **Graceful Degradation**: an unreachable store means local-only mode, not errors
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tiered_cache::{CacheOptions, CacheSystem, Priority};
//!
//! #[tokio::main]
//! async fn main() -> tiered_cache::CacheResult<()> {
//!     let cache = CacheSystem::new().await;
//!     let service = cache.service();
//!
//!     let user = serde_json::json!({"name": "Alice"});
//!     service
//!         .set("user:1", &user, &CacheOptions::with_priority(Priority::High))
//!         .await?;
//!
//!     let cached: Option<serde_json::Value> = service.get("user:1", &CacheOptions::default()).await;
//!     tracing::info!(?cached, "Cached user");
//!
//!     let product: serde_json::Value = service
//!         .get_with_lock("product:42", || async { Ok(serde_json::json!({"id": 42})) }, None)
//!         .await?;
//!     tracing::info!(%product, "Loaded once across the fleet");
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Request → L1 (Moka) → L2 (Redis) → Loader (under distributed lock)
//!           ↓ Hit       ↓ Hit          ↓ Miss
//!           Return      Backfill L1    Store in L1+L2
//! ```

use std::sync::Arc;
use tracing::{info, warn};

pub mod backends;
pub mod builder;
pub mod codec;
pub mod config;
pub mod error;
pub mod local;
pub mod lock;
pub mod metrics;
pub mod pattern;
pub mod remote;
pub mod service;
pub mod traits;

pub use backends::MemoryStore;
#[cfg(feature = "redis")]
pub use backends::RedisStore;
pub use builder::CacheSystemBuilder;
pub use codec::{Encoded, JsonCodec};
pub use config::{CacheConfig, CacheOptions, Priority, RemoteStoreConfig, TtlConfig};
pub use error::{CacheError, CacheResult};
pub use local::{CacheEntry, LocalCache};
pub use lock::{DistributedLock, LockOptions, LockToken};
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};
pub use remote::{HealthDetails, HealthReport, HealthStatus, RemoteStoreAdapter, RemoteTtl};
pub use service::{
    CacheHealth, CacheMetricsReport, TieredCacheService, WarmupEntry, WarmupSummary,
    versioned_key,
};
pub use traits::{RemoteStore, StoreStats};

// Re-export async_trait for user convenience
pub use async_trait::async_trait;

/// Main entry point for the tiered cache
///
/// Construct once per process and clone freely; every handle shares the same
/// tiers, lock and metrics.
///
/// # Example
///
/// ```rust,no_run
/// use tiered_cache::CacheSystem;
///
/// #[tokio::main]
/// async fn main() {
///     let cache = CacheSystem::new().await;
///     let service = cache.service();
/// }
/// ```
#[derive(Clone)]
pub struct CacheSystem {
    /// Unified cache service (primary interface)
    pub service: Arc<TieredCacheService>,
    /// Remote tier, shared with the service and the lock
    pub remote: Arc<RemoteStoreAdapter>,
    pub lock: Arc<DistributedLock>,
}

impl CacheSystem {
    /// Create new cache system configured from the environment
    ///
    /// # Configuration
    ///
    /// See [`CacheConfig::from_env`]. Redis is reached via `REDIS_URL`, or
    /// `REDIS_HOST`/`REDIS_PORT`/`REDIS_PASSWORD`/`REDIS_DB`, or
    /// `REDIS_CLUSTER=true` with `REDIS_CLUSTER_NODES`.
    pub async fn new() -> Self {
        info!("Initializing Tiered Cache System");
        CacheSystemBuilder::new().build().await
    }

    /// Create cache system with a custom Redis URL
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection string (e.g., "redis://localhost:6379")
    pub async fn with_redis_url(redis_url: &str) -> Self {
        info!(redis_url = %redis_url, "Initializing Tiered Cache System with custom Redis URL");
        let mut config = CacheConfig::from_env();
        config.remote.url = Some(redis_url.to_string());
        config.remote.cluster = false;
        CacheSystemBuilder::new().with_config(config).build().await
    }

    /// Create cache system over an existing store
    pub async fn with_store(store: Arc<dyn RemoteStore>, config: CacheConfig) -> Self {
        CacheSystemBuilder::new()
            .with_config(config)
            .with_store(store)
            .build()
            .await
    }

    /// Perform health check on the remote tier
    ///
    /// Returns `true` when L2 answers. `false` means the system is serving from
    /// L1 only, which is degraded but functional.
    pub async fn health_check(&self) -> bool {
        let report = self.remote.health_check().await;
        if report.status == HealthStatus::Up {
            info!(latency_ms = ?report.details.latency_ms, "Tiered cache health check passed");
            true
        } else {
            warn!(error = ?report.details.error, "Tiered cache health check - remote tier down");
            false
        }
    }

    /// Get reference to the cache service (primary interface)
    pub fn service(&self) -> &Arc<TieredCacheService> {
        &self.service
    }
}
