//! Cache System Builder
//!
//! Wires the local tier, the remote store adapter, the distributed lock and
//! the service together.
//!
//! # Example: Environment Configuration
//!
//! ```rust,no_run
//! use tiered_cache::CacheSystemBuilder;
//!
//! #[tokio::main]
//! async fn main() {
//!     let cache = CacheSystemBuilder::new().build().await;
//!     println!("remote connected: {}", cache.remote.is_connected());
//! }
//! ```
//!
//! # Example: Custom Store
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tiered_cache::{CacheSystemBuilder, MemoryStore};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let cache = CacheSystemBuilder::new()
//!     .with_store(Arc::new(MemoryStore::new()))
//!     .build()
//!     .await;
//! # }
//! ```

use std::sync::Arc;
use tracing::{info, warn};

use crate::codec::JsonCodec;
use crate::config::CacheConfig;
use crate::local::LocalCache;
use crate::lock::DistributedLock;
use crate::remote::RemoteStoreAdapter;
use crate::service::TieredCacheService;
use crate::traits::RemoteStore;
use crate::CacheSystem;

/// Builder for [`CacheSystem`]
///
/// # Default Behavior
///
/// Without a custom store, `build` connects to Redis as described by the
/// configuration (single node or cluster). If that fails after every retry the
/// system is still returned, running in local-only mode.
#[derive(Default)]
pub struct CacheSystemBuilder {
    config: Option<CacheConfig>,
    store: Option<Arc<dyn RemoteStore>>,
    local_only: bool,
}

impl CacheSystemBuilder {
    /// Create a new builder; configuration defaults to [`CacheConfig::from_env`]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use an already constructed store instead of connecting to Redis
    ///
    /// Several systems sharing one store behave like instances of a fleet.
    pub fn with_store(mut self, store: Arc<dyn RemoteStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Skip the remote tier entirely
    pub fn local_only(mut self) -> Self {
        self.local_only = true;
        self
    }

    /// Build the cache system
    pub async fn build(self) -> CacheSystem {
        let config = self.config.unwrap_or_else(CacheConfig::from_env);
        let codec = JsonCodec::new(config.compress_threshold);

        let remote = match (self.store, self.local_only) {
            (_, true) => {
                info!("Building cache system in local-only mode");
                RemoteStoreAdapter::disconnected()
            }
            (Some(store), false) => RemoteStoreAdapter::with_store(store, codec),
            (None, false) => {
                let adapter = RemoteStoreAdapter::new(config.remote.clone(), codec);
                if !adapter.connect().await {
                    warn!("Remote store unavailable; continuing with the local tier only");
                }
                adapter
            }
        };
        let remote = Arc::new(remote);

        let local = Arc::new(LocalCache::new(config.local_max_capacity));
        let lock = Arc::new(DistributedLock::new(Arc::clone(&remote), config.lock));
        let service = Arc::new(TieredCacheService::new(
            local,
            Arc::clone(&remote),
            Arc::clone(&lock),
            config,
        ));

        info!(
            remote_connected = remote.is_connected(),
            "Tiered cache system initialized"
        );

        CacheSystem {
            service,
            remote,
            lock,
        }
    }
}
