//! Remote Store Implementations
//!
//! This module contains the [`RemoteStore`](crate::traits::RemoteStore) backends
//! the L2 tier can run on.
//!
//! # Available Backends
//!
//! - **Redis** - Industry-standard distributed store, single node or cluster
//!   (default, feature: `redis`)
//! - **Memory** - `DashMap`-backed store with the same atomic primitives, for
//!   single-instance deployments, tests and benchmarks
//!
//! # Usage
//!
//! ```rust,no_run
//! use tiered_cache::backends::{MemoryStore, RedisStore};
//!
//! # async fn example() -> tiered_cache::CacheResult<()> {
//! let redis = RedisStore::with_url("redis://localhost:6379").await?;
//! let memory = MemoryStore::new();
//! # Ok(())
//! # }
//! ```

pub mod memory_store;
#[cfg(feature = "redis")]
pub mod redis_store;

pub use memory_store::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
