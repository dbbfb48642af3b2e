//! Common utilities for integration tests
//!
//! This module provides shared test infrastructure including:
//! - Fleet setup: several cache systems sharing one in-memory store
//! - Test data generators
//! - Unique key helpers

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tiered_cache::{CacheConfig, CacheSystem, CacheSystemBuilder, LockOptions, MemoryStore};

/// Get Redis URL from environment or use default
pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Create a test key with unique suffix
pub fn test_key(name: &str) -> String {
    format!("test_{}_{}", name, rand::random::<u32>())
}

/// Defaults with short lock and warmup delays, so tests stay fast
pub fn test_config() -> CacheConfig {
    CacheConfig {
        lock: LockOptions {
            timeout: Duration::from_millis(2000),
            retry_count: 50,
            retry_delay: Duration::from_millis(20),
        },
        warmup_batch_delay: Duration::from_millis(5),
        ..CacheConfig::default()
    }
}

/// One instance over its own private store
pub async fn setup_cache_system() -> (Arc<MemoryStore>, CacheSystem) {
    let store = Arc::new(MemoryStore::new());
    let system = CacheSystem::with_store(store.clone(), test_config()).await;
    (store, system)
}

/// `size` instances that share one store, like a fleet sharing one Redis
pub async fn setup_fleet(size: usize) -> (Arc<MemoryStore>, Vec<CacheSystem>) {
    let store = Arc::new(MemoryStore::new());
    let mut fleet = Vec::with_capacity(size);
    for _ in 0..size {
        fleet.push(CacheSystem::with_store(store.clone(), test_config()).await);
    }
    (store, fleet)
}

/// An instance with no remote tier at all
pub async fn setup_local_only() -> CacheSystem {
    CacheSystemBuilder::new()
        .with_config(test_config())
        .local_only()
        .build()
        .await
}

/// Generate test data of various types
pub mod test_data {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct User {
        pub id: u64,
        pub name: String,
        pub email: String,
    }

    impl User {
        pub fn new(id: u64) -> Self {
            Self {
                id,
                name: format!("User {id}"),
                email: format!("user{id}@example.com"),
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct Product {
        pub id: u64,
        pub name: String,
        pub price: f64,
        pub category: String,
    }

    impl Product {
        #[allow(clippy::cast_precision_loss)]
        pub fn new(id: u64) -> Self {
            Self {
                id,
                name: format!("Product {id}"),
                price: 99.99 + (id as f64),
                category: format!("Category {}", id % 5),
            }
        }
    }

    /// Generate JSON test data
    pub fn json_user(id: u64) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "name": format!("User {id}"),
            "email": format!("user{id}@example.com"),
        })
    }

    /// Generate JSON test data with specified size
    pub fn json_data_sized(size_kb: usize) -> serde_json::Value {
        serde_json::json!({
            "data": "x".repeat(size_kb * 1024),
            "size_kb": size_kb
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        let key1 = test_key("user");
        let key2 = test_key("user");
        assert_ne!(key1, key2, "Keys should be unique");
        assert!(key1.starts_with("test_user_"));
    }
}
