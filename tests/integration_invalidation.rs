//! Integration tests for cache invalidation
//!
//! Tests pattern deletion and namespace version bumps across instances

mod common;

use common::*;
use std::time::Duration;
use tiered_cache::{CacheConfig, CacheOptions, CacheSystem, MemoryStore};

/// deletePattern removes only matching keys, from both tiers
#[tokio::test]
async fn test_delete_pattern() {
    let (_store, cache) = setup_cache_system().await;
    let service = cache.service();
    let opts = CacheOptions::default();

    for key in ["user:1", "user:2", "order:1"] {
        service
            .set(key, &test_data::json_user(1), &opts)
            .await
            .unwrap_or_else(|_| panic!("Failed to set {key}"));
    }

    assert_eq!(service.delete_pattern("user:*").await, 2);

    assert!(service.get::<serde_json::Value>("user:1", &opts).await.is_none());
    assert!(service.get::<serde_json::Value>("user:2", &opts).await.is_none());
    assert!(service.get::<serde_json::Value>("order:1", &opts).await.is_some());

    assert_eq!(service.delete_pattern("user:*").await, 0, "nothing left to delete");
}

/// Keys only present in one tier still count once
#[tokio::test]
async fn test_delete_pattern_counts_distinct_keys() {
    let (store, fleet) = setup_fleet(2).await;
    let (a, b) = (&fleet[0], &fleet[1]);
    let opts = CacheOptions::default();

    a.service().set("session:1", "x", &opts).await.unwrap_or_else(|_| panic!("set failed"));
    // Only in b's L1 and in L2
    b.service().set("session:2", "y", &opts).await.unwrap_or_else(|_| panic!("set failed"));

    assert_eq!(a.service().delete_pattern("session:*").await, 2);
    assert!(store.is_empty());

    // b still holds its own L1 copy: local tiers are per instance
    assert!(b.service().local().get("session:2").await.is_some());
}

/// Pattern delete with glob classes and single-character wildcards
#[tokio::test]
async fn test_delete_pattern_globs() {
    let (_store, cache) = setup_cache_system().await;
    let service = cache.service();
    let opts = CacheOptions::default();

    for key in ["item:1", "item:2", "item:10", "item:a"] {
        service.set(key, "v", &opts).await.unwrap_or_else(|_| panic!("set failed"));
    }

    assert_eq!(service.delete_pattern("item:[12]").await, 2);
    assert_eq!(service.delete_pattern("item:??").await, 1);
    assert!(service.get::<String>("item:a", &opts).await.is_some());
}

/// After a version bump the old generation is unreachable
#[tokio::test]
async fn test_version_invalidation() {
    let (_store, cache) = setup_cache_system().await;
    let service = cache.service();
    let ns = test_key("products");
    let opts = CacheOptions::default().namespace(ns.clone());

    let old_key = service.get_versioned_key("product:1", &ns).await;
    service
        .set("product:1", "old", &opts)
        .await
        .unwrap_or_else(|_| panic!("set failed"));
    assert_eq!(service.get::<String>("product:1", &opts).await.as_deref(), Some("old"));

    let version = service
        .increment_version(&ns)
        .await
        .unwrap_or_else(|_| panic!("version bump failed"));
    assert_eq!(version, 1);

    let new_key = service.get_versioned_key("product:1", &ns).await;
    assert_ne!(old_key, new_key);
    assert!(service.get::<String>("product:1", &opts).await.is_none());

    // The old generation still exists; it is just no longer addressed
    assert!(cache.remote.exists(&old_key).await);
}

/// Another instance observes the bump once its cached version ages out
#[tokio::test]
async fn test_version_bump_reaches_other_instances() {
    let store = std::sync::Arc::new(MemoryStore::new());
    let config = CacheConfig {
        version_cache_ttl: Duration::from_millis(100),
        ..test_config()
    };
    let a = CacheSystem::with_store(store.clone(), config.clone()).await;
    let b = CacheSystem::with_store(store, config).await;

    let ns = "catalog";
    let opts = CacheOptions::default().namespace(ns);

    a.service().set("item:9", "v0", &opts).await.unwrap_or_else(|_| panic!("set failed"));
    assert_eq!(b.service().get::<String>("item:9", &opts).await.as_deref(), Some("v0"));

    a.service()
        .increment_version(ns)
        .await
        .unwrap_or_else(|_| panic!("version bump failed"));
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(b.service().get_version(ns).await, 1);
    assert!(b.service().get::<String>("item:9", &opts).await.is_none());
}

/// A failed version read never pins an old generation
#[tokio::test]
async fn test_version_read_failure_is_not_cached() {
    let store = std::sync::Arc::new(MemoryStore::new());
    let config = CacheConfig {
        version_cache_ttl: Duration::from_millis(100),
        ..test_config()
    };
    let a = CacheSystem::with_store(store.clone(), config.clone()).await;
    let b = CacheSystem::with_store(store.clone(), config).await;

    let ns = "cat";
    let opts = CacheOptions::default().namespace(ns);
    a.service().set("item", "stale", &opts).await.unwrap_or_else(|_| panic!("set failed"));
    assert_eq!(b.service().get_version(ns).await, 0);

    a.service()
        .increment_version(ns)
        .await
        .unwrap_or_else(|_| panic!("version bump failed"));
    tokio::time::sleep(Duration::from_millis(150)).await;

    store.simulate_outage(true);
    assert_eq!(b.service().get_version(ns).await, 0, "last known version");
    store.simulate_outage(false);

    assert_eq!(b.service().get_version(ns).await, 1);
    assert!(b.service().get::<String>("item", &opts).await.is_none());
}

/// Explicit versions isolate generations without any counter
#[tokio::test]
async fn test_explicit_versions() {
    let (_store, cache) = setup_cache_system().await;
    let service = cache.service();

    service
        .set("config", "first", &CacheOptions::default().version("1"))
        .await
        .unwrap_or_else(|_| panic!("set failed"));
    service
        .set("config", "second", &CacheOptions::default().version("2"))
        .await
        .unwrap_or_else(|_| panic!("set failed"));

    assert_eq!(
        service
            .get::<String>("config", &CacheOptions::default().version("1"))
            .await
            .as_deref(),
        Some("first")
    );
    assert_eq!(
        service
            .get::<String>("config", &CacheOptions::default().version("2"))
            .await
            .as_deref(),
        Some("second")
    );
}
