//! Cache Stampede Protection Example
//!
//! Demonstrates how concurrent requests for the same missing key run the
//! loader once, even across several instances sharing one store.
//!
//! Run with: cargo run --example stampede_protection

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tiered_cache::{CacheConfig, CacheSystem, MemoryStore};
use tracing_subscriber::EnvFilter;

// Simulate expensive computation
async fn expensive_computation(worker: u32, calls: Arc<AtomicU32>) -> anyhow::Result<serde_json::Value> {
    calls.fetch_add(1, Ordering::SeqCst);
    println!("  💻 [Worker {worker}] Starting expensive computation...");
    tokio::time::sleep(Duration::from_millis(500)).await;
    println!("  ✅ [Worker {worker}] Computation complete");
    Ok(serde_json::json!({
        "computed_by": worker,
        "result": "expensive data",
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tiered_cache=info")),
        )
        .init();

    println!("=== Tiered Cache: Stampede Protection Demo ===\n");

    // Three instances sharing one store, like three service replicas sharing Redis
    let store = Arc::new(MemoryStore::new());
    let mut fleet = Vec::new();
    for _ in 0..3 {
        fleet.push(Arc::new(
            CacheSystem::with_store(store.clone(), CacheConfig::default()).await,
        ));
    }

    println!("Scenario: 12 concurrent workers on 3 instances requesting the same key\n");

    let calls = Arc::new(AtomicU32::new(0));
    let start = Instant::now();
    let mut handles = vec![];

    for i in 1..=12_u32 {
        let cache = Arc::clone(&fleet[(i as usize) % fleet.len()]);
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            let worker_start = Instant::now();
            let result = cache
                .service()
                .get_with_lock::<serde_json::Value, _, _>(
                    "stampede_test_key",
                    || expensive_computation(i, calls),
                    None,
                )
                .await;
            println!("  [Worker {i}] Completed in {:?}", worker_start.elapsed());
            result
        }));
    }

    for handle in handles {
        handle.await??;
    }

    println!("\n=== Results ===");
    println!("Total time: {:?}", start.elapsed());
    println!("Loader executions: {}", calls.load(Ordering::SeqCst));
    println!("Expected WITHOUT stampede protection: 12 executions");
    println!("Expected WITH stampede protection: 1 execution shared by all");

    Ok(())
}
