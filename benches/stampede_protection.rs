//! Benchmarks for cache stampede protection

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tiered_cache::{CacheConfig, CacheOptions, CacheSystem, MemoryStore};
use tokio::runtime::Runtime;

fn setup_fleet(size: usize) -> (Vec<CacheSystem>, Runtime) {
    let rt = Runtime::new().unwrap_or_else(|_| panic!("Failed to create runtime"));
    let fleet = rt.block_on(async {
        let store = Arc::new(MemoryStore::new());
        let mut fleet = Vec::with_capacity(size);
        for _ in 0..size {
            fleet.push(CacheSystem::with_store(store.clone(), CacheConfig::default()).await);
        }
        fleet
    });
    (fleet, rt)
}

/// Benchmark stampede protection
fn bench_stampede_protection(c: &mut Criterion) {
    let (fleet, rt) = setup_fleet(1);
    let cache = Arc::new(fleet.into_iter().next().unwrap_or_else(|| panic!("empty fleet")));

    c.bench_function("stampede_100_concurrent", |b| {
        b.iter(|| {
            rt.block_on(async {
                let key = format!("bench:stampede:{}", rand::random::<u32>());
                let mut handles = vec![];

                for _ in 0..100 {
                    let cache = cache.clone();
                    let key = key.clone();
                    let handle = tokio::spawn(async move {
                        cache
                            .service()
                            .get_with_lock(
                                &key,
                                || async {
                                    tokio::time::sleep(Duration::from_millis(10)).await;
                                    Ok(json!({"computed": true}))
                                },
                                None,
                            )
                            .await
                            .unwrap_or_else(|_| panic!("Failed to compute"))
                    });
                    handles.push(handle);
                }

                for handle in handles {
                    black_box(handle.await.unwrap_or_else(|_| panic!("Task failed")));
                }
            });
        });
    });
}

/// Benchmark stampede protection across instances sharing one store
fn bench_fleet_stampede(c: &mut Criterion) {
    let (fleet, rt) = setup_fleet(4);
    let fleet: Vec<Arc<CacheSystem>> = fleet.into_iter().map(Arc::new).collect();

    c.bench_function("stampede_4x25_fleet", |b| {
        b.iter(|| {
            rt.block_on(async {
                let key = format!("bench:fleet:{}", rand::random::<u32>());
                let mut handles = vec![];

                for instance in &fleet {
                    for _ in 0..25 {
                        let cache = Arc::clone(instance);
                        let key = key.clone();
                        handles.push(tokio::spawn(async move {
                            cache
                                .service()
                                .get_with_lock(
                                    &key,
                                    || async {
                                        tokio::time::sleep(Duration::from_millis(10)).await;
                                        Ok(json!({"computed": true}))
                                    },
                                    None,
                                )
                                .await
                                .unwrap_or_else(|_| panic!("Failed to compute"))
                        }));
                    }
                }

                for handle in handles {
                    black_box(handle.await.unwrap_or_else(|_| panic!("Task failed")));
                }
            });
        });
    });
}

/// Benchmark the L1 hit path
fn bench_l1_hit(c: &mut Criterion) {
    let (fleet, rt) = setup_fleet(1);
    let cache = fleet.into_iter().next().unwrap_or_else(|| panic!("empty fleet"));
    let opts = CacheOptions::default();

    rt.block_on(async {
        for i in 0..100 {
            cache
                .service()
                .set(&format!("bench:l1:{i}"), &json!({"id": i}), &opts)
                .await
                .unwrap_or_else(|_| panic!("Failed to set"));
        }
    });

    c.bench_function("l1_hit", |b| {
        b.iter(|| {
            rt.block_on(async {
                let key = format!("bench:l1:{}", rand::random::<u8>() % 100);
                black_box(cache.service().get::<serde_json::Value>(&key, &opts).await)
            })
        });
    });
}

criterion_group!(benches, bench_stampede_protection, bench_fleet_stampede, bench_l1_hit);
criterion_main!(benches);
