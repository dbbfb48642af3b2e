//! Basic Usage Example
//!
//! Demonstrates simple cache operations: set, get, delete, versions and health.
//!
//! Run with: cargo run --example basic_usage
//! Set `REDIS_URL` to use Redis; without it the cache falls back to local-only mode.

use tiered_cache::{CacheOptions, CacheSystem, Priority};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tiered_cache=info")),
        )
        .init();

    println!("=== Tiered Cache: Basic Usage ===\n");

    // 1. Initialize cache system (L1 Moka + L2 Redis, local-only if Redis is down)
    let cache = CacheSystem::new().await;
    let service = cache.service();

    // 2. Health check
    if cache.health_check().await {
        println!("✅ Remote tier is healthy\n");
    } else {
        println!("⚠️  Remote tier unavailable, running local-only\n");
    }

    // 3. Store data with a priority (HIGH = 1 hour TTL)
    let user_data = serde_json::json!({
        "id": 1,
        "name": "Alice",
        "email": "alice@example.com",
        "role": "admin"
    });

    println!("Storing user data with HIGH priority...");
    service
        .set("user:1", &user_data, &CacheOptions::with_priority(Priority::High))
        .await?;

    // 4. Retrieve data
    println!("Retrieving user data...");
    if let Some(cached_user) = service
        .get::<serde_json::Value>("user:1", &CacheOptions::default())
        .await
    {
        println!("✅ Retrieved from cache: {cached_user}\n");
    }

    // 5. Namespace versions
    let opts = CacheOptions::default().namespace("users");
    service.set("profile:1", "v0 profile", &opts).await?;
    let version = service.increment_version("users").await.unwrap_or_default();
    println!("Bumped namespace 'users' to version {version}");
    let after: Option<String> = service.get("profile:1", &opts).await;
    println!("profile:1 after bump: {after:?}\n");

    // 6. Delete
    service.delete("user:1").await;
    println!("Deleted user:1\n");

    // 7. Metrics
    let health = service.health().await;
    println!("=== Health ===");
    println!("{}", serde_json::to_string_pretty(&health)?);

    Ok(())
}
