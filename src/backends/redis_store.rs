//! Redis Store - Distributed Remote Store Backend
//!
//! Redis-based shared store for the L2 tier, single-node or cluster.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{Client, Cmd, FromRedisValue, RedisResult};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::RemoteStoreConfig;
use crate::error::{CacheError, CacheResult};
use crate::traits::{RemoteStore, StoreStats};

/// Atomic check-and-delete: only the holder of `ARGV[1]` may remove the key
const COMPARE_AND_DELETE: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end";

/// `INCRBY` that also sets `PEXPIRE ARGV[2]` when it creates the key
const INCR_WITH_EXPIRY: &str = r"
local created = redis.call('EXISTS', KEYS[1]) == 0
local value = redis.call('INCRBY', KEYS[1], ARGV[1])
if created and tonumber(ARGV[2]) > 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return value";

/// Keys fetched per `SCAN` round trip
const SCAN_BATCH: usize = 100;

#[derive(Clone)]
enum Connection {
    /// Single node; `ConnectionManager` reconnects automatically
    Single(ConnectionManager),
    /// Cluster; commands are routed by slot
    Cluster(ClusterConnection),
}

impl Connection {
    async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> RedisResult<T> {
        match self {
            Self::Single(conn) => cmd.query_async(&mut conn.clone()).await,
            Self::Cluster(conn) => cmd.query_async(&mut conn.clone()).await,
        }
    }
}

/// Redis shared store
///
/// This is the default L2 backend, providing:
/// - Single-node topology via `ConnectionManager` (automatic reconnection)
/// - Cluster topology via the async cluster client
/// - Atomic `SET NX PX`, `INCRBY` and a Lua compare-and-delete for locks
/// - Cursor-based `SCAN` for pattern enumeration on a single node
pub struct RedisStore {
    conn: Connection,
    cluster: bool,
}

impl RedisStore {
    /// Create new Redis store from `REDIS_URL` (default `redis://127.0.0.1:6379`)
    /// # Errors
    ///
    /// Returns an error if the Redis client cannot be created or connection fails.
    pub async fn new() -> CacheResult<Self> {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        Self::with_url(&redis_url).await
    }

    /// Connect using the topology selected by `config`
    /// # Errors
    ///
    /// Returns an error if the client cannot be created or the first PING fails.
    pub async fn from_config(config: &RemoteStoreConfig) -> CacheResult<Self> {
        if config.cluster {
            Self::with_cluster(&config.nodes, config.password.as_deref()).await
        } else {
            Self::with_url(&config.connection_url()).await
        }
    }

    /// Create new single-node Redis store with custom URL
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection string (e.g., `<redis://localhost:6379>`)
    /// # Errors
    ///
    /// Returns an error if the Redis client cannot be created or connection fails.
    pub async fn with_url(redis_url: &str) -> CacheResult<Self> {
        info!("Initializing Redis store with ConnectionManager");

        let client = Client::open(redis_url)
            .map_err(|e| CacheError::Connection(format!("invalid Redis URL: {e}")))?;

        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        let store = Self {
            conn: Connection::Single(conn_manager),
            cluster: false,
        };
        store.ping().await?;

        info!("Redis store connected (single node)");
        Ok(store)
    }

    /// Create new Redis store over a cluster
    ///
    /// # Arguments
    ///
    /// * `nodes` - Seed node URLs (e.g., `redis://10.0.0.1:7000`)
    /// * `password` - Optional shared password
    /// # Errors
    ///
    /// Returns an error if no node list is given or the cluster is unreachable.
    pub async fn with_cluster(nodes: &[String], password: Option<&str>) -> CacheResult<Self> {
        if nodes.is_empty() {
            return Err(CacheError::Connection(
                "cluster mode requires at least one node".to_string(),
            ));
        }
        info!(nodes = nodes.len(), "Initializing Redis store in cluster mode");

        let mut builder = ClusterClient::builder(nodes.to_vec());
        if let Some(password) = password {
            builder = builder.password(password.to_string());
        }
        let client = builder
            .build()
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        let conn = client
            .get_async_connection()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        let store = Self {
            conn: Connection::Cluster(conn),
            cluster: true,
        };
        store.ping().await?;

        info!(nodes = nodes.len(), "Redis store connected (cluster)");
        Ok(store)
    }

    /// Whether this store talks to a cluster
    #[must_use]
    pub fn is_cluster(&self) -> bool {
        self.cluster
    }

    /// Cursor-based `SCAN MATCH` (non-blocking, safe on large keyspaces)
    async fn scan_single(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let mut cmd = redis::cmd("SCAN");
            cmd.arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH);
            let (next, batch): (u64, Vec<String>) = self.conn.query(&cmd).await?;

            cursor = next;
            keys.extend(batch);

            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }
}

fn info_field<'a>(info: &'a str, field: &str) -> Option<&'a str> {
    info.lines().find_map(|line| {
        line.strip_prefix(field)
            .and_then(|rest| rest.strip_prefix(':'))
            .map(str::trim)
    })
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        Ok(self.conn.query(&cmd).await?)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1));
        }
        let () = self.conn.query(&cmd).await?;
        debug!(key = %key, ttl_ms = ?ttl.map(|t| t.as_millis()), "[Redis] Stored key");
        Ok(())
    }

    async fn set_nx_px(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1));
        let reply: Option<String> = self.conn.query(&cmd).await?;
        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> CacheResult<bool> {
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(COMPARE_AND_DELETE).arg(1).arg(key).arg(expected);
        let deleted: i64 = self.conn.query(&cmd).await?;
        Ok(deleted > 0)
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        let removed: i64 = self.conn.query(&cmd).await?;
        Ok(removed > 0)
    }

    async fn delete_many(&self, keys: &[String]) -> CacheResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        // Multi-key DEL must stay within one slot on a cluster
        let count = if self.cluster {
            let results = futures_util::future::join_all(keys.iter().map(|key| self.delete(key))).await;
            let mut removed = 0;
            for result in results {
                if result? {
                    removed += 1;
                }
            }
            removed
        } else {
            let mut cmd = redis::cmd("DEL");
            cmd.arg(keys);
            self.conn.query::<usize>(&cmd).await?
        };
        debug!(count = count, "[Redis] Removed keys in bulk");
        Ok(count)
    }

    async fn scan_keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let keys = if self.cluster {
            // SCAN cursors are per node; KEYS is fanned out to every primary
            let mut cmd = redis::cmd("KEYS");
            cmd.arg(pattern);
            self.conn.query::<Vec<String>>(&cmd).await?
        } else {
            self.scan_single(pattern).await?
        };
        debug!(pattern = %pattern, count = keys.len(), "[Redis] Scanned keys matching pattern");
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut cmd = redis::cmd("EXISTS");
        cmd.arg(key);
        let found: i64 = self.conn.query(&cmd).await?;
        Ok(found > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let mut cmd = redis::cmd("PEXPIRE");
        cmd.arg(key)
            .arg(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1));
        let applied: i64 = self.conn.query(&cmd).await?;
        Ok(applied > 0)
    }

    async fn ttl(&self, key: &str) -> CacheResult<i64> {
        let mut cmd = redis::cmd("TTL");
        cmd.arg(key);
        Ok(self.conn.query(&cmd).await?)
    }

    async fn pttl(&self, key: &str) -> CacheResult<i64> {
        let mut cmd = redis::cmd("PTTL");
        cmd.arg(key);
        Ok(self.conn.query(&cmd).await?)
    }

    async fn incr_by(&self, key: &str, amount: i64, ttl: Option<Duration>) -> CacheResult<i64> {
        let Some(ttl) = ttl else {
            let mut cmd = redis::cmd("INCRBY");
            cmd.arg(key).arg(amount);
            return Ok(self.conn.query(&cmd).await?);
        };
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(INCR_WITH_EXPIRY)
            .arg(1)
            .arg(key)
            .arg(amount)
            .arg(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1));
        Ok(self.conn.query(&cmd).await?)
    }

    async fn ping(&self) -> CacheResult<()> {
        let pong: String = self.conn.query(&redis::cmd("PING")).await?;
        debug!(reply = %pong, "[Redis] PING");
        Ok(())
    }

    async fn stats(&self) -> CacheResult<StoreStats> {
        let mut cmd = redis::cmd("INFO");
        cmd.arg("clients").arg("memory");
        let info: String = match self.conn.query(&cmd).await {
            Ok(info) => info,
            // Cluster INFO replies per node; not worth aggregating here
            Err(_) if self.cluster => return Ok(StoreStats::default()),
            Err(e) => return Err(e.into()),
        };

        Ok(StoreStats {
            connected_clients: info_field(&info, "connected_clients").and_then(|v| v.parse().ok()),
            used_memory: info_field(&info, "used_memory_human").map(str::to_string),
        })
    }

    fn name(&self) -> &'static str {
        if self.cluster { "Redis Cluster" } else { "Redis" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_fields_are_parsed() {
        let info = "# Clients\r\nconnected_clients:7\r\nblocked_clients:0\r\n# Memory\r\nused_memory:1048576\r\nused_memory_human:1.00M\r\n";
        assert_eq!(info_field(info, "connected_clients"), Some("7"));
        assert_eq!(info_field(info, "used_memory_human"), Some("1.00M"));
        assert_eq!(info_field(info, "used_memory"), Some("1048576"));
        assert_eq!(info_field(info, "missing"), None);
    }

    /// Requires a running Redis (`REDIS_URL`)
    #[tokio::test]
    #[ignore = "requires a running Redis instance"]
    async fn lock_primitives_against_redis() {
        let store = RedisStore::new().await.unwrap_or_else(|e| panic!("connect: {e}"));
        let key = format!("test:lock:{}", rand::random::<u32>());
        assert!(store.set_nx_px(&key, b"t1", Duration::from_secs(5)).await.unwrap_or(false));
        assert!(!store.set_nx_px(&key, b"t2", Duration::from_secs(5)).await.unwrap_or(true));
        assert!(!store.compare_and_delete(&key, b"t2").await.unwrap_or(true));
        assert!(store.compare_and_delete(&key, b"t1").await.unwrap_or(false));
    }

    /// Requires a running Redis (`REDIS_URL`)
    #[tokio::test]
    #[ignore = "requires a running Redis instance"]
    async fn counter_expiry_is_set_only_on_creation() {
        let store = RedisStore::new().await.unwrap_or_else(|e| panic!("connect: {e}"));
        let key = format!("test:counter:{}", rand::random::<u32>());
        let ttl = Some(Duration::from_secs(30));
        assert_eq!(store.incr_by(&key, 0, ttl).await.unwrap_or(-1), 0);
        let pttl = store.pttl(&key).await.unwrap_or(-1);
        assert!((1..=30_000).contains(&pttl), "unexpected pttl {pttl}");

        assert!(store.expire(&key, Duration::from_secs(300)).await.unwrap_or(false));
        assert_eq!(store.incr_by(&key, 2, ttl).await.unwrap_or(-1), 2);
        assert!(store.pttl(&key).await.unwrap_or(-1) > 30_000, "existing expiry kept");
        let _ = store.delete(&key).await;
    }
}
