//! Cache Configuration
//!
//! Typed configuration for every tier, with documented defaults. Values can be
//! overridden from the environment via [`CacheConfig::from_env`]; unparsable
//! variables are logged and ignored.

use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::lock::LockOptions;

/// Connection settings for the shared store
#[derive(Debug, Clone)]
pub struct RemoteStoreConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
    /// Explicit connection URL; takes precedence over host/port/password/db
    pub url: Option<String>,
    /// Use cluster topology with `nodes` instead of a single node
    pub cluster: bool,
    /// Cluster seed nodes (`redis://host:port`)
    pub nodes: Vec<String>,
    /// Connection attempts before giving up and running local-only
    pub connect_retries: u32,
    /// First backoff delay; doubled after every failed attempt
    pub connect_backoff_base: Duration,
    pub connect_backoff_max: Duration,
}

impl Default for RemoteStoreConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            db: 0,
            url: None,
            cluster: false,
            nodes: Vec::new(),
            connect_retries: 5,
            connect_backoff_base: Duration::from_millis(100),
            connect_backoff_max: Duration::from_secs(5),
        }
    }
}

impl RemoteStoreConfig {
    /// Single-node connection URL; the password is percent-encoded
    pub fn connection_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        let base = format!("redis://{}:{}/{}", self.host, self.port, self.db);
        let Some(password) = &self.password else {
            return base;
        };
        let mut url = match url::Url::parse(&base) {
            Ok(url) => url,
            Err(e) => {
                warn!(host = %self.host, error = %e, "Invalid Redis address");
                return base;
            }
        };
        if url.set_password(Some(password)).is_err() {
            warn!(host = %self.host, "Cannot attach a password to this Redis address");
            return base;
        }
        url.into()
    }

    /// Backoff before retry number `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.connect_backoff_base
            .saturating_mul(factor)
            .min(self.connect_backoff_max)
    }
}

/// Priority tier of a cached value; selects the default TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HIGH" => Ok(Self::High),
            "MEDIUM" => Ok(Self::Medium),
            "LOW" => Ok(Self::Low),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// Default TTL per priority tier
#[derive(Debug, Clone, Copy)]
pub struct TtlConfig {
    pub high: Duration,
    pub medium: Duration,
    pub low: Duration,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            high: Duration::from_secs(3600),
            medium: Duration::from_secs(1800),
            low: Duration::from_secs(300),
        }
    }
}

impl TtlConfig {
    pub fn for_priority(&self, priority: Priority) -> Duration {
        match priority {
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
        }
    }
}

/// Per-call options for `get`/`set`
///
/// `version` pins an explicit generation; `namespace` resolves the generation
/// from the namespace counter (see `increment_version`). When both are unset
/// the key is used as is.
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    /// Explicit TTL; overrides `priority`
    pub ttl: Option<Duration>,
    pub version: Option<String>,
    pub namespace: Option<String>,
    /// Gzip the remote payload when it exceeds `compress_threshold`
    pub compress: bool,
    pub priority: Priority,
}

impl CacheOptions {
    pub fn with_priority(priority: Priority) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    #[must_use]
    pub fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }
}

/// Top-level configuration, built once at process start
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub remote: RemoteStoreConfig,
    pub ttl: TtlConfig,
    pub lock: LockOptions,
    pub warmup_batch_size: usize,
    pub warmup_batch_delay: Duration,
    /// Upper bound on L1 entries
    pub local_max_capacity: u64,
    /// How long a namespace version is trusted locally before re-reading L2
    pub version_cache_ttl: Duration,
    /// Minimum encoded size (bytes) before `compress` takes effect
    pub compress_threshold: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            remote: RemoteStoreConfig::default(),
            ttl: TtlConfig::default(),
            lock: LockOptions::default(),
            warmup_batch_size: 10,
            warmup_batch_delay: Duration::from_millis(100),
            local_max_capacity: 10_000,
            version_cache_ttl: Duration::from_secs(60),
            compress_threshold: 1024,
        }
    }
}

impl CacheConfig {
    /// Defaults overlaid with `REDIS_*` / `CACHE_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        let remote = &mut config.remote;

        remote.url = std::env::var("REDIS_URL").ok();
        if let Ok(host) = std::env::var("REDIS_HOST") {
            remote.host = host;
        }
        override_parsed("REDIS_PORT", &mut remote.port);
        remote.password = std::env::var("REDIS_PASSWORD").ok().filter(|p| !p.is_empty());
        override_parsed("REDIS_DB", &mut remote.db);
        override_parsed("REDIS_CLUSTER", &mut remote.cluster);
        if let Ok(nodes) = std::env::var("REDIS_CLUSTER_NODES") {
            remote.nodes = nodes
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(|n| {
                    if n.contains("://") {
                        n.to_string()
                    } else {
                        format!("redis://{n}")
                    }
                })
                .collect();
        }
        override_parsed("REDIS_CONNECT_RETRIES", &mut remote.connect_retries);

        override_secs("CACHE_TTL_HIGH", &mut config.ttl.high);
        override_secs("CACHE_TTL_MEDIUM", &mut config.ttl.medium);
        override_secs("CACHE_TTL_LOW", &mut config.ttl.low);

        override_millis("CACHE_LOCK_TIMEOUT_MS", &mut config.lock.timeout);
        override_parsed("CACHE_LOCK_RETRY_COUNT", &mut config.lock.retry_count);
        override_millis("CACHE_LOCK_RETRY_DELAY_MS", &mut config.lock.retry_delay);

        override_parsed("CACHE_WARMUP_BATCH_SIZE", &mut config.warmup_batch_size);
        config
    }
}

fn override_parsed<T: FromStr>(var: &str, slot: &mut T) {
    let Ok(raw) = std::env::var(var) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *slot = value,
        Err(_) => warn!(var = %var, value = %raw, "Ignoring unparsable cache setting"),
    }
}

fn override_secs(var: &str, slot: &mut Duration) {
    let mut secs = slot.as_secs();
    override_parsed(var, &mut secs);
    *slot = Duration::from_secs(secs);
}

fn override_millis(var: &str, slot: &mut Duration) {
    let mut millis = u64::try_from(slot.as_millis()).unwrap_or(u64::MAX);
    override_parsed(var, &mut millis);
    *slot = Duration::from_millis(millis);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ttls_match_tiers() {
        let ttl = TtlConfig::default();
        assert_eq!(ttl.for_priority(Priority::High), Duration::from_secs(3600));
        assert_eq!(ttl.for_priority(Priority::Medium), Duration::from_secs(1800));
        assert_eq!(ttl.for_priority(Priority::Low), Duration::from_secs(300));
    }

    #[test]
    fn priority_parses_case_insensitively() {
        assert_eq!("high".parse::<Priority>(), Ok(Priority::High));
        assert_eq!("LOW".parse::<Priority>(), Ok(Priority::Low));
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn connection_url_includes_password_and_db() {
        let cfg = RemoteStoreConfig {
            password: Some("s3cret".into()),
            db: 2,
            ..RemoteStoreConfig::default()
        };
        assert_eq!(cfg.connection_url(), "redis://:s3cret@127.0.0.1:6379/2");
    }

    #[test]
    fn connection_url_escapes_password() {
        let cfg = RemoteStoreConfig {
            host: "cache.internal".into(),
            port: 6380,
            password: Some("p@ss/w:rd".into()),
            db: 3,
            ..RemoteStoreConfig::default()
        };
        let parsed = url::Url::parse(&cfg.connection_url()).unwrap();
        assert_eq!(parsed.host_str(), Some("cache.internal"));
        assert_eq!(parsed.port(), Some(6380));
        assert_eq!(parsed.path(), "/3");
        assert_eq!(parsed.password(), Some("p%40ss%2Fw%3Ard"));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let cfg = RemoteStoreConfig::default();
        assert_eq!(cfg.backoff_for(1), Duration::from_millis(100));
        assert_eq!(cfg.backoff_for(2), Duration::from_millis(200));
        assert_eq!(cfg.backoff_for(4), Duration::from_millis(800));
        assert_eq!(cfg.backoff_for(20), Duration::from_secs(5));
    }
}
