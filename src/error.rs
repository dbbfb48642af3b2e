//! Cache Errors
//!
//! Typed failures surfaced by the tiered cache. Transient store failures are
//! normally absorbed by [`RemoteStoreAdapter`](crate::remote::RemoteStoreAdapter)
//! and never reach business code; the variants below are the ones callers can
//! actually observe.

use thiserror::Error;

/// Result alias used across the crate
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors produced by the tiered cache
#[derive(Debug, Error)]
pub enum CacheError {
    /// The remote store could not be reached at startup
    #[error("remote store connection failed: {0}")]
    Connection(String),

    /// A single store operation failed after the connection was established
    #[error("remote store operation failed: {0}")]
    Backend(String),

    /// Atomic counter (`INCRBY`) failed; never silently converted to zero
    #[error("counter operation on '{key}' failed: {message}")]
    Counter { key: String, message: String },

    /// Lock retries were exhausted
    #[error("could not acquire lock '{name}'")]
    LockAcquisition { name: String },

    /// Value could not be encoded or decoded as JSON
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Gzip encode/decode failure
    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),

    /// The caller-supplied loader failed
    #[error("loader failed: {0}")]
    Loader(#[source] anyhow::Error),

    /// No remote store is connected (local-only mode)
    #[error("remote store unavailable")]
    Unavailable,
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() {
            Self::Connection(err.to_string())
        } else {
            Self::Backend(err.to_string())
        }
    }
}

impl CacheError {
    /// Re-tag a store failure as a counter failure for `key`
    pub(crate) fn into_counter(self, key: &str) -> Self {
        match self {
            Self::Counter { .. } => self,
            other => Self::Counter {
                key: key.to_string(),
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_retag_keeps_message() {
        let err = CacheError::Backend("boom".into()).into_counter("rate:1");
        match err {
            CacheError::Counter { key, message } => {
                assert_eq!(key, "rate:1");
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn lock_error_names_the_lock() {
        let err = CacheError::LockAcquisition { name: "cache:product:42".into() };
        assert_eq!(err.to_string(), "could not acquire lock 'cache:product:42'");
    }
}
