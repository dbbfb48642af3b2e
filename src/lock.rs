//! Distributed Lock
//!
//! Named mutual exclusion on top of the remote store:
//! - acquire: `SET lock:{name} <token> NX PX <timeout>`, retried a bounded
//!   number of times with a sleep in between
//! - release: atomic compare-and-delete, so a holder whose lock already
//!   expired can never remove the lock of the next holder
//!
//! Contention and an unreachable store are reported differently: the first
//! is `CacheError::LockAcquisition`, the second is the store error itself, so
//! callers that can safely proceed without the lock may do so.
//!
//! The lock expires by itself after `timeout`, which bounds the blackout a
//! crashed holder can cause. `timeout` must exceed the critical section:
//! once it elapses a second caller may legitimately acquire the lock while the
//! first is still working.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{CacheError, CacheResult};
use crate::remote::RemoteStoreAdapter;

/// Acquisition parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Lock expiry; also the longest a crashed holder can block others
    pub timeout: Duration,
    /// Extra attempts after the first one fails
    pub retry_count: u32,
    pub retry_delay: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            retry_count: 10,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// Proof of one lock acquisition; only this token can release it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn lock_key(name: &str) -> String {
    format!("lock:{name}")
}

/// A held lock
///
/// Releases the lock if dropped before [`release`](Self::release) runs
/// (cancellation or panic). Normal exits release explicitly.
pub(crate) struct LockGuard {
    remote: Arc<RemoteStoreAdapter>,
    key: String,
    token: Option<LockToken>,
}

impl LockGuard {
    pub(crate) async fn release(mut self) -> bool {
        match self.token.take() {
            Some(token) => release_key(&self.remote, &self.key, &token).await,
            None => false,
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        let remote = Arc::clone(&self.remote);
        let key = std::mem::take(&mut self.key);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    release_key(&remote, &key, &token).await;
                });
            }
            Err(_) => warn!(key = %key, "Lock dropped outside a runtime; it will expire on its own"),
        }
    }
}

async fn release_key(remote: &RemoteStoreAdapter, key: &str, token: &LockToken) -> bool {
    match remote.compare_and_delete(key, token.as_str()).await {
        Ok(released) => {
            debug!(key = %key, released = released, "Lock release");
            released
        }
        Err(e) => {
            warn!(key = %key, error = %e, "Lock release failed; lock will expire on its own");
            false
        }
    }
}

/// Named locks shared by every instance connected to the same store
pub struct DistributedLock {
    remote: Arc<RemoteStoreAdapter>,
    defaults: LockOptions,
}

impl DistributedLock {
    pub fn new(remote: Arc<RemoteStoreAdapter>, defaults: LockOptions) -> Self {
        Self { remote, defaults }
    }

    /// Options used when callers do not pass their own
    pub fn defaults(&self) -> LockOptions {
        self.defaults
    }

    /// Try to take `name`, retrying up to `opts.retry_count` times
    ///
    /// Returns `None` once retries are exhausted or when the store cannot be
    /// reached; never waits longer than roughly `retry_count * retry_delay`.
    pub async fn acquire(&self, name: &str, opts: &LockOptions) -> Option<LockToken> {
        match self.try_acquire(name, opts).await {
            Ok(token) => token,
            Err(CacheError::Unavailable) => {
                debug!(lock = %name, "No remote store; lock not available");
                None
            }
            Err(e) => {
                warn!(lock = %name, error = %e, "Lock store unreachable");
                None
            }
        }
    }

    /// Like [`acquire`](Self::acquire), but an unreachable store is an error
    ///
    /// `Ok(None)` means the lock is held by someone else and retries ran out.
    ///
    /// # Errors
    ///
    /// The store failure of the first attempt that could not reach the store
    /// (`CacheError::Unavailable` in local-only mode); no further retries are
    /// spent on an unreachable store.
    pub async fn try_acquire(&self, name: &str, opts: &LockOptions) -> CacheResult<Option<LockToken>> {
        let key = lock_key(name);
        let token = LockToken::generate();

        for attempt in 0..=opts.retry_count {
            if self
                .remote
                .set_if_absent(&key, token.as_str(), opts.timeout)
                .await?
            {
                debug!(lock = %name, attempt = attempt, "Lock acquired");
                return Ok(Some(token));
            }

            if attempt < opts.retry_count {
                tokio::time::sleep(opts.retry_delay).await;
            }
        }

        debug!(lock = %name, attempts = opts.retry_count + 1, "Lock acquisition gave up");
        Ok(None)
    }

    /// Take `name` and return a guard that releases it
    ///
    /// # Errors
    ///
    /// `CacheError::LockAcquisition` on contention, the store error when the
    /// store cannot be reached.
    pub(crate) async fn hold(&self, name: &str, opts: &LockOptions) -> CacheResult<LockGuard> {
        let token = self
            .try_acquire(name, opts)
            .await?
            .ok_or_else(|| CacheError::LockAcquisition {
                name: name.to_string(),
            })?;
        Ok(LockGuard {
            remote: Arc::clone(&self.remote),
            key: lock_key(name),
            token: Some(token),
        })
    }

    /// Release `name` if `token` still owns it
    ///
    /// Idempotent: a second call, or a call after the lock expired and was
    /// taken by someone else, returns `false` and touches nothing.
    pub async fn release(&self, name: &str, token: &LockToken) -> bool {
        release_key(&self.remote, &lock_key(name), token).await
    }

    /// Whether anyone currently holds `name`
    pub async fn is_locked(&self, name: &str) -> bool {
        self.remote.exists(&lock_key(name)).await
    }

    /// Run `f` while holding `name`; the lock is released on every exit path
    ///
    /// # Errors
    ///
    /// `CacheError::LockAcquisition` when the lock is held elsewhere and
    /// retries ran out, or the store error when the store cannot be reached
    /// (`CacheError::Unavailable` in local-only mode). `f` is not run in
    /// either case.
    pub async fn execute_with_lock<T, F, Fut>(
        &self,
        name: &str,
        f: F,
        opts: Option<LockOptions>,
    ) -> CacheResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let opts = opts.unwrap_or(self.defaults);
        let guard = self.hold(name, &opts).await?;

        let result = f().await;
        guard.release().await;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryStore;
    use crate::codec::JsonCodec;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn lock() -> DistributedLock {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(RemoteStoreAdapter::with_store(store, JsonCodec::default()));
        DistributedLock::new(remote, LockOptions::default())
    }

    fn quick(timeout_ms: u64, retries: u32) -> LockOptions {
        LockOptions {
            timeout: Duration::from_millis(timeout_ms),
            retry_count: retries,
            retry_delay: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn second_acquire_fails_while_held() {
        let lock = lock();
        let token = lock.acquire("job", &quick(5000, 0)).await.unwrap();
        assert!(lock.acquire("job", &quick(5000, 2)).await.is_none());
        assert!(lock.is_locked("job").await);
        assert!(lock.release("job", &token).await);
        assert!(!lock.is_locked("job").await);
    }

    #[tokio::test]
    async fn release_is_idempotent_and_token_bound() {
        let lock = lock();
        let first = lock.acquire("job", &quick(5000, 0)).await.unwrap();
        assert!(lock.release("job", &first).await);
        assert!(!lock.release("job", &first).await);

        let second = lock.acquire("job", &quick(5000, 0)).await.unwrap();
        assert!(!lock.release("job", &first).await, "stale token must not release");
        assert!(lock.is_locked("job").await);
        assert!(lock.release("job", &second).await);
    }

    #[tokio::test]
    async fn lock_expires_on_its_own() {
        let lock = lock();
        let _abandoned = lock.acquire("job", &quick(200, 0)).await.unwrap();
        assert!(lock.acquire("job", &quick(200, 0)).await.is_none());
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(lock.acquire("job", &quick(200, 0)).await.is_some());
    }

    #[tokio::test]
    async fn execute_with_lock_fails_when_contended() {
        let lock = lock();
        let _held = lock.acquire("job", &quick(5000, 0)).await.unwrap();
        let ran = AtomicU32::new(0);
        let counter = &ran;
        let result = lock
            .execute_with_lock(
                "job",
                || async move { counter.fetch_add(1, Ordering::SeqCst) },
                Some(quick(5000, 1)),
            )
            .await;
        assert!(matches!(result, Err(CacheError::LockAcquisition { .. })));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn execute_with_lock_releases_after_error_result() {
        let lock = lock();
        let result: CacheResult<Result<(), &str>> = lock
            .execute_with_lock("job", || async { Err("boom") }, None)
            .await;
        assert_eq!(result.unwrap(), Err("boom"));
        assert!(!lock.is_locked("job").await);
    }

    #[tokio::test]
    async fn cancelled_critical_section_still_releases() {
        let lock = Arc::new(lock());
        let task = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move {
                lock.execute_with_lock("job", || tokio::time::sleep(Duration::from_secs(30)), None)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(lock.is_locked("job").await);
        task.abort();
        let _ = task.await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!lock.is_locked("job").await);
    }

    #[tokio::test]
    async fn unreachable_store_is_not_contention() {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(RemoteStoreAdapter::with_store(store.clone(), JsonCodec::default()));
        let lock = DistributedLock::new(remote, LockOptions::default());
        store.simulate_outage(true);

        let started = std::time::Instant::now();
        assert!(matches!(
            lock.try_acquire("job", &quick(5000, 50)).await,
            Err(CacheError::Connection(_))
        ));
        assert!(started.elapsed() < Duration::from_millis(100), "no retries on outage");

        let ran = AtomicU32::new(0);
        let counter = &ran;
        let result = lock
            .execute_with_lock(
                "job",
                || async move { counter.fetch_add(1, Ordering::SeqCst) },
                Some(quick(5000, 3)),
            )
            .await;
        assert!(matches!(result, Err(CacheError::Connection(_))));
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        store.simulate_outage(false);
        assert!(matches!(lock.try_acquire("job", &quick(5000, 0)).await, Ok(Some(_))));
    }

    #[tokio::test]
    async fn no_store_means_no_lock() {
        let lock = DistributedLock::new(
            Arc::new(RemoteStoreAdapter::disconnected()),
            LockOptions::default(),
        );
        assert!(lock.acquire("job", &quick(100, 5)).await.is_none());
    }
}
