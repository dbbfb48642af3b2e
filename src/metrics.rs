//! Cache Metrics
//!
//! Lock-free counters owned by the orchestrator, plus the snapshot handed to
//! callers. `hit_rate` is derived on every snapshot and never stored.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of the counters
///
/// `hits` counts every served read (local or distributed); `distributed_hits`
/// is the subset that came from the remote tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub distributed_hits: u64,
    /// `hits / (hits + misses) * 100`, `0.0` with no traffic
    pub hit_rate: f64,
}

/// Thread-safe counters
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    distributed_hits: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// A hit served by the remote tier (also counted as a hit)
    pub fn record_distributed_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.distributed_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deletes(&self, count: u64) {
        self.deletes.fetch_add(count, Ordering::Relaxed);
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheMetricsSnapshot {
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            distributed_hits: self.distributed_hits.load(Ordering::Relaxed),
            hit_rate: if total > 0 {
                (hits as f64 / total as f64) * 100.0
            } else {
                0.0
            },
        }
    }

    /// Reset every counter to zero
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.sets,
            &self.deletes,
            &self.distributed_hits,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_is_zero_without_traffic() {
        assert!(CacheMetrics::new().snapshot().hit_rate.abs() < f64::EPSILON);
    }

    #[test]
    fn distributed_hits_count_as_hits() {
        let metrics = CacheMetrics::new();
        metrics.record_hit();
        metrics.record_distributed_hit();
        metrics.record_miss();
        metrics.record_miss();

        let snap = metrics.snapshot();
        assert_eq!(snap.hits, 2);
        assert_eq!(snap.distributed_hits, 1);
        assert_eq!(snap.misses, 2);
        assert!((snap.hit_rate - 50.0).abs() < 1e-9);
    }

    #[test]
    fn reset_clears_counters() {
        let metrics = CacheMetrics::new();
        metrics.record_set();
        metrics.record_deletes(3);
        metrics.reset();
        assert_eq!(metrics.snapshot(), CacheMetricsSnapshot::default());
    }
}
