//! Cache counters.
//!
//! Each [`PlayerCacheManager`](crate::cache::PlayerCacheManager) owns one
//! [`CacheCounters`]; [`CacheCounters::snapshot`] gives a consistent-enough copy for
//! status output and tests.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Default)]
pub struct CacheCounters {
    cached: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    flushes: AtomicU64,
    flush_failures: AtomicU64,
    requeues: AtomicU64,
    evictions: AtomicU64,
    cleared: AtomicU64,
    flush_latency_sum_ms: AtomicU64,
}

impl CacheCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_cached(&self) {
        self.cached.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lookup(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a successful flush that started at `started`.
    pub fn observe_flush(&self, started: Instant) {
        let ms = started.elapsed().as_millis() as u64;
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.flush_latency_sum_ms.fetch_add(ms, Ordering::Relaxed);
    }

    pub fn inc_flush_failure(&self) {
        self.flush_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_requeue(&self) {
        self.requeues.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_cleared(&self, count: u64) {
        self.cleared.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        let flushes = self.flushes.load(Ordering::Relaxed);
        let sum = self.flush_latency_sum_ms.load(Ordering::Relaxed);
        CacheSnapshot {
            cached: self.cached.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            flushes,
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            requeues: self.requeues.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            cleared: self.cleared.load(Ordering::Relaxed),
            flush_latency_avg_ms: if flushes > 0 { Some(sum / flushes) } else { None },
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheSnapshot {
    pub cached: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub flushes: u64,
    pub flush_failures: u64,
    pub requeues: u64,
    pub evictions: u64,
    pub cleared: u64,
    pub flush_latency_avg_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let counters = CacheCounters::new();
        assert_eq!(counters.snapshot(), CacheSnapshot::default());

        counters.inc_cached();
        counters.record_lookup(true);
        counters.record_lookup(false);
        counters.record_lookup(false);
        counters.observe_flush(Instant::now());
        counters.inc_flush_failure();
        counters.inc_requeue();
        counters.inc_eviction();
        counters.add_cleared(3);

        let snap = counters.snapshot();
        assert_eq!(snap.cached, 1);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.cache_misses, 2);
        assert_eq!(snap.flushes, 1);
        assert_eq!(snap.flush_failures, 1);
        assert_eq!(snap.requeues, 1);
        assert_eq!(snap.evictions, 1);
        assert_eq!(snap.cleared, 3);
        assert!(snap.flush_latency_avg_ms.is_some());
    }
}
