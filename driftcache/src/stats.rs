//! Request and hit counters, updated without locking.
//!
//! Small lost updates are acceptable; everything here is
//! `Ordering::Relaxed` on purpose.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct CacheStats {
    requests: AtomicU64,
    weak_hits: AtomicU64,
    memory_hits: AtomicU64,
    file_hits: AtomicU64,
}

impl CacheStats {
    /// Count a request and return the running total.
    #[inline]
    pub fn record_request(&self) -> u64 {
        self.requests.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    pub fn record_weak_hit(&self) {
        self.weak_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_file_hit(&self) {
        self.file_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, inflight_joins: u64) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            weak_hits: self.weak_hits.load(Ordering::Relaxed),
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            file_hits: self.file_hits.load(Ordering::Relaxed),
            inflight_joins,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub weak_hits: u64,
    pub memory_hits: u64,
    pub file_hits: u64,
    pub inflight_joins: u64,
}

impl StatsSnapshot {
    pub fn total_hits(&self) -> u64 {
        self.weak_hits + self.memory_hits + self.file_hits
    }

    /// Percentage of requests served from any tier.
    pub fn hit_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.total_hits() as f64 * 100.0 / self.requests as f64
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = CacheStats::default();
        assert_eq!(stats.record_request(), 1);
        assert_eq!(stats.record_request(), 2);
        stats.record_weak_hit();
        stats.record_file_hit();

        let snap = stats.snapshot(5);
        assert_eq!(snap.requests, 2);
        assert_eq!(snap.total_hits(), 2);
        assert_eq!(snap.inflight_joins, 5);
        assert!((snap.hit_rate() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_snapshot_has_zero_rate() {
        let snap = StatsSnapshot::default();
        assert_eq!(snap.hit_rate(), 0.0);
    }
}
