//! In-process fallback counters.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

#[derive(Debug)]
struct Bucket {
    hits: u64,
    reset_at: u64,
}

/// Fixed-window counters keyed by bucket key.
///
/// `DashMap::entry` holds the shard's write lock for the whole
/// read-reset-increment step, so concurrent hits on one key never lose
/// updates. Once the map reaches `sweep_threshold` keys, a new key triggers
/// a sweep of buckets whose window has passed, at most once per second;
/// `sweep` can also be called directly.
#[derive(Debug)]
pub(crate) struct LocalBuckets {
    buckets: DashMap<String, Bucket>,
    sweep_threshold: usize,
    /// Earliest second at which the next threshold sweep may run.
    next_sweep: AtomicU64,
    #[cfg(test)]
    threshold_sweeps: AtomicU64,
}

impl LocalBuckets {
    pub(crate) fn new(sweep_threshold: usize) -> Self {
        Self {
            buckets: DashMap::new(),
            sweep_threshold,
            next_sweep: AtomicU64::new(0),
            #[cfg(test)]
            threshold_sweeps: AtomicU64::new(0),
        }
    }

    /// Records one hit; returns `(hits, reset_at)` for the current window.
    pub(crate) fn hit(&self, key: &str, now: u64, window: u64) -> (u64, u64) {
        if self.buckets.len() >= self.sweep_threshold && !self.buckets.contains_key(key) {
            self.sweep_throttled(now);
        }
        let reset_at = now.saturating_add(window);
        let mut bucket = self
            .buckets
            .entry(key.to_owned())
            .or_insert(Bucket { hits: 0, reset_at });
        if now >= bucket.reset_at {
            bucket.hits = 0;
            bucket.reset_at = reset_at;
        }
        bucket.hits += 1;
        (bucket.hits, bucket.reset_at)
    }

    /// Drops every bucket whose window ended by `now`. Returns how many.
    pub(crate) fn sweep(&self, now: u64) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, b| b.reset_at > now);
        before.saturating_sub(self.buckets.len())
    }

    /// Sweeps unless another caller already swept during this second.
    fn sweep_throttled(&self, now: u64) {
        let next = self.next_sweep.load(Ordering::Acquire);
        if now < next {
            return;
        }
        if self
            .next_sweep
            .compare_exchange(next, now.saturating_add(1), Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        #[cfg(test)]
        self.threshold_sweeps.fetch_add(1, Ordering::Relaxed);
        self.sweep(now);
    }

    pub(crate) fn len(&self) -> usize {
        self.buckets.len()
    }
}
