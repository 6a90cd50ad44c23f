//! # Fixed-Bucket Latency Histogram
//!
//! A lock-free latency recorder with a fixed set of millisecond buckets. One
//! instance exists per operation kind. Every field is an independent atomic,
//! so any number of producers can record concurrently while a reader takes
//! a snapshot without pausing them.
//!
//! ## Buckets
//!
//! Upper bounds are `1, 2, 5, 10, 20, 50, 100, 200, 500, 1000, 2000, 5000`
//! milliseconds, plus one overflow bucket for anything above 5 seconds. A
//! sample lands in the first bucket whose bound is greater than or equal to
//! its value, so exactly 10ms goes to `≤10ms` and 10.001ms goes to `≤20ms`.
//!
//! ## High-Priority Subset
//!
//! Samples with `priority >= HIGH_PRIORITY_THRESHOLD` are additionally
//! recorded into a shadow distribution sharing the same bounds.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Bucket upper bounds in milliseconds.
pub const BUCKET_BOUNDS_MS: [u64; 12] = [1, 2, 5, 10, 20, 50, 100, 200, 500, 1000, 2000, 5000];

/// Number of buckets including the overflow bucket.
pub const BUCKET_COUNT: usize = BUCKET_BOUNDS_MS.len() + 1;

/// Index of the `>5000ms` bucket.
pub const OVERFLOW_BUCKET: usize = BUCKET_BOUNDS_MS.len();

/// Samples at or above this priority also feed the high-priority histogram.
pub const HIGH_PRIORITY_THRESHOLD: u8 = 3;

const NANOS_PER_MS: u64 = 1_000_000;

/// Bucket index for a latency: the smallest `i` with `bound[i] >= latency`,
/// or [`OVERFLOW_BUCKET`] when the latency exceeds the last bound.
///
/// The comparison is done in whole nanoseconds so that boundary values are
/// exact.
pub fn bucket_index(latency: Duration) -> usize {
    let nanos = duration_nanos(latency);
    BUCKET_BOUNDS_MS
        .iter()
        .position(|&bound_ms| nanos <= bound_ms * NANOS_PER_MS)
        .unwrap_or(OVERFLOW_BUCKET)
}

/// Human-readable label for a bucket (`≤10ms`, `>5000ms`).
pub fn bucket_label(index: usize) -> String {
    match BUCKET_BOUNDS_MS.get(index) {
        Some(bound) => format!("≤{}ms", bound),
        None => format!(">{}ms", BUCKET_BOUNDS_MS[OVERFLOW_BUCKET - 1]),
    }
}

fn duration_nanos(latency: Duration) -> u64 {
    u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX)
}

/// Replace `cell` with `sample` while `supersedes(sample, current)` holds.
///
/// Classic read-compare-conditionally-replace loop: a failed exchange reloads
/// the value another writer installed and re-checks it, so no update is lost
/// and the loop ends as soon as the stored value already dominates `sample`.
pub fn update_extreme<F>(cell: &AtomicU64, sample: u64, supersedes: F)
where
    F: Fn(u64, u64) -> bool,
{
    let mut current = cell.load(Ordering::Relaxed);
    while supersedes(sample, current) {
        match cell.compare_exchange_weak(current, sample, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return,
            Err(actual) => current = actual,
        }
    }
}

/// Summary of one latency population, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: u64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub buckets: [u64; BUCKET_COUNT],
}

impl LatencySummary {
    /// All-zero summary used for empty populations.
    pub fn empty() -> Self {
        Self {
            count: 0,
            avg_ms: 0.0,
            min_ms: 0.0,
            max_ms: 0.0,
            buckets: [0; BUCKET_COUNT],
        }
    }

    pub fn has_data(&self) -> bool {
        self.count > 0
    }

    /// Share of samples in `index`, as a percentage of `count`.
    pub fn bucket_percentage(&self, index: usize) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.buckets[index] as f64 * 100.0 / self.count as f64
    }
}

/// One population of samples: counters, extremes and buckets.
#[derive(Debug)]
struct Distribution {
    count: AtomicU64,
    sum_nanos: AtomicU64,
    max_nanos: AtomicU64,
    min_nanos: AtomicU64,
    buckets: [AtomicU64; BUCKET_COUNT],
}

impl Distribution {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum_nanos: AtomicU64::new(0),
            max_nanos: AtomicU64::new(0),
            // Start at the ceiling so the first sample always wins
            min_nanos: AtomicU64::new(u64::MAX),
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    fn record(&self, nanos: u64, bucket: usize) {
        // Bucket before count: a concurrent reader that loads count first
        // never sees more samples counted than bucketed.
        self.buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.sum_nanos.fetch_add(nanos, Ordering::Relaxed);
        update_extreme(&self.max_nanos, nanos, |new, cur| new > cur);
        update_extreme(&self.min_nanos, nanos, |new, cur| new < cur);
        self.count.fetch_add(1, Ordering::Release);
    }

    fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    fn summary(&self) -> LatencySummary {
        let count = self.count();
        if count == 0 {
            return LatencySummary::empty();
        }

        let sum = self.sum_nanos.load(Ordering::Relaxed);
        let max = self.max_nanos.load(Ordering::Relaxed);
        let min = self.min_nanos.load(Ordering::Relaxed);

        let mut buckets = [0u64; BUCKET_COUNT];
        for (slot, bucket) in buckets.iter_mut().zip(self.buckets.iter()) {
            *slot = bucket.load(Ordering::Relaxed);
        }

        LatencySummary {
            count,
            avg_ms: sum as f64 / count as f64 / NANOS_PER_MS as f64,
            min_ms: min as f64 / NANOS_PER_MS as f64,
            max_ms: max as f64 / NANOS_PER_MS as f64,
            buckets,
        }
    }
}

/// Concurrent fixed-bucket latency recorder for one operation kind.
#[derive(Debug)]
pub struct LatencyHistogram {
    all: Distribution,
    high_priority: Distribution,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self {
            all: Distribution::new(),
            high_priority: Distribution::new(),
        }
    }

    /// Record one sample. Never blocks and never fails.
    pub fn record(&self, latency: Duration, priority: u8) {
        let nanos = duration_nanos(latency);
        let bucket = bucket_index(latency);

        self.all.record(nanos, bucket);
        if priority >= HIGH_PRIORITY_THRESHOLD {
            self.high_priority.record(nanos, bucket);
        }
    }

    pub fn total_count(&self) -> u64 {
        self.all.count()
    }

    pub fn high_priority_count(&self) -> u64 {
        self.high_priority.count()
    }

    /// Plain-load snapshot of every sample recorded so far.
    pub fn snapshot(&self) -> LatencySummary {
        self.all.summary()
    }

    /// Plain-load snapshot of the high-priority subset.
    pub fn high_priority_snapshot(&self) -> LatencySummary {
        self.high_priority.summary()
    }
}
