//! RTT histogram used for retransmission timeouts.
//!
//! Chromium mapping: the `RttBuckets` / `base::SampleVector` pair in
//! net/dns/dns_session.cc.
//!
//! The bucket boundaries are exponential between 1 ms and 30 s and are
//! computed once per process. Every histogram borrows the same table.

use std::sync::LazyLock;
use std::time::Duration;

/// Largest RTT that lands in a bounded bucket.
pub const RTT_MAX: Duration = Duration::from_secs(30);

/// Number of buckets in each histogram.
pub const RTT_BUCKET_COUNT: usize = 350;

/// Percentile of observed samples used as the timeout.
pub const RTT_PERCENTILE: i64 = 99;

/// Immutable, exponentially spaced bucket boundaries in milliseconds.
///
/// `ranges[i]` is the inclusive lower bound of bucket `i`; the final entry
/// is the exclusive upper bound of the overflow bucket.
#[derive(Debug)]
pub struct RttBuckets {
    ranges: Vec<i32>,
}

impl RttBuckets {
    fn new(minimum: i32, maximum: i32, bucket_count: usize) -> Self {
        let mut ranges = vec![0i32; bucket_count + 1];
        let log_max = f64::from(maximum).ln();

        let mut current = minimum;
        let mut bucket_index = 1;
        ranges[bucket_index] = current;
        loop {
            bucket_index += 1;
            if bucket_index >= bucket_count {
                break;
            }
            let log_current = f64::from(current).ln();
            let log_ratio = (log_max - log_current) / (bucket_count - bucket_index) as f64;
            let next = (log_current + log_ratio).exp().round() as i32;
            current = if next > current { next } else { current + 1 };
            ranges[bucket_index] = current;
        }
        ranges[bucket_count] = i32::MAX;

        Self { ranges }
    }

    /// The shared process-wide table.
    pub fn shared() -> &'static RttBuckets {
        static BUCKETS: LazyLock<RttBuckets> =
            LazyLock::new(|| RttBuckets::new(1, RTT_MAX.as_millis() as i32, RTT_BUCKET_COUNT));
        &BUCKETS
    }

    /// Number of boundaries (bucket count + 1).
    pub fn size(&self) -> usize {
        self.ranges.len()
    }

    /// Number of buckets.
    pub fn bucket_count(&self) -> usize {
        self.ranges.len() - 1
    }

    /// Boundary `index` in milliseconds.
    pub fn range(&self, index: usize) -> i32 {
        self.ranges[index]
    }

    /// Bucket holding `sample_ms`.
    pub fn bucket_index(&self, sample_ms: i32) -> usize {
        let sample_ms = sample_ms.max(0);
        let upper = self.ranges.partition_point(|&r| r <= sample_ms);
        upper.saturating_sub(1).min(self.bucket_count() - 1)
    }
}

/// A running histogram of RTT samples over a shared bucket table.
#[derive(Debug, Clone)]
pub struct RttHistogram {
    buckets: &'static RttBuckets,
    counts: Vec<i64>,
    total: i64,
}

impl RttHistogram {
    pub fn new(buckets: &'static RttBuckets) -> Self {
        Self { buckets, counts: vec![0; buckets.bucket_count()], total: 0 }
    }

    /// Add `count` samples of `sample_ms`.
    pub fn accumulate(&mut self, sample_ms: i32, count: i64) {
        let index = self.buckets.bucket_index(sample_ms);
        self.counts[index] += count;
        self.total += count;
    }

    pub fn total_count(&self) -> i64 {
        self.total
    }

    pub fn count_at_index(&self, index: usize) -> i64 {
        self.counts.get(index).copied().unwrap_or(0)
    }

    /// Upper boundary of the bucket reached once `percentile` percent of the
    /// samples have been consumed.
    pub fn percentile_upper_bound(&self, percentile: i64) -> Duration {
        let mut remaining = percentile * self.total / 100;
        let mut index = 0;
        while remaining > 0 && index < self.buckets.size() {
            remaining -= self.count_at_index(index);
            index += 1;
        }

        let millis = if index < self.buckets.size() {
            self.buckets.range(index)
        } else {
            i32::MAX
        };
        Duration::from_millis(millis.max(0) as u64)
    }
}
