//! Runtime health of a single DNS server.
//!
//! Chromium mapping: `DnsSession::ServerStats` in net/dns/dns_session.cc

use super::rtt::{RttBuckets, RttHistogram, RTT_PERCENTILE};
use std::time::{Duration, Instant};

/// Number of synthetic samples the histogram starts with.
pub const NUM_SEEDS: i64 = 2;

/// Lower bound for any computed timeout, in case we are talking to a local
/// DNS proxy.
pub const MIN_TIMEOUT: Duration = Duration::from_millis(10);

/// When a failure happened.
///
/// `seq` orders failures recorded within the same clock tick, so "oldest
/// failure" is always well defined within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FailureStamp {
    pub at: Instant,
    pub seq: u64,
}

/// Failure counters and RTT distribution for one server.
#[derive(Debug, Clone)]
pub struct ServerHealthTracker {
    consecutive_failure_count: usize,
    last_failure: Option<FailureStamp>,
    last_success: Option<Instant>,
    rtt_histogram: RttHistogram,
}

impl ServerHealthTracker {
    /// Create a tracker whose histogram is seeded at `rtt_estimate`.
    pub fn new(rtt_estimate: Duration, buckets: &'static RttBuckets) -> Self {
        let mut rtt_histogram = RttHistogram::new(buckets);
        rtt_histogram.accumulate(saturated_millis(rtt_estimate), NUM_SEEDS);
        Self { consecutive_failure_count: 0, last_failure: None, last_success: None, rtt_histogram }
    }

    pub fn consecutive_failure_count(&self) -> usize {
        self.consecutive_failure_count
    }

    pub fn last_failure(&self) -> Option<FailureStamp> {
        self.last_failure
    }

    pub fn last_failure_time(&self) -> Option<Instant> {
        self.last_failure.map(|stamp| stamp.at)
    }

    pub fn last_success_time(&self) -> Option<Instant> {
        self.last_success
    }

    pub fn rtt_histogram(&self) -> &RttHistogram {
        &self.rtt_histogram
    }

    pub(crate) fn record_failure(&mut self, stamp: FailureStamp) -> usize {
        self.consecutive_failure_count += 1;
        self.last_failure = Some(stamp);
        self.consecutive_failure_count
    }

    pub(crate) fn record_success(&mut self, now: Instant, reset_failure_count: bool) {
        if reset_failure_count {
            self.consecutive_failure_count = 0;
        }
        self.last_failure = None;
        self.last_success = Some(now);
    }

    pub(crate) fn record_rtt(&mut self, rtt_ms: i32) {
        self.rtt_histogram.accumulate(rtt_ms.max(0), 1);
    }

    /// Timeout for the next attempt against this server.
    ///
    /// An `initial_timeout` above `max_timeout` is an explicit override and
    /// wins outright. Otherwise the 99th percentile of observed RTTs, floored
    /// at [`MIN_TIMEOUT`], doubled `num_backoffs` times and capped at
    /// `max_timeout`.
    pub fn next_timeout(
        &self,
        initial_timeout: Duration,
        max_timeout: Duration,
        num_backoffs: u32,
    ) -> Duration {
        if initial_timeout > max_timeout {
            return initial_timeout;
        }

        let timeout = self.rtt_histogram.percentile_upper_bound(RTT_PERCENTILE).max(MIN_TIMEOUT);
        let multiplier = 1u32.checked_shl(num_backoffs).unwrap_or(u32::MAX);
        timeout.saturating_mul(multiplier).min(max_timeout)
    }
}

/// Milliseconds clamped into the histogram's sample range.
pub(crate) fn saturated_millis(duration: Duration) -> i32 {
    i32::try_from(duration.as_millis()).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(seed: Duration) -> ServerHealthTracker {
        ServerHealthTracker::new(seed, RttBuckets::shared())
    }

    #[test]
    fn test_new_tracker_is_healthy() {
        let t = tracker(Duration::from_secs(1));
        assert_eq!(t.consecutive_failure_count(), 0);
        assert!(t.last_failure_time().is_none());
        assert!(t.last_success_time().is_none());
        assert_eq!(t.rtt_histogram().total_count(), NUM_SEEDS);
    }

    #[test]
    fn test_failure_then_success() {
        let mut t = tracker(Duration::from_secs(1));
        let now = Instant::now();
        assert_eq!(t.record_failure(FailureStamp { at: now, seq: 1 }), 1);
        assert_eq!(t.record_failure(FailureStamp { at: now, seq: 2 }), 2);
        assert_eq!(t.last_failure().unwrap().seq, 2);

        t.record_success(now, false);
        assert_eq!(t.consecutive_failure_count(), 2);
        assert!(t.last_failure().is_none());
        assert_eq!(t.last_success_time(), Some(now));

        t.record_success(now, true);
        assert_eq!(t.consecutive_failure_count(), 0);
    }

    #[test]
    fn test_failure_stamp_ordering() {
        let now = Instant::now();
        let a = FailureStamp { at: now, seq: 1 };
        let b = FailureStamp { at: now, seq: 2 };
        let c = FailureStamp { at: now + Duration::from_millis(1), seq: 0 };
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_timeout_floor() {
        let t = tracker(Duration::from_millis(1));
        let timeout = t.next_timeout(Duration::from_millis(1), Duration::from_secs(5), 0);
        assert_eq!(timeout, MIN_TIMEOUT);
    }

    #[test]
    fn test_timeout_override_when_initial_exceeds_max() {
        let t = tracker(Duration::from_secs(10));
        let timeout = t.next_timeout(Duration::from_secs(10), Duration::from_secs(5), 3);
        assert_eq!(timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_timeout_backoff_capped() {
        let t = tracker(Duration::from_secs(1));
        let base = t.next_timeout(Duration::from_secs(1), Duration::from_secs(5), 0);
        assert_eq!(t.next_timeout(Duration::from_secs(1), Duration::from_secs(5), 1), base * 2);
        assert_eq!(
            t.next_timeout(Duration::from_secs(1), Duration::from_secs(5), 3),
            Duration::from_secs(5)
        );
        assert_eq!(
            t.next_timeout(Duration::from_secs(1), Duration::from_secs(5), 40),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_fast_samples_pull_timeout_down() {
        let mut t = tracker(Duration::from_secs(1));
        for _ in 0..500 {
            t.record_rtt(30);
        }
        let timeout = t.next_timeout(Duration::from_secs(1), Duration::from_secs(5), 0);
        assert!(timeout < Duration::from_millis(40), "got {timeout:?}");
        assert!(timeout >= Duration::from_millis(30));
    }

    #[test]
    fn test_saturated_millis() {
        assert_eq!(saturated_millis(Duration::from_millis(42)), 42);
        assert_eq!(saturated_millis(Duration::from_secs(u64::MAX / 2)), i32::MAX);
    }
}
