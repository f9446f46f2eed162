//! Constant-memory latency tracking using HDR Histogram.
//!
//! Summary mode keeps every outcome and computes exact percentiles. Streaming
//! mode must not grow with the run, so it folds latencies into an
//! [`hdrhistogram::Histogram`] instead and reports approximate percentiles
//! (3 significant digits) when the run ends.

use std::time::Duration;

use hdrhistogram::{CreationError, Histogram};
use tracing::warn;

/// Highest trackable latency in microseconds (one hour).
const MAX_TRACKABLE_US: u64 = 3_600_000_000;

/// Percentile statistics for a set of latency measurements.
#[derive(Debug, Clone, PartialEq)]
pub struct PercentileStats {
    /// Number of samples
    pub count: u64,

    /// Minimum value (microseconds)
    pub min: u64,

    /// Maximum value (microseconds)
    pub max: u64,

    /// Mean/average value (microseconds)
    pub mean: f64,

    /// 50th percentile - median (microseconds)
    pub p50: u64,

    /// 90th percentile (microseconds)
    pub p90: u64,

    /// 95th percentile (microseconds)
    pub p95: u64,

    /// 99th percentile (microseconds)
    pub p99: u64,

    /// 99.9th percentile (microseconds)
    pub p99_9: u64,
}

impl PercentileStats {
    /// Format statistics as a human-readable string.
    pub fn format(&self) -> String {
        format!(
            "count={}, min={:.2}ms, max={:.2}ms, mean={:.2}ms, p50={:.2}ms, p90={:.2}ms, p95={:.2}ms, p99={:.2}ms, p99.9={:.2}ms",
            self.count,
            self.min as f64 / 1000.0,
            self.max as f64 / 1000.0,
            self.mean / 1000.0,
            self.p50 as f64 / 1000.0,
            self.p90 as f64 / 1000.0,
            self.p95 as f64 / 1000.0,
            self.p99 as f64 / 1000.0,
            self.p99_9 as f64 / 1000.0,
        )
    }
}

/// Latency histogram owned by the result collector.
///
/// All latencies are stored in microseconds.
#[derive(Debug)]
pub struct LatencyTracker {
    histogram: Histogram<u64>,
}

impl LatencyTracker {
    /// Tracks 1µs to one hour with 3 significant digits.
    pub fn new() -> Result<Self, CreationError> {
        Ok(Self {
            histogram: Histogram::new_with_bounds(1, MAX_TRACKABLE_US, 3)?,
        })
    }

    pub fn record(&mut self, latency: Duration) {
        let latency_us = u64::try_from(latency.as_micros()).unwrap_or(MAX_TRACKABLE_US);
        let clamped = latency_us.clamp(1, MAX_TRACKABLE_US);

        if let Err(e) = self.histogram.record(clamped) {
            warn!(
                latency_us = latency_us,
                error = %e,
                "Failed to record latency in histogram"
            );
        }
    }

    pub fn len(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    /// Current percentile statistics, or `None` before the first sample.
    pub fn stats(&self) -> Option<PercentileStats> {
        let hist = &self.histogram;

        if hist.is_empty() {
            return None;
        }

        Some(PercentileStats {
            count: hist.len(),
            min: hist.min(),
            max: hist.max(),
            mean: hist.mean(),
            p50: hist.value_at_quantile(0.50),
            p90: hist.value_at_quantile(0.90),
            p95: hist.value_at_quantile(0.95),
            p99: hist.value_at_quantile(0.99),
            p99_9: hist.value_at_quantile(0.999),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tracker_has_no_stats() {
        let tracker = LatencyTracker::new().unwrap();
        assert!(tracker.is_empty());
        assert!(tracker.stats().is_none());
    }

    #[test]
    fn test_percentiles_are_ordered() {
        let mut tracker = LatencyTracker::new().unwrap();
        for ms in 1..=100 {
            tracker.record(Duration::from_millis(ms));
        }

        let stats = tracker.stats().unwrap();
        assert_eq!(stats.count, 100);
        assert!(stats.min <= stats.p50);
        assert!(stats.p50 <= stats.p90);
        assert!(stats.p90 <= stats.p95);
        assert!(stats.p95 <= stats.p99);
        assert!(stats.p99 <= stats.p99_9);
        assert!(stats.p99_9 <= stats.max);

        // 3 significant digits: within 0.1% of the true median.
        assert!((49_950..=50_050).contains(&stats.p50), "p50 = {}", stats.p50);
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let mut tracker = LatencyTracker::new().unwrap();
        tracker.record(Duration::ZERO);
        tracker.record(Duration::from_secs(10 * 3600));

        let stats = tracker.stats().unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.min, 1);
        assert!(stats.max >= MAX_TRACKABLE_US);
    }

    #[test]
    fn test_format() {
        let mut tracker = LatencyTracker::new().unwrap();
        tracker.record(Duration::from_millis(10));
        let formatted = tracker.stats().unwrap().format();
        assert!(formatted.contains("count=1"));
        assert!(formatted.contains("p50=10."));
    }
}
