use crate::report::Outcome;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sliding window of handle latencies used for percentile estimates
#[derive(Debug, Clone)]
pub struct PercentileTracker {
    samples: Arc<Mutex<VecDeque<Duration>>>,
    window: usize,
}

impl PercentileTracker {
    /// Create a tracker keeping the last `window` samples
    pub fn new(window: usize) -> Self {
        Self {
            samples: Arc::new(Mutex::new(VecDeque::with_capacity(window))),
            window: window.max(1),
        }
    }

    /// Record one latency sample
    pub fn record(&self, latency: Duration) {
        let mut samples = self.samples.lock();
        if samples.len() >= self.window {
            samples.pop_front();
        }
        samples.push_back(latency);
    }

    /// Latency at quantile `q` (0.0-1.0) in microseconds
    pub fn quantile_us(&self, q: f64) -> f64 {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return 0.0;
        }

        let mut sorted: Vec<Duration> = samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = ((sorted.len() as f64 * q).ceil() as usize)
            .saturating_sub(1)
            .min(sorted.len() - 1);
        sorted[idx].as_secs_f64() * 1_000_000.0
    }

    /// Number of samples currently in the window
    pub fn count(&self) -> usize {
        self.samples.lock().len()
    }
}

#[derive(Debug, Default)]
struct Counters {
    handled: AtomicU64,
    forwarded: AtomicU64,
    continued: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    produced: AtomicU64,
    panics: AtomicU64,
    blocks: AtomicU64,
}

/// Per-stage metrics, shared between the stage's workers and the pipeline handle.
///
/// Cloning is cheap; every clone observes the same counters.
#[derive(Debug, Clone)]
pub struct StageMetrics {
    counters: Arc<Counters>,
    latency: PercentileTracker,
    start_time: Instant,
}

impl StageMetrics {
    /// Create an empty metrics collector
    pub fn new() -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            latency: PercentileTracker::new(1000),
            start_time: Instant::now(),
        }
    }

    /// Record one completed handle call and how long it took
    pub fn record_handled(&self, latency: Duration) {
        self.counters.handled.fetch_add(1, Ordering::Relaxed);
        self.latency.record(latency);
    }

    /// Record the routing decision applied to a handled message
    pub fn record_outcome(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Done => &self.counters.forwarded,
            Outcome::Continue => &self.counters.continued,
            Outcome::Retry => &self.counters.retried,
            Outcome::Fail => &self.counters.failed,
            Outcome::Drop => &self.counters.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message forwarded from the produce path
    pub fn record_produced(&self) {
        self.counters.produced.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a panic caught inside a component
    pub fn record_panic(&self) {
        self.counters.panics.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a send that found its destination full and had to wait
    pub fn record_block(&self) {
        self.counters.blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_handled(&self) -> u64 {
        self.counters.handled.load(Ordering::Relaxed)
    }

    pub fn total_forwarded(&self) -> u64 {
        self.counters.forwarded.load(Ordering::Relaxed)
    }

    pub fn total_continued(&self) -> u64 {
        self.counters.continued.load(Ordering::Relaxed)
    }

    pub fn total_retried(&self) -> u64 {
        self.counters.retried.load(Ordering::Relaxed)
    }

    pub fn total_failed(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }

    pub fn total_dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    pub fn total_produced(&self) -> u64 {
        self.counters.produced.load(Ordering::Relaxed)
    }

    pub fn total_panics(&self) -> u64 {
        self.counters.panics.load(Ordering::Relaxed)
    }

    pub fn total_blocks(&self) -> u64 {
        self.counters.blocks.load(Ordering::Relaxed)
    }

    /// Handle calls per second since the stage started
    pub fn throughput_mps(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            0.0
        } else {
            self.total_handled() as f64 / elapsed
        }
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            handled: self.total_handled(),
            forwarded: self.total_forwarded(),
            continued: self.total_continued(),
            retried: self.total_retried(),
            failed: self.total_failed(),
            dropped: self.total_dropped(),
            produced: self.total_produced(),
            panics: self.total_panics(),
            blocks: self.total_blocks(),
            throughput_mps: self.throughput_mps(),
            latency_p50_us: self.latency.quantile_us(0.50),
            latency_p95_us: self.latency.quantile_us(0.95),
            latency_p99_us: self.latency.quantile_us(0.99),
            elapsed: self.start_time.elapsed(),
        }
    }
}

impl Default for StageMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time copy of a stage's metrics
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub handled: u64,
    pub forwarded: u64,
    pub continued: u64,
    pub retried: u64,
    pub failed: u64,
    pub dropped: u64,
    pub produced: u64,
    pub panics: u64,
    pub blocks: u64,
    pub throughput_mps: f64,
    pub latency_p50_us: f64,
    pub latency_p95_us: f64,
    pub latency_p99_us: f64,
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    /// Format metrics as a human-readable string
    pub fn format(&self) -> String {
        format!(
            "Handled: {}, Forwarded: {}, Continued: {}, Retried: {}, Failed: {}, Dropped: {}, \
             Produced: {}, Panics: {}, Blocks: {}, Throughput: {:.2} msg/s, \
             Latency P50: {:.2}µs, P95: {:.2}µs, P99: {:.2}µs, Elapsed: {:.2}s",
            self.handled,
            self.forwarded,
            self.continued,
            self.retried,
            self.failed,
            self.dropped,
            self.produced,
            self.panics,
            self.blocks,
            self.throughput_mps,
            self.latency_p50_us,
            self.latency_p95_us,
            self.latency_p99_us,
            self.elapsed.as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_tracker() {
        let tracker = PercentileTracker::new(10);
        for i in 1..=10 {
            tracker.record(Duration::from_micros(i));
        }
        assert_eq!(tracker.count(), 10);
        assert!((tracker.quantile_us(0.5) - 5.0).abs() < 1e-6);
        assert!(tracker.quantile_us(0.99) >= tracker.quantile_us(0.5));
    }

    #[test]
    fn test_tracker_window_slides() {
        let tracker = PercentileTracker::new(2);
        tracker.record(Duration::from_micros(100));
        tracker.record(Duration::from_micros(1));
        tracker.record(Duration::from_micros(1));
        assert_eq!(tracker.count(), 2);
        assert!((tracker.quantile_us(1.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_outcome_counters() {
        let metrics = StageMetrics::new();
        metrics.record_handled(Duration::from_micros(3));
        metrics.record_outcome(Outcome::Done);
        metrics.record_outcome(Outcome::Retry);
        metrics.record_outcome(Outcome::Fail);
        metrics.record_outcome(Outcome::Fail);

        let clone = metrics.clone();
        let snapshot = clone.snapshot();
        assert_eq!(snapshot.handled, 1);
        assert_eq!(snapshot.forwarded, 1);
        assert_eq!(snapshot.retried, 1);
        assert_eq!(snapshot.failed, 2);
        assert_eq!(snapshot.dropped, 0);
        assert!(snapshot.format().contains("Failed: 2"));
    }
}
