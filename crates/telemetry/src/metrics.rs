//! Internal metrics collection.
//!
//! Collects pipeline counters in-memory; the scheduler logs a snapshot
//! on a fixed interval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A counter metric.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A gauge metric (can go up or down).
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Histogram for latency tracking.
#[derive(Debug)]
pub struct Histogram {
    /// Buckets: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 5s, 10s
    buckets: [AtomicU64; 11],
    sum: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    const BUCKET_BOUNDS: [u64; 11] = [1, 5, 10, 25, 50, 100, 250, 500, 1000, 5000, 10000];

    pub fn new() -> Self {
        Self {
            buckets: Default::default(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Records a value in milliseconds.
    pub fn observe(&self, ms: u64) {
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        for (i, &bound) in Self::BUCKET_BOUNDS.iter().enumerate() {
            if ms <= bound {
                self.buckets[i].fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        // Value exceeds all buckets, add to last
        self.buckets[10].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum() as f64 / count as f64
        }
    }

    /// Returns bucket counts.
    pub fn buckets(&self) -> Vec<(u64, u64)> {
        Self::BUCKET_BOUNDS
            .iter()
            .zip(self.buckets.iter())
            .map(|(&bound, count)| (bound, count.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Collected metrics for the pipeline.
#[derive(Debug, Default)]
pub struct Metrics {
    // Source metrics
    pub records_fetched: Counter,
    pub records_malformed: Counter,
    pub batches_fetched: Counter,
    pub empty_polls: Counter,
    pub batches_committed: Counter,
    pub source_errors: Counter,

    // Transform metrics
    pub validation_failures: Counter,
    pub batches_quarantined: Counter,

    // Store metrics
    pub raw_rows_written: Counter,
    pub curated_rows_written: Counter,
    pub store_errors: Counter,

    // Quality gate
    pub quality_checks: Counter,
    pub quality_violations: Counter,

    // Latency histograms
    pub fetch_latency_ms: Histogram,
    pub write_latency_ms: Histogram,
    pub cycle_latency_ms: Histogram,

    // Gauges
    pub consumer_lag: Gauge,
    pub consecutive_failures: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub records_fetched: u64,
    pub records_malformed: u64,
    pub batches_fetched: u64,
    pub empty_polls: u64,
    pub batches_committed: u64,
    pub source_errors: u64,
    pub validation_failures: u64,
    pub batches_quarantined: u64,
    pub raw_rows_written: u64,
    pub curated_rows_written: u64,
    pub store_errors: u64,
    pub quality_checks: u64,
    pub quality_violations: u64,
    pub fetch_latency_mean_ms: f64,
    pub write_latency_mean_ms: f64,
    pub cycle_latency_mean_ms: f64,
    pub consumer_lag: u64,
    pub consecutive_failures: u64,
}

impl Metrics {
    /// Takes a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            records_fetched: self.records_fetched.get(),
            records_malformed: self.records_malformed.get(),
            batches_fetched: self.batches_fetched.get(),
            empty_polls: self.empty_polls.get(),
            batches_committed: self.batches_committed.get(),
            source_errors: self.source_errors.get(),
            validation_failures: self.validation_failures.get(),
            batches_quarantined: self.batches_quarantined.get(),
            raw_rows_written: self.raw_rows_written.get(),
            curated_rows_written: self.curated_rows_written.get(),
            store_errors: self.store_errors.get(),
            quality_checks: self.quality_checks.get(),
            quality_violations: self.quality_violations.get(),
            fetch_latency_mean_ms: self.fetch_latency_ms.mean(),
            write_latency_mean_ms: self.write_latency_ms.mean(),
            cycle_latency_mean_ms: self.cycle_latency_ms.mean(),
            consumer_lag: self.consumer_lag.get(),
            consecutive_failures: self.consecutive_failures.get(),
        }
    }
}

/// Logs a snapshot as one structured event.
pub fn log_snapshot(snapshot: &MetricsSnapshot) {
    tracing::info!(
        records_fetched = snapshot.records_fetched,
        records_malformed = snapshot.records_malformed,
        batches_committed = snapshot.batches_committed,
        raw_rows_written = snapshot.raw_rows_written,
        curated_rows_written = snapshot.curated_rows_written,
        validation_failures = snapshot.validation_failures,
        store_errors = snapshot.store_errors,
        source_errors = snapshot.source_errors,
        batches_quarantined = snapshot.batches_quarantined,
        quality_violations = snapshot.quality_violations,
        consumer_lag = snapshot.consumer_lag,
        cycle_latency_mean_ms = snapshot.cycle_latency_mean_ms,
        "Pipeline metrics"
    );
}

/// Global metrics registry.
pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::new);

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    &METRICS
}
