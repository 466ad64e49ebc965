use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Significant figures kept by each latency histogram.
const HISTOGRAM_PRECISION: u8 = 3;

/// Per-store operation latencies and handle lifecycle counters.
pub struct Metrics {
    operation_latencies: Mutex<HashMap<&'static str, Histogram<u64>>>,
    throughput: AtomicU64,
    syncs: AtomicU64,
    snapshots_opened: AtomicU64,
    snapshots_released: AtomicU64,
    batches_committed: AtomicU64,
    batches_discarded: AtomicU64,
    cursors_opened: AtomicU64,
    cursors_released: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            operation_latencies: Mutex::new(HashMap::new()),
            throughput: AtomicU64::new(0),
            syncs: AtomicU64::new(0),
            snapshots_opened: AtomicU64::new(0),
            snapshots_released: AtomicU64::new(0),
            batches_committed: AtomicU64::new(0),
            batches_discarded: AtomicU64::new(0),
            cursors_opened: AtomicU64::new(0),
            cursors_released: AtomicU64::new(0),
        }
    }

    pub fn record_latency(&self, operation: &'static str, duration: Duration) {
        let mut latencies = self.operation_latencies.lock();
        if !latencies.contains_key(operation) {
            match Histogram::<u64>::new(HISTOGRAM_PRECISION) {
                Ok(histogram) => {
                    latencies.insert(operation, histogram);
                }
                Err(e) => {
                    tracing::warn!("Cannot track latency of {}: {}", operation, e);
                    return;
                }
            }
        }
        if let Some(histogram) = latencies.get_mut(operation) {
            histogram.saturating_record(duration.as_micros() as u64);
        }
    }

    pub fn increment_throughput(&self) {
        self.throughput.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_syncs(&self) {
        self.syncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot_opened(&self) {
        self.snapshots_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot_released(&self) {
        self.snapshots_released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batch_committed(&self) {
        self.batches_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batch_discarded(&self) {
        self.batches_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cursor_opened(&self) {
        self.cursors_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cursor_released(&self) {
        self.cursors_released.fetch_add(1, Ordering::Relaxed);
    }

    /// (p50, p95, p99) latency of `operation` in microseconds.
    pub fn get_percentiles(&self, operation: &str) -> (f64, f64, f64) {
        let latencies = self.operation_latencies.lock();
        latencies
            .get(operation)
            .map(percentiles)
            .unwrap_or((0.0, 0.0, 0.0))
    }

    pub fn get_throughput(&self) -> u64 {
        self.throughput.load(Ordering::Relaxed)
    }

    pub fn report(&self) -> MetricsReport {
        let operation_latencies = self
            .operation_latencies
            .lock()
            .iter()
            .map(|(op, histogram)| (op.to_string(), percentiles(histogram)))
            .collect();

        MetricsReport {
            throughput: self.throughput.load(Ordering::Relaxed),
            syncs: self.syncs.load(Ordering::Relaxed),
            snapshots_opened: self.snapshots_opened.load(Ordering::Relaxed),
            snapshots_released: self.snapshots_released.load(Ordering::Relaxed),
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            batches_discarded: self.batches_discarded.load(Ordering::Relaxed),
            cursors_opened: self.cursors_opened.load(Ordering::Relaxed),
            cursors_released: self.cursors_released.load(Ordering::Relaxed),
            operation_latencies,
        }
    }
}

fn percentiles(histogram: &Histogram<u64>) -> (f64, f64, f64) {
    (
        histogram.value_at_quantile(0.50) as f64,
        histogram.value_at_quantile(0.95) as f64,
        histogram.value_at_quantile(0.99) as f64,
    )
}

#[derive(Debug, Clone)]
pub struct MetricsReport {
    pub throughput: u64,
    pub syncs: u64,
    pub snapshots_opened: u64,
    pub snapshots_released: u64,
    pub batches_committed: u64,
    pub batches_discarded: u64,
    pub cursors_opened: u64,
    pub cursors_released: u64,
    pub operation_latencies: HashMap<String, (f64, f64, f64)>, // (p50, p95, p99)
}

impl MetricsReport {
    /// Snapshots and cursors handed out but not yet released.
    pub fn outstanding_handles(&self) -> u64 {
        self.snapshots_opened.saturating_sub(self.snapshots_released)
            + self.cursors_opened.saturating_sub(self.cursors_released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        assert_eq!(metrics.get_throughput(), 0);
        assert_eq!(metrics.report().outstanding_handles(), 0);
    }

    #[test]
    fn test_latency_recording() {
        let metrics = Metrics::new();

        metrics.record_latency("put", Duration::from_micros(100));
        metrics.record_latency("put", Duration::from_micros(200));
        metrics.record_latency("put", Duration::from_micros(150));

        let (p50, p95, p99) = metrics.get_percentiles("put");
        assert!(p50 > 0.0);
        assert!(p50 <= p95);
        assert!(p95 <= p99);
    }

    #[test]
    fn test_percentile_calculation() {
        let metrics = Metrics::new();

        for i in 1..=100 {
            metrics.record_latency("get", Duration::from_micros(i * 10));
        }

        let (p50, p95, p99) = metrics.get_percentiles("get");
        assert!(p50 >= 400.0 && p50 <= 600.0, "p50 = {}", p50);
        assert!(p95 >= 900.0 && p95 <= 1000.0, "p95 = {}", p95);
        assert!(p99 >= 980.0 && p99 <= 1010.0, "p99 = {}", p99);
    }

    #[test]
    fn test_get_percentiles_nonexistent_operation() {
        let metrics = Metrics::new();
        assert_eq!(metrics.get_percentiles("nonexistent"), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_lifecycle_counters() {
        let metrics = Metrics::new();

        metrics.snapshot_opened();
        metrics.snapshot_opened();
        metrics.snapshot_released();
        metrics.cursor_opened();
        metrics.cursor_released();
        metrics.batch_committed();
        metrics.batch_discarded();
        metrics.increment_syncs();

        let report = metrics.report();
        assert_eq!(report.snapshots_opened, 2);
        assert_eq!(report.cursors_released, 1);
        assert_eq!(report.batches_committed, 1);
        assert_eq!(report.batches_discarded, 1);
        assert_eq!(report.syncs, 1);
        assert_eq!(report.outstanding_handles(), 1);
    }

    #[test]
    fn test_metrics_report() {
        let metrics = Metrics::new();

        metrics.record_latency("put", Duration::from_micros(100));
        metrics.record_latency("get", Duration::from_micros(50));
        metrics.record_latency("scan", Duration::from_micros(500));
        metrics.increment_throughput();
        metrics.increment_throughput();

        let report = metrics.report();
        assert_eq!(report.throughput, 2);
        assert_eq!(report.operation_latencies.len(), 3);
        assert!(report.operation_latencies.contains_key("scan"));
    }
}
