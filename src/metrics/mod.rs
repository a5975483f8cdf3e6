//! Metrics for the receipt gateway
//!
//! In-process counters, gauges and latency histograms, rendered as JSON or
//! Prometheus text by the `/metrics` endpoint.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Metrics registry shared across the service
pub struct MetricsRegistry {
    counters: RwLock<BTreeMap<String, Arc<AtomicU64>>>,
    gauges: RwLock<BTreeMap<String, Arc<AtomicU64>>>,
    histograms: RwLock<BTreeMap<String, Arc<Histogram>>>,
    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(BTreeMap::new()),
            gauges: RwLock::new(BTreeMap::new()),
            histograms: RwLock::new(BTreeMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Increment a counter
    pub async fn inc_counter(&self, name: &str) {
        self.add_counter(name, 1).await;
    }

    /// Add to a counter
    pub async fn add_counter(&self, name: &str, value: u64) {
        let counters = self.counters.read().await;
        if let Some(counter) = counters.get(name) {
            counter.fetch_add(value, Ordering::Relaxed);
            return;
        }
        drop(counters);

        let mut counters = self.counters.write().await;
        counters
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .fetch_add(value, Ordering::Relaxed);
    }

    /// Set a gauge value
    pub async fn set_gauge(&self, name: &str, value: u64) {
        let gauges = self.gauges.read().await;
        if let Some(gauge) = gauges.get(name) {
            gauge.store(value, Ordering::Relaxed);
            return;
        }
        drop(gauges);

        let mut gauges = self.gauges.write().await;
        gauges
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .store(value, Ordering::Relaxed);
    }

    pub async fn get_counter(&self, name: &str) -> u64 {
        let counters = self.counters.read().await;
        counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub async fn get_gauge(&self, name: &str) -> u64 {
        let gauges = self.gauges.read().await;
        gauges
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Record a histogram observation in milliseconds
    pub async fn observe_histogram(&self, name: &str, value_ms: f64) {
        let histograms = self.histograms.read().await;
        if let Some(histogram) = histograms.get(name) {
            histogram.observe(value_ms);
            return;
        }
        drop(histograms);

        let mut histograms = self.histograms.write().await;
        histograms
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Histogram::default()))
            .observe(value_ms);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Get all metrics as JSON
    pub async fn to_json(&self) -> serde_json::Value {
        let counters = self.counters.read().await;
        let gauges = self.gauges.read().await;
        let histograms = self.histograms.read().await;

        let counter_values: BTreeMap<&str, u64> = counters
            .iter()
            .map(|(k, v)| (k.as_str(), v.load(Ordering::Relaxed)))
            .collect();
        let gauge_values: BTreeMap<&str, u64> = gauges
            .iter()
            .map(|(k, v)| (k.as_str(), v.load(Ordering::Relaxed)))
            .collect();
        let histogram_values: BTreeMap<&str, serde_json::Value> = histograms
            .iter()
            .map(|(k, h)| (k.as_str(), h.to_json()))
            .collect();

        serde_json::json!({
            "uptime_seconds": self.uptime_seconds(),
            "counters": counter_values,
            "gauges": gauge_values,
            "histograms": histogram_values,
        })
    }

    /// Export metrics in Prometheus text format
    pub async fn to_prometheus(&self) -> String {
        let counters = self.counters.read().await;
        let gauges = self.gauges.read().await;
        let histograms = self.histograms.read().await;

        let mut output = String::new();
        let _ = writeln!(output, "# HELP receipts_uptime_seconds Time since service start");
        let _ = writeln!(output, "# TYPE receipts_uptime_seconds gauge");
        let _ = writeln!(output, "receipts_uptime_seconds {}\n", self.uptime_seconds());

        for (name, counter) in counters.iter() {
            let name = prometheus_name(name);
            let _ = writeln!(output, "# TYPE {name} counter");
            let _ = writeln!(output, "{name} {}", counter.load(Ordering::Relaxed));
        }

        for (name, gauge) in gauges.iter() {
            let name = prometheus_name(name);
            let _ = writeln!(output, "# TYPE {name} gauge");
            let _ = writeln!(output, "{name} {}", gauge.load(Ordering::Relaxed));
        }

        for (name, histogram) in histograms.iter() {
            output.push_str(&histogram.to_prometheus(name));
        }

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn prometheus_name(name: &str) -> String {
    name.replace(['.', '-'], "_")
}

/// Fixed-bucket histogram
pub struct Histogram {
    /// Upper bounds of the buckets
    buckets: Vec<f64>,
    counts: Vec<AtomicU64>,
    /// Sum of observations in thousandths
    sum_milli: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(buckets: Vec<f64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            sum_milli: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: f64) {
        self.sum_milli
            .fetch_add((value.max(0.0) * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        if let Some(i) = self.buckets.iter().position(|bound| value <= *bound) {
            self.counts[i].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn sum(&self) -> f64 {
        self.sum_milli.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn to_json(&self) -> serde_json::Value {
        let bucket_counts: Vec<u64> = self
            .counts
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect();

        serde_json::json!({
            "buckets": self.buckets,
            "counts": bucket_counts,
            "sum": self.sum(),
            "count": self.count(),
        })
    }

    pub fn to_prometheus(&self, name: &str) -> String {
        let name = prometheus_name(name);
        let mut output = String::new();
        let _ = writeln!(output, "# TYPE {name} histogram");

        let mut cumulative = 0u64;
        for (bound, count) in self.buckets.iter().zip(&self.counts) {
            cumulative += count.load(Ordering::Relaxed);
            let _ = writeln!(output, "{name}_bucket{{le=\"{bound}\"}} {cumulative}");
        }
        let _ = writeln!(output, "{name}_bucket{{le=\"+Inf\"}} {}", self.count());
        let _ = writeln!(output, "{name}_sum {}", self.sum());
        let _ = writeln!(output, "{name}_count {}", self.count());
        output
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // Latency buckets in milliseconds
        Self::new(vec![
            1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0, 30000.0, 120000.0,
        ])
    }
}

/// Predefined metric names
pub mod metric_names {
    // Write path
    pub const RECEIPTS_INSERTED: &str = "receipts_inserted_total";
    pub const RECEIPTS_DUPLICATE: &str = "receipts_duplicate_total";
    pub const WRITE_RETRIES: &str = "receipt_write_retries_total";
    pub const WRITE_EXHAUSTED: &str = "receipt_write_exhausted_total";
    pub const WRITE_CANCELLED: &str = "receipt_write_cancelled_total";
    pub const DELIVERY_DROPPED: &str = "receipt_delivery_dropped_total";
    pub const WRITES_IN_FLIGHT: &str = "receipt_writes_in_flight";

    // Ingestion
    pub const MESSAGES_REJECTED: &str = "receipt_messages_rejected_total";

    // Queries
    pub const QUERY_REJECTED: &str = "receipt_query_rejected_total";

    // Latency histograms (milliseconds)
    pub const WRITE_LATENCY: &str = "receipt_write_latency_ms";
    pub const QUERY_LATENCY: &str = "receipt_query_latency_ms";
}

/// Time an async operation into a millisecond histogram
pub async fn timed<F, T>(metrics: &MetricsRegistry, metric_name: &str, f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = Instant::now();
    let result = f.await;
    metrics
        .observe_histogram(metric_name, start.elapsed().as_secs_f64() * 1000.0)
        .await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counter() {
        let registry = MetricsRegistry::new();

        registry.inc_counter(metric_names::RECEIPTS_INSERTED).await;
        registry.inc_counter(metric_names::RECEIPTS_INSERTED).await;
        registry.add_counter(metric_names::RECEIPTS_INSERTED, 5).await;

        assert_eq!(registry.get_counter(metric_names::RECEIPTS_INSERTED).await, 7);
        assert_eq!(registry.get_counter("unknown").await, 0);
    }

    #[tokio::test]
    async fn test_gauge() {
        let registry = MetricsRegistry::new();

        registry.set_gauge(metric_names::WRITES_IN_FLIGHT, 3).await;
        assert_eq!(registry.get_gauge(metric_names::WRITES_IN_FLIGHT).await, 3);

        registry.set_gauge(metric_names::WRITES_IN_FLIGHT, 0).await;
        assert_eq!(registry.get_gauge(metric_names::WRITES_IN_FLIGHT).await, 0);
    }

    #[tokio::test]
    async fn test_histogram_json() {
        let registry = MetricsRegistry::new();

        registry.observe_histogram(metric_names::QUERY_LATENCY, 0.5).await;
        registry.observe_histogram(metric_names::QUERY_LATENCY, 40.0).await;
        registry.observe_histogram(metric_names::QUERY_LATENCY, 1e9).await;

        let json = registry.to_json().await;
        let latency = &json["histograms"][metric_names::QUERY_LATENCY];
        assert_eq!(latency["count"], 3);
        assert_eq!(latency["counts"][0], 1);
        assert_eq!(latency["counts"][4], 1);
    }

    #[tokio::test]
    async fn test_prometheus_format() {
        let registry = MetricsRegistry::new();

        registry.inc_counter(metric_names::RECEIPTS_DUPLICATE).await;
        registry.set_gauge(metric_names::WRITES_IN_FLIGHT, 42).await;
        registry.observe_histogram(metric_names::WRITE_LATENCY, 3.0).await;

        let text = registry.to_prometheus().await;
        assert!(text.contains("receipts_duplicate_total 1"));
        assert!(text.contains("receipt_writes_in_flight 42"));
        assert!(text.contains("receipt_write_latency_ms_bucket{le=\"5\"} 1"));
        assert!(text.contains("receipt_write_latency_ms_count 1"));
    }

    #[tokio::test]
    async fn test_timed_records_observation() {
        let registry = MetricsRegistry::new();
        let value = timed(&registry, metric_names::QUERY_LATENCY, async { 7 }).await;
        assert_eq!(value, 7);

        let json = registry.to_json().await;
        assert_eq!(json["histograms"][metric_names::QUERY_LATENCY]["count"], 1);
    }
}
