//! Prometheus metrics for the aggregation engine
//!
//! Counters for filter changes, reducer fan-out and consistency reports,
//! plus a latency histogram for the filter application step.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram, CounterVec, Encoder, Gauge,
    Histogram, TextEncoder,
};

lazy_static! {
    // === Filter Counters ===

    /// Total filter changes applied
    pub static ref FILTER_CHANGES_TOTAL: CounterVec = register_counter_vec!(
        "crossagg_filter_changes_total",
        "Total filter changes applied",
        &["dimension"]
    ).unwrap();

    /// Total reducer calls triggered by filter changes
    pub static ref REDUCER_CALLS_TOTAL: CounterVec = register_counter_vec!(
        "crossagg_reducer_calls_total",
        "Total reducer add/remove calls",
        &["op"]
    ).unwrap();

    // === Latency Histograms ===

    /// Filter application duration
    pub static ref FILTER_APPLY_DURATION: Histogram = register_histogram!(
        "crossagg_filter_apply_seconds",
        "Filter application latency in seconds",
        vec![0.00001, 0.0001, 0.001, 0.01, 0.1, 1.0]
    ).unwrap();

    // === Resource Gauges ===

    /// Records held by the most recently built engine
    pub static ref RECORDS: Gauge = register_gauge!(
        "crossagg_records",
        "Number of records in the engine's store"
    ).unwrap();

    // === Error Counters ===

    /// Accumulator consistency reports
    pub static ref CONSISTENCY_ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "crossagg_consistency_errors_total",
        "Total accumulator consistency errors by kind",
        &["kind"]
    ).unwrap();
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record one applied filter change
#[inline]
pub fn record_filter_change(dimension: &str, duration_secs: f64, adds: u64, removes: u64) {
    FILTER_CHANGES_TOTAL.with_label_values(&[dimension]).inc();
    FILTER_APPLY_DURATION.observe(duration_secs);
    REDUCER_CALLS_TOTAL
        .with_label_values(&["add"])
        .inc_by(adds as f64);
    REDUCER_CALLS_TOTAL
        .with_label_values(&["remove"])
        .inc_by(removes as f64);
}

/// Record a consistency report
#[inline]
pub fn record_consistency_error(kind: &str) {
    CONSISTENCY_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

/// Update the record count gauge
#[inline]
pub fn update_records(count: usize) {
    RECORDS.set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_filter_change() {
        record_filter_change("year", 0.0005, 3, 1);
        let metrics = gather_metrics().expect("Failed to gather metrics");
        assert!(metrics.contains("crossagg_filter_changes_total"));
        assert!(metrics.contains("crossagg_reducer_calls_total"));
    }

    #[test]
    fn test_record_consistency_error() {
        let before = CONSISTENCY_ERRORS_TOTAL
            .with_label_values(&["test_kind"])
            .get();
        record_consistency_error("test_kind");
        let after = CONSISTENCY_ERRORS_TOTAL
            .with_label_values(&["test_kind"])
            .get();
        assert_eq!(after - before, 1.0);
    }

    #[test]
    fn test_update_records() {
        update_records(12);
        assert!(gather_metrics().unwrap().contains("crossagg_records"));
    }
}
