//! Logging setup and the consistency sink
//!
//! Accumulator consistency errors never abort a filter change. They are
//! handed to a [`ConsistencySink`] and the offending reducer step is skipped.
//! The default [`TracingSink`] logs them and bumps a Prometheus counter;
//! [`RecordingSink`] keeps them in memory for inspection.

use parking_lot::Mutex;
use tracing::warn;

use crate::config::MonitoringSection;
use crate::error::AccumulatorConsistencyError;
use crate::metrics;
use crate::types::Value;

/// Install a global `tracing` subscriber
///
/// `RUST_LOG` takes precedence over the configured level. Calling this more
/// than once, or after another subscriber was installed, is harmless.
pub fn init_logging(config: &MonitoringSection) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// One inconsistency with where it happened
#[derive(Debug, Clone, PartialEq)]
pub struct ConsistencyReport {
    /// Group id, if the error arose inside a group
    pub group: Option<usize>,
    /// Group key, if known
    pub key: Option<Value>,
    /// What went wrong
    pub error: AccumulatorConsistencyError,
}

impl ConsistencyReport {
    /// Report without location
    pub fn new(error: AccumulatorConsistencyError) -> Self {
        Self {
            group: None,
            key: None,
            error,
        }
    }

    /// Report located in a group slot
    pub fn in_group(group: usize, key: &Value, error: AccumulatorConsistencyError) -> Self {
        Self {
            group: Some(group),
            key: Some(key.clone()),
            error,
        }
    }
}

/// Receiver for accumulator consistency reports
pub trait ConsistencySink: Send + Sync {
    /// Report one inconsistency; must not panic
    fn report(&self, report: &ConsistencyReport);
}

/// Sink that logs with `warn!` and counts in Prometheus
#[derive(Debug, Clone)]
pub struct TracingSink {
    metrics_enabled: bool,
}

impl TracingSink {
    /// Create a sink
    pub fn new(metrics_enabled: bool) -> Self {
        Self { metrics_enabled }
    }
}

impl Default for TracingSink {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConsistencySink for TracingSink {
    fn report(&self, report: &ConsistencyReport) {
        warn!(
            group = ?report.group,
            key = ?report.key,
            kind = report.error.kind(),
            error = %report.error,
            "Accumulator inconsistency"
        );
        if self.metrics_enabled {
            metrics::record_consistency_error(report.error.kind());
        }
    }
}

/// Sink that keeps every report in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<ConsistencyReport>>,
}

impl RecordingSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all reports so far
    pub fn reports(&self) -> Vec<ConsistencyReport> {
        self.reports.lock().clone()
    }

    /// Number of reports so far
    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    /// True if nothing was reported
    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }

    /// Drop all reports
    pub fn clear(&self) {
        self.reports.lock().clear();
    }
}

impl ConsistencySink for RecordingSink {
    fn report(&self, report: &ConsistencyReport) {
        self.reports.lock().push(report.clone());
    }
}
