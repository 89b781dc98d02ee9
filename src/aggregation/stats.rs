//! Engine counters
//!
//! Lock-free atomic counters updated on every filter change. `snapshot()`
//! returns a plain serializable copy for reporting and tests.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Running counters for one engine
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Filter changes applied (including no-op ones)
    filter_changes: AtomicU64,
    /// Records in Δ across all filter changes
    delta_records: AtomicU64,
    /// Reducer add calls
    reducer_adds: AtomicU64,
    /// Reducer remove calls
    reducer_removes: AtomicU64,
    /// Reports handed to the consistency sink
    consistency_errors: AtomicU64,
    /// Full O(n) reductions (group registration and verification)
    full_recomputes: AtomicU64,
}

impl EngineStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one applied filter change
    pub fn record_filter_change(&self, delta: usize, adds: u64, removes: u64) {
        self.filter_changes.fetch_add(1, Ordering::Relaxed);
        self.delta_records.fetch_add(delta as u64, Ordering::Relaxed);
        self.reducer_adds.fetch_add(adds, Ordering::Relaxed);
        self.reducer_removes.fetch_add(removes, Ordering::Relaxed);
    }

    /// Record one consistency report
    pub fn record_consistency_error(&self) {
        self.consistency_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one full reduction
    pub fn record_full_recompute(&self) {
        self.full_recomputes.fetch_add(1, Ordering::Relaxed);
    }

    /// Total reducer calls (adds + removes)
    pub fn reducer_calls(&self) -> u64 {
        self.reducer_adds.load(Ordering::Relaxed) + self.reducer_removes.load(Ordering::Relaxed)
    }

    /// Get a point-in-time copy
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            filter_changes: self.filter_changes.load(Ordering::Relaxed),
            delta_records: self.delta_records.load(Ordering::Relaxed),
            reducer_adds: self.reducer_adds.load(Ordering::Relaxed),
            reducer_removes: self.reducer_removes.load(Ordering::Relaxed),
            consistency_errors: self.consistency_errors.load(Ordering::Relaxed),
            full_recomputes: self.full_recomputes.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        self.filter_changes.store(0, Ordering::Relaxed);
        self.delta_records.store(0, Ordering::Relaxed);
        self.reducer_adds.store(0, Ordering::Relaxed);
        self.reducer_removes.store(0, Ordering::Relaxed);
        self.consistency_errors.store(0, Ordering::Relaxed);
        self.full_recomputes.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`EngineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStatsSnapshot {
    /// Filter changes applied
    pub filter_changes: u64,
    /// Records in Δ across all filter changes
    pub delta_records: u64,
    /// Reducer add calls
    pub reducer_adds: u64,
    /// Reducer remove calls
    pub reducer_removes: u64,
    /// Consistency reports
    pub consistency_errors: u64,
    /// Full reductions
    pub full_recomputes: u64,
}

impl EngineStatsSnapshot {
    /// Reducer calls per Δ record, 0.0 when nothing changed
    pub fn calls_per_delta_record(&self) -> f64 {
        if self.delta_records == 0 {
            0.0
        } else {
            (self.reducer_adds + self.reducer_removes) as f64 / self.delta_records as f64
        }
    }

    /// Counter differences since an earlier snapshot
    pub fn since(&self, earlier: &EngineStatsSnapshot) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            filter_changes: self.filter_changes.saturating_sub(earlier.filter_changes),
            delta_records: self.delta_records.saturating_sub(earlier.delta_records),
            reducer_adds: self.reducer_adds.saturating_sub(earlier.reducer_adds),
            reducer_removes: self.reducer_removes.saturating_sub(earlier.reducer_removes),
            consistency_errors: self
                .consistency_errors
                .saturating_sub(earlier.consistency_errors),
            full_recomputes: self.full_recomputes.saturating_sub(earlier.full_recomputes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_filter_change() {
        let stats = EngineStats::new();
        stats.record_filter_change(4, 3, 2);
        stats.record_filter_change(0, 0, 0);

        let snap = stats.snapshot();
        assert_eq!(snap.filter_changes, 2);
        assert_eq!(snap.delta_records, 4);
        assert_eq!(stats.reducer_calls(), 5);
        assert!((snap.calls_per_delta_record() - 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_since_and_reset() {
        let stats = EngineStats::new();
        stats.record_full_recompute();
        let before = stats.snapshot();
        stats.record_consistency_error();
        stats.record_filter_change(1, 1, 0);

        let diff = stats.snapshot().since(&before);
        assert_eq!(diff.full_recomputes, 0);
        assert_eq!(diff.consistency_errors, 1);
        assert_eq!(diff.reducer_adds, 1);

        stats.reset();
        assert_eq!(stats.snapshot(), EngineStatsSnapshot::default());
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_string(&EngineStatsSnapshot::default()).unwrap();
        assert!(json.contains("\"reducer_adds\":0"));
    }
}
