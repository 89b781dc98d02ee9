//! Reducers: the initial/add/remove triad applied per group key
//!
//! A reducer owns no mutable state of its own. Everything it knows about a
//! group slot lives in the accumulator handed to it, so a slot's value is
//! determined by the multiset of records folded in, regardless of the order
//! adds and removes arrived in.
//!
//! The set of reducers is closed: [`Reducer`] is either a
//! [`RunningStatistic`] or a [`DistinctCardinality`]. Both implement
//! [`Reduce`], which is what groups are generic over.

pub mod distinct;
pub mod running;

pub use distinct::{DistinctCardinality, DistinctState, DistinctSummary, ParentAccessor};
pub use running::{
    DerivedExpr, DerivedStat, Measure, MeasureFn, MeasureKind, Operand, RunningState,
    RunningStatistic, RunningSummary,
};

use std::fmt;

use serde::Serialize;

use crate::error::AccumulatorConsistencyError;
use crate::store::Record;

/// Incremental reduction over records
pub trait Reduce: Send + Sync {
    /// Per-key accumulator
    type State: Clone + fmt::Debug + Send + Sync;

    /// Read-side value derived from an accumulator
    type Summary: Clone + fmt::Debug + Serialize;

    /// Accumulator of an empty slot
    fn initial(&self) -> Self::State;

    /// Fold a record in
    fn add(&self, state: &mut Self::State, record: &Record);

    /// Fold a record out
    ///
    /// On error the state is left exactly as it was.
    fn remove(
        &self,
        state: &mut Self::State,
        record: &Record,
    ) -> Result<(), AccumulatorConsistencyError>;

    /// Build the read-side value
    fn summarize(&self, state: &Self::State) -> Self::Summary;

    /// Metric used to rank group entries
    fn primary_metric(&self, state: &Self::State) -> u64;

    /// Check internal invariants of an accumulator
    fn verify(&self, _state: &Self::State) -> Result<(), AccumulatorConsistencyError> {
        Ok(())
    }

    /// Whether two accumulators hold the same value, allowing float rounding
    fn equivalent(&self, a: &Self::State, b: &Self::State) -> bool;
}

/// Reducer choice for a group
#[derive(Debug, Clone)]
pub enum Reducer {
    /// Count, sums and derived statistics
    Running(RunningStatistic),
    /// Distinct parent count
    Distinct(DistinctCardinality),
}

impl Reducer {
    /// Plain record count
    pub fn count() -> Self {
        Reducer::Running(RunningStatistic::new())
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Reducer::Running(_) => "running",
            Reducer::Distinct(_) => "distinct",
        }
    }
}

impl From<RunningStatistic> for Reducer {
    fn from(r: RunningStatistic) -> Self {
        Reducer::Running(r)
    }
}

impl From<DistinctCardinality> for Reducer {
    fn from(r: DistinctCardinality) -> Self {
        Reducer::Distinct(r)
    }
}

/// Read-side value of one group slot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GroupValue {
    /// From a running statistic
    Running(RunningSummary),
    /// From a distinct cardinality
    Distinct(DistinctSummary),
}

impl GroupValue {
    /// Record count, if this is a running value
    pub fn count(&self) -> Option<u64> {
        match self {
            GroupValue::Running(s) => Some(s.count),
            GroupValue::Distinct(_) => None,
        }
    }

    /// Distinct parent count, if this is a distinct value
    pub fn live_count(&self) -> Option<u64> {
        match self {
            GroupValue::Running(_) => None,
            GroupValue::Distinct(s) => Some(s.live_count),
        }
    }

    /// Running summary, if any
    pub fn as_running(&self) -> Option<&RunningSummary> {
        match self {
            GroupValue::Running(s) => Some(s),
            GroupValue::Distinct(_) => None,
        }
    }

    /// Sum of a measure, if this is a running value with that measure
    pub fn sum(&self, measure: &str) -> Option<f64> {
        self.as_running().and_then(|s| s.sum(measure))
    }

    /// Derived statistic, if defined
    pub fn derived(&self, stat: &str) -> Option<f64> {
        self.as_running().and_then(|s| s.derived(stat))
    }
}

impl From<RunningSummary> for GroupValue {
    fn from(s: RunningSummary) -> Self {
        GroupValue::Running(s)
    }
}

impl From<DistinctSummary> for GroupValue {
    fn from(s: DistinctSummary) -> Self {
        GroupValue::Distinct(s)
    }
}
