//! Running numeric statistics
//!
//! The accumulator holds a record count plus one running sum per measure.
//! Add and remove are exact inverses on those sums. Averages and ratios are
//! never stored: they are evaluated from the sums when a summary is read,
//! so they cannot drift away from the sums they are built on.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::AccumulatorConsistencyError;
use crate::store::Record;

use super::Reduce;

/// Numeric contribution of one record to a measure
pub type MeasureFn = Arc<dyn Fn(&Record) -> f64 + Send + Sync>;

// ============================================================================
// Measures
// ============================================================================

/// How a contribution is folded into its running sum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MeasureKind {
    /// Signed sum
    Sum,
    /// Sum of absolute values
    AbsSum,
}

/// A named running sum over a per-record value
#[derive(Clone)]
pub struct Measure {
    name: String,
    kind: MeasureKind,
    value: MeasureFn,

    /// Source field, for measures read straight from a field
    field: Option<String>,
}

impl Measure {
    /// Signed sum of a computed value
    pub fn sum<F>(name: &str, value: F) -> Self
    where
        F: Fn(&Record) -> f64 + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            kind: MeasureKind::Sum,
            value: Arc::new(value),
            field: None,
        }
    }

    /// Sum of absolute values of a computed value
    pub fn abs_sum<F>(name: &str, value: F) -> Self
    where
        F: Fn(&Record) -> f64 + Send + Sync + 'static,
    {
        Self {
            kind: MeasureKind::AbsSum,
            ..Self::sum(name, value)
        }
    }

    /// Signed sum of a numeric field
    pub fn sum_field(name: &str, field: &str) -> Self {
        let source = field.to_string();
        Self {
            field: Some(field.to_string()),
            ..Self::sum(name, move |r| r.f64(&source).unwrap_or(0.0))
        }
    }

    /// Sum of absolute values of a numeric field
    pub fn abs_sum_field(name: &str, field: &str) -> Self {
        Self {
            kind: MeasureKind::AbsSum,
            ..Self::sum_field(name, field)
        }
    }

    /// Measure name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Measure kind
    pub fn kind(&self) -> MeasureKind {
        self.kind
    }

    /// Field the measure reads, `None` for computed measures
    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    /// Value added to the running sum for one record
    ///
    /// Non-finite values contribute 0.0 so add and remove stay inverses.
    pub fn contribution(&self, record: &Record) -> f64 {
        let v = (self.value)(record);
        if !v.is_finite() {
            return 0.0;
        }
        match self.kind {
            MeasureKind::Sum => v,
            MeasureKind::AbsSum => v.abs(),
        }
    }
}

impl fmt::Debug for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Measure")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("field", &self.field)
            .finish()
    }
}

// ============================================================================
// Derived statistics
// ============================================================================

/// Input to a derived statistic
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Operand {
    /// Record count
    Count,
    /// Running sum of a measure
    Sum(String),
    /// Sum of a measure divided by count
    Mean(String),
}

impl Operand {
    /// Running sum operand
    pub fn sum(measure: &str) -> Self {
        Operand::Sum(measure.to_string())
    }

    /// Mean operand
    pub fn mean(measure: &str) -> Self {
        Operand::Mean(measure.to_string())
    }
}

/// Expression of a derived statistic
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DerivedExpr {
    /// Mean of a measure
    Mean {
        /// Measure name
        measure: String,
    },
    /// `numerator / denominator * scale`
    Ratio {
        /// Numerator operand
        numerator: Operand,
        /// Denominator operand
        denominator: Operand,
        /// Multiplier applied to the quotient (100.0 for percentages)
        scale: f64,
    },
}

/// A named statistic computed from the running sums at read time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedStat {
    /// Output name
    pub name: String,
    /// Expression
    pub expr: DerivedExpr,
}

impl DerivedStat {
    /// Mean of a measure
    pub fn mean(name: &str, measure: &str) -> Self {
        Self {
            name: name.to_string(),
            expr: DerivedExpr::Mean {
                measure: measure.to_string(),
            },
        }
    }

    /// Scaled ratio of two operands
    pub fn ratio(name: &str, numerator: Operand, denominator: Operand, scale: f64) -> Self {
        Self {
            name: name.to_string(),
            expr: DerivedExpr::Ratio {
                numerator,
                denominator,
                scale,
            },
        }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Accumulator: record count plus one sum per measure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunningState {
    /// Records currently folded in
    pub count: u64,
    /// Running sums, parallel to the reducer's measures
    pub sums: Vec<f64>,
}

/// Read-side view of a running accumulator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunningSummary {
    /// Records currently folded in
    pub count: u64,
    /// `(measure, sum)` pairs in declaration order
    pub sums: Vec<(String, f64)>,
    /// `(stat, value)` pairs; `None` where a division by zero occurred
    pub derived: Vec<(String, Option<f64>)>,
}

impl RunningSummary {
    /// Sum of a measure by name
    pub fn sum(&self, measure: &str) -> Option<f64> {
        self.sums
            .iter()
            .find(|(name, _)| name == measure)
            .map(|(_, v)| *v)
    }

    /// Derived statistic by name; `None` if unknown or undefined
    pub fn derived(&self, stat: &str) -> Option<f64> {
        self.derived
            .iter()
            .find(|(name, _)| name == stat)
            .and_then(|(_, v)| *v)
    }
}

/// Count, running sums and lazily derived statistics
#[derive(Debug, Clone, Default)]
pub struct RunningStatistic {
    measures: Vec<Measure>,
    derived: Vec<DerivedStat>,
}

impl RunningStatistic {
    /// Reducer that only counts records
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a measure
    pub fn with_measure(mut self, measure: Measure) -> Self {
        self.measures.push(measure);
        self
    }

    /// Add a derived statistic
    pub fn with_derived(mut self, stat: DerivedStat) -> Self {
        self.derived.push(stat);
        self
    }

    /// Declared measures
    pub fn measures(&self) -> &[Measure] {
        &self.measures
    }

    /// Declared derived statistics
    pub fn derived(&self) -> &[DerivedStat] {
        &self.derived
    }

    fn measure_index(&self, name: &str) -> Option<usize> {
        self.measures.iter().position(|m| m.name == name)
    }

    fn operand(&self, state: &RunningState, operand: &Operand) -> Option<f64> {
        match operand {
            Operand::Count => Some(state.count as f64),
            Operand::Sum(m) => self.measure_index(m).map(|i| state.sums[i]),
            Operand::Mean(m) => {
                let sum = self.measure_index(m).map(|i| state.sums[i])?;
                divide(sum, state.count as f64)
            }
        }
    }

    /// Evaluate one derived statistic against a state
    pub fn evaluate(&self, state: &RunningState, stat: &DerivedStat) -> Option<f64> {
        match &stat.expr {
            DerivedExpr::Mean { measure } => self.operand(state, &Operand::Mean(measure.clone())),
            DerivedExpr::Ratio {
                numerator,
                denominator,
                scale,
            } => {
                let n = self.operand(state, numerator)?;
                let d = self.operand(state, denominator)?;
                divide(n, d).map(|q| q * scale)
            }
        }
    }
}

fn divide(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 {
        None
    } else {
        Some(numerator / denominator)
    }
}

impl Reduce for RunningStatistic {
    type State = RunningState;
    type Summary = RunningSummary;

    fn initial(&self) -> RunningState {
        RunningState {
            count: 0,
            sums: vec![0.0; self.measures.len()],
        }
    }

    fn add(&self, state: &mut RunningState, record: &Record) {
        state.count += 1;
        for (sum, measure) in state.sums.iter_mut().zip(&self.measures) {
            *sum += measure.contribution(record);
        }
    }

    fn remove(
        &self,
        state: &mut RunningState,
        record: &Record,
    ) -> Result<(), AccumulatorConsistencyError> {
        if state.count == 0 {
            return Err(AccumulatorConsistencyError::NegativeCount);
        }

        state.count -= 1;
        if state.count == 0 {
            // Empty slot: drop accumulated rounding residue
            state.sums.iter_mut().for_each(|s| *s = 0.0);
        } else {
            for (sum, measure) in state.sums.iter_mut().zip(&self.measures) {
                *sum -= measure.contribution(record);
            }
        }
        Ok(())
    }

    fn summarize(&self, state: &RunningState) -> RunningSummary {
        RunningSummary {
            count: state.count,
            sums: self
                .measures
                .iter()
                .map(|m| m.name.clone())
                .zip(state.sums.iter().copied())
                .collect(),
            derived: self
                .derived
                .iter()
                .map(|d| (d.name.clone(), self.evaluate(state, d)))
                .collect(),
        }
    }

    fn primary_metric(&self, state: &RunningState) -> u64 {
        state.count
    }

    fn equivalent(&self, a: &RunningState, b: &RunningState) -> bool {
        a.count == b.count
            && a.sums.len() == b.sums.len()
            && a.sums.iter().zip(&b.sums).all(|(x, y)| approx_eq(*x, *y))
    }
}

/// Float comparison tolerant of add/remove rounding
pub(crate) fn approx_eq(a: f64, b: f64) -> bool {
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= 1e-9 * scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{RawRow, RecordStore, Schema};
    use crate::types::FieldType;

    fn quotes() -> RecordStore {
        let schema = Schema::new()
            .with_field("open", FieldType::Float)
            .with_field("close", FieldType::Float);
        let rows: Vec<RawRow> = [(10.0, 12.0), (12.0, 9.0), (9.0, 9.5)]
            .iter()
            .map(|(o, c)| {
                RawRow::from([
                    ("open".to_string(), o.to_string()),
                    ("close".to_string(), c.to_string()),
                ])
            })
            .collect();
        RecordStore::ingest(schema, &rows).unwrap()
    }

    fn performance() -> RunningStatistic {
        let gain = |r: &Record| r.f64("close").unwrap_or(0.0) - r.f64("open").unwrap_or(0.0);
        RunningStatistic::new()
            .with_measure(Measure::sum("abs_gain", gain))
            .with_measure(Measure::abs_sum("fluctuation", gain))
            .with_measure(Measure::sum("index", |r| {
                (r.f64("open").unwrap_or(0.0) + r.f64("close").unwrap_or(0.0)) / 2.0
            }))
            .with_derived(DerivedStat::mean("avg_index", "index"))
            .with_derived(DerivedStat::ratio(
                "percentage_gain",
                Operand::sum("abs_gain"),
                Operand::mean("index"),
                100.0,
            ))
    }

    #[test]
    fn test_add_accumulates_sums() {
        let store = quotes();
        let reducer = performance();
        let mut state = reducer.initial();
        for r in store.all() {
            reducer.add(&mut state, r);
        }

        let summary = reducer.summarize(&state);
        assert_eq!(summary.count, 3);
        assert!(approx_eq(summary.sum("abs_gain").unwrap(), -0.5));
        assert!(approx_eq(summary.sum("fluctuation").unwrap(), 5.5));
        assert!(approx_eq(summary.sum("index").unwrap(), 30.75));
        assert!(approx_eq(summary.derived("avg_index").unwrap(), 10.25));
        assert!(approx_eq(
            summary.derived("percentage_gain").unwrap(),
            -0.5 / 10.25 * 100.0
        ));
    }

    #[test]
    fn test_remove_inverts_add() {
        let store = quotes();
        let reducer = performance();
        let mut state = reducer.initial();
        reducer.add(&mut state, &store.all()[0]);
        let before = state.clone();

        reducer.add(&mut state, &store.all()[1]);
        reducer.remove(&mut state, &store.all()[1]).unwrap();
        assert!(reducer.equivalent(&state, &before));
    }

    #[test]
    fn test_empty_state_reads_undefined_ratios() {
        let reducer = performance();
        let summary = reducer.summarize(&reducer.initial());
        assert_eq!(summary.count, 0);
        assert_eq!(summary.derived("avg_index"), None);
        assert_eq!(summary.derived("percentage_gain"), None);
        assert_eq!(summary.derived("no_such_stat"), None);
    }

    #[test]
    fn test_remove_past_zero_is_rejected() {
        let store = quotes();
        let reducer = performance();
        let mut state = reducer.initial();
        assert_eq!(
            reducer.remove(&mut state, &store.all()[0]),
            Err(AccumulatorConsistencyError::NegativeCount)
        );
        assert_eq!(state, reducer.initial());
    }

    #[test]
    fn test_last_remove_clears_residue() {
        let store = quotes();
        let reducer = performance();
        let mut state = reducer.initial();
        for r in store.all() {
            reducer.add(&mut state, r);
        }
        for r in store.all().iter().rev() {
            reducer.remove(&mut state, r).unwrap();
        }
        assert_eq!(state, reducer.initial());
    }

    #[test]
    fn test_null_and_non_finite_contribute_zero() {
        let schema = Schema::new()
            .with_field("k", FieldType::Integer)
            .with_optional("v", FieldType::Float);
        let rows = vec![RawRow::from([("k".to_string(), "1".to_string())])];
        let store = RecordStore::ingest(schema, &rows).unwrap();

        let reducer = RunningStatistic::new()
            .with_measure(Measure::sum_field("v", "v"))
            .with_measure(Measure::sum("inf", |_| f64::INFINITY));
        let mut state = reducer.initial();
        reducer.add(&mut state, &store.all()[0]);
        assert_eq!(state.count, 1);
        assert_eq!(state.sums, vec![0.0, 0.0]);
    }

    #[test]
    fn test_field_measures_record_their_source() {
        assert_eq!(Measure::sum_field("total", "close").field(), Some("close"));
        let abs = Measure::abs_sum_field("swing", "gain");
        assert_eq!(abs.field(), Some("gain"));
        assert_eq!(abs.kind(), MeasureKind::AbsSum);
        assert_eq!(Measure::sum("one", |_| 1.0).field(), None);
    }

    #[test]
    fn test_count_ratio_operand() {
        let store = quotes();
        let reducer = RunningStatistic::new()
            .with_measure(Measure::sum_field("open", "open"))
            .with_derived(DerivedStat::ratio(
                "open_per_day",
                Operand::sum("open"),
                Operand::Count,
                1.0,
            ));
        let mut state = reducer.initial();
        reducer.add(&mut state, &store.all()[0]);
        reducer.add(&mut state, &store.all()[1]);
        assert!(approx_eq(
            reducer.summarize(&state).derived("open_per_day").unwrap(),
            11.0
        ));
    }
}
