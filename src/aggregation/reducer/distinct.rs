//! Distinct parent cardinality over a many-to-one relationship
//!
//! Each child record names one parent. The accumulator keeps a reference
//! count per parent and the number of parents whose count is positive:
//!
//! ```text
//!   add A1 (P1)   refs {P1: 1}          live 1   0 -> 1, live++
//!   add A2 (P1)   refs {P1: 2}          live 1
//!   add A3 (P2)   refs {P1: 2, P2: 1}   live 2
//!   remove A1     refs {P1: 1, P2: 1}   live 2
//!   remove A2     refs {P2: 1}          live 1   1 -> 0, entry dropped
//! ```
//!
//! Entries are removed at zero, so memory is bounded by the parents that
//! currently have at least one active child.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::AccumulatorConsistencyError;
use crate::store::Record;
use crate::types::Value;

use super::Reduce;

/// How to read a child's parent id
#[derive(Clone)]
pub enum ParentAccessor {
    /// Value of a record field
    Field(String),
    /// Computed from the record
    Computed(Arc<dyn Fn(&Record) -> Value + Send + Sync>),
}

impl ParentAccessor {
    /// Parent id of a record
    pub fn parent(&self, record: &Record) -> Value {
        match self {
            ParentAccessor::Field(name) => record.get(name).clone(),
            ParentAccessor::Computed(f) => f(record),
        }
    }
}

impl fmt::Debug for ParentAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParentAccessor::Field(name) => f.debug_tuple("Field").field(name).finish(),
            ParentAccessor::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Ref-counted distinct parents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistinctState {
    live_count: u64,
    ref_counts: HashMap<Value, u32>,
}

impl DistinctState {
    /// Parents with at least one live child
    pub fn live_count(&self) -> u64 {
        self.live_count
    }

    /// Live children of a parent (0 if absent)
    pub fn ref_count(&self, parent: &Value) -> u32 {
        self.ref_counts.get(parent).copied().unwrap_or(0)
    }

    /// Parents currently tracked
    pub fn parents(&self) -> impl Iterator<Item = &Value> {
        self.ref_counts.keys()
    }

    /// Check `live_count == |{p : ref_counts[p] > 0}|`
    pub fn verify(&self) -> Result<(), AccumulatorConsistencyError> {
        let positive = self.ref_counts.values().filter(|&&c| c > 0).count() as u64;
        if positive != self.live_count {
            return Err(AccumulatorConsistencyError::LiveCountMismatch {
                live_count: self.live_count,
                positive_parents: positive,
            });
        }
        Ok(())
    }

    fn increment(&mut self, parent: Value) {
        let count = self.ref_counts.entry(parent).or_insert(0);
        *count += 1;
        if *count == 1 {
            self.live_count += 1;
        }
    }

    fn decrement(&mut self, parent: &Value) -> Result<(), AccumulatorConsistencyError> {
        // Entries never sit at zero, so a missing entry is a non-positive count
        let Some(count) = self.ref_counts.get_mut(parent) else {
            return Err(AccumulatorConsistencyError::NonPositiveRefCount {
                parent: parent.clone(),
            });
        };
        *count -= 1;
        if *count == 0 {
            self.ref_counts.remove(parent);
            self.live_count -= 1;
        }
        Ok(())
    }
}

/// Read-side view of a distinct accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DistinctSummary {
    /// Distinct parents with a live child
    pub live_count: u64,
}

/// Count of distinct parents among active children
#[derive(Debug, Clone)]
pub struct DistinctCardinality {
    parent: ParentAccessor,
}

impl DistinctCardinality {
    /// Parents read from a field
    pub fn by_field(field: &str) -> Self {
        Self {
            parent: ParentAccessor::Field(field.to_string()),
        }
    }

    /// Parents computed by a closure
    pub fn by<F>(accessor: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        Self {
            parent: ParentAccessor::Computed(Arc::new(accessor)),
        }
    }

    /// Parent accessor
    pub fn accessor(&self) -> &ParentAccessor {
        &self.parent
    }
}

impl Reduce for DistinctCardinality {
    type State = DistinctState;
    type Summary = DistinctSummary;

    fn initial(&self) -> DistinctState {
        DistinctState::default()
    }

    fn add(&self, state: &mut DistinctState, record: &Record) {
        // Orphans have no parent to count
        let parent = self.parent.parent(record);
        if !parent.is_null() {
            state.increment(parent);
        }
    }

    fn remove(
        &self,
        state: &mut DistinctState,
        record: &Record,
    ) -> Result<(), AccumulatorConsistencyError> {
        let parent = self.parent.parent(record);
        if parent.is_null() {
            return Ok(());
        }
        state.decrement(&parent)
    }

    fn summarize(&self, state: &DistinctState) -> DistinctSummary {
        DistinctSummary {
            live_count: state.live_count,
        }
    }

    fn primary_metric(&self, state: &DistinctState) -> u64 {
        state.live_count
    }

    fn verify(&self, state: &DistinctState) -> Result<(), AccumulatorConsistencyError> {
        state.verify()
    }

    fn equivalent(&self, a: &DistinctState, b: &DistinctState) -> bool {
        a == b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{RawRow, RecordStore, Schema};
    use crate::types::FieldType;

    fn children(parents: &[&str]) -> RecordStore {
        let schema = Schema::new()
            .with_field("child", FieldType::Integer)
            .with_optional("parent", FieldType::Text);
        let rows: Vec<RawRow> = parents
            .iter()
            .enumerate()
            .map(|(i, p)| {
                RawRow::from([
                    ("child".to_string(), i.to_string()),
                    ("parent".to_string(), p.to_string()),
                ])
            })
            .collect();
        RecordStore::ingest(schema, &rows).unwrap()
    }

    #[test]
    fn test_ref_count_transitions() {
        let store = children(&["P1", "P1", "P2"]);
        let (a1, a2, a3) = (&store.all()[0], &store.all()[1], &store.all()[2]);
        let reducer = DistinctCardinality::by_field("parent");
        let mut state = reducer.initial();

        reducer.add(&mut state, a1);
        reducer.add(&mut state, a2);
        reducer.add(&mut state, a3);
        assert_eq!(state.live_count(), 2);

        reducer.remove(&mut state, a1).unwrap();
        assert_eq!(state.live_count(), 2);
        assert_eq!(state.ref_count(&Value::from("P1")), 1);

        reducer.remove(&mut state, a2).unwrap();
        assert_eq!(state.live_count(), 1);
        assert_eq!(state.parents().count(), 1);

        reducer.remove(&mut state, a3).unwrap();
        assert_eq!(state.live_count(), 0);
        assert_eq!(state, reducer.initial());
        state.verify().unwrap();
    }

    #[test]
    fn test_remove_unreferenced_parent_is_noop() {
        let store = children(&["P1", "P2"]);
        let reducer = DistinctCardinality::by_field("parent");
        let mut state = reducer.initial();
        reducer.add(&mut state, &store.all()[0]);
        let before = state.clone();

        let err = reducer.remove(&mut state, &store.all()[1]).unwrap_err();
        assert_eq!(
            err,
            AccumulatorConsistencyError::NonPositiveRefCount {
                parent: Value::from("P2")
            }
        );
        assert_eq!(state, before);
    }

    #[test]
    fn test_null_parent_skipped() {
        let store = children(&["", "P1"]);
        let reducer = DistinctCardinality::by_field("parent");
        let mut state = reducer.initial();
        reducer.add(&mut state, &store.all()[0]);
        assert_eq!(state.live_count(), 0);
        reducer.remove(&mut state, &store.all()[0]).unwrap();
        assert_eq!(state, reducer.initial());
    }

    #[test]
    fn test_computed_accessor() {
        let store = children(&["p1", "P1", "p2"]);
        let reducer = DistinctCardinality::by(|r| {
            Value::from(r.get("parent").as_str().unwrap_or("").to_uppercase())
        });
        let mut state = reducer.initial();
        for r in store.all() {
            reducer.add(&mut state, r);
        }
        assert_eq!(reducer.summarize(&state), DistinctSummary { live_count: 2 });
    }

    #[test]
    fn test_verify_detects_mismatch() {
        let mut state = DistinctState::default();
        state.increment(Value::from(1));
        state.live_count = 3;
        assert!(matches!(
            state.verify(),
            Err(AccumulatorConsistencyError::LiveCountMismatch {
                live_count: 3,
                positive_parents: 1
            })
        ));
    }
}
