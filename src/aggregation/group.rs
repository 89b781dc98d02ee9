//! Groups: one accumulator per key of a dimension, or one for the whole store
//!
//! A keyed group holds a slot for every key in its source dimension's index,
//! including keys whose records are all filtered out (those read as the
//! reducer's initial value). A global group holds a single slot.

use std::collections::BTreeMap;

use crate::error::AccumulatorConsistencyError;
use crate::store::Record;
use crate::types::Value;

use super::reducer::{DistinctCardinality, GroupValue, Reduce, Reducer, RunningStatistic};

/// Slot key used by global groups
pub(crate) static GLOBAL_KEY: Value = Value::Null;

/// Accumulators for one reducer, keyed by group key
#[derive(Debug, Clone)]
pub(crate) struct Table<R: Reduce> {
    reducer: R,
    slots: BTreeMap<Value, R::State>,
}

impl<R: Reduce + Clone> Table<R> {
    fn new<'a>(reducer: R, keys: impl IntoIterator<Item = &'a Value>) -> Self {
        let slots = keys
            .into_iter()
            .map(|k| (k.clone(), reducer.initial()))
            .collect();
        Self { reducer, slots }
    }

    fn empty_like(&self) -> Self {
        Self::new(self.reducer.clone(), self.slots.keys())
    }

    fn add(&mut self, key: &Value, record: &Record) {
        match self.slots.get_mut(key) {
            Some(state) => self.reducer.add(state, record),
            None => {
                let mut state = self.reducer.initial();
                self.reducer.add(&mut state, record);
                self.slots.insert(key.clone(), state);
            }
        }
    }

    fn remove(&mut self, key: &Value, record: &Record) -> Result<(), AccumulatorConsistencyError> {
        match self.slots.get_mut(key) {
            Some(state) => self.reducer.remove(state, record),
            // Nothing was ever added under this key
            None => self.reducer.remove(&mut self.reducer.initial(), record),
        }
    }

    fn value(&self, key: &Value) -> Option<GroupValue>
    where
        R::Summary: Into<GroupValue>,
    {
        self.slots
            .get(key)
            .map(|state| self.reducer.summarize(state).into())
    }

    fn entries(&self) -> Vec<(Value, GroupValue)>
    where
        R::Summary: Into<GroupValue>,
    {
        self.slots
            .iter()
            .map(|(k, state)| (k.clone(), self.reducer.summarize(state).into()))
            .collect()
    }

    fn ranked(&self) -> Vec<(Value, u64)> {
        self.slots
            .iter()
            .map(|(k, state)| (k.clone(), self.reducer.primary_metric(state)))
            .collect()
    }

    fn verify(&self) -> Vec<(Value, AccumulatorConsistencyError)> {
        self.slots
            .iter()
            .filter_map(|(k, state)| self.reducer.verify(state).err().map(|e| (k.clone(), e)))
            .collect()
    }

    fn drift(&self, expected: &Self) -> Vec<Value> {
        let initial = self.reducer.initial();
        let mut keys: Vec<Value> = self
            .slots
            .iter()
            .filter(|(k, state)| {
                let want = expected.slots.get(*k).unwrap_or(&initial);
                !self.reducer.equivalent(state, want)
            })
            .map(|(k, _)| k.clone())
            .collect();
        keys.extend(
            expected
                .slots
                .iter()
                .filter(|(k, state)| {
                    !self.slots.contains_key(*k) && !self.reducer.equivalent(state, &initial)
                })
                .map(|(k, _)| k.clone()),
        );
        keys
    }
}

/// Tables for each reducer kind
#[derive(Debug, Clone)]
pub(crate) enum GroupTable {
    Running(Table<RunningStatistic>),
    Distinct(Table<DistinctCardinality>),
}

/// A reducer bound to a dimension (or to the whole store)
#[derive(Debug, Clone)]
pub struct Group {
    id: usize,
    source: Option<usize>,
    table: GroupTable,
}

impl Group {
    pub(crate) fn new<'a>(
        id: usize,
        source: Option<usize>,
        reducer: Reducer,
        keys: impl IntoIterator<Item = &'a Value>,
    ) -> Self {
        let table = match reducer {
            Reducer::Running(r) => GroupTable::Running(Table::new(r, keys)),
            Reducer::Distinct(r) => GroupTable::Distinct(Table::new(r, keys)),
        };
        Self { id, source, table }
    }

    /// Group id within its engine
    pub fn id(&self) -> usize {
        self.id
    }

    /// Source dimension index, `None` for a global group
    pub fn source(&self) -> Option<usize> {
        self.source
    }

    /// True if the group has no source dimension
    pub fn is_global(&self) -> bool {
        self.source.is_none()
    }

    /// Reducer kind name
    pub fn kind(&self) -> &'static str {
        match &self.table {
            GroupTable::Running(_) => "running",
            GroupTable::Distinct(_) => "distinct",
        }
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        match &self.table {
            GroupTable::Running(t) => t.slots.len(),
            GroupTable::Distinct(t) => t.slots.len(),
        }
    }

    /// True if the group has no slots
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Same reducer and keys, every slot at its initial value
    pub(crate) fn empty_like(&self) -> Self {
        let table = match &self.table {
            GroupTable::Running(t) => GroupTable::Running(t.empty_like()),
            GroupTable::Distinct(t) => GroupTable::Distinct(t.empty_like()),
        };
        Self {
            id: self.id,
            source: self.source,
            table,
        }
    }

    pub(crate) fn add(&mut self, key: &Value, record: &Record) {
        match &mut self.table {
            GroupTable::Running(t) => t.add(key, record),
            GroupTable::Distinct(t) => t.add(key, record),
        }
    }

    pub(crate) fn remove(
        &mut self,
        key: &Value,
        record: &Record,
    ) -> Result<(), AccumulatorConsistencyError> {
        match &mut self.table {
            GroupTable::Running(t) => t.remove(key, record),
            GroupTable::Distinct(t) => t.remove(key, record),
        }
    }

    /// Read-side value of one slot
    pub fn value(&self, key: &Value) -> Option<GroupValue> {
        match &self.table {
            GroupTable::Running(t) => t.value(key),
            GroupTable::Distinct(t) => t.value(key),
        }
    }

    /// All slots in ascending key order
    pub fn entries(&self) -> Vec<(Value, GroupValue)> {
        match &self.table {
            GroupTable::Running(t) => t.entries(),
            GroupTable::Distinct(t) => t.entries(),
        }
    }

    /// `(key, primary metric)` for every slot in ascending key order
    pub fn ranked(&self) -> Vec<(Value, u64)> {
        match &self.table {
            GroupTable::Running(t) => t.ranked(),
            GroupTable::Distinct(t) => t.ranked(),
        }
    }

    /// Slots whose accumulator breaks a reducer invariant
    pub(crate) fn verify(&self) -> Vec<(Value, AccumulatorConsistencyError)> {
        match &self.table {
            GroupTable::Running(t) => t.verify(),
            GroupTable::Distinct(t) => t.verify(),
        }
    }

    /// Keys whose value differs from `expected`
    pub(crate) fn drift(&self, expected: &Group) -> Vec<Value> {
        match (&self.table, &expected.table) {
            (GroupTable::Running(a), GroupTable::Running(b)) => a.drift(b),
            (GroupTable::Distinct(a), GroupTable::Distinct(b)) => a.drift(b),
            _ => self.entries().into_iter().map(|(k, _)| k).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::reducer::Measure;
    use crate::store::{RawRow, RecordStore, Schema};
    use crate::types::FieldType;

    fn store() -> RecordStore {
        let schema = Schema::new()
            .with_field("k", FieldType::Text)
            .with_field("v", FieldType::Float);
        let rows: Vec<RawRow> = [("a", "1.0"), ("a", "2.0"), ("b", "4.0")]
            .iter()
            .map(|(k, v)| {
                RawRow::from([
                    ("k".to_string(), k.to_string()),
                    ("v".to_string(), v.to_string()),
                ])
            })
            .collect();
        RecordStore::ingest(schema, &rows).unwrap()
    }

    fn keys() -> Vec<Value> {
        vec![Value::from("a"), Value::from("b"), Value::from("c")]
    }

    #[test]
    fn test_slots_exist_for_every_key() {
        let reducer = RunningStatistic::new().with_measure(Measure::sum_field("v", "v"));
        let group = Group::new(0, Some(0), reducer.into(), &keys());

        assert_eq!(group.len(), 3);
        assert_eq!(group.value(&Value::from("c")).unwrap().count(), Some(0));
        assert!(group.value(&Value::from("z")).is_none());
    }

    #[test]
    fn test_add_remove_by_key() {
        let store = store();
        let reducer = RunningStatistic::new().with_measure(Measure::sum_field("v", "v"));
        let mut group = Group::new(0, Some(0), reducer.into(), &keys());

        for r in store.all() {
            group.add(r.get("k"), r);
        }
        let a = group.value(&Value::from("a")).unwrap();
        assert_eq!(a.count(), Some(2));
        assert_eq!(a.sum("v"), Some(3.0));

        group.remove(&Value::from("a"), &store.all()[0]).unwrap();
        assert_eq!(group.value(&Value::from("a")).unwrap().sum("v"), Some(2.0));
        assert_eq!(
            group.ranked(),
            vec![(Value::from("a"), 1), (Value::from("b"), 1), (Value::from("c"), 0)]
        );
    }

    #[test]
    fn test_remove_from_unknown_key_reports() {
        let store = store();
        let mut group = Group::new(0, None, Reducer::count(), [&GLOBAL_KEY]);
        assert_eq!(
            group.remove(&Value::from("nope"), &store.all()[0]),
            Err(AccumulatorConsistencyError::NegativeCount)
        );
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn test_drift_against_empty_like() {
        let store = store();
        let mut group = Group::new(1, Some(0), Reducer::count(), &keys());
        let fresh = group.empty_like();
        assert!(group.drift(&fresh).is_empty());

        group.add(&Value::from("b"), &store.all()[2]);
        assert_eq!(group.drift(&fresh), vec![Value::from("b")]);
    }

    #[test]
    fn test_distinct_group_verify() {
        let store = store();
        let reducer = DistinctCardinality::by_field("k");
        let mut group = Group::new(0, None, reducer.into(), [&GLOBAL_KEY]);
        for r in store.all() {
            group.add(&GLOBAL_KEY, r);
        }
        assert_eq!(group.value(&GLOBAL_KEY).unwrap().live_count(), Some(2));
        assert!(group.verify().is_empty());
        assert_eq!(group.kind(), "distinct");
    }
}
