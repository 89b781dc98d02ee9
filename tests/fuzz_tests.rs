//! Fuzz Tests for Reducers and the Cross-Filter Engine
//!
//! Uses property-based testing (proptest) to check that incremental
//! maintenance agrees with full reduction under arbitrary record sets,
//! insertion orders and filter sequences.

use std::collections::HashSet;

use proptest::prelude::*;

use crossagg::aggregation::{
    DerivedStat, DistinctCardinality, Measure, Predicate, Reduce, RunningStatistic,
};
use crossagg::store::RawRow;
use crossagg::{Engine, FieldType, RecordStore, Schema};

// =============================================================================
// Test Data Strategies
// =============================================================================

/// One generated row: two small integer keys, an optional parent, a value
#[derive(Debug, Clone)]
struct Row {
    a: i64,
    b: i64,
    parent: Option<u8>,
    v: i32,
}

/// Strategy for rows with dense, low-cardinality keys
fn row() -> impl Strategy<Value = Row> {
    (
        0i64..8,
        0i64..5,
        prop_oneof![
            4 => (0u8..6).prop_map(Some),
            1 => Just(None),
        ],
        -1000i32..1000,
    )
        .prop_map(|(a, b, parent, v)| Row { a, b, parent, v })
}

/// Strategy for a filter on a dimension with keys in `0..max`
fn filter(max: i64) -> impl Strategy<Value = Option<Predicate>> {
    prop_oneof![
        1 => Just(None),
        2 => (0..=max, 0..=max).prop_map(|(x, y)| {
            Predicate::range(x.min(y), x.max(y)).ok()
        }),
        2 => prop::collection::vec(0..max, 0..4).prop_map(|keys| Some(Predicate::one_of(keys))),
    ]
}

/// Strategy for a sequence of filter changes over two dimensions
fn filter_ops(len: usize) -> impl Strategy<Value = Vec<(bool, Option<Predicate>)>> {
    prop::collection::vec(
        prop_oneof![
            (Just(true), filter(8)),
            (Just(false), filter(5)),
        ],
        1..len,
    )
}

fn store(rows: &[Row]) -> RecordStore {
    let schema = Schema::new()
        .with_field("a", FieldType::Integer)
        .with_field("b", FieldType::Integer)
        .with_optional("p", FieldType::Text)
        .with_field("v", FieldType::Float);
    let raw: Vec<RawRow> = rows
        .iter()
        .map(|r| {
            let mut raw = RawRow::from([
                ("a".to_string(), r.a.to_string()),
                ("b".to_string(), r.b.to_string()),
                ("v".to_string(), r.v.to_string()),
            ]);
            if let Some(p) = r.parent {
                raw.insert("p".to_string(), format!("P{}", p));
            }
            raw
        })
        .collect();
    RecordStore::ingest(schema, &raw).unwrap()
}

/// Deterministic Fisher-Yates shuffle driven by an xorshift seed
fn shuffle<T>(items: &mut [T], seed: u64) {
    let mut x = seed | 1;
    for i in (1..items.len()).rev() {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        items.swap(i, (x % (i as u64 + 1)) as usize);
    }
}

fn running() -> RunningStatistic {
    RunningStatistic::new()
        .with_measure(Measure::sum_field("v", "v"))
        .with_measure(Measure::abs_sum_field("abs_v", "v"))
        .with_derived(DerivedStat::mean("avg_v", "v"))
}

// =============================================================================
// Running Statistic Fuzz Tests
// =============================================================================

mod running_statistic {
    use super::*;

    proptest! {
        /// The accumulator depends on the multiset of records, not their order
        #[test]
        fn insertion_order_is_irrelevant(
            rows in prop::collection::vec(row(), 1..60),
            seed in any::<u64>()
        ) {
            let store = store(&rows);
            let reducer = running();

            let mut forward = reducer.initial();
            for r in store.all() {
                reducer.add(&mut forward, r);
            }

            let mut order: Vec<usize> = (0..store.len()).collect();
            shuffle(&mut order, seed);
            let mut shuffled = reducer.initial();
            for i in order {
                reducer.add(&mut shuffled, &store.all()[i]);
            }

            prop_assert!(reducer.equivalent(&forward, &shuffled));
            prop_assert_eq!(forward.count, rows.len() as u64);
        }

        /// Interleaved adds and removes depend only on the surviving multiset
        #[test]
        fn mixed_add_remove_order_is_irrelevant(
            rows in prop::collection::vec(row(), 1..60),
            removed in prop::collection::vec(any::<bool>(), 60),
            seed in any::<u64>()
        ) {
            let store = store(&rows);
            let reducer = running();

            // (record, is_add) events: one add per record, one remove for dropped ones
            let mut events: Vec<(usize, bool)> = (0..store.len()).map(|i| (i, true)).collect();
            events.extend((0..store.len()).filter(|&i| removed[i]).map(|i| (i, false)));
            shuffle(&mut events, seed);

            // A remove that landed before its add swaps places with it
            for i in 0..store.len() {
                let add = events.iter().position(|&e| e == (i, true));
                let remove = events.iter().position(|&e| e == (i, false));
                if let (Some(a), Some(r)) = (add, remove) {
                    if r < a {
                        events.swap(a, r);
                    }
                }
            }

            let mut mixed = reducer.initial();
            for (i, is_add) in events {
                let record = &store.all()[i];
                if is_add {
                    reducer.add(&mut mixed, record);
                } else {
                    prop_assert!(reducer.remove(&mut mixed, record).is_ok());
                }
            }

            let mut survivors = reducer.initial();
            for r in store.all().iter().filter(|r| !removed[r.id() as usize]) {
                reducer.add(&mut survivors, r);
            }

            prop_assert!(reducer.equivalent(&mixed, &survivors));
        }

        /// Removing what was added returns to the initial accumulator
        #[test]
        fn remove_undoes_add(
            rows in prop::collection::vec(row(), 1..60),
            keep in 0usize..60
        ) {
            let store = store(&rows);
            let reducer = running();
            let keep = keep.min(rows.len());

            let mut state = reducer.initial();
            for r in store.all() {
                reducer.add(&mut state, r);
            }
            for r in &store.all()[keep..] {
                prop_assert!(reducer.remove(&mut state, r).is_ok());
            }

            let mut expected = reducer.initial();
            for r in &store.all()[..keep] {
                reducer.add(&mut expected, r);
            }
            prop_assert!(reducer.equivalent(&state, &expected));

            if keep == 0 {
                prop_assert_eq!(state.count, 0);
                prop_assert!(state.sums.iter().all(|s| *s == 0.0));
                prop_assert_eq!(reducer.summarize(&state).derived("avg_v"), None);
            }
        }

        /// Absolute sums never go negative while records are live
        #[test]
        fn abs_sum_is_non_negative(rows in prop::collection::vec(row(), 0..60)) {
            let store = store(&rows);
            let reducer = running();
            let mut state = reducer.initial();
            for r in store.all() {
                reducer.add(&mut state, r);
                let abs = reducer.summarize(&state).sum("abs_v").unwrap();
                prop_assert!(abs >= 0.0);
            }
        }
    }
}

// =============================================================================
// Distinct Cardinality Fuzz Tests
// =============================================================================

mod distinct_cardinality {
    use super::*;

    proptest! {
        /// Live count equals the distinct non-null parents still present
        #[test]
        fn live_count_tracks_distinct_parents(
            rows in prop::collection::vec(row(), 0..80),
            removed in prop::collection::vec(any::<bool>(), 80)
        ) {
            let store = store(&rows);
            let reducer = DistinctCardinality::by_field("p");

            let mut state = reducer.initial();
            for r in store.all() {
                reducer.add(&mut state, r);
            }
            prop_assert!(state.verify().is_ok());

            let mut remaining = HashSet::new();
            for (r, &drop) in store.all().iter().zip(removed.iter()) {
                if drop {
                    prop_assert!(reducer.remove(&mut state, r).is_ok());
                    prop_assert!(state.verify().is_ok());
                } else if let Some(p) = rows[r.id() as usize].parent {
                    remaining.insert(p);
                }
            }

            prop_assert_eq!(state.live_count(), remaining.len() as u64);
            prop_assert_eq!(reducer.primary_metric(&state), remaining.len() as u64);
        }

        /// Removing a child that was never added is rejected without change
        #[test]
        fn unmatched_remove_leaves_state_untouched(
            rows in prop::collection::vec(row(), 1..40)
        ) {
            let store = store(&rows);
            let reducer = DistinctCardinality::by_field("p");
            let mut state = reducer.initial();
            let before = state.clone();

            for r in store.all() {
                let result = reducer.remove(&mut state, r);
                // Null parents are skipped on both sides
                prop_assert_eq!(result.is_err(), rows[r.id() as usize].parent.is_some());
                prop_assert_eq!(&state, &before);
            }
        }
    }
}

// =============================================================================
// Engine Fuzz Tests
// =============================================================================

mod engine {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// After every filter change each group equals a full reduction
        #[test]
        fn incremental_matches_full_reduction(
            rows in prop::collection::vec(row(), 0..120),
            ops in filter_ops(20)
        ) {
            let mut engine = Engine::new(store(&rows));
            let a = engine.register_field_dimension("a").unwrap();
            let b = engine.register_field_dimension("b").unwrap();
            let by_a = engine.register_group(Some(a), running()).unwrap();
            let by_b = engine
                .register_group(Some(b), DistinctCardinality::by_field("p"))
                .unwrap();
            let total = engine.register_group(None, running()).unwrap();
            let parents = engine
                .register_group(None, DistinctCardinality::by_field("p"))
                .unwrap();

            for (on_a, predicate) in ops {
                let dim = if on_a { a } else { b };
                engine.set_filter(dim, predicate).unwrap();

                let reports = engine.verify();
                prop_assert!(reports.is_empty(), "reports: {:?}", reports);

                let active = engine
                    .store()
                    .all()
                    .iter()
                    .filter(|r| engine.is_active(r.id()).unwrap())
                    .count();
                prop_assert_eq!(engine.active_count(), active);
                prop_assert_eq!(
                    engine.read_value(total).unwrap().count(),
                    Some(active as u64)
                );
            }

            // Clearing everything restores totals over the whole store
            engine.clear_all_filters().unwrap();
            prop_assert_eq!(engine.active_count(), rows.len());
            let all_parents: HashSet<_> = rows.iter().filter_map(|r| r.parent).collect();
            prop_assert_eq!(
                engine.read_value(parents).unwrap().live_count(),
                Some(all_parents.len() as u64)
            );
            prop_assert!(engine.verify().is_empty());
            prop_assert_eq!(engine.read_all(by_a).unwrap().len(), engine.dimension(a).unwrap().cardinality());
            prop_assert_eq!(engine.read_all(by_b).unwrap().len(), engine.dimension(b).unwrap().cardinality());
        }

        /// Reducer calls per change never exceed twice the delta per group
        #[test]
        fn work_is_bounded_by_delta(
            rows in prop::collection::vec(row(), 0..120),
            ops in filter_ops(12)
        ) {
            let mut engine = Engine::new(store(&rows));
            let a = engine.register_field_dimension("a").unwrap();
            let b = engine.register_field_dimension("b").unwrap();
            engine.register_group(Some(a), running()).unwrap();
            engine.register_group(Some(b), running()).unwrap();
            engine.register_group(None, running()).unwrap();

            for (on_a, predicate) in ops {
                let dim = if on_a { a } else { b };
                let change = engine.set_filter(dim, predicate).unwrap();
                // The group on the changed dimension is skipped
                let bound = 2 * change.delta.len() as u64;
                prop_assert!(change.reducer_calls() <= bound);
            }
        }

        /// Setting the same filter twice produces an empty second delta
        #[test]
        fn repeated_filter_is_a_no_op(
            rows in prop::collection::vec(row(), 0..80),
            predicate in filter(8)
        ) {
            let mut engine = Engine::new(store(&rows));
            let a = engine.register_field_dimension("a").unwrap();
            engine.register_group(None, running()).unwrap();

            engine.set_filter(a, predicate.clone()).unwrap();
            let again = engine.set_filter(a, predicate).unwrap();
            prop_assert!(again.delta.is_empty());
            prop_assert_eq!(again.reducer_calls(), 0);
        }
    }
}
