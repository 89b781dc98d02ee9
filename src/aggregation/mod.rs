//! Incremental Cross-Filter Aggregation
//!
//! Slices one immutable record set along several dimensions at once and
//! keeps every group's summary current as filters change, doing work
//! proportional to the records whose status flipped rather than the size
//! of the store.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │            RecordStore              │
//! │   immutable records, ids 0..n-1     │
//! └─────────────────────────────────────┘
//!                  ↓
//! ┌─────────────────────────────────────┐
//! │            Dimensions               │
//! │  key index + filter + excluded set  │
//! └─────────────────────────────────────┘
//!                  ↓  Δ (entered / exited)
//! ┌─────────────────────────────────────┐
//! │              Engine                 │
//! │  fail counts, cross-filter routing  │
//! └─────────────────────────────────────┘
//!                  ↓  add / remove
//! ┌─────────────────────────────────────┐
//! │              Groups                 │
//! │   one accumulator per key (or one)  │
//! └─────────────────────────────────────┘
//! ```
//!
//! # Key Components
//!
//! - **Dimension**: projection to a key, `BTreeMap` index, filter predicate
//! - **Reducer**: `RunningStatistic` (count, sums, lazy ratios) or
//!   `DistinctCardinality` (ref-counted distinct parents)
//! - **Group**: reducer slots keyed by a dimension, or a single global slot
//! - **Engine**: owns everything; a group on dimension `D` ignores `D`'s own
//!   filter so each chart shows what selecting one of its keys would include
//! - **SharedEngine**: `RwLock` wrapper for multi-threaded readers
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use crossagg::aggregation::{DistinctCardinality, Engine, Predicate, Reducer};
//! use crossagg::store::{RecordStore, Schema};
//! use crossagg::types::{FieldType, Value};
//!
//! let schema = Schema::new()
//!     .with_field("author", FieldType::Text)
//!     .with_field("wg", FieldType::Text);
//! let rows: Vec<HashMap<String, String>> = [("ann", "WG I"), ("ann", "WG II"), ("bo", "WG I")]
//!     .iter()
//!     .map(|(a, w)| {
//!         HashMap::from([
//!             ("author".to_string(), a.to_string()),
//!             ("wg".to_string(), w.to_string()),
//!         ])
//!     })
//!     .collect();
//!
//! let mut engine = Engine::new(RecordStore::ingest(schema, &rows).unwrap());
//! let wg = engine.register_field_dimension("wg").unwrap();
//! let per_wg = engine.register_group(Some(wg), Reducer::count()).unwrap();
//! let authors = engine
//!     .register_group(None, DistinctCardinality::by_field("author"))
//!     .unwrap();
//!
//! engine.set_filter(wg, Some(Predicate::exact("WG II"))).unwrap();
//!
//! assert_eq!(engine.read_value(authors).unwrap().live_count(), Some(1));
//! // The wg chart still shows both working groups
//! assert_eq!(
//!     engine.value_at(per_wg, "WG I").unwrap().unwrap().count(),
//!     Some(2)
//! );
//! ```

pub mod bitmap;
pub mod dimension;
pub mod engine;
pub mod filter;
pub mod group;
pub mod reducer;
pub mod shared;
pub mod stats;

pub use bitmap::RecordBitmap;
pub use dimension::{Dimension, FilterDelta, ProjectionFn};
pub use engine::{DimensionHandle, Engine, FilterChange, GroupHandle};
pub use filter::Predicate;
pub use group::Group;
pub use reducer::{
    DerivedStat, DistinctCardinality, DistinctSummary, GroupValue, Measure, Operand, Reduce,
    Reducer, RunningStatistic, RunningSummary,
};
pub use shared::SharedEngine;
pub use stats::{EngineStats, EngineStatsSnapshot};
