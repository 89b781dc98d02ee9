//! crossagg - Incremental multi-dimensional cross-filter aggregation
//!
//! This library keeps many grouped summaries of one record set correct as
//! interactive filters change:
//! - Typed ingestion of tabular rows with derived fields and parent roll-ups
//! - Dimensions with range and set filters over ordered keys
//! - Running statistics updated by add/remove, never by rescans
//! - Distinct-parent counts maintained with reference counting
//! - O(|Δ|) work per filter change

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod store;
pub mod types;

/// Prometheus metrics for filter application and consistency reports
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Logging setup and the accumulator consistency sink
pub mod telemetry;

/// Dimensions, reducers, groups and the cross-filter engine
pub mod aggregation;

// Re-export main types
pub use aggregation::{
    DimensionHandle, Engine, FilterChange, GroupHandle, GroupValue, Predicate, Reducer,
    SharedEngine,
};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use store::{Record, RecordStore, Schema};
pub use types::{FieldType, RecordId, Value};
