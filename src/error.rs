//! Error types for the aggregation engine
//!
//! Every error kind here is local and recoverable. Ingestion and filter
//! errors reject the offending call and leave prior state untouched;
//! accumulator consistency errors are reported to a sink and the offending
//! reducer step becomes a no-op.

use thiserror::Error;

use crate::types::{RecordId, Value};

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    /// Ingestion error
    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    /// Filter error
    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    /// Accumulator consistency error
    #[error("Accumulator consistency error: {0}")]
    Consistency(#[from] AccumulatorConsistencyError),

    /// Invalid handle or record id
    #[error("Invalid handle: {0}")]
    InvalidHandle(#[from] InvalidHandleError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while turning raw rows into records
///
/// Ingestion is all-or-nothing: the first error aborts the whole batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IngestError {
    /// Schema has no fields
    #[error("Schema has no fields")]
    EmptySchema,

    /// Two fields (base, derived or roll-up) share a name
    #[error("Duplicate field name: {field}")]
    DuplicateField {
        /// The repeated field name
        field: String,
    },

    /// A roll-up or accessor references a field the schema does not define
    #[error("Unknown field: {field}")]
    UnknownField {
        /// The missing field name
        field: String,
    },

    /// A required field is absent or empty
    #[error("Row {row}: missing required field '{field}'")]
    MissingField {
        /// Row index within the batch
        row: usize,
        /// Field name
        field: String,
    },

    /// A field failed type coercion
    #[error("Row {row}: field '{field}' expected {expected}, got '{raw}'")]
    InvalidValue {
        /// Row index within the batch
        row: usize,
        /// Field name
        field: String,
        /// Expected type name
        expected: String,
        /// Raw text that failed to parse
        raw: String,
    },

    /// A float field parsed to NaN or infinity
    #[error("Row {row}: field '{field}' is not a finite number")]
    NonFiniteValue {
        /// Row index within the batch
        row: usize,
        /// Field name
        field: String,
    },

    /// The batch exceeds the configured row limit
    #[error("Batch has {rows} rows, limit is {limit}")]
    TooManyRows {
        /// Rows in the batch
        rows: usize,
        /// Configured limit
        limit: usize,
    },
}

/// Errors raised by malformed filter predicates
///
/// A rejected predicate never replaces the active one.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    /// Range lower bound is above its upper bound
    #[error("Inverted range: low {low} > high {high}")]
    InvertedRange {
        /// Lower bound
        low: Value,
        /// Upper bound
        high: Value,
    },

    /// Range bounds are of different value kinds
    #[error("Range bounds have different kinds: {low} and {high}")]
    MismatchedBounds {
        /// Lower bound
        low: Value,
        /// Upper bound
        high: Value,
    },

    /// Range bound is null
    #[error("Range bounds cannot be null")]
    NullBound,
}

/// Reducer invariant violations
///
/// These are reported to the consistency sink, never propagated as faults.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AccumulatorConsistencyError {
    /// Remove called for a parent with no live children
    #[error("No contribution to remove from parent {parent}")]
    NonPositiveRefCount {
        /// Parent id
        parent: Value,
    },

    /// Live count disagrees with the ref count table
    #[error("Live count {live_count} does not match {positive_parents} referenced parents")]
    LiveCountMismatch {
        /// Stored live count
        live_count: u64,
        /// Parents with a positive ref count
        positive_parents: u64,
    },

    /// Remove called on an accumulator whose count is already zero
    #[error("Record count would go negative")]
    NegativeCount,

    /// Incremental value differs from a from-scratch reduction
    #[error("Group {group} drifted at key {key}")]
    DriftDetected {
        /// Group id
        group: usize,
        /// Group key
        key: Value,
    },
}

impl AccumulatorConsistencyError {
    /// Short label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            AccumulatorConsistencyError::NonPositiveRefCount { .. } => "non_positive_ref_count",
            AccumulatorConsistencyError::LiveCountMismatch { .. } => "live_count_mismatch",
            AccumulatorConsistencyError::NegativeCount => "negative_count",
            AccumulatorConsistencyError::DriftDetected { .. } => "drift",
        }
    }
}

/// Precondition failures on handles and record ids
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidHandleError {
    /// Dimension handle does not exist
    #[error("Unknown dimension: {0}")]
    UnknownDimension(usize),

    /// Group handle does not exist
    #[error("Unknown group: {0}")]
    UnknownGroup(usize),

    /// Handle was issued by a different engine
    #[error("Handle belongs to another engine")]
    ForeignHandle,

    /// Record id out of range
    #[error("Unknown record: {0}")]
    UnknownRecord(RecordId),

    /// Operation does not apply to this kind of group
    #[error("Group {group} is not a {expected} group")]
    WrongGroupKind {
        /// Group id
        group: usize,
        /// Expected kind ("keyed" or "global")
        expected: &'static str,
    },
}
