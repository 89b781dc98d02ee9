//! Filter predicates over dimension keys
//!
//! Ranges are half-open `[low, high)`: a brush from 10 to 20 selects keys
//! `10 <= k < 20`. Sets select an explicit collection of discrete keys.
//! "No filter" is `Option::<Predicate>::None` at the dimension level.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Bound;

use serde::Serialize;

use crate::error::FilterError;
use crate::types::Value;

/// A filter over one dimension's keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Predicate {
    /// Keys in `[low, high)`
    Range {
        /// Inclusive lower bound
        low: Value,
        /// Exclusive upper bound
        high: Value,
    },

    /// Keys contained in the set
    Set(BTreeSet<Value>),
}

impl Predicate {
    /// Validated half-open range
    pub fn range(low: impl Into<Value>, high: impl Into<Value>) -> Result<Self, FilterError> {
        let (low, high) = (low.into(), high.into());
        if low.is_null() || high.is_null() {
            return Err(FilterError::NullBound);
        }
        if !low.same_kind(&high) {
            return Err(FilterError::MismatchedBounds { low, high });
        }
        if low > high {
            return Err(FilterError::InvertedRange { low, high });
        }
        Ok(Predicate::Range { low, high })
    }

    /// Single-key selection
    pub fn exact(key: impl Into<Value>) -> Self {
        Predicate::Set(BTreeSet::from([key.into()]))
    }

    /// Selection of several discrete keys
    pub fn one_of<V: Into<Value>>(keys: impl IntoIterator<Item = V>) -> Self {
        Predicate::Set(keys.into_iter().map(Into::into).collect())
    }

    /// Re-check a predicate built by hand rather than through `range`
    pub fn validate(&self) -> Result<(), FilterError> {
        match self {
            Predicate::Range { low, high } => Predicate::range(low.clone(), high.clone()).map(|_| ()),
            Predicate::Set(_) => Ok(()),
        }
    }

    /// Whether a key satisfies the predicate
    pub fn matches(&self, key: &Value) -> bool {
        match self {
            // Null never falls inside a range: bounds are non-null and
            // same-kind, so a null key compares below every low bound.
            Predicate::Range { low, high } => key.same_kind(low) && key >= low && key < high,
            Predicate::Set(keys) => keys.contains(key),
        }
    }

    /// Key bounds usable for a `BTreeMap::range` scan of matching keys
    ///
    /// For sets this is `None`: callers look each member up directly.
    pub(crate) fn bounds(&self) -> Option<(Bound<&Value>, Bound<&Value>)> {
        match self {
            Predicate::Range { low, high } => Some((Bound::Included(low), Bound::Excluded(high))),
            Predicate::Set(_) => None,
        }
    }

    /// True if no key can match
    pub fn is_empty(&self) -> bool {
        match self {
            Predicate::Range { low, high } => low == high,
            Predicate::Set(keys) => keys.is_empty(),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Range { low, high } => write!(f, "[{}, {})", low, high),
            Predicate::Set(keys) => {
                f.write_str("{")?;
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", key)?;
                }
                f.write_str("}")
            }
        }
    }
}
