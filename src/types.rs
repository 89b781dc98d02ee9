//! Core data types shared by ingestion and aggregation
//!
//! # Key Types
//!
//! - **`RecordId`**: Dense record identity assigned at ingestion (0..n-1)
//! - **`FieldType`**: Declared type of a schema column
//! - **`Value`**: A typed field value; also the key type for dimensions and groups
//!
//! `Value` is totally ordered so it can key a `BTreeMap` index and bound a
//! range filter. Variants rank `Null < Boolean < Integer < Float < Date < Text`;
//! floats compare with IEEE total ordering so `NaN` has a stable place.
//!
//! # Example
//!
//! ```rust
//! use crossagg::types::Value;
//!
//! assert!(Value::from(1) < Value::from(2));
//! assert!(Value::Null < Value::from(false));
//! assert_eq!(Value::from("WG I").to_string(), "WG I");
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Identity of a record within a `RecordStore`
pub type RecordId = u32;

/// Declared type of a schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    /// 64-bit signed integer
    Integer,
    /// Finite 64-bit float
    Float,
    /// UTF-8 text
    Text,
    /// Calendar date
    Date,
    /// Boolean
    Boolean,
}

impl FieldType {
    /// Human-readable type name used in error messages
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Text => "text",
            FieldType::Date => "date",
            FieldType::Boolean => "boolean",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed field value
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent optional field
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer value
    Integer(i64),
    /// Float value
    Float(f64),
    /// Date value
    Date(NaiveDate),
    /// Text value
    Text(String),
}

impl Value {
    /// Rank of the variant in the total order
    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) => 2,
            Value::Float(_) => 3,
            Value::Date(_) => 4,
            Value::Text(_) => 5,
        }
    }

    /// True if both values are the same variant
    pub fn same_kind(&self, other: &Value) -> bool {
        self.rank() == other.rank()
    }

    /// True for `Value::Null`
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of integers and floats
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Integer view
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Text view
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Date view
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => canonical(*a).total_cmp(&canonical(*b)),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(b) => b.hash(state),
            Value::Integer(i) => i.hash(state),
            // Equality is bitwise on the canonical form
            Value::Float(f) => canonical(*f).to_bits().hash(state),
            Value::Date(d) => d.hash(state),
            Value::Text(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", canonical(*x)),
            Value::Date(d) => write!(f, "{}", d),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(canonical(v))
    }
}

/// Fold `-0.0` into `0.0` so both land under one key
fn canonical(v: f64) -> f64 {
    if v == 0.0 {
        0.0
    } else {
        v
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_cross_kind_ordering() {
        let mut values = vec![
            Value::from("a"),
            Value::from(2.5),
            Value::from(7),
            Value::Null,
            Value::from(true),
            Value::from(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()),
        ];
        values.sort();
        assert_eq!(values[0], Value::Null);
        assert_eq!(values[1], Value::from(true));
        assert_eq!(values[2], Value::from(7));
        assert_eq!(values[3], Value::from(2.5));
        assert!(values[4].as_date().is_some());
        assert_eq!(values[5], Value::from("a"));
    }

    #[test]
    fn test_integer_and_float_are_distinct_keys() {
        assert_ne!(Value::from(1), Value::from(1.0));
        assert!(!Value::from(1).same_kind(&Value::from(1.0)));
    }

    #[test]
    fn test_float_hash_consistent_with_eq() {
        let mut set = HashSet::new();
        set.insert(Value::from(0.5));
        set.insert(Value::from(0.5));
        set.insert(Value::from(f64::NAN));
        set.insert(Value::from(f64::NAN));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_negative_zero_is_zero() {
        assert_eq!(Value::Float(-0.0), Value::Float(0.0));
        assert_eq!(Value::Float(-0.0).cmp(&Value::Float(0.0)), Ordering::Equal);
        assert!(Value::Float(-0.0) < Value::Float(f64::MIN_POSITIVE));
        assert!(Value::Float(-0.0) > Value::Float(-f64::MIN_POSITIVE));

        let mut set = HashSet::new();
        set.insert(Value::Float(-0.0));
        set.insert(Value::Float(0.0));
        assert_eq!(set.len(), 1);

        // Rounding a small negative yields -0.0
        assert_eq!(Value::from((-0.4f64).round()).to_string(), "0");
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::from("x"));
    }
}
