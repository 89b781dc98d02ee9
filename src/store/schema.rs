//! Record schema: typed base fields, derived fields and roll-ups
//!
//! Values are laid out on each record in declaration order:
//! base fields first, then derived fields, then roll-ups. A derived field
//! can read base fields and earlier derived fields; roll-ups can read any
//! base or derived field.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::error::IngestError;
use crate::types::{FieldType, Value};

use super::rollup::Rollup;
use super::Record;

/// Function computing a derived field from a partially built record
pub type DeriveFn = Arc<dyn Fn(&Record) -> Value + Send + Sync>;

/// A typed base column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Column name
    pub name: String,
    /// Declared type
    pub field_type: FieldType,
    /// Whether an absent or empty value is an error
    pub required: bool,
}

impl FieldDef {
    /// A required field
    pub fn required(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: true,
        }
    }

    /// An optional field; absent values become `Value::Null`
    pub fn optional(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: false,
        }
    }
}

pub(crate) struct DerivedField {
    pub(crate) name: String,
    pub(crate) compute: DeriveFn,
}

/// Ordered description of a record's fields
#[derive(Default)]
pub struct Schema {
    pub(crate) fields: Vec<FieldDef>,
    pub(crate) derived: Vec<DerivedField>,
    pub(crate) rollups: Vec<Rollup>,
    positions: HashMap<String, usize>,
}

impl Schema {
    /// Create an empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required base field
    pub fn with_field(mut self, name: &str, field_type: FieldType) -> Self {
        self.fields.push(FieldDef::required(name, field_type));
        self
    }

    /// Add an optional base field
    pub fn with_optional(mut self, name: &str, field_type: FieldType) -> Self {
        self.fields.push(FieldDef::optional(name, field_type));
        self
    }

    /// Add a derived field computed once per record at ingestion
    pub fn with_derived<F>(mut self, name: &str, compute: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        self.derived.push(DerivedField {
            name: name.to_string(),
            compute: Arc::new(compute),
        });
        self
    }

    /// Add a parent roll-up computed over all rows of the batch
    pub fn with_rollup(mut self, rollup: Rollup) -> Self {
        self.rollups.push(rollup);
        self
    }

    /// Base field definitions
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Total number of values stored per record
    pub fn width(&self) -> usize {
        self.fields.len() + self.derived.len() + self.rollups.len()
    }

    /// Position of a field by name
    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    /// All field names in storage order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.derived.iter().map(|d| d.name.as_str()))
            .chain(self.rollups.iter().map(|r| r.name()))
    }

    /// Check names and build the position table
    ///
    /// Called once by `RecordStore::ingest` before any row is parsed.
    pub(crate) fn seal(&mut self) -> Result<(), IngestError> {
        if self.fields.is_empty() {
            return Err(IngestError::EmptySchema);
        }

        let mut seen = HashSet::new();
        let names: Vec<String> = self.names().map(str::to_string).collect();
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(IngestError::DuplicateField {
                    field: name.clone(),
                });
            }
        }

        // Roll-ups may only read base and derived fields
        let readable = self.fields.len() + self.derived.len();
        for rollup in &self.rollups {
            for field in rollup.inputs() {
                let known = names[..readable].iter().any(|n| n == field);
                if !known {
                    return Err(IngestError::UnknownField {
                        field: field.to_string(),
                    });
                }
            }
        }

        self.positions = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name, i))
            .collect();
        Ok(())
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("fields", &self.fields)
            .field(
                "derived",
                &self.derived.iter().map(|d| &d.name).collect::<Vec<_>>(),
            )
            .field("rollups", &self.rollups)
            .finish()
    }
}
