//! Record Store
//!
//! Holds the immutable record set an engine aggregates over. Raw tabular
//! rows are coerced against a [`Schema`] into typed [`Record`]s with dense
//! ids `0..n-1`. Derived fields and parent roll-ups are computed once here
//! and stored on each record; nothing mutates a record afterwards.
//!
//! Ingestion is all-or-nothing: the first malformed row fails the batch and
//! no store is produced.
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use crossagg::store::{RecordStore, Schema};
//! use crossagg::types::{FieldType, Value};
//!
//! let schema = Schema::new()
//!     .with_field("author_id", FieldType::Integer)
//!     .with_field("v", FieldType::Float);
//!
//! let rows = vec![HashMap::from([
//!     ("author_id".to_string(), "7".to_string()),
//!     ("v".to_string(), "1.5".to_string()),
//! ])];
//!
//! let store = RecordStore::ingest(schema, &rows).unwrap();
//! assert_eq!(store.len(), 1);
//! assert_eq!(store.get(0).unwrap().get("v"), &Value::Float(1.5));
//! ```

pub mod rollup;
pub mod schema;

pub use rollup::{PresenceSet, Rollup};
pub use schema::{DeriveFn, FieldDef, Schema};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::config::IngestionSection;
use crate::error::{IngestError, InvalidHandleError};
use crate::types::{FieldType, RecordId, Value};

/// One raw tabular row: column name to text
pub type RawRow = HashMap<String, String>;

static NULL: Value = Value::Null;

/// An immutable typed row
#[derive(Clone)]
pub struct Record {
    id: RecordId,
    schema: Arc<Schema>,
    values: Vec<Value>,
}

impl Record {
    /// Stable record id
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Field value by name; `Value::Null` for unknown or not-yet-computed fields
    pub fn get(&self, name: &str) -> &Value {
        self.schema
            .position(name)
            .and_then(|i| self.values.get(i))
            .unwrap_or(&NULL)
    }

    /// Field value by storage position
    pub fn value(&self, position: usize) -> &Value {
        self.values.get(position).unwrap_or(&NULL)
    }

    /// Numeric view of a field
    pub fn f64(&self, name: &str) -> Option<f64> {
        self.get(name).as_f64()
    }

    /// Iterate `(name, value)` pairs in storage order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.schema.names().zip(self.values.iter())
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        map.entry(&"id", &self.id);
        for (name, value) in self.fields() {
            map.entry(&name, value);
        }
        map.finish()
    }
}

/// Immutable set of records with dense ids
#[derive(Debug)]
pub struct RecordStore {
    schema: Arc<Schema>,
    records: Vec<Record>,
}

impl RecordStore {
    /// Ingest rows with default ingestion settings
    pub fn ingest(schema: Schema, rows: &[RawRow]) -> Result<Self, IngestError> {
        Self::ingest_with_config(schema, rows, &IngestionSection::default())
    }

    /// Ingest rows, coercing every field against the schema
    pub fn ingest_with_config(
        mut schema: Schema,
        rows: &[RawRow],
        config: &IngestionSection,
    ) -> Result<Self, IngestError> {
        schema.seal()?;

        if config.max_rows > 0 && rows.len() > config.max_rows {
            return Err(IngestError::TooManyRows {
                rows: rows.len(),
                limit: config.max_rows,
            });
        }

        // Base fields
        let mut table: Vec<Vec<Value>> = Vec::with_capacity(rows.len());
        for (row_idx, raw) in rows.iter().enumerate() {
            let mut values = Vec::with_capacity(schema.width());
            for field in schema.fields() {
                values.push(coerce_field(row_idx, field, raw.get(&field.name), config)?);
            }
            table.push(values);
        }

        let schema = Arc::new(schema);

        // Derived fields, each seeing base fields and earlier derived values
        if !schema.derived.is_empty() {
            for (id, values) in table.iter_mut().enumerate() {
                let mut partial = Record {
                    id: id as RecordId,
                    schema: Arc::clone(&schema),
                    values: std::mem::take(values),
                };
                for derived in &schema.derived {
                    let value = (derived.compute)(&partial);
                    partial.values.push(value);
                }
                *values = partial.values;
            }
        }

        // Roll-ups over the whole batch
        for rollup in &schema.rollups {
            let [parent, source] = rollup.inputs();
            let (Some(parent_at), Some(source_at)) =
                (schema.position(parent), schema.position(source))
            else {
                return Err(IngestError::UnknownField {
                    field: parent.to_string(),
                });
            };
            let column = rollup.compute(&table, parent_at, source_at);
            for (values, value) in table.iter_mut().zip(column) {
                values.push(value);
            }
            debug!(rollup = rollup.name(), "Computed roll-up");
        }

        let records: Vec<Record> = table
            .into_iter()
            .enumerate()
            .map(|(id, values)| Record {
                id: id as RecordId,
                schema: Arc::clone(&schema),
                values,
            })
            .collect();

        info!(records = records.len(), "Ingested record batch");
        Ok(Self { schema, records })
    }

    /// All records in id order
    pub fn all(&self) -> &[Record] {
        &self.records
    }

    /// Record by id
    pub fn get(&self, id: RecordId) -> Result<&Record, InvalidHandleError> {
        self.records
            .get(id as usize)
            .ok_or(InvalidHandleError::UnknownRecord(id))
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if the store holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The sealed schema
    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// Coerce one raw cell into a typed value
fn coerce_field(
    row: usize,
    field: &FieldDef,
    raw: Option<&String>,
    config: &IngestionSection,
) -> Result<Value, IngestError> {
    let text = raw.map(|s| {
        if config.trim_whitespace {
            s.trim()
        } else {
            s.as_str()
        }
    });

    let text = match text {
        Some(t) if !t.is_empty() => t,
        _ if field.required => {
            return Err(IngestError::MissingField {
                row,
                field: field.name.clone(),
            })
        }
        _ => return Ok(Value::Null),
    };

    let invalid = || IngestError::InvalidValue {
        row,
        field: field.name.clone(),
        expected: field.field_type.name().to_string(),
        raw: text.to_string(),
    };

    match field.field_type {
        FieldType::Integer => text.parse::<i64>().map(Value::Integer).map_err(|_| invalid()),
        FieldType::Float => {
            let v = text.parse::<f64>().map_err(|_| invalid())?;
            if !v.is_finite() {
                return Err(IngestError::NonFiniteValue {
                    row,
                    field: field.name.clone(),
                });
            }
            Ok(Value::from(v))
        }
        FieldType::Text => Ok(Value::Text(text.to_string())),
        FieldType::Date => NaiveDate::parse_from_str(text, &config.date_format)
            .map(Value::Date)
            .map_err(|_| invalid()),
        FieldType::Boolean => match text.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Value::Boolean(true)),
            "false" | "0" | "no" => Ok(Value::Boolean(false)),
            _ => Err(invalid()),
        },
    }
}
