//! Dimensions: keyed projections of the record set with a filter
//!
//! A dimension projects every record to a key once, at registration, and
//! indexes record ids by key in a `BTreeMap`. Records are immutable, so the
//! index never needs re-keying; only the filter changes.
//!
//! Changing the filter compares the old and new predicate over the index
//! keys that either predicate can select, and reports the records whose
//! match status flipped. That delta is what the engine fans out to groups.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::FilterError;
use crate::store::{Record, RecordStore};
use crate::types::{RecordId, Value};

use super::bitmap::RecordBitmap;
use super::filter::Predicate;

/// Pure, total function from a record to its dimension key
pub type ProjectionFn = Arc<dyn Fn(&Record) -> Value + Send + Sync>;

/// Records whose match status flipped on a filter change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterDelta {
    /// Records that now match and previously did not
    pub entered: Vec<RecordId>,
    /// Records that previously matched and no longer do
    pub exited: Vec<RecordId>,
}

impl FilterDelta {
    /// Total flipped records
    pub fn len(&self) -> usize {
        self.entered.len() + self.exited.len()
    }

    /// True if nothing flipped
    pub fn is_empty(&self) -> bool {
        self.entered.is_empty() && self.exited.is_empty()
    }

    /// All flipped records, entered first
    pub fn iter(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.entered.iter().chain(self.exited.iter()).copied()
    }
}

/// A named projection with an index and an optional filter
pub struct Dimension {
    name: String,
    projection: ProjectionFn,

    /// Cached key per record id
    keys: Vec<Value>,

    /// Key to member record ids (ascending)
    index: BTreeMap<Value, Vec<RecordId>>,

    filter: Option<Predicate>,

    /// Records the current filter excludes
    excluded: RecordBitmap,
}

impl Dimension {
    /// Project and index every record of the store
    pub(crate) fn build(name: &str, projection: ProjectionFn, store: &RecordStore) -> Self {
        let mut keys = Vec::with_capacity(store.len());
        let mut index: BTreeMap<Value, Vec<RecordId>> = BTreeMap::new();

        for record in store.all() {
            let key = projection(record);
            index.entry(key.clone()).or_default().push(record.id());
            keys.push(key);
        }

        Self {
            name: name.to_string(),
            projection,
            keys,
            index,
            filter: None,
            excluded: RecordBitmap::with_capacity(store.len()),
        }
    }

    /// Dimension name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply the projection to a record
    pub fn project(&self, record: &Record) -> Value {
        (self.projection)(record)
    }

    /// Cached key of a record
    pub fn key(&self, id: RecordId) -> Option<&Value> {
        self.keys.get(id as usize)
    }

    /// Active predicate, if any
    pub fn filter(&self) -> Option<&Predicate> {
        self.filter.as_ref()
    }

    /// Whether a record passes this dimension's filter
    pub fn matches(&self, id: RecordId) -> bool {
        !self.excluded.contains(id)
    }

    /// Bitmap of records excluded by the filter
    pub fn excluded(&self) -> &RecordBitmap {
        &self.excluded
    }

    /// Distinct keys in ascending order
    pub fn keys(&self) -> impl DoubleEndedIterator<Item = &Value> {
        self.index.keys()
    }

    /// Record ids under a key
    pub fn members(&self, key: &Value) -> &[RecordId] {
        self.index.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `(key, members)` pairs in ascending key order
    pub fn entries(&self) -> impl DoubleEndedIterator<Item = (&Value, &[RecordId])> {
        self.index.iter().map(|(k, ids)| (k, ids.as_slice()))
    }

    /// Number of distinct keys
    pub fn cardinality(&self) -> usize {
        self.index.len()
    }

    /// Replace the filter and return the records whose match status flipped
    ///
    /// A malformed predicate is rejected before anything changes.
    pub fn set_filter(&mut self, predicate: Option<Predicate>) -> Result<FilterDelta, FilterError> {
        if let Some(p) = &predicate {
            p.validate()?;
        }

        let mut delta = FilterDelta::default();
        for key in self.candidate_keys(self.filter.as_ref(), predicate.as_ref()) {
            let was = Self::admits(self.filter.as_ref(), key);
            let now = Self::admits(predicate.as_ref(), key);
            if was == now {
                continue;
            }
            let members = self.index.get(key).map(Vec::as_slice).unwrap_or(&[]);
            if now {
                delta.entered.extend_from_slice(members);
            } else {
                delta.exited.extend_from_slice(members);
            }
        }

        for &id in &delta.entered {
            self.excluded.clear(id);
        }
        for &id in &delta.exited {
            self.excluded.set(id);
        }
        self.filter = predicate;

        Ok(delta)
    }

    fn admits(predicate: Option<&Predicate>, key: &Value) -> bool {
        predicate.map(|p| p.matches(key)).unwrap_or(true)
    }

    /// Index keys whose status can differ between `old` and `new`
    ///
    /// Keys selected by neither predicate cannot flip. When either side is
    /// unfiltered every key is a candidate.
    fn candidate_keys<'a>(
        &'a self,
        old: Option<&'a Predicate>,
        new: Option<&'a Predicate>,
    ) -> Vec<&'a Value> {
        match (old, new) {
            (None, None) => Vec::new(),
            (Some(a), Some(b)) => {
                let mut keys: BTreeSet<&Value> = self.selected_keys(a).collect();
                keys.extend(self.selected_keys(b));
                keys.into_iter().collect()
            }
            _ => self.index.keys().collect(),
        }
    }

    /// Index keys a predicate selects
    fn selected_keys<'a>(
        &'a self,
        predicate: &'a Predicate,
    ) -> Box<dyn Iterator<Item = &'a Value> + 'a> {
        match predicate {
            Predicate::Set(wanted) => Box::new(
                wanted
                    .iter()
                    .filter_map(move |k| self.index.get_key_value(k).map(|(k, _)| k)),
            ),
            range => match range.bounds() {
                Some(bounds) => Box::new(self.index.range::<Value, _>(bounds).map(|(k, _)| k)),
                None => Box::new(std::iter::empty()),
            },
        }
    }
}

impl fmt::Debug for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dimension")
            .field("name", &self.name)
            .field("keys", &self.index.len())
            .field("filter", &self.filter)
            .field("excluded", &self.excluded.cardinality())
            .finish()
    }
}
