//! Parent roll-ups over many-to-one child records
//!
//! Child rows (e.g. contributions) point at a parent id (e.g. an author).
//! A roll-up summarises every child of a parent and stores the summary on
//! each of those children, so a dimension can key on a parent-level
//! property such as "number of working groups this author contributed to".
//!
//! Presence over a known domain uses [`PresenceSet`], a fixed list of keys
//! with one flag each, enumerated in domain order.

use std::collections::{HashMap, HashSet};

use crate::types::Value;

/// A roll-up computed at ingestion and stored on every child record
#[derive(Debug, Clone, PartialEq)]
pub enum Rollup {
    /// Number of distinct `source` values among a parent's children
    DistinctCount {
        /// Output field name
        name: String,
        /// Field holding the parent id
        parent: String,
        /// Field whose distinct values are counted
        source: String,
    },

    /// Present `domain` members among a parent's children, joined in domain order
    CumulativeLabel {
        /// Output field name
        name: String,
        /// Field holding the parent id
        parent: String,
        /// Field whose values are checked against the domain
        source: String,
        /// Known values, in output order
        domain: Vec<Value>,
        /// Separator placed between present members
        separator: String,
    },
}

impl Rollup {
    /// Distinct-count roll-up
    pub fn distinct_count(name: &str, parent: &str, source: &str) -> Self {
        Rollup::DistinctCount {
            name: name.to_string(),
            parent: parent.to_string(),
            source: source.to_string(),
        }
    }

    /// Cumulative-label roll-up
    pub fn cumulative_label<V: Into<Value>>(
        name: &str,
        parent: &str,
        source: &str,
        domain: impl IntoIterator<Item = V>,
        separator: &str,
    ) -> Self {
        Rollup::CumulativeLabel {
            name: name.to_string(),
            parent: parent.to_string(),
            source: source.to_string(),
            domain: domain.into_iter().map(Into::into).collect(),
            separator: separator.to_string(),
        }
    }

    /// Output field name
    pub fn name(&self) -> &str {
        match self {
            Rollup::DistinctCount { name, .. } | Rollup::CumulativeLabel { name, .. } => name,
        }
    }

    /// Fields this roll-up reads
    pub fn inputs(&self) -> [&str; 2] {
        match self {
            Rollup::DistinctCount { parent, source, .. }
            | Rollup::CumulativeLabel { parent, source, .. } => [parent.as_str(), source.as_str()],
        }
    }

    /// Compute one output value per row
    ///
    /// `parent_at` and `source_at` are positions into each row. Rows with a
    /// null parent get `Value::Null`.
    pub(crate) fn compute(
        &self,
        rows: &[Vec<Value>],
        parent_at: usize,
        source_at: usize,
    ) -> Vec<Value> {
        match self {
            Rollup::DistinctCount { .. } => {
                let mut per_parent: HashMap<&Value, HashSet<&Value>> = HashMap::new();
                for row in rows {
                    let parent = &row[parent_at];
                    if parent.is_null() {
                        continue;
                    }
                    let seen = per_parent.entry(parent).or_default();
                    let source = &row[source_at];
                    if !source.is_null() {
                        seen.insert(source);
                    }
                }

                rows.iter()
                    .map(|row| match per_parent.get(&row[parent_at]) {
                        Some(seen) => Value::Integer(seen.len() as i64),
                        None => Value::Null,
                    })
                    .collect()
            }
            Rollup::CumulativeLabel {
                domain, separator, ..
            } => {
                let mut per_parent: HashMap<&Value, PresenceSet> = HashMap::new();
                for row in rows {
                    let parent = &row[parent_at];
                    if parent.is_null() {
                        continue;
                    }
                    per_parent
                        .entry(parent)
                        .or_insert_with(|| PresenceSet::new(domain.clone()))
                        .mark(&row[source_at]);
                }

                rows.iter()
                    .map(|row| match per_parent.get(&row[parent_at]) {
                        Some(presence) => Value::Text(presence.label(separator)),
                        None => Value::Null,
                    })
                    .collect()
            }
        }
    }
}

/// Presence flags over a fixed, ordered domain
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceSet {
    domain: Vec<Value>,
    present: Vec<bool>,
}

impl PresenceSet {
    /// Create a set with every member absent
    pub fn new(domain: Vec<Value>) -> Self {
        let present = vec![false; domain.len()];
        Self { domain, present }
    }

    /// Mark a value present; returns false if it is outside the domain
    pub fn mark(&mut self, value: &Value) -> bool {
        match self.domain.iter().position(|d| d == value) {
            Some(i) => {
                self.present[i] = true;
                true
            }
            None => false,
        }
    }

    /// Whether a domain member is present
    pub fn contains(&self, value: &Value) -> bool {
        self.domain
            .iter()
            .position(|d| d == value)
            .map(|i| self.present[i])
            .unwrap_or(false)
    }

    /// Number of present members
    pub fn count(&self) -> usize {
        self.present.iter().filter(|p| **p).count()
    }

    /// Present members in domain order
    pub fn members(&self) -> impl Iterator<Item = &Value> {
        self.domain
            .iter()
            .zip(&self.present)
            .filter(|(_, p)| **p)
            .map(|(d, _)| d)
    }

    /// Present members joined by `separator`
    pub fn label(&self, separator: &str) -> String {
        self.members()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(separator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wg_domain() -> Vec<Value> {
        vec!["WG I".into(), "WG II".into(), "WG III".into()]
    }

    #[test]
    fn test_presence_set_label_follows_domain_order() {
        let mut set = PresenceSet::new(wg_domain());
        set.mark(&Value::from("WG III"));
        set.mark(&Value::from("WG I"));
        set.mark(&Value::from("WG I"));

        assert_eq!(set.count(), 2);
        assert_eq!(set.label("+"), "WG I+WG III");
        assert!(set.contains(&Value::from("WG I")));
        assert!(!set.contains(&Value::from("WG II")));
    }

    #[test]
    fn test_presence_set_ignores_out_of_domain() {
        let mut set = PresenceSet::new(wg_domain());
        assert!(!set.mark(&Value::from("SYR")));
        assert_eq!(set.count(), 0);
        assert_eq!(set.label("+"), "");
    }

    #[test]
    fn test_distinct_count_rollup() {
        let rows = vec![
            vec![Value::from(1), Value::from("WG I")],
            vec![Value::from(1), Value::from("WG II")],
            vec![Value::from(1), Value::from("WG I")],
            vec![Value::from(2), Value::from("WG III")],
            vec![Value::Null, Value::from("WG III")],
        ];
        let rollup = Rollup::distinct_count("n", "author", "wg");
        let out = rollup.compute(&rows, 0, 1);
        assert_eq!(
            out,
            vec![
                Value::from(2),
                Value::from(2),
                Value::from(2),
                Value::from(1),
                Value::Null
            ]
        );
    }

    #[test]
    fn test_cumulative_label_rollup() {
        let rows = vec![
            vec![Value::from(1), Value::from("WG II")],
            vec![Value::from(1), Value::from("WG I")],
            vec![Value::from(2), Value::from("WG III")],
        ];
        let rollup = Rollup::cumulative_label("cwg", "author", "wg", wg_domain(), "+");
        let out = rollup.compute(&rows, 0, 1);
        assert_eq!(out[0], Value::from("WG I+WG II"));
        assert_eq!(out[1], Value::from("WG I+WG II"));
        assert_eq!(out[2], Value::from("WG III"));
    }
}
