//! Cross-filter engine
//!
//! The engine owns the record store, every dimension and every group, and
//! implements the cross-filter protocol. Each record carries a fail count:
//! the number of dimensions whose filter currently excludes it. A record is
//! active when its fail count is zero.
//!
//! A group built on dimension `S` ignores `S`'s own filter, so it folds in
//! records whose fail count, less one if `S` excludes them, is zero. When a
//! filter on dimension `D` changes:
//!
//! ```text
//!   D.set_filter(p)  ->  Δ = {entered, exited}
//!        |
//!        v
//!   fail_count[r] -/+ 1 for r in Δ
//!        |
//!        v
//!   for each group G with G.source != D:
//!       entered r:  ignoring-S count now 0  ->  G.add(key(r), r)
//!       exited  r:  ignoring-S count now 1  ->  G.remove(key(r), r)
//! ```
//!
//! Groups on `D` itself are untouched. Work is proportional to |Δ| times
//! the number of groups, independent of the total record count.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{AccumulatorConsistencyError, IngestError, InvalidHandleError, Result};
use crate::metrics;
use crate::store::{Record, RecordStore};
use crate::telemetry::{ConsistencyReport, ConsistencySink, TracingSink};
use crate::types::{RecordId, Value};

use super::dimension::{Dimension, FilterDelta};
use super::filter::Predicate;
use super::group::{Group, GLOBAL_KEY};
use super::reducer::{GroupValue, ParentAccessor, Reducer};
use super::stats::{EngineStats, EngineStatsSnapshot};

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to a registered dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DimensionHandle {
    engine: u64,
    index: usize,
}

impl DimensionHandle {
    /// Position of the dimension within its engine
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Handle to a registered group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupHandle {
    engine: u64,
    index: usize,
}

impl GroupHandle {
    /// Position of the group within its engine
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Outcome of one filter change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterChange {
    /// Records whose match status flipped on the changed dimension
    pub delta: FilterDelta,
    /// Reducer add calls made
    pub reducer_adds: u64,
    /// Reducer remove calls made, including rejected ones
    pub reducer_removes: u64,
}

impl FilterChange {
    /// Total reducer calls
    pub fn reducer_calls(&self) -> u64 {
        self.reducer_adds + self.reducer_removes
    }
}

/// Incremental cross-filter aggregation engine
pub struct Engine {
    id: u64,
    config: EngineConfig,
    store: Arc<RecordStore>,
    dimensions: Vec<Dimension>,
    groups: Vec<Group>,

    /// Dimensions excluding each record, by record id
    fail_counts: Vec<u32>,

    /// Records with a zero fail count
    active_total: usize,

    stats: EngineStats,
    sink: Arc<dyn ConsistencySink>,
}

impl Engine {
    /// Create an engine over a store with default configuration
    pub fn new(store: impl Into<Arc<RecordStore>>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    /// Create an engine with explicit configuration
    pub fn with_config(store: impl Into<Arc<RecordStore>>, config: EngineConfig) -> Self {
        let store = store.into();
        let records = store.len();
        let sink = Arc::new(TracingSink::new(config.monitoring.metrics_enabled));

        if config.monitoring.metrics_enabled {
            metrics::update_records(records);
        }
        info!(records, "Created aggregation engine");

        Self {
            id: NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed),
            config,
            store,
            dimensions: Vec::new(),
            groups: Vec::new(),
            fail_counts: vec![0; records],
            active_total: records,
            stats: EngineStats::new(),
            sink,
        }
    }

    /// Replace the consistency sink
    pub fn with_sink(mut self, sink: Arc<dyn ConsistencySink>) -> Self {
        self.sink = sink;
        self
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The record store
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Counters snapshot
    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register a dimension keyed by a projection of each record
    pub fn register_dimension<F>(&mut self, name: &str, projection: F) -> DimensionHandle
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        let dimension = Dimension::build(name, Arc::new(projection), &self.store);
        info!(
            dimension = name,
            keys = dimension.cardinality(),
            "Registered dimension"
        );

        self.dimensions.push(dimension);
        DimensionHandle {
            engine: self.id,
            index: self.dimensions.len() - 1,
        }
    }

    /// Register a dimension keyed by a stored field
    pub fn register_field_dimension(&mut self, field: &str) -> Result<DimensionHandle> {
        self.require_field(field)?;
        let name = field.to_string();
        Ok(self.register_dimension(field, move |r| r.get(&name).clone()))
    }

    /// Register a group over a dimension, or over the whole store with `None`
    ///
    /// The group is reduced from scratch once, honouring every filter already
    /// set except its own dimension's.
    pub fn register_group(
        &mut self,
        source: Option<DimensionHandle>,
        reducer: impl Into<Reducer>,
    ) -> Result<GroupHandle> {
        let reducer = reducer.into();
        let source = source.map(|h| self.dimension_index(h)).transpose()?;
        match &reducer {
            Reducer::Running(r) => {
                for field in r.measures().iter().filter_map(|m| m.field()) {
                    self.require_field(field)?;
                }
            }
            Reducer::Distinct(d) => {
                if let ParentAccessor::Field(field) = d.accessor() {
                    self.require_field(field)?;
                }
            }
        }

        let kind = reducer.kind();
        let id = self.groups.len();
        let empty = match source {
            Some(s) => Group::new(id, source, reducer, self.dimensions[s].keys()),
            None => Group::new(id, None, reducer, [&GLOBAL_KEY]),
        };
        let group = self.reduce_group(&empty);

        info!(
            group = id,
            kind,
            source = source.map(|s| self.dimensions[s].name()),
            slots = group.len(),
            "Registered group"
        );

        self.groups.push(group);
        Ok(GroupHandle {
            engine: self.id,
            index: id,
        })
    }

    // ========================================================================
    // Filters
    // ========================================================================

    /// Replace a dimension's filter and update every affected group
    ///
    /// A rejected predicate leaves all state untouched.
    pub fn set_filter(
        &mut self,
        dimension: DimensionHandle,
        predicate: Option<Predicate>,
    ) -> Result<FilterChange> {
        let d = self.dimension_index(dimension)?;
        let start = Instant::now();

        let delta = self.dimensions[d].set_filter(predicate)?;
        let (reducer_adds, reducer_removes) = self.apply_delta(d, &delta);

        let elapsed = start.elapsed();
        self.stats
            .record_filter_change(delta.len(), reducer_adds, reducer_removes);
        if self.config.monitoring.metrics_enabled {
            metrics::record_filter_change(
                self.dimensions[d].name(),
                elapsed.as_secs_f64(),
                reducer_adds,
                reducer_removes,
            );
        }

        let dim = &self.dimensions[d];
        let filter = dim
            .filter()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "none".to_string());
        debug!(
            dimension = dim.name(),
            filter = %filter,
            entered = delta.entered.len(),
            exited = delta.exited.len(),
            reducer_adds,
            reducer_removes,
            active = self.active_total,
            elapsed_us = elapsed.as_micros() as u64,
            "Applied filter"
        );

        if self.config.engine.verify_invariants {
            for report in self.verify() {
                self.report(report);
            }
        }

        Ok(FilterChange {
            delta,
            reducer_adds,
            reducer_removes,
        })
    }

    /// Filter a dimension to a single key
    pub fn filter_exact(
        &mut self,
        dimension: DimensionHandle,
        key: impl Into<Value>,
    ) -> Result<FilterChange> {
        self.set_filter(dimension, Some(Predicate::exact(key)))
    }

    /// Filter a dimension to keys in `[low, high)`
    pub fn filter_range(
        &mut self,
        dimension: DimensionHandle,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Result<FilterChange> {
        let predicate = Predicate::range(low, high)?;
        self.set_filter(dimension, Some(predicate))
    }

    /// Remove a dimension's filter
    pub fn clear_filter(&mut self, dimension: DimensionHandle) -> Result<FilterChange> {
        self.set_filter(dimension, None)
    }

    /// Remove every filter, one dimension at a time
    ///
    /// Stops at the first failing dimension; filters cleared before it stay
    /// cleared.
    pub fn clear_all_filters(&mut self) -> Result<Vec<FilterChange>> {
        let filtered: Vec<usize> = (0..self.dimensions.len())
            .filter(|&d| self.dimensions[d].filter().is_some())
            .collect();

        filtered
            .into_iter()
            .map(|index| {
                let handle = DimensionHandle {
                    engine: self.id,
                    index,
                };
                self.set_filter(handle, None)
            })
            .collect()
    }

    /// Current predicate of a dimension
    pub fn filter(&self, dimension: DimensionHandle) -> Result<Option<Predicate>> {
        Ok(self.dimension(dimension)?.filter().cloned())
    }

    fn apply_delta(&mut self, changed: usize, delta: &FilterDelta) -> (u64, u64) {
        let Self {
            store,
            dimensions,
            groups,
            fail_counts,
            active_total,
            stats,
            sink,
            ..
        } = self;

        for &id in &delta.entered {
            let fails = &mut fail_counts[id as usize];
            *fails -= 1;
            if *fails == 0 {
                *active_total += 1;
            }
        }
        for &id in &delta.exited {
            let fails = &mut fail_counts[id as usize];
            if *fails == 0 {
                *active_total -= 1;
            }
            *fails += 1;
        }
        let fail_counts: &[u32] = fail_counts;

        let (mut adds, mut removes) = (0u64, 0u64);
        for group in groups.iter_mut() {
            if group.source() == Some(changed) {
                continue;
            }
            let source = group.source().map(|s| &dimensions[s]);

            for &id in &delta.entered {
                if ignoring_fails(fail_counts, source, id) != 0 {
                    continue;
                }
                let record = &store.all()[id as usize];
                group.add(slot_key(source, id), record);
                adds += 1;
            }

            for &id in &delta.exited {
                if ignoring_fails(fail_counts, source, id) != 1 {
                    continue;
                }
                let record = &store.all()[id as usize];
                let key = slot_key(source, id);
                removes += 1;
                if let Err(error) = group.remove(key, record) {
                    stats.record_consistency_error();
                    sink.report(&ConsistencyReport::in_group(group.id(), key, error));
                }
            }
        }

        (adds, removes)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Every slot of a keyed group in ascending key order
    pub fn read_all(&self, group: GroupHandle) -> Result<Vec<(Value, GroupValue)>> {
        let g = self.group(group)?;
        if g.is_global() {
            return Err(InvalidHandleError::WrongGroupKind {
                group: g.id(),
                expected: "keyed",
            }
            .into());
        }
        Ok(g.entries())
    }

    /// The single value of a global group
    pub fn read_value(&self, group: GroupHandle) -> Result<GroupValue> {
        let g = self.group(group)?;
        if !g.is_global() {
            return Err(InvalidHandleError::WrongGroupKind {
                group: g.id(),
                expected: "global",
            }
            .into());
        }
        g.value(&GLOBAL_KEY).ok_or_else(|| {
            InvalidHandleError::WrongGroupKind {
                group: g.id(),
                expected: "global",
            }
            .into()
        })
    }

    /// Value of one key of a keyed group; `None` for keys the dimension never produced
    pub fn value_at(
        &self,
        group: GroupHandle,
        key: impl Into<Value>,
    ) -> Result<Option<GroupValue>> {
        let g = self.group(group)?;
        if g.is_global() {
            return Err(InvalidHandleError::WrongGroupKind {
                group: g.id(),
                expected: "keyed",
            }
            .into());
        }
        Ok(g.value(&key.into()))
    }

    /// Group entries ranked by primary metric, descending, ties by key
    ///
    /// `k` defaults to `engine.default_top_k`.
    pub fn top_groups(
        &self,
        group: GroupHandle,
        k: Option<usize>,
    ) -> Result<Vec<(Value, GroupValue)>> {
        let g = self.group(group)?;
        let k = k.unwrap_or(self.config.engine.default_top_k);

        let mut ranked = g.ranked();
        // Stable sort keeps ascending key order among equal metrics
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        Ok(ranked
            .into_iter()
            .take(k)
            .filter_map(|(key, _)| g.value(&key).map(|v| (key, v)))
            .collect())
    }

    /// Active records with the highest keys, ties by record id
    pub fn top_records(&self, dimension: DimensionHandle, k: usize) -> Result<Vec<&Record>> {
        let dim = self.dimension(dimension)?;
        Ok(self.take_active(dim.entries().rev(), k))
    }

    /// Active records with the lowest keys, ties by record id
    pub fn bottom_records(&self, dimension: DimensionHandle, k: usize) -> Result<Vec<&Record>> {
        let dim = self.dimension(dimension)?;
        Ok(self.take_active(dim.entries(), k))
    }

    fn take_active<'a>(
        &'a self,
        entries: impl Iterator<Item = (&'a Value, &'a [RecordId])>,
        k: usize,
    ) -> Vec<&'a Record> {
        entries
            .flat_map(|(_, ids)| ids.iter().copied())
            .filter(|&id| self.fail_counts[id as usize] == 0)
            .take(k)
            .map(|id| &self.store.all()[id as usize])
            .collect()
    }

    /// Number of records passing every filter
    pub fn active_count(&self) -> usize {
        self.active_total
    }

    /// Whether a record passes every filter
    pub fn is_active(&self, record: RecordId) -> Result<bool> {
        self.fail_counts
            .get(record as usize)
            .map(|&fails| fails == 0)
            .ok_or_else(|| InvalidHandleError::UnknownRecord(record).into())
    }

    /// Registered dimension
    pub fn dimension(&self, handle: DimensionHandle) -> Result<&Dimension> {
        Ok(&self.dimensions[self.dimension_index(handle)?])
    }

    /// Registered group
    pub fn group(&self, handle: GroupHandle) -> Result<&Group> {
        Ok(&self.groups[self.group_index(handle)?])
    }

    /// Number of registered dimensions
    pub fn dimension_count(&self) -> usize {
        self.dimensions.len()
    }

    /// Number of registered groups
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    // ========================================================================
    // Verification
    // ========================================================================

    /// Reduce a group over all currently eligible records, ignoring its
    /// incremental state
    pub fn reduce_from_scratch(&self, group: GroupHandle) -> Result<Vec<(Value, GroupValue)>> {
        let g = self.group(group)?;
        Ok(self.reduce_group(&g.empty_like()).entries())
    }

    /// Compare every group against a full reduction and check reducer
    /// invariants, without reporting
    pub fn verify(&self) -> Vec<ConsistencyReport> {
        let mut reports = Vec::new();
        for group in &self.groups {
            for (key, error) in group.verify() {
                reports.push(ConsistencyReport::in_group(group.id(), &key, error));
            }

            let expected = self.reduce_group(&group.empty_like());
            for key in group.drift(&expected) {
                let error = AccumulatorConsistencyError::DriftDetected {
                    group: group.id(),
                    key: key.clone(),
                };
                reports.push(ConsistencyReport::in_group(group.id(), &key, error));
            }
        }
        reports
    }

    /// Fold every eligible record into a copy of `empty`
    fn reduce_group(&self, empty: &Group) -> Group {
        let mut group = empty.clone();
        let source = group.source().map(|s| &self.dimensions[s]);

        for record in self.store.all() {
            let id = record.id();
            if ignoring_fails(&self.fail_counts, source, id) == 0 {
                group.add(slot_key(source, id), record);
            }
        }

        self.stats.record_full_recompute();
        group
    }

    fn report(&self, report: ConsistencyReport) {
        self.stats.record_consistency_error();
        self.sink.report(&report);
    }

    // ========================================================================
    // Handles
    // ========================================================================

    fn dimension_index(
        &self,
        handle: DimensionHandle,
    ) -> std::result::Result<usize, InvalidHandleError> {
        if handle.engine != self.id {
            return Err(InvalidHandleError::ForeignHandle);
        }
        if handle.index >= self.dimensions.len() {
            return Err(InvalidHandleError::UnknownDimension(handle.index));
        }
        Ok(handle.index)
    }

    fn group_index(&self, handle: GroupHandle) -> std::result::Result<usize, InvalidHandleError> {
        if handle.engine != self.id {
            return Err(InvalidHandleError::ForeignHandle);
        }
        if handle.index >= self.groups.len() {
            return Err(InvalidHandleError::UnknownGroup(handle.index));
        }
        Ok(handle.index)
    }

    fn require_field(&self, field: &str) -> std::result::Result<(), IngestError> {
        match self.store.schema().position(field) {
            Some(_) => Ok(()),
            None => Err(IngestError::UnknownField {
                field: field.to_string(),
            }),
        }
    }
}

/// Fail count of a record, not counting the source dimension's own filter
fn ignoring_fails(fail_counts: &[u32], source: Option<&Dimension>, id: RecordId) -> u32 {
    let fails = fail_counts[id as usize];
    match source {
        Some(dim) if !dim.matches(id) => fails - 1,
        _ => fails,
    }
}

/// Slot a record lands in for a group with the given source
fn slot_key(source: Option<&Dimension>, id: RecordId) -> &Value {
    source.and_then(|dim| dim.key(id)).unwrap_or(&GLOBAL_KEY)
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.id)
            .field("records", &self.store.len())
            .field("active", &self.active_total)
            .field("dimensions", &self.dimensions)
            .field("groups", &self.groups.len())
            .finish()
    }
}
