//! Thread-safe engine handle
//!
//! A filter change runs start to finish under one write lock, so readers
//! never observe a group mid-update. Reads take the read lock and return
//! owned values.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::types::Value;

use super::engine::{DimensionHandle, Engine, FilterChange, GroupHandle};
use super::filter::Predicate;
use super::reducer::GroupValue;
use super::stats::EngineStatsSnapshot;

/// Cloneable, lock-guarded engine
#[derive(Clone, Debug)]
pub struct SharedEngine {
    inner: Arc<RwLock<Engine>>,
}

impl SharedEngine {
    /// Wrap an engine
    pub fn new(engine: Engine) -> Self {
        Self {
            inner: Arc::new(RwLock::new(engine)),
        }
    }

    /// Run a closure with shared access
    pub fn read<T>(&self, f: impl FnOnce(&Engine) -> T) -> T {
        f(&self.inner.read())
    }

    /// Run a closure with exclusive access
    pub fn write<T>(&self, f: impl FnOnce(&mut Engine) -> T) -> T {
        f(&mut self.inner.write())
    }

    /// Replace a dimension's filter under the write lock
    pub fn set_filter(
        &self,
        dimension: DimensionHandle,
        predicate: Option<Predicate>,
    ) -> Result<FilterChange> {
        self.inner.write().set_filter(dimension, predicate)
    }

    /// Clear every filter under the write lock
    pub fn clear_all_filters(&self) -> Result<Vec<FilterChange>> {
        self.inner.write().clear_all_filters()
    }

    /// Snapshot of a keyed group
    pub fn read_all(&self, group: GroupHandle) -> Result<Vec<(Value, GroupValue)>> {
        self.inner.read().read_all(group)
    }

    /// Snapshot of a global group
    pub fn read_value(&self, group: GroupHandle) -> Result<GroupValue> {
        self.inner.read().read_value(group)
    }

    /// Globally active record count
    pub fn active_count(&self) -> usize {
        self.inner.read().active_count()
    }

    /// Counters snapshot
    pub fn stats(&self) -> EngineStatsSnapshot {
        self.inner.read().stats()
    }
}

impl From<Engine> for SharedEngine {
    fn from(engine: Engine) -> Self {
        Self::new(engine)
    }
}
