//! In-process per-group locks
//!
//! `save` and `archive` of the same group are serialized inside one process so
//! a record can never be written into a directory that is being moved. Scans
//! take no lock, and nothing here coordinates separate processes.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::layout::GroupName;

/// Table of per-group mutexes. Entries are dropped once no caller holds them.
#[derive(Default)]
pub struct GroupLocks {
    table: Mutex<HashMap<GroupName, Arc<Mutex<()>>>>,
}

impl GroupLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self { table: Mutex::new(HashMap::new()) }
    }

    /// Run `f` while holding the lock for `group`.
    pub fn with_group<R>(&self, group: &GroupName, f: impl FnOnce() -> R) -> R {
        let entry = {
            let mut table = self.table.lock();
            Arc::clone(table.entry(group.clone()).or_default())
        };

        let result = {
            let _guard = entry.lock();
            f()
        };

        let mut table = self.table.lock();
        // table + `entry` are the only owners: nobody else is waiting on this group
        if Arc::strong_count(&entry) == 2 {
            table.remove(group);
        }
        result
    }

    /// Number of groups currently tracked.
    pub fn tracked(&self) -> usize {
        self.table.lock().len()
    }
}
