//! The parent container of group-level tables.
//!
//! A [`Group`] owns the arena of table records and the cache of table
//! accessors. Table handles resolve through the arena by [`TableKey`] on every
//! call, so removing a table only has to empty its slot and detach its cached
//! accessor.
//!
//! Lock order: table state, then the accessor cache, then a per-table
//! accessor registry.

use std::cell::RefCell;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::storage::accessor::{TableAccessor, TableRef};
use crate::storage::metrics::StorageMetrics;
use crate::storage::options::GroupOptions;
use crate::storage::spec::validate_name;
use crate::storage::table::{Env, TableSet};
use crate::types::{Result, TableKey, TramaError};

mod persist;
mod refresh;

use persist::CommittedTable;

type AccessorCache = FxHashMap<TableKey, Arc<TableAccessor>>;

/// Table records plus names, guarded together.
pub(crate) struct GroupState {
    pub(crate) tables: TableSet,
    names: Vec<Option<String>>,
    committed: Vec<CommittedTable>,
}

impl GroupState {
    fn find(&self, name: &str) -> Option<TableKey> {
        self.names
            .iter()
            .position(|n| n.as_deref() == Some(name))
            .map(|ndx| TableKey(ndx as u32))
    }

    pub(crate) fn name_of(&self, key: TableKey) -> Option<&str> {
        self.names.get(key.0 as usize).and_then(|n| n.as_deref())
    }
}

/// State shared by a group and every handle created from it.
pub(crate) struct GroupShared {
    pub(crate) state: Mutex<GroupState>,
    accessors: ReentrantMutex<RefCell<AccessorCache>>,
    pub(crate) metrics: Arc<dyn StorageMetrics>,
}

impl GroupShared {
    /// Returns a handle to table `key`, reusing the cached accessor when one
    /// is alive.
    ///
    /// `tables` must be borrowed from the held state lock, so the table
    /// cannot be removed between the existence check and the handout.
    pub(crate) fn acquire(self: &Arc<Self>, tables: &TableSet, key: TableKey) -> Result<TableRef> {
        if !tables.contains(key) {
            return Err(TramaError::NoSuchTable);
        }
        let guard = self.accessors.lock();
        let mut cache = guard.borrow_mut();
        if let Some(acc) = cache.get(&key) {
            acc.bind();
            return Ok(TableRef::from_parts(Arc::clone(self), Arc::clone(acc)));
        }
        let acc = TableAccessor::new(key);
        cache.insert(key, Arc::clone(&acc));
        trace!(table = %key, "accessor.table.created");
        Ok(TableRef::from_parts(Arc::clone(self), acc))
    }

    /// Called after the last handle to `acc` went away. The count is checked
    /// again under the cache lock: a handle may have been handed out from the
    /// cache in between, in which case the accessor stays.
    pub(crate) fn release(&self, acc: &Arc<TableAccessor>) {
        let guard = self.accessors.lock();
        if acc.ref_count() != 0 {
            return;
        }
        let mut cache = guard.borrow_mut();
        if cache.get(&acc.key()).map_or(false, |cached| Arc::ptr_eq(cached, acc)) {
            cache.remove(&acc.key());
            trace!(table = %acc.key(), "accessor.table.released");
        }
    }

    fn detach_table(&self, key: TableKey) {
        let guard = self.accessors.lock();
        let removed = guard.borrow_mut().remove(&key);
        if let Some(acc) = removed {
            acc.detach(&*self.metrics);
        }
    }

    fn cached(&self) -> Vec<Arc<TableAccessor>> {
        let guard = self.accessors.lock();
        let cache = guard.borrow();
        cache.values().cloned().collect()
    }

    fn cached_accessor(&self, key: TableKey) -> Option<Arc<TableAccessor>> {
        let guard = self.accessors.lock();
        let cache = guard.borrow();
        cache.get(&key).cloned()
    }

    fn detach_all(&self) {
        let guard = self.accessors.lock();
        let drained: Vec<Arc<TableAccessor>> = guard.borrow_mut().drain().map(|(_, acc)| acc).collect();
        for acc in drained {
            acc.detach(&*self.metrics);
        }
    }
}

/// A set of named tables that may link to each other.
///
/// Handles returned by a group keep working until their table is removed,
/// the group is rolled back past their table's creation, or the group is
/// dropped; from then on they report [`TramaError::Detached`].
pub struct Group {
    shared: Arc<GroupShared>,
}

impl Group {
    /// Creates an empty group with default options.
    pub fn new() -> Self {
        Self::build(GroupOptions::default())
    }

    /// Creates an empty group after validating `opts`.
    pub fn with_options(opts: GroupOptions) -> Result<Self> {
        opts.validate()?;
        Ok(Self::build(opts))
    }

    fn build(opts: GroupOptions) -> Self {
        let env = Env::from_options(&opts);
        Self {
            shared: Arc::new(GroupShared {
                state: Mutex::new(GroupState {
                    tables: TableSet::new(env),
                    names: Vec::new(),
                    committed: Vec::new(),
                }),
                accessors: ReentrantMutex::new(RefCell::new(FxHashMap::default())),
                metrics: opts.metrics,
            }),
        }
    }

    /// Adds an empty table called `name`.
    pub fn add_table(&self, name: &str) -> Result<TableRef> {
        validate_name(name)?;
        let mut state = self.shared.state.lock();
        if state.find(name).is_some() {
            return Err(TramaError::DuplicateTableName(name.to_owned()));
        }
        let key = state.tables.push_table();
        let slots = state.tables.slot_count();
        state.names.resize(slots, None);
        state.names[key.0 as usize] = Some(name.to_owned());
        state.tables.env().repl.insert_table(key, name);
        debug!(table = %key, name, "group.table.added");
        self.shared.acquire(&state.tables, key)
    }

    /// Handle to the table called `name`.
    pub fn get_table(&self, name: &str) -> Result<TableRef> {
        let state = self.shared.state.lock();
        let key = state.find(name).ok_or(TramaError::NoSuchTable)?;
        self.shared.acquire(&state.tables, key)
    }

    /// Handle to the table with key `key`.
    pub fn get_table_by_key(&self, key: TableKey) -> Result<TableRef> {
        let state = self.shared.state.lock();
        self.shared.acquire(&state.tables, key)
    }

    /// Handle to the table called `name`, adding it when missing.
    pub fn get_or_add_table(&self, name: &str) -> Result<TableRef> {
        match self.get_table(name) {
            Err(TramaError::NoSuchTable) => self.add_table(name),
            other => other,
        }
    }

    /// True if a table called `name` exists.
    pub fn has_table(&self, name: &str) -> bool {
        self.shared.state.lock().find(name).is_some()
    }

    /// Number of tables.
    pub fn table_count(&self) -> usize {
        self.shared.state.lock().tables.len()
    }

    /// Keys of all tables in creation order.
    pub fn table_keys(&self) -> Vec<TableKey> {
        self.shared.state.lock().tables.keys()
    }

    /// Name of table `key`.
    pub fn table_name(&self, key: TableKey) -> Result<String> {
        self.shared
            .state
            .lock()
            .name_of(key)
            .map(str::to_owned)
            .ok_or(TramaError::NoSuchTable)
    }

    /// Removes the table called `name`.
    pub fn remove_table(&self, name: &str) -> Result<()> {
        let key = self
            .shared
            .state
            .lock()
            .find(name)
            .ok_or(TramaError::NoSuchTable)?;
        self.remove_table_by_key(key)
    }

    /// Removes table `key`.
    ///
    /// Fails with [`TramaError::CrossTableLinkTarget`] while another table has
    /// a link column into it. Otherwise its objects are removed as by
    /// [`TableRef::clear`], its link columns are dropped together with their
    /// backlink columns, and every handle to it is detached.
    pub fn remove_table_by_key(&self, key: TableKey) -> Result<()> {
        let mut state = self.shared.state.lock();
        if !state.tables.foreign_origins(key)?.is_empty() {
            return Err(TramaError::CrossTableLinkTarget(key));
        }
        state.tables.clear(key)?;
        let links: Vec<usize> = state.tables.get(key)?.spec().forward_link_positions().collect();
        for ndx in links.into_iter().rev() {
            state.tables.remove_column(key, ndx)?;
        }
        state.tables.take(key)?;
        let name = state
            .names
            .get_mut(key.0 as usize)
            .and_then(Option::take)
            .unwrap_or_default();
        state.tables.env().repl.erase_table(key, &name);
        debug!(table = %key, name = %name, "group.table.removed");
        self.shared.detach_table(key);
        Ok(())
    }

    /// Current value of the allocator's global version.
    pub fn global_version(&self) -> u64 {
        self.shared.state.lock().tables.env().alloc.global_version()
    }

    /// Checks link/backlink pairing, backlink entries and the structure of
    /// every object store.
    pub fn verify(&self) -> Result<()> {
        let state = self.shared.state.lock();
        let result = state.tables.verify_links().and_then(|()| {
            for key in state.tables.keys() {
                if state.name_of(key).is_none() {
                    return Err(TramaError::InvariantViolation(format!("table {key} has no name")));
                }
            }
            Ok(())
        });
        if let Err(err) = &result {
            warn!(error = %err, "group.verify.failed");
        }
        result
    }
}

impl Default for Group {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Group {
    fn drop(&mut self) {
        self.shared.detach_all();
        trace!("group.dropped");
    }
}
