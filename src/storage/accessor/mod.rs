//! Accessor lifecycle: handles bound to tables, rows and columns.
//!
//! A [`TableRef`] is a counted handle to a [`TableAccessor`] cached by the
//! group. Row ([`Obj`]) and column ([`ColumnRef`]) handles register weak
//! anchors in the accessor's registry so a table detach reaches them all.
//! Accessors are attached while their table lives in the group; detach is
//! terminal and idempotent.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::storage::metrics::StorageMetrics;
use crate::storage::table::Table;
use crate::types::{ColKey, ObjKey, TableKey};

mod column_ref;
mod iter;
mod obj;
mod table_ref;

pub use column_ref::ColumnRef;
pub use iter::TableIter;
pub use obj::Obj;
pub use table_ref::TableRef;

/// Liveness of one row handle.
#[derive(Debug)]
pub(crate) struct RowAnchor {
    id: u64,
    key: ObjKey,
    attached: AtomicBool,
}

impl RowAnchor {
    pub(crate) fn key(&self) -> ObjKey {
        self.key
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    fn detach(&self) -> bool {
        self.attached.swap(false, Ordering::AcqRel)
    }
}

/// Liveness of one column handle, bound by stable column key.
#[derive(Debug)]
pub(crate) struct ColumnAnchor {
    id: u64,
    col: ColKey,
    attached: AtomicBool,
}

impl ColumnAnchor {
    pub(crate) fn col(&self) -> ColKey {
        self.col
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    fn detach(&self) -> bool {
        self.attached.swap(false, Ordering::AcqRel)
    }
}

#[derive(Default)]
struct AccessorRegistry {
    next_id: u64,
    rows: FxHashMap<u64, Weak<RowAnchor>>,
    columns: FxHashMap<u64, Weak<ColumnAnchor>>,
}

impl AccessorRegistry {
    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// Shared state behind every [`TableRef`] to one table.
pub(crate) struct TableAccessor {
    key: TableKey,
    ref_count: AtomicUsize,
    attached: AtomicBool,
    marked: AtomicBool,
    registry: Mutex<AccessorRegistry>,
}

impl TableAccessor {
    /// Creates an attached accessor with one reference.
    pub(crate) fn new(key: TableKey) -> Arc<Self> {
        Arc::new(Self {
            key,
            ref_count: AtomicUsize::new(1),
            attached: AtomicBool::new(true),
            marked: AtomicBool::new(false),
            registry: Mutex::new(AccessorRegistry::default()),
        })
    }

    pub(crate) fn key(&self) -> TableKey {
        self.key
    }

    pub(crate) fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    pub(crate) fn bind(&self) {
        self.ref_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Drops one reference; true when it was the last.
    pub(crate) fn unbind(&self) -> bool {
        if self.ref_count.fetch_sub(1, Ordering::Release) == 1 {
            std::sync::atomic::fence(Ordering::Acquire);
            true
        } else {
            false
        }
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    pub(crate) fn is_marked(&self) -> bool {
        self.marked.load(Ordering::Acquire)
    }

    pub(crate) fn mark(&self) {
        self.marked.store(true, Ordering::Release);
    }

    pub(crate) fn unmark(&self) {
        self.marked.store(false, Ordering::Release);
    }

    /// Detaches this accessor and every row and column handle registered
    /// with it. Calling it again does nothing.
    pub(crate) fn detach(&self, metrics: &dyn StorageMetrics) {
        if !self.attached.swap(false, Ordering::AcqRel) {
            return;
        }
        let mut registry = self.registry.lock();
        let mut detached = 1;
        for anchor in registry.rows.values().filter_map(Weak::upgrade) {
            if anchor.detach() {
                detached += 1;
            }
        }
        for anchor in registry.columns.values().filter_map(Weak::upgrade) {
            if anchor.detach() {
                detached += 1;
            }
        }
        registry.rows.clear();
        registry.columns.clear();
        for _ in 0..detached {
            metrics.accessor_detached();
        }
        trace!(table = %self.key, accessors = detached, "accessor.table.detached");
    }

    pub(crate) fn register_row(&self, key: ObjKey) -> Arc<RowAnchor> {
        let mut registry = self.registry.lock();
        let id = registry.alloc_id();
        let anchor = Arc::new(RowAnchor {
            id,
            key,
            attached: AtomicBool::new(self.is_attached()),
        });
        registry.rows.insert(id, Arc::downgrade(&anchor));
        anchor
    }

    pub(crate) fn unregister_row(&self, anchor: &RowAnchor) {
        self.registry.lock().rows.remove(&anchor.id);
    }

    pub(crate) fn register_column(&self, col: ColKey) -> Arc<ColumnAnchor> {
        let mut registry = self.registry.lock();
        let id = registry.alloc_id();
        let anchor = Arc::new(ColumnAnchor {
            id,
            col,
            attached: AtomicBool::new(self.is_attached()),
        });
        registry.columns.insert(id, Arc::downgrade(&anchor));
        anchor
    }

    pub(crate) fn unregister_column(&self, anchor: &ColumnAnchor) {
        self.registry.lock().columns.remove(&anchor.id);
    }

    /// Detaches column handles bound to `col`.
    pub(crate) fn detach_column(&self, col: ColKey, metrics: &dyn StorageMetrics) {
        let registry = self.registry.lock();
        for anchor in registry.columns.values().filter_map(Weak::upgrade) {
            if anchor.col == col && anchor.detach() {
                metrics.accessor_detached();
            }
        }
    }

    /// Re-resolves registered handles against a rebuilt table: rows whose key
    /// is gone and columns no longer in the public schema are detached.
    pub(crate) fn refresh(&self, table: &Table, metrics: &dyn StorageMetrics) {
        let registry = self.registry.lock();
        let mut detached = 0;
        for anchor in registry.rows.values().filter_map(Weak::upgrade) {
            if !table.is_valid(anchor.key) && anchor.detach() {
                detached += 1;
            }
        }
        let public = table.spec().public_column_count();
        for anchor in registry.columns.values().filter_map(Weak::upgrade) {
            let live = table.spec().position(anchor.col).map_or(false, |pos| pos < public);
            if !live && anchor.detach() {
                detached += 1;
            }
        }
        for _ in 0..detached {
            metrics.accessor_detached();
        }
        trace!(table = %self.key, detached, "accessor.table.refreshed");
    }

    #[cfg(test)]
    pub(crate) fn registered(&self) -> (usize, usize) {
        let registry = self.registry.lock();
        (registry.rows.len(), registry.columns.len())
    }
}
