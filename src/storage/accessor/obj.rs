use std::fmt;
use std::sync::Arc;

use crate::storage::column::ColumnValue;
use crate::storage::table::{Table, TableSet};
use crate::types::{DataType, ObjKey, Result, TableKey, TramaError, Value};

use super::{RowAnchor, TableRef};

/// Handle to one object, bound by key.
///
/// The handle stays valid until its table is detached or a refresh finds the
/// object gone. Removing the object directly does not detach the handle;
/// calls on it then fail with [`TramaError::KeyNotFound`].
pub struct Obj {
    table: TableRef,
    anchor: Arc<RowAnchor>,
}

impl Obj {
    pub(crate) fn new(table: TableRef, key: ObjKey) -> Self {
        let anchor = table.accessor().register_row(key);
        Self { table, anchor }
    }

    /// Key of the object.
    pub fn key(&self) -> ObjKey {
        self.anchor.key()
    }

    /// Table holding the object.
    pub fn table(&self) -> &TableRef {
        &self.table
    }

    /// Whether the handle is attached and the object still exists.
    pub fn is_valid(&self) -> bool {
        self.anchor.is_attached() && self.table.is_valid(self.key())
    }

    fn check(&self) -> Result<()> {
        if self.anchor.is_attached() {
            Ok(())
        } else {
            Err(TramaError::Detached)
        }
    }

    fn read<R>(&self, f: impl FnOnce(&Table, ObjKey) -> Result<R>) -> Result<R> {
        self.check()?;
        self.table.read(|t| f(t, self.key()))
    }

    fn read_set<R>(&self, f: impl FnOnce(&TableSet, TableKey, ObjKey) -> Result<R>) -> Result<R> {
        self.check()?;
        self.table.read_set(|set| f(set, self.table.key(), self.key()))
    }

    fn write<R>(&self, f: impl FnOnce(&mut TableSet, TableKey, ObjKey) -> Result<R>) -> Result<R> {
        self.check()?;
        self.table.write(|set, tk| f(set, tk, self.key()))
    }

    /// Typed read of column `ndx`; `None` for a null cell.
    pub fn get<T: ColumnValue>(&self, ndx: usize) -> Result<Option<T>> {
        self.read(|t, key| {
            t.typed_column(ndx, T::TYPE)?;
            let pos = t.locate(key)?;
            Ok(T::cells(t.cell(pos, ndx)).and_then(|cells| cells[pos.row].clone()))
        })
    }

    /// Untyped read of column `ndx`.
    pub fn get_value(&self, ndx: usize) -> Result<Value> {
        self.read(|t, key| t.get_value(key, ndx))
    }

    /// Typed write of column `ndx`.
    pub fn set<T: ColumnValue>(&self, ndx: usize, value: T) -> Result<()> {
        self.write(|set, tk, key| {
            set.get(tk)?.typed_column(ndx, T::TYPE)?;
            set.set_value(tk, key, ndx, value.into_value())
        })
    }

    /// Untyped write of column `ndx`. [`Value::Link`] goes through
    /// [`Obj::set_link`]; link lists are edited with the `list_*` methods.
    pub fn set_value(&self, ndx: usize, value: Value) -> Result<()> {
        self.write(|set, tk, key| set.set_value(tk, key, ndx, value))
    }

    /// Writes null to column `ndx`, which must be nullable or a single link.
    pub fn set_null(&self, ndx: usize) -> Result<()> {
        self.write(|set, tk, key| {
            if set.get(tk)?.public_column(ndx)?.ty == DataType::Link {
                set.set_link(tk, key, ndx, ObjKey::NULL)
            } else {
                set.set_value(tk, key, ndx, Value::Null)
            }
        })
    }

    /// True if column `ndx` is null. Unset links are null; link lists never are.
    pub fn is_null(&self, ndx: usize) -> Result<bool> {
        self.read(|t, key| t.is_null(key, ndx))
    }

    /// Target of link column `ndx`; the null key when unset.
    pub fn get_link(&self, ndx: usize) -> Result<ObjKey> {
        self.read_set(|set, tk, key| set.get_link(tk, key, ndx))
    }

    /// Handle to the target of link column `ndx`, if set.
    pub fn get_linked_object(&self, ndx: usize) -> Result<Option<Obj>> {
        let found = self.read_set(|set, tk, key| {
            let peer = set
                .get(tk)?
                .public_column(ndx)?
                .link
                .ok_or(TramaError::Invalid("not a link column"))?;
            let target = set.get_link(tk, key, ndx)?;
            if target.is_null() {
                return Ok(None);
            }
            Ok(Some((self.table.shared().acquire(set, peer.table)?, target)))
        })?;
        Ok(found.map(|(table, target)| Obj::new(table, target)))
    }

    /// Points link column `ndx` at `target`. Breaking a strong link may
    /// remove the old target.
    pub fn set_link(&self, ndx: usize, target: ObjKey) -> Result<()> {
        self.write(|set, tk, key| set.set_link(tk, key, ndx, target))
    }

    /// Clears link column `ndx`.
    pub fn nullify_link(&self, ndx: usize) -> Result<()> {
        self.set_link(ndx, ObjKey::NULL)
    }

    /// Number of entries in link list column `ndx`.
    pub fn list_len(&self, ndx: usize) -> Result<usize> {
        self.read_set(|set, tk, key| set.list_len(tk, key, ndx))
    }

    /// Entry `pos` of link list column `ndx`.
    pub fn list_get(&self, ndx: usize, pos: usize) -> Result<ObjKey> {
        self.read_set(|set, tk, key| set.list_get(tk, key, ndx, pos))
    }

    /// All entries of link list column `ndx`, in list order.
    pub fn list_get_all(&self, ndx: usize) -> Result<Vec<ObjKey>> {
        self.read_set(|set, tk, key| set.list_get_all(tk, key, ndx))
    }

    /// Appends `target` to link list column `ndx`.
    pub fn list_add(&self, ndx: usize, target: ObjKey) -> Result<()> {
        self.write(|set, tk, key| {
            let len = set.list_len(tk, key, ndx)?;
            set.list_insert(tk, key, ndx, len, target)
        })
    }

    /// Inserts `target` at `pos` of link list column `ndx`.
    pub fn list_insert(&self, ndx: usize, pos: usize, target: ObjKey) -> Result<()> {
        self.write(|set, tk, key| set.list_insert(tk, key, ndx, pos, target))
    }

    /// Replaces entry `pos` of link list column `ndx`.
    pub fn list_set(&self, ndx: usize, pos: usize, target: ObjKey) -> Result<()> {
        self.write(|set, tk, key| set.list_set(tk, key, ndx, pos, target))
    }

    /// Removes entry `pos` of link list column `ndx`.
    pub fn list_remove(&self, ndx: usize, pos: usize) -> Result<()> {
        self.write(|set, tk, key| set.list_remove(tk, key, ndx, pos))
    }

    /// Removes every entry of link list column `ndx`.
    pub fn list_clear(&self, ndx: usize) -> Result<()> {
        self.write(|set, tk, key| set.list_clear(tk, key, ndx))
    }

    /// Objects of `origin` linking here through its column `origin_ndx`, one
    /// entry per link.
    pub fn backlinks(&self, origin: &TableRef, origin_ndx: usize) -> Result<Vec<ObjKey>> {
        if !Arc::ptr_eq(origin.shared(), self.table.shared()) {
            return Err(TramaError::Invalid("tables belong to different groups"));
        }
        let origin_key = origin.key();
        self.read_set(|set, tk, key| set.backlinks(tk, key, origin_key, origin_ndx))
    }

    /// Number of links into this object from column `origin_ndx` of `origin`.
    pub fn backlink_count(&self, origin: &TableRef, origin_ndx: usize) -> Result<usize> {
        Ok(self.backlinks(origin, origin_ndx)?.len())
    }

    /// Origin `i` of the links from column `origin_ndx` of `origin`.
    pub fn backlink(&self, origin: &TableRef, origin_ndx: usize, i: usize) -> Result<ObjKey> {
        self.backlinks(origin, origin_ndx)?
            .get(i)
            .copied()
            .ok_or(TramaError::Invalid("backlink index out of range"))
    }

    /// Number of incoming links from every origin column.
    pub fn total_backlink_count(&self) -> Result<usize> {
        self.read(|t, key| t.total_backlink_count(key))
    }

    /// Removes the object, as by [`TableRef::remove_object`].
    pub fn remove(&self) -> Result<()> {
        self.write(|set, tk, key| set.remove_object(tk, key))
    }

    /// Removes the object, as by [`TableRef::remove_object_recursive`].
    pub fn remove_recursive(&self) -> Result<()> {
        self.write(|set, tk, key| set.remove_object_recursive(tk, key))
    }
}

impl Clone for Obj {
    fn clone(&self) -> Self {
        Obj::new(self.table.clone(), self.key())
    }
}

impl Drop for Obj {
    fn drop(&mut self) {
        self.table.accessor().unregister_row(&self.anchor);
    }
}

impl PartialEq for Obj {
    fn eq(&self, other: &Self) -> bool {
        self.table == other.table && self.key() == other.key()
    }
}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Obj")
            .field("table", &self.table.key())
            .field("key", &self.key())
            .field("attached", &self.anchor.is_attached())
            .finish()
    }
}
