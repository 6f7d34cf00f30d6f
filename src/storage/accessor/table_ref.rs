use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use crate::storage::column::ColumnValue;
use crate::storage::group::GroupShared;
use crate::storage::table::{Table, TableSet};
use crate::types::{DataType, LinkType, ObjKey, Result, TableKey, Timestamp, TramaError, Value};

use super::{ColumnRef, Obj, TableAccessor, TableIter};

/// Counted handle to a group-level table.
///
/// Handles to the same table share one accessor. Every call resolves the
/// table through its group, so a handle fails with [`TramaError::Detached`]
/// once the table is removed or rolled away.
pub struct TableRef {
    shared: Arc<GroupShared>,
    acc: Arc<TableAccessor>,
}

impl TableRef {
    /// Wraps an accessor whose reference count already includes this handle.
    pub(crate) fn from_parts(shared: Arc<GroupShared>, acc: Arc<TableAccessor>) -> Self {
        Self { shared, acc }
    }

    pub(crate) fn accessor(&self) -> &Arc<TableAccessor> {
        &self.acc
    }

    pub(crate) fn shared(&self) -> &Arc<GroupShared> {
        &self.shared
    }

    /// Runs `f` on the table while holding the group state lock.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&Table) -> Result<R>) -> Result<R> {
        self.read_set(|set| f(set.get(self.acc.key())?))
    }

    /// Runs `f` on the whole table arena; used by cross-table reads.
    pub(crate) fn read_set<R>(&self, f: impl FnOnce(&TableSet) -> Result<R>) -> Result<R> {
        let state = self.shared.state.lock();
        if !self.acc.is_attached() || !state.tables.contains(self.acc.key()) {
            return Err(TramaError::Detached);
        }
        f(&state.tables)
    }

    /// Runs a mutation of this table through the arena.
    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut TableSet, TableKey) -> Result<R>) -> Result<R> {
        let mut state = self.shared.state.lock();
        if !self.acc.is_attached() || !state.tables.contains(self.acc.key()) {
            return Err(TramaError::Detached);
        }
        f(&mut state.tables, self.acc.key())
    }

    /// Key of the table within its group.
    pub fn key(&self) -> TableKey {
        self.acc.key()
    }

    /// False once the table was removed or the group dropped.
    pub fn is_attached(&self) -> bool {
        self.acc.is_attached()
    }

    /// Whether the accessor waits for the next refresh.
    pub fn is_marked(&self) -> bool {
        self.acc.is_marked()
    }

    /// Number of live handles sharing this table's accessor.
    pub fn handle_count(&self) -> usize {
        self.acc.ref_count()
    }

    /// True for tables owned directly by a group, which is every table here.
    pub fn is_group_level(&self) -> bool {
        self.is_attached()
    }

    /// Name of the table in its group.
    pub fn name(&self) -> Result<String> {
        let state = self.shared.state.lock();
        if !self.acc.is_attached() {
            return Err(TramaError::Detached);
        }
        state
            .name_of(self.acc.key())
            .map(str::to_owned)
            .ok_or(TramaError::Detached)
    }

    /// Content version; changes whenever this table or a table linked to it
    /// changes.
    pub fn version(&self) -> Result<u64> {
        self.read(|t| Ok(t.version()))
    }

    fn same_group(&self, other: &TableRef) -> Result<()> {
        if Arc::ptr_eq(&self.shared, &other.shared) {
            Ok(())
        } else {
            Err(TramaError::Invalid("tables belong to different groups"))
        }
    }

    // Schema

    /// Number of public columns.
    pub fn column_count(&self) -> Result<usize> {
        self.read(|t| Ok(t.spec().public_column_count()))
    }

    /// Name of column `ndx`.
    pub fn column_name(&self, ndx: usize) -> Result<String> {
        self.read(|t| Ok(t.public_column(ndx)?.name.clone()))
    }

    /// Type of column `ndx`.
    pub fn column_type(&self, ndx: usize) -> Result<DataType> {
        self.read(|t| Ok(t.public_column(ndx)?.ty))
    }

    /// Index of the column called `name`.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.read(|t| {
            t.spec()
                .index_of(name)
                .ok_or_else(|| TramaError::NoSuchColumn(name.to_owned()))
        })
    }

    /// Whether column `ndx` accepts null.
    pub fn is_nullable(&self, ndx: usize) -> Result<bool> {
        self.read(|t| Ok(t.public_column(ndx)?.nullable))
    }

    /// Table that link column `ndx` points into.
    pub fn link_target(&self, ndx: usize) -> Result<TableRef> {
        self.read_set(|set| {
            let target = set
                .get(self.key())?
                .public_column(ndx)?
                .link
                .map(|peer| peer.table)
                .ok_or(TramaError::Invalid("not a link column"))?;
            self.shared.acquire(set, target)
        })
    }

    /// Ownership semantics of link column `ndx`.
    pub fn link_type(&self, ndx: usize) -> Result<LinkType> {
        self.read(|t| {
            t.public_column(ndx)?
                .link
                .map(|peer| peer.link_type)
                .ok_or(TramaError::Invalid("not a link column"))
        })
    }

    /// Changes the ownership semantics of link column `ndx`. Existing links
    /// are kept as they are.
    pub fn set_link_type(&self, ndx: usize, link_type: LinkType) -> Result<()> {
        self.write(|set, tk| set.set_link_type(tk, ndx, link_type))
    }

    /// Appends a non-nullable column and returns its index.
    pub fn add_column(&self, ty: DataType, name: &str) -> Result<usize> {
        self.append_column(ty, name, false)
    }

    /// Appends a nullable column and returns its index.
    pub fn add_column_nullable(&self, ty: DataType, name: &str) -> Result<usize> {
        self.append_column(ty, name, true)
    }

    fn append_column(&self, ty: DataType, name: &str, nullable: bool) -> Result<usize> {
        self.write(|set, tk| {
            let ndx = set.get(tk)?.spec().public_column_count();
            set.insert_column(tk, ndx, ty, name, nullable)?;
            Ok(ndx)
        })
    }

    /// Inserts a column at `ndx`, shifting later columns right.
    pub fn insert_column(&self, ndx: usize, ty: DataType, name: &str, nullable: bool) -> Result<()> {
        self.write(|set, tk| set.insert_column(tk, ndx, ty, name, nullable).map(|_| ()))
    }

    /// Appends a link or link list column into `target` and returns its index.
    pub fn add_column_link(
        &self,
        ty: DataType,
        name: &str,
        target: &TableRef,
        link_type: LinkType,
    ) -> Result<usize> {
        self.same_group(target)?;
        if !target.is_attached() {
            return Err(TramaError::Detached);
        }
        self.write(|set, tk| {
            let ndx = set.get(tk)?.spec().public_column_count();
            set.insert_column_link(tk, ndx, ty, name, target.key(), link_type)?;
            Ok(ndx)
        })
    }

    /// Inserts a link or link list column into `target` at `ndx`.
    pub fn insert_column_link(
        &self,
        ndx: usize,
        ty: DataType,
        name: &str,
        target: &TableRef,
        link_type: LinkType,
    ) -> Result<()> {
        self.same_group(target)?;
        if !target.is_attached() {
            return Err(TramaError::Detached);
        }
        self.write(|set, tk| {
            set.insert_column_link(tk, ndx, ty, name, target.key(), link_type)
                .map(|_| ())
        })
    }

    /// Removes column `ndx`; column handles bound to it are detached.
    pub fn remove_column(&self, ndx: usize) -> Result<()> {
        let col = self.write(|set, tk| set.remove_column(tk, ndx))?;
        self.acc.detach_column(col, &*self.shared.metrics);
        Ok(())
    }

    /// Renames column `ndx`.
    pub fn rename_column(&self, ndx: usize, name: &str) -> Result<()> {
        self.write(|set, tk| set.rename_column(tk, ndx, name))
    }

    /// Handle to column `ndx` that follows the column when others move.
    pub fn column(&self, ndx: usize) -> Result<ColumnRef> {
        let col = self.read(|t| Ok(t.public_column(ndx)?.key))?;
        Ok(ColumnRef::new(self.clone(), col))
    }

    // Objects

    /// Number of objects.
    pub fn size(&self) -> Result<usize> {
        self.read(|t| Ok(t.size()))
    }

    /// True when the table holds no objects.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.size()? == 0)
    }

    /// Creates an object with the next free key.
    pub fn create_object(&self) -> Result<Obj> {
        self.create_object_with_key(ObjKey::NULL)
    }

    /// Creates an object with `key`, or with the next free key when `key`
    /// is null.
    pub fn create_object_with_key(&self, key: ObjKey) -> Result<Obj> {
        let key = self.write(|set, tk| set.create_object(tk, key))?;
        Ok(Obj::new(self.clone(), key))
    }

    /// Creates `count` objects and returns their keys in creation order.
    pub fn create_objects(&self, count: usize) -> Result<Vec<ObjKey>> {
        self.write(|set, tk| set.create_objects(tk, count))
    }

    /// Creates one object per key, all or nothing.
    pub fn create_objects_with_keys(&self, keys: &[ObjKey]) -> Result<()> {
        self.write(|set, tk| set.create_objects_with_keys(tk, keys))
    }

    /// Handle to object `key`.
    pub fn get_object(&self, key: ObjKey) -> Result<Obj> {
        self.read(|t| t.locate(key).map(|_| ()))?;
        Ok(Obj::new(self.clone(), key))
    }

    /// True if object `key` exists. Detached tables hold nothing.
    pub fn is_valid(&self, key: ObjKey) -> bool {
        self.read(|t| Ok(t.is_valid(key))).unwrap_or(false)
    }

    /// Removes object `key`. Links into it are nullified; nothing cascades.
    pub fn remove_object(&self, key: ObjKey) -> Result<()> {
        self.write(|set, tk| set.remove_object(tk, key))
    }

    /// Removes object `key` and every object left without a strong
    /// incoming link as a result.
    pub fn remove_object_recursive(&self, key: ObjKey) -> Result<()> {
        self.write(|set, tk| set.remove_object_recursive(tk, key))
    }

    /// Removes every object.
    pub fn clear(&self) -> Result<()> {
        self.write(|set, tk| set.clear(tk))
    }

    /// Keys of all objects in ascending order.
    pub fn object_keys(&self) -> Result<Vec<ObjKey>> {
        self.read(|t| Ok(t.clusters().keys().collect()))
    }

    /// Iterator over the objects in key order.
    pub fn iter(&self) -> TableIter {
        TableIter::new(self.clone())
    }

    /// Calls `visit` with every object key in order until it breaks.
    /// Returns true when stopped early.
    ///
    /// Keys are fetched one leaf at a time and the lock is released before
    /// `visit` runs, so the callback may use this handle.
    pub fn traverse<F>(&self, mut visit: F) -> Result<bool>
    where
        F: FnMut(ObjKey) -> ControlFlow<()>,
    {
        let mut from = ObjKey(i64::MIN);
        loop {
            let batch = self.read(|t| Ok(t.clusters().leaf_keys_from(from)))?;
            let Some(&last) = batch.last() else {
                return Ok(false);
            };
            if batch.into_iter().any(|key| visit(key).is_break()) {
                return Ok(true);
            }
            match last.0.checked_add(1) {
                Some(next) => from = ObjKey(next),
                None => return Ok(false),
            }
        }
    }

    // Aggregates and search

    /// Number of objects whose column `ndx` equals `value`.
    pub fn count<T: ColumnValue + PartialEq>(&self, ndx: usize, value: T) -> Result<usize> {
        self.read(|t| t.count(ndx, Some(&value)))
    }

    /// Number of null cells in column `ndx`, which must hold `T`.
    pub fn count_null<T: ColumnValue + PartialEq>(&self, ndx: usize) -> Result<usize> {
        self.read(|t| t.count::<T>(ndx, None))
    }

    /// Number of objects whose integer column `ndx` equals `value`.
    pub fn count_int(&self, ndx: usize, value: i64) -> Result<usize> {
        self.count(ndx, value)
    }

    /// Number of objects whose string column `ndx` equals `value`.
    pub fn count_string(&self, ndx: usize, value: &str) -> Result<usize> {
        self.count(ndx, value.to_owned())
    }

    /// Number of objects whose float column `ndx` equals `value`.
    pub fn count_float(&self, ndx: usize, value: f32) -> Result<usize> {
        self.count(ndx, value)
    }

    /// Number of objects whose double column `ndx` equals `value`.
    pub fn count_double(&self, ndx: usize, value: f64) -> Result<usize> {
        self.count(ndx, value)
    }

    /// Wrapping sum of the non-null cells of integer column `ndx`.
    pub fn sum_int(&self, ndx: usize) -> Result<i64> {
        self.read(|t| t.sum_int(ndx))
    }

    /// Sum of float column `ndx`, accumulated in double precision.
    pub fn sum_float(&self, ndx: usize) -> Result<f64> {
        self.read(|t| t.sum_with::<f32, _>(ndx, |v| f64::from(*v)).map(|(sum, _)| sum))
    }

    /// Sum of double column `ndx`.
    pub fn sum_double(&self, ndx: usize) -> Result<f64> {
        self.read(|t| t.sum_with::<f64, _>(ndx, |v| *v).map(|(sum, _)| sum))
    }

    /// Mean of integer column `ndx`; `None` without non-null cells.
    pub fn average_int(&self, ndx: usize) -> Result<Option<f64>> {
        self.read(|t| t.average_with::<i64, _>(ndx, |v| *v as f64))
    }

    /// Mean of float column `ndx`.
    pub fn average_float(&self, ndx: usize) -> Result<Option<f64>> {
        self.read(|t| t.average_with::<f32, _>(ndx, |v| f64::from(*v)))
    }

    /// Mean of double column `ndx`.
    pub fn average_double(&self, ndx: usize) -> Result<Option<f64>> {
        self.read(|t| t.average_with::<f64, _>(ndx, |v| *v))
    }

    /// Smallest non-null value of column `ndx` and the first object holding it.
    pub fn minimum<T: ColumnValue + PartialOrd>(&self, ndx: usize) -> Result<Option<(T, ObjKey)>> {
        self.read(|t| t.minimum(ndx))
    }

    /// Largest non-null value of column `ndx` and the first object holding it.
    pub fn maximum<T: ColumnValue + PartialOrd>(&self, ndx: usize) -> Result<Option<(T, ObjKey)>> {
        self.read(|t| t.maximum(ndx))
    }

    /// Smallest value of integer column `ndx`.
    pub fn minimum_int(&self, ndx: usize) -> Result<Option<i64>> {
        Ok(self.minimum::<i64>(ndx)?.map(|(v, _)| v))
    }

    /// Largest value of integer column `ndx`.
    pub fn maximum_int(&self, ndx: usize) -> Result<Option<i64>> {
        Ok(self.maximum::<i64>(ndx)?.map(|(v, _)| v))
    }

    /// Smallest value of float column `ndx`.
    pub fn minimum_float(&self, ndx: usize) -> Result<Option<f32>> {
        Ok(self.minimum::<f32>(ndx)?.map(|(v, _)| v))
    }

    /// Largest value of float column `ndx`.
    pub fn maximum_float(&self, ndx: usize) -> Result<Option<f32>> {
        Ok(self.maximum::<f32>(ndx)?.map(|(v, _)| v))
    }

    /// Smallest value of double column `ndx`.
    pub fn minimum_double(&self, ndx: usize) -> Result<Option<f64>> {
        Ok(self.minimum::<f64>(ndx)?.map(|(v, _)| v))
    }

    /// Largest value of double column `ndx`.
    pub fn maximum_double(&self, ndx: usize) -> Result<Option<f64>> {
        Ok(self.maximum::<f64>(ndx)?.map(|(v, _)| v))
    }

    /// Earliest value of timestamp column `ndx`.
    pub fn minimum_timestamp(&self, ndx: usize) -> Result<Option<Timestamp>> {
        Ok(self.minimum::<Timestamp>(ndx)?.map(|(v, _)| v))
    }

    /// Latest value of timestamp column `ndx`.
    pub fn maximum_timestamp(&self, ndx: usize) -> Result<Option<Timestamp>> {
        Ok(self.maximum::<Timestamp>(ndx)?.map(|(v, _)| v))
    }

    /// First object, in key order, whose column `ndx` equals `value`.
    pub fn find_first<T: ColumnValue + PartialEq>(&self, ndx: usize, value: T) -> Result<Option<ObjKey>> {
        self.read(|t| t.find_first(ndx, Some(&value)))
    }

    /// Every object whose column `ndx` equals `value`, in key order.
    pub fn find_all<T: ColumnValue + PartialEq>(&self, ndx: usize, value: T) -> Result<Vec<ObjKey>> {
        self.read(|t| t.find_all(ndx, Some(&value)))
    }

    /// First object with integer `value` in column `ndx`.
    pub fn find_first_int(&self, ndx: usize, value: i64) -> Result<Option<ObjKey>> {
        self.find_first(ndx, value)
    }

    /// First object with boolean `value` in column `ndx`.
    pub fn find_first_bool(&self, ndx: usize, value: bool) -> Result<Option<ObjKey>> {
        self.find_first(ndx, value)
    }

    /// First object with float `value` in column `ndx`.
    pub fn find_first_float(&self, ndx: usize, value: f32) -> Result<Option<ObjKey>> {
        self.find_first(ndx, value)
    }

    /// First object with double `value` in column `ndx`.
    pub fn find_first_double(&self, ndx: usize, value: f64) -> Result<Option<ObjKey>> {
        self.find_first(ndx, value)
    }

    /// First object with string `value` in column `ndx`.
    pub fn find_first_string(&self, ndx: usize, value: &str) -> Result<Option<ObjKey>> {
        self.find_first(ndx, value.to_owned())
    }

    /// First object with binary `value` in column `ndx`.
    pub fn find_first_binary(&self, ndx: usize, value: &[u8]) -> Result<Option<ObjKey>> {
        self.find_first(ndx, value.to_vec())
    }

    /// First object with timestamp `value` in column `ndx`.
    pub fn find_first_timestamp(&self, ndx: usize, value: Timestamp) -> Result<Option<ObjKey>> {
        self.find_first(ndx, value)
    }

    /// Every object with integer `value` in column `ndx`.
    pub fn find_all_int(&self, ndx: usize, value: i64) -> Result<Vec<ObjKey>> {
        self.find_all(ndx, value)
    }

    /// Every object with string `value` in column `ndx`.
    pub fn find_all_string(&self, ndx: usize, value: &str) -> Result<Vec<ObjKey>> {
        self.find_all(ndx, value.to_owned())
    }

    /// First object whose column `ndx` is null. Unset links count as null.
    pub fn find_first_null(&self, ndx: usize) -> Result<Option<ObjKey>> {
        self.read(|t| t.find_first_null(ndx))
    }

    /// First object whose link or link list column `ndx` points at `target`.
    pub fn find_first_link(&self, ndx: usize, target: ObjKey) -> Result<Option<ObjKey>> {
        self.read(|t| Ok(t.find_links(ndx, target, true)?.into_iter().next()))
    }

    /// Every object whose link or link list column `ndx` points at `target`.
    pub fn find_all_link(&self, ndx: usize, target: ObjKey) -> Result<Vec<ObjKey>> {
        self.read(|t| t.find_links(ndx, target, false))
    }

    /// First position, in key order, whose value is not below `value`.
    /// Column `ndx` must be sorted ascending.
    pub fn lower_bound<T: ColumnValue + PartialOrd>(&self, ndx: usize, value: T) -> Result<usize> {
        self.read(|t| t.lower_bound(ndx, &value))
    }

    /// First position, in key order, whose value is above `value`.
    /// Column `ndx` must be sorted ascending.
    pub fn upper_bound<T: ColumnValue + PartialOrd>(&self, ndx: usize, value: T) -> Result<usize> {
        self.read(|t| t.upper_bound(ndx, &value))
    }

    /// [`TableRef::lower_bound`] on an integer column.
    pub fn lower_bound_int(&self, ndx: usize, value: i64) -> Result<usize> {
        self.lower_bound(ndx, value)
    }

    /// [`TableRef::upper_bound`] on an integer column.
    pub fn upper_bound_int(&self, ndx: usize, value: i64) -> Result<usize> {
        self.upper_bound(ndx, value)
    }

    /// [`TableRef::lower_bound`] on a string column.
    pub fn lower_bound_string(&self, ndx: usize, value: &str) -> Result<usize> {
        self.lower_bound(ndx, value.to_owned())
    }

    /// [`TableRef::upper_bound`] on a string column.
    pub fn upper_bound_string(&self, ndx: usize, value: &str) -> Result<usize> {
        self.upper_bound(ndx, value.to_owned())
    }

    /// Every cell of column `ndx`, in key order.
    pub fn column_values(&self, ndx: usize) -> Result<Vec<Value>> {
        self.read(|t| t.column_values(ndx))
    }
}

impl Clone for TableRef {
    fn clone(&self) -> Self {
        self.acc.bind();
        Self {
            shared: Arc::clone(&self.shared),
            acc: Arc::clone(&self.acc),
        }
    }
}

impl Drop for TableRef {
    fn drop(&mut self) {
        if self.acc.unbind() {
            self.shared.release(&self.acc);
        }
    }
}

impl PartialEq for TableRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared) && self.key() == other.key()
    }
}

impl Eq for TableRef {}

impl fmt::Debug for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableRef")
            .field("key", &self.key())
            .field("attached", &self.is_attached())
            .finish()
    }
}
