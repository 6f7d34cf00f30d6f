use std::fmt;
use std::sync::Arc;

use crate::storage::spec::ColumnSpec;
use crate::storage::table::Table;
use crate::types::{ColKey, DataType, LinkType, Result, TramaError, Value};

use super::{ColumnAnchor, TableRef};

/// Handle to one public column, bound by its stable key.
///
/// The handle follows the column when other columns are inserted or removed
/// before it, and detaches when its own column is removed.
pub struct ColumnRef {
    table: TableRef,
    anchor: Arc<ColumnAnchor>,
}

impl ColumnRef {
    pub(crate) fn new(table: TableRef, col: ColKey) -> Self {
        let anchor = table.accessor().register_column(col);
        Self { table, anchor }
    }

    /// Stable key of the column.
    pub fn key(&self) -> ColKey {
        self.anchor.col()
    }

    /// Table holding the column.
    pub fn table(&self) -> &TableRef {
        &self.table
    }

    /// False once the column or its table is gone.
    pub fn is_attached(&self) -> bool {
        self.anchor.is_attached()
    }

    fn resolve<R>(&self, f: impl FnOnce(&Table, usize, &ColumnSpec) -> Result<R>) -> Result<R> {
        if !self.anchor.is_attached() {
            return Err(TramaError::Detached);
        }
        self.table.read(|t| {
            let ndx = t
                .spec()
                .position(self.key())
                .filter(|&ndx| ndx < t.spec().public_column_count())
                .ok_or(TramaError::Detached)?;
            f(t, ndx, t.spec().column(ndx))
        })
    }

    /// Current public index of the column.
    pub fn index(&self) -> Result<usize> {
        self.resolve(|_, ndx, _| Ok(ndx))
    }

    /// Current name of the column.
    pub fn name(&self) -> Result<String> {
        self.resolve(|_, _, col| Ok(col.name.clone()))
    }

    /// Type of the column.
    pub fn data_type(&self) -> Result<DataType> {
        self.resolve(|_, _, col| Ok(col.ty))
    }

    /// Whether the column accepts null.
    pub fn is_nullable(&self) -> Result<bool> {
        self.resolve(|_, _, col| Ok(col.nullable))
    }

    /// Ownership semantics, for link columns.
    pub fn link_type(&self) -> Result<Option<LinkType>> {
        self.resolve(|_, _, col| Ok(col.link.map(|peer| peer.link_type)))
    }

    /// Every cell of the column, in key order.
    pub fn values(&self) -> Result<Vec<Value>> {
        self.resolve(|t, ndx, _| t.column_values(ndx))
    }
}

impl Clone for ColumnRef {
    fn clone(&self) -> Self {
        ColumnRef::new(self.table.clone(), self.key())
    }
}

impl Drop for ColumnRef {
    fn drop(&mut self) {
        self.table.accessor().unregister_column(&self.anchor);
    }
}

impl fmt::Debug for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnRef")
            .field("table", &self.table.key())
            .field("col", &self.key())
            .field("attached", &self.is_attached())
            .finish()
    }
}
