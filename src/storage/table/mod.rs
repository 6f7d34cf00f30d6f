//! Table records and the operations that span linked tables.
//!
//! A [`Table`] owns one [`Spec`] and one [`ClusterTree`]. Because link columns
//! pair a forward column in one table with a backlink column in another, every
//! mutating operation is implemented on [`TableSet`], the arena of all tables of
//! a group, split by concern across the submodules:
//!
//! - `schema`: column add/insert/remove/rename and link-type declaration
//! - `objects`: object creation, scalar writes and removal
//! - `links`: link writes, link lists, backlink queries and cascade removal
//! - `aggregate`: read-only scans over one column
//! - `version`: version bumping and propagation along link columns

use std::sync::Arc;

use crate::primitives::alloc::Allocator;
use crate::storage::cluster::{ClusterPos, ClusterTree};
use crate::storage::column::ColumnData;
use crate::storage::key_column::KeyColumn;
use crate::storage::metrics::StorageMetrics;
use crate::storage::options::GroupOptions;
use crate::storage::replication::Replication;
use crate::storage::spec::{ColumnSpec, Spec};
use crate::types::{DataType, ObjKey, Result, TableKey, TramaError, Value};

mod aggregate;
mod links;
mod objects;
mod schema;
mod version;

pub(crate) use links::CascadeState;

/// Collaborators shared by every table of a group.
#[derive(Clone)]
pub(crate) struct Env {
    pub(crate) alloc: Arc<dyn Allocator>,
    pub(crate) repl: Arc<dyn Replication>,
    pub(crate) metrics: Arc<dyn StorageMetrics>,
    pub(crate) propagate_versions: bool,
    pub(crate) max_cluster_size: usize,
}

impl Env {
    pub(crate) fn from_options(opts: &GroupOptions) -> Self {
        Self {
            alloc: Arc::clone(&opts.alloc),
            repl: Arc::clone(&opts.replication),
            metrics: Arc::clone(&opts.metrics),
            propagate_versions: opts.propagate_versions,
            max_cluster_size: opts.max_cluster_size,
        }
    }
}

/// One table: schema, object store, key counter and version.
#[derive(Clone, Debug)]
pub(crate) struct Table {
    key: TableKey,
    spec: Spec,
    clusters: ClusterTree,
    next_key: i64,
    version: u64,
    mark: bool,
}

impl Table {
    pub(crate) fn new(key: TableKey, max_cluster_size: usize) -> Self {
        Self::from_parts(key, Spec::default(), ClusterTree::new(max_cluster_size), 0)
    }

    /// Rebuilds a table from its persisted parts. The version starts at zero
    /// and is brought up to date by the next bump.
    pub(crate) fn from_parts(
        key: TableKey,
        spec: Spec,
        clusters: ClusterTree,
        next_key: i64,
    ) -> Self {
        Self {
            key,
            spec,
            clusters,
            next_key,
            version: 0,
            mark: false,
        }
    }

    pub(crate) fn key(&self) -> TableKey {
        self.key
    }

    pub(crate) fn spec(&self) -> &Spec {
        &self.spec
    }

    pub(crate) fn clusters(&self) -> &ClusterTree {
        &self.clusters
    }

    pub(crate) fn next_key(&self) -> i64 {
        self.next_key
    }

    pub(crate) fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn size(&self) -> usize {
        self.clusters.size()
    }

    pub(crate) fn is_valid(&self, key: ObjKey) -> bool {
        self.clusters.is_valid(key)
    }

    pub(crate) fn locate(&self, key: ObjKey) -> Result<ClusterPos> {
        self.clusters.get(key)
    }

    pub(crate) fn public_column(&self, ndx: usize) -> Result<&ColumnSpec> {
        self.spec.public_column(ndx)
    }

    /// Public column `ndx`, which must be of type `expected`.
    pub(crate) fn typed_column(&self, ndx: usize, expected: DataType) -> Result<&ColumnSpec> {
        let col = self.spec.public_column(ndx)?;
        if col.ty != expected {
            return Err(TramaError::TypeMismatch {
                column: ndx,
                expected,
                actual: col.ty,
            });
        }
        Ok(col)
    }

    pub(crate) fn cell(&self, pos: ClusterPos, col: usize) -> &ColumnData {
        self.clusters.leaf(pos.leaf).column(col)
    }

    fn cell_mut(&mut self, pos: ClusterPos, col: usize) -> &mut ColumnData {
        self.clusters.leaf_mut(pos.leaf).column_mut(col)
    }

    /// Reads public column `ndx` of object `key`.
    pub(crate) fn get_value(&self, key: ObjKey, ndx: usize) -> Result<Value> {
        self.public_column(ndx)?;
        let pos = self.locate(key)?;
        Ok(self.cell(pos, ndx).get(pos.row))
    }

    pub(crate) fn is_null(&self, key: ObjKey, ndx: usize) -> Result<bool> {
        self.public_column(ndx)?;
        let pos = self.locate(key)?;
        Ok(self.cell(pos, ndx).is_null(pos.row))
    }

    /// Link list or backlink cell of object `key` at storage column `col`.
    pub(crate) fn key_list(&self, key: ObjKey, col: usize) -> Result<&KeyColumn> {
        let pos = self.locate(key)?;
        self.cell(pos, col)
            .as_lists()
            .map(|lists| &lists[pos.row])
            .ok_or_else(|| TramaError::InvariantViolation(format!("column {col} holds no key lists")))
    }

    pub(crate) fn key_list_mut(&mut self, key: ObjKey, col: usize) -> Result<&mut KeyColumn> {
        let pos = self.locate(key)?;
        self.cell_mut(pos, col)
            .as_lists_mut()
            .map(|lists| &mut lists[pos.row])
            .ok_or_else(|| TramaError::InvariantViolation(format!("column {col} holds no key lists")))
    }

    /// Single link column storage and the row of `key` inside it.
    fn link_slot_mut(&mut self, key: ObjKey, col: usize) -> Result<(&mut KeyColumn, usize)> {
        let pos = self.locate(key)?;
        let row = pos.row;
        self.cell_mut(pos, col)
            .as_link_mut()
            .map(|links| (links, row))
            .ok_or_else(|| TramaError::InvariantViolation(format!("column {col} is not a link")))
    }

    /// Number of incoming links through backlink columns whose pair is strong.
    pub(crate) fn strong_backlink_count(&self, key: ObjKey) -> Result<usize> {
        let pos = self.locate(key)?;
        Ok(self
            .spec
            .backlink_positions()
            .filter(|&col| self.spec.column(col).link.map_or(false, |p| p.link_type.is_strong()))
            .filter_map(|col| self.cell(pos, col).as_lists().map(|lists| lists[pos.row].len()))
            .sum())
    }

    /// Number of incoming links of any strength.
    pub(crate) fn total_backlink_count(&self, key: ObjKey) -> Result<usize> {
        let pos = self.locate(key)?;
        Ok(self
            .spec
            .backlink_positions()
            .filter_map(|col| self.cell(pos, col).as_lists().map(|lists| lists[pos.row].len()))
            .sum())
    }
}

/// Arena of the tables of one group, addressed by [`TableKey`].
///
/// Slots are never reused: a removed table leaves an empty slot behind so the
/// key cannot later resolve to a different table.
pub(crate) struct TableSet {
    slots: Vec<Option<Table>>,
    env: Env,
}

impl TableSet {
    pub(crate) fn new(env: Env) -> Self {
        Self {
            slots: Vec::new(),
            env,
        }
    }

    pub(crate) fn env(&self) -> &Env {
        &self.env
    }

    pub(crate) fn get(&self, key: TableKey) -> Result<&Table> {
        self.slots
            .get(key.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(TramaError::NoSuchTable)
    }

    pub(crate) fn get_mut(&mut self, key: TableKey) -> Result<&mut Table> {
        self.slots
            .get_mut(key.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(TramaError::NoSuchTable)
    }

    pub(crate) fn contains(&self, key: TableKey) -> bool {
        self.get(key).is_ok()
    }

    /// Keys of the live tables in ascending order.
    pub(crate) fn keys(&self) -> Vec<TableKey> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(ndx, _)| TableKey(ndx as u32))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn tables(&self) -> impl Iterator<Item = &Table> + '_ {
        self.slots.iter().flatten()
    }

    /// Appends an empty table in a fresh slot.
    pub(crate) fn push_table(&mut self) -> TableKey {
        let key = TableKey(self.slots.len() as u32);
        self.slots
            .push(Some(Table::new(key, self.env.max_cluster_size)));
        self.bump_version(key);
        key
    }

    /// Empties slot `key` and returns the record that lived there.
    pub(crate) fn take(&mut self, key: TableKey) -> Result<Table> {
        self.slots
            .get_mut(key.0 as usize)
            .and_then(Option::take)
            .ok_or(TramaError::NoSuchTable)
    }

    /// Replaces every slot, keeping at least the current slot count so keys
    /// handed out since the restored state are not reused.
    pub(crate) fn restore(&mut self, tables: Vec<Table>) {
        let len = tables
            .iter()
            .map(|t| t.key.0 as usize + 1)
            .max()
            .unwrap_or(0)
            .max(self.slots.len());
        let mut slots: Vec<Option<Table>> = vec![None; len];
        for table in tables {
            let ndx = table.key.0 as usize;
            slots[ndx] = Some(table);
        }
        self.slots = slots;
    }

    /// Two tables borrowed mutably at once; `None` for the second when both
    /// keys name the same table.
    fn pair_mut(&mut self, a: TableKey, b: TableKey) -> Result<(&mut Table, Option<&mut Table>)> {
        if a == b {
            return Ok((self.get_mut(a)?, None));
        }
        if !self.contains(a) || !self.contains(b) {
            return Err(TramaError::NoSuchTable);
        }
        let (ai, bi) = (a.0 as usize, b.0 as usize);
        let (first, second) = if ai < bi {
            let (lo, hi) = self.slots.split_at_mut(bi);
            (&mut lo[ai], &mut hi[0])
        } else {
            let (lo, hi) = self.slots.split_at_mut(ai);
            (&mut hi[0], &mut lo[bi])
        };
        match (first.as_mut(), second.as_mut()) {
            (Some(x), Some(y)) => Ok((x, Some(y))),
            _ => Err(TramaError::NoSuchTable),
        }
    }
}
