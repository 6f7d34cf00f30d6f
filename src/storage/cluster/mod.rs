//! Object store: a two-level tree of cluster leaves keyed by [`ObjKey`].
//!
//! Every live key sits in exactly one leaf, leaves are ordered by their first
//! key, and keys are ascending inside a leaf. A leaf is split in half once it
//! grows past the configured maximum and dropped once it becomes empty (the
//! tree always keeps at least one leaf so the column layout survives).

use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};

use crate::storage::column::ColumnData;
use crate::types::{DataType, ObjKey, Result, TramaError};

mod leaf;

pub use leaf::Cluster;

/// Default maximum number of objects per leaf.
pub const DEFAULT_MAX_CLUSTER_SIZE: usize = 256;

/// Physical location of an object inside the tree.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ClusterPos {
    /// Leaf index.
    pub leaf: usize,
    /// Row inside the leaf.
    pub row: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct ColumnLayout {
    ty: DataType,
    nullable: bool,
}

/// Sorted map from [`ObjKey`] to a row of column cells.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterTree {
    leaves: Vec<Cluster>,
    layout: Vec<ColumnLayout>,
    size: usize,
    max_leaf: usize,
}

impl ClusterTree {
    /// Creates an empty tree with no columns.
    pub fn new(max_leaf: usize) -> Self {
        Self {
            leaves: vec![Cluster::empty(Vec::new())],
            layout: Vec::new(),
            size: 0,
            max_leaf: max_leaf.max(2),
        }
    }

    /// Number of live objects.
    pub fn size(&self) -> usize {
        self.size
    }

    /// True when no objects are stored.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Leaf at `ndx`.
    pub fn leaf(&self, ndx: usize) -> &Cluster {
        &self.leaves[ndx]
    }

    pub(crate) fn leaf_mut(&mut self, ndx: usize) -> &mut Cluster {
        &mut self.leaves[ndx]
    }

    /// Number of columns in every leaf.
    pub fn column_count(&self) -> usize {
        self.layout.len()
    }

    fn empty_leaf(&self) -> Cluster {
        Cluster::empty(
            self.layout
                .iter()
                .map(|l| ColumnData::with_defaults(l.ty, l.nullable, 0))
                .collect(),
        )
    }

    /// Adds a column at storage position `ndx`, filling existing rows with
    /// the column default.
    pub fn insert_column(&mut self, ndx: usize, ty: DataType, nullable: bool) {
        self.layout.insert(ndx, ColumnLayout { ty, nullable });
        for leaf in &mut self.leaves {
            let len = leaf.len();
            leaf.columns
                .insert(ndx, ColumnData::with_defaults(ty, nullable, len));
        }
    }

    /// Drops the column at storage position `ndx` from every leaf.
    pub fn remove_column(&mut self, ndx: usize) {
        self.layout.remove(ndx);
        for leaf in &mut self.leaves {
            leaf.columns.remove(ndx);
        }
    }

    fn leaf_for(&self, key: ObjKey) -> usize {
        let after = self
            .leaves
            .partition_point(|leaf| leaf.first_key().map_or(true, |first| first <= key.0));
        after.saturating_sub(1)
    }

    /// Location of `key`, if present.
    pub fn find(&self, key: ObjKey) -> Option<ClusterPos> {
        let leaf = self.leaf_for(key);
        self.leaves[leaf]
            .row_of(key)
            .ok()
            .map(|row| ClusterPos { leaf, row })
    }

    /// True if `key` is stored. Never fails.
    pub fn is_valid(&self, key: ObjKey) -> bool {
        !key.is_null() && self.find(key).is_some()
    }

    /// Location of `key`, or [`TramaError::KeyNotFound`].
    pub fn get(&self, key: ObjKey) -> Result<ClusterPos> {
        self.find(key).ok_or(TramaError::KeyNotFound(key))
    }

    /// Inserts a default-valued object under `key`.
    pub fn insert(&mut self, key: ObjKey) -> Result<ClusterPos> {
        if key.is_null() {
            return Err(TramaError::Invalid("cannot insert the null key"));
        }
        let leaf_ndx = self.leaf_for(key);
        let row = match self.leaves[leaf_ndx].row_of(key) {
            Ok(_) => return Err(TramaError::DuplicateKey(key)),
            Err(row) => row,
        };
        let leaf = &mut self.leaves[leaf_ndx];
        leaf.keys.insert(row, key.0);
        for (col, layout) in leaf.columns.iter_mut().zip(&self.layout) {
            col.insert_default(row, layout.nullable);
        }
        self.size += 1;

        if leaf.len() > self.max_leaf {
            let at = leaf.len() / 2;
            let tail = leaf.split_off(at);
            self.leaves.insert(leaf_ndx + 1, tail);
            if row >= at {
                return Ok(ClusterPos {
                    leaf: leaf_ndx + 1,
                    row: row - at,
                });
            }
        }
        Ok(ClusterPos {
            leaf: leaf_ndx,
            row,
        })
    }

    fn drop_empty_leaves(&mut self) {
        self.leaves.retain(|leaf| !leaf.is_empty());
        if self.leaves.is_empty() {
            let leaf = self.empty_leaf();
            self.leaves.push(leaf);
        }
    }

    /// Removes the object stored under `key`.
    pub fn erase(&mut self, key: ObjKey) -> Result<()> {
        let pos = self.get(key)?;
        self.leaves[pos.leaf].erase_row(pos.row);
        self.size -= 1;
        if self.leaves[pos.leaf].is_empty() {
            self.drop_empty_leaves();
        }
        Ok(())
    }

    /// Removes every key in `keys` in a single pass over the affected leaves.
    ///
    /// `keys` must be strictly ascending, otherwise [`TramaError::Invalid`] is
    /// returned. Either all keys are removed or, if one is missing, none is
    /// and [`TramaError::KeyNotFound`] is returned.
    pub fn erase_many(&mut self, keys: &[ObjKey]) -> Result<()> {
        if keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(TramaError::Invalid("keys must be strictly ascending"));
        }
        let mut positions = Vec::with_capacity(keys.len());
        for &key in keys {
            positions.push(self.get(key)?);
        }

        let mut start = 0;
        while start < positions.len() {
            let leaf_ndx = positions[start].leaf;
            let mut end = start;
            let leaf = &mut self.leaves[leaf_ndx];
            let mut keep = vec![true; leaf.len()];
            while end < positions.len() && positions[end].leaf == leaf_ndx {
                keep[positions[end].row] = false;
                end += 1;
            }
            leaf.retain_rows(&keep);
            start = end;
        }
        self.size -= keys.len();
        self.drop_empty_leaves();
        Ok(())
    }

    /// Removes every object, keeping the column layout.
    pub fn clear(&mut self) {
        self.leaves = vec![self.empty_leaf()];
        self.size = 0;
    }

    /// First stored key that is `>= key`.
    pub fn first_key_at_or_after(&self, key: ObjKey) -> Option<ObjKey> {
        let leaf_ndx = self.leaf_for(key);
        let leaf = &self.leaves[leaf_ndx];
        let row = leaf.keys.partition_point(|&k| k < key.0);
        if row < leaf.len() {
            return Some(leaf.key(row));
        }
        self.leaves
            .get(leaf_ndx + 1)
            .and_then(|next| next.first_key())
            .map(ObjKey)
    }

    /// Keys `>= key` held by the first leaf that has any, in ascending order.
    /// Empty past the last key.
    pub fn leaf_keys_from(&self, key: ObjKey) -> Vec<ObjKey> {
        let leaf_ndx = self.leaf_for(key);
        let leaf = &self.leaves[leaf_ndx];
        let row = leaf.keys.partition_point(|&k| k < key.0);
        if row < leaf.len() {
            return leaf.keys[row..].iter().copied().map(ObjKey).collect();
        }
        self.leaves
            .get(leaf_ndx + 1)
            .map(|next| next.keys())
            .into_iter()
            .flatten()
            .collect()
    }

    /// Largest stored key.
    pub fn max_key(&self) -> Option<ObjKey> {
        self.leaves
            .iter()
            .rev()
            .find_map(|leaf| leaf.keys.last().copied())
            .map(ObjKey)
    }

    /// Keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = ObjKey> + '_ {
        self.leaves.iter().flat_map(|leaf| leaf.keys())
    }

    /// Object position in key order, counting from zero.
    pub fn ordinal_of(&self, pos: ClusterPos) -> usize {
        self.leaves[..pos.leaf].iter().map(Cluster::len).sum::<usize>() + pos.row
    }

    /// Visits leaves in key order until `visit` breaks.
    ///
    /// Returns true if the traversal was stopped early.
    pub fn traverse<F>(&self, mut visit: F) -> bool
    where
        F: FnMut(&Cluster) -> ControlFlow<()>,
    {
        for leaf in &self.leaves {
            if leaf.is_empty() {
                continue;
            }
            if visit(leaf).is_break() {
                return true;
            }
        }
        false
    }

    /// Checks the structural invariants of the tree.
    pub fn verify(&self) -> Result<()> {
        let mut prev: Option<i64> = None;
        let mut count = 0;
        for (ndx, leaf) in self.leaves.iter().enumerate() {
            if leaf.is_empty() && self.leaves.len() > 1 {
                return Err(TramaError::InvariantViolation(format!("empty leaf {ndx}")));
            }
            if leaf.columns.len() != self.layout.len() {
                return Err(TramaError::InvariantViolation(format!(
                    "leaf {ndx} has {} columns, expected {}",
                    leaf.columns.len(),
                    self.layout.len()
                )));
            }
            for col in &leaf.columns {
                if col.len() != leaf.len() {
                    return Err(TramaError::InvariantViolation(format!(
                        "leaf {ndx} column length mismatch"
                    )));
                }
            }
            for &key in &leaf.keys {
                if prev.map_or(false, |p| p >= key) {
                    return Err(TramaError::InvariantViolation(format!(
                        "keys out of order at {key}"
                    )));
                }
                prev = Some(key);
                count += 1;
            }
        }
        if count != self.size {
            return Err(TramaError::InvariantViolation(format!(
                "size {} but {count} keys stored",
                self.size
            )));
        }
        Ok(())
    }
}

impl Default for ClusterTree {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CLUSTER_SIZE)
    }
}
