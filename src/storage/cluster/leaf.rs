use serde::{Deserialize, Serialize};

use crate::storage::column::ColumnData;
use crate::types::ObjKey;

/// A leaf of the cluster tree: a sorted run of keys plus one column slice per
/// schema column, all row-aligned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub(super) keys: Vec<i64>,
    pub(super) columns: Vec<ColumnData>,
}

impl Cluster {
    pub(super) fn empty(columns: Vec<ColumnData>) -> Self {
        debug_assert!(columns.iter().all(ColumnData::is_empty));
        Self {
            keys: Vec::new(),
            columns,
        }
    }

    /// Number of objects stored in this leaf.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when the leaf holds no objects.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key of the object at `row`.
    pub fn key(&self, row: usize) -> ObjKey {
        ObjKey(self.keys[row])
    }

    /// Keys of this leaf in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = ObjKey> + '_ {
        self.keys.iter().map(|&k| ObjKey(k))
    }

    /// Column slice at storage position `ndx`.
    pub fn column(&self, ndx: usize) -> &ColumnData {
        &self.columns[ndx]
    }

    pub(crate) fn column_mut(&mut self, ndx: usize) -> &mut ColumnData {
        &mut self.columns[ndx]
    }

    pub(super) fn first_key(&self) -> Option<i64> {
        self.keys.first().copied()
    }

    pub(super) fn row_of(&self, key: ObjKey) -> Result<usize, usize> {
        self.keys.binary_search(&key.0)
    }

    pub(super) fn split_off(&mut self, at: usize) -> Cluster {
        let keys = self.keys.split_off(at);
        let columns = self.columns.iter_mut().map(|c| c.split_off(at)).collect();
        Cluster { keys, columns }
    }

    pub(super) fn erase_row(&mut self, row: usize) {
        self.keys.remove(row);
        for col in &mut self.columns {
            col.erase(row);
        }
    }

    pub(super) fn retain_rows(&mut self, keep: &[bool]) {
        let mut mask = keep.iter();
        self.keys.retain(|_| *mask.next().unwrap_or(&true));
        for col in &mut self.columns {
            col.retain_rows(keep);
        }
    }
}
