//! Read-only scans over one column, in key order.
//!
//! Nulls never take part in sums, extremes or averages.

use std::ops::ControlFlow;

use crate::storage::column::{ColumnData, ColumnValue};
use crate::types::{DataType, ObjKey, Result, TramaError, Value};

use super::Table;

impl Table {
    /// Visits every cell of public column `ndx`, which must hold `T`, until
    /// `visit` breaks.
    fn scan<T, F>(&self, ndx: usize, mut visit: F) -> Result<()>
    where
        T: ColumnValue,
        F: FnMut(ObjKey, Option<&T>) -> ControlFlow<()>,
    {
        self.typed_column(ndx, T::TYPE)?;
        self.clusters.traverse(|leaf| {
            let Some(cells) = T::cells(leaf.column(ndx)) else {
                return ControlFlow::Continue(());
            };
            for (row, cell) in cells.iter().enumerate() {
                if visit(leaf.key(row), cell.as_ref()).is_break() {
                    return ControlFlow::Break(());
                }
            }
            ControlFlow::Continue(())
        });
        Ok(())
    }

    /// Number of cells equal to `value`; `None` counts nulls.
    pub(crate) fn count<T: ColumnValue + PartialEq>(&self, ndx: usize, value: Option<&T>) -> Result<usize> {
        let mut count = 0;
        self.scan::<T, _>(ndx, |_, cell| {
            if cell == value {
                count += 1;
            }
            ControlFlow::Continue(())
        })?;
        Ok(count)
    }

    /// First object whose cell equals `value`; `None` searches for null.
    pub(crate) fn find_first<T: ColumnValue + PartialEq>(
        &self,
        ndx: usize,
        value: Option<&T>,
    ) -> Result<Option<ObjKey>> {
        let mut found = None;
        self.scan::<T, _>(ndx, |key, cell| {
            if cell == value {
                found = Some(key);
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        })?;
        Ok(found)
    }

    /// Every object whose cell equals `value`, ascending.
    pub(crate) fn find_all<T: ColumnValue + PartialEq>(&self, ndx: usize, value: Option<&T>) -> Result<Vec<ObjKey>> {
        let mut found = Vec::new();
        self.scan::<T, _>(ndx, |key, cell| {
            if cell == value {
                found.push(key);
            }
            ControlFlow::Continue(())
        })?;
        Ok(found)
    }

    /// Smallest non-null value and the first object holding it.
    pub(crate) fn minimum<T: ColumnValue + PartialOrd>(&self, ndx: usize) -> Result<Option<(T, ObjKey)>> {
        self.extreme(ndx, |candidate, best| candidate < best)
    }

    /// Largest non-null value and the first object holding it.
    pub(crate) fn maximum<T: ColumnValue + PartialOrd>(&self, ndx: usize) -> Result<Option<(T, ObjKey)>> {
        self.extreme(ndx, |candidate, best| candidate > best)
    }

    fn extreme<T, F>(&self, ndx: usize, better: F) -> Result<Option<(T, ObjKey)>>
    where
        T: ColumnValue,
        F: Fn(&T, &T) -> bool,
    {
        let mut best: Option<(T, ObjKey)> = None;
        self.scan::<T, _>(ndx, |key, cell| {
            if let Some(value) = cell {
                let replace = best.as_ref().map_or(true, |(current, _)| better(value, current));
                if replace {
                    best = Some((value.clone(), key));
                }
            }
            ControlFlow::Continue(())
        })?;
        Ok(best)
    }

    /// Sum of the non-null cells converted by `widen`, and how many there were.
    pub(crate) fn sum_with<T, F>(&self, ndx: usize, widen: F) -> Result<(f64, usize)>
    where
        T: ColumnValue,
        F: Fn(&T) -> f64,
    {
        let mut sum = 0.0;
        let mut count = 0;
        self.scan::<T, _>(ndx, |_, cell| {
            if let Some(value) = cell {
                sum += widen(value);
                count += 1;
            }
            ControlFlow::Continue(())
        })?;
        Ok((sum, count))
    }

    /// Exact integer sum with wrapping overflow.
    pub(crate) fn sum_int(&self, ndx: usize) -> Result<i64> {
        let mut sum: i64 = 0;
        self.scan::<i64, _>(ndx, |_, cell| {
            if let Some(value) = cell {
                sum = sum.wrapping_add(*value);
            }
            ControlFlow::Continue(())
        })?;
        Ok(sum)
    }

    /// Mean of the non-null cells, `None` when there are none.
    pub(crate) fn average_with<T, F>(&self, ndx: usize, widen: F) -> Result<Option<f64>>
    where
        T: ColumnValue,
        F: Fn(&T) -> f64,
    {
        let (sum, count) = self.sum_with::<T, F>(ndx, widen)?;
        Ok((count > 0).then(|| sum / count as f64))
    }

    /// First object whose cell in public column `ndx` is null. Unset single
    /// links count as null; link lists never do.
    pub(crate) fn find_first_null(&self, ndx: usize) -> Result<Option<ObjKey>> {
        self.public_column(ndx)?;
        let mut found = None;
        self.clusters.traverse(|leaf| {
            let col = leaf.column(ndx);
            match (0..leaf.len()).find(|&row| col.is_null(row)) {
                Some(row) => {
                    found = Some(leaf.key(row));
                    ControlFlow::Break(())
                }
                None => ControlFlow::Continue(()),
            }
        });
        Ok(found)
    }

    /// Objects whose link or link list column `ndx` points at `target`,
    /// stopping after the first when `first_only` is set.
    pub(crate) fn find_links(&self, ndx: usize, target: ObjKey, first_only: bool) -> Result<Vec<ObjKey>> {
        let col = self.public_column(ndx)?;
        if !col.ty.is_link() {
            return Err(TramaError::TypeMismatch {
                column: ndx,
                expected: DataType::Link,
                actual: col.ty,
            });
        }
        let mut found = Vec::new();
        self.clusters.traverse(|leaf| {
            for row in 0..leaf.len() {
                let hit = match leaf.column(ndx) {
                    ColumnData::Link(links) => links.get(row) == target,
                    ColumnData::LinkList(lists) => lists[row].find_first(target, 0, lists[row].len()).is_some(),
                    _ => false,
                };
                if hit {
                    found.push(leaf.key(row));
                    if first_only {
                        return ControlFlow::Break(());
                    }
                }
            }
            ControlFlow::Continue(())
        });
        Ok(found)
    }

    /// First position, in key order, whose cell is not below `value`.
    ///
    /// The column must already be sorted ascending; on an unsorted column the
    /// result is unspecified.
    pub(crate) fn lower_bound<T: ColumnValue + PartialOrd>(&self, ndx: usize, value: &T) -> Result<usize> {
        self.bound::<T, _>(ndx, |cell| cell < Some(value))
    }

    /// First position, in key order, whose cell is above `value`. Same
    /// precondition as [`Table::lower_bound`].
    pub(crate) fn upper_bound<T: ColumnValue + PartialOrd>(&self, ndx: usize, value: &T) -> Result<usize> {
        self.bound::<T, _>(ndx, |cell| cell <= Some(value))
    }

    /// Partitions on `before`, which must hold for a prefix of the column.
    fn bound<T, F>(&self, ndx: usize, before: F) -> Result<usize>
    where
        T: ColumnValue,
        F: Fn(Option<&T>) -> bool,
    {
        self.typed_column(ndx, T::TYPE)?;
        let mut offset = 0;
        for leaf_ndx in 0..self.clusters.leaf_count() {
            let leaf = self.clusters.leaf(leaf_ndx);
            let Some(cells) = T::cells(leaf.column(ndx)) else {
                continue;
            };
            let split = cells.partition_point(|cell| before(cell.as_ref()));
            if split < cells.len() {
                return Ok(offset + split);
            }
            offset += cells.len();
        }
        Ok(offset)
    }

    /// Every cell of public column `ndx`, in key order.
    pub(crate) fn column_values(&self, ndx: usize) -> Result<Vec<Value>> {
        self.public_column(ndx)?;
        let mut values = Vec::with_capacity(self.size());
        self.clusters.traverse(|leaf| {
            let col = leaf.column(ndx);
            values.extend((0..leaf.len()).map(|row| col.get(row)));
            ControlFlow::Continue(())
        });
        Ok(values)
    }
}
