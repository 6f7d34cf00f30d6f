use std::ops::ControlFlow;

use tracing::debug;

use crate::storage::spec::LinkPeer;
use crate::types::{ColKey, DataType, LinkType, Result, TableKey, TramaError};

use super::{Table, TableSet};

impl TableSet {
    fn check_insert_position(table: &Table, ndx: usize) -> Result<()> {
        if ndx > table.spec.public_column_count() {
            return Err(TramaError::ColumnIndexOutOfRange(ndx));
        }
        Ok(())
    }

    /// Inserts a non-link column at public position `ndx`. Existing objects
    /// receive the column default.
    pub(crate) fn insert_column(
        &mut self,
        table_key: TableKey,
        ndx: usize,
        ty: DataType,
        name: &str,
        nullable: bool,
    ) -> Result<ColKey> {
        let table = self.get(table_key)?;
        Self::check_insert_position(table, ndx)?;
        if ty.is_link() || ty == DataType::Backlink {
            return Err(TramaError::Invalid("link columns need a target table"));
        }
        table.spec.check_name(name, None)?;

        let table = self.get_mut(table_key)?;
        let col = table.spec.insert_public(ndx, name, ty, nullable, None);
        table.clusters.insert_column(ndx, ty, nullable);
        self.env.repl.insert_column(table_key, ndx, ty, name, None);
        debug!(table = %table_key, column = name, ty = %ty, "table.column.added");
        self.bump_version(table_key);
        Ok(col)
    }

    /// Inserts a link or link list column at public position `ndx` and the
    /// reciprocal backlink column in `target`, which may be the same table.
    pub(crate) fn insert_column_link(
        &mut self,
        table_key: TableKey,
        ndx: usize,
        ty: DataType,
        name: &str,
        target: TableKey,
        link_type: LinkType,
    ) -> Result<ColKey> {
        let table = self.get(table_key)?;
        Self::check_insert_position(table, ndx)?;
        if !ty.is_link() {
            return Err(TramaError::Invalid("not a link column type"));
        }
        table.spec.check_name(name, None)?;
        let origin_col = table.spec.peek_col_key();
        let backlink_col = if target == table_key {
            ColKey(origin_col.0 + 1)
        } else {
            self.get(target)?.spec.peek_col_key()
        };

        let (origin, other) = self.pair_mut(table_key, target)?;
        let col = origin.spec.insert_public(
            ndx,
            name,
            ty,
            false,
            Some(LinkPeer {
                table: target,
                column: backlink_col,
                link_type,
            }),
        );
        debug_assert_eq!(col, origin_col);
        origin.clusters.insert_column(ndx, ty, false);

        let target_table = match other {
            Some(t) => t,
            None => origin,
        };
        let (pos, key) = target_table.spec.push_backlink(LinkPeer {
            table: table_key,
            column: col,
            link_type,
        });
        debug_assert_eq!(key, backlink_col);
        target_table
            .clusters
            .insert_column(pos, DataType::Backlink, false);

        self.env
            .repl
            .insert_column(table_key, ndx, ty, name, Some(target));
        debug!(
            table = %table_key,
            column = name,
            ty = %ty,
            target = %target,
            strong = link_type.is_strong(),
            "table.column.link_added"
        );
        self.bump_versions(&[table_key, target]);
        Ok(col)
    }

    /// Removes public column `ndx`. For a link column the reciprocal backlink
    /// column is dropped with it, which severs every link it held without
    /// cascading. Returns the key of the removed column.
    pub(crate) fn remove_column(&mut self, table_key: TableKey, ndx: usize) -> Result<ColKey> {
        let col = self.get(table_key)?.public_column(ndx)?.clone();

        if let Some(peer) = col.link {
            let origin = self.get(table_key)?;
            let mut severed = 0usize;
            origin.clusters.traverse(|leaf| {
                let data = leaf.column(ndx);
                severed += (0..leaf.len()).map(|row| data.link_targets(row).len()).sum::<usize>();
                ControlFlow::Continue(())
            });
            for _ in 0..severed {
                self.env.metrics.link_broken(peer.link_type.is_strong());
            }

            let target = self.get_mut(peer.table)?;
            let pos = target.spec.backlink_position(table_key, col.key).ok_or_else(|| {
                TramaError::InvariantViolation(format!(
                    "link column {} of table {table_key} has no backlink in table {}",
                    col.key, peer.table
                ))
            })?;
            target.spec.remove(pos);
            target.clusters.remove_column(pos);
            debug!(table = %table_key, column = %col.name, links = severed, "table.column.links_severed");
        }

        let table = self.get_mut(table_key)?;
        table.spec.remove(ndx);
        table.clusters.remove_column(ndx);
        self.env.repl.erase_column(table_key, ndx);
        debug!(table = %table_key, column = %col.name, "table.column.removed");
        match col.link {
            Some(peer) => self.bump_versions(&[table_key, peer.table]),
            None => self.bump_version(table_key),
        }
        Ok(col.key)
    }

    /// Renames public column `ndx`.
    pub(crate) fn rename_column(&mut self, table_key: TableKey, ndx: usize, name: &str) -> Result<()> {
        let table = self.get(table_key)?;
        table.public_column(ndx)?;
        table.spec.check_name(name, Some(ndx))?;

        self.get_mut(table_key)?.spec.column_mut(ndx).name = name.to_owned();
        self.env.repl.rename_column(table_key, ndx, name);
        self.bump_version(table_key);
        Ok(())
    }

    /// Declares the ownership semantics of link column `ndx`, on both halves
    /// of the pair. Changing the type never removes objects by itself.
    pub(crate) fn set_link_type(
        &mut self,
        table_key: TableKey,
        ndx: usize,
        link_type: LinkType,
    ) -> Result<()> {
        let col = self.get(table_key)?.public_column(ndx)?.clone();
        let Some(peer) = col.link else {
            return Err(TramaError::Invalid("not a link column"));
        };
        let pos = self
            .get(peer.table)?
            .spec
            .backlink_position(table_key, col.key)
            .ok_or_else(|| {
                TramaError::InvariantViolation(format!(
                    "link column {} of table {table_key} has no backlink",
                    col.key
                ))
            })?;

        if let Some(link) = self.get_mut(table_key)?.spec.column_mut(ndx).link.as_mut() {
            link.link_type = link_type;
        }
        if let Some(link) = self.get_mut(peer.table)?.spec.column_mut(pos).link.as_mut() {
            link.link_type = link_type;
        }
        self.env.repl.set_link_type(table_key, ndx, link_type);
        self.bump_versions(&[table_key, peer.table]);
        Ok(())
    }

    /// Origin tables, other than `target` itself, holding link columns into `target`.
    pub(crate) fn foreign_origins(&self, target: TableKey) -> Result<Vec<TableKey>> {
        let table = self.get(target)?;
        let mut origins: Vec<TableKey> = table
            .spec
            .backlink_positions()
            .filter_map(|pos| table.spec.column(pos).link)
            .map(|peer| peer.table)
            .filter(|&origin| origin != target)
            .collect();
        origins.sort_unstable();
        origins.dedup();
        Ok(origins)
    }
}
