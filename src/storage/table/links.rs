//! Link/backlink pairing and cascade removal.
//!
//! Every forward entry `origin -> target` in a link or link list column is
//! mirrored by exactly one entry `origin` in the backlink column of `target`.
//! Breaking a strong link whose target is left without strong incoming links
//! removes the target, transitively. Cycles of strong links with no strong
//! link from outside are not collected: each member still counts the others.

use std::collections::BTreeSet;
use std::ops::ControlFlow;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::storage::column::ColumnData;
use crate::storage::spec::LinkPeer;
use crate::types::{ColKey, DataType, ObjKey, Result, TableKey, TramaError};

use super::TableSet;

/// Objects pending removal during one request.
///
/// Each `(table, key)` pair is scheduled at most once, so walking a strong
/// link graph with cycles terminates.
#[derive(Debug, Default)]
pub(crate) struct CascadeState {
    scheduled: BTreeSet<(TableKey, ObjKey)>,
    cascaded: usize,
}

impl CascadeState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Schedules an object the caller asked to remove.
    pub(crate) fn schedule(&mut self, table: TableKey, key: ObjKey) {
        self.scheduled.insert((table, key));
    }

    fn schedule_cascaded(&mut self, table: TableKey, key: ObjKey) -> bool {
        let fresh = self.scheduled.insert((table, key));
        if fresh {
            self.cascaded += 1;
        }
        fresh
    }

    pub(crate) fn contains(&self, table: TableKey, key: ObjKey) -> bool {
        self.scheduled.contains(&(table, key))
    }

    pub(crate) fn len(&self) -> usize {
        self.scheduled.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.scheduled.is_empty()
    }

    /// Scheduled keys grouped per table, ascending.
    fn by_table(&self) -> Vec<(TableKey, Vec<ObjKey>)> {
        let mut groups: Vec<(TableKey, Vec<ObjKey>)> = Vec::new();
        for &(table, key) in &self.scheduled {
            match groups.last_mut() {
                Some((last, keys)) if *last == table => keys.push(key),
                _ => groups.push((table, vec![key])),
            }
        }
        groups
    }
}

/// How to undo one forward entry pointing at a removed object.
struct ForwardClear {
    table: TableKey,
    col: usize,
    origin: ObjKey,
    target: ObjKey,
}

/// How to undo one backlink entry recorded for a removed origin.
struct BacklinkDrop {
    table: TableKey,
    col: usize,
    target: ObjKey,
    origin: ObjKey,
}

impl TableSet {
    /// Forward link column `ndx` of `table_key`, which must have type `ty`,
    /// with its peer and the storage position of the reciprocal backlink.
    fn forward_link(&self, table_key: TableKey, ndx: usize, ty: DataType) -> Result<(LinkPeer, usize)> {
        let col = self.get(table_key)?.typed_column(ndx, ty)?;
        let peer = col.link.ok_or_else(|| {
            TramaError::InvariantViolation(format!("link column {ndx} of table {table_key} has no peer"))
        })?;
        let backlink = self.backlink_position(peer.table, table_key, col.key)?;
        Ok((peer, backlink))
    }

    fn backlink_position(&self, target: TableKey, origin: TableKey, origin_col: ColKey) -> Result<usize> {
        self.get(target)?
            .spec
            .backlink_position(origin, origin_col)
            .ok_or_else(|| {
                TramaError::InvariantViolation(format!(
                    "column {origin_col} of table {origin} has no backlink in table {target}"
                ))
            })
    }

    fn check_link_target(&self, target_table: TableKey, target: ObjKey) -> Result<()> {
        if target.is_null() {
            return Err(TramaError::Invalid("link lists cannot hold null"));
        }
        self.get(target_table)?.locate(target)?;
        Ok(())
    }

    /// Target of link column `ndx` of object `key`; the null key when unset.
    pub(crate) fn get_link(&self, table_key: TableKey, key: ObjKey, ndx: usize) -> Result<ObjKey> {
        let table = self.get(table_key)?;
        table.typed_column(ndx, DataType::Link)?;
        let pos = table.locate(key)?;
        Ok(table
            .cell(pos, ndx)
            .as_link()
            .map_or(ObjKey::NULL, |links| links.get(pos.row)))
    }

    /// Points link column `ndx` of object `key` at `target`, or clears it
    /// when `target` is null.
    ///
    /// Writing the current target again is not a break. Replacing or clearing
    /// a strong link whose old target is left with no strong incoming links
    /// removes that target recursively.
    pub(crate) fn set_link(
        &mut self,
        table_key: TableKey,
        key: ObjKey,
        ndx: usize,
        target: ObjKey,
    ) -> Result<()> {
        let (peer, backlink) = self.forward_link(table_key, ndx, DataType::Link)?;
        let old = self.get_link(table_key, key, ndx)?;
        if !target.is_null() {
            self.get(peer.table)?.locate(target)?;
        }
        if old == target {
            self.bump_version(table_key);
            return Ok(());
        }

        let (slot, row) = self.get_mut(table_key)?.link_slot_mut(key, ndx)?;
        if target.is_null() {
            slot.set_null(row);
        } else {
            slot.set(row, target);
        }
        let target_table = self.get_mut(peer.table)?;
        if !old.is_null() {
            target_table.key_list_mut(old, backlink)?.nullify(key);
            self.env.metrics.link_broken(peer.link_type.is_strong());
        }
        if !target.is_null() {
            self.get_mut(peer.table)?.key_list_mut(target, backlink)?.add(key);
        }
        self.bump_versions(&[table_key, peer.table]);

        if !old.is_null() && peer.link_type.is_strong() {
            self.remove_orphans(peer.table, &[old])?;
        }
        Ok(())
    }

    /// Number of entries in link list column `ndx` of object `key`.
    pub(crate) fn list_len(&self, table_key: TableKey, key: ObjKey, ndx: usize) -> Result<usize> {
        let table = self.get(table_key)?;
        table.typed_column(ndx, DataType::LinkList)?;
        Ok(table.key_list(key, ndx)?.len())
    }

    /// Entries of link list column `ndx` of object `key`, in list order.
    pub(crate) fn list_get_all(&self, table_key: TableKey, key: ObjKey, ndx: usize) -> Result<Vec<ObjKey>> {
        let table = self.get(table_key)?;
        table.typed_column(ndx, DataType::LinkList)?;
        Ok(table.key_list(key, ndx)?.get_all())
    }

    /// Entry `pos` of link list column `ndx` of object `key`.
    pub(crate) fn list_get(&self, table_key: TableKey, key: ObjKey, ndx: usize, pos: usize) -> Result<ObjKey> {
        let table = self.get(table_key)?;
        table.typed_column(ndx, DataType::LinkList)?;
        let list = table.key_list(key, ndx)?;
        if pos >= list.len() {
            return Err(TramaError::Invalid("link list index out of range"));
        }
        Ok(list.get(pos))
    }

    /// Inserts `target` at `pos` of link list column `ndx`; `pos` may equal
    /// the list length to append.
    pub(crate) fn list_insert(
        &mut self,
        table_key: TableKey,
        key: ObjKey,
        ndx: usize,
        pos: usize,
        target: ObjKey,
    ) -> Result<()> {
        let (peer, backlink) = self.forward_link(table_key, ndx, DataType::LinkList)?;
        let len = self.get(table_key)?.key_list(key, ndx)?.len();
        if pos > len {
            return Err(TramaError::Invalid("link list index out of range"));
        }
        self.check_link_target(peer.table, target)?;

        self.get_mut(table_key)?.key_list_mut(key, ndx)?.insert(pos, target);
        self.get_mut(peer.table)?.key_list_mut(target, backlink)?.add(key);
        self.bump_versions(&[table_key, peer.table]);
        Ok(())
    }

    /// Replaces entry `pos` of link list column `ndx` with `target`.
    pub(crate) fn list_set(
        &mut self,
        table_key: TableKey,
        key: ObjKey,
        ndx: usize,
        pos: usize,
        target: ObjKey,
    ) -> Result<()> {
        let (peer, backlink) = self.forward_link(table_key, ndx, DataType::LinkList)?;
        let old = self.list_get(table_key, key, ndx, pos)?;
        self.check_link_target(peer.table, target)?;
        if old == target {
            self.bump_version(table_key);
            return Ok(());
        }

        self.get_mut(table_key)?.key_list_mut(key, ndx)?.set(pos, target);
        let target_table = self.get_mut(peer.table)?;
        target_table.key_list_mut(old, backlink)?.nullify(key);
        target_table.key_list_mut(target, backlink)?.add(key);
        self.env.metrics.link_broken(peer.link_type.is_strong());
        self.bump_versions(&[table_key, peer.table]);

        if peer.link_type.is_strong() {
            self.remove_orphans(peer.table, &[old])?;
        }
        Ok(())
    }

    /// Removes entry `pos` of link list column `ndx`.
    pub(crate) fn list_remove(&mut self, table_key: TableKey, key: ObjKey, ndx: usize, pos: usize) -> Result<()> {
        let (peer, backlink) = self.forward_link(table_key, ndx, DataType::LinkList)?;
        let old = self.list_get(table_key, key, ndx, pos)?;

        self.get_mut(table_key)?.key_list_mut(key, ndx)?.erase(pos);
        self.get_mut(peer.table)?.key_list_mut(old, backlink)?.nullify(key);
        self.env.metrics.link_broken(peer.link_type.is_strong());
        self.bump_versions(&[table_key, peer.table]);

        if peer.link_type.is_strong() {
            self.remove_orphans(peer.table, &[old])?;
        }
        Ok(())
    }

    /// Removes every entry of link list column `ndx`.
    pub(crate) fn list_clear(&mut self, table_key: TableKey, key: ObjKey, ndx: usize) -> Result<()> {
        let (peer, backlink) = self.forward_link(table_key, ndx, DataType::LinkList)?;
        let old = self.list_get_all(table_key, key, ndx)?;

        self.get_mut(table_key)?.key_list_mut(key, ndx)?.clear();
        let target_table = self.get_mut(peer.table)?;
        for &target in &old {
            target_table.key_list_mut(target, backlink)?.nullify(key);
        }
        for _ in &old {
            self.env.metrics.link_broken(peer.link_type.is_strong());
        }
        self.bump_versions(&[table_key, peer.table]);

        if peer.link_type.is_strong() {
            self.remove_orphans(peer.table, &old)?;
        }
        Ok(())
    }

    /// Origins of object `key` through link column `origin_ndx` of `origin_table`.
    pub(crate) fn backlinks(
        &self,
        table_key: TableKey,
        key: ObjKey,
        origin_table: TableKey,
        origin_ndx: usize,
    ) -> Result<Vec<ObjKey>> {
        let col = self.get(origin_table)?.public_column(origin_ndx)?;
        let peer = col
            .link
            .ok_or(TramaError::Invalid("not a link column"))?;
        if peer.table != table_key {
            return Err(TramaError::Invalid("column does not link to this table"));
        }
        let backlink = self.backlink_position(table_key, origin_table, col.key)?;
        Ok(self.get(table_key)?.key_list(key, backlink)?.get_all())
    }

    /// Removes those of `candidates` in `table_key` that are still alive but
    /// no longer have any strong incoming link, recursively.
    fn remove_orphans(&mut self, table_key: TableKey, candidates: &[ObjKey]) -> Result<()> {
        let table = self.get(table_key)?;
        let mut state = CascadeState::new();
        for &key in candidates {
            if table.is_valid(key) && table.strong_backlink_count(key)? == 0 {
                trace!(table = %table_key, key = %key, "table.cascade.orphaned");
                state.schedule_cascaded(table_key, key);
            }
        }
        if state.is_empty() {
            return Ok(());
        }
        self.remove_objects(state, true)
    }

    /// Strong incoming links of `key` whose origin is not already scheduled.
    fn strong_refs_outside(&self, table_key: TableKey, key: ObjKey, state: &CascadeState) -> Result<usize> {
        let table = self.get(table_key)?;
        let pos = table.locate(key)?;
        let mut count = 0;
        for col in table.spec.backlink_positions() {
            let Some(peer) = table.spec.column(col).link else {
                continue;
            };
            if !peer.link_type.is_strong() {
                continue;
            }
            if let Some(lists) = table.cell(pos, col).as_lists() {
                count += lists[pos.row]
                    .iter()
                    .filter(|&origin| !state.contains(peer.table, origin))
                    .count();
            }
        }
        Ok(count)
    }

    /// Grows `state` to its fixpoint: every object whose strong incoming
    /// links all come from scheduled objects is scheduled too.
    fn expand_cascade(&self, state: &mut CascadeState) -> Result<()> {
        let mut frontier: Vec<(TableKey, ObjKey)> = state.scheduled.iter().copied().collect();
        while let Some((table_key, key)) = frontier.pop() {
            let table = self.get(table_key)?;
            let pos = table.locate(key)?;
            for col in table.spec.forward_link_positions() {
                let Some(peer) = table.spec.column(col).link else {
                    continue;
                };
                if !peer.link_type.is_strong() {
                    continue;
                }
                for target in table.cell(pos, col).link_targets(pos.row) {
                    if state.contains(peer.table, target) {
                        continue;
                    }
                    if self.strong_refs_outside(peer.table, target, state)? == 0
                        && state.schedule_cascaded(peer.table, target)
                    {
                        trace!(table = %peer.table, key = %target, "table.cascade.scheduled");
                        frontier.push((peer.table, target));
                    }
                }
            }
        }
        Ok(())
    }

    /// Removes every scheduled object in one pass.
    ///
    /// With `recursive`, objects left without strong incoming links are
    /// scheduled first. Links from surviving objects into removed ones are
    /// nullified (single links) or dropped (link lists); links from removed
    /// objects have their backlink entries dropped. Surviving targets are never
    /// removed by this step, whatever the strength of the severed link.
    pub(crate) fn remove_objects(&mut self, mut state: CascadeState, recursive: bool) -> Result<()> {
        if recursive {
            self.expand_cascade(&mut state)?;
        }

        let mut backlink_drops: Vec<BacklinkDrop> = Vec::new();
        let mut forward_clears: Vec<ForwardClear> = Vec::new();
        let mut touched: BTreeSet<TableKey> = BTreeSet::new();
        for &(table_key, key) in &state.scheduled {
            let table = self.get(table_key)?;
            let pos = table.locate(key)?;
            touched.insert(table_key);

            for col in table.spec.forward_link_positions() {
                let spec = table.spec.column(col);
                let Some(peer) = spec.link else {
                    continue;
                };
                let targets = table.cell(pos, col).link_targets(pos.row);
                if targets.is_empty() {
                    continue;
                }
                let backlink = self.backlink_position(peer.table, table_key, spec.key)?;
                for target in targets {
                    if state.contains(peer.table, target) {
                        continue;
                    }
                    self.env.metrics.link_broken(peer.link_type.is_strong());
                    touched.insert(peer.table);
                    backlink_drops.push(BacklinkDrop {
                        table: peer.table,
                        col: backlink,
                        target,
                        origin: key,
                    });
                }
            }

            for col in table.spec.backlink_positions() {
                let Some(peer) = table.spec.column(col).link else {
                    continue;
                };
                let Some(lists) = table.cell(pos, col).as_lists() else {
                    continue;
                };
                if lists[pos.row].is_empty() {
                    continue;
                }
                let origin_col = self.get(peer.table)?.spec.position(peer.column).ok_or_else(|| {
                    TramaError::InvariantViolation(format!(
                        "backlink of table {table_key} names missing column {}",
                        peer.column
                    ))
                })?;
                for origin in lists[pos.row].iter() {
                    if state.contains(peer.table, origin) {
                        continue;
                    }
                    self.env.metrics.link_broken(peer.link_type.is_strong());
                    touched.insert(peer.table);
                    forward_clears.push(ForwardClear {
                        table: peer.table,
                        col: origin_col,
                        origin,
                        target: key,
                    });
                }
            }
        }

        for entry in backlink_drops {
            self.get_mut(entry.table)?
                .key_list_mut(entry.target, entry.col)?
                .nullify(entry.origin);
        }
        for clear in forward_clears {
            let table = self.get_mut(clear.table)?;
            let pos = table.locate(clear.origin)?;
            match table.cell_mut(pos, clear.col) {
                ColumnData::Link(links) => {
                    debug_assert_eq!(links.get(pos.row), clear.target);
                    links.set_null(pos.row);
                }
                ColumnData::LinkList(lists) => lists[pos.row].nullify(clear.target),
                other => {
                    return Err(TramaError::InvariantViolation(format!(
                        "backlink points at {} column",
                        other.data_type()
                    )))
                }
            }
        }

        let removed = state.len();
        for (table_key, keys) in state.by_table() {
            self.get_mut(table_key)?.clusters.erase_many(&keys)?;
            for key in keys {
                self.env.repl.remove_object(table_key, key);
                self.env.metrics.object_removed();
            }
        }
        for _ in 0..state.cascaded {
            self.env.metrics.cascade_removed();
        }
        debug!(
            removed,
            cascaded = state.cascaded,
            tables = touched.len(),
            "table.objects.removed"
        );
        let touched: Vec<TableKey> = touched.into_iter().collect();
        self.bump_versions(&touched);
        Ok(())
    }

    /// Checks that every forward entry has exactly one matching backlink entry
    /// and vice versa, and that both halves of every pair name each other.
    pub(crate) fn verify_links(&self) -> Result<()> {
        let violation = |msg: String| TramaError::InvariantViolation(msg);
        let mut balance: FxHashMap<(TableKey, ColKey, ObjKey, ObjKey), i64> = FxHashMap::default();

        for table in self.tables() {
            table.clusters.verify()?;
            for (ndx, col) in table.spec.columns().iter().enumerate() {
                match col.ty {
                    DataType::Link | DataType::LinkList => {
                        let peer = col
                            .link
                            .ok_or_else(|| violation(format!("link column {} has no peer", col.key)))?;
                        let target = self
                            .get(peer.table)
                            .map_err(|_| violation(format!("link column {} targets missing table", col.key)))?;
                        let back = target
                            .spec
                            .position(peer.column)
                            .map(|pos| target.spec.column(pos))
                            .ok_or_else(|| violation(format!("link column {} lost its backlink", col.key)))?;
                        let expected = LinkPeer {
                            table: table.key,
                            column: col.key,
                            link_type: peer.link_type,
                        };
                        if back.ty != DataType::Backlink || back.link != Some(expected) {
                            return Err(violation(format!("link column {} is mispaired", col.key)));
                        }
                        let mut dangling = None;
                        table.clusters.traverse(|leaf| {
                            for row in 0..leaf.len() {
                                for t in leaf.column(ndx).link_targets(row) {
                                    if !target.is_valid(t) {
                                        dangling = Some(t);
                                        return ControlFlow::Break(());
                                    }
                                    *balance
                                        .entry((peer.table, peer.column, t, leaf.key(row)))
                                        .or_insert(0) += 1;
                                }
                            }
                            ControlFlow::Continue(())
                        });
                        if let Some(t) = dangling {
                            return Err(violation(format!("link to missing object {t}")));
                        }
                    }
                    DataType::Backlink => {
                        let peer = col
                            .link
                            .ok_or_else(|| violation(format!("backlink column {} has no peer", col.key)))?;
                        let origin = self
                            .get(peer.table)
                            .map_err(|_| violation(format!("backlink column {} names missing table", col.key)))?;
                        let paired = origin
                            .spec
                            .position(peer.column)
                            .map(|pos| origin.spec.column(pos))
                            .and_then(|fwd| fwd.link)
                            .map_or(false, |link| link.table == table.key && link.column == col.key);
                        if !paired {
                            return Err(violation(format!("backlink column {} is orphaned", col.key)));
                        }
                        table.clusters.traverse(|leaf| {
                            if let Some(lists) = leaf.column(ndx).as_lists() {
                                for (row, list) in lists.iter().enumerate() {
                                    for o in list.iter() {
                                        *balance.entry((table.key, col.key, leaf.key(row), o)).or_insert(0) -= 1;
                                    }
                                }
                            }
                            ControlFlow::Continue(())
                        });
                    }
                    _ => {
                        if col.link.is_some() {
                            return Err(violation(format!("{} column {} carries a link peer", col.ty, col.key)));
                        }
                    }
                }
            }
        }

        if let Some(((table, col, target, origin), diff)) = balance.into_iter().find(|(_, n)| *n != 0) {
            return Err(violation(format!(
                "link {origin} -> {target} through backlink column {col} of table {table} is off by {diff}"
            )));
        }
        Ok(())
    }
}
