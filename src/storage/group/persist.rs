//! Commit and rollback of group state through the allocator.
//!
//! Each table is written as a small tree of serialized blocks: a top record
//! pointing at its schema, its column key directory and its object store.
//! Rollback reads the last committed tree back and rebuilds every table.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::primitives::alloc::{Allocator, Ref};
use crate::storage::cluster::ClusterTree;
use crate::storage::spec::Spec;
use crate::storage::table::Table;
use crate::types::{ColKey, Result, TableKey, TramaError};

use super::{Group, GroupState};

/// Top record of one committed table.
#[derive(Serialize, Deserialize)]
struct TableTop {
    key: TableKey,
    spec: Ref,
    columns: Ref,
    clusters: Ref,
}

#[derive(Serialize)]
struct ClusterRootOut<'a> {
    tree: &'a ClusterTree,
    next_key: i64,
}

#[derive(Deserialize)]
struct ClusterRootIn {
    tree: ClusterTree,
    next_key: i64,
}

/// A table as of the last commit.
pub(crate) struct CommittedTable {
    key: TableKey,
    name: String,
    top: Ref,
}

fn write<T: Serialize + ?Sized>(alloc: &dyn Allocator, value: &T) -> Result<Ref> {
    Ok(alloc.alloc(serde_json::to_vec(value)?))
}

fn read<T: DeserializeOwned>(alloc: &dyn Allocator, r: Ref) -> Result<T> {
    let bytes = alloc
        .translate(r)
        .ok_or_else(|| TramaError::InvariantViolation(format!("dangling ref {}", r.0)))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Frees a table tree. Children are freed even when the top cannot be read.
fn free_top(alloc: &dyn Allocator, top: Ref) {
    if let Ok(record) = read::<TableTop>(alloc, top) {
        alloc.free(record.spec);
        alloc.free(record.columns);
        alloc.free(record.clusters);
    }
    alloc.free(top);
}

fn write_table(alloc: &dyn Allocator, table: &Table, written: &mut Vec<Ref>) -> Result<Ref> {
    let spec = write(alloc, table.spec())?;
    written.push(spec);
    let keys: Vec<ColKey> = table.spec().columns().iter().map(|c| c.key).collect();
    let columns = write(alloc, &keys)?;
    written.push(columns);
    let clusters = write(
        alloc,
        &ClusterRootOut {
            tree: table.clusters(),
            next_key: table.next_key(),
        },
    )?;
    written.push(clusters);
    write(
        alloc,
        &TableTop {
            key: table.key(),
            spec,
            columns,
            clusters,
        },
    )
}

fn read_table(alloc: &dyn Allocator, top: Ref) -> Result<Table> {
    let record: TableTop = read(alloc, top)?;
    let spec: Spec = read(alloc, record.spec)?;
    let columns: Vec<ColKey> = read(alloc, record.columns)?;
    if !spec.columns().iter().map(|c| c.key).eq(columns.iter().copied()) {
        return Err(TramaError::InvariantViolation(format!(
            "column directory of table {} disagrees with its schema",
            record.key
        )));
    }
    let root: ClusterRootIn = read(alloc, record.clusters)?;
    if root.tree.column_count() != spec.column_count() && !root.tree.is_empty() {
        return Err(TramaError::InvariantViolation(format!(
            "object store of table {} has the wrong column count",
            record.key
        )));
    }
    Ok(Table::from_parts(record.key, spec, root.tree, root.next_key))
}

impl GroupState {
    fn commit(&mut self) -> Result<usize> {
        let alloc = std::sync::Arc::clone(&self.tables.env().alloc);
        let mut next = Vec::new();
        let mut written = Vec::new();
        let outcome = (|| -> Result<()> {
            for key in self.tables.keys() {
                let name = self
                    .name_of(key)
                    .ok_or_else(|| TramaError::InvariantViolation(format!("table {key} has no name")))?
                    .to_owned();
                let top = write_table(&*alloc, self.tables.get(key)?, &mut written)?;
                written.clear();
                next.push(CommittedTable { key, name, top });
            }
            Ok(())
        })();
        if let Err(err) = outcome {
            for r in written {
                alloc.free(r);
            }
            for table in next {
                free_top(&*alloc, table.top);
            }
            return Err(err);
        }
        let count = next.len();
        for old in std::mem::replace(&mut self.committed, next) {
            free_top(&*alloc, old.top);
        }
        Ok(count)
    }

    fn rollback(&mut self) -> Result<usize> {
        let alloc = std::sync::Arc::clone(&self.tables.env().alloc);
        let mut tables = Vec::with_capacity(self.committed.len());
        for committed in &self.committed {
            let table = read_table(&*alloc, committed.top)?;
            if table.key() != committed.key {
                return Err(TramaError::InvariantViolation(format!(
                    "committed table {} read back as {}",
                    committed.key,
                    table.key()
                )));
            }
            tables.push(table);
        }
        let count = tables.len();
        self.tables.restore(tables);
        let mut names = vec![None; self.tables.slot_count()];
        for committed in &self.committed {
            names[committed.key.0 as usize] = Some(committed.name.clone());
        }
        self.names = names;
        let keys = self.tables.keys();
        self.tables.bump_versions(&keys);
        Ok(count)
    }
}

impl Group {
    /// Writes every table to the allocator as the new rollback point and
    /// frees the previous one.
    pub fn commit(&self) -> Result<()> {
        let tables = self.shared.state.lock().commit()?;
        debug!(tables, "group.committed");
        Ok(())
    }

    /// Restores every table to the last commit, or to an empty group when
    /// nothing was committed.
    ///
    /// All table versions advance. Accessors are refreshed afterwards: those
    /// of tables that did not exist at the commit are detached, and row or
    /// column handles whose object or column is gone are detached too.
    pub fn rollback(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        let tables = state.rollback()?;
        self.shared.mark_and_refresh(&state);
        debug!(tables, "group.rolled_back");
        Ok(())
    }
}
