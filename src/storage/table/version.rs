use std::sync::Arc;

use tracing::trace;

use crate::types::TableKey;

use super::TableSet;

impl TableSet {
    /// Bumps the version of `origin` after a mutation.
    pub(crate) fn bump_version(&mut self, origin: TableKey) {
        self.bump_versions(&[origin]);
    }

    /// Advances the global version once, then brings every table in `origins`
    /// up to date and propagates the bump along outgoing and incoming link
    /// columns.
    ///
    /// A table is visited at most once per bump: the allocator reports
    /// propagation as due only while its local version lags the global one,
    /// and the mark bit guards against revisiting through link cycles.
    pub(crate) fn bump_versions(&mut self, origins: &[TableKey]) {
        let alloc = Arc::clone(&self.env.alloc);
        let propagate = self.env.propagate_versions;
        let global = alloc.bump_global_version();
        let mut pending: Vec<TableKey> = origins.to_vec();
        let mut visited: Vec<TableKey> = Vec::new();
        while let Some(key) = pending.pop() {
            let Ok(table) = self.get_mut(key) else {
                continue;
            };
            if table.mark {
                continue;
            }
            table.mark = true;
            visited.push(key);
            if !alloc.should_propagate_version(&mut table.version) || !propagate {
                continue;
            }
            pending.extend(
                table
                    .spec
                    .columns()
                    .iter()
                    .filter_map(|col| col.link)
                    .map(|peer| peer.table)
                    .filter(|&peer| peer != key),
            );
        }
        for key in &visited {
            if let Ok(table) = self.get_mut(*key) {
                table.mark = false;
            }
        }
        trace!(global, tables = visited.len(), "table.version.bumped");
    }
}
