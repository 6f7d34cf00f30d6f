//! Two-phase reconciliation of accessors after a transaction boundary.
//!
//! Phase one marks the table accessors whose storage may have been rebuilt.
//! Phase two visits only marked accessors: those whose table is gone are
//! detached, the others re-resolve their row and column handles. Every
//! visited accessor is unmarked.

use tracing::debug;

use crate::types::TableKey;

use super::{Group, GroupShared, GroupState};

impl GroupShared {
    fn mark_all(&self) {
        for acc in self.cached() {
            acc.mark();
        }
    }

    pub(super) fn refresh_marked(&self, state: &GroupState) {
        let mut refreshed = 0;
        let mut detached = 0;
        for acc in self.cached().into_iter().filter(|acc| acc.is_marked()) {
            match state.tables.get(acc.key()) {
                Ok(table) if acc.is_attached() => {
                    acc.refresh(table, &*self.metrics);
                    refreshed += 1;
                }
                _ => {
                    self.detach_table(acc.key());
                    acc.detach(&*self.metrics);
                    detached += 1;
                }
            }
            acc.unmark();
        }
        debug!(refreshed, detached, "group.accessors.refreshed");
    }

    pub(super) fn mark_and_refresh(&self, state: &GroupState) {
        self.mark_all();
        self.refresh_marked(state);
    }
}

impl Group {
    /// Marks every live table accessor for the next [`Group::refresh`].
    pub fn mark_all(&self) {
        self.shared.mark_all();
    }

    /// Marks the accessor of table `key`, if one is alive.
    pub fn mark_table(&self, key: TableKey) {
        if let Some(acc) = self.shared.cached_accessor(key) {
            acc.mark();
        }
    }

    /// Refreshes marked accessors against the current tables.
    pub fn refresh(&self) {
        let state = self.shared.state.lock();
        self.shared.refresh_marked(&state);
    }
}
