use std::iter::FusedIterator;

use crate::types::ObjKey;

use super::{Obj, TableRef};

/// Iterator over the objects of a table in ascending key order.
///
/// The iterator holds no lock between steps. Each step seeks the first key
/// above the last one yielded, so objects created or removed meanwhile are
/// seen or skipped accordingly. Iteration ends when the table detaches.
pub struct TableIter {
    table: TableRef,
    next: Option<ObjKey>,
}

impl TableIter {
    pub(crate) fn new(table: TableRef) -> Self {
        Self {
            table,
            next: Some(ObjKey(i64::MIN)),
        }
    }
}

impl Iterator for TableIter {
    type Item = Obj;

    fn next(&mut self) -> Option<Obj> {
        let from = self.next?;
        let found = self
            .table
            .read(|t| Ok(t.clusters().first_key_at_or_after(from)))
            .ok()
            .flatten();
        match found {
            Some(key) => {
                self.next = key.0.checked_add(1).map(ObjKey);
                Some(Obj::new(self.table.clone(), key))
            }
            None => {
                self.next = None;
                None
            }
        }
    }
}

impl FusedIterator for TableIter {}
