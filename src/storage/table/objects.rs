use tracing::debug;

use crate::types::{DataType, ObjKey, Result, TableKey, TramaError, Value};

use super::{CascadeState, Table, TableSet};

impl Table {
    /// Next key handed out by the allocation counter, skipping keys that were
    /// taken explicitly.
    fn allocate_key(&self) -> Result<ObjKey> {
        let mut candidate = self.next_key;
        while self.clusters.is_valid(ObjKey(candidate)) {
            candidate = candidate
                .checked_add(1)
                .ok_or(TramaError::Invalid("object key space exhausted"))?;
        }
        Ok(ObjKey(candidate))
    }

    /// Inserts a row for `key`. The counter never moves backwards; after
    /// `i64::MAX` it stays there and allocation fails.
    fn insert_object(&mut self, key: ObjKey) -> Result<()> {
        self.clusters.insert(key)?;
        let after = key.0.checked_add(1).unwrap_or(i64::MAX);
        self.next_key = self.next_key.max(after);
        Ok(())
    }
}

impl TableSet {
    /// Creates a default-valued object. A null `key` asks for the next key
    /// from the table's counter; any other key must be unused.
    pub(crate) fn create_object(&mut self, table_key: TableKey, key: ObjKey) -> Result<ObjKey> {
        let table = self.get_mut(table_key)?;
        let key = if key.is_null() {
            table.allocate_key()?
        } else {
            key
        };
        table.insert_object(key)?;
        self.env.repl.create_object(table_key, key);
        self.env.metrics.object_created();
        self.bump_version(table_key);
        Ok(key)
    }

    /// Creates `count` objects with counter-allocated keys. Creates nothing
    /// when the key space runs out partway.
    pub(crate) fn create_objects(&mut self, table_key: TableKey, count: usize) -> Result<Vec<ObjKey>> {
        let table = self.get_mut(table_key)?;
        let counter = table.next_key;
        let mut keys = Vec::with_capacity(count);
        for _ in 0..count {
            match table.allocate_key().and_then(|key| table.insert_object(key).map(|()| key)) {
                Ok(key) => keys.push(key),
                Err(err) => {
                    keys.sort_unstable();
                    table.clusters.erase_many(&keys)?;
                    table.next_key = counter;
                    return Err(err);
                }
            }
        }
        for &key in &keys {
            self.env.repl.create_object(table_key, key);
            self.env.metrics.object_created();
        }
        self.bump_version(table_key);
        Ok(keys)
    }

    /// Creates one object per key. Fails without creating anything if a key
    /// is null, repeated, or already in use.
    pub(crate) fn create_objects_with_keys(&mut self, table_key: TableKey, keys: &[ObjKey]) -> Result<()> {
        let table = self.get(table_key)?;
        let mut sorted = keys.to_vec();
        sorted.sort_unstable();
        if sorted.contains(&ObjKey::NULL) {
            return Err(TramaError::Invalid("cannot create an object with the null key"));
        }
        if let Some(w) = sorted.windows(2).find(|w| w[0] == w[1]) {
            return Err(TramaError::DuplicateKey(w[0]));
        }
        if let Some(&taken) = sorted.iter().find(|&&k| table.is_valid(k)) {
            return Err(TramaError::DuplicateKey(taken));
        }

        let table = self.get_mut(table_key)?;
        for &key in keys {
            table.insert_object(key)?;
        }
        for &key in keys {
            self.env.repl.create_object(table_key, key);
            self.env.metrics.object_created();
        }
        self.bump_version(table_key);
        Ok(())
    }

    /// Writes public column `ndx` of object `key`.
    ///
    /// Scalar columns take a value of their own type, or null when nullable.
    /// Link columns take a link or null and go through the link graph. Link
    /// lists are edited through the list operations only.
    pub(crate) fn set_value(&mut self, table_key: TableKey, key: ObjKey, ndx: usize, value: Value) -> Result<()> {
        let col = self.get(table_key)?.public_column(ndx)?.clone();
        match col.ty {
            DataType::Link => match value {
                Value::Link(target) => self.set_link(table_key, key, ndx, target),
                Value::Null => self.set_link(table_key, key, ndx, ObjKey::NULL),
                other => Err(mismatch(ndx, &other, col.ty)),
            },
            DataType::LinkList | DataType::Backlink => {
                Err(TramaError::Invalid("link lists are edited through the list operations"))
            }
            _ => {
                if value.is_null() {
                    if !col.nullable {
                        return Err(TramaError::ColumnNotNullable(ndx));
                    }
                } else if value.data_type() != Some(col.ty) {
                    return Err(mismatch(ndx, &value, col.ty));
                }
                let table = self.get_mut(table_key)?;
                let pos = table.locate(key)?;
                table.cell_mut(pos, ndx).set_scalar(pos.row, value)?;
                self.bump_version(table_key);
                Ok(())
            }
        }
    }

    /// Removes object `key`, nullifying links into it and dropping the
    /// backlinks of its own links. Never cascades, whatever the link strength.
    pub(crate) fn remove_object(&mut self, table_key: TableKey, key: ObjKey) -> Result<()> {
        self.get(table_key)?.locate(key)?;
        let mut state = CascadeState::new();
        state.schedule(table_key, key);
        self.remove_objects(state, false)
    }

    /// Removes object `key` and, transitively, every object left without a
    /// strong incoming link.
    pub(crate) fn remove_object_recursive(&mut self, table_key: TableKey, key: ObjKey) -> Result<()> {
        self.get(table_key)?.locate(key)?;
        let mut state = CascadeState::new();
        state.schedule(table_key, key);
        self.remove_objects(state, true)
    }

    /// Removes every object of the table in one pass, with the link effects
    /// of removing each one individually.
    pub(crate) fn clear(&mut self, table_key: TableKey) -> Result<()> {
        let table = self.get(table_key)?;
        if table.size() == 0 {
            self.bump_version(table_key);
            return Ok(());
        }
        let mut state = CascadeState::new();
        for key in table.clusters.keys() {
            state.schedule(table_key, key);
        }
        debug!(table = %table_key, objects = state.len(), "table.clear");
        self.remove_objects(state, false)
    }
}

fn mismatch(ndx: usize, value: &Value, column: DataType) -> TramaError {
    match value.data_type() {
        Some(expected) => TramaError::TypeMismatch {
            column: ndx,
            expected,
            actual: column,
        },
        None => TramaError::ColumnNotNullable(ndx),
    }
}
