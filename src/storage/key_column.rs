use serde::{Deserialize, Serialize};

use crate::types::ObjKey;

/// Flat sequence of [`ObjKey`] values.
///
/// Keys are stored shifted by one so that a stored zero always means null,
/// whatever the logical value of the null key is.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyColumn {
    values: Vec<u64>,
}

#[inline]
fn encode(key: ObjKey) -> u64 {
    (key.0 as u64).wrapping_add(1)
}

#[inline]
fn decode(stored: u64) -> ObjKey {
    ObjKey(stored.wrapping_sub(1) as i64)
}

impl KeyColumn {
    /// Creates an empty column.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a column of `len` null slots.
    pub fn with_nulls(len: usize) -> Self {
        Self {
            values: vec![0; len],
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when there are no slots.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Appends `key`.
    pub fn add(&mut self, key: ObjKey) {
        self.values.push(encode(key));
    }

    /// Inserts `key` at `ndx`, shifting later slots.
    pub fn insert(&mut self, ndx: usize, key: ObjKey) {
        self.values.insert(ndx, encode(key));
    }

    /// Overwrites slot `ndx`.
    pub fn set(&mut self, ndx: usize, key: ObjKey) {
        self.values[ndx] = encode(key);
    }

    /// Clears slot `ndx` to null.
    pub fn set_null(&mut self, ndx: usize) {
        self.values[ndx] = 0;
    }

    /// Reads slot `ndx`; a null slot yields [`ObjKey::NULL`].
    pub fn get(&self, ndx: usize) -> ObjKey {
        decode(self.values[ndx])
    }

    /// True if slot `ndx` is null.
    pub fn is_null(&self, ndx: usize) -> bool {
        self.values[ndx] == 0
    }

    /// All keys in slot order.
    pub fn get_all(&self) -> Vec<ObjKey> {
        self.iter().collect()
    }

    /// Iterates the keys in slot order.
    pub fn iter(&self) -> impl Iterator<Item = ObjKey> + '_ {
        self.values.iter().map(|&stored| decode(stored))
    }

    /// Removes slot `ndx`, shifting later slots down.
    pub fn erase(&mut self, ndx: usize) {
        self.values.remove(ndx);
    }

    /// Drops every slot from `ndx` onwards.
    pub fn truncate(&mut self, ndx: usize) {
        self.values.truncate(ndx);
    }

    /// Removes every slot.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Position of the first slot in `begin..end` holding `key`.
    ///
    /// Null slots only match when `key` is itself the null key.
    pub fn find_first(&self, key: ObjKey, begin: usize, end: usize) -> Option<usize> {
        let end = end.min(self.values.len());
        if begin >= end {
            return None;
        }
        let needle = encode(key);
        self.values[begin..end]
            .iter()
            .position(|&stored| stored == needle)
            .map(|pos| pos + begin)
    }

    /// Number of slots holding `key`.
    pub fn count(&self, key: ObjKey) -> usize {
        let needle = encode(key);
        self.values.iter().filter(|&&stored| stored == needle).count()
    }

    /// Removes the first slot holding `key`.
    ///
    /// # Panics
    ///
    /// The caller guarantees that `key` is present; an absent key means the
    /// link/backlink bookkeeping is already broken.
    pub fn nullify(&mut self, key: ObjKey) {
        let pos = self.find_first(key, 0, self.values.len());
        assert!(pos.is_some(), "key {key} missing from key column");
        if let Some(pos) = pos {
            self.values.remove(pos);
        }
    }

    /// Removes every slot holding `key` and returns how many were removed.
    pub fn remove_all(&mut self, key: ObjKey) -> usize {
        let needle = encode(key);
        let before = self.values.len();
        self.values.retain(|&stored| stored != needle);
        before - self.values.len()
    }
}
