use serde::{Deserialize, Serialize};

use crate::types::{ColKey, DataType, LinkType, Result, TableKey, TramaError};

/// Maximum length of a column or table name, in bytes.
pub const MAX_NAME_LEN: usize = 63;

/// The other half of a link/backlink pair.
///
/// On a forward column it names the target table and its backlink column; on
/// a backlink column it names the origin table and its forward column.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkPeer {
    /// Table holding the reciprocal column.
    pub table: TableKey,
    /// Reciprocal column.
    pub column: ColKey,
    /// Ownership semantics, mirrored on both halves.
    pub link_type: LinkType,
}

/// Descriptor of one column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Stable identity.
    pub key: ColKey,
    /// Name; empty for backlink columns.
    pub name: String,
    /// Column kind.
    pub ty: DataType,
    /// Whether cells may be null.
    pub nullable: bool,
    /// Pairing information for link and backlink columns.
    pub link: Option<LinkPeer>,
}

/// Ordered column schema of a table.
///
/// Public columns come first, in user order. Backlink columns are hidden and
/// always follow them, so public indexes never move when a backlink is added.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Spec {
    columns: Vec<ColumnSpec>,
    public_count: usize,
    next_col_key: u32,
}

pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.len() > MAX_NAME_LEN {
        return Err(TramaError::NameTooLong(name.len()));
    }
    Ok(())
}

impl Spec {
    /// Number of user-visible columns.
    pub fn public_column_count(&self) -> usize {
        self.public_count
    }

    /// Number of columns including hidden backlinks.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Descriptor at storage position `ndx`.
    pub fn column(&self, ndx: usize) -> &ColumnSpec {
        &self.columns[ndx]
    }

    pub(crate) fn column_mut(&mut self, ndx: usize) -> &mut ColumnSpec {
        &mut self.columns[ndx]
    }

    /// All descriptors in storage order.
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Public descriptor at `ndx`, or an out-of-range error.
    pub fn public_column(&self, ndx: usize) -> Result<&ColumnSpec> {
        if ndx >= self.public_count {
            return Err(TramaError::ColumnIndexOutOfRange(ndx));
        }
        Ok(&self.columns[ndx])
    }

    /// Public index of the column called `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns[..self.public_count]
            .iter()
            .position(|c| c.name == name)
    }

    /// Storage position of the column with key `key`.
    pub fn position(&self, key: ColKey) -> Option<usize> {
        self.columns.iter().position(|c| c.key == key)
    }

    /// Storage position of the backlink column paired with `origin`/`origin_col`.
    pub fn backlink_position(&self, origin: TableKey, origin_col: ColKey) -> Option<usize> {
        self.columns[self.public_count..]
            .iter()
            .position(|c| {
                c.link
                    .map(|peer| peer.table == origin && peer.column == origin_col)
                    .unwrap_or(false)
            })
            .map(|pos| pos + self.public_count)
    }

    /// Positions of forward link columns.
    pub fn forward_link_positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.columns[..self.public_count]
            .iter()
            .enumerate()
            .filter(|(_, c)| c.ty.is_link())
            .map(|(ndx, _)| ndx)
    }

    /// Positions of backlink columns.
    pub fn backlink_positions(&self) -> std::ops::Range<usize> {
        self.public_count..self.columns.len()
    }

    /// Rejects names that are too long or already used by a public column
    /// other than `except`.
    pub fn check_name(&self, name: &str, except: Option<usize>) -> Result<()> {
        validate_name(name)?;
        match self.index_of(name) {
            Some(ndx) if Some(ndx) != except => Err(TramaError::DuplicateName(name.to_owned())),
            _ => Ok(()),
        }
    }

    /// Key the next inserted column will receive.
    pub(crate) fn peek_col_key(&self) -> ColKey {
        ColKey(self.next_col_key)
    }

    fn alloc_col_key(&mut self) -> ColKey {
        let key = ColKey(self.next_col_key);
        self.next_col_key += 1;
        key
    }

    /// Inserts a public column at `ndx`. The caller validated the name.
    pub(crate) fn insert_public(
        &mut self,
        ndx: usize,
        name: &str,
        ty: DataType,
        nullable: bool,
        link: Option<LinkPeer>,
    ) -> ColKey {
        debug_assert!(ndx <= self.public_count);
        debug_assert!(ty != DataType::Backlink);
        let key = self.alloc_col_key();
        self.columns.insert(
            ndx,
            ColumnSpec {
                key,
                name: name.to_owned(),
                ty,
                nullable,
                link,
            },
        );
        self.public_count += 1;
        key
    }

    /// Appends a hidden backlink column and returns its position and key.
    pub(crate) fn push_backlink(&mut self, origin: LinkPeer) -> (usize, ColKey) {
        let key = self.alloc_col_key();
        self.columns.push(ColumnSpec {
            key,
            name: String::new(),
            ty: DataType::Backlink,
            nullable: false,
            link: Some(origin),
        });
        (self.columns.len() - 1, key)
    }

    /// Removes the column at storage position `ndx`.
    pub(crate) fn remove(&mut self, ndx: usize) -> ColumnSpec {
        if ndx < self.public_count {
            self.public_count -= 1;
        }
        self.columns.remove(ndx)
    }
}
