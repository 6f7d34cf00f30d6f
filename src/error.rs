use thiserror::Error;

use crate::types::{DataType, ObjKey, TableKey};

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TramaError>;

/// Errors reported by table, object and accessor operations.
///
/// Every variant except [`TramaError::InvariantViolation`] describes a usage
/// error: the call was rejected before anything was mutated and can be retried
/// once corrected.
#[derive(Debug, Error)]
pub enum TramaError {
    /// A column index was past the end of the public column list.
    #[error("column index {0} out of range")]
    ColumnIndexOutOfRange(usize),
    /// A column or table name is already in use.
    #[error("duplicate column name: {0}")]
    DuplicateName(String),
    /// A column or table name exceeds the 63 byte limit.
    #[error("name too long ({0} bytes, max 63)")]
    NameTooLong(usize),
    /// No public column carries the given name.
    #[error("no column named {0}")]
    NoSuchColumn(String),
    /// A typed accessor was used on a column of a different type.
    #[error("type mismatch on column {column}: expected {expected}, found {actual}")]
    TypeMismatch {
        /// Column index the access targeted.
        column: usize,
        /// Type the accessor expected.
        expected: DataType,
        /// Type the column actually stores.
        actual: DataType,
    },
    /// Null was written to a column that does not accept it.
    #[error("column {0} is not nullable")]
    ColumnNotNullable(usize),
    /// The object key is not present in the table.
    #[error("key {0} not found")]
    KeyNotFound(ObjKey),
    /// An object with this key already exists.
    #[error("duplicate key {0}")]
    DuplicateKey(ObjKey),
    /// The table key or name does not resolve to a live table.
    #[error("no such table")]
    NoSuchTable,
    /// A table with this name already exists in the group.
    #[error("duplicate table name: {0}")]
    DuplicateTableName(String),
    /// The table is still the target of link columns in other tables.
    #[error("table {0} is the target of links from other tables")]
    CrossTableLinkTarget(TableKey),
    /// The accessor is no longer bound to live storage.
    #[error("accessor is detached")]
    Detached,
    /// Generic argument validation failure.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// An internal consistency check failed.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    /// Encoding or decoding a persisted record failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
