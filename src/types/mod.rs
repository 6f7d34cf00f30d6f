//! Identifier newtypes and value types shared by every storage layer.

use std::fmt;

use serde::{Deserialize, Serialize};

pub use crate::error::{Result, TramaError};

/// Stable object identifier.
///
/// Keys are independent of where an object physically lives inside the
/// cluster tree. The value `-1` is reserved as the null key, which is also
/// what a null link holds.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct ObjKey(pub i64);

impl ObjKey {
    /// The reserved "no object" key.
    pub const NULL: ObjKey = ObjKey(-1);

    /// Returns true for the reserved null key.
    pub const fn is_null(self) -> bool {
        self.0 == Self::NULL.0
    }
}

impl Default for ObjKey {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for ObjKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<i64> for ObjKey {
    fn from(value: i64) -> Self {
        ObjKey(value)
    }
}

/// Arena index of a table inside its group. Never reused while the group lives.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct TableKey(pub u32);

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable column identifier, unique within one table.
///
/// Positional column indexes shift when columns are inserted or removed; the
/// column key does not, so link/backlink pairing is recorded with it.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct ColKey(pub u32);

impl fmt::Display for ColKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical column type.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub enum DataType {
    /// 64-bit signed integer.
    Int,
    /// Boolean.
    Bool,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// UTF-8 string.
    String,
    /// Opaque bytes.
    Binary,
    /// Seconds plus nanoseconds.
    Timestamp,
    /// Single optional link to an object in the target table.
    Link,
    /// Ordered list of links to objects in the target table.
    LinkList,
    /// Hidden reciprocal of a link column; never created directly.
    Backlink,
}

impl DataType {
    /// True for forward link columns.
    pub const fn is_link(self) -> bool {
        matches!(self, DataType::Link | DataType::LinkList)
    }

    /// True if values of this type may be null when the column allows it.
    pub const fn supports_null(self) -> bool {
        !matches!(self, DataType::Link | DataType::LinkList | DataType::Backlink)
    }

    /// Lower-case display name.
    pub const fn name(self) -> &'static str {
        match self {
            DataType::Int => "int",
            DataType::Bool => "bool",
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::String => "string",
            DataType::Binary => "binary",
            DataType::Timestamp => "timestamp",
            DataType::Link => "link",
            DataType::LinkList => "linklist",
            DataType::Backlink => "backlink",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ownership semantics of a link column.
///
/// A strong link means the origin owns the target: when the last strong link
/// to a target is broken by a link write, the target is cascade-removed. A
/// weak link carries no ownership.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum LinkType {
    /// No ownership.
    #[default]
    Weak,
    /// Origin owns target.
    Strong,
}

impl LinkType {
    /// True for [`LinkType::Strong`].
    pub const fn is_strong(self) -> bool {
        matches!(self, LinkType::Strong)
    }
}

/// Point in time with nanosecond precision.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since the Unix epoch.
    pub seconds: i64,
    /// Sub-second part, always below one billion.
    pub nanoseconds: u32,
}

impl Timestamp {
    /// Nanoseconds in one second.
    pub const NANOSECONDS_PER_SECOND: u32 = 1_000_000_000;

    /// Creates a timestamp. `nanoseconds` must be below one billion.
    pub fn new(seconds: i64, nanoseconds: u32) -> Self {
        debug_assert!(nanoseconds < Self::NANOSECONDS_PER_SECOND);
        Self {
            seconds,
            nanoseconds,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}, {})", self.seconds, self.nanoseconds)
    }
}

/// Owned cell value, used by the untyped get/set paths.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Null cell.
    Null,
    /// Integer cell.
    Int(i64),
    /// Boolean cell.
    Bool(bool),
    /// Float cell.
    Float(f32),
    /// Double cell.
    Double(f64),
    /// String cell.
    String(String),
    /// Binary cell.
    Binary(Vec<u8>),
    /// Timestamp cell.
    Timestamp(Timestamp),
    /// Single link; [`ObjKey::NULL`] when unset.
    Link(ObjKey),
    /// Link list contents.
    LinkList(Vec<ObjKey>),
}

impl Value {
    /// Column type this value belongs to, or `None` for [`Value::Null`].
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Int(_) => Some(DataType::Int),
            Value::Bool(_) => Some(DataType::Bool),
            Value::Float(_) => Some(DataType::Float),
            Value::Double(_) => Some(DataType::Double),
            Value::String(_) => Some(DataType::String),
            Value::Binary(_) => Some(DataType::Binary),
            Value::Timestamp(_) => Some(DataType::Timestamp),
            Value::Link(_) => Some(DataType::Link),
            Value::LinkList(_) => Some(DataType::LinkList),
        }
    }

    /// True for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v}"),
            Value::Binary(v) => write!(f, "binary(len={})", v.len()),
            Value::Timestamp(v) => write!(f, "{v}"),
            Value::Link(v) => write!(f, "link({v})"),
            Value::LinkList(v) => write!(f, "linklist(len={})", v.len()),
        }
    }
}
