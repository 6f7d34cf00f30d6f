use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::types::{DataType, ObjKey, Result, Timestamp, TramaError, Value};

use super::key_column::KeyColumn;

/// Per-leaf storage for one column, one variant per column kind.
///
/// Scalar kinds keep an `Option` per row; non-nullable columns simply never
/// hold `None`. Link lists and backlinks keep one [`KeyColumn`] per row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ColumnData {
    /// Integer values.
    Int(Vec<Option<i64>>),
    /// Boolean values.
    Bool(Vec<Option<bool>>),
    /// Float values.
    Float(#[serde(with = "f32_bits")] Vec<Option<f32>>),
    /// Double values.
    Double(#[serde(with = "f64_bits")] Vec<Option<f64>>),
    /// String values.
    String(Vec<Option<String>>),
    /// Binary values.
    Binary(Vec<Option<Vec<u8>>>),
    /// Timestamp values.
    Timestamp(Vec<Option<Timestamp>>),
    /// Single links, null when unset.
    Link(KeyColumn),
    /// Link lists.
    LinkList(Vec<KeyColumn>),
    /// Origin keys of incoming links, one multiset per row.
    Backlink(Vec<KeyColumn>),
}

/// Floating point cells are written as raw bits so NaN and the infinities
/// survive a commit.
mod f32_bits {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(cells: &[Option<f32>], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(cells.iter().map(|c| c.map(f32::to_bits)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Option<f32>>, D::Error> {
        let bits = Vec::<Option<u32>>::deserialize(d)?;
        Ok(bits.into_iter().map(|b| b.map(f32::from_bits)).collect())
    }
}

mod f64_bits {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(cells: &[Option<f64>], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(cells.iter().map(|c| c.map(f64::to_bits)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Option<f64>>, D::Error> {
        let bits = Vec::<Option<u64>>::deserialize(d)?;
        Ok(bits.into_iter().map(|b| b.map(f64::from_bits)).collect())
    }
}

/// Targets of one row's forward links. Usually tiny.
pub type LinkTargets = SmallVec<[ObjKey; 4]>;

impl ColumnData {
    /// Creates storage for `len` rows holding the column default.
    pub fn with_defaults(ty: DataType, nullable: bool, len: usize) -> Self {
        match ty {
            DataType::Int => ColumnData::Int(vec![(!nullable).then_some(0); len]),
            DataType::Bool => ColumnData::Bool(vec![(!nullable).then_some(false); len]),
            DataType::Float => ColumnData::Float(vec![(!nullable).then_some(0.0); len]),
            DataType::Double => ColumnData::Double(vec![(!nullable).then_some(0.0); len]),
            DataType::String => {
                ColumnData::String(vec![(!nullable).then(String::new); len])
            }
            DataType::Binary => ColumnData::Binary(vec![(!nullable).then(Vec::new); len]),
            DataType::Timestamp => {
                ColumnData::Timestamp(vec![(!nullable).then(Timestamp::default); len])
            }
            DataType::Link => ColumnData::Link(KeyColumn::with_nulls(len)),
            DataType::LinkList => ColumnData::LinkList(vec![KeyColumn::new(); len]),
            DataType::Backlink => ColumnData::Backlink(vec![KeyColumn::new(); len]),
        }
    }

    /// Column kind stored here.
    pub fn data_type(&self) -> DataType {
        match self {
            ColumnData::Int(_) => DataType::Int,
            ColumnData::Bool(_) => DataType::Bool,
            ColumnData::Float(_) => DataType::Float,
            ColumnData::Double(_) => DataType::Double,
            ColumnData::String(_) => DataType::String,
            ColumnData::Binary(_) => DataType::Binary,
            ColumnData::Timestamp(_) => DataType::Timestamp,
            ColumnData::Link(_) => DataType::Link,
            ColumnData::LinkList(_) => DataType::LinkList,
            ColumnData::Backlink(_) => DataType::Backlink,
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Int(v) => v.len(),
            ColumnData::Bool(v) => v.len(),
            ColumnData::Float(v) => v.len(),
            ColumnData::Double(v) => v.len(),
            ColumnData::String(v) => v.len(),
            ColumnData::Binary(v) => v.len(),
            ColumnData::Timestamp(v) => v.len(),
            ColumnData::Link(v) => v.len(),
            ColumnData::LinkList(v) => v.len(),
            ColumnData::Backlink(v) => v.len(),
        }
    }

    /// True when the column has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts a default-valued row at `row`.
    pub fn insert_default(&mut self, row: usize, nullable: bool) {
        match self {
            ColumnData::Int(v) => v.insert(row, (!nullable).then_some(0)),
            ColumnData::Bool(v) => v.insert(row, (!nullable).then_some(false)),
            ColumnData::Float(v) => v.insert(row, (!nullable).then_some(0.0)),
            ColumnData::Double(v) => v.insert(row, (!nullable).then_some(0.0)),
            ColumnData::String(v) => v.insert(row, (!nullable).then(String::new)),
            ColumnData::Binary(v) => v.insert(row, (!nullable).then(Vec::new)),
            ColumnData::Timestamp(v) => v.insert(row, (!nullable).then(Timestamp::default)),
            ColumnData::Link(v) => v.insert(row, ObjKey::NULL),
            ColumnData::LinkList(v) => v.insert(row, KeyColumn::new()),
            ColumnData::Backlink(v) => v.insert(row, KeyColumn::new()),
        }
    }

    /// Removes row `row`.
    pub fn erase(&mut self, row: usize) {
        match self {
            ColumnData::Int(v) => {
                v.remove(row);
            }
            ColumnData::Bool(v) => {
                v.remove(row);
            }
            ColumnData::Float(v) => {
                v.remove(row);
            }
            ColumnData::Double(v) => {
                v.remove(row);
            }
            ColumnData::String(v) => {
                v.remove(row);
            }
            ColumnData::Binary(v) => {
                v.remove(row);
            }
            ColumnData::Timestamp(v) => {
                v.remove(row);
            }
            ColumnData::Link(v) => v.erase(row),
            ColumnData::LinkList(v) => {
                v.remove(row);
            }
            ColumnData::Backlink(v) => {
                v.remove(row);
            }
        }
    }

    /// Keeps only the rows whose entry in `keep` is true, in one pass.
    pub fn retain_rows(&mut self, keep: &[bool]) {
        debug_assert_eq!(keep.len(), self.len());
        fn retain<T>(v: &mut Vec<T>, keep: &[bool]) {
            let mut mask = keep.iter();
            v.retain(|_| *mask.next().unwrap_or(&true));
        }
        match self {
            ColumnData::Int(v) => retain(v, keep),
            ColumnData::Bool(v) => retain(v, keep),
            ColumnData::Float(v) => retain(v, keep),
            ColumnData::Double(v) => retain(v, keep),
            ColumnData::String(v) => retain(v, keep),
            ColumnData::Binary(v) => retain(v, keep),
            ColumnData::Timestamp(v) => retain(v, keep),
            ColumnData::Link(col) => {
                let mut kept = KeyColumn::new();
                for (row, key) in col.iter().enumerate() {
                    if keep[row] {
                        kept.add(key);
                    }
                }
                *col = kept;
            }
            ColumnData::LinkList(v) => retain(v, keep),
            ColumnData::Backlink(v) => retain(v, keep),
        }
    }

    /// Splits off rows `at..` into a new column.
    pub fn split_off(&mut self, at: usize) -> ColumnData {
        match self {
            ColumnData::Int(v) => ColumnData::Int(v.split_off(at)),
            ColumnData::Bool(v) => ColumnData::Bool(v.split_off(at)),
            ColumnData::Float(v) => ColumnData::Float(v.split_off(at)),
            ColumnData::Double(v) => ColumnData::Double(v.split_off(at)),
            ColumnData::String(v) => ColumnData::String(v.split_off(at)),
            ColumnData::Binary(v) => ColumnData::Binary(v.split_off(at)),
            ColumnData::Timestamp(v) => ColumnData::Timestamp(v.split_off(at)),
            ColumnData::Link(col) => {
                let mut tail = KeyColumn::new();
                for row in at..col.len() {
                    tail.add(col.get(row));
                }
                col.truncate(at);
                ColumnData::Link(tail)
            }
            ColumnData::LinkList(v) => ColumnData::LinkList(v.split_off(at)),
            ColumnData::Backlink(v) => ColumnData::Backlink(v.split_off(at)),
        }
    }

    /// True if the cell at `row` is null. Links are null when unset; lists never are.
    pub fn is_null(&self, row: usize) -> bool {
        match self {
            ColumnData::Int(v) => v[row].is_none(),
            ColumnData::Bool(v) => v[row].is_none(),
            ColumnData::Float(v) => v[row].is_none(),
            ColumnData::Double(v) => v[row].is_none(),
            ColumnData::String(v) => v[row].is_none(),
            ColumnData::Binary(v) => v[row].is_none(),
            ColumnData::Timestamp(v) => v[row].is_none(),
            ColumnData::Link(col) => col.is_null(row),
            ColumnData::LinkList(_) | ColumnData::Backlink(_) => false,
        }
    }

    /// Reads the cell at `row` as an owned value.
    pub fn get(&self, row: usize) -> Value {
        fn opt<T>(v: &Option<T>, f: impl FnOnce(&T) -> Value) -> Value {
            v.as_ref().map_or(Value::Null, f)
        }
        match self {
            ColumnData::Int(v) => opt(&v[row], |x| Value::Int(*x)),
            ColumnData::Bool(v) => opt(&v[row], |x| Value::Bool(*x)),
            ColumnData::Float(v) => opt(&v[row], |x| Value::Float(*x)),
            ColumnData::Double(v) => opt(&v[row], |x| Value::Double(*x)),
            ColumnData::String(v) => opt(&v[row], |x| Value::String(x.clone())),
            ColumnData::Binary(v) => opt(&v[row], |x| Value::Binary(x.clone())),
            ColumnData::Timestamp(v) => opt(&v[row], |x| Value::Timestamp(*x)),
            ColumnData::Link(col) => Value::Link(col.get(row)),
            ColumnData::LinkList(v) | ColumnData::Backlink(v) => Value::LinkList(v[row].get_all()),
        }
    }

    /// Writes a scalar cell. Link kinds are written through the link graph,
    /// never through this path.
    pub fn set_scalar(&mut self, row: usize, value: Value) -> Result<()> {
        match (self, value) {
            (ColumnData::Int(v), Value::Int(x)) => v[row] = Some(x),
            (ColumnData::Int(v), Value::Null) => v[row] = None,
            (ColumnData::Bool(v), Value::Bool(x)) => v[row] = Some(x),
            (ColumnData::Bool(v), Value::Null) => v[row] = None,
            (ColumnData::Float(v), Value::Float(x)) => v[row] = Some(x),
            (ColumnData::Float(v), Value::Null) => v[row] = None,
            (ColumnData::Double(v), Value::Double(x)) => v[row] = Some(x),
            (ColumnData::Double(v), Value::Null) => v[row] = None,
            (ColumnData::String(v), Value::String(x)) => v[row] = Some(x),
            (ColumnData::String(v), Value::Null) => v[row] = None,
            (ColumnData::Binary(v), Value::Binary(x)) => v[row] = Some(x),
            (ColumnData::Binary(v), Value::Null) => v[row] = None,
            (ColumnData::Timestamp(v), Value::Timestamp(x)) => v[row] = Some(x),
            (ColumnData::Timestamp(v), Value::Null) => v[row] = None,
            _ => return Err(TramaError::Invalid("value does not match column storage")),
        }
        Ok(())
    }

    /// Non-null forward link targets of `row`, in storage order.
    pub fn link_targets(&self, row: usize) -> LinkTargets {
        match self {
            ColumnData::Link(col) if !col.is_null(row) => smallvec::smallvec![col.get(row)],
            ColumnData::LinkList(v) => v[row].iter().collect(),
            _ => LinkTargets::new(),
        }
    }

    /// Single-link storage.
    pub fn as_link(&self) -> Option<&KeyColumn> {
        match self {
            ColumnData::Link(col) => Some(col),
            _ => None,
        }
    }

    /// Mutable single-link storage.
    pub fn as_link_mut(&mut self) -> Option<&mut KeyColumn> {
        match self {
            ColumnData::Link(col) => Some(col),
            _ => None,
        }
    }

    /// Per-row key lists of a link list or backlink column.
    pub fn as_lists(&self) -> Option<&[KeyColumn]> {
        match self {
            ColumnData::LinkList(v) | ColumnData::Backlink(v) => Some(v),
            _ => None,
        }
    }

    /// Mutable per-row key lists of a link list or backlink column.
    pub fn as_lists_mut(&mut self) -> Option<&mut [KeyColumn]> {
        match self {
            ColumnData::LinkList(v) | ColumnData::Backlink(v) => Some(v),
            _ => None,
        }
    }
}

/// Rust type stored in a scalar column kind.
///
/// Used by the typed get/set paths and the aggregate scans so that a typed
/// access against a column of another kind fails with a type mismatch instead
/// of reinterpreting storage.
pub trait ColumnValue: Clone + Sized {
    /// Column kind holding values of this type.
    const TYPE: DataType;

    /// Cells of `col`, or `None` when it stores another kind.
    fn cells(col: &ColumnData) -> Option<&[Option<Self>]>;

    /// Wraps the value.
    fn into_value(self) -> Value;

    /// Unwraps a value of the matching variant.
    fn from_value(value: Value) -> Option<Self>;
}

macro_rules! column_value {
    ($ty:ty, $variant:ident) => {
        impl ColumnValue for $ty {
            const TYPE: DataType = DataType::$variant;

            fn cells(col: &ColumnData) -> Option<&[Option<Self>]> {
                match col {
                    ColumnData::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn into_value(self) -> Value {
                Value::$variant(self)
            }

            fn from_value(value: Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

column_value!(i64, Int);
column_value!(bool, Bool);
column_value!(f32, Float);
column_value!(f64, Double);
column_value!(String, String);
column_value!(Vec<u8>, Binary);
column_value!(Timestamp, Timestamp);
