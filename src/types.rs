//! Record model shared by the write path, data files and merge functions.
//!
//! Primary keys are order-preserving encoded bytes supplied by the schema
//! layer; the store only compares them bytewise.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// The kind of change a record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowKind {
    /// A new row.
    Insert = 0,
    /// A new version of an existing row.
    Update = 1,
    /// A tombstone. Suppresses older versions until compaction drops it.
    Delete = 2,
}

impl RowKind {
    /// Converts a u8 to a RowKind.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RowKind::Insert),
            1 => Some(RowKind::Update),
            2 => Some(RowKind::Delete),
            _ => None,
        }
    }

    /// Converts the RowKind to a u8.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns true for inserts and updates.
    pub fn is_add(self) -> bool {
        !matches!(self, RowKind::Delete)
    }
}

/// A single field value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns true if the value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Compares two values of the same type. Returns `None` for mismatched
    /// types, NULLs and NaN.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Double(b)) => (*a as f64).partial_cmp(b),
            (Value::Double(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    fn encoded_size(&self) -> usize {
        match self {
            Value::Null | Value::Bool(_) => 1,
            Value::Int(_) | Value::Double(_) => 8,
            Value::String(s) => s.len() + 8,
            Value::Bytes(b) => b.len() + 8,
        }
    }
}

/// The value columns of a row.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Row(pub Vec<Value>);

impl Row {
    /// Creates a row from its fields.
    pub fn new(fields: Vec<Value>) -> Self {
        Row(fields)
    }

    /// Number of fields.
    pub fn arity(&self) -> usize {
        self.0.len()
    }

    /// Field at `pos`, NULL when out of range.
    pub fn get(&self, pos: usize) -> &Value {
        self.0.get(pos).unwrap_or(&Value::Null)
    }

    /// The fields.
    pub fn fields(&self) -> &[Value] {
        &self.0
    }

    /// Approximate in-memory footprint.
    pub fn approximate_size(&self) -> usize {
        self.0.iter().map(Value::encoded_size).sum()
    }
}

/// One version of a row: primary key, sequence number, kind and value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    /// Encoded primary key.
    pub key: Vec<u8>,
    /// Global write order of this version.
    pub sequence: u64,
    /// Insert, update or delete.
    pub kind: RowKind,
    /// Value columns. Empty for tombstones written without a value.
    pub value: Row,
}

impl KeyValue {
    /// Creates a new record version.
    pub fn new(key: impl Into<Vec<u8>>, sequence: u64, kind: RowKind, value: Row) -> Self {
        Self { key: key.into(), sequence, kind, value }
    }

    /// Approximate in-memory footprint.
    pub fn approximate_size(&self) -> usize {
        self.key.len() + 9 + self.value.approximate_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_kind_roundtrip() {
        for kind in [RowKind::Insert, RowKind::Update, RowKind::Delete] {
            assert_eq!(RowKind::from_u8(kind.as_u8()), Some(kind));
        }
        assert_eq!(RowKind::from_u8(9), None);
        assert!(RowKind::Update.is_add());
        assert!(!RowKind::Delete.is_add());
    }

    #[test]
    fn test_value_compare() {
        assert_eq!(Value::Int(1).compare(&Value::Int(2)), Some(Ordering::Less));
        assert_eq!(Value::Int(3).compare(&Value::Double(2.5)), Some(Ordering::Greater));
        assert_eq!(Value::Int(1).compare(&Value::String("a".into())), None);
        assert_eq!(Value::Null.compare(&Value::Null), None);
    }

    #[test]
    fn test_row_get_out_of_range() {
        let row = Row::new(vec![Value::Int(1)]);
        assert_eq!(row.get(0), &Value::Int(1));
        assert_eq!(row.get(5), &Value::Null);
    }
}
