//! Scalar values, column types, and the value buffers rows travel in.
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PenumbraError, Result};

/// Typed scalar read from, or bound into, a relational command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Binary payload.
    Bytes(Vec<u8>),
    /// Nanoseconds since the Unix epoch, UTC.
    DateTime(i128),
}

impl Value {
    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the kind of a non-null value.
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ValueKind::Bool),
            Value::Int(_) => Some(ValueKind::Int),
            Value::Float(_) => Some(ValueKind::Float),
            Value::String(_) => Some(ValueKind::String),
            Value::Bytes(_) => Some(ValueKind::Bytes),
            Value::DateTime(_) => Some(ValueKind::DateTime),
        }
    }

    /// Converts a non-null value into its hashable key form.
    pub fn key(&self) -> Option<KeyValue> {
        match self {
            Value::Null => None,
            Value::Bool(v) => Some(KeyValue::Bool(*v)),
            Value::Int(v) => Some(KeyValue::Int(*v)),
            Value::Float(v) => Some(KeyValue::Float(v.to_bits())),
            Value::String(v) => Some(KeyValue::String(v.clone())),
            Value::Bytes(v) => Some(KeyValue::Bytes(v.clone())),
            Value::DateTime(v) => Some(KeyValue::DateTime(*v)),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "'{v}'"),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::DateTime(v) => write!(f, "{v}ns"),
        }
    }
}

/// Storage kind of a column or scalar expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// Boolean.
    Bool,
    /// Signed integer.
    Int,
    /// Float.
    Float,
    /// String.
    String,
    /// Binary.
    Bytes,
    /// Timestamp.
    DateTime,
    /// Untyped, e.g. a bare `NULL` literal.
    Any,
}

/// Kind plus nullability, the relational analogue of a declared CLR type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SqlType {
    /// Storage kind.
    pub kind: ValueKind,
    /// Whether the expression may evaluate to NULL.
    pub nullable: bool,
}

impl SqlType {
    /// Non-nullable type of the given kind.
    pub const fn required(kind: ValueKind) -> Self {
        Self {
            kind,
            nullable: false,
        }
    }

    /// Nullable type of the given kind.
    pub const fn optional(kind: ValueKind) -> Self {
        Self {
            kind,
            nullable: true,
        }
    }

    /// Non-nullable boolean.
    pub const fn boolean() -> Self {
        Self::required(ValueKind::Bool)
    }

    /// Returns the same kind made nullable.
    pub const fn as_nullable(self) -> Self {
        Self::optional(self.kind)
    }
}

/// Hashable form of a non-null key column value. Floats are compared by bits.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyValue {
    /// Boolean key.
    Bool(bool),
    /// Integer key.
    Int(i64),
    /// Float key, raw IEEE bits.
    Float(u64),
    /// String key.
    String(String),
    /// Binary key.
    Bytes(Vec<u8>),
    /// Timestamp key.
    DateTime(i128),
}

/// Read-only window over one row of already-decoded column values.
///
/// Index `i` denotes the `i`-th projected expression of the select that
/// produced the row, relative to the window's offset. Offset views share the
/// underlying storage with the row they were cut from.
#[derive(Clone, Debug)]
pub struct ValueBuffer {
    values: Arc<[Value]>,
    offset: usize,
    end: usize,
}

impl ValueBuffer {
    /// Wraps a decoded row.
    pub fn new(values: Vec<Value>) -> Self {
        let end = values.len();
        Self {
            values: values.into(),
            offset: 0,
            end,
        }
    }

    /// Number of values visible through this window.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.offset)
    }

    /// Returns true when the window exposes no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads the value at `index`, relative to the window.
    pub fn get(&self, index: usize) -> Result<&Value> {
        self.as_slice().get(index).ok_or(PenumbraError::BufferIndex {
            index,
            len: self.len(),
        })
    }

    /// Returns a window starting `offset` values further into the row.
    pub fn with_offset(&self, offset: usize) -> Self {
        if offset == 0 {
            return self.clone();
        }
        Self {
            values: Arc::clone(&self.values),
            offset: (self.offset + offset).min(self.end),
            end: self.end,
        }
    }

    /// Returns the `len` values starting `offset` values into the window,
    /// clipped to the window's end.
    pub fn window(&self, offset: usize, len: usize) -> Self {
        let start = (self.offset + offset).min(self.end);
        Self {
            values: Arc::clone(&self.values),
            offset: start,
            end: (start + len).min(self.end),
        }
    }

    /// Copies the visible window into storage of its own.
    pub fn detach(&self) -> Self {
        Self::new(self.as_slice().to_vec())
    }

    /// Borrows the visible values.
    pub fn as_slice(&self) -> &[Value] {
        self.values.get(self.offset..self.end).unwrap_or(&[])
    }
}

impl PartialEq for ValueBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl From<Vec<Value>> for ValueBuffer {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}
