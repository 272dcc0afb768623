use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A materialized result row: output label -> value.
///
/// A column that was `NULL` in the store is absent from the row, never
/// present as [`Value::Null`].
pub type Row = BTreeMap<String, Value>;

/// Caller input for one action call: parameter name -> value.
pub type Args = BTreeMap<String, Value>;

/// Generic runtime value exchanged with the store and returned to callers.
///
/// Deserializes from plain JSON (`untagged`), so entity configuration can
/// carry literal constraint values such as `{"province": 2}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL `NULL`.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer, widened to 64 bits. Timestamps are microseconds.
    Int(i64),
    /// Unsigned integer, widened to 64 bits.
    UInt(u64),
    /// Floating point, widened to 64 bits.
    Float(f64),
    /// UTF-8 text.
    String(String),
    /// Ordered sequence. In a constraint this becomes an `IN` list; in a
    /// row it holds nested child rows.
    Array(Vec<Value>),
    /// Nested row.
    Map(BTreeMap<String, Value>),
    /// Raw byte buffer (fixed-width `binary` columns). Listed after
    /// `Array` so JSON arrays never deserialize into it.
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns the value as a signed integer if it holds one that fits.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Returns the value as text if it is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as a boolean if it is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the list elements if the value is an array.
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(v) => Some(v),
            _ => None,
        }
    }

    /// Collects a string array (or a single string) into owned strings.
    ///
    /// Used for list-typed control parameters such as `fields` and `empties`.
    #[must_use]
    pub fn to_string_list(&self) -> Option<Vec<String>> {
        match self {
            Self::String(s) => Some(vec![s.clone()]),
            Self::Array(items) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => None,
        }
    }

    /// Whether the value carries anything: `Null`, empty arrays, empty maps
    /// and empty strings count as absent.
    #[must_use]
    pub fn has_value(&self) -> bool {
        match self {
            Self::Null => false,
            Self::String(s) => !s.is_empty(),
            Self::Array(v) => !v.is_empty(),
            Self::Map(m) => !m.is_empty(),
            _ => true,
        }
    }

    /// Wraps a list of rows so it can be attached to a parent row.
    #[must_use]
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self::Array(rows.into_iter().map(Self::Map).collect())
    }
}

/// Renders the value the way a web front end would see it in a form field.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:.6}"),
            Self::String(s) => f.write_str(s),
            Self::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
            Self::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Self::Map(m) => write!(f, "{m:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::UInt(u64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::Array(v.into_iter().map(Into::into).collect())
    }
}

/// Declared scalar type of a projected column.
///
/// Drives typed decoding in the row materializer. Names follow the
/// configuration vocabulary (`"int32"`, `"float64"`, `"string"`, ...);
/// anything unrecognised is [`ScalarKind::Dynamic`] and decodes with the
/// store's own inferred type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    Int,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Bool,
    String,
    Dynamic,
}

impl ScalarKind {
    /// The configuration name of this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt => "uint",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Dynamic => "dynamic",
        }
    }

    /// Whether this kind belongs to the signed or unsigned integer family.
    #[must_use]
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Int
                | Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::UInt
                | Self::UInt8
                | Self::UInt16
                | Self::UInt32
                | Self::UInt64
        )
    }
}

impl FromStr for ScalarKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "int" => Self::Int,
            "int8" => Self::Int8,
            "int16" => Self::Int16,
            "int32" => Self::Int32,
            "int64" => Self::Int64,
            "uint" => Self::UInt,
            "uint8" => Self::UInt8,
            "uint16" => Self::UInt16,
            "uint32" => Self::UInt32,
            "uint64" => Self::UInt64,
            "float32" => Self::Float32,
            "float64" => Self::Float64,
            "bool" => Self::Bool,
            "string" => Self::String,
            _ => Self::Dynamic,
        })
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
