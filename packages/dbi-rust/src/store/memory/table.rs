//! Table storage and value handling for [`MemoryStore`](super::MemoryStore).

use std::cmp::Ordering;
use std::collections::BTreeMap;

use parking_lot::RwLock;
use taodbi_core::Value;

use super::parser::{CmpOp, ColumnDecl, ColumnType, Literal};
use crate::error::StoreError;

/// Bytes appended after the padded payload of every text value.
pub const TEXT_TERMINATOR: &[u8] = b"\0\0";

#[derive(Debug, Clone, PartialEq)]
pub enum TableKind {
    Normal,
    /// Template with tag columns; rows live in its children.
    Super,
    /// Created `USING` a super table with fixed tag values.
    Child {
        parent: String,
        tag_values: Vec<Value>,
    },
}

/// One table. Rows are keyed by their timestamp; writing an existing key
/// replaces that row.
#[derive(Debug)]
pub struct Table {
    pub name: String,
    pub columns: Vec<ColumnDecl>,
    pub tags: Vec<ColumnDecl>,
    pub kind: TableKind,
    rows: RwLock<BTreeMap<i64, Vec<Value>>>,
}

impl Table {
    pub fn new(name: &str, columns: Vec<ColumnDecl>, tags: Vec<ColumnDecl>, kind: TableKind) -> Self {
        Self {
            name: name.to_string(),
            columns,
            tags,
            kind,
            rows: RwLock::new(BTreeMap::new()),
        }
    }

    /// Queryable columns: data columns, then tag columns.
    pub fn schema(&self) -> Vec<ColumnDecl> {
        let mut schema = self.columns.clone();
        if !matches!(self.kind, TableKind::Normal) {
            schema.extend(self.tags.iter().cloned());
        }
        schema
    }

    pub fn put(&self, key: i64, row: Vec<Value>) {
        self.rows.write().insert(key, row);
    }

    /// Rows in key order, tag values appended for child tables.
    pub fn snapshot(&self) -> Vec<Vec<Value>> {
        let rows = self.rows.read();
        match &self.kind {
            TableKind::Child { tag_values, .. } => rows
                .values()
                .map(|r| r.iter().chain(tag_values).cloned().collect())
                .collect(),
            _ => rows.values().cloned().collect(),
        }
    }

    pub fn position(&self, column: &str) -> Result<usize, StoreError> {
        self.columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| StoreError::UnknownColumn {
                table: self.name.clone(),
                column: column.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Literals in and values out
// ---------------------------------------------------------------------------

fn type_error(column: &ColumnDecl, value: &Literal) -> StoreError {
    StoreError::Type {
        column: column.name.clone(),
        value: format!("{value:?}"),
    }
}

fn ranged(column: &ColumnDecl, lit: &Literal, v: i64, min: i64, max: i64) -> Result<Value, StoreError> {
    if (min..=max).contains(&v) {
        Ok(Value::Int(v))
    } else {
        Err(type_error(column, lit))
    }
}

/// Converts a literal into the stored value for `column`.
#[allow(clippy::cast_precision_loss)]
pub fn coerce(column: &ColumnDecl, lit: &Literal, now: &mut impl FnMut() -> i64) -> Result<Value, StoreError> {
    let value = match (column.ty, lit) {
        (_, Literal::Null) => Value::Null,
        (ColumnType::Timestamp, Literal::Now) => Value::Int(now()),
        (ColumnType::Timestamp | ColumnType::BigInt, Literal::Int(v)) => Value::Int(*v),
        (ColumnType::Timestamp | ColumnType::BigInt, Literal::Text(s)) => {
            s.trim().parse().map(Value::Int).map_err(|_| type_error(column, lit))?
        }
        (ColumnType::TinyInt, Literal::Int(v)) => ranged(column, lit, *v, i8::MIN.into(), i8::MAX.into())?,
        (ColumnType::SmallInt, Literal::Int(v)) => ranged(column, lit, *v, i16::MIN.into(), i16::MAX.into())?,
        (ColumnType::Int, Literal::Int(v)) => ranged(column, lit, *v, i32::MIN.into(), i32::MAX.into())?,
        (ColumnType::Bool, Literal::Bool(b)) => Value::Bool(*b),
        (ColumnType::Bool, Literal::Int(v)) => Value::Bool(*v != 0),
        (ColumnType::Float | ColumnType::Double, Literal::Int(v)) => Value::Float(*v as f64),
        (ColumnType::Float | ColumnType::Double, Literal::Float(v)) => Value::Float(*v),
        (ColumnType::Binary(width), lit) => Value::String(text(column, lit, width, |s| s.len())?),
        (ColumnType::NChar(width), lit) => {
            Value::String(text(column, lit, width, |s| s.chars().count())?)
        }
        _ => return Err(type_error(column, lit)),
    };
    Ok(value)
}

fn text(column: &ColumnDecl, lit: &Literal, width: usize, len: fn(&str) -> usize) -> Result<String, StoreError> {
    let s = match lit {
        Literal::Text(s) => s.clone(),
        Literal::Int(v) => v.to_string(),
        Literal::Float(v) => v.to_string(),
        Literal::Bool(b) => b.to_string(),
        Literal::Null | Literal::Now => return Err(type_error(column, lit)),
    };
    if len(&s) > width {
        return Err(type_error(column, lit));
    }
    Ok(s)
}

/// The literal as a comparable value; `now` reads the clock.
pub fn literal_value(lit: &Literal, now: &mut impl FnMut() -> i64) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(v) => Value::Int(*v),
        Literal::Float(v) => Value::Float(*v),
        Literal::Text(s) => Value::String(s.clone()),
        Literal::Now => Value::Int(now()),
    }
}

/// Fixed-width wire form of a stored value: text columns are NUL-padded to
/// their declared width and followed by [`TEXT_TERMINATOR`].
pub fn render(ty: ColumnType, value: &Value) -> Value {
    match (ty, value) {
        (ColumnType::Binary(width), Value::String(s)) => Value::Bytes(padded(s, width)),
        (ColumnType::NChar(width), Value::String(s)) => {
            let mut out = s.clone();
            out.extend(std::iter::repeat('\0').take(width.saturating_sub(s.chars().count())));
            out.extend(TEXT_TERMINATOR.iter().map(|b| char::from(*b)));
            Value::String(out)
        }
        _ => value.clone(),
    }
}

fn padded(s: &str, width: usize) -> Vec<u8> {
    let mut out = s.as_bytes().to_vec();
    out.resize(width.max(out.len()), 0);
    out.extend_from_slice(TEXT_TERMINATOR);
    out
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

/// Orders two stored values. `NULL` sorts first and never compares equal
/// in a predicate (see [`test`]).
#[allow(clippy::cast_precision_loss)]
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) => Some(Ordering::Less),
        (_, Value::Null) => Some(Ordering::Greater),
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Int(y)) => Some(i64::from(*x).cmp(y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Evaluates `stored op literal`. `NULL` on either side is false.
pub fn test(stored: &Value, op: CmpOp, literal: &Value) -> bool {
    if matches!(stored, Value::Null) || matches!(literal, Value::Null) {
        return false;
    }
    let Some(ord) = compare(stored, literal) else {
        return false;
    };
    match op {
        CmpOp::Eq => ord == Ordering::Equal,
        CmpOp::Ne => ord != Ordering::Equal,
        CmpOp::Lt => ord == Ordering::Less,
        CmpOp::Le => ord != Ordering::Greater,
        CmpOp::Gt => ord == Ordering::Greater,
        CmpOp::Ge => ord != Ordering::Less,
    }
}
