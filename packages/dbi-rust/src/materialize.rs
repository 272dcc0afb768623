//! Row materializer: store result sets to label-keyed rows.
//!
//! Text columns arrive fixed-width, with NUL padding and a two-byte
//! terminator. Both decode modes strip that framing. `NULL` columns are left
//! out of the row entirely.

use taodbi_core::{Row, ScalarKind, Value};

use crate::error::{Error, Result};
use crate::store::ResultSet;

/// Bytes of terminator framing every text value coming out of the store.
pub const TEXT_PADDING: usize = 2;

/// Turns a result set into rows.
///
/// `labels[i]` names column `i`; columns past the end of `labels` keep the
/// store's own name. With `types`, column `i` decodes as `types[i]`;
/// otherwise (or for [`ScalarKind::Dynamic`]) the store's value is kept,
/// with text unpadded.
pub fn materialize(
    set: ResultSet,
    labels: Option<&[String]>,
    types: Option<&[ScalarKind]>,
) -> Result<Vec<Row>> {
    let names: Vec<&str> = set
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| labels.and_then(|l| l.get(i)).map_or(c.as_str(), String::as_str))
        .collect();
    let kinds: Vec<ScalarKind> = (0..names.len())
        .map(|i| {
            types
                .and_then(|t| t.get(i).copied())
                .unwrap_or(ScalarKind::Dynamic)
        })
        .collect();

    let mut rows = Vec::with_capacity(set.rows.len());
    for values in set.rows {
        let mut row = Row::new();
        for ((name, kind), value) in names.iter().zip(&kinds).zip(values) {
            if matches!(value, Value::Null) {
                continue;
            }
            row.insert((*name).to_string(), decode(name, *kind, value)?);
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Decodes one non-null value as `kind`.
pub fn decode(column: &str, kind: ScalarKind, value: Value) -> Result<Value> {
    let bad = |value: &Value| Error::Decode {
        column: column.to_string(),
        value: value.to_string(),
    };
    if kind == ScalarKind::String && !matches!(value, Value::Bytes(_) | Value::String(_)) {
        return Ok(Value::String(value.to_string()));
    }
    let value = untyped(column, value)?;
    let value = match kind {
        ScalarKind::Dynamic | ScalarKind::String => value,
        ScalarKind::Bool => match value {
            Value::Bool(b) => Value::Bool(b),
            Value::Int(v) => Value::Bool(v != 0),
            Value::UInt(v) => Value::Bool(v != 0),
            Value::String(s) if s == "true" || s == "1" => Value::Bool(true),
            Value::String(s) if s == "false" || s == "0" => Value::Bool(false),
            other => return Err(bad(&other)),
        },
        ScalarKind::Float32 | ScalarKind::Float64 => {
            let v = match value {
                Value::Float(f) => f,
                Value::Int(v) => i64_to_f64(v),
                Value::String(s) => parse_text(column, &s)?,
                other => return Err(bad(&other)),
            };
            Value::Float(if kind == ScalarKind::Float32 { narrow_f32(v) } else { v })
        }
        _ => {
            let v: i128 = match value {
                Value::Int(v) => i128::from(v),
                Value::UInt(v) => i128::from(v),
                Value::Bool(b) => i128::from(b),
                Value::String(s) => parse_text(column, &s)?,
                other => return Err(bad(&other)),
            };
            integer(kind, v).ok_or_else(|| bad(&Value::String(v.to_string())))?
        }
    };
    Ok(value)
}

/// The store's own value, with text framing removed.
fn untyped(column: &str, value: Value) -> Result<Value> {
    match value {
        Value::Bytes(b) => Ok(Value::String(unpad(column, &String::from_utf8_lossy(&b))?)),
        Value::String(s) => Ok(Value::String(unpad(column, &s)?)),
        other => Ok(other),
    }
}

fn unpad(column: &str, text: &str) -> Result<String> {
    let end = text.len().checked_sub(TEXT_PADDING);
    match end.and_then(|end| text.get(..end)) {
        Some(body) => Ok(body.trim_end_matches('\0').to_string()),
        None => Err(Error::Decode {
            column: column.to_string(),
            value: text.to_string(),
        }),
    }
}

fn parse_text<T: std::str::FromStr>(column: &str, text: &str) -> Result<T> {
    text.trim().parse().map_err(|_| Error::Decode {
        column: column.to_string(),
        value: text.to_string(),
    })
}

/// Range-checks `v` against the integer `kind`.
fn integer(kind: ScalarKind, v: i128) -> Option<Value> {
    let fits = match kind {
        ScalarKind::Int8 => i8::try_from(v).is_ok(),
        ScalarKind::Int16 => i16::try_from(v).is_ok(),
        ScalarKind::Int32 => i32::try_from(v).is_ok(),
        ScalarKind::UInt8 => u8::try_from(v).is_ok(),
        ScalarKind::UInt16 => u16::try_from(v).is_ok(),
        ScalarKind::UInt32 => u32::try_from(v).is_ok(),
        _ => true,
    };
    if !fits {
        return None;
    }
    match kind {
        ScalarKind::UInt | ScalarKind::UInt8 | ScalarKind::UInt16 | ScalarKind::UInt32 | ScalarKind::UInt64 => {
            u64::try_from(v).ok().map(Value::UInt)
        }
        _ => i64::try_from(v).ok().map(Value::Int),
    }
}

#[allow(clippy::cast_precision_loss)]
fn i64_to_f64(v: i64) -> f64 {
    v as f64
}

#[allow(clippy::cast_possible_truncation)]
fn narrow_f32(v: f64) -> f64 {
    f64::from(v as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(columns: &[&str], rows: Vec<Vec<Value>>) -> ResultSet {
        ResultSet {
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            rows,
        }
    }

    fn padded(s: &str, width: usize) -> Value {
        let mut b = s.as_bytes().to_vec();
        b.resize(width + TEXT_PADDING, 0);
        Value::Bytes(b)
    }

    #[test]
    fn untyped_strips_padding_and_drops_nulls() {
        let rows = materialize(
            set(&["id", "x", "y"], vec![vec![Value::Int(7), padded("a1", 8), Value::Null]]),
            None,
            None,
        )
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&Value::Int(7)));
        assert_eq!(rows[0].get("x"), Some(&Value::from("a1")));
        assert!(!rows[0].contains_key("y"));
    }

    #[test]
    fn labels_rename_by_position() {
        let labels = vec!["key".to_string()];
        let rows = materialize(
            set(&["id", "x"], vec![vec![Value::Int(7), padded("a", 4)]]),
            Some(&labels),
            None,
        )
        .unwrap();
        assert!(rows[0].contains_key("key"));
        assert!(rows[0].contains_key("x"));
    }

    #[test]
    fn typed_decoding() {
        let types = [ScalarKind::Int8, ScalarKind::String, ScalarKind::Bool, ScalarKind::Float32];
        let rows = materialize(
            set(
                &["a", "b", "c", "d"],
                vec![vec![Value::Int(5), padded("hi", 4), Value::Int(1), Value::Float(0.5)]],
            ),
            None,
            Some(&types),
        )
        .unwrap();
        assert_eq!(rows[0]["a"], Value::Int(5));
        assert_eq!(rows[0]["b"], Value::from("hi"));
        assert_eq!(rows[0]["c"], Value::Bool(true));
        assert_eq!(rows[0]["d"], Value::Float(0.5));
    }

    #[test]
    fn narrowing_overflow_is_a_decode_error() {
        let err = decode("a", ScalarKind::Int8, Value::Int(300)).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
        assert_eq!(decode("a", ScalarKind::UInt16, Value::Int(300)).unwrap(), Value::UInt(300));
        assert!(decode("a", ScalarKind::UInt8, Value::Int(-1)).is_err());
    }

    #[test]
    fn short_text_is_malformed() {
        let err = decode("x", ScalarKind::String, Value::Bytes(b"a".to_vec())).unwrap_err();
        assert_eq!(err.to_string(), "wrong string output in column x: \"a\"");
        assert_eq!(
            decode("x", ScalarKind::Dynamic, Value::String("ab\0\0".into())).unwrap(),
            Value::from("ab")
        );
        assert_eq!(decode("n", ScalarKind::String, Value::Int(12)).unwrap(), Value::from("12"));
    }
}
