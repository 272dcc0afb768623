//! In-memory reference [`Store`].
//!
//! Append-only and join-less in the style of a time-series database: every
//! table is keyed by a microsecond timestamp in its first column, super
//! tables partition rows into per-tag child tables, and `LAST(col)` is the
//! only way to read "the current value" of a column. Text columns come back
//! fixed-width and padded, as a native driver would return them.

mod parser;
mod table;

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use parking_lot::Mutex;
use taodbi_core::predicate::quote_str;
use taodbi_core::Value;
use tracing::trace;

use self::parser::{ColumnDecl, ColumnType, Expr, Literal, Select, SelectItem, Statement};
use self::table::{coerce, compare, literal_value, render, test, Table, TableKind};
use super::{ResultSet, Store};
use crate::error::StoreError;

pub use self::table::TEXT_TERMINATOR;

/// Thread-safe in-memory store. Cheap to share behind an `Arc`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: DashMap<String, Arc<Table>>,
    clock: Mutex<i64>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Strictly increasing wall-clock microseconds.
    fn now(&self) -> i64 {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX));
        let mut last = self.clock.lock();
        *last = wall.max(*last + 1);
        *last
    }

    fn table(&self, name: &str) -> Result<Arc<Table>, StoreError> {
        self.tables
            .get(name)
            .map(|t| Arc::clone(t.value()))
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    fn run(&self, sql: &str, args: &[Value]) -> Result<(u64, ResultSet), StoreError> {
        let sql = interpolate(sql, args)?;
        trace!(sql = %sql, "memory store statement");
        match parser::parse_statement(&sql)? {
            Statement::CreateTable {
                name,
                if_not_exists,
                columns,
                tags,
            } => {
                let kind = if tags.is_empty() {
                    TableKind::Normal
                } else {
                    TableKind::Super
                };
                self.create(&name, if_not_exists, Table::new(&name, columns, tags, kind))?;
                Ok((0, ResultSet::default()))
            }
            Statement::CreateChild {
                name,
                if_not_exists,
                parent,
                tag_values,
            } => {
                self.create_child(&name, if_not_exists, &parent, &tag_values)?;
                Ok((0, ResultSet::default()))
            }
            Statement::DropTable { name, if_exists } => {
                self.drop_table(&name, if_exists)?;
                Ok((0, ResultSet::default()))
            }
            Statement::Insert {
                table,
                using,
                columns,
                rows,
            } => {
                if let Some((parent, tag_values)) = using {
                    self.create_child(&table, true, &parent, &tag_values)?;
                }
                let n = self.insert(&table, columns.as_deref(), &rows)?;
                Ok((n, ResultSet::default()))
            }
            Statement::Select(select) => Ok((0, self.select(&select)?)),
        }
    }

    // ---- DDL ----

    fn create(&self, name: &str, if_not_exists: bool, table: Table) -> Result<(), StoreError> {
        if table.columns.first().map(|c| c.ty) != Some(ColumnType::Timestamp) {
            return Err(StoreError::Type {
                column: table.columns.first().map(|c| c.name.clone()).unwrap_or_default(),
                value: "first column must be a timestamp".into(),
            });
        }
        match self.tables.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) if if_not_exists => Ok(()),
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::TableExists(name.to_string())),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(table));
                Ok(())
            }
        }
    }

    fn create_child(
        &self,
        name: &str,
        if_not_exists: bool,
        parent: &str,
        tag_values: &[Literal],
    ) -> Result<(), StoreError> {
        if if_not_exists && self.tables.contains_key(name) {
            return Ok(());
        }
        let parent_table = self.table(parent)?;
        if parent_table.kind != TableKind::Super {
            return Err(StoreError::Unsupported(format!("{parent} is not a super table")));
        }
        if tag_values.len() != parent_table.tags.len() {
            return Err(StoreError::Arity {
                expected: parent_table.tags.len(),
                got: tag_values.len(),
            });
        }
        let mut now = || self.now();
        let values = parent_table
            .tags
            .iter()
            .zip(tag_values)
            .map(|(decl, lit)| coerce(decl, lit, &mut now))
            .collect::<Result<Vec<_>, _>>()?;
        let child = Table::new(
            name,
            parent_table.columns.clone(),
            parent_table.tags.clone(),
            TableKind::Child {
                parent: parent.to_string(),
                tag_values: values,
            },
        );
        self.create(name, if_not_exists, child)
    }

    fn drop_table(&self, name: &str, if_exists: bool) -> Result<(), StoreError> {
        match self.tables.remove(name) {
            Some((_, table)) => {
                if table.kind == TableKind::Super {
                    self.tables.retain(|_, t| {
                        !matches!(&t.kind, TableKind::Child { parent, .. } if parent == name)
                    });
                }
                Ok(())
            }
            None if if_exists => Ok(()),
            None => Err(StoreError::UnknownTable(name.to_string())),
        }
    }

    // ---- DML ----

    fn insert(&self, name: &str, columns: Option<&[String]>, rows: &[Vec<Literal>]) -> Result<u64, StoreError> {
        let table = self.table(name)?;
        if table.kind == TableKind::Super {
            return Err(StoreError::Unsupported(format!("cannot insert into super table {name}")));
        }
        let positions = match columns {
            Some(names) => names
                .iter()
                .map(|c| table.position(c))
                .collect::<Result<Vec<_>, _>>()?,
            None => (0..table.columns.len()).collect(),
        };
        let mut now = || self.now();
        let mut written = 0;
        for literals in rows {
            if literals.len() != positions.len() {
                return Err(StoreError::Arity {
                    expected: positions.len(),
                    got: literals.len(),
                });
            }
            let mut row = vec![Value::Null; table.columns.len()];
            for (&pos, lit) in positions.iter().zip(literals) {
                row[pos] = coerce(&table.columns[pos], lit, &mut now)?;
            }
            let Value::Int(key) = row[0] else {
                return Err(StoreError::Type {
                    column: table.columns[0].name.clone(),
                    value: "missing timestamp key".into(),
                });
            };
            table.put(key, row);
            written += 1;
        }
        Ok(written)
    }

    /// All rows visible through `table`, in key order. A super table
    /// yields the rows of every child.
    fn visible_rows(&self, table: &Table) -> Vec<Vec<Value>> {
        if table.kind != TableKind::Super {
            return table.snapshot();
        }
        let mut children: Vec<Arc<Table>> = self
            .tables
            .iter()
            .filter(|t| matches!(&t.kind, TableKind::Child { parent, .. } if *parent == table.name))
            .map(|t| Arc::clone(t.value()))
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        let mut rows: Vec<Vec<Value>> = children.iter().flat_map(|c| c.snapshot()).collect();
        rows.sort_by(|a, b| compare(&a[0], &b[0]).unwrap_or(Ordering::Equal));
        rows
    }

    // ---- SELECT ----

    fn select(&self, select: &Select) -> Result<ResultSet, StoreError> {
        let table = self.table(&select.from)?;
        let schema = table.schema();
        let index = |column: &str| {
            schema
                .iter()
                .position(|c| c.name == column)
                .ok_or_else(|| StoreError::UnknownColumn {
                    table: table.name.clone(),
                    column: column.to_string(),
                })
        };

        let mut rows = Vec::new();
        for row in self.visible_rows(&table) {
            let keep = match &select.filter {
                Some(expr) => self.eval(expr, &row, &index)?,
                None => true,
            };
            if keep {
                rows.push(row);
            }
        }

        let aggregate = !select.group_by.is_empty()
            || select
                .items
                .iter()
                .any(|i| matches!(i, SelectItem::Last(_) | SelectItem::CountAll));
        let mut out = if aggregate {
            self.aggregate(select, &schema, &rows, &index)?
        } else {
            project(select, &schema, rows, &index)?
        };

        let end = select
            .limit
            .map_or(out.rows.len(), |n| select.offset.saturating_add(n).min(out.rows.len()));
        let start = select.offset.min(end);
        out.rows = out.rows.drain(start..end).collect();
        Ok(out)
    }

    fn eval(
        &self,
        expr: &Expr,
        row: &[Value],
        index: &impl Fn(&str) -> Result<usize, StoreError>,
    ) -> Result<bool, StoreError> {
        let mut now = || self.now();
        Ok(match expr {
            Expr::And(terms) => {
                for term in terms {
                    if !self.eval(term, row, index)? {
                        return Ok(false);
                    }
                }
                true
            }
            Expr::Compare { column, op, value } => {
                test(&row[index(column)?], *op, &literal_value(value, &mut now))
            }
            Expr::In { column, values } => {
                let stored = &row[index(column)?];
                values.iter().any(|v| {
                    test(stored, parser::CmpOp::Eq, &literal_value(v, &mut now))
                })
            }
        })
    }

    fn aggregate(
        &self,
        select: &Select,
        schema: &[ColumnDecl],
        rows: &[Vec<Value>],
        index: &impl Fn(&str) -> Result<usize, StoreError>,
    ) -> Result<ResultSet, StoreError> {
        let group_idx = select
            .group_by
            .iter()
            .map(|c| index(c))
            .collect::<Result<Vec<_>, _>>()?;

        let mut groups: Vec<(Vec<Value>, Vec<&Vec<Value>>)> = Vec::new();
        for row in rows {
            let key: Vec<Value> = group_idx.iter().map(|&i| row[i].clone()).collect();
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(row),
                None => groups.push((key, vec![row])),
            }
        }
        let count_only = select.items.iter().all(|i| *i == SelectItem::CountAll);
        if groups.is_empty() && select.group_by.is_empty() && count_only {
            groups.push((Vec::new(), Vec::new()));
        }

        let mut columns = Vec::new();
        let mut types = Vec::new();
        for item in &select.items {
            let (name, ty) = match item {
                SelectItem::CountAll => ("count(*)".to_string(), ColumnType::BigInt),
                SelectItem::Last(c) => (format!("last({c})"), schema[index(c)?].ty),
                SelectItem::Column(c) => {
                    if !select.group_by.contains(c) {
                        return Err(StoreError::Unsupported(format!(
                            "column {c} must be aggregated or grouped"
                        )));
                    }
                    (c.clone(), schema[index(c)?].ty)
                }
            };
            columns.push(name);
            types.push(ty);
        }
        let extra_groups: Vec<usize> = select
            .group_by
            .iter()
            .enumerate()
            .filter(|(_, g)| !select.items.contains(&SelectItem::Column((*g).clone())))
            .map(|(i, _)| i)
            .collect();
        for &g in &extra_groups {
            columns.push(select.group_by[g].clone());
            types.push(schema[group_idx[g]].ty);
        }

        let mut out_rows = Vec::with_capacity(groups.len());
        for (key, members) in &groups {
            let mut out = Vec::with_capacity(columns.len());
            for item in &select.items {
                out.push(match item {
                    SelectItem::CountAll => Value::Int(i64::try_from(members.len()).unwrap_or(i64::MAX)),
                    SelectItem::Last(c) => {
                        let i = index(c)?;
                        members
                            .iter()
                            .rev()
                            .map(|r| &r[i])
                            .find(|v| !matches!(v, Value::Null))
                            .cloned()
                            .unwrap_or(Value::Null)
                    }
                    SelectItem::Column(c) => {
                        let g = select.group_by.iter().position(|x| x == c).unwrap_or(0);
                        key[g].clone()
                    }
                });
            }
            for &g in &extra_groups {
                out.push(key[g].clone());
            }
            out_rows.push(out);
        }

        if let Some((column, desc)) = &select.order_by {
            let pos = columns
                .iter()
                .position(|c| c == column)
                .or_else(|| {
                    select
                        .items
                        .iter()
                        .position(|i| matches!(i, SelectItem::Last(c) if c == column))
                })
                .ok_or_else(|| StoreError::UnknownColumn {
                    table: select.from.clone(),
                    column: column.clone(),
                })?;
            sort_rows(&mut out_rows, pos, *desc);
        }

        Ok(ResultSet {
            rows: out_rows
                .into_iter()
                .map(|r| r.iter().zip(&types).map(|(v, ty)| render(*ty, v)).collect())
                .collect(),
            columns,
        })
    }
}

fn project(
    select: &Select,
    schema: &[ColumnDecl],
    mut rows: Vec<Vec<Value>>,
    index: &impl Fn(&str) -> Result<usize, StoreError>,
) -> Result<ResultSet, StoreError> {
    if let Some((column, desc)) = &select.order_by {
        sort_rows(&mut rows, index(column)?, *desc);
    }
    let positions: Vec<usize> = if select.items.is_empty() {
        (0..schema.len()).collect()
    } else {
        select
            .items
            .iter()
            .map(|item| match item {
                SelectItem::Column(c) => index(c),
                _ => Err(StoreError::Unsupported("mixed aggregate projection".into())),
            })
            .collect::<Result<_, _>>()?
    };
    Ok(ResultSet {
        columns: positions.iter().map(|&i| schema[i].name.clone()).collect(),
        rows: rows
            .iter()
            .map(|row| positions.iter().map(|&i| render(schema[i].ty, &row[i])).collect())
            .collect(),
    })
}

fn sort_rows(rows: &mut [Vec<Value>], pos: usize, desc: bool) {
    rows.sort_by(|a, b| {
        let ord = compare(&a[pos], &b[pos]).unwrap_or(Ordering::Equal);
        if desc {
            ord.reverse()
        } else {
            ord
        }
    });
}

/// Replaces each `?` outside a quoted literal with the text of the next
/// argument. String arguments are spliced as given, so they must already be
/// quoted.
fn interpolate(sql: &str, args: &[Value]) -> Result<String, StoreError> {
    let mut out = String::with_capacity(sql.len() + args.len() * 8);
    let mut args_iter = args.iter();
    let mut used = 0;
    let mut quote: Option<char> = None;
    let mut chars = sql.chars();
    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(_), '\\') => {
                out.push(c);
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            (Some(q), c) if c == q => {
                quote = None;
                out.push(c);
            }
            (None, '\'' | '"') => {
                quote = Some(c);
                out.push(c);
            }
            (None, '?') => {
                used += 1;
                let arg = args_iter.next().ok_or(StoreError::Arity {
                    expected: used,
                    got: args.len(),
                })?;
                out.push_str(&arg_text(arg)?);
            }
            _ => out.push(c),
        }
    }
    if used != args.len() {
        return Err(StoreError::Arity {
            expected: used,
            got: args.len(),
        });
    }
    Ok(out)
}

fn arg_text(arg: &Value) -> Result<String, StoreError> {
    Ok(match arg {
        Value::Null => "NULL".into(),
        Value::Bool(b) => b.to_string(),
        Value::Int(v) => v.to_string(),
        Value::UInt(v) => v.to_string(),
        Value::Float(v) => format!("{v:?}"),
        Value::String(s) => s.clone(),
        Value::Bytes(b) => quote_str(&String::from_utf8_lossy(b)),
        Value::Array(_) | Value::Map(_) => {
            return Err(StoreError::Unsupported("composite placeholder value".into()))
        }
    })
}

impl Store for MemoryStore {
    fn execute(&self, sql: &str, args: &[Value]) -> Result<u64, StoreError> {
        self.run(sql, args).map(|(n, _)| n)
    }

    fn query(&self, sql: &str, args: &[Value]) -> Result<ResultSet, StoreError> {
        self.run(sql, args).map(|(_, set)| set)
    }
}
