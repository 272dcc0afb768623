//! `Dbi`: the shared store handle every entity operation goes through.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use taodbi_core::predicate::placeholders;
use taodbi_core::{quotes, Projection, Row, ScalarKind, Value};
use tracing::debug;

use crate::error::Result;
use crate::materialize::materialize;
use crate::store::{MemoryStore, ResultSet, Store};

/// Cloneable handle over a shared [`Store`].
///
/// Arguments are quoted on the way in and text framing is stripped on the
/// way out; callers never see either.
#[derive(Clone)]
pub struct Dbi {
    store: Arc<dyn Store>,
}

impl fmt::Debug for Dbi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dbi").finish_non_exhaustive()
    }
}

impl Dbi {
    #[must_use]
    pub fn new(store: impl Store) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    #[must_use]
    pub fn from_arc(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// A handle over a fresh [`MemoryStore`].
    #[must_use]
    pub fn memory() -> Self {
        Self::new(MemoryStore::new())
    }

    /// Executes a statement and returns the number of rows affected.
    pub fn do_sql(&self, sql: &str, args: &[Value]) -> Result<u64> {
        debug!(sql, args = args.len(), "execute");
        Ok(self.store.execute(sql, &quotes(args))?)
    }

    /// Executes `sql` once per row by appending one `(?, ...)` group per row
    /// to a single `VALUES` list.
    ///
    /// `sql` ends with `VALUES`. All rows must have the width of the first.
    pub fn do_sqls(&self, sql: &str, rows: &[Vec<Value>]) -> Result<u64> {
        let Some(first) = rows.first() else {
            return self.do_sql(sql, &[]);
        };
        let group = format!("({})", placeholders(first.len()));
        let mut statement = sql.to_string();
        for _ in rows {
            statement.push(' ');
            statement.push_str(&group);
        }
        let args: Vec<Value> = rows.iter().flatten().cloned().collect();
        self.do_sql(&statement, &args)
    }

    /// Runs a query and returns the raw, undecoded result set.
    pub fn query(&self, sql: &str, args: &[Value]) -> Result<ResultSet> {
        debug!(sql, args = args.len(), "query");
        Ok(self.store.query(sql, &quotes(args))?)
    }

    /// Runs a query and materializes its rows.
    pub fn select(
        &self,
        sql: &str,
        args: &[Value],
        labels: Option<&[String]>,
        types: Option<&[ScalarKind]>,
    ) -> Result<Vec<Row>> {
        materialize(self.query(sql, args)?, labels, types)
    }

    /// [`Dbi::select`] with the labels and types of `projection`.
    pub fn select_projected(&self, sql: &str, args: &[Value], projection: &Projection) -> Result<Vec<Row>> {
        self.select(sql, args, projection.labels(), projection.types.as_deref())
    }

    /// First row only; `None` when the query matched nothing.
    pub fn get_one(&self, sql: &str, args: &[Value], labels: Option<&[String]>) -> Result<Option<Row>> {
        Ok(self.select(sql, args, labels, None)?.into_iter().next())
    }

    /// First row with every value rendered as text, as a web form would
    /// receive it. Empty when the query matched nothing.
    pub fn get_strings(&self, sql: &str, args: &[Value]) -> Result<BTreeMap<String, String>> {
        Ok(self
            .get_one(sql, args, None)?
            .map(|row| row.into_iter().map(|(k, v)| (k, v.to_string())).collect())
            .unwrap_or_default())
    }
}
