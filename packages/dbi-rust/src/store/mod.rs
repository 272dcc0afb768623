//! The store seam: a synchronous, append-only, join-less SQL backend.
//!
//! The CRUD layer only ever issues `INSERT`, `SELECT` and table DDL. There
//! is no `UPDATE` or `DELETE` and no join, so any backend that can run
//! those statements against a single table can sit behind [`Store`].

pub mod memory;

use taodbi_core::Value;

use crate::error::StoreError;

pub use memory::MemoryStore;

/// Rows returned by a query, positionally aligned with `columns`.
///
/// A SQL `NULL` is [`Value::Null`] here; the materializer drops it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A shared connection to the backing store.
///
/// `?` placeholders in `sql` are bound from `args` in order. Implementations
/// must be safe to share across threads; callers add no locking.
pub trait Store: Send + Sync + 'static {
    /// Runs a statement and returns the number of rows it wrote.
    fn execute(&self, sql: &str, args: &[Value]) -> Result<u64, StoreError>;

    /// Runs a query and returns its rows.
    ///
    /// An empty result is `Ok` with no rows, never an error.
    fn query(&self, sql: &str, args: &[Value]) -> Result<ResultSet, StoreError>;
}
