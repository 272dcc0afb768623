//! Error types for the CRUD layer and the store beneath it.

use std::fmt;

/// Failures reported by a [`Store`](crate::store::Store).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("syntax error near `{near}`: {message}")]
    Syntax { near: String, message: String },
    #[error("table does not exist: {0}")]
    UnknownTable(String),
    #[error("invalid column `{column}` in table {table}")]
    UnknownColumn { table: String, column: String },
    #[error("table already exists: {0}")]
    TableExists(String),
    #[error("expected {expected} values, got {got}")]
    Arity { expected: usize, got: usize },
    #[error("column `{column}` cannot hold {value}")]
    Type { column: String, value: String },
    #[error("unsupported statement: {0}")]
    Unsupported(String),
}

/// Errors returned by every fallible operation in this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // ---- configuration ----
    #[error("entity not found in schema: {0}")]
    UnknownEntity(String),
    #[error("action `{action}` not found on entity {entity}")]
    UnknownAction { entity: String, action: String },
    #[error("{0} value not provided")]
    MissingValue(String),
    #[error("missing tag: {0}")]
    MissingTag(String),
    #[error("no data to {0}")]
    NoData(&'static str),
    #[error("relation graph deeper than {max_depth} at {entity}.{action}")]
    DepthExceeded {
        entity: String,
        action: String,
        max_depth: usize,
    },
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    // ---- validation ----
    #[error("multiple rows match unique columns in {table}")]
    Uniqueness { table: String },
    #[error("unique key already taken in {table}")]
    Conflict { table: String },

    // ---- store ----
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("wrong string output in column {column}: {value:?}")]
    Decode { column: String, value: String },
}

/// Error families callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Validation,
    Store,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Configuration => "configuration",
            Self::Validation => "validation",
            Self::Store => "store",
        })
    }
}

impl Error {
    /// Which family this error belongs to. Child failures inside a relation
    /// graph keep the category of the original error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnknownEntity(_)
            | Self::UnknownAction { .. }
            | Self::MissingValue(_)
            | Self::MissingTag(_)
            | Self::NoData(_)
            | Self::DepthExceeded { .. }
            | Self::Config(_)
            | Self::Io(_) => ErrorCategory::Configuration,
            Self::Uniqueness { .. } | Self::Conflict { .. } => ErrorCategory::Validation,
            Self::Store(_) | Self::Decode { .. } => ErrorCategory::Store,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
