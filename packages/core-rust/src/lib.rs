//! `taodbi` core: values, column specifications, predicates and entity
//! configuration for an append-only, join-less CRUD layer.
//!
//! Nothing in this crate talks to a store.

pub mod columns;
pub mod descriptor;
pub mod predicate;
pub mod types;

pub use columns::{spec_from_config, ColumnEntry, ColumnSpec, LabelEntry, Projection};
pub use descriptor::{ControlNames, Page, TableDescriptor, TotalForce};
pub use predicate::{key_predicate, quote, quotes, Condition, Filter, Predicate, TRUSTED_SUFFIX};
pub use types::{Args, Row, ScalarKind, Value};

