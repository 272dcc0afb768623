//! `taodbi`: CRUD and relation-graph layer over an append-only,
//! join-less time-series store.
//!
//! Logical records live in insert-only tables. Entities ([`Model`],
//! [`SuperModel`], [`RestModel`]) expose named actions over them, and a
//! [`Schema`] composes those actions into nested results by following
//! configured relation edges instead of SQL joins.

pub mod call;
pub mod crud;
pub mod dbi;
pub mod error;
pub mod materialize;
pub mod model;
pub mod restful;
pub mod rmodel;
pub mod schema;
pub mod smodel;
pub mod store;

pub use call::{Call, Reply};
pub use crud::Crud;
pub use dbi::Dbi;
pub use error::{Error, ErrorCategory, Result, StoreError};
pub use model::Model;
pub use restful::{RangeSummary, Restful};
pub use rmodel::RestModel;
pub use schema::{Graph, Navigate, Schema, SchemaConfig, Verb};
pub use smodel::SuperModel;
pub use store::{MemoryStore, ResultSet, Store};
