//! Core domain types for squeue, a work queue stored in a relational table.
//!
//! This crate contains:
//! - Row identifiers, priorities and the status state machine
//! - Dynamically typed column values and the decoded queue row
//! - Dialect capabilities (row locks, table locks, store clock)
//! - A parameterized query builder and typed filter predicates
//! - Table schema definitions

pub mod dialect;
pub mod error;
pub mod id;
pub mod predicate;
pub mod priority;
pub mod row;
pub mod schema;
pub mod sql;
pub mod status;
pub mod value;

pub use dialect::{Dialect, RowLock};
pub use error::{Error, Result};
pub use id::RowId;
pub use predicate::Predicate;
pub use priority::Priority;
pub use row::{QueueRow, meta};
pub use schema::{ColumnDef, ColumnType};
pub use sql::{Ident, QueryBuilder, Statement, TableName};
pub use status::Status;
pub use value::{Record, Value};
