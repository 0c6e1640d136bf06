//! Core types shared by every stage of a reconciliation.
//!
//! - [`identifier`]: validation and bracket quoting of T-SQL identifiers
//! - [`schema`]: column metadata and type families
//! - [`value`]: owned SQL values moved from the target to the clone

pub mod identifier;
pub mod schema;
pub mod value;

pub use schema::{ColumnDescriptor, Side, TableSchema, TypeFamily};
pub use value::{Row, SqlNullType, SqlValue};
