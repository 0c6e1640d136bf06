//! Database access for one side of a reconciliation.
//!
//! [`TableStore`] is the seam between the reconciliation logic and SQL
//! Server. [`MssqlPool`] implements it over a bb8 pool of tiberius clients;
//! tests substitute an in-memory store.

pub mod convert;
mod mssql;

pub use mssql::MssqlPool;

use crate::core::{ColumnDescriptor, Row, Side};
use crate::error::Result;
use crate::verify::{ChecksumQuery, Fingerprint};
use async_trait::async_trait;

/// Operations the reconciler and sync engine need from one database.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Which side this store is.
    fn side(&self) -> Side;

    /// Human readable location (`host:port/database`) for logs.
    fn describe(&self) -> String;

    /// Schema holding the reconciled tables.
    fn schema(&self) -> &str;

    /// Ordinal-ordered columns of `schema.table`. Empty if the table does not exist.
    async fn get_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnDescriptor>>;

    /// Run a checksum query and return the table fingerprint.
    async fn fingerprint(&self, query: &ChecksumQuery) -> Result<Fingerprint>;

    /// Run a SELECT whose select list matches `columns` and read every row.
    async fn fetch_rows(&self, sql: &str, columns: &[ColumnDescriptor]) -> Result<Vec<Row>>;

    /// Execute a batch and return the total rows affected.
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// TDS bulk load of `rows` into `qualified_table`, in table column order.
    async fn bulk_load(&self, qualified_table: &str, rows: &[Row]) -> Result<u64>;

    /// Parameterized multi-row INSERT of `rows` into the quoted `columns`.
    async fn insert_rows(
        &self,
        qualified_table: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<u64>;
}
