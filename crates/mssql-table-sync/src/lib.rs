//! # mssql-table-sync
//!
//! Keeps a writable SQL Server "clone" consistent with an authoritative
//! "target" database, one table at a time.
//!
//! For each table the library:
//!
//! - **Introspects** both sides and derives the effective primary key and
//!   the set of comparable columns
//! - **Fingerprints** both sides with an order-sensitive aggregate checksum
//!   over normalized column values
//! - **Syncs** diverged tables through a staging table and a single MERGE
//!   (or a delete-and-insert for tables configured as `full_replace`)
//! - **Verifies** the result by fingerprinting again
//!
//! ## Example
//!
//! ```rust,no_run
//! use mssql_table_sync::{compare_table, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.yaml")?;
//!     let unchanged = compare_table(&config, "Orders", &["id".to_string()], true).await?;
//!     println!("Orders was {}", if unchanged { "unchanged" } else { "changed" });
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod orchestrator;
pub mod reconcile;
pub mod retry;
pub mod sync;
pub mod verify;

// Re-exports for convenient access
pub use config::{Config, DatabaseConfig, SyncConfig, SyncStrategy, TableOverride, TableSpec};
pub use core::{ColumnDescriptor, Side, SqlValue, TableSchema, TypeFamily};
pub use db::{MssqlPool, TableStore};
pub use error::{Result, SyncError};
pub use orchestrator::{BatchResult, BatchRunner, TableResult, TableStatus};
pub use reconcile::{
    compare_table, reconcile_table, sync_table, Outcome, Reconciler, Reconciliation, TablePlan,
};
pub use retry::RetryPolicy;
pub use sync::{SyncEngine, SyncReport};
pub use verify::Fingerprint;
