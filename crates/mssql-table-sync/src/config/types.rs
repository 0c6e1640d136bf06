//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Authoritative database. Only ever read.
    pub target: DatabaseConfig,

    /// Writable replica kept consistent with the target.
    pub clone: DatabaseConfig,

    /// Reconciliation behavior.
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Connection settings for one SQL Server database.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// Schema holding the reconciled tables (default: "dbo").
    #[serde(default = "default_dbo_schema")]
    pub schema: String,

    /// Encrypt connection (default: false).
    #[serde(default)]
    pub encrypt: bool,

    /// Trust server certificate (default: true).
    #[serde(default = "default_true")]
    pub trust_server_cert: bool,

    /// Maximum pooled connections (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// One explicitly configured table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Table name, unqualified.
    pub table: String,

    /// Caller-supplied primary key, in order.
    pub pk: Vec<String>,
}

impl TableSpec {
    pub fn new(table: impl Into<String>, pk: Vec<String>) -> Self {
        Self {
            table: table.into(),
            pk,
        }
    }
}

/// Reconciliation behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Primary key used for tables without explicit configuration.
    #[serde(default = "default_pk")]
    pub default_pk: Vec<String>,

    /// Tables processed by a full batch run, in order.
    #[serde(default)]
    pub tables: Vec<TableSpec>,

    /// Audit columns excluded from comparison on every table.
    #[serde(default = "default_compare_exclude_columns")]
    pub compare_exclude_columns: Vec<String>,

    /// Server-generated columns never inserted, updated or compared.
    #[serde(default = "default_generated_columns")]
    pub generated_columns: Vec<String>,

    /// Precision of the shared decimal cast for numeric columns.
    #[serde(default = "default_numeric_precision")]
    pub numeric_precision: u8,

    /// Scale of the shared decimal cast for numeric columns.
    #[serde(default = "default_numeric_scale")]
    pub numeric_scale: u8,

    /// Length used for unbounded or unknown text widths.
    #[serde(default = "default_text_length")]
    pub default_text_length: i32,

    /// Rows per bulk-load batch into staging.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Retry behavior for database calls.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-table overrides keyed by table name.
    #[serde(default)]
    pub overrides: HashMap<String, TableOverride>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_pk: default_pk(),
            tables: Vec::new(),
            compare_exclude_columns: default_compare_exclude_columns(),
            generated_columns: default_generated_columns(),
            numeric_precision: default_numeric_precision(),
            numeric_scale: default_numeric_scale(),
            default_text_length: default_text_length(),
            batch_size: default_batch_size(),
            retry: RetryConfig::default(),
            overrides: HashMap::new(),
        }
    }
}

/// Retry settings for transient database failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry (default: 1000 ms).
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Cap on the exponential delay (default: 5000 ms).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Timeout of a single attempt (default: 300 s).
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            operation_timeout_secs: default_operation_timeout_secs(),
        }
    }
}

/// Declarative exceptions for a single table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableOverride {
    /// Generated columns the catalog does not report as computed.
    #[serde(default)]
    pub generated_columns: Vec<String>,

    /// Extra columns excluded from comparison for this table.
    #[serde(default)]
    pub exclude_columns: Vec<String>,

    /// Sync strategy (default: stage_merge).
    #[serde(default)]
    pub strategy: SyncStrategy,

    /// Forced temporal grain for comparison.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal_precision: Option<TemporalPrecision>,
}

/// How the clone table is brought in line with the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    /// Bulk-load into staging, then one MERGE with delete of orphans.
    #[default]
    StageMerge,

    /// Delete every clone row and re-insert every target row.
    FullReplace,
}

impl fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStrategy::StageMerge => write!(f, "stage_merge"),
            SyncStrategy::FullReplace => write!(f, "full_replace"),
        }
    }
}

/// Grain at which temporal values are compared. Ordered coarsest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalPrecision {
    Day,
    Minute,
    Second,
    Millisecond,
}

// Default value functions for serde
fn default_mssql_port() -> u16 {
    1433
}

fn default_dbo_schema() -> String {
    "dbo".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_connections() -> u32 {
    4
}

fn default_pk() -> Vec<String> {
    vec!["id".to_string()]
}

fn default_compare_exclude_columns() -> Vec<String> {
    [
        "fe_us_in",
        "fe_us_mo",
        "co_us_in",
        "co_us_mo",
        "co_sucu_in",
        "co_sucu_mo",
        "fecha_reg",
        "validador",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_generated_columns() -> Vec<String> {
    vec!["rowguid".to_string()]
}

fn default_numeric_precision() -> u8 {
    38
}

fn default_numeric_scale() -> u8 {
    8
}

fn default_text_length() -> i32 {
    1000
}

fn default_batch_size() -> usize {
    5000
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    5000
}

fn default_operation_timeout_secs() -> u64 {
    300
}
