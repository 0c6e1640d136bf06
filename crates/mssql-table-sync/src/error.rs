//! Error types for the table sync library.

use thiserror::Error;

/// Exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for missing tables or columns.
pub const EXIT_SCHEMA_ERROR: u8 = 2;
/// Exit code for connection, pool and query failures.
pub const EXIT_DATABASE_ERROR: u8 = 3;
/// Exit code for constraint violations while writing the clone.
pub const EXIT_CONSTRAINT_ERROR: u8 = 4;
/// Exit code for a sync that did not converge.
pub const EXIT_VERIFICATION_ERROR: u8 = 5;
/// Exit code for a cancelled run.
pub const EXIT_CANCELLED: u8 = 6;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;
/// Exit code for a batch where more than one table failed.
pub const EXIT_BATCH_FAILED: u8 = 8;

/// SQL Server error numbers that indicate a transient condition.
const TRANSIENT_CODES: &[u32] = &[
    1205,  // deadlock victim
    1222,  // lock request timeout
    233,   // no process on the other end of the pipe
    10053, // transport-level error, connection aborted
    10054, // connection reset by peer
    10060, // connection attempt timed out
    10928, // resource limit reached
    10929, // resource governor minimum not met
    40197, // service error processing request
    40501, // service busy
    40613, // database unavailable
    49918, // not enough resources
];

/// SQL Server error numbers raised by constraint violations.
const CONSTRAINT_CODES: &[u32] = &[
    515,  // cannot insert NULL
    547,  // foreign key / check constraint
    2601, // duplicate key in unique index
    2627, // primary key / unique constraint
    2628, // string or binary data would be truncated (2019+)
    8152, // string or binary data would be truncated
];

/// Main error type for reconciliation operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Table or column missing, or no usable primary key.
    #[error("Schema error for table {table}: {message}")]
    Schema { table: String, message: String },

    /// Network, deadlock, lock timeout or throttling failure.
    #[error("Transient error during {context}: {message}")]
    Transient { context: String, message: String },

    /// A single attempt exceeded its timeout.
    #[error("Timed out after {seconds}s during {context}")]
    Timeout { context: String, seconds: u64 },

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// A write to the clone violated a database constraint.
    #[error("Constraint violation on {table} ({rows} rows in statement): {message}")]
    Constraint {
        table: String,
        rows: usize,
        message: String,
    },

    /// Fingerprints still differ after a sync.
    #[error("Table {table} still differs after sync (target: {target}, clone: {clone})")]
    Verification {
        table: String,
        target: String,
        clone: String,
    },

    /// Any other database error.
    #[error("Database error during {context}: {source}")]
    Database {
        context: String,
        #[source]
        source: tiberius::error::Error,
    },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        SyncError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Schema error
    pub fn schema(table: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Schema {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Classify a tiberius error by its server error number.
    ///
    /// IO and TLS failures are always transient. Server errors are transient,
    /// constraint violations or plain database errors depending on the code.
    pub fn from_tiberius(err: tiberius::error::Error, context: impl Into<String>) -> Self {
        let context = context.into();

        match &err {
            tiberius::error::Error::Io { .. } | tiberius::error::Error::Tls(_) => {
                return SyncError::Transient {
                    context,
                    message: err.to_string(),
                };
            }
            tiberius::error::Error::Routing { .. } => {
                return SyncError::Transient {
                    context,
                    message: err.to_string(),
                };
            }
            _ => {}
        }

        match err.code() {
            Some(code) if TRANSIENT_CODES.contains(&code) => SyncError::Transient {
                context,
                message: err.to_string(),
            },
            Some(code) if CONSTRAINT_CODES.contains(&code) => SyncError::Constraint {
                table: context,
                rows: 0,
                message: err.to_string(),
            },
            _ => SyncError::Database {
                context,
                source: err,
            },
        }
    }

    /// Attach the number of rows the failing statement carried.
    ///
    /// Only meaningful for constraint errors; other variants pass through.
    pub fn with_row_count(self, rows: usize) -> Self {
        match self {
            SyncError::Constraint { table, message, .. } => SyncError::Constraint {
                table,
                rows,
                message,
            },
            other => other,
        }
    }

    /// Whether the retry wrapper may attempt the operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Transient { .. } | SyncError::Timeout { .. } | SyncError::Pool { .. }
        )
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            SyncError::Config(_) | SyncError::Yaml(_) | SyncError::Json(_) => EXIT_CONFIG_ERROR,
            SyncError::Schema { .. } => EXIT_SCHEMA_ERROR,
            SyncError::Transient { .. }
            | SyncError::Timeout { .. }
            | SyncError::Pool { .. }
            | SyncError::Database { .. } => EXIT_DATABASE_ERROR,
            SyncError::Constraint { .. } => EXIT_CONSTRAINT_ERROR,
            SyncError::Verification { .. } => EXIT_VERIFICATION_ERROR,
            SyncError::Io(_) => EXIT_IO_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn io_error() -> tiberius::error::Error {
        tiberius::error::Error::Io {
            kind: std::io::ErrorKind::ConnectionReset,
            message: "connection reset".to_string(),
        }
    }

    #[test]
    fn test_io_errors_are_transient() {
        let err = SyncError::from_tiberius(io_error(), "checksum Orders");
        assert!(matches!(err, SyncError::Transient { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_protocol_errors_are_not_retryable() {
        let err = SyncError::from_tiberius(
            tiberius::error::Error::Protocol("bad token".into()),
            "checksum Orders",
        );
        assert!(matches!(err, SyncError::Database { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_schema_and_constraint_errors_are_fatal() {
        assert!(!SyncError::schema("Orders", "missing").is_retryable());
        let constraint = SyncError::Constraint {
            table: "Orders".into(),
            rows: 0,
            message: "duplicate key".into(),
        };
        assert!(!constraint.is_retryable());
    }

    #[test]
    fn test_with_row_count_only_touches_constraints() {
        let err = SyncError::Constraint {
            table: "Orders".into(),
            rows: 0,
            message: "duplicate key".into(),
        }
        .with_row_count(250);
        assert!(matches!(err, SyncError::Constraint { rows: 250, .. }));

        let other = SyncError::schema("Orders", "missing").with_row_count(250);
        assert!(matches!(other, SyncError::Schema { .. }));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(SyncError::Config("x".into()).exit_code(), EXIT_CONFIG_ERROR);
        assert_eq!(SyncError::schema("t", "x").exit_code(), EXIT_SCHEMA_ERROR);
        assert_eq!(SyncError::pool("x", "y").exit_code(), EXIT_DATABASE_ERROR);
        let io = SyncError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "x"));
        assert_eq!(io.exit_code(), EXIT_IO_ERROR);
    }

    #[test]
    fn test_format_detailed_includes_cause() {
        let err = SyncError::Database {
            context: "fetch rows".into(),
            source: tiberius::error::Error::Protocol("bad token".into()),
        };
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: Database error during fetch rows"));
        assert!(detailed.contains("Caused by:"));
    }
}
