//! Order-sensitive table fingerprints.
//!
//! `CHECKSUM_AGG` on its own is order-insensitive, so the row number under the
//! primary-key ordering is hashed together with every normalized column.
//! Two sides fingerprint equal only when the same normalized tuples occupy
//! the same key positions.

use serde::Serialize;
use std::fmt;

/// Summary of a table's normalized content on one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fingerprint {
    /// Aggregate checksum (NULL for an empty table) and row count.
    Checksum { value: Option<i32>, rows: i64 },
    /// Row count only, used when no column is comparable.
    RowCount { rows: i64 },
}

impl Fingerprint {
    pub fn rows(&self) -> i64 {
        match self {
            Fingerprint::Checksum { rows, .. } | Fingerprint::RowCount { rows } => *rows,
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fingerprint::Checksum {
                value: Some(v),
                rows,
            } => write!(f, "checksum {} over {} rows", v, rows),
            Fingerprint::Checksum { value: None, rows } => {
                write!(f, "checksum NULL over {} rows", rows)
            }
            Fingerprint::RowCount { rows } => write!(f, "{} rows (count only)", rows),
        }
    }
}

/// What a checksum query measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    Checksum,
    RowCount,
}

/// A ready-to-run fingerprint query for one side of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumQuery {
    /// Unqualified table name, for logs and errors.
    pub table: String,
    /// Query returning one row: `(fingerprint int NULL, row_count bigint)`.
    pub sql: String,
    pub kind: ChecksumKind,
}

impl ChecksumQuery {
    /// Checksum over `expressions`, ordered by the quoted key columns.
    ///
    /// Falls back to a row count when `expressions` is empty.
    pub fn build(
        table: &str,
        qualified_table: &str,
        order_by: &[String],
        expressions: &[String],
    ) -> Self {
        if expressions.is_empty() {
            return Self::row_count(table, qualified_table);
        }

        let projected: Vec<String> = expressions
            .iter()
            .enumerate()
            .map(|(i, expr)| format!("{} AS c{}", expr, i))
            .collect();
        let aliases: Vec<String> = (0..expressions.len()).map(|i| format!("c{}", i)).collect();

        let sql = format!(
            r#"SELECT CHECKSUM_AGG(CHECKSUM(rn, {aliases})) AS fingerprint, COUNT_BIG(*) AS row_count
FROM (
    SELECT ROW_NUMBER() OVER (ORDER BY {order_by}) AS rn,
           {projected}
    FROM {table}
) AS normalized"#,
            aliases = aliases.join(", "),
            order_by = order_by.join(", "),
            projected = projected.join(",\n           "),
            table = qualified_table,
        );

        Self {
            table: table.to_string(),
            sql,
            kind: ChecksumKind::Checksum,
        }
    }

    /// Row count only.
    pub fn row_count(table: &str, qualified_table: &str) -> Self {
        Self {
            table: table.to_string(),
            sql: format!(
                "SELECT CAST(NULL AS int) AS fingerprint, COUNT_BIG(*) AS row_count FROM {}",
                qualified_table
            ),
            kind: ChecksumKind::RowCount,
        }
    }

    /// Interpret the query's result row.
    pub fn fingerprint_from(&self, checksum: Option<i32>, rows: i64) -> Fingerprint {
        match self.kind {
            ChecksumKind::Checksum => Fingerprint::Checksum {
                value: checksum,
                rows,
            },
            ChecksumKind::RowCount => Fingerprint::RowCount { rows },
        }
    }
}
