//! Per-table derivation of the effective key and column sets.

use crate::config::{SyncConfig, SyncStrategy, TableOverride, TableSpec, TemporalPrecision};
use crate::core::identifier::{qualify_mssql, quote_known};
use crate::core::{ColumnDescriptor, Side, TableSchema, TypeFamily};
use crate::db::convert::select_expression;
use crate::error::{Result, SyncError};
use crate::verify::{normalize_expr, rule_for, ChecksumQuery, NormalizeOptions, Normalization};
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

/// A column present on both sides.
#[derive(Debug, Clone)]
pub struct ColumnPair {
    pub target: ColumnDescriptor,
    pub clone: ColumnDescriptor,
    /// Quoted as the target spells it.
    pub target_quoted: String,
    /// Quoted as the clone spells it.
    pub clone_quoted: String,
}

impl ColumnPair {
    pub fn name(&self) -> &str {
        &self.target.name
    }

    pub fn quoted(&self, side: Side) -> &str {
        match side {
            Side::Target => &self.target_quoted,
            Side::Clone => &self.clone_quoted,
        }
    }

    pub fn descriptor(&self, side: Side) -> &ColumnDescriptor {
        match side {
            Side::Target => &self.target,
            Side::Clone => &self.clone,
        }
    }
}

/// A column that takes part in the fingerprint.
#[derive(Debug, Clone)]
pub struct ComparableColumn {
    pub pair: ColumnPair,
    pub rule: Normalization,
}

/// Why a column does not take part in the fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Exclusion {
    TargetOnly,
    CloneOnly,
    Computed,
    Generated,
    RowVersion,
    AuditColumn,
    TableOverride,
    UnsupportedType,
    FamilyMismatch,
    Family(TypeFamily),
}

impl Exclusion {
    /// Excluded columns that are still copied by a sync.
    fn is_insertable(&self) -> bool {
        !matches!(
            self,
            Exclusion::TargetOnly
                | Exclusion::CloneOnly
                | Exclusion::Computed
                | Exclusion::Generated
                | Exclusion::RowVersion
                | Exclusion::UnsupportedType
        )
    }
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exclusion::TargetOnly => write!(f, "only on target"),
            Exclusion::CloneOnly => write!(f, "only on clone"),
            Exclusion::Computed => write!(f, "computed"),
            Exclusion::Generated => write!(f, "generated"),
            Exclusion::RowVersion => write!(f, "rowversion"),
            Exclusion::AuditColumn => write!(f, "audit column"),
            Exclusion::TableOverride => write!(f, "table override"),
            Exclusion::UnsupportedType => write!(f, "unsupported type"),
            Exclusion::FamilyMismatch => write!(f, "type family differs between sides"),
            Exclusion::Family(family) => write!(f, "{} family not compared", family),
        }
    }
}

/// Everything derived for one table before checksumming or syncing.
#[derive(Debug, Clone)]
pub struct TablePlan {
    pub table: String,
    pub target_table: String,
    pub clone_table: String,
    /// Key as the caller supplied it.
    pub caller_pk: Vec<String>,
    /// Caller key minus computed and generated columns, in order.
    pub effective_pk: Vec<ColumnPair>,
    pub comparable: Vec<ComparableColumn>,
    /// Columns copied by a sync, in target ordinal order.
    pub insertable: Vec<ColumnPair>,
    pub excluded: Vec<(String, Exclusion)>,
    pub strategy: SyncStrategy,
    pub temporal_precision: Option<TemporalPrecision>,
    pub options: NormalizeOptions,
}

fn contains(list: &[String], name: &str) -> bool {
    list.iter().any(|n| n.eq_ignore_ascii_case(name))
}

fn pair(target: &TableSchema, clone: &TableSchema, name: &str) -> Result<Option<ColumnPair>> {
    let (t, c) = match (target.column(name), clone.column(name)) {
        (Some(t), Some(c)) => (t, c),
        _ => return Ok(None),
    };
    Ok(Some(ColumnPair {
        target_quoted: quote_known(&t.name, target.column_names())?,
        clone_quoted: quote_known(&c.name, clone.column_names())?,
        target: t.clone(),
        clone: c.clone(),
    }))
}

impl TablePlan {
    /// Derive the plan from both sides' introspected columns.
    ///
    /// Fails with a schema error when either side lacks the table, a caller
    /// key column is missing, or no key column survives filtering.
    pub fn build(
        spec: &TableSpec,
        target: &TableSchema,
        clone: &TableSchema,
        sync: &SyncConfig,
        table_override: &TableOverride,
    ) -> Result<Self> {
        if target.columns.is_empty() {
            return Err(SyncError::schema(
                &spec.table,
                format!("table not found on target ({})", target.full_name()),
            ));
        }
        if clone.columns.is_empty() {
            return Err(SyncError::schema(
                &spec.table,
                format!("table not found on clone ({})", clone.full_name()),
            ));
        }

        let generated: Vec<String> = sync
            .generated_columns
            .iter()
            .chain(table_override.generated_columns.iter())
            .cloned()
            .collect();

        let mut effective_pk = Vec::with_capacity(spec.pk.len());
        for key in &spec.pk {
            if contains(&generated, key) {
                debug!("{}: dropping generated column {} from key", spec.table, key);
                continue;
            }
            let key_pair = pair(target, clone, key)?.ok_or_else(|| {
                let side = if target.column(key).is_none() {
                    Side::Target
                } else {
                    Side::Clone
                };
                SyncError::schema(
                    &spec.table,
                    format!("primary key column {} not found on {}", key, side),
                )
            })?;
            if key_pair.target.is_computed || key_pair.clone.is_computed {
                debug!("{}: dropping computed column {} from key", spec.table, key);
                continue;
            }
            if key_pair.target.family() == TypeFamily::Other {
                return Err(SyncError::schema(
                    &spec.table,
                    format!("primary key column {} has unsupported type {}", key, key_pair.target.data_type),
                ));
            }
            effective_pk.push(key_pair);
        }
        if effective_pk.is_empty() {
            return Err(SyncError::schema(
                &spec.table,
                format!(
                    "no usable primary key: every column of {:?} is computed or generated",
                    spec.pk
                ),
            ));
        }

        let options = NormalizeOptions::from(sync);
        let forced_grain = table_override.temporal_precision;
        let mut comparable = Vec::new();
        let mut insertable = Vec::new();
        let mut excluded = Vec::new();

        for col in &target.columns {
            let Some(col_pair) = pair(target, clone, &col.name)? else {
                excluded.push((col.name.clone(), Exclusion::TargetOnly));
                continue;
            };

            let exclusion = if col_pair.target.is_computed || col_pair.clone.is_computed {
                Some(Exclusion::Computed)
            } else if contains(&generated, &col.name) {
                Some(Exclusion::Generated)
            } else if col_pair.target.is_row_version() || col_pair.clone.is_row_version() {
                Some(Exclusion::RowVersion)
            } else if col_pair.target.family() == TypeFamily::Other {
                warn!(
                    "{}: column {} has unsupported type {}, not synced",
                    spec.table, col.name, col.data_type
                );
                Some(Exclusion::UnsupportedType)
            } else {
                None
            };

            if exclusion.map_or(true, |e| e.is_insertable()) {
                insertable.push(col_pair.clone());
            }
            if let Some(e) = exclusion {
                excluded.push((col.name.clone(), e));
                continue;
            }

            if effective_pk.iter().any(|k| k.target.matches(&col.name)) {
                continue;
            }

            let exclusion = if contains(&sync.compare_exclude_columns, &col.name) {
                Some(Exclusion::AuditColumn)
            } else if contains(&table_override.exclude_columns, &col.name) {
                Some(Exclusion::TableOverride)
            } else {
                None
            };
            if let Some(e) = exclusion {
                excluded.push((col.name.clone(), e));
                continue;
            }

            match rule_for(&col_pair.target, &col_pair.clone, &options, forced_grain) {
                Some(rule) => comparable.push(ComparableColumn {
                    pair: col_pair,
                    rule,
                }),
                None => {
                    // comparable families that still fail differ between sides,
                    // including time of day against a date-like column
                    let t = col_pair.target.family();
                    let e = if t.is_comparable() {
                        Exclusion::FamilyMismatch
                    } else {
                        Exclusion::Family(t)
                    };
                    excluded.push((col.name.clone(), e));
                }
            }
        }

        for col in &clone.columns {
            if target.column(&col.name).is_none() {
                excluded.push((col.name.clone(), Exclusion::CloneOnly));
            }
        }

        Ok(Self {
            table: spec.table.clone(),
            target_table: qualify_mssql(&target.schema, &target.name)?,
            clone_table: qualify_mssql(&clone.schema, &clone.name)?,
            caller_pk: spec.pk.clone(),
            effective_pk,
            comparable,
            insertable,
            excluded,
            strategy: table_override.strategy,
            temporal_precision: forced_grain,
            options,
        })
    }

    /// Qualified table name on `side`.
    pub fn qualified(&self, side: Side) -> &str {
        match side {
            Side::Target => &self.target_table,
            Side::Clone => &self.clone_table,
        }
    }

    /// Effective key column names.
    pub fn key_names(&self) -> Vec<String> {
        self.effective_pk.iter().map(|k| k.name().to_string()).collect()
    }

    /// Fingerprint query for `side`.
    pub fn checksum_query(&self, side: Side) -> ChecksumQuery {
        let order_by: Vec<String> = self
            .effective_pk
            .iter()
            .map(|k| k.quoted(side).to_string())
            .collect();
        let expressions: Vec<String> = self
            .comparable
            .iter()
            .map(|c| {
                normalize_expr(
                    c.pair.descriptor(side),
                    c.pair.quoted(side),
                    &c.rule,
                    &self.options,
                )
            })
            .collect();
        ChecksumQuery::build(&self.table, self.qualified(side), &order_by, &expressions)
    }

    /// SELECT reading every insertable column from the target.
    pub fn select_rows_sql(&self) -> String {
        let select_list: Vec<String> = self
            .insertable
            .iter()
            .map(|c| select_expression(&c.target, &c.target_quoted))
            .collect();
        format!(
            "SELECT {} FROM {}",
            select_list.join(", "),
            self.target_table
        )
    }

    /// First `n` target rows in key order, same select list as a sync.
    pub fn sample_rows_sql(&self, n: usize) -> String {
        let order_by: Vec<&str> = self
            .effective_pk
            .iter()
            .map(|k| k.target_quoted.as_str())
            .collect();
        format!(
            "{} ORDER BY {}",
            self.select_rows_sql()
                .replacen("SELECT ", &format!("SELECT TOP ({}) ", n), 1),
            order_by.join(", ")
        )
    }

    /// Whether the clone's identity column is among the copied columns.
    pub fn inserts_identity(&self) -> bool {
        self.insertable.iter().any(|c| c.clone.is_identity)
    }
}
