//! Staging table DDL and the set-based statements applied to the clone.

use crate::core::identifier::quote_mssql;
use crate::core::{ColumnDescriptor, TypeFamily};
use crate::error::Result;
use crate::reconcile::{ColumnPair, TablePlan};
use crate::verify::normalize::COMPARE_COLLATION;

/// Prefix of every staging table; leftovers can be found by it.
pub const STAGING_PREFIX: &str = "_sync_stage_";

const MAX_NVARCHAR_LENGTH: i32 = 4000;
const MAX_VARBINARY_LENGTH: i32 = 8000;
const MAX_DECIMAL_PRECISION: u8 = 38;
/// Largest scale a staged decimal value can carry.
const MAX_STAGED_SCALE: u8 = 28;

/// Unique staging table name in the clone schema: `[schema].[_sync_stage_<table>_<id>]`.
pub fn staging_table_name(schema: &str, table: &str) -> Result<String> {
    let short: String = table.chars().take(100).collect();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    Ok(format!(
        "{}.{}",
        quote_mssql(schema)?,
        quote_mssql(&format!("{}{}_{}", STAGING_PREFIX, short, &suffix[..8]))?
    ))
}

fn declared_precision(col: &ColumnDescriptor) -> (u8, u8) {
    match col.type_name().as_str() {
        "money" => (19, 4),
        "smallmoney" => (10, 4),
        _ => (col.precision.unwrap_or(18), col.scale.unwrap_or(0)),
    }
}

fn is_decimal_like(col: &ColumnDescriptor) -> bool {
    matches!(
        col.type_name().as_str(),
        "decimal" | "numeric" | "money" | "smallmoney"
    )
}

/// Scale of the staged decimal for a decimal-like target column.
///
/// Wide enough for the integer digits of both sides, keeping as many
/// fractional digits as the wider side declares.
pub fn staging_decimal_scale(pair: &ColumnPair) -> Option<u8> {
    if !is_decimal_like(&pair.target) {
        return None;
    }
    let sides = [declared_precision(&pair.target), declared_precision(&pair.clone)];
    let int_digits = sides
        .iter()
        .map(|(p, s)| p.saturating_sub(*s))
        .max()
        .unwrap_or(0);
    let scale = sides.iter().map(|(_, s)| *s).max().unwrap_or(0);
    Some(
        scale
            .min(MAX_DECIMAL_PRECISION.saturating_sub(int_digits))
            .min(MAX_STAGED_SCALE),
    )
}

fn widest(pair: &ColumnPair, limit: i32) -> String {
    if pair.target.is_unbounded() || pair.clone.is_unbounded() {
        return "max".into();
    }
    let len = pair
        .target
        .max_length
        .unwrap_or(0)
        .max(pair.clone.max_length.unwrap_or(0));
    if len > limit {
        "max".into()
    } else {
        len.to_string()
    }
}

/// Column type in the staging table.
///
/// Text and binary widths are the larger of both sides, so staging never
/// truncates what the target holds.
pub fn staging_column_type(pair: &ColumnPair) -> String {
    let target = &pair.target;
    let type_name = target.type_name();
    match target.family() {
        TypeFamily::Text => format!("nvarchar({})", widest(pair, MAX_NVARCHAR_LENGTH)),
        TypeFamily::LongText | TypeFamily::Xml => "nvarchar(max)".into(),
        TypeFamily::Binary if type_name == "image" => "varbinary(max)".into(),
        TypeFamily::Binary => format!("varbinary({})", widest(pair, MAX_VARBINARY_LENGTH)),
        TypeFamily::Numeric if is_decimal_like(target) => format!(
            "decimal({},{})",
            MAX_DECIMAL_PRECISION,
            staging_decimal_scale(pair).unwrap_or(0)
        ),
        TypeFamily::Temporal => match type_name.as_str() {
            "datetimeoffset" => "datetimeoffset(7)".into(),
            "time" => "time(7)".into(),
            _ => "datetime2(7)".into(),
        },
        TypeFamily::Numeric | TypeFamily::Bit | TypeFamily::UniqueIdentifier => type_name,
        TypeFamily::Other => "sql_variant".into(),
    }
}

/// Position of each staged row, so a failed load can be cleared and replayed.
pub const ROW_TAG_COLUMN: &str = "[_sync_row]";

/// Drop any leftover and create the staging table with every insertable
/// column followed by the row tag.
pub fn create_staging_sql(staging: &str, plan: &TablePlan) -> String {
    let mut col_defs: Vec<String> = plan
        .insertable
        .iter()
        .map(|c| format!("{} {} NULL", c.clone_quoted, staging_column_type(c)))
        .collect();
    col_defs.push(format!("{} bigint NOT NULL", ROW_TAG_COLUMN));
    format!(
        "DROP TABLE IF EXISTS {0}; CREATE TABLE {0} ({1});",
        staging,
        col_defs.join(", ")
    )
}

pub fn drop_staging_sql(staging: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", staging)
}

/// Remove staged rows tagged `first..=last`.
pub fn clear_staged_rows_sql(staging: &str, first: i64, last: i64) -> String {
    format!(
        "DELETE FROM {} WHERE {} BETWEEN {} AND {}",
        staging, ROW_TAG_COLUMN, first, last
    )
}

fn is_character(family: TypeFamily) -> bool {
    matches!(
        family,
        TypeFamily::Text | TypeFamily::LongText | TypeFamily::Xml
    )
}

/// Width the staged value must be cut to before it fits the clone column.
fn clone_width(col: &ColumnPair) -> Option<i32> {
    let family = col.clone.family();
    if !matches!(family, TypeFamily::Text | TypeFamily::Binary) || col.clone.is_unbounded() {
        return None;
    }
    let width = col.clone.max_length?;
    let narrower = col.target.is_unbounded() || col.target.max_length.unwrap_or(0) > width;
    narrower.then_some(width)
}

/// Staged value as written into the clone column.
fn staged_value(col: &ColumnPair) -> String {
    let quoted = format!("stage.{}", col.clone_quoted);
    match clone_width(col) {
        Some(width) if col.clone.family() == TypeFamily::Binary => {
            format!("SUBSTRING({}, 1, {})", quoted, width)
        }
        Some(width) => format!("LEFT({}, {})", quoted, width),
        None => quoted,
    }
}

/// Live-side operand of a change comparison; legacy LOB types cannot use `<>`.
fn comparable_live(col: &ColumnPair) -> String {
    let quoted = format!("live.{}", col.clone_quoted);
    match col.clone.type_name().as_str() {
        "text" | "ntext" | "xml" => format!("CAST({} AS nvarchar(max))", quoted),
        "image" => format!("CAST({} AS varbinary(max))", quoted),
        _ => quoted,
    }
}

/// Null-safe "this column changed" predicate.
///
/// Strings compare under the checksum collation, so any difference the
/// fingerprint sees is also an update here.
fn changed_predicate(col: &ColumnPair) -> String {
    let mut live = comparable_live(col);
    let mut stage = staged_value(col);
    if is_character(col.target.family()) && is_character(col.clone.family()) {
        live = format!("{} COLLATE {}", live, COMPARE_COLLATION);
        stage = format!("{} COLLATE {}", stage, COMPARE_COLLATION);
    }
    format!(
        "({0} <> {1} OR ({0} IS NULL AND {1} IS NOT NULL) OR ({0} IS NOT NULL AND {1} IS NULL))",
        live, stage
    )
}

/// Wrap `body` so IDENTITY_INSERT is switched off and an open transaction
/// is rolled back even when a statement fails.
fn guarded(plan: &TablePlan, body: &str, in_transaction: bool) -> String {
    let (on, off) = if plan.inserts_identity() {
        (
            format!("SET IDENTITY_INSERT {} ON; ", plan.clone_table),
            format!("SET IDENTITY_INSERT {} OFF; ", plan.clone_table),
        )
    } else {
        (String::new(), String::new())
    };
    if on.is_empty() && !in_transaction {
        return body.to_string();
    }
    let rollback = if in_transaction {
        "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION; "
    } else {
        ""
    };
    format!(
        "BEGIN TRY {}{} {}END TRY BEGIN CATCH {}{}THROW; END CATCH;",
        on, body, off, rollback, off
    )
}

/// One MERGE converging the live clone table onto the staged target rows.
///
/// Matching keys with any changed column are updated, staged-only keys are
/// inserted and live-only keys are deleted.
pub fn merge_sql(plan: &TablePlan, staging: &str) -> String {
    let is_key = |c: &ColumnPair| plan.effective_pk.iter().any(|k| k.target.matches(&c.target.name));

    let col_list: Vec<&str> = plan
        .insertable
        .iter()
        .map(|c| c.clone_quoted.as_str())
        .collect();
    let source_cols: Vec<String> = plan.insertable.iter().map(staged_value).collect();

    let join_condition: Vec<String> = plan
        .effective_pk
        .iter()
        .map(|k| format!("live.{0} = stage.{0}", k.clone_quoted))
        .collect();

    // identity values cannot be updated, only inserted
    let updatable: Vec<&ColumnPair> = plan
        .insertable
        .iter()
        .filter(|c| !is_key(c) && !c.clone.is_identity)
        .collect();

    let matched = if updatable.is_empty() {
        String::new()
    } else {
        let change_detection: Vec<String> =
            updatable.iter().map(|c| changed_predicate(c)).collect();
        let update_cols: Vec<String> = updatable
            .iter()
            .map(|c| format!("{} = {}", c.clone_quoted, staged_value(c)))
            .collect();
        format!(
            "\nWHEN MATCHED AND ({}) THEN UPDATE SET {}",
            change_detection.join(" OR "),
            update_cols.join(", ")
        )
    };

    // WITH (TABLOCK) keeps the statement from deadlocking on S->X lock conversion
    let merge = format!(
        r#"MERGE INTO {} WITH (TABLOCK) AS live
USING {} AS stage
ON {}{}
WHEN NOT MATCHED BY TARGET THEN INSERT ({}) VALUES ({})
WHEN NOT MATCHED BY SOURCE THEN DELETE;"#,
        plan.clone_table,
        staging,
        join_condition.join(" AND "),
        matched,
        col_list.join(", "),
        source_cols.join(", ")
    );

    guarded(plan, &merge, false)
}

/// Delete every clone row and copy the staged rows in one transaction.
pub fn replace_sql(plan: &TablePlan, staging: &str) -> String {
    let cols: Vec<&str> = plan
        .insertable
        .iter()
        .map(|c| c.clone_quoted.as_str())
        .collect();
    let values: Vec<String> = plan.insertable.iter().map(staged_value).collect();
    let body = format!(
        "BEGIN TRANSACTION; DELETE FROM {0}; INSERT INTO {0} ({1}) SELECT {2} FROM {3} AS stage; COMMIT TRANSACTION;",
        plan.clone_table,
        cols.join(", "),
        values.join(", "),
        staging
    );
    format!("SET XACT_ABORT ON; {}", guarded(plan, &body, true))
}
