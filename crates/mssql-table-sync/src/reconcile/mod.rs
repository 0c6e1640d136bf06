//! Per-table reconciliation: introspect, fingerprint, compare, sync, verify.
//!
//! Each call works on one table with fresh state. Nothing is cached between
//! tables or between calls.

pub mod plan;

pub use plan::{ColumnPair, ComparableColumn, Exclusion, TablePlan};

use crate::config::{Config, TableSpec};
use crate::core::{Side, TableSchema};
use crate::db::{MssqlPool, TableStore};
use crate::error::{Result, SyncError};
use crate::retry::{with_retry, RetryPolicy};
use crate::sync::{SyncEngine, SyncReport};
use crate::verify::Fingerprint;
use serde::Serialize;
use std::fmt;
use tracing::{debug, error, info, warn};

/// Terminal state of one reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Fingerprints were equal.
    Unchanged,
    /// Fingerprints differed and no sync was requested.
    Changed,
    /// Fingerprints differed, the sync ran and they now match.
    Synced,
    /// Fingerprints still differ after the sync.
    SyncIncomplete,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Unchanged => "unchanged",
            Outcome::Changed => "changed",
            Outcome::Synced => "synced",
            Outcome::SyncIncomplete => "sync-incomplete",
        };
        f.write_str(s)
    }
}

/// Everything observed while reconciling one table.
#[derive(Debug, Clone, Serialize)]
pub struct Reconciliation {
    pub table: String,
    pub outcome: Outcome,
    pub effective_pk: Vec<String>,
    pub comparable_columns: usize,
    pub target_before: Fingerprint,
    pub clone_before: Fingerprint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_after: Option<Fingerprint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clone_after: Option<Fingerprint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncReport>,
}

impl Reconciliation {
    /// Whether the clone matches the target now.
    pub fn is_consistent(&self) -> bool {
        matches!(self.outcome, Outcome::Unchanged | Outcome::Synced)
    }

    /// Whether the clone matched before anything was written.
    pub fn was_unchanged(&self) -> bool {
        self.outcome == Outcome::Unchanged
    }

    pub fn reason(&self) -> String {
        match self.outcome {
            Outcome::Unchanged => format!("fingerprints match ({})", self.target_before),
            Outcome::Changed => format!(
                "fingerprints differ (target {}, clone {}), sync not requested",
                self.target_before, self.clone_before
            ),
            Outcome::Synced => format!(
                "synced, fingerprints now match ({})",
                self.target_after.unwrap_or(self.target_before)
            ),
            Outcome::SyncIncomplete => format!(
                "still differs after sync (target {}, clone {})",
                self.target_after.unwrap_or(self.target_before),
                self.clone_after.unwrap_or(self.clone_before)
            ),
        }
    }

    /// Turn an incomplete sync into a verification error.
    pub fn into_result(self) -> Result<Self> {
        if self.outcome == Outcome::SyncIncomplete {
            return Err(SyncError::Verification {
                table: self.table.clone(),
                target: self.target_after.unwrap_or(self.target_before).to_string(),
                clone: self.clone_after.unwrap_or(self.clone_before).to_string(),
            });
        }
        Ok(self)
    }
}

/// Compares and syncs tables between one target and one clone store.
pub struct Reconciler<'a> {
    target: &'a dyn TableStore,
    clone: &'a dyn TableStore,
    config: &'a Config,
    policy: RetryPolicy,
}

impl<'a> Reconciler<'a> {
    pub fn new(target: &'a dyn TableStore, clone: &'a dyn TableStore, config: &'a Config) -> Self {
        Self {
            target,
            clone,
            config,
            policy: RetryPolicy::from(&config.sync.retry),
        }
    }

    async fn introspect(&self, spec: &TableSpec) -> Result<TablePlan> {
        let (target_cols, clone_cols) = tokio::try_join!(
            self.target.get_columns(self.target.schema(), &spec.table),
            self.clone.get_columns(self.clone.schema(), &spec.table),
        )?;
        let target = TableSchema {
            schema: self.target.schema().to_string(),
            name: spec.table.clone(),
            columns: target_cols,
        };
        let clone = TableSchema {
            schema: self.clone.schema().to_string(),
            name: spec.table.clone(),
            columns: clone_cols,
        };
        TablePlan::build(
            spec,
            &target,
            &clone,
            &self.config.sync,
            &self.config.override_for(&spec.table),
        )
    }

    async fn fingerprints(&self, plan: &TablePlan) -> Result<(Fingerprint, Fingerprint)> {
        let target_query = plan.checksum_query(Side::Target);
        let clone_query = plan.checksum_query(Side::Clone);
        debug!("{}: {}", plan.table, target_query.sql);
        tokio::try_join!(
            self.target.fingerprint(&target_query),
            self.clone.fingerprint(&clone_query),
        )
    }

    /// Introspect both sides and derive the table plan.
    pub async fn plan(&self, spec: &TableSpec) -> Result<TablePlan> {
        let context = format!("introspecting {}", spec.table);
        with_retry(&self.policy, &context, || self.introspect(spec)).await
    }

    /// Introspect and fingerprint both sides, retried as a whole.
    pub async fn checksum(&self, spec: &TableSpec) -> Result<(TablePlan, Fingerprint, Fingerprint)> {
        let context = format!("checksumming {}", spec.table);
        with_retry(&self.policy, &context, || async move {
            let plan = self.introspect(spec).await?;
            let (target, clone) = self.fingerprints(&plan).await?;
            Ok((plan, target, clone))
        })
        .await
    }

    /// Bring the clone table in line with the target.
    ///
    /// The plan is derived again from the caller's key, so a sync never
    /// depends on state left by an earlier compare.
    pub async fn sync(&self, spec: &TableSpec) -> Result<SyncReport> {
        let plan = self.plan(spec).await?;
        SyncEngine::new(
            self.target,
            self.clone,
            self.policy,
            self.config.sync.batch_size,
        )
        .sync(&plan)
        .await
    }

    /// Compare one table and, when asked, sync and verify it.
    pub async fn compare(&self, spec: &TableSpec, sync: bool) -> Result<Reconciliation> {
        info!("{}: comparing {} -> {}", spec.table, self.target.describe(), self.clone.describe());
        let (plan, target_before, clone_before) = self.checksum(spec).await?;
        debug!(
            "{}: target {}, clone {}",
            spec.table, target_before, clone_before
        );

        if plan.comparable.is_empty() {
            warn!(
                "{}: no comparable columns, comparing row counts only",
                spec.table
            );
        }

        let mut result = Reconciliation {
            table: spec.table.clone(),
            outcome: Outcome::Unchanged,
            effective_pk: plan.key_names(),
            comparable_columns: plan.comparable.len(),
            target_before,
            clone_before,
            target_after: None,
            clone_after: None,
            sync: None,
        };

        if target_before == clone_before {
            info!("{}: unchanged", spec.table);
            return Ok(result);
        }

        warn!(
            "{}: differs (target {}, clone {})",
            spec.table, target_before, clone_before
        );
        if !sync {
            result.outcome = Outcome::Changed;
            return Ok(result);
        }

        let report = self.sync(spec).await?;
        let (_, target_after, clone_after) = self.checksum(spec).await?;
        result.sync = Some(report);
        result.target_after = Some(target_after);
        result.clone_after = Some(clone_after);

        if target_after == clone_after {
            info!("{}: synced", spec.table);
            result.outcome = Outcome::Synced;
        } else {
            error!(
                "{}: still differs after sync (target {}, clone {})",
                spec.table, target_after, clone_after
            );
            result.outcome = Outcome::SyncIncomplete;
        }
        Ok(result)
    }
}

/// Open both pools, each connection attempt retried.
pub async fn connect(config: &Config) -> Result<(MssqlPool, MssqlPool)> {
    let policy = RetryPolicy::from(&config.sync.retry);
    tokio::try_join!(
        with_retry(&policy, "connecting to target", || {
            MssqlPool::connect(&config.target, Side::Target)
        }),
        with_retry(&policy, "connecting to clone", || {
            MssqlPool::connect(&config.clone, Side::Clone)
        }),
    )
}

/// Reconcile one table over pools opened for this call only.
///
/// The pools are closed when the call returns, on every path.
pub async fn reconcile_table(config: &Config, spec: &TableSpec, sync: bool) -> Result<Reconciliation> {
    let (target, clone) = connect(config).await?;
    Reconciler::new(&target, &clone, config)
        .compare(spec, sync)
        .await?
        .into_result()
}

/// Compare `table` keyed by `pk`, syncing it when `sync` is set.
///
/// Returns `true` when the clone already matched the target. A sync that
/// does not converge is a [`SyncError::Verification`].
pub async fn compare_table(config: &Config, table: &str, pk: &[String], sync: bool) -> Result<bool> {
    let spec = TableSpec::new(table, pk.to_vec());
    Ok(reconcile_table(config, &spec, sync).await?.was_unchanged())
}

/// Sync `table` keyed by `pk` without comparing first.
pub async fn sync_table(config: &Config, table: &str, pk: &[String]) -> Result<SyncReport> {
    let spec = TableSpec::new(table, pk.to_vec());
    let (target, clone) = connect(config).await?;
    Reconciler::new(&target, &clone, config).sync(&spec).await
}


#[cfg(test)]
mod tests {
    use super::fake::FakeStore;
    use super::*;
    use crate::config::{SyncStrategy, TableOverride};
    use crate::core::schema::fixtures::{column, text};
    use crate::core::{ColumnDescriptor, Row, SqlValue};
    use rust_decimal::Decimal;
    use std::sync::atomic::Ordering;

    const CONFIG: &str = r#"
target:
  host: sql-a
  database: erp
  user: reader
  password: secret
clone:
  host: sql-b
  database: erp_clone
  user: writer
  password: secret
"#;

    fn config() -> Config {
        Config::from_yaml(CONFIG).unwrap()
    }

    fn orders_columns() -> Vec<ColumnDescriptor> {
        vec![
            column("id", "int"),
            column("qty", "int"),
            text("note", "varchar", 50),
        ]
    }

    fn row(id: i32, qty: i32, note: &str) -> Row {
        vec![
            SqlValue::I32(id),
            SqlValue::I32(qty),
            SqlValue::text_owned(note.to_string()),
        ]
    }

    fn stores(target_rows: Vec<Row>, clone_rows: Vec<Row>) -> (FakeStore, FakeStore) {
        (
            FakeStore::new(Side::Target).with_table("Orders", orders_columns(), target_rows),
            FakeStore::new(Side::Clone).with_table("Orders", orders_columns(), clone_rows),
        )
    }

    fn orders() -> TableSpec {
        TableSpec::new("Orders", vec!["id".into()])
    }

    fn priced_columns(note_len: i32) -> Vec<ColumnDescriptor> {
        vec![
            column("id", "int"),
            column("total", "decimal"),
            text("note", "varchar", note_len),
        ]
    }

    fn priced(id: i32, cents: i64, note: &str) -> Row {
        vec![
            SqlValue::I32(id),
            SqlValue::Decimal(Decimal::new(cents, 2)),
            SqlValue::text_owned(note.to_string()),
        ]
    }

    /// Target `note varchar(50)` against a clone `note varchar(30)`.
    fn narrow_clone_stores(target_rows: Vec<Row>, clone_rows: Vec<Row>) -> (FakeStore, FakeStore) {
        (
            FakeStore::new(Side::Target).with_table("Orders", priced_columns(50), target_rows),
            FakeStore::new(Side::Clone).with_table("Orders", priced_columns(30), clone_rows),
        )
    }

    const PREFIX: &str = "hello world this text is long!";

    #[tokio::test(start_paused = true)]
    async fn test_identical_tables_unchanged() {
        let (target, clone) = stores(vec![row(1, 3, "a")], vec![row(1, 3, "a")]);
        let config = config();
        let result = Reconciler::new(&target, &clone, &config)
            .compare(&orders(), true)
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::Unchanged);
        assert!(result.is_consistent());
        assert_eq!(result.effective_pk, vec!["id"]);
        assert!(clone.executed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_divergence_without_sync_is_changed() {
        let (target, clone) = stores(vec![row(1, 3, "a"), row(2, 5, "x")], vec![row(1, 3, "a")]);
        let config = config();
        let result = Reconciler::new(&target, &clone, &config)
            .compare(&orders(), false)
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::Changed);
        assert!(!result.is_consistent());
        assert!(result.reason().contains("sync not requested"));
        assert!(clone.executed().is_empty());
        assert_eq!(clone.rows("Orders").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_converges_and_cleans_up() {
        let (target, clone) = stores(
            vec![row(1, 3, "a"), row(2, 5, "x")],
            vec![row(1, 4, "a"), row(3, 1, "gone")],
        );
        let config = config();
        let result = Reconciler::new(&target, &clone, &config)
            .compare(&orders(), true)
            .await
            .unwrap();

        assert_eq!(result.outcome, Outcome::Synced);
        assert_eq!(clone.rows("Orders"), target.rows("Orders"));
        assert!(clone.staging_tables().is_empty());

        let report = result.sync.unwrap();
        assert_eq!(report.strategy, SyncStrategy::StageMerge);
        assert_eq!(report.rows_read, 2);
        assert_eq!(report.rows_staged, 2);
        assert_eq!(report.fallback_batches, 0);
        // one update, one insert, one delete
        assert_eq!(report.rows_affected, 3);

        let executed = clone.executed();
        assert!(executed[0].contains("CREATE TABLE [dbo].[_sync_stage_Orders_"));
        assert!(executed.iter().any(|s| s.contains("WHEN NOT MATCHED BY SOURCE THEN DELETE")));
        assert!(executed.last().unwrap().starts_with("DROP TABLE IF EXISTS [dbo].[_sync_stage_Orders_"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_sync_writes_nothing() {
        let (target, clone) = stores(vec![row(1, 3, "a"), row(2, 5, "x")], vec![row(1, 3, "a")]);
        let config = config();
        let reconciler = Reconciler::new(&target, &clone, &config);

        let first = reconciler.compare(&orders(), true).await.unwrap();
        assert_eq!(first.outcome, Outcome::Synced);
        let writes = clone.executed().len();

        let second = reconciler.compare(&orders(), true).await.unwrap();
        assert_eq!(second.outcome, Outcome::Unchanged);
        assert_eq!(clone.executed().len(), writes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_table_is_schema_error() {
        let target = FakeStore::new(Side::Target).with_table("Orders", orders_columns(), vec![]);
        let clone = FakeStore::new(Side::Clone);
        let config = config();
        let err = Reconciler::new(&target, &clone, &config)
            .compare(&orders(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Schema { .. }));
        assert_eq!(err.exit_code(), crate::error::EXIT_SCHEMA_ERROR);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_checksum_failures_are_retried() {
        let (target, clone) = stores(vec![row(1, 3, "a")], vec![row(1, 3, "a")]);
        clone.flaky_fingerprints.store(2, Ordering::SeqCst);
        let config = config();
        let result = Reconciler::new(&target, &clone, &config)
            .compare(&orders(), false)
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::Unchanged);
        assert_eq!(clone.flaky_fingerprints.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_surface_after_retries() {
        let (target, clone) = stores(vec![row(1, 3, "a")], vec![row(1, 3, "a")]);
        clone.flaky_fingerprints.store(10, Ordering::SeqCst);
        let config = config();
        let err = Reconciler::new(&target, &clone, &config)
            .compare(&orders(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Transient { .. }));
        // first attempt plus three retries
        assert_eq!(clone.flaky_fingerprints.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_merge_still_drops_staging() {
        let (target, clone) = stores(vec![row(1, 3, "a"), row(2, 5, "x")], vec![row(1, 3, "a")]);
        clone.fail_apply.store(true, Ordering::SeqCst);
        let config = config();
        let err = Reconciler::new(&target, &clone, &config)
            .compare(&orders(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Constraint { .. }));
        assert!(clone.staging_tables().is_empty());
        assert!(clone
            .executed()
            .last()
            .unwrap()
            .starts_with("DROP TABLE IF EXISTS"));
        assert_eq!(clone.rows("Orders").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batch_falls_back_to_row_inserts() {
        let (target, clone) = stores(
            vec![row(1, 3, "a"), row(2, 5, "x"), row(3, 7, "y")],
            vec![],
        );
        clone.fail_bulk_load.store(true, Ordering::SeqCst);
        let mut config = config();
        config.sync.batch_size = 2;
        let result = Reconciler::new(&target, &clone, &config)
            .compare(&orders(), true)
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::Synced);
        let report = result.sync.unwrap();
        assert_eq!(report.fallback_batches, 2);
        assert_eq!(report.rows_staged, 3);
        assert_eq!(clone.rows("Orders"), target.rows("Orders"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_replace_strategy() {
        let (target, clone) = stores(vec![row(1, 3, "a")], vec![row(1, 9, "b"), row(2, 1, "c")]);
        let mut config = config();
        config.sync.overrides.insert(
            "Orders".into(),
            TableOverride {
                strategy: SyncStrategy::FullReplace,
                ..Default::default()
            },
        );
        let result = Reconciler::new(&target, &clone, &config)
            .compare(&orders(), true)
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::Synced);
        assert_eq!(result.sync.unwrap().strategy, SyncStrategy::FullReplace);
        assert!(clone
            .executed()
            .iter()
            .any(|s| s.starts_with("SET XACT_ABORT ON; BEGIN TRY BEGIN TRANSACTION; DELETE FROM [dbo].[Orders];")));
        assert_eq!(clone.rows("Orders"), target.rows("Orders"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconverged_sync_is_verification_error() {
        let (target, clone) = stores(vec![row(1, 3, "a"), row(2, 5, "x")], vec![row(1, 3, "a")]);
        clone.ignore_apply.store(true, Ordering::SeqCst);
        let config = config();
        let result = Reconciler::new(&target, &clone, &config)
            .compare(&orders(), true)
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::SyncIncomplete);
        assert!(result.reason().contains("still differs"));
        let err = result.into_result().unwrap_err();
        assert!(matches!(err, SyncError::Verification { .. }));
        assert_eq!(err.exit_code(), crate::error::EXIT_VERIFICATION_ERROR);
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_fallback_cannot_see_content() {
        let columns = vec![column("id", "int"), column("payload", "varbinary")];
        let target = FakeStore::new(Side::Target).with_table(
            "Blobs",
            columns.clone(),
            vec![vec![SqlValue::I32(1), SqlValue::bytes_owned(vec![1])]],
        );
        let clone = FakeStore::new(Side::Clone).with_table(
            "Blobs",
            columns,
            vec![vec![SqlValue::I32(1), SqlValue::bytes_owned(vec![2])]],
        );
        let config = config();
        let result = Reconciler::new(&target, &clone, &config)
            .compare(&TableSpec::new("Blobs", vec!["id".into()]), false)
            .await
            .unwrap();
        assert_eq!(result.comparable_columns, 0);
        assert_eq!(result.outcome, Outcome::Unchanged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_text_equal_within_shorter_width_is_unchanged() {
        assert_eq!(PREFIX.chars().count(), 30);
        let long = format!("{} and then some", PREFIX);
        let (target, clone) = narrow_clone_stores(
            vec![priced(1, 999, &long)],
            vec![priced(1, 999, PREFIX)],
        );
        let config = config();
        let result = Reconciler::new(&target, &clone, &config)
            .compare(&orders(), true)
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::Unchanged);
        assert!(clone.executed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_row_is_synced() {
        let (target, clone) = narrow_clone_stores(
            vec![priced(1, 999, "a"), priced(2, 500, "x")],
            vec![priced(1, 999, "a")],
        );
        let config = config();
        let result = Reconciler::new(&target, &clone, &config)
            .compare(&orders(), true)
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::Synced);
        assert_eq!(result.sync.unwrap().rows_affected, 1);
        assert_eq!(clone.rows("Orders"), vec![priced(1, 999, "a"), priced(2, 500, "x")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_narrower_clone_column_receives_cut_values() {
        let long = format!("{} and then some", PREFIX);
        let (target, clone) = narrow_clone_stores(
            vec![priced(1, 999, "a"), priced(2, 500, &long)],
            vec![priced(1, 999, "a")],
        );
        let config = config();
        let result = Reconciler::new(&target, &clone, &config)
            .compare(&orders(), true)
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::Synced);
        assert_eq!(clone.rows("Orders"), vec![priced(1, 999, "a"), priced(2, 500, PREFIX)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_case_only_change_is_synced() {
        let (target, clone) = stores(vec![row(1, 3, "Widget")], vec![row(1, 3, "widget")]);
        let config = config();
        let result = Reconciler::new(&target, &clone, &config)
            .compare(&orders(), true)
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::Synced);
        assert_eq!(result.sync.unwrap().rows_affected, 1);
        assert_eq!(clone.rows("Orders"), vec![row(1, 3, "Widget")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retried_batch_does_not_stage_rows_twice() {
        let (target, clone) = stores(
            vec![row(1, 3, "a"), row(2, 5, "x"), row(3, 7, "y")],
            vec![],
        );
        clone.partial_bulk_failures.store(1, Ordering::SeqCst);
        let mut config = config();
        config.sync.batch_size = 2;
        let result = Reconciler::new(&target, &clone, &config)
            .compare(&orders(), true)
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::Synced);
        let report = result.sync.unwrap();
        assert_eq!(report.fallback_batches, 0);
        assert_eq!(report.rows_staged, 3);
        assert_eq!(report.rows_affected, 3);
        assert!(clone
            .executed()
            .iter()
            .any(|s| s.ends_with("WHERE [_sync_row] BETWEEN 0 AND 1")));
        assert_eq!(clone.rows("Orders"), target.rows("Orders"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_after_partial_batches_does_not_duplicate() {
        let (target, clone) = stores(
            vec![row(1, 3, "a"), row(2, 5, "x"), row(3, 7, "y")],
            vec![],
        );
        clone.partial_bulk_failures.store(100, Ordering::SeqCst);
        let mut config = config();
        config.sync.batch_size = 2;
        let result = Reconciler::new(&target, &clone, &config)
            .compare(&orders(), true)
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::Synced);
        let report = result.sync.unwrap();
        assert_eq!(report.fallback_batches, 2);
        assert_eq!(report.rows_staged, 3);
        assert_eq!(clone.rows("Orders"), target.rows("Orders"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_batch_is_replayed() {
        let (target, clone) = stores(vec![row(1, 3, "a"), row(2, 5, "x")], vec![]);
        clone.stalled_bulk_loads.store(1, Ordering::SeqCst);
        let config = config();
        let result = Reconciler::new(&target, &clone, &config)
            .compare(&orders(), true)
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::Synced);
        assert_eq!(result.sync.unwrap().fallback_batches, 0);
        assert_eq!(clone.stalled_bulk_loads.load(Ordering::SeqCst), 0);
        assert_eq!(clone.rows("Orders"), target.rows("Orders"));
    }
}
