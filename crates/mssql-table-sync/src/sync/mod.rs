//! Reconciling the clone onto the target through a staging table.
//!
//! Both strategies share the same protocol:
//!
//! 1. Read every target row for the insertable columns.
//! 2. Create a staging table on the clone and bulk load the rows in batches.
//!    Every staged row carries its position, so the rows a failed attempt
//!    left behind are deleted before the batch is loaded again. A batch that
//!    still fails is reloaded row by row, each row retried on its own.
//! 3. Apply one set-based statement: a MERGE (stage-then-merge) or a
//!    delete-and-insert transaction (full replace).
//! 4. Drop the staging table, whether or not the earlier steps succeeded.

pub mod merge;

use crate::config::SyncStrategy;
use crate::core::{Row, SqlValue, TypeFamily};
use crate::db::TableStore;
use crate::error::Result;
use crate::reconcile::TablePlan;
use crate::retry::{with_retry, RetryPolicy};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// What a sync did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub strategy: SyncStrategy,
    /// Rows read from the target.
    pub rows_read: usize,
    /// Rows loaded into staging.
    pub rows_staged: usize,
    /// Rows the final statement reported as affected.
    pub rows_affected: u64,
    /// Batches that fell back to row-by-row inserts.
    pub fallback_batches: usize,
}

/// Copies target rows onto the clone for one table at a time.
pub struct SyncEngine<'a> {
    target: &'a dyn TableStore,
    clone: &'a dyn TableStore,
    policy: RetryPolicy,
    batch_size: usize,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        target: &'a dyn TableStore,
        clone: &'a dyn TableStore,
        policy: RetryPolicy,
        batch_size: usize,
    ) -> Self {
        Self {
            target,
            clone,
            policy,
            batch_size: batch_size.max(1),
        }
    }

    /// Make the clone table mirror the target table.
    pub async fn sync(&self, plan: &TablePlan) -> Result<SyncReport> {
        let start = Instant::now();
        info!(
            "{}: syncing with {} ({} columns)",
            plan.table,
            plan.strategy,
            plan.insertable.len()
        );

        let sql = plan.select_rows_sql();
        let columns: Vec<_> = plan.insertable.iter().map(|c| c.target.clone()).collect();
        let context = format!("reading {} from target", plan.table);
        let mut rows = with_retry(&self.policy, &context, || {
            self.target.fetch_rows(&sql, &columns)
        })
        .await?;
        let rows_read = rows.len();
        prepare_rows(plan, &mut rows);
        tag_rows(&mut rows);
        debug!("{}: read {} rows from target", plan.table, rows_read);

        let staging = merge::staging_table_name(self.clone.schema(), &plan.table)?;
        let result = self.stage_and_apply(plan, &staging, &rows).await;

        let drop_sql = merge::drop_staging_sql(&staging);
        let drop_context = format!("dropping {}", staging);
        if let Err(e) = with_retry(&self.policy, &drop_context, || self.clone.execute(&drop_sql)).await
        {
            warn!("{}: could not drop staging table {}: {}", plan.table, staging, e);
        }

        let mut report = result?;
        report.rows_read = rows_read;
        info!(
            "{}: sync applied, {} rows staged, {} affected in {:.1}s",
            plan.table,
            report.rows_staged,
            report.rows_affected,
            start.elapsed().as_secs_f64()
        );
        Ok(report)
    }

    async fn stage_and_apply(
        &self,
        plan: &TablePlan,
        staging: &str,
        rows: &[Row],
    ) -> Result<SyncReport> {
        let create_sql = merge::create_staging_sql(staging, plan);
        let context = format!("creating {}", staging);
        with_retry(&self.policy, &context, || self.clone.execute(&create_sql)).await?;
        debug!("{}: created staging table {}", plan.table, staging);

        let (rows_staged, fallback_batches) = self.load_staging(plan, staging, rows).await?;

        let apply_sql = match plan.strategy {
            SyncStrategy::StageMerge => merge::merge_sql(plan, staging),
            SyncStrategy::FullReplace => merge::replace_sql(plan, staging),
        };
        debug!("{}: {}", plan.table, apply_sql);
        let context = format!("applying {} to {}", plan.strategy, plan.table);
        let rows_affected =
            with_retry(&self.policy, &context, || self.clone.execute(&apply_sql)).await?;

        Ok(SyncReport {
            strategy: plan.strategy,
            rows_read: rows.len(),
            rows_staged,
            rows_affected,
            fallback_batches,
        })
    }

    /// Load tagged rows into staging. Returns rows staged and fallback batches.
    async fn load_staging(
        &self,
        plan: &TablePlan,
        staging: &str,
        rows: &[Row],
    ) -> Result<(usize, usize)> {
        let mut columns: Vec<String> = plan
            .insertable
            .iter()
            .map(|c| c.clone_quoted.clone())
            .collect();
        columns.push(merge::ROW_TAG_COLUMN.to_string());
        let mut staged = 0usize;
        let mut fallback_batches = 0usize;

        for (batch_no, batch) in rows.chunks(self.batch_size).enumerate() {
            let first = (batch_no * self.batch_size) as i64;
            let last = first + batch.len() as i64 - 1;
            let clear_sql = merge::clear_staged_rows_sql(staging, first, last);

            let context = format!("loading batch {} of {}", batch_no + 1, plan.table);
            let attempts = AtomicU32::new(0);
            let loaded = with_retry(&self.policy, &context, || {
                let replay = attempts.fetch_add(1, Ordering::SeqCst) > 0;
                let clear_sql = &clear_sql;
                async move {
                    if replay {
                        self.clone.execute(clear_sql).await?;
                    }
                    self.clone.bulk_load(staging, batch).await
                }
            })
            .await;

            if let Err(e) = loaded {
                warn!(
                    "{}: batch {} ({} rows) failed, loading row by row: {}",
                    plan.table,
                    batch_no + 1,
                    batch.len(),
                    e
                );
                fallback_batches += 1;
                let context = format!("clearing batch {} of {}", batch_no + 1, plan.table);
                with_retry(&self.policy, &context, || self.clone.execute(&clear_sql)).await?;
                for row in batch {
                    self.insert_row(plan, staging, &columns, row).await?;
                }
            }
            staged += batch.len();
        }

        debug!("{}: staged {} rows", plan.table, staged);
        Ok((staged, fallback_batches))
    }

    /// Insert one tagged row, clearing its tag before every retry.
    async fn insert_row(
        &self,
        plan: &TablePlan,
        staging: &str,
        columns: &[String],
        row: &Row,
    ) -> Result<()> {
        let tag = match row.last() {
            Some(SqlValue::I64(tag)) => *tag,
            _ => 0,
        };
        let clear_sql = merge::clear_staged_rows_sql(staging, tag, tag);
        let context = format!("loading row {} of {}", tag + 1, plan.table);
        let attempts = AtomicU32::new(0);
        with_retry(&self.policy, &context, || {
            let replay = attempts.fetch_add(1, Ordering::SeqCst) > 0;
            let clear_sql = &clear_sql;
            async move {
                if replay {
                    self.clone.execute(clear_sql).await?;
                }
                self.clone
                    .insert_rows(staging, columns, std::slice::from_ref(row))
                    .await
            }
        })
        .await?;
        Ok(())
    }
}

/// Append each row's position, the value of the staging row tag.
fn tag_rows(rows: &mut [Row]) {
    for (idx, row) in rows.iter_mut().enumerate() {
        row.push(SqlValue::I64(idx as i64));
    }
}

/// Apply the row formatting rule to rows read from the target.
///
/// NULL bits become `false`, and decimals take the scale of their staging
/// column so the bulk load does not reject them.
pub fn prepare_rows(plan: &TablePlan, rows: &mut [Row]) {
    let bits: Vec<bool> = plan
        .insertable
        .iter()
        .map(|c| c.target.family() == TypeFamily::Bit)
        .collect();
    let scales: Vec<Option<u8>> = plan
        .insertable
        .iter()
        .map(merge::staging_decimal_scale)
        .collect();

    for row in rows.iter_mut() {
        for (idx, value) in row.iter_mut().enumerate() {
            match value {
                SqlValue::Null(_) if bits.get(idx).copied().unwrap_or(false) => {
                    *value = SqlValue::Bool(false);
                }
                SqlValue::Decimal(d) => {
                    if let Some(Some(scale)) = scales.get(idx) {
                        d.rescale(u32::from(*scale));
                    }
                }
                _ => {}
            }
        }
    }
}
