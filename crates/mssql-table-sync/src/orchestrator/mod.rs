//! Batch runner - reconciles a list of tables one after another.

use crate::config::{Config, TableSpec};
use crate::error::{Result, SyncError, EXIT_BATCH_FAILED, EXIT_CANCELLED};
use crate::reconcile::{reconcile_table, Outcome, Reconciliation};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Runs tables sequentially, each over its own pair of pools.
pub struct BatchRunner {
    config: Config,
    cancel: CancellationToken,
}

/// Per-table status, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Success,
    Error,
}

/// Result of one table within a batch.
#[derive(Debug, Clone, Serialize)]
pub struct TableResult {
    pub table: String,

    pub status: TableStatus,

    /// Terminal state; absent when the table failed.
    pub outcome: Option<Outcome>,

    /// Whether the clone differed from the target; absent when the table failed.
    pub changed: Option<bool>,

    pub message: String,

    /// Exit code of the failure, 0 on success.
    #[serde(skip)]
    pub exit_code: u8,
}

impl TableResult {
    fn success(reconciliation: &Reconciliation) -> Self {
        Self {
            table: reconciliation.table.clone(),
            status: TableStatus::Success,
            outcome: Some(reconciliation.outcome),
            changed: Some(!reconciliation.was_unchanged()),
            message: reconciliation.reason(),
            exit_code: 0,
        }
    }

    fn failure(table: &str, err: &SyncError) -> Self {
        Self {
            table: table.to_string(),
            status: TableStatus::Error,
            outcome: None,
            changed: None,
            message: err.to_string(),
            exit_code: err.exit_code(),
        }
    }
}

/// Result of a batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    /// Unique run identifier.
    pub run_id: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Stopped before every table was processed.
    pub cancelled: bool,

    pub tables: Vec<TableResult>,
}

impl BatchResult {
    pub fn failed(&self) -> usize {
        self.tables
            .iter()
            .filter(|t| t.status == TableStatus::Error)
            .count()
    }

    pub fn succeeded(&self) -> usize {
        self.tables.len() - self.failed()
    }

    /// Process exit code: 0 when every table succeeded, the failure's own code
    /// for a single failed table, 8 for several.
    pub fn exit_code(&self) -> u8 {
        if self.cancelled {
            return EXIT_CANCELLED;
        }
        let mut failures = self.tables.iter().filter(|t| t.status == TableStatus::Error);
        match (failures.next(), failures.next()) {
            (None, _) => 0,
            (Some(only), None) => only.exit_code,
            (Some(_), Some(_)) => EXIT_BATCH_FAILED,
        }
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl BatchRunner {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop the batch between tables when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Every configured table, in configuration order.
    pub fn configured_tables(&self) -> Vec<TableSpec> {
        self.config.sync.tables.clone()
    }

    /// Compare (and optionally sync) every table in `tables`.
    ///
    /// A failing table is recorded and the batch moves on.
    pub async fn run(&self, tables: &[TableSpec], sync: bool) -> BatchResult {
        let config = &self.config;
        self.run_with(tables, |spec| async move {
            reconcile_table(config, &spec, sync).await
        })
        .await
    }

    async fn run_with<F, Fut>(&self, tables: &[TableSpec], mut reconcile: F) -> BatchResult
    where
        F: FnMut(TableSpec) -> Fut,
        Fut: Future<Output = Result<Reconciliation>>,
    {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!("Starting run {} over {} tables", run_id, tables.len());

        let mut results = Vec::with_capacity(tables.len());
        let mut cancelled = false;

        for (i, spec) in tables.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!(
                    "Cancellation requested, skipping {} remaining tables",
                    tables.len() - i
                );
                cancelled = true;
                break;
            }

            info!("[{}/{}] {} (pk {:?})", i + 1, tables.len(), spec.table, spec.pk);
            let result = match reconcile(spec.clone()).await {
                Ok(reconciliation) => {
                    info!("{}: {}", spec.table, reconciliation.reason());
                    TableResult::success(&reconciliation)
                }
                Err(e) => {
                    error!("{}: {}", spec.table, e.format_detailed());
                    TableResult::failure(&spec.table, &e)
                }
            };
            results.push(result);
        }

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        let result = BatchResult {
            run_id,
            started_at,
            completed_at,
            duration_seconds: duration,
            cancelled,
            tables: results,
        };

        info!(
            "Run {} finished: {} succeeded, {} failed in {:.1}s",
            result.run_id,
            result.succeeded(),
            result.failed(),
            result.duration_seconds
        );
        result
    }
}
