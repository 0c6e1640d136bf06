//! mssql-table-sync CLI - compare and reconcile SQL Server tables.

use clap::{Args, Parser, Subcommand};
use mssql_table_sync::config::Config;
use mssql_table_sync::core::Side;
use mssql_table_sync::db::{MssqlPool, TableStore};
use mssql_table_sync::reconcile::{self, Reconciler, TablePlan};
use mssql_table_sync::sync::{merge, prepare_rows};
use mssql_table_sync::verify::Normalization;
use mssql_table_sync::{BatchRunner, SyncError, SyncStrategy, TableStatus};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "mssql-table-sync")]
#[command(about = "Detect and reconcile table divergence between two SQL Server databases")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare tables and optionally sync the clone to the target
    Compare {
        /// Table to compare; every configured table when omitted
        table: Option<String>,

        /// Sync tables that differ and verify the result
        #[arg(long)]
        sync: bool,

        #[command(flatten)]
        databases: DatabaseOverrides,
    },

    /// Show how a table would be compared and synced
    Plan {
        /// Table to plan
        table: String,

        /// Print the first N target rows as T-SQL literals
        #[arg(long, default_value = "0")]
        sample: usize,

        #[command(flatten)]
        databases: DatabaseOverrides,
    },

    /// Test database connections
    HealthCheck,
}

#[derive(Args)]
struct DatabaseOverrides {
    /// Override the target database name
    #[arg(long)]
    target_db: Option<String>,

    /// Override the clone database name
    #[arg(long)]
    clone_db: Option<String>,
}

impl DatabaseOverrides {
    fn apply(self, config: &mut Config) -> Result<(), SyncError> {
        if let Some(db) = self.target_db {
            config.target.database = db;
        }
        if let Some(db) = self.clone_db {
            config.clone.database = db;
        }
        config.validate()
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<u8, SyncError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Compare {
            table,
            sync,
            databases,
        } => {
            databases.apply(&mut config)?;
            let tables = match table {
                Some(name) => vec![config.table_spec(&name)],
                None => config.sync.tables.clone(),
            };
            if tables.is_empty() {
                return Err(SyncError::Config(
                    "no tables configured under sync.tables; pass a TABLE".into(),
                ));
            }

            let cancel_token = setup_signal_handler()?;
            let runner = BatchRunner::new(config).with_cancellation(cancel_token);
            let result = runner.run(&tables, sync).await;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                println!("\n{} completed", if sync { "Sync" } else { "Comparison" });
                println!("  Run ID: {}", result.run_id);
                println!("  Duration: {:.2}s", result.duration_seconds);
                for table in &result.tables {
                    let mark = match (table.status, table.changed) {
                        (TableStatus::Error, _) => "✗",
                        (_, Some(true)) => "~",
                        _ => "✓",
                    };
                    println!("  {} {}: {}", mark, table.table, table.message);
                }
                println!(
                    "  Tables: {}/{} succeeded",
                    result.succeeded(),
                    result.tables.len()
                );
                if result.cancelled {
                    println!("  Cancelled before every table was processed");
                }
            }

            Ok(result.exit_code())
        }

        Commands::Plan {
            table,
            sample,
            databases,
        } => {
            databases.apply(&mut config)?;
            let spec = config.table_spec(&table);
            let (target, clone) = reconcile::connect(&config).await?;
            let plan = Reconciler::new(&target, &clone, &config).plan(&spec).await?;

            let mut samples = Vec::new();
            if sample > 0 {
                let columns: Vec<_> = plan.insertable.iter().map(|c| c.target.clone()).collect();
                let mut rows = target
                    .fetch_rows(&plan.sample_rows_sql(sample), &columns)
                    .await?;
                prepare_rows(&plan, &mut rows);
                samples = rows
                    .iter()
                    .map(|row| {
                        let literals: Vec<String> =
                            row.iter().map(|v| v.to_mssql_literal()).collect();
                        format!("({})", literals.join(", "))
                    })
                    .collect();
            }

            let staging = merge::staging_table_name(clone.schema(), &plan.table)?;
            let apply_sql = match plan.strategy {
                SyncStrategy::StageMerge => merge::merge_sql(&plan, &staging),
                SyncStrategy::FullReplace => merge::replace_sql(&plan, &staging),
            };

            if cli.output_json {
                let json = serde_json::json!({
                    "table": plan.table,
                    "target_table": plan.target_table,
                    "clone_table": plan.clone_table,
                    "strategy": plan.strategy,
                    "caller_pk": plan.caller_pk,
                    "effective_pk": plan.key_names(),
                    "comparable": plan
                        .comparable
                        .iter()
                        .map(|c| serde_json::json!({
                            "column": c.pair.name(),
                            "rule": rule_label(&c.rule),
                        }))
                        .collect::<Vec<_>>(),
                    "excluded": plan
                        .excluded
                        .iter()
                        .map(|(name, reason)| serde_json::json!({
                            "column": name,
                            "reason": reason.to_string(),
                        }))
                        .collect::<Vec<_>>(),
                    "target_checksum_sql": plan.checksum_query(Side::Target).sql,
                    "clone_checksum_sql": plan.checksum_query(Side::Clone).sql,
                    "create_staging_sql": merge::create_staging_sql(&staging, &plan),
                    "apply_sql": apply_sql,
                    "sample_rows": samples,
                });
                println!("{}", serde_json::to_string_pretty(&json)?);
            } else {
                print_plan(&plan, &staging, &apply_sql, &samples);
            }

            Ok(0)
        }

        Commands::HealthCheck => health_check(&config, cli.output_json).await,
    }
}

fn rule_label(rule: &Normalization) -> String {
    match rule {
        Normalization::Text { length } => format!("text({})", length),
        Normalization::Numeric => "numeric".to_string(),
        Normalization::Temporal { grain } => format!("temporal({:?})", grain).to_lowercase(),
    }
}

fn print_plan(plan: &TablePlan, staging: &str, apply_sql: &str, samples: &[String]) {
    println!("Table: {}", plan.table);
    println!("  Target: {}", plan.target_table);
    println!("  Clone: {}", plan.clone_table);
    println!("  Strategy: {}", plan.strategy);
    println!(
        "  Effective key: {} (configured: {})",
        plan.key_names().join(", "),
        plan.caller_pk.join(", ")
    );

    println!("\nComparable columns ({}):", plan.comparable.len());
    for c in &plan.comparable {
        println!("  {:<32} {}", c.pair.name(), rule_label(&c.rule));
    }
    if plan.comparable.is_empty() {
        println!("  (none, row counts are compared instead)");
    }

    println!("\nExcluded from comparison ({}):", plan.excluded.len());
    for (name, reason) in &plan.excluded {
        println!("  {:<32} {}", name, reason);
    }

    println!("\nTarget checksum query:\n{}", plan.checksum_query(Side::Target).sql);
    println!("\nClone checksum query:\n{}", plan.checksum_query(Side::Clone).sql);
    println!("\nStaging table:\n{}", merge::create_staging_sql(staging, plan));
    println!("\nApply statement:\n{}", apply_sql);

    if !samples.is_empty() {
        println!("\nSample target rows:");
        for row in samples {
            println!("  {}", row);
        }
    }
}

async fn health_check(config: &Config, output_json: bool) -> Result<u8, SyncError> {
    let mut checks = Vec::new();
    let mut first_error: Option<SyncError> = None;

    for (side, db) in [(Side::Target, &config.target), (Side::Clone, &config.clone)] {
        let start = Instant::now();
        let outcome = match MssqlPool::connect(db, side).await {
            Ok(pool) => pool.health_check().await,
            Err(e) => Err(e),
        };
        let latency_ms = start.elapsed().as_millis() as u64;
        let (version, error) = match outcome {
            Ok(version) => (Some(version), None),
            Err(e) => {
                let message = e.to_string();
                first_error.get_or_insert(e);
                (None, Some(message))
            }
        };
        checks.push((side, db.connection_string(), latency_ms, version, error));
    }

    let healthy = first_error.is_none();

    if output_json {
        let json = serde_json::json!({
            "healthy": healthy,
            "databases": checks
                .iter()
                .map(|(side, conn, latency, version, error)| serde_json::json!({
                    "side": side,
                    "connection": conn,
                    "connected": error.is_none(),
                    "latency_ms": latency,
                    "version": version,
                    "error": error,
                }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        println!("Health Check Results:");
        for (side, conn, latency, version, error) in &checks {
            println!(
                "  {} ({}): {} ({}ms)",
                side,
                conn,
                if error.is_none() { "OK" } else { "FAILED" },
                latency
            );
            if let Some(v) = version {
                println!("    {}", v);
            }
            if let Some(err) = error {
                println!("    Error: {}", err);
            }
        }
        println!(
            "\n  Overall: {}",
            if healthy { "HEALTHY" } else { "UNHEALTHY" }
        );
    }

    Ok(first_error.map_or(0, |e| e.exit_code()))
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // stdout is reserved for results
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received;
/// the batch stops before its next table.
#[cfg(unix)]
fn setup_signal_handler() -> Result<CancellationToken, SyncError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token_int = cancel_token.clone();
    tokio::spawn(async move {
        sigint.recv().await;
        eprintln!("\nReceived SIGINT. Stopping after the current table...");
        token_int.cancel();
    });

    let token_term = cancel_token.clone();
    tokio::spawn(async move {
        sigterm.recv().await;
        eprintln!("\nReceived SIGTERM. Stopping after the current table...");
        token_term.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> Result<CancellationToken, SyncError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current table...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
