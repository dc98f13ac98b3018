//! Run command implementation
//!
//! This module implements the `run` command: one extraction, staging, load
//! and checkpoint pass over the configured tables, under the run lock.

use crate::adapters::factory::{build_run_context, create_run_lock, run_parameters};
use crate::config::schema::MAX_CONCURRENCY;
use crate::config::{load_config, SluiceConfig};
use crate::core::pipeline::{exit_code, Cancellation, Orchestrator, OutcomeStatus, RunReport};
use crate::domain::SluiceError;
use clap::Args;
use std::time::Duration;
use tokio::sync::watch;

/// Arguments for the run command
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Ignore checkpoints and SystemDate bounds; reload every table in full
    #[arg(long)]
    pub force_full_load: bool,

    /// Window length in minutes when neither a start bound nor a checkpoint exists
    #[arg(long, value_name = "MINUTES")]
    pub lookback_minutes: Option<u32>,

    /// Process only these tables (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub table: Vec<String>,

    /// Resolve windows and log final queries without touching any data
    #[arg(long)]
    pub dry_run: bool,

    /// Override run.max_concurrency
    #[arg(long, value_name = "N", value_parser = parse_concurrency)]
    pub max_concurrency: Option<usize>,

    /// Remove a run lock left behind by a crashed run before starting
    #[arg(long)]
    pub force_unlock: bool,
}

fn parse_concurrency(value: &str) -> Result<usize, String> {
    let n: usize = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;
    if n == 0 || n > MAX_CONCURRENCY {
        return Err(format!("must be between 1 and {MAX_CONCURRENCY}"));
    }
    Ok(n)
}

/// Exit code for a failure before any table started
fn setup_exit_code(error: &SluiceError) -> i32 {
    match error {
        SluiceError::Configuration(_) | SluiceError::ConfigValidation(_) => {
            exit_code::CONFIG_ERROR
        }
        SluiceError::Connection(_) | SluiceError::TransientExtraction(_) => {
            exit_code::CONNECTION_ERROR
        }
        SluiceError::RunLocked(_) => exit_code::RUN_LOCKED,
        _ => exit_code::FATAL,
    }
}

impl RunArgs {
    /// Tables selected by `--table`, falling back to `run.target_tables`
    fn table_filter(&self, config: &SluiceConfig) -> Result<Option<Vec<String>>, String> {
        if self.table.is_empty() {
            return Ok(config.table_filter());
        }

        let selected: Vec<String> = self
            .table
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if let Some(unknown) = selected
            .iter()
            .find(|name| !config.tables.iter().any(|t| &t.name == *name))
        {
            return Err(format!("--table references unknown table '{unknown}'"));
        }
        Ok(Some(selected))
    }

    /// Execute the run command
    pub async fn execute(
        &self,
        config_path: &str,
        shutdown_signal: watch::Receiver<bool>,
    ) -> anyhow::Result<i32> {
        tracing::info!("Starting run command");

        let mut config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load configuration");
                eprintln!("Configuration error: {e}");
                return Ok(exit_code::CONFIG_ERROR);
            }
        };

        if let Some(n) = self.max_concurrency {
            tracing::info!(max_concurrency = n, "Overriding max concurrency from CLI");
            config.run.max_concurrency = n;
        }
        let dry_run = self.dry_run || config.application.dry_run;

        let filter = match self.table_filter(&config) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("Configuration error: {e}");
                return Ok(exit_code::CONFIG_ERROR);
            }
        };

        let tables = match config.table_specs() {
            Ok(t) => t,
            Err(e) => {
                eprintln!("Configuration error: {e}");
                return Ok(exit_code::CONFIG_ERROR);
            }
        };

        let run_lock = match create_run_lock(&config) {
            Ok(lock) => lock,
            Err(e) => {
                eprintln!("Failed to initialize run: {e}");
                return Ok(setup_exit_code(&e));
            }
        };
        if self.force_unlock {
            match &run_lock {
                Some(lock) => match lock.force_release().await {
                    Ok(Some(holder)) => println!("🔓 Removed run lock held by {holder}"),
                    Ok(None) => println!("🔓 Removed run lock {}", lock.path()),
                    Err(e) => {
                        eprintln!("Failed to remove run lock: {e}");
                        return Ok(setup_exit_code(&e));
                    }
                },
                None => println!("Run lock is disabled, nothing to remove"),
            }
        }

        let params = run_parameters(&config, self.force_full_load, self.lookback_minutes);
        let ctx = match build_run_context(&config, params, dry_run).await {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::error!(error = %e, kind = %e.kind(), "Failed to initialize run");
                eprintln!("Failed to initialize run: {e}");
                return Ok(setup_exit_code(&e));
            }
        };

        if dry_run {
            tracing::info!("Dry run mode enabled - no data will be moved");
            println!("🔍 DRY RUN MODE - final queries are logged, nothing is extracted or loaded");
            println!();
        }
        if self.force_full_load {
            println!("⚠️  Forced full load: checkpoints and SystemDate bounds are ignored");
        }
        println!("🚀 Starting run over {} table(s)...", tables.len());
        println!();

        let mut orchestrator = Orchestrator::new(ctx, Cancellation::new(shutdown_signal))
            .with_max_concurrency(config.run.max_concurrency)
            .with_run_timeout(config.run.run_timeout_seconds.map(Duration::from_secs));
        if let Some(selected) = filter {
            orchestrator = orchestrator.with_table_filter(selected);
        }
        if let Some(lock) = run_lock {
            orchestrator = orchestrator.with_run_lock(lock);
        }

        // The orchestrator has already logged the summary
        let report = orchestrator.run(tables).await;
        print_report(&report);

        Ok(report.exit_code())
    }
}

fn print_report(report: &RunReport) {
    println!("📊 Run Summary ({})", report.run_id);
    println!(
        "  {:<30} {:<10} {:<12} {:>10} {:<45}",
        "Table", "Status", "Load", "Rows", "Window / Reason"
    );
    println!("  {}", "-".repeat(110));

    for outcome in &report.outcomes {
        let status = match outcome.status {
            OutcomeStatus::Succeeded => "✅ ok",
            OutcomeStatus::Failed => "❌ failed",
            OutcomeStatus::Skipped => "⏭️  skipped",
        };
        let detail = match (&outcome.error, &outcome.skip_reason, &outcome.range) {
            (Some(error), _, _) => format!("{}: {}", error.kind, error.message),
            (None, Some(reason), _) => reason.clone(),
            (None, None, Some(range)) => range.to_string(),
            (None, None, None) => "full".to_string(),
        };
        println!(
            "  {:<30} {:<10} {:<12} {:>10} {:<45}",
            outcome.table_name.as_str(),
            status,
            outcome.load_type.to_string(),
            outcome.rows_processed,
            detail
        );
    }

    println!();
    println!("  Succeeded: {}", report.succeeded());
    println!("  Failed: {}", report.failed());
    println!("  Skipped: {}", report.skipped());
    println!("  Rows: {}", report.total_rows());
    println!("  Duration: {:.2}s", report.duration().as_secs_f64());
    println!();

    let alerts: Vec<_> = report.checkpoint_alerts().collect();
    if !alerts.is_empty() {
        println!("🚨 Loaded but checkpoint NOT recorded (next run will reload the window):");
        for outcome in alerts {
            println!(
                "  - {} (job {})",
                outcome.table_name,
                outcome.load_job_id.as_deref().unwrap_or("-")
            );
        }
        println!();
    }

    if let Some(conflict) = &report.lock_conflict {
        println!("🔒 {conflict}");
        println!("   Wait for that run to finish, or pass --force-unlock if it crashed.");
    } else if report.cancelled {
        println!("⚠️  Run cancelled. Tables without a checkpoint will resume next run.");
    } else if report.is_success() {
        println!("✅ Run completed successfully!");
    } else {
        println!("⚠️  Run completed with failures");
    }
}
