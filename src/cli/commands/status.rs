//! Status command implementation
//!
//! This module implements the `status` command for displaying the stored
//! checkpoint of every table.

use crate::adapters::factory::{create_checkpoint_storage, create_postgres_client};
use crate::config::load_config;
use crate::core::pipeline::exit_code;
use crate::core::state::checkpoint::Checkpoint;
use crate::core::state::CheckpointManager;
use crate::domain::SluiceError;
use clap::Args;

/// Arguments for the status command
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Show only this table
    #[arg(long)]
    pub table: Option<String>,
}

/// One line of the status listing
#[derive(Debug, PartialEq, Eq)]
struct StatusLine {
    table: String,
    configured: bool,
    last_run_time: Option<String>,
    rows_loaded: Option<u64>,
    load_job_id: Option<String>,
}

/// Configured tables first (in configuration order), then checkpoints of
/// tables no longer configured
fn status_lines(configured: &[String], checkpoints: &[Checkpoint]) -> Vec<StatusLine> {
    let line = |table: &str, configured: bool| {
        let cp = checkpoints.iter().find(|c| c.table_name.as_str() == table);
        StatusLine {
            table: table.to_string(),
            configured,
            last_run_time: cp.map(Checkpoint::last_run_time_literal),
            rows_loaded: cp.map(|c| c.rows_loaded),
            load_job_id: cp.and_then(|c| c.load_job_id.clone()),
        }
    };

    let mut lines: Vec<StatusLine> = configured.iter().map(|t| line(t, true)).collect();
    lines.extend(
        checkpoints
            .iter()
            .filter(|c| !configured.iter().any(|t| t == c.table_name.as_str()))
            .map(|c| line(c.table_name.as_str(), false)),
    );
    lines
}

impl StatusArgs {
    /// Execute the status command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!("Checking checkpoint status");

        println!("📊 Checkpoint Status");
        println!();

        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                println!("❌ Failed to load configuration file");
                println!("   Error: {e}");
                return Ok(exit_code::CONFIG_ERROR);
            }
        };

        let storage = match create_postgres_client(&config.source) {
            Ok(pg) => create_checkpoint_storage(&config.checkpoint, &pg),
            Err(e) => {
                println!("❌ Failed to create checkpoint storage");
                println!("   Error: {e}");
                return Ok(exit_code::CONNECTION_ERROR);
            }
        };
        let manager = CheckpointManager::new_with_storage(storage);

        let checkpoints = match manager.get_all_checkpoints().await {
            Ok(c) => c,
            Err(e) => {
                println!("❌ Failed to load checkpoints");
                println!("   Error: {e}");
                return Ok(match e {
                    SluiceError::Connection(_) => exit_code::CONNECTION_ERROR,
                    _ => exit_code::FATAL,
                });
            }
        };

        let configured: Vec<String> = config.tables.iter().map(|t| t.name.clone()).collect();
        let lines: Vec<StatusLine> = status_lines(&configured, &checkpoints)
            .into_iter()
            .filter(|l| self.table.as_ref().map_or(true, |t| &l.table == t))
            .collect();

        if lines.is_empty() {
            println!("No tables match the specified filter.");
            return Ok(exit_code::SUCCESS);
        }

        println!(
            "{:<30} {:<22} {:>12} {:<40}",
            "Table", "Last Run Time", "Rows", "Load Job"
        );
        println!("{}", "-".repeat(108));

        for line in lines {
            let name = if line.configured {
                line.table
            } else {
                format!("{} (unconfigured)", line.table)
            };
            println!(
                "{:<30} {:<22} {:>12} {:<40}",
                name,
                line.last_run_time.as_deref().unwrap_or("Never"),
                line.rows_loaded.map(|r| r.to_string()).unwrap_or_else(|| "-".into()),
                line.load_job_id.as_deref().unwrap_or("-")
            );
        }

        println!();
        Ok(exit_code::SUCCESS)
    }
}
