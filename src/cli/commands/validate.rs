//! Validate config command implementation
//!
//! This module implements the `validate-config` command for validating
//! the Sluice configuration file.

use crate::config::load_config;
use crate::config::schema::{CheckpointBackend, StagingBackend};
use crate::core::pipeline::exit_code;
use crate::domain::LoadPlan;
use clap::Args;

/// Arguments for the validate-config command
#[derive(Args, Debug)]
pub struct ValidateArgs {}

impl ValidateArgs {
    /// Execute the validate-config command
    ///
    /// Loading runs the full validation, so a loaded configuration is valid.
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(config_path = %config_path, "Validating configuration");

        println!("🔍 Validating configuration file: {config_path}");
        println!();

        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                println!("❌ Configuration validation failed");
                println!("   Error: {e}");
                println!();
                return Ok(exit_code::CONFIG_ERROR);
            }
        };

        let specs = match config.table_specs() {
            Ok(specs) => specs,
            Err(e) => {
                println!("❌ Configuration validation failed");
                println!("   Error: {e}");
                return Ok(exit_code::CONFIG_ERROR);
            }
        };

        println!("✅ Configuration is valid");
        println!();
        println!("Configuration Summary:");
        println!("  Log Level: {}", config.application.log_level);
        println!("  Dry Run: {}", config.application.dry_run);
        println!("  Source Timezone: {}", config.source.timezone);
        println!("  Source SSL Mode: {}", config.source.ssl_mode);
        match config.staging.backend {
            StagingBackend::Gcs => println!(
                "  Staging: gs://{}/{}",
                config.staging.bucket.as_deref().unwrap_or_default(),
                config.staging.data_path
            ),
            StagingBackend::Local => println!(
                "  Staging: {}/{} (local)",
                config.staging.local_root.as_deref().unwrap_or_default(),
                config.staging.data_path
            ),
        }
        println!(
            "  Warehouse: {}.{}",
            config.warehouse.project_id, config.warehouse.dataset_id
        );
        match config.checkpoint.backend {
            CheckpointBackend::Postgresql => {
                println!("  Checkpoints: PostgreSQL table {}", config.checkpoint.table_name)
            }
            CheckpointBackend::File => {
                println!("  Checkpoints: file {}", config.checkpoint.file_path)
            }
            CheckpointBackend::Memory => println!("  Checkpoints: in-memory (not persisted)"),
        }
        println!("  Max Concurrency: {}", config.run.max_concurrency);
        println!(
            "  Default Lookback: {} minute(s)",
            config.run.default_lookback_minutes
        );
        println!("  SystemDate Enabled: {}", config.systemdate.enabled);
        if let Some(selected) = config.table_filter() {
            println!("  Table Filter: {selected:?}");
        }
        println!();

        println!("Tables ({}):", specs.len());
        for spec in &specs {
            let load_type = spec.load_type(false);
            let plan = match spec.load_plan(load_type) {
                LoadPlan::Direct(disposition) => disposition.as_bigquery().to_string(),
                LoadPlan::Merge => format!(
                    "{} via {} ({})",
                    spec.merge.name(),
                    spec.landing_table(),
                    spec.kind
                ),
            };
            println!(
                "  - {} -> {} [{}, batch {}, {}, source {}]",
                spec.name,
                spec.target_table,
                load_type,
                spec.batch_size,
                plan,
                spec.database.as_deref().unwrap_or("default")
            );
        }
        println!();
        Ok(exit_code::SUCCESS)
    }
}
