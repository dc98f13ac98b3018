//! Configuration management for Sluice.
//!
//! This module provides TOML-based configuration loading, parsing, and validation.
//!
//! # Overview
//!
//! Sluice uses TOML configuration files with support for:
//! - Environment variable substitution (`${VAR_NAME}`)
//! - `SLUICE_<SECTION>_<KEY>` environment overrides
//! - Default values for optional settings
//! - Validation of every section before a run starts
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use sluice::config::load_config;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("sluice.toml")?;
//!
//! println!("Dataset: {}", config.warehouse.dataset_id);
//! for table in config.table_specs()? {
//!     println!("{} ({})", table.name, table.load_type(false));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration Structure
//!
//! - [`ApplicationConfig`] - Log level and dry-run switch
//! - [`SourceConfig`] - PostgreSQL source connection and timezone
//! - [`StagingConfig`] - Object storage for CSV batches
//! - [`WarehouseConfig`] - BigQuery project, dataset and job polling
//! - [`CheckpointConfig`] - Where per-table checkpoints live
//! - [`RunConfig`] - Concurrency, lookback, timeout and table filtering
//! - [`RetryConfig`] - Backoff for transient failures
//! - [`SystemDateSection`] - Extraction window
//! - [`LoggingConfig`] - Logging configuration
//! - [`TableSection`] - One managed table
//!
//! # Example Configuration
//!
//! ```toml
//! [source]
//! connection_string = "${SLUICE_SOURCE_URL}"
//! timezone = "+09:00"
//!
//! [staging]
//! bucket = "etl-staging"
//! data_path = "exports"
//! access_token = "${GCS_TOKEN}"
//!
//! [warehouse]
//! project_id = "analytics"
//! dataset_id = "raw"
//! access_token = "${BQ_TOKEN}"
//!
//! [SYSTEMDATE]
//! enabled = true
//! end_date = "relative"
//! end_offset = 0
//!
//! [[tables]]
//! name = "orders"
//! base_query = "SELECT * FROM orders"
//! ```

pub mod loader;
pub mod schema;
pub mod secret;

// Re-export commonly used types
pub use loader::{load_config, parse_config};
pub use schema::{
    ApplicationConfig, CheckpointBackend, CheckpointConfig, LoggingConfig, RawDateBound,
    RetryConfig, RunConfig, SluiceConfig, SourceConfig, StagingBackend, StagingConfig,
    SystemDateSection, TableSection, WarehouseConfig,
};
pub use secret::{secret_string, secret_string_opt, SecretString, SecretValue};
