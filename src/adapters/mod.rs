//! External system integrations for Sluice.
//!
//! - [`traits`] - Collaborator interfaces used by the pipeline
//! - [`postgresql`] - Relational source and checkpoint table
//! - [`routing`] - Dispatch of queries to named source databases
//! - [`staging`] - Object storage for staged CSV files (GCS, local directory)
//! - [`bigquery`] - Warehouse load jobs
//! - [`file`] - JSON file checkpoint storage
//! - [`memory`] - In-memory checkpoint storage
//! - [`factory`] - Builds the implementations selected by the configuration
//!
//! # Design Pattern
//!
//! Adapters follow the **Adapter Pattern**: the pipeline only sees the traits
//! in [`traits`], as `Arc<dyn Trait + Send + Sync>`, so every external system
//! can be replaced by a scripted fake in tests.
//!
//! ```rust,no_run
//! use sluice::adapters::factory::{build_run_context, run_parameters};
//! use sluice::config::load_config;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("sluice.toml")?;
//! let params = run_parameters(&config, false, None);
//! let ctx = build_run_context(&config, params, false).await?;
//! println!("Staging under {}", ctx.staging.layout().table_prefix(&"orders".parse()?));
//! # Ok(())
//! # }
//! ```

pub mod bigquery;
pub mod factory;
pub mod file;
pub mod memory;
pub mod postgresql;
pub mod routing;
pub mod staging;
pub mod traits;
