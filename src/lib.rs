// Sluice - Incremental relational to warehouse batch loader
// Copyright (c) 2025 Sluice Contributors
// Licensed under the MIT License

//! # Sluice - incremental relational to warehouse batch loader
//!
//! Sluice moves tables from a relational source into an analytical warehouse
//! in three hops: it extracts rows inside a SystemDate window, stages them as
//! CSV objects in object storage and registers them with a warehouse load job.
//! A per-table checkpoint advances only after the load job has completed.
//!
//! ## Architecture
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`core`] - Window resolution, query rewriting, checkpoints and the pipeline
//! - [`adapters`] - External integrations (PostgreSQL, GCS, BigQuery, checkpoint stores)
//! - [`domain`] - Core domain types and the error taxonomy
//! - [`config`] - Configuration management
//! - [`logging`] - Structured logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sluice::adapters::factory::{build_run_context, run_parameters};
//! use sluice::config::SluiceConfig;
//! use sluice::core::pipeline::{Cancellation, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SluiceConfig::from_file("sluice.toml")?;
//!
//!     let params = run_parameters(&config, false, None);
//!     let ctx = build_run_context(&config, params, false).await?;
//!
//!     let report = Orchestrator::new(ctx, Cancellation::never())
//!         .with_max_concurrency(config.run.max_concurrency)
//!         .run(config.table_specs()?)
//!         .await;
//!
//!     println!("Loaded {} rows", report.total_rows());
//!     std::process::exit(report.exit_code());
//! }
//! ```
//!
//! ## Incremental Windows
//!
//! Each incremental table is bounded by a closed `[start, end]` window on its
//! timestamp column. The start comes from the configured SystemDate bound, the
//! stored checkpoint or a lookback from "now"; the end from the configured
//! bound or "now":
//!
//! ```rust
//! use sluice::core::incremental::{resolve, RunParameters, StartOrigin};
//! use sluice::domain::timestamp::parse_timestamp;
//! use sluice::domain::{SystemDateConfig, TableName, TableSpec};
//!
//! let spec = TableSpec::new(TableName::new("orders").unwrap(), "SELECT * FROM orders");
//! let now = parse_timestamp("2024-05-01 12:00:00").unwrap();
//! let params = RunParameters { force_full_load: false, lookback_minutes: 30 };
//!
//! let range = resolve(&spec, &SystemDateConfig::disabled(), None, now, params)
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(range.to_string(), "[2024-05-01 11:30:00, 2024-05-01 12:00:00]");
//! assert_eq!(range.start_origin, StartOrigin::Lookback);
//! ```
//!
//! ## Error Handling
//!
//! Sluice uses the [`domain::SluiceError`] type for all errors. Every failed
//! table carries the error's [`domain::ErrorKind`] in its outcome; one table
//! failing never aborts another.
//!
//! ## Logging
//!
//! Sluice uses structured logging with the `tracing` crate:
//!
//! ```rust,no_run
//! use tracing::{info, warn};
//!
//! info!(table = "orders", rows = 1200, "Table run finished");
//! warn!(table = "orders", attempt = 2, "Retrying staging upload");
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod logging;
