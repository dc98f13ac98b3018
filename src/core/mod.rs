//! Core business logic for Sluice.
//!
//! # Modules
//!
//! - [`incremental`] - Extraction window resolution and query rewriting
//! - [`state`] - Per-table checkpoints with monotonic commits
//! - [`pipeline`] - Table runners, orchestration, staging and reporting
//!
//! # Run Workflow
//!
//! For every configured table, concurrently up to `max_concurrency`:
//!
//! 1. **Resolve**: compute the `[start, end]` window from the SystemDate
//!    configuration, the stored checkpoint and "now"
//! 2. **Rewrite**: bound the base query to that window
//! 3. **Extract**: stream the result set from the source in `batch_size` batches
//! 4. **Stage**: write each batch as one CSV object
//! 5. **Load**: register all staged objects as one warehouse load job
//! 6. **Commit**: record the window end as the new checkpoint
//!
//! # Example
//!
//! ```rust,no_run
//! use sluice::config::load_config;
//! use sluice::adapters::factory::build_run_context;
//! use sluice::core::incremental::RunParameters;
//! use sluice::core::pipeline::{Cancellation, Orchestrator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("sluice.toml")?;
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!
//! let ctx = build_run_context(&config, RunParameters::default(), false).await?;
//! let orchestrator = Orchestrator::new(ctx, Cancellation::new(shutdown_rx))
//!     .with_max_concurrency(config.run.max_concurrency);
//!
//! let report = orchestrator.run(config.table_specs()?).await;
//! println!("Succeeded: {}", report.succeeded());
//! println!("Failed: {}", report.failed());
//! # Ok(())
//! # }
//! ```

pub mod incremental;
pub mod pipeline;
pub mod state;
