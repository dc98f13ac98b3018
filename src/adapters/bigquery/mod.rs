//! BigQuery integration
//!
//! Staged CSV objects are loaded with BigQuery load jobs over the REST API,
//! incremental windows are merged from a landing table with query jobs.

pub mod loader;
pub mod merge;
pub mod models;

pub use loader::{job_id_for, BigQueryLoader};
