//! Incremental extraction engine
//!
//! - [`resolver`] - decides the `[start, end]` window of a table for a run
//! - [`rewriter`] - bounds the base query to that window
//! - [`scan`] - SQL tokenizer shared by the rewriter and config validation

pub mod resolver;
pub mod rewriter;
pub mod scan;

pub use resolver::{resolve, ResolvedRange, RunParameters, StartOrigin, DEFAULT_LOOKBACK_MINUTES};
pub use rewriter::{rewrite, statement_body, FinalQuery};
