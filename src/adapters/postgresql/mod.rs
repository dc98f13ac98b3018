//! PostgreSQL integration
//!
//! The source database serves two roles: it is the relational source that
//! final queries run against, and (with `checkpoint.backend = "postgresql"`)
//! the home of the checkpoint table.

pub mod checkpoint;
pub mod client;
pub mod models;
pub mod source;

pub use checkpoint::PostgresCheckpointStorage;
pub use client::PostgresClient;
pub use models::CheckpointRow;
pub use source::{PgRowCursor, PostgresSource};
