//! Extraction → staging → load → checkpoint pipeline
//!
//! - [`runner`] - per-table state machine
//! - [`orchestrator`] - bounded-concurrency fan-out over tables
//! - [`staging`] - CSV serialization and object publication
//! - [`retry`] - exponential backoff policy
//! - [`cancel`] - run-level cancellation signal
//! - [`lock`] - cross-process run lock
//! - [`report`] - per-table outcomes and the run report

pub mod cancel;
pub mod lock;
pub mod orchestrator;
pub mod report;
pub mod retry;
pub mod runner;
pub mod staging;

pub use cancel::Cancellation;
pub use lock::{LockAttempt, LockHolder, RunLock};
pub use orchestrator::{Orchestrator, DEFAULT_MAX_CONCURRENCY};
pub use report::{exit_code, OutcomeStatus, RunOutcome, RunReport};
pub use retry::RetryPolicy;
pub use runner::{RunContext, TableRunner, TableState};
pub use staging::{StagingLayout, StagingWriter};
