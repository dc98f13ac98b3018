//! Run outcomes and reporting
//!
//! Every table of a run produces exactly one [`RunOutcome`]; the orchestrator
//! aggregates them into a [`RunReport`] that decides the process exit status.

use crate::adapters::traits::StagedObject;
use crate::core::incremental::resolver::ResolvedRange;
use crate::core::pipeline::runner::TableState;
use crate::domain::errors::ErrorKind;
use crate::domain::ids::TableName;
use crate::domain::table::LoadType;
use crate::domain::SluiceError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// Final status of one table in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Error summary carried by a failed outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeError {
    pub kind: ErrorKind,
    pub message: String,
    /// State the table was in when it failed
    pub state: TableState,
}

/// Result of one table in one run
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub table_name: TableName,
    pub status: OutcomeStatus,
    pub load_type: LoadType,
    pub rows_processed: u64,
    pub range: Option<ResolvedRange>,
    pub staged_objects: Vec<StagedObject>,
    pub load_job_id: Option<String>,
    /// New checkpoint literal, when one was written
    pub checkpoint: Option<String>,
    pub error: Option<OutcomeError>,
    pub skip_reason: Option<String>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl RunOutcome {
    fn base(table_name: TableName, load_type: LoadType, status: OutcomeStatus) -> Self {
        Self {
            table_name,
            status,
            load_type,
            rows_processed: 0,
            range: None,
            staged_objects: Vec::new(),
            load_job_id: None,
            checkpoint: None,
            error: None,
            skip_reason: None,
            duration: Duration::ZERO,
        }
    }

    pub fn succeeded(table_name: TableName, load_type: LoadType) -> Self {
        Self::base(table_name, load_type, OutcomeStatus::Succeeded)
    }

    pub fn failed(
        table_name: TableName,
        load_type: LoadType,
        error: &SluiceError,
        state: TableState,
    ) -> Self {
        let mut outcome = Self::base(table_name, load_type, OutcomeStatus::Failed);
        outcome.error = Some(OutcomeError {
            kind: error.kind(),
            message: error.to_string(),
            state,
        });
        outcome
    }

    pub fn skipped(table_name: TableName, load_type: LoadType, reason: impl Into<String>) -> Self {
        let mut outcome = Self::base(table_name, load_type, OutcomeStatus::Skipped);
        outcome.skip_reason = Some(reason.into());
        outcome
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Loaded into the warehouse but the checkpoint was not recorded
    pub fn checkpoint_not_recorded(&self) -> bool {
        self.error_kind() == Some(ErrorKind::CheckpointPersistence)
    }

    pub fn staged_bytes(&self) -> u64 {
        self.staged_objects.iter().map(|o| o.size_bytes).sum()
    }
}

/// Aggregated result of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub cancelled: bool,
    /// Holder of the run lock when the run could not start
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_conflict: Option<String>,
    pub outcomes: Vec<RunOutcome>,
}

/// Process exit codes
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const TABLE_FAILED: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
    pub const CHECKPOINT_NOT_RECORDED: i32 = 3;
    pub const CONNECTION_ERROR: i32 = 4;
    pub const FATAL: i32 = 5;
    pub const RUN_LOCKED: i32 = 6;
}

impl RunReport {
    pub fn new(run_id: Uuid, started_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            dry_run,
            cancelled: false,
            lock_conflict: None,
            outcomes: Vec::new(),
        }
    }

    fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(OutcomeStatus::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(OutcomeStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(OutcomeStatus::Skipped)
    }

    pub fn total_rows(&self) -> u64 {
        self.outcomes.iter().map(|o| o.rows_processed).sum()
    }

    pub fn outcome(&self, table: &str) -> Option<&RunOutcome> {
        self.outcomes.iter().find(|o| o.table_name.as_str() == table)
    }

    /// The run succeeded when no table failed
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn checkpoint_alerts(&self) -> impl Iterator<Item = &RunOutcome> {
        self.outcomes.iter().filter(|o| o.checkpoint_not_recorded())
    }

    /// Exit code for the `run` command
    ///
    /// A load whose checkpoint was not recorded outranks ordinary failures.
    pub fn exit_code(&self) -> i32 {
        if self.lock_conflict.is_some() {
            exit_code::RUN_LOCKED
        } else if self.checkpoint_alerts().next().is_some() {
            exit_code::CHECKPOINT_NOT_RECORDED
        } else if self.is_success() {
            exit_code::SUCCESS
        } else {
            exit_code::TABLE_FAILED
        }
    }

    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Log the report
    pub fn log_summary(&self) {
        tracing::info!(
            run_id = %self.run_id,
            tables = self.outcomes.len(),
            succeeded = self.succeeded(),
            failed = self.failed(),
            skipped = self.skipped(),
            rows = self.total_rows(),
            cancelled = self.cancelled,
            locked = self.lock_conflict.is_some(),
            dry_run = self.dry_run,
            duration_secs = self.duration().as_secs(),
            "Run completed"
        );

        for outcome in &self.outcomes {
            match (&outcome.status, &outcome.error) {
                (OutcomeStatus::Failed, Some(error)) => tracing::warn!(
                    table = %outcome.table_name,
                    kind = %error.kind,
                    state = %error.state,
                    message = %error.message,
                    "Table failed"
                ),
                _ => tracing::debug!(
                    table = %outcome.table_name,
                    status = ?outcome.status,
                    rows = outcome.rows_processed,
                    "Table outcome"
                ),
            }
        }
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}
