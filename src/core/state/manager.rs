//! Checkpoint manager
//!
//! This module provides the CheckpointManager that loads checkpoints before a
//! window is resolved and commits them after a load is confirmed.

use crate::adapters::traits::CheckpointStorage;
use crate::core::state::checkpoint::{Checkpoint, CheckpointBuilder};
use crate::domain::ids::TableName;
use crate::domain::{Result, SluiceError};
use chrono::NaiveDateTime;
use std::sync::Arc;

/// Result of a checkpoint commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The new watermark was written
    Advanced(Checkpoint),
    /// A later watermark was already stored and was kept
    Retained(Checkpoint),
}

impl CommitOutcome {
    pub fn checkpoint(&self) -> &Checkpoint {
        match self {
            Self::Advanced(cp) | Self::Retained(cp) => cp,
        }
    }
}

/// Checkpoint manager
///
/// Wraps a [`CheckpointStorage`] and keeps every table's `last_run_time`
/// monotonically non-decreasing: a commit older than the stored value never
/// replaces it.
pub struct CheckpointManager {
    storage: Arc<dyn CheckpointStorage + Send + Sync>,
}

impl CheckpointManager {
    pub fn new_with_storage(storage: Arc<dyn CheckpointStorage + Send + Sync>) -> Self {
        Self { storage }
    }

    /// Load the checkpoint of a table
    ///
    /// # Errors
    ///
    /// Storage failures are reported as [`SluiceError::CheckpointRead`].
    pub async fn load_checkpoint(&self, table: &TableName) -> Result<Option<Checkpoint>> {
        self.storage
            .load_checkpoint(table)
            .await
            .map_err(|e| match e {
                SluiceError::CheckpointRead(_) => e,
                other => SluiceError::CheckpointRead(format!("{table}: {other}")),
            })
    }

    /// Get all stored checkpoints
    pub async fn get_all_checkpoints(&self) -> Result<Vec<Checkpoint>> {
        self.storage.get_all_checkpoints().await
    }

    /// Record `last_run_time` as the new watermark of a table
    ///
    /// Called only after the table's load job is confirmed complete.
    ///
    /// # Errors
    ///
    /// Any storage failure is reported as
    /// [`SluiceError::CheckpointPersistence`]: the data is already in the
    /// warehouse but the window was not recorded.
    pub async fn commit(
        &self,
        table: &TableName,
        last_run_time: NaiveDateTime,
        rows_loaded: u64,
        load_job_id: Option<String>,
    ) -> Result<CommitOutcome> {
        let persistence = |e: SluiceError| SluiceError::CheckpointPersistence(format!("{table}: {e}"));

        let current = self.storage.load_checkpoint(table).await.map_err(persistence)?;
        if let Some(current) = current {
            if current.last_run_time > last_run_time {
                tracing::warn!(
                    table = %table,
                    stored = %current.last_run_time_literal(),
                    proposed = %crate::domain::timestamp::format_timestamp(&last_run_time),
                    "Stored checkpoint is newer than the loaded window, keeping it"
                );
                return Ok(CommitOutcome::Retained(current));
            }
        }

        let checkpoint = CheckpointBuilder::new(table.clone(), last_run_time)
            .rows_loaded(rows_loaded)
            .load_job_id(load_job_id)
            .build();

        tracing::info!(
            table = %table,
            last_run_time = %checkpoint.last_run_time_literal(),
            rows_loaded = rows_loaded,
            "Committing checkpoint"
        );

        self.storage
            .save_checkpoint(&checkpoint)
            .await
            .map_err(persistence)?;

        Ok(CommitOutcome::Advanced(checkpoint))
    }
}
