//! Staging writer
//!
//! Serializes row batches to CSV and publishes each batch as one object in
//! staging storage. Object paths group batches by run and table:
//! `{data_path}/{YYYYMMDD}/{HHMMSS}/{table}/{table}_{NNNN}.csv`.
//!
//! A window without rows leaves an empty `_EMPTY` marker under the table
//! prefix instead. When an execution gate object is configured, every batch
//! is preceded by a check that the gate still exists.

use crate::adapters::traits::{RowBatch, StagedObject, StagingStore};
use crate::core::pipeline::cancel::Cancellation;
use crate::core::pipeline::retry::RetryPolicy;
use crate::domain::ids::TableName;
use crate::domain::table::TableSpec;
use crate::domain::{Result, SluiceError};
use chrono::NaiveDateTime;
use std::sync::Arc;

/// File name of the empty-window marker
pub const EMPTY_MARKER: &str = "_EMPTY";

/// Path convention for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingLayout {
    data_path: String,
    run_started: NaiveDateTime,
}

impl StagingLayout {
    pub fn new(data_path: impl Into<String>, run_started: NaiveDateTime) -> Self {
        Self {
            data_path: data_path.into().trim_matches('/').to_string(),
            run_started,
        }
    }

    /// Prefix shared by all objects of `table` in this run
    pub fn table_prefix(&self, table: &TableName) -> String {
        let stamp = format!(
            "{}/{}/{}",
            self.run_started.format("%Y%m%d"),
            self.run_started.format("%H%M%S"),
            table
        );
        if self.data_path.is_empty() {
            stamp
        } else {
            format!("{}/{}", self.data_path, stamp)
        }
    }

    /// Zero-byte object marking a window that produced no rows
    pub fn empty_marker_path(&self, table: &TableName) -> String {
        format!("{}/{EMPTY_MARKER}", self.table_prefix(table))
    }

    /// Path of batch `batch_no` (1-based)
    pub fn object_path(&self, table: &TableName, batch_no: usize) -> String {
        format!("{}/{}_{:04}.csv", self.table_prefix(table), table, batch_no)
    }
}

/// Encode a batch as CSV with a header row, dropping `exclude` columns
///
/// Column matching is case-insensitive. NULL becomes an empty field.
///
/// # Errors
///
/// Returns [`SluiceError::ConfigValidation`] when every column is excluded
/// and [`SluiceError::Serialization`] when a row has the wrong width.
pub fn encode_csv(batch: &RowBatch, exclude: &[String]) -> Result<Vec<u8>> {
    let keep = kept_indices(&batch.columns, exclude);

    if keep.is_empty() {
        return Err(SluiceError::ConfigValidation(
            "exclude_columns removes every column of the result set".to_string(),
        ));
    }

    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(keep.iter().map(|&i| batch.columns[i].as_str()))?;

    for (row_no, row) in batch.rows.iter().enumerate() {
        if row.len() != batch.columns.len() {
            return Err(SluiceError::Serialization(format!(
                "row {} has {} values for {} columns",
                row_no + 1,
                row.len(),
                batch.columns.len()
            )));
        }
        writer.write_record(keep.iter().map(|&i| row[i].as_deref().unwrap_or("")))?;
    }

    writer
        .into_inner()
        .map_err(|e| SluiceError::Serialization(format!("CSV flush failed: {e}")))
}

fn kept_indices(columns: &[String], exclude: &[String]) -> Vec<usize> {
    columns
        .iter()
        .enumerate()
        .filter(|(_, name)| !exclude.iter().any(|ex| ex.eq_ignore_ascii_case(name)))
        .map(|(i, _)| i)
        .collect()
}

/// Columns written to the staged files, in order
pub fn kept_columns(columns: &[String], exclude: &[String]) -> Vec<String> {
    kept_indices(columns, exclude)
        .into_iter()
        .map(|i| columns[i].clone())
        .collect()
}

/// Excluded column names that do not occur in the result set
pub fn unknown_exclusions<'a>(columns: &[String], exclude: &'a [String]) -> Vec<&'a str> {
    exclude
        .iter()
        .filter(|ex| !columns.iter().any(|c| c.eq_ignore_ascii_case(ex)))
        .map(String::as_str)
        .collect()
}

/// Publishes batches to a [`StagingStore`] with per-batch retry
pub struct StagingWriter {
    store: Arc<dyn StagingStore + Send + Sync>,
    layout: StagingLayout,
    retry: RetryPolicy,
    execution_gate: Option<String>,
}

impl StagingWriter {
    pub fn new(
        store: Arc<dyn StagingStore + Send + Sync>,
        layout: StagingLayout,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            layout,
            retry,
            execution_gate: None,
        }
    }

    /// Require `path` to exist in the store before each batch is staged
    pub fn with_execution_gate(mut self, path: impl Into<String>) -> Self {
        self.execution_gate = Some(path.into());
        self
    }

    pub fn layout(&self) -> &StagingLayout {
        &self.layout
    }

    /// Fail with [`SluiceError::ExecutionHalted`] once the gate object is gone
    async fn check_gate(&self, table: &TableName) -> Result<()> {
        let Some(gate) = &self.execution_gate else {
            return Ok(());
        };
        if self.store.exists(gate).await? {
            return Ok(());
        }
        tracing::warn!(table = %table, gate = %gate, "Execution gate missing, halting table");
        Err(SluiceError::ExecutionHalted(format!(
            "{table}: execution gate '{gate}' is missing"
        )))
    }

    /// Serialize and publish batch `batch_no` of `spec`
    ///
    /// # Errors
    ///
    /// Returns the last [`SluiceError::Staging`] once retries are exhausted
    /// and [`SluiceError::ExecutionHalted`] when the execution gate is missing.
    pub async fn stage_batch(
        &self,
        spec: &TableSpec,
        batch_no: usize,
        batch: &RowBatch,
        cancel: &Cancellation,
    ) -> Result<StagedObject> {
        self.check_gate(&spec.name).await?;

        if batch_no == 1 {
            let unknown = unknown_exclusions(&batch.columns, &spec.exclude_columns);
            if !unknown.is_empty() {
                tracing::warn!(
                    table = %spec.name,
                    columns = ?unknown,
                    "Excluded columns not present in result set"
                );
            }
        }

        let body = encode_csv(batch, &spec.exclude_columns)?;
        let path = self.layout.object_path(&spec.name, batch_no);
        let operation = format!("stage batch {batch_no}");

        let object = self
            .retry
            .run(spec.name.as_str(), &operation, cancel, |_| {
                self.store.put(&path, body.clone())
            })
            .await?;

        tracing::debug!(
            table = %spec.name,
            batch = batch_no,
            rows = batch.len(),
            bytes = object.size_bytes,
            uri = %object.uri,
            "Batch staged"
        );

        Ok(object)
    }

    /// Write the empty-window marker of `table`, best effort
    pub async fn mark_empty(&self, table: &TableName) {
        let path = self.layout.empty_marker_path(table);
        match self.store.put(&path, Vec::new()).await {
            Ok(object) => tracing::debug!(table = %table, uri = %object.uri, "Empty window marked"),
            Err(e) => tracing::warn!(
                table = %table,
                path = %path,
                error = %e,
                "Failed to write empty window marker"
            ),
        }
    }

    /// Delete staged objects, best effort
    ///
    /// Returns the number of objects that could not be deleted.
    pub async fn rollback(&self, table: &TableName, objects: &[StagedObject]) -> usize {
        let mut failures = 0;
        for object in objects {
            if let Err(e) = self.store.delete(&object.path).await {
                failures += 1;
                tracing::warn!(
                    table = %table,
                    path = %object.path,
                    error = %e,
                    "Failed to delete staged object"
                );
            }
        }
        if !objects.is_empty() {
            tracing::info!(
                table = %table,
                deleted = objects.len() - failures,
                failed = failures,
                "Rolled back staged objects"
            );
        }
        failures
    }
}
