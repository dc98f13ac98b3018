//! Per-table state machine
//!
//! A [`TableRunner`] drives one table through
//! `Pending → Resolving → Extracting ⇄ Staging → Loading → Committing → Succeeded`.
//! `Failed` is reachable from every non-terminal state. The previous
//! checkpoint stays visible on every failure path: the only checkpoint write
//! happens in `Committing`, after the warehouse confirmed the load.
//!
//! Incremental windows load into the table's landing table first and are
//! then merged into the target, so re-running a window replaces its rows.

use crate::adapters::traits::{
    CheckpointStorage, LoadJobHandle, LoadRequest, LoadSubmitter, MergeRequest, RowCursor,
    SourceClient, StagedObject,
};
use crate::core::incremental::resolver::{self, ResolvedRange, RunParameters};
use crate::core::incremental::rewriter::{self, FinalQuery};
use crate::core::pipeline::cancel::Cancellation;
use crate::core::pipeline::report::RunOutcome;
use crate::core::pipeline::retry::RetryPolicy;
use crate::core::pipeline::staging::{kept_columns, StagingWriter};
use crate::core::state::checkpoint::Checkpoint;
use crate::core::state::manager::{CheckpointManager, CommitOutcome};
use crate::domain::systemdate::SystemDateConfig;
use crate::domain::table::{LoadPlan, LoadType, TableSpec, WriteDisposition};
use crate::domain::timestamp::format_timestamp;
use crate::domain::{Result, SluiceError};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// States of a table run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableState {
    Pending,
    Resolving,
    Extracting,
    Staging,
    Loading,
    Committing,
    Succeeded,
    Failed,
}

impl TableState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for TableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Resolving => "resolving",
            Self::Extracting => "extracting",
            Self::Staging => "staging",
            Self::Loading => "loading",
            Self::Committing => "committing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Collaborators and run-level inputs shared by every runner of a run
pub struct RunContext {
    pub source: Arc<dyn SourceClient + Send + Sync>,
    pub staging: Arc<StagingWriter>,
    pub loader: Arc<dyn LoadSubmitter + Send + Sync>,
    pub checkpoints: Arc<CheckpointManager>,
    pub systemdate: SystemDateConfig,
    pub params: RunParameters,
    /// "Now" in the source timezone, fixed for the whole run
    pub now: NaiveDateTime,
    pub retry: RetryPolicy,
    pub dry_run: bool,
}

impl RunContext {
    /// Context with default retry, parameters and a disabled SystemDate window
    pub fn new(
        source: Arc<dyn SourceClient + Send + Sync>,
        staging: Arc<StagingWriter>,
        loader: Arc<dyn LoadSubmitter + Send + Sync>,
        checkpoint_storage: Arc<dyn CheckpointStorage + Send + Sync>,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            source,
            staging,
            loader,
            checkpoints: Arc::new(CheckpointManager::new_with_storage(checkpoint_storage)),
            systemdate: SystemDateConfig::disabled(),
            params: RunParameters::default(),
            now,
            retry: RetryPolicy::default(),
            dry_run: false,
        }
    }
}

/// Rows and objects produced by one successful extraction attempt
#[derive(Debug, Default)]
struct Extracted {
    objects: Vec<StagedObject>,
    rows: u64,
    /// Columns of the staged files
    columns: Vec<String>,
}

/// Per-table pipeline
pub struct TableRunner {
    spec: TableSpec,
    ctx: Arc<RunContext>,
    cancel: Cancellation,
    state: Mutex<TableState>,
}

impl TableRunner {
    pub fn new(spec: TableSpec, ctx: Arc<RunContext>, cancel: Cancellation) -> Self {
        Self {
            spec,
            ctx,
            cancel,
            state: Mutex::new(TableState::Pending),
        }
    }

    pub fn state(&self) -> TableState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(TableState::Failed)
    }

    fn transition(&self, to: TableState) {
        if let Ok(mut state) = self.state.lock() {
            if *state != to {
                crate::log_table_transition!(self.spec.name, *state, to);
                *state = to;
            }
        }
    }

    fn load_type(&self) -> LoadType {
        self.spec.load_type(self.ctx.params.force_full_load)
    }

    /// Drive the table to a terminal state
    ///
    /// Never returns an error: every failure becomes a `Failed` outcome so a
    /// table can never abort its siblings.
    pub async fn run(self) -> RunOutcome {
        let started = Instant::now();
        let load_type = self.load_type();

        tracing::info!(
            table = %self.spec.name,
            load_type = %load_type,
            "Table run started"
        );

        let mut outcome = match self.execute(load_type).await {
            Ok(outcome) => {
                self.transition(TableState::Succeeded);
                outcome
            }
            Err((error, mut partial)) => {
                let failed_in = self.state();
                self.transition(TableState::Failed);

                if let SluiceError::CheckpointPersistence(_) = &error {
                    let window_end = partial
                        .range
                        .map(|r| format_timestamp(&r.end))
                        .unwrap_or_default();
                    crate::log_checkpoint_not_recorded!(self.spec.name, window_end, error);
                } else {
                    tracing::error!(
                        table = %self.spec.name,
                        state = %failed_in,
                        kind = %error.kind(),
                        error = %error,
                        "Table run failed"
                    );
                }

                let mut failed =
                    RunOutcome::failed(self.spec.name.clone(), load_type, &error, failed_in);
                failed.rows_processed = partial.rows_processed;
                failed.range = partial.range;
                failed.staged_objects = std::mem::take(&mut partial.staged_objects);
                failed.load_job_id = partial.load_job_id.take();
                failed
            }
        };

        outcome.duration = started.elapsed();
        tracing::info!(
            table = %self.spec.name,
            status = ?outcome.status,
            rows = outcome.rows_processed,
            duration_ms = outcome.duration.as_millis() as u64,
            "Table run finished"
        );
        outcome
    }

    /// Run every stage; on failure return the error with what was achieved
    async fn execute(
        &self,
        load_type: LoadType,
    ) -> std::result::Result<RunOutcome, (SluiceError, RunOutcome)> {
        let mut progress = RunOutcome::succeeded(self.spec.name.clone(), load_type);

        // Resolving: no side effects
        self.transition(TableState::Resolving);
        let (range, query) = match self.resolve().await {
            Ok(resolved) => resolved,
            Err(e) => return Err((e, progress)),
        };
        progress.range = range;

        if self.ctx.dry_run {
            tracing::info!(
                table = %self.spec.name,
                range = %range.map(|r| r.to_string()).unwrap_or_else(|| "full".into()),
                query = %query,
                "Dry run: final query"
            );
            let mut skipped = RunOutcome::skipped(self.spec.name.clone(), load_type, "dry run");
            skipped.range = range;
            return Ok(skipped);
        }

        // Extracting and staging
        let extracted = match self.extract_with_retry(&query).await {
            Ok(extracted) => extracted,
            Err(e) => return Err((e, progress)),
        };
        progress.rows_processed = extracted.rows;
        progress.staged_objects = extracted.objects;

        // Loading
        let job_id = if progress.staged_objects.is_empty() {
            tracing::info!(table = %self.spec.name, "No rows extracted, skipping load");
            self.ctx.staging.mark_empty(&self.spec.name).await;
            None
        } else {
            match self
                .load(&progress.staged_objects, &extracted.columns, load_type, range)
                .await
            {
                Ok(job_id) => Some(job_id),
                Err(e) => {
                    if matches!(e, SluiceError::Cancelled(_)) {
                        progress.staged_objects.clear();
                    }
                    return Err((e, progress));
                }
            }
        };
        progress.load_job_id = job_id.clone();

        // Committing: full loads never move the checkpoint
        if let (LoadType::Incremental, Some(range)) = (load_type, range) {
            self.transition(TableState::Committing);
            match self
                .ctx
                .checkpoints
                .commit(&self.spec.name, range.end, extracted.rows, job_id)
                .await
            {
                Ok(CommitOutcome::Advanced(cp)) | Ok(CommitOutcome::Retained(cp)) => {
                    progress.checkpoint = Some(cp.last_run_time_literal());
                }
                Err(e) => return Err((e, progress)),
            }
        }

        Ok(progress)
    }

    async fn resolve(&self) -> Result<(Option<ResolvedRange>, FinalQuery)> {
        let checkpoint = self.read_checkpoint_if_needed().await?;
        let range = resolver::resolve(
            &self.spec,
            &self.ctx.systemdate,
            checkpoint.as_ref(),
            self.ctx.now,
            self.ctx.params,
        )?;
        let query = rewriter::rewrite(&self.spec.base_query, range.as_ref(), &self.spec)?;

        tracing::info!(
            table = %self.spec.name,
            range = %range.map(|r| r.to_string()).unwrap_or_else(|| "full".into()),
            origin = ?range.map(|r| r.start_origin),
            "Extraction window resolved"
        );
        tracing::debug!(table = %self.spec.name, query = %query, "Final query");

        Ok((range, query))
    }

    /// The checkpoint only matters when an enabled window has no start of its own
    async fn read_checkpoint_if_needed(&self) -> Result<Option<Checkpoint>> {
        let needed = self.load_type() == LoadType::Incremental
            && self.ctx.systemdate.enabled
            && self.ctx.systemdate.start_date.is_none();
        if needed {
            self.ctx.checkpoints.load_checkpoint(&self.spec.name).await
        } else {
            Ok(None)
        }
    }

    /// Extract and stage the whole result set, retrying on transient source errors
    ///
    /// Each attempt starts from scratch; objects staged by a failed attempt are
    /// deleted before the next one.
    async fn extract_with_retry(&self, query: &FinalQuery) -> Result<Extracted> {
        self.ctx
            .retry
            .run_if(
                self.spec.name.as_str(),
                "extract",
                &self.cancel,
                |e| {
                    matches!(
                        e,
                        SluiceError::TransientExtraction(_) | SluiceError::Connection(_)
                    )
                },
                |attempt| self.extract_attempt(query, attempt),
            )
            .await
    }

    async fn extract_attempt(&self, query: &FinalQuery, attempt: u32) -> Result<Extracted> {
        self.transition(TableState::Extracting);
        if attempt > 1 {
            tracing::info!(table = %self.spec.name, attempt = attempt, "Restarting extraction");
        }

        let mut cursor = self
            .ctx
            .source
            .open_cursor(query, self.spec.batch_size)
            .await?;

        let mut extracted = Extracted::default();
        let drained = self.drain(cursor.as_mut(), &mut extracted).await;

        if let Err(e) = cursor.close().await {
            tracing::warn!(table = %self.spec.name, error = %e, "Failed to close source cursor");
        }

        match drained {
            Ok(()) => Ok(extracted),
            Err(e) => {
                self.ctx
                    .staging
                    .rollback(&self.spec.name, &extracted.objects)
                    .await;
                Err(e)
            }
        }
    }

    async fn drain(&self, cursor: &mut dyn RowCursor, extracted: &mut Extracted) -> Result<()> {
        let mut batch_no = 0;
        loop {
            self.cancel.check("extraction")?;

            let next = tokio::select! {
                next = cursor.next_batch() => next?,
                _ = self.cancel.cancelled() => {
                    return Err(SluiceError::Cancelled("run cancelled during extraction".into()));
                }
            };
            let Some(batch) = next else {
                return Ok(());
            };
            if batch.is_empty() {
                continue;
            }

            batch_no += 1;
            if batch_no == 1 {
                extracted.columns = kept_columns(&batch.columns, &self.spec.exclude_columns);
            }
            self.transition(TableState::Staging);
            let object = self
                .ctx
                .staging
                .stage_batch(&self.spec, batch_no, &batch, &self.cancel)
                .await?;

            extracted.rows += batch.len() as u64;
            tracing::info!(
                table = %self.spec.name,
                batch = batch_no,
                batch_rows = batch.len(),
                rows_so_far = extracted.rows,
                bytes = object.size_bytes,
                "Batch processed"
            );
            extracted.objects.push(object);
            self.transition(TableState::Extracting);
        }
    }

    /// Load all staged objects following the table's load plan
    ///
    /// Returns the id of the job whose completion made the rows visible in
    /// the target: the load job for direct loads, the merge job otherwise.
    async fn load(
        &self,
        objects: &[StagedObject],
        columns: &[String],
        load_type: LoadType,
        range: Option<ResolvedRange>,
    ) -> Result<String> {
        if let Err(e) = self.cancel.check("loading") {
            self.ctx.staging.rollback(&self.spec.name, objects).await;
            return Err(e);
        }
        self.transition(TableState::Loading);

        match self.spec.load_plan(load_type) {
            LoadPlan::Direct(disposition) => {
                let request = self.load_request(
                    objects,
                    self.spec.target_table.clone(),
                    disposition,
                    None,
                );
                self.load_and_wait(&request).await
            }
            LoadPlan::Merge => {
                let window = range.ok_or_else(|| {
                    SluiceError::RangeResolution(format!(
                        "{}: merge needs a resolved window",
                        self.spec.name
                    ))
                })?;
                let landing = self.spec.landing_table();
                let request = self.load_request(
                    objects,
                    landing.clone(),
                    WriteDisposition::Truncate,
                    Some(self.spec.target_table.clone()),
                );
                self.load_and_wait(&request).await?;

                let merge = MergeRequest {
                    table_name: self.spec.name.clone(),
                    target_table: self.spec.target_table.clone(),
                    landing_table: landing,
                    columns: columns.to_vec(),
                    window_column: self.spec.window_column(),
                    window,
                    strategy: self.spec.merge.clone(),
                };
                let handle = self.ctx.loader.submit_merge(&merge).await?;
                tracing::info!(
                    table = %self.spec.name,
                    job_id = %handle,
                    strategy = merge.strategy.name(),
                    target = %merge.target_table,
                    window = %window,
                    "Merge job submitted"
                );
                self.await_job(&handle, "Merge job completed").await
            }
        }
    }

    fn load_request(
        &self,
        objects: &[StagedObject],
        destination_table: String,
        write_disposition: WriteDisposition,
        create_like: Option<String>,
    ) -> LoadRequest {
        LoadRequest {
            table_name: self.spec.name.clone(),
            destination_table,
            source_uris: objects.iter().map(|o| o.uri.clone()).collect(),
            write_disposition,
            create_like,
        }
    }

    async fn load_and_wait(&self, request: &LoadRequest) -> Result<String> {
        let handle = self.ctx.loader.submit(request).await?;
        tracing::info!(
            table = %self.spec.name,
            job_id = %handle,
            objects = request.source_uris.len(),
            destination = %request.destination_table,
            disposition = request.write_disposition.as_bigquery(),
            "Load job submitted"
        );
        self.await_job(&handle, "Load job completed").await
    }

    // A submitted job is awaited even when the run is cancelled, so the
    // checkpoint decision reflects what actually reached the warehouse
    async fn await_job(&self, handle: &LoadJobHandle, message: &'static str) -> Result<String> {
        let report = self.ctx.loader.wait(handle).await?;
        tracing::info!(
            table = %self.spec.name,
            job_id = %report.job_id,
            output_rows = ?report.output_rows,
            "{message}"
        );
        Ok(report.job_id)
    }
}
